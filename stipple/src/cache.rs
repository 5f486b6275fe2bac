// Copyright 2026 the Stipple Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Surface cache: creation, identity reuse, claims, locking and eviction.
//!
//! All live surfaces sit on one LRU list, most recently used at the front.
//! Eviction walks it from the back.

use core::ops::Range;

use smallvec::SmallVec;

use crate::backend::{Backend, LockMode};
use crate::error::{Error, ErrorKind};
use crate::format::PixelFormat;
use crate::geometry::Rect;
use crate::slab::{Links, List};
use crate::surface::{Identity, OwnerId, Surface, SurfaceId, SurfaceInfo, SurfaceLock, Urgency, LRU};
use crate::{Allocator, Engine};

/// Counters kept by the surface cache.
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq)]
pub struct CacheStats {
    /// Live surfaces, including constant ones and the atlas.
    pub surfaces: usize,
    /// Pixel bytes counted against the cache budget.
    pub cached_bytes: usize,
    /// `find` calls that returned a surface.
    pub find_hits: u64,
    /// `find` calls that returned nothing.
    pub find_misses: u64,
    /// Unused surfaces discarded by eviction or reclaim.
    pub evictions: u64,
    /// Surfaces discarded with their owner's consent.
    pub negotiated_discards: u64,
}

/// Where a new surface's pixels come from.
#[derive(Copy, Clone)]
enum Pixels {
    Owned,
    Const(&'static [u8]),
}

impl<B: Backend, A: Allocator> Engine<B, A> {
    /// Creates a surface and returns it with one claim held by the caller.
    ///
    /// Surfaces with both tags non-zero are retained after their last
    /// [`free`](Self::free) so a later [`find`](Self::find) can reuse them.
    pub fn create(
        &mut self,
        format: PixelFormat,
        width: u32,
        height: u32,
        owner: Option<OwnerId>,
        tag1: u32,
        tag2: u32,
    ) -> Result<SurfaceId, Error> {
        self.create_surface(format, width, height, owner, [tag1, tag2], Pixels::Owned)
    }

    /// Creates a surface over externally owned pixels, such as a ROM image.
    ///
    /// The surface never counts against the cache budget and refuses
    /// write locks and drawing.
    pub fn create_const(
        &mut self,
        format: PixelFormat,
        width: u32,
        height: u32,
        owner: Option<OwnerId>,
        tag1: u32,
        tag2: u32,
        pixels: &'static [u8],
    ) -> Result<SurfaceId, Error> {
        self.create_surface(format, width, height, owner, [tag1, tag2], Pixels::Const(pixels))
    }

    fn create_surface(
        &mut self,
        format: PixelFormat,
        width: u32,
        height: u32,
        owner: Option<OwnerId>,
        tags: [u32; 2],
        pixels: Pixels,
    ) -> Result<SurfaceId, Error> {
        if format.is_virtual() {
            return Err(Error::new(ErrorKind::VirtualFormat));
        }
        self.advance();
        self.evict(false);

        let (width, height) = self.backend.adjust_size(format, width, height);
        let constant = matches!(pixels, Pixels::Const(_));
        let byte_size = self.backend.memory_size(format, width, height);
        let descriptor = self.charge(size_of::<Surface>())?;
        let created = self.retry(|engine| match pixels {
            Pixels::Owned => engine.backend.create(format, width, height),
            Pixels::Const(bytes) => engine.backend.create_const(format, width, height, bytes),
        });
        let handle = match created {
            Ok(handle) => handle,
            Err(err) => {
                self.allocator.free(descriptor);
                return Err(err);
            }
        };

        let identity = Identity {
            format,
            width,
            height,
            tags,
        };
        // Two transient claims keep the new surface out of the eviction below.
        let key = self.surfaces.insert(Surface {
            identity,
            byte_size,
            handle,
            owner,
            owned: 3,
            used: 3,
            pending: 0,
            do_cache: identity.is_tagged(),
            constant,
            pinned: false,
            lock: None,
            open_issue: None,
            lru: Links::default(),
            descriptor: Some(descriptor),
        });
        let id = SurfaceId(key);
        self.lru.push_front(&mut self.surfaces, LRU, key.index);
        self.index.entry(identity).or_default().push(id);
        if !constant {
            self.cached_bytes += byte_size;
        }
        self.evict(false);
        if let Some(surface) = self.surfaces.get_mut(key) {
            surface.owned -= 2;
            surface.used -= 2;
        }
        log::debug!("created {id:?}: {format:?} {width}x{height}, {byte_size} bytes");
        Ok(id)
    }

    /// Reuses a surface with exactly this identity, taking a claim on it.
    ///
    /// A surface nobody references is preferred; failing that, one that is
    /// only referenced by in-flight issues. The surface passes to `owner`.
    pub fn find(
        &mut self,
        format: PixelFormat,
        width: u32,
        height: u32,
        owner: Option<OwnerId>,
        tag1: u32,
        tag2: u32,
    ) -> Option<SurfaceId> {
        self.advance();
        let (width, height) = self.backend.adjust_size(format, width, height);
        let identity = Identity {
            format,
            width,
            height,
            tags: [tag1, tag2],
        };
        let found = if format.is_virtual() || !identity.is_tagged() {
            None
        } else {
            self.best_match(&identity)
        };
        let Some(id) = found else {
            self.stats.find_misses += 1;
            return None;
        };
        self.stats.find_hits += 1;
        self.lru.move_to_front(&mut self.surfaces, LRU, id.0.index);
        let surface = self.surfaces.get_mut(id.0)?;
        surface.owned += 1;
        surface.used += 1;
        surface.owner = owner;
        Some(id)
    }

    fn best_match(&self, identity: &Identity) -> Option<SurfaceId> {
        let candidates = self.index.get(identity)?;
        let live = || {
            candidates
                .iter()
                .filter_map(|id| self.surfaces.get(id.0).map(|s| (*id, s)))
                .filter(|(_, s)| !s.pinned)
        };
        if let Some((id, _)) = live().find(|(_, s)| s.used == 0) {
            return Some(id);
        }
        live()
            .filter(|(_, s)| s.owned == 0 && s.used > 0)
            .min_by_key(|(_, s)| s.used)
            .map(|(id, _)| id)
    }

    /// Drops one claim on `surface`.
    ///
    /// Any open issue on it is flushed first. A surface left with no
    /// references is discarded at once unless it is cacheable.
    pub fn free(&mut self, surface: SurfaceId) -> Result<(), Error> {
        self.advance();
        let target = self.surface(surface)?;
        if target.owned == 0 {
            log::error!("free of {surface:?}, which has no owner claims");
            return Err(Error::on(ErrorKind::NotOwned, surface));
        }
        if target.open_issue.is_some() {
            self.flush(surface)?;
        }
        let target = self.surface_mut(surface)?;
        target.owned -= 1;
        target.used -= 1;
        self.lru.move_to_front(&mut self.surfaces, LRU, surface.0.index);
        if !self.discard_if_idle(surface) {
            self.evict(false);
        }
        Ok(())
    }

    /// Chooses whether `surface` is retained after its last claim is freed.
    pub fn set_cacheable(&mut self, surface: SurfaceId, cacheable: bool) -> Result<(), Error> {
        self.surface_mut(surface)?.do_cache = cacheable;
        Ok(())
    }

    /// Grants direct access to `rect` of `surface`.
    ///
    /// The lock holds a claim until it is handed back to
    /// [`unlock`](Self::unlock). Unless `mode` says otherwise, the pipeline
    /// is first drained so the access does not race queued drawing.
    pub fn lock(
        &mut self,
        surface: SurfaceId,
        rect: Rect,
        clut: Option<Range<usize>>,
        mode: LockMode,
    ) -> Result<SurfaceLock, Error> {
        self.advance();
        let target = self.surface_mut(surface)?;
        if target.lock.is_some() {
            log::error!("{surface:?} is already locked");
            return Err(Error::on(ErrorKind::AlreadyLocked, surface));
        }
        target.owned += 1;
        target.used += 1;

        let waited = if mode.wait {
            self.wait_for_surface(surface, mode.access.writes())
        } else {
            Ok(())
        };
        let handle = self.surface(surface)?.handle;
        let granted = match waited {
            Ok(()) => self
                .backend
                .lock(handle, rect, clut, mode.access)
                .ok_or(Error::on(ErrorKind::LockRefused, surface)),
            Err(err) => Err(err),
        };
        let target = self.surface_mut(surface)?;
        match granted {
            Ok(info) => {
                target.lock = Some(mode.access);
                Ok(SurfaceLock {
                    surface,
                    rect,
                    access: mode.access,
                    info,
                })
            }
            Err(err) => {
                target.owned -= 1;
                target.used -= 1;
                log::debug!("lock of {surface:?} failed: {err}");
                Err(err)
            }
        }
    }

    /// Ends direct access and drops the lock's claim.
    pub fn unlock(&mut self, lock: SurfaceLock) -> Result<(), Error> {
        let handle = {
            let target = self.surface(lock.surface)?;
            if target.lock.is_none() {
                log::error!("unlock of {:?}, which is not locked", lock.surface);
                return Err(Error::on(ErrorKind::NotLocked, lock.surface));
            }
            target.handle
        };
        self.backend.unlock(handle, &lock.info);
        let target = self.surface_mut(lock.surface)?;
        target.lock = None;
        target.owned -= 1;
        target.used -= 1;
        self.advance();
        Ok(())
    }

    /// Bytes of a locked surface's store.
    pub fn pixels(&self, lock: &SurfaceLock) -> Option<&[u8]> {
        let handle = self.surfaces.get(lock.surface.0)?.handle;
        self.backend.pixels(handle)
    }

    /// Mutable bytes of a surface locked for writing.
    pub fn pixels_mut(&mut self, lock: &SurfaceLock) -> Option<&mut [u8]> {
        if !lock.access.writes() {
            return None;
        }
        let handle = self.surfaces.get(lock.surface.0)?.handle;
        self.backend.pixels_mut(handle)
    }

    /// Colour lookup table of a locked indexed surface.
    pub fn clut_mut(&mut self, lock: &SurfaceLock) -> Option<&mut [u32]> {
        lock.info.clut.as_ref()?;
        let handle = self.surfaces.get(lock.surface.0)?.handle;
        self.backend.clut_mut(handle)
    }

    /// Shrinks the cache towards its byte budget.
    ///
    /// Only surfaces counted against the budget are considered. Unused
    /// surfaces go first, oldest first. Then the owners of idle, tagged
    /// surfaces are asked at each [`Urgency`] in turn. Without
    /// `force` both phases stop as soon as the cache fits; with it, every
    /// candidate is tried. Returns whether the cache is within budget.
    pub fn evict(&mut self, force: bool) -> bool {
        let budget = self.config.cache_budget;
        let mut cursor = self.lru.back();
        while let Some(index) = cursor {
            if !force && self.cached_bytes <= budget {
                return true;
            }
            cursor = List::prev(&self.surfaces, LRU, index);
            let surface = self.surfaces.at(index);
            if surface.is_unused() && surface.is_budgeted() {
                if let Some(key) = self.surfaces.key_at(index) {
                    self.discard_surface(SurfaceId(key));
                    self.stats.evictions += 1;
                }
            }
        }
        for urgency in Urgency::ALL {
            let mut cursor = self.lru.back();
            while let Some(index) = cursor {
                if !force && self.cached_bytes <= budget {
                    return true;
                }
                cursor = List::prev(&self.surfaces, LRU, index);
                let surface = self.surfaces.at(index);
                if surface.is_negotiable() && surface.is_budgeted() {
                    self.negotiate(index, urgency);
                }
            }
        }
        self.cached_bytes <= budget
    }

    /// Asks the owner of the surface at `index` to let it go.
    fn negotiate(&mut self, index: u32, urgency: Urgency) -> bool {
        let Some(key) = self.surfaces.key_at(index) else {
            return false;
        };
        let id = SurfaceId(key);
        let Some(owner) = self.surfaces.at(index).owner else {
            return false;
        };
        if !self.negotiator.can_discard(id, owner, urgency) {
            return false;
        }
        let surface = self.surfaces.at_mut(index);
        surface.owner = None;
        surface.owned = 0;
        surface.used = 0;
        log::debug!("{owner:?} let go of {id:?} at {urgency:?} urgency");
        self.discard_surface(id);
        self.stats.negotiated_discards += 1;
        true
    }

    /// Discards the oldest unreferenced surface, cached or not.
    pub(crate) fn discard_oldest_unused(&mut self) -> bool {
        let mut cursor = self.lru.back();
        while let Some(index) = cursor {
            cursor = List::prev(&self.surfaces, LRU, index);
            if self.surfaces.at(index).is_unused() {
                if let Some(key) = self.surfaces.key_at(index) {
                    self.discard_surface(SurfaceId(key));
                    self.stats.evictions += 1;
                    return true;
                }
            }
        }
        false
    }

    /// Negotiates the oldest idle surface whose owner consents at `urgency`.
    pub(crate) fn negotiate_oldest(&mut self, urgency: Urgency) -> bool {
        let mut cursor = self.lru.back();
        while let Some(index) = cursor {
            cursor = List::prev(&self.surfaces, LRU, index);
            if self.surfaces.at(index).is_negotiable() && self.negotiate(index, urgency) {
                return true;
            }
        }
        false
    }

    /// Discards `surface` if nothing references it and it is not cacheable.
    pub(crate) fn discard_if_idle(&mut self, surface: SurfaceId) -> bool {
        let idle = self
            .surfaces
            .get(surface.0)
            .is_some_and(|s| s.is_unused() && !s.do_cache);
        if idle {
            self.discard_surface(surface);
        }
        idle
    }

    /// Unlinks and destroys a surface, returning its memory.
    pub(crate) fn discard_surface(&mut self, surface: SurfaceId) {
        if self.surfaces.get(surface.0).is_none() {
            return;
        }
        self.lru.remove(&mut self.surfaces, LRU, surface.0.index);
        let Some(mut removed) = self.surfaces.remove(surface.0) else {
            return;
        };
        if let Some(ids) = self.index.get_mut(&removed.identity) {
            ids.retain(|id| *id != surface);
            if ids.is_empty() {
                self.index.remove(&removed.identity);
            }
        }
        if removed.is_budgeted() {
            self.cached_bytes -= removed.byte_size;
        }
        self.backend.destroy(removed.handle);
        if let Some(descriptor) = removed.descriptor.take() {
            self.allocator.free(descriptor);
        }
        log::debug!("discarded {surface:?} ({} bytes)", removed.byte_size);
    }

    /// Snapshot of a surface's bookkeeping, or `None` once it is discarded.
    pub fn info(&self, surface: SurfaceId) -> Option<SurfaceInfo> {
        self.surfaces.get(surface.0).map(Surface::info)
    }

    /// Live surfaces, most recently used first.
    pub fn cache_order(&self) -> SmallVec<[SurfaceId; 16]> {
        self.lru
            .indices(&self.surfaces, LRU)
            .into_iter()
            .filter_map(|index| self.surfaces.key_at(index).map(SurfaceId))
            .collect()
    }

    /// Surface cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            surfaces: self.surfaces.len(),
            cached_bytes: self.cached_bytes,
            ..self.stats
        }
    }
}
