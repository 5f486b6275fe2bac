// Copyright 2026 the Stipple Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Surface descriptors, identities and owner negotiation.

use crate::allocator::Allocation;
use crate::backend::{Access, LockInfo, PixelHandle};
use crate::format::PixelFormat;
use crate::geometry::Rect;
use crate::pipeline::IssueId;
use crate::slab::{Chain, Key, Links};

/// Handle to a cached surface.
///
/// Handles are generational: once the surface is discarded every operation
/// on the old handle fails with [`ErrorKind::StaleHandle`](crate::ErrorKind::StaleHandle).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub(crate) Key);

/// Opaque token naming the component that semantically owns a surface.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(pub u32);

/// How hard the cache is pushing when it asks an owner to give up a surface.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Urgency {
    /// Routine trimming back under the cache budget.
    Low = 0,
    /// Allocation is failing and idle surfaces are the next thing to go.
    Medium = 1,
    /// Last resort before the allocation fails.
    High = 2,
}

impl Urgency {
    /// All levels, in escalation order.
    pub const ALL: [Self; 3] = [Self::Low, Self::Medium, Self::High];
}

/// Owner callback deciding whether an idle, tagged surface may be destroyed
/// and recreated later.
pub trait DiscardNegotiator {
    /// Returns `true` to let the cache detach and discard `surface`.
    fn can_discard(&mut self, surface: SurfaceId, owner: OwnerId, urgency: Urgency) -> bool;
}

impl<F> DiscardNegotiator for F
where
    F: FnMut(SurfaceId, OwnerId, Urgency) -> bool,
{
    fn can_discard(&mut self, surface: SurfaceId, owner: OwnerId, urgency: Urgency) -> bool {
        self(surface, owner, urgency)
    }
}

/// A negotiator that refuses every request.
#[derive(Copy, Clone, Debug, Default)]
pub struct NeverDiscard;

impl DiscardNegotiator for NeverDiscard {
    fn can_discard(&mut self, _: SurfaceId, _: OwnerId, _: Urgency) -> bool {
        false
    }
}

/// Everything `find` compares when looking for a reusable surface.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct Identity {
    pub(crate) format: PixelFormat,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) tags: [u32; 2],
}

impl Identity {
    /// Anonymous surfaces are never speculatively cached.
    pub(crate) fn is_tagged(&self) -> bool {
        self.tags[0] != 0 && self.tags[1] != 0
    }
}

/// An active direct-access grant.
///
/// Returned by [`Engine::lock`](crate::Engine::lock) and consumed by
/// [`Engine::unlock`](crate::Engine::unlock).
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a lock must be handed back to `unlock`"]
pub struct SurfaceLock {
    pub(crate) surface: SurfaceId,
    pub(crate) rect: Rect,
    pub(crate) access: Access,
    pub(crate) info: LockInfo,
}

impl SurfaceLock {
    /// The locked surface.
    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    /// The locked rectangle.
    pub fn rect(&self) -> Rect {
        self.rect
    }

    /// Granted access.
    pub fn access(&self) -> Access {
        self.access
    }

    /// Bytes per row.
    pub fn pitch(&self) -> usize {
        self.info.pitch
    }

    /// Byte offset of the rectangle's top-left pixel within the store.
    pub fn offset(&self) -> usize {
        self.info.offset
    }

    /// Colour lookup table entries made accessible.
    pub fn clut(&self) -> Option<core::ops::Range<usize>> {
        self.info.clut.clone()
    }
}

/// Snapshot of a surface's bookkeeping.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SurfaceInfo {
    /// Pixel format.
    pub format: PixelFormat,
    /// Width after backend size adjustment.
    pub width: u32,
    /// Height after backend size adjustment.
    pub height: u32,
    /// Bytes of pixel memory.
    pub byte_size: usize,
    /// Backend store.
    pub handle: PixelHandle,
    /// Current owner.
    pub owner: Option<OwnerId>,
    /// Exclusive caller claims.
    pub owned: u32,
    /// Caller claims plus in-flight pipeline references.
    pub used: u32,
    /// Flushed issues still targeting the surface.
    pub pending: u32,
    /// Identity tags.
    pub tags: [u32; 2],
    /// Retained after the last `free`.
    pub cached: bool,
    /// Backed by external constant memory.
    pub constant: bool,
}

pub(crate) struct Surface {
    pub(crate) identity: Identity,
    pub(crate) byte_size: usize,
    pub(crate) handle: PixelHandle,
    pub(crate) owner: Option<OwnerId>,
    pub(crate) owned: u32,
    pub(crate) used: u32,
    pub(crate) pending: u32,
    pub(crate) do_cache: bool,
    pub(crate) constant: bool,
    /// The glyph atlas: never evicted and not charged to the budget.
    pub(crate) pinned: bool,
    pub(crate) lock: Option<Access>,
    pub(crate) open_issue: Option<IssueId>,
    pub(crate) lru: Links,
    pub(crate) descriptor: Option<Allocation>,
}

pub(crate) const LRU: Chain<Surface> = Chain {
    links: |s| &s.lru,
    links_mut: |s| &mut s.lru,
};

impl Surface {
    /// Counts toward the cache budget.
    pub(crate) fn is_budgeted(&self) -> bool {
        !self.constant && !self.pinned
    }

    /// Idle and owned by exactly one caller, so its owner may be asked to let go.
    pub(crate) fn is_negotiable(&self) -> bool {
        self.used == 1
            && self.owned == 1
            && self.pending == 0
            && self.owner.is_some()
            && self.identity.is_tagged()
            && self.lock.is_none()
            && self.open_issue.is_none()
            && !self.pinned
    }

    /// Unreferenced and free to discard outright.
    pub(crate) fn is_unused(&self) -> bool {
        self.used == 0 && self.open_issue.is_none() && !self.pinned
    }

    pub(crate) fn info(&self) -> SurfaceInfo {
        SurfaceInfo {
            format: self.identity.format,
            width: self.identity.width,
            height: self.identity.height,
            byte_size: self.byte_size,
            handle: self.handle,
            owner: self.owner,
            owned: self.owned,
            used: self.used,
            pending: self.pending,
            tags: self.identity.tags,
            cached: self.do_cache,
            constant: self.constant,
        }
    }
}
