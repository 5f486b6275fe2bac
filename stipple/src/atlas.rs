// Copyright 2026 the Stipple Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Glyph atlas: many small coverage masks packed into one pinned surface.
//!
//! The atlas surface is a grid of square cells. Occupancy is a bitmap with
//! one bit per cell, laid out column-major in 32-bit words; a glyph takes a
//! rectangle of cells whose rows all fall within one word of each column.

use alloc::vec::Vec;

use crate::backend::{Backend, LockMode};
use crate::config::AtlasConfig;
use crate::error::{Error, ErrorKind};
use crate::format::PixelFormat;
use crate::geometry::Rect;
use crate::slab::{Chain, Key, Links, List, Slab};
use crate::surface::{SurfaceId, SurfaceLock};
use crate::{Allocation, Allocator, Engine};

/// Handle to a cached glyph.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GlyphId(pub(crate) Key);

/// Counters kept by the glyph atlas.
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq)]
pub struct AtlasStats {
    /// Live glyphs.
    pub glyphs: usize,
    /// Unreserved cells.
    pub free_cells: usize,
    /// Lookups that found a glyph.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Unused glyphs discarded to make room.
    pub evictions: u64,
}

/// Snapshot of a glyph's placement and usage.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GlyphInfo {
    /// Font the glyph belongs to.
    pub font: u32,
    /// Character code within the font.
    pub code: u32,
    /// Mask width in pixels.
    pub width: u32,
    /// Mask height in pixels.
    pub height: u32,
    /// First reserved cell column.
    pub column: u32,
    /// First reserved cell row.
    pub row: u32,
    /// Reserved cell columns, including any border.
    pub columns: u32,
    /// Reserved cell rows, including any border.
    pub rows: u32,
    /// Outstanding claims.
    pub usage: u32,
}

pub(crate) struct Glyph {
    font: u32,
    code: u32,
    width: u32,
    height: u32,
    column: u32,
    row: u32,
    columns: u32,
    rows: u32,
    usage: u32,
    locked: bool,
    descriptor: Allocation,
    lru: Links,
    bucket: Links,
}

impl Glyph {
    fn cells(&self) -> Rect {
        Rect::new(
            self.column as i32,
            self.row as i32,
            self.columns,
            self.rows,
        )
    }
}

const LRU: Chain<Glyph> = Chain {
    links: |g| &g.lru,
    links_mut: |g| &mut g.lru,
};

const BUCKET: Chain<Glyph> = Chain {
    links: |g| &g.bucket,
    links_mut: |g| &mut g.bucket,
};

pub(crate) struct GlyphAtlas {
    config: AtlasConfig,
    cell: u32,
    columns: u32,
    pub(crate) surface: Option<SurfaceId>,
    /// Set bits are reserved cells.
    map: Vec<u32>,
    words_per_column: usize,
    glyphs: Slab<Glyph>,
    lru: List,
    buckets: Vec<List>,
    free_cells: usize,
    pub(crate) stats: AtlasStats,
}

impl GlyphAtlas {
    pub(crate) fn new(config: AtlasConfig) -> Self {
        let columns = config.columns();
        let words_per_column = config.rows.div_ceil(32) as usize;
        Self {
            config,
            cell: config.cell_size(),
            columns,
            surface: None,
            map: alloc::vec![0; columns as usize * words_per_column],
            words_per_column,
            glyphs: Slab::new(),
            lru: List::new(),
            buckets: alloc::vec![List::new(); config.bucket_count()],
            free_cells: columns as usize * config.rows as usize,
            stats: AtlasStats::default(),
        }
    }

    /// Cells needed for a `width` x `height` mask, or `None` if the grid
    /// can never hold it.
    fn footprint(&self, width: u32, height: u32) -> Option<(u32, u32)> {
        if self.cell == 0 {
            return None;
        }
        let border = u32::from(self.config.border);
        let columns = width.div_ceil(self.cell).max(1) + border;
        let rows = height.div_ceil(self.cell).max(1) + border;
        (rows <= self.config.rows.min(32) && columns <= self.columns).then_some((columns, rows))
    }

    fn word(&self, column: u32, word: usize) -> usize {
        column as usize * self.words_per_column + word
    }

    /// First free `columns` x `rows` block, scanning column by column.
    #[expect(
        clippy::cast_possible_truncation,
        reason = "word indices are bounded by the row count"
    )]
    fn find_space(&self, columns: u32, rows: u32) -> Option<(u32, u32)> {
        let run = if rows >= 32 { u32::MAX } else { (1 << rows) - 1 };
        for column in 0..=self.columns.checked_sub(columns)? {
            for word in 0..self.words_per_column {
                let base = word as u32 * 32;
                let available = (self.config.rows - base).min(32);
                if rows > available {
                    continue;
                }
                for shift in 0..=available - rows {
                    let mask = run << shift;
                    let free = (column..column + columns)
                        .all(|c| self.map[self.word(c, word)] & mask == 0);
                    if free {
                        return Some((column, base + shift));
                    }
                }
            }
        }
        None
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "cell counts are bounded by the grid size"
    )]
    fn mark(&mut self, cells: Rect, reserved: bool) {
        let row = cells.y as u32;
        let run = if cells.height >= 32 {
            u32::MAX
        } else {
            (1 << cells.height) - 1
        };
        let mask = run << (row % 32);
        let word = (row / 32) as usize;
        for column in cells.x as u32..cells.right() as u32 {
            let index = self.word(column, word);
            if reserved {
                self.map[index] |= mask;
            } else {
                self.map[index] &= !mask;
            }
        }
        let count = cells.area() as usize;
        if reserved {
            self.free_cells -= count;
        } else {
            self.free_cells += count;
        }
    }

    fn bucket(&self, code: u32) -> usize {
        code as usize % self.buckets.len()
    }

    fn lookup(&self, font: u32, code: u32) -> Option<u32> {
        let mut cursor = self.buckets[self.bucket(code)].front();
        while let Some(index) = cursor {
            let glyph = self.glyphs.at(index);
            if glyph.font == font && glyph.code == code {
                return Some(index);
            }
            cursor = List::next(&self.glyphs, BUCKET, index);
        }
        None
    }

    fn insert(&mut self, glyph: Glyph) -> GlyphId {
        let bucket = self.bucket(glyph.code);
        self.mark(glyph.cells(), true);
        let key = self.glyphs.insert(glyph);
        self.lru.push_front(&mut self.glyphs, LRU, key.index);
        self.buckets[bucket].push_front(&mut self.glyphs, BUCKET, key.index);
        GlyphId(key)
    }

    fn remove(&mut self, key: Key) -> Option<Glyph> {
        let bucket = self.bucket(self.glyphs.get(key)?.code);
        self.lru.remove(&mut self.glyphs, LRU, key.index);
        self.buckets[bucket].remove(&mut self.glyphs, BUCKET, key.index);
        let glyph = self.glyphs.remove(key)?;
        self.mark(glyph.cells(), false);
        Some(glyph)
    }

    fn oldest_unused(&self) -> Option<Key> {
        let mut cursor = self.lru.back();
        while let Some(index) = cursor {
            let glyph = self.glyphs.at(index);
            if glyph.usage == 0 && !glyph.locked {
                return self.glyphs.key_at(index);
            }
            cursor = List::prev(&self.glyphs, LRU, index);
        }
        None
    }

    /// Pixel rectangle of a glyph's mask inside the atlas surface.
    fn pixel_rect(&self, glyph: &Glyph) -> Rect {
        let inset = if self.config.border { self.cell / 2 } else { 0 };
        Rect::new(
            (glyph.column * self.cell + inset) as i32,
            (glyph.row * self.cell + inset) as i32,
            glyph.width,
            glyph.height,
        )
    }

    /// No two glyphs share a cell, and the bitmap agrees with the glyphs.
    pub(crate) fn check_packing(&self) -> Result<(), &'static str> {
        let cells: Vec<Rect> = self.glyphs.iter().map(|(_, g)| g.cells()).collect();
        for (i, a) in cells.iter().enumerate() {
            if cells[i + 1..].iter().any(|b| a.overlaps(b)) {
                return Err("glyph cell rectangles overlap");
            }
        }
        let reserved: u64 = cells.iter().map(Rect::area).sum();
        let total = u64::from(self.columns) * u64::from(self.config.rows);
        if reserved + self.free_cells as u64 != total {
            return Err("atlas free-cell count is out of sync");
        }
        Ok(())
    }

    pub(crate) fn stats(&self) -> AtlasStats {
        AtlasStats {
            glyphs: self.glyphs.len(),
            free_cells: self.free_cells,
            ..self.stats
        }
    }
}

impl core::fmt::Debug for GlyphAtlas {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GlyphAtlas")
            .field("config", &self.config)
            .field("surface", &self.surface)
            .field("glyphs", &self.glyphs.len())
            .field("free_cells", &self.free_cells)
            .finish_non_exhaustive()
    }
}

impl<B: Backend, A: Allocator> Engine<B, A> {
    fn atlas(&self) -> Result<&GlyphAtlas, Error> {
        self.atlas.as_ref().ok_or(Error::new(ErrorKind::NoAtlas))
    }

    fn atlas_mut(&mut self) -> Result<&mut GlyphAtlas, Error> {
        self.atlas.as_mut().ok_or(Error::new(ErrorKind::NoAtlas))
    }

    /// The atlas surface, created on first use.
    ///
    /// It is pinned: never evicted, never negotiated and not charged to the
    /// cache budget.
    pub fn atlas_surface(&mut self) -> Result<SurfaceId, Error> {
        let atlas = self.atlas()?;
        if let Some(surface) = atlas.surface {
            return Ok(surface);
        }
        let (width, height) = (atlas.config.width, atlas.config.height);
        let surface = self.create(PixelFormat::Alpha8, width, height, None, 0, 0)?;
        let entry = self.surface_mut(surface)?;
        entry.pinned = true;
        entry.do_cache = true;
        let bytes = entry.byte_size;
        self.cached_bytes -= bytes;
        self.atlas_mut()?.surface = Some(surface);
        Ok(surface)
    }

    /// Reserves atlas space for a `width` x `height` mask and returns the
    /// glyph with one claim.
    ///
    /// Unused glyphs are evicted, oldest first, until the footprint fits.
    pub fn create_glyph(
        &mut self,
        width: u32,
        height: u32,
        font: u32,
        code: u32,
    ) -> Result<GlyphId, Error> {
        self.advance();
        let Some((columns, rows)) = self.atlas()?.footprint(width, height) else {
            log::error!("glyph {font}/{code} of {width}x{height} can never fit the atlas grid");
            return Err(Error::new(ErrorKind::GlyphTooLarge));
        };
        self.atlas_surface()?;
        let descriptor = self.charge(size_of::<Glyph>())?;
        let (column, row) = loop {
            if let Some(position) = self.atlas()?.find_space(columns, rows) {
                break position;
            }
            if !self.discard_oldest_unused_glyph() {
                self.allocator.free(descriptor);
                log::warn!("no room in the atlas for glyph {font}/{code}");
                return Err(Error::new(ErrorKind::OutOfMemory));
            }
        };
        let id = self.atlas_mut()?.insert(Glyph {
            font,
            code,
            width,
            height,
            column,
            row,
            columns,
            rows,
            usage: 1,
            locked: false,
            descriptor,
            lru: Links::default(),
            bucket: Links::default(),
        });
        Ok(id)
    }

    /// Looks up a glyph and takes a claim on it.
    pub fn find_glyph(&mut self, font: u32, code: u32) -> Option<GlyphId> {
        let atlas = self.atlas.as_mut()?;
        let Some(index) = atlas.lookup(font, code) else {
            atlas.stats.misses += 1;
            return None;
        };
        atlas.stats.hits += 1;
        atlas.lru.move_to_front(&mut atlas.glyphs, LRU, index);
        atlas.glyphs.at_mut(index).usage += 1;
        atlas.glyphs.key_at(index).map(GlyphId)
    }

    /// Drops one claim. The glyph stays cached until evicted or discarded.
    pub fn free_glyph(&mut self, glyph: GlyphId) -> Result<(), Error> {
        let entry = self
            .atlas_mut()?
            .glyphs
            .get_mut(glyph.0)
            .ok_or(Error::new(ErrorKind::StaleHandle))?;
        if entry.usage == 0 {
            log::error!("free of {glyph:?}, which has no claims");
            return Err(Error::new(ErrorKind::NotOwned));
        }
        entry.usage -= 1;
        Ok(())
    }

    /// Removes an unclaimed glyph and returns its cells to the atlas.
    pub fn discard_glyph(&mut self, glyph: GlyphId) -> Result<(), Error> {
        let atlas = self.atlas_mut()?;
        let entry = atlas
            .glyphs
            .get(glyph.0)
            .ok_or(Error::new(ErrorKind::StaleHandle))?;
        if entry.usage != 0 || entry.locked {
            return Err(Error::new(ErrorKind::GlyphInUse));
        }
        if let Some(removed) = atlas.remove(glyph.0) {
            self.allocator.free(removed.descriptor);
        }
        Ok(())
    }

    /// Evicts the least recently used glyph nobody holds.
    pub(crate) fn discard_oldest_unused_glyph(&mut self) -> bool {
        let Some(atlas) = self.atlas.as_mut() else {
            return false;
        };
        let Some(key) = atlas.oldest_unused() else {
            return false;
        };
        let Some(removed) = atlas.remove(key) else {
            return false;
        };
        atlas.stats.evictions += 1;
        log::debug!("evicted glyph {}/{}", removed.font, removed.code);
        self.allocator.free(removed.descriptor);
        true
    }

    /// Locks a glyph's mask inside the atlas surface.
    ///
    /// The atlas surface has a single lock, so only one glyph can be locked
    /// at a time.
    pub fn lock_glyph(&mut self, glyph: GlyphId, mode: LockMode) -> Result<SurfaceLock, Error> {
        let surface = self.atlas_surface()?;
        let atlas = self.atlas()?;
        let entry = atlas
            .glyphs
            .get(glyph.0)
            .ok_or(Error::new(ErrorKind::StaleHandle))?;
        if entry.locked {
            log::error!("{glyph:?} is already locked");
            return Err(Error::new(ErrorKind::AlreadyLocked));
        }
        let rect = atlas.pixel_rect(entry);
        let lock = self.lock(surface, rect, None, mode)?;
        if let Some(entry) = self.atlas_mut()?.glyphs.get_mut(glyph.0) {
            entry.locked = true;
        }
        Ok(lock)
    }

    /// Ends a lock taken by [`lock_glyph`](Self::lock_glyph).
    pub fn unlock_glyph(&mut self, glyph: GlyphId, lock: SurfaceLock) -> Result<(), Error> {
        let atlas = self.atlas()?;
        let locked = atlas
            .glyphs
            .get(glyph.0)
            .ok_or(Error::new(ErrorKind::StaleHandle))?
            .locked;
        let foreign = atlas.surface != Some(lock.surface());
        if !locked || foreign {
            log::error!("unlock of {glyph:?} with a lock it does not hold");
            // A grant on another surface is still released there; the glyph stays locked.
            if foreign {
                self.unlock(lock)?;
            }
            return Err(Error::new(ErrorKind::NotLocked));
        }
        self.unlock(lock)?;
        if let Some(entry) = self.atlas_mut()?.glyphs.get_mut(glyph.0) {
            entry.locked = false;
        }
        Ok(())
    }

    /// Draws a glyph's mask in `color` with its top-left at `(x, y)`.
    pub fn draw_glyph(
        &mut self,
        surface: SurfaceId,
        glyph: GlyphId,
        x: i32,
        y: i32,
        color: u32,
    ) -> Result<(), Error> {
        let atlas_surface = self.atlas_surface()?;
        let atlas = self.atlas()?;
        let entry = atlas
            .glyphs
            .get(glyph.0)
            .ok_or(Error::new(ErrorKind::StaleHandle))?;
        let mask = atlas.pixel_rect(entry);
        let rect = Rect::new(x, y, mask.width, mask.height);
        self.draw_mask(surface, rect, atlas_surface, (mask.x, mask.y), color)
    }

    /// Snapshot of a glyph, or `None` once it is gone.
    pub fn glyph_info(&self, glyph: GlyphId) -> Option<GlyphInfo> {
        let g = self.atlas.as_ref()?.glyphs.get(glyph.0)?;
        Some(GlyphInfo {
            font: g.font,
            code: g.code,
            width: g.width,
            height: g.height,
            column: g.column,
            row: g.row,
            columns: g.columns,
            rows: g.rows,
            usage: g.usage,
        })
    }

    /// Glyph atlas counters; all zero without an atlas.
    pub fn atlas_stats(&self) -> AtlasStats {
        self.atlas.as_ref().map(GlyphAtlas::stats).unwrap_or_default()
    }
}
