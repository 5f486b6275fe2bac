// Copyright 2026 the Stipple Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Engine and atlas configuration.

/// Tunables for an [`Engine`](crate::Engine).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Byte budget for evictable surface pixel memory.
    ///
    /// Constant surfaces and the glyph atlas do not count against it.
    pub cache_budget: usize,
    /// Size in bytes of each issue's task arena.
    pub issue_arena_size: usize,
    /// Hard cap on tasks per issue; `close` flushes once it is reached.
    pub max_tasks_per_issue: usize,
    /// Glyph atlas layout, or `None` to run without glyph caching.
    pub atlas: Option<AtlasConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_budget: 256 * 1024,
            issue_arena_size: 4096,
            max_tasks_per_issue: 64,
            atlas: Some(AtlasConfig::default()),
        }
    }
}

/// Layout of the glyph atlas surface.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AtlasConfig {
    /// Atlas width in pixels.
    pub width: u32,
    /// Atlas height in pixels.
    pub height: u32,
    /// Number of cell rows; the cell edge is `ceil(height / rows)`.
    pub rows: u32,
    /// Reserve one extra cell on each axis for antialiased glyph edges.
    pub border: bool,
}

impl AtlasConfig {
    /// Edge length of one square cell in pixels.
    pub const fn cell_size(&self) -> u32 {
        if self.rows == 0 {
            return self.height;
        }
        self.height.div_ceil(self.rows)
    }

    /// Number of cell columns.
    pub const fn columns(&self) -> u32 {
        let cell = self.cell_size();
        if cell == 0 {
            return 0;
        }
        self.width / cell
    }

    /// Number of glyph hash buckets, derived from the atlas area.
    pub const fn bucket_count(&self) -> usize {
        let cells = self.columns() as usize * self.rows as usize;
        if cells < 4 { 1 } else { cells / 4 }
    }
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
            rows: 16,
            border: false,
        }
    }
}
