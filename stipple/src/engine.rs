// Copyright 2026 the Stipple Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The engine: one owner for the surface cache, glyph atlas and pipeline.

use alloc::boxed::Box;

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::allocator::{Allocation, Allocator, BudgetAllocator};
use crate::atlas::{AtlasStats, GlyphAtlas};
use crate::backend::Backend;
use crate::cache::CacheStats;
use crate::config::EngineConfig;
use crate::error::{Error, ErrorKind};
use crate::pipeline::{Pipeline, PipelineStats};
use crate::slab::{List, Slab};
use crate::surface::{DiscardNegotiator, Identity, NeverDiscard, Surface, SurfaceId, Urgency};
use crate::worker::Worker;

/// Surface cache, glyph atlas and issue pipeline over one [`Backend`].
///
/// Every public operation first advances the pipeline, so queued drawing
/// makes progress whenever the engine is used. Nothing here is thread-safe;
/// only a [`Worker`] may run concurrently, on a job it has been handed.
pub struct Engine<B: Backend, A: Allocator = BudgetAllocator> {
    pub(crate) config: EngineConfig,
    pub(crate) backend: B,
    pub(crate) allocator: A,
    pub(crate) negotiator: Box<dyn DiscardNegotiator>,
    pub(crate) worker: Option<Box<dyn Worker>>,
    pub(crate) surfaces: Slab<Surface>,
    /// Most recently used first.
    pub(crate) lru: List,
    pub(crate) index: HashMap<Identity, SmallVec<[SurfaceId; 2]>>,
    /// Pixel bytes of budgeted surfaces.
    pub(crate) cached_bytes: usize,
    pub(crate) atlas: Option<GlyphAtlas>,
    pub(crate) pipeline: Pipeline,
    pub(crate) stats: CacheStats,
}

impl<B: Backend> Engine<B> {
    /// Creates an engine with an unbounded [`BudgetAllocator`] and a
    /// negotiator that refuses every discard.
    pub fn new(config: EngineConfig, backend: B) -> Self {
        Self {
            config,
            backend,
            allocator: BudgetAllocator::unbounded(),
            negotiator: Box::new(NeverDiscard),
            worker: None,
            surfaces: Slab::new(),
            lru: List::new(),
            index: HashMap::new(),
            cached_bytes: 0,
            atlas: config.atlas.map(GlyphAtlas::new),
            pipeline: Pipeline::default(),
            stats: CacheStats::default(),
        }
    }
}

impl<B: Backend, A: Allocator> Engine<B, A> {
    /// Replaces the allocator. Must be called before anything is allocated.
    pub fn with_allocator<T: Allocator>(self, allocator: T) -> Engine<B, T> {
        debug_assert!(
            self.surfaces.len() == 0 && self.pipeline.issues.len() == 0,
            "allocator swapped after allocations were made"
        );
        Engine {
            config: self.config,
            backend: self.backend,
            allocator,
            negotiator: self.negotiator,
            worker: self.worker,
            surfaces: self.surfaces,
            lru: self.lru,
            index: self.index,
            cached_bytes: self.cached_bytes,
            atlas: self.atlas,
            pipeline: self.pipeline,
            stats: self.stats,
        }
    }

    /// Installs the callback asked before idle surfaces are discarded.
    #[must_use]
    pub fn with_negotiator(mut self, negotiator: impl DiscardNegotiator + 'static) -> Self {
        self.negotiator = Box::new(negotiator);
        self
    }

    /// Hands execution of running issues to `worker` instead of running
    /// them inline on the backend.
    #[must_use]
    pub fn with_worker(mut self, worker: impl Worker + 'static) -> Self {
        self.worker = Some(Box::new(worker));
        self
    }

    /// The configuration the engine was created with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The pixel backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable access to the pixel backend.
    ///
    /// Stores the engine knows about must not be destroyed through it.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// The allocator descriptors and arenas are charged to.
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    pub(crate) fn surface(&self, surface: SurfaceId) -> Result<&Surface, Error> {
        self.surfaces
            .get(surface.0)
            .ok_or(Error::on(ErrorKind::StaleHandle, surface))
    }

    pub(crate) fn surface_mut(&mut self, surface: SurfaceId) -> Result<&mut Surface, Error> {
        self.surfaces
            .get_mut(surface.0)
            .ok_or(Error::on(ErrorKind::StaleHandle, surface))
    }

    /// Charges `size` bytes, reclaiming until it fits.
    pub(crate) fn charge(&mut self, size: usize) -> Result<Allocation, Error> {
        self.retry(|engine| engine.allocator.alloc(size))
    }

    /// Repeats `attempt` after each successful reclaim step until it
    /// succeeds or nothing is left to reclaim.
    pub(crate) fn retry<T>(
        &mut self,
        mut attempt: impl FnMut(&mut Self) -> Option<T>,
    ) -> Result<T, Error> {
        loop {
            if let Some(value) = attempt(self) {
                return Ok(value);
            }
            if !self.reclaim() {
                log::warn!("out of memory: every reclaim tier is exhausted");
                return Err(Error::new(ErrorKind::OutOfMemory));
            }
        }
    }

    /// Frees the cheapest thing available. Returns `false` when nothing could be freed.
    fn reclaim(&mut self) -> bool {
        if self.allocator.immediate_reclaim() {
            return true;
        }
        if self.advance() || self.discard_oldest_unused() || self.discard_oldest_unused_glyph() {
            return true;
        }
        if self.drop_ready_issue() || self.wait_for_worker() {
            return true;
        }
        Urgency::ALL
            .into_iter()
            .any(|urgency| self.negotiate_oldest(urgency))
    }

    /// Discards every unused surface, unused glyph and ready issue arena.
    pub fn purge(&mut self) {
        self.advance();
        while self.discard_oldest_unused() {}
        while self.discard_oldest_unused_glyph() {}
        self.purge_issues();
    }

    /// Resets the hit, miss and eviction counters.
    pub fn clear_stats(&mut self) {
        self.stats = CacheStats::default();
        if let Some(atlas) = &mut self.atlas {
            atlas.stats = AtlasStats::default();
        }
        let issues = self.pipeline.stats.issues;
        self.pipeline.stats = PipelineStats::default();
        self.pipeline.stats.issues = issues;
    }

    /// Verifies the structural invariants between public calls.
    ///
    /// Every surface has `owned <= used`, no two glyphs share atlas cells,
    /// and every issue is on exactly the list for its state with at most
    /// one running.
    pub fn check_invariants(&self) -> Result<(), &'static str> {
        if self.surfaces.iter().any(|(_, s)| s.owned > s.used) {
            return Err("surface owned count exceeds used count");
        }
        if self.surfaces.iter().any(|(_, s)| s.pending > s.used) {
            return Err("surface pending count exceeds used count");
        }
        if self.lru.len() != self.surfaces.len() {
            return Err("surface missing from the cache list");
        }
        let budgeted: usize = self
            .surfaces
            .iter()
            .filter(|(_, s)| s.is_budgeted())
            .map(|(_, s)| s.byte_size)
            .sum();
        if budgeted != self.cached_bytes {
            return Err("cached byte count is out of sync");
        }
        if let Some(atlas) = &self.atlas {
            atlas.check_packing()?;
        }
        self.pipeline.check_lists()
    }
}

impl<B: Backend, A: Allocator> core::fmt::Debug for Engine<B, A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("backend", &self.backend)
            .field("allocator", &self.allocator)
            .field("surfaces", &self.surfaces.len())
            .field("cached_bytes", &self.cached_bytes)
            .field("atlas", &self.atlas)
            .field("pipeline", &self.pipeline)
            .field("worker", &self.worker.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;
    use crate::format::PixelFormat;
    use crate::OwnerId;

    #[test]
    fn exhausted_allocator_reports_out_of_memory() {
        let config = EngineConfig {
            atlas: None,
            ..EngineConfig::default()
        };
        let mut engine = Engine::new(config, SoftwareBackend::unbounded())
            .with_allocator(BudgetAllocator::new(size_of::<Surface>()));
        let a = engine.create(PixelFormat::Native, 4, 4, None, 1, 1).unwrap();
        let err = engine
            .create(PixelFormat::Native, 4, 4, None, 1, 2)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);
        // Freeing leaves `a` cached but unused, so the reclaim tiers can take it.
        engine.free(a).unwrap();
        let b = engine.create(PixelFormat::Native, 4, 4, None, 1, 2).unwrap();
        assert!(engine.info(a).is_none());
        assert!(engine.info(b).is_some());
        assert_eq!(engine.allocator().in_use(), size_of::<Surface>());
    }

    #[test]
    fn backend_exhaustion_negotiates_with_owners() {
        let config = EngineConfig {
            atlas: None,
            ..EngineConfig::default()
        };
        // Room for exactly one 4x4 native store.
        let mut engine = Engine::new(config, SoftwareBackend::new(64))
            .with_negotiator(|_: SurfaceId, owner: OwnerId, urgency: Urgency| {
                owner == OwnerId(1) && urgency == Urgency::High
            });
        let a = engine
            .create(PixelFormat::Native, 4, 4, Some(OwnerId(1)), 1, 1)
            .unwrap();
        let b = engine
            .create(PixelFormat::Native, 4, 4, Some(OwnerId(2)), 1, 2)
            .unwrap();
        assert!(engine.info(a).is_none());
        let err = engine
            .create(PixelFormat::Native, 4, 4, Some(OwnerId(3)), 1, 3)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);
        assert!(engine.info(b).is_some());
        assert_eq!(engine.cache_stats().negotiated_discards, 1);
        engine.check_invariants().unwrap();
    }

    #[test]
    fn purge_and_clear_stats() {
        let mut engine = Engine::new(EngineConfig::default(), SoftwareBackend::unbounded());
        let s = engine.create(PixelFormat::Native, 4, 4, None, 1, 1).unwrap();
        let g = engine.create_glyph(8, 8, 0, 7).unwrap();
        engine.fill_rect(s, crate::Rect::from_size(4, 4), 0xffff_ffff).unwrap();
        engine.free(s).unwrap();
        engine.free_glyph(g).unwrap();
        assert!(engine.find(PixelFormat::Native, 4, 4, None, 9, 9).is_none());
        engine.purge();
        assert!(engine.info(s).is_none());
        assert!(engine.glyph_info(g).is_none());
        assert_eq!(engine.pipeline_stats().issues, 0);
        // The pinned atlas survives.
        assert_eq!(engine.cache_stats().surfaces, 1);
        engine.clear_stats();
        assert_eq!(engine.cache_stats().find_misses, 0);
        assert_eq!(engine.atlas_stats().evictions, 0);
        engine.check_invariants().unwrap();
    }
}
