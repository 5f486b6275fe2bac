// Copyright 2026 the Stipple Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A ready-made engine over the software backend.

use std::cell::RefCell;
use std::rc::Rc;

use stipple::backend::software::SoftwareBackend;
use stipple::{AtlasConfig, Engine, EngineConfig, OwnerId, PixelFormat, SurfaceId, Urgency};

/// Bytes of one `SURFACE_EDGE` square `Alpha8` surface.
pub(crate) const SURFACE_BYTES: usize = 64;
pub(crate) const SURFACE_EDGE: u32 = 8;

pub(crate) struct TestEnv {
    pub(crate) engine: Engine<SoftwareBackend>,
    /// Every discard the negotiator agreed to, in order.
    pub(crate) consents: Rc<RefCell<Vec<(SurfaceId, Urgency)>>>,
}

impl TestEnv {
    /// An engine with no atlas whose negotiator agrees to every discard.
    pub(crate) fn new(cache_budget: usize) -> Self {
        Self::with_config(EngineConfig {
            cache_budget,
            atlas: None,
            ..EngineConfig::default()
        })
    }

    /// An engine with a glyph atlas of the given grid.
    pub(crate) fn with_atlas(atlas: AtlasConfig) -> Self {
        Self::with_config(EngineConfig {
            atlas: Some(atlas),
            ..EngineConfig::default()
        })
    }

    pub(crate) fn with_config(config: EngineConfig) -> Self {
        let consents = Rc::new(RefCell::new(Vec::new()));
        let record = Rc::clone(&consents);
        let engine = Engine::new(config, SoftwareBackend::unbounded()).with_negotiator(
            move |surface: SurfaceId, _: OwnerId, urgency: Urgency| {
                record.borrow_mut().push((surface, urgency));
                true
            },
        );
        Self { engine, consents }
    }

    /// Creates a tagged `Alpha8` test surface held by `owner`.
    pub(crate) fn surface(&mut self, owner: u32, tag: u32) -> SurfaceId {
        self.engine
            .create(
                PixelFormat::Alpha8,
                SURFACE_EDGE,
                SURFACE_EDGE,
                Some(OwnerId(owner)),
                1,
                tag,
            )
            .unwrap()
    }

    /// Surfaces the negotiator agreed to discard, oldest consent first.
    pub(crate) fn discarded(&self) -> Vec<SurfaceId> {
        self.consents.borrow().iter().map(|(s, _)| *s).collect()
    }
}
