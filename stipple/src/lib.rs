// Copyright 2026 the Stipple Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Stipple is the resource core of a small 2D rendering engine: a surface
//! cache, a glyph atlas and a batched drawing pipeline, sitting between a
//! UI toolkit and a device-specific pixel [`Backend`].
//!
//! - The **surface cache** owns every pixel buffer. Surfaces are
//!   reference counted, found again by identity after they are freed, and
//!   evicted oldest first under a byte budget, asking their owners through
//!   a [`DiscardNegotiator`] before throwing away anything still held.
//! - The **glyph atlas** packs glyph coverage masks into the cells of one
//!   pinned surface, evicting unused glyphs when it runs out of room.
//! - The **pipeline** batches drawing into per-surface issues, optimises
//!   them, and runs at most one at a time, inline or on a [`Worker`].
//!
//! All memory for descriptors and issue arenas is charged to an
//! [`Allocator`]; when it or the backend runs dry the engine evicts,
//! negotiates and retries before reporting [`ErrorKind::OutOfMemory`].
//!
//! ```
//! use stipple::backend::software::SoftwareBackend;
//! use stipple::{Engine, EngineConfig, LockMode, PixelFormat, Rect};
//!
//! let mut engine = Engine::new(EngineConfig::default(), SoftwareBackend::unbounded());
//! let surface = engine.create(PixelFormat::Native, 4, 4, None, 1, 1)?;
//! engine.fill_rect(surface, Rect::from_size(4, 4), 0xff20_4060)?;
//!
//! // Locking drains the pipeline, so the fill has run by now.
//! let lock = engine.lock(surface, Rect::from_size(4, 4), None, LockMode::READ)?;
//! assert_eq!(engine.pixels(&lock).unwrap()[..4], 0xff20_4060_u32.to_le_bytes());
//! engine.unlock(lock)?;
//! engine.free(surface)?;
//! # Ok::<(), stipple::Error>(())
//! ```
//!
//! ## Features
//!
//! - `std` (enabled by default): Provides [`ThreadWorker`], which runs
//!   issues on spawned threads.

// LINEBENDER LINT SET - lib.rs - v3
// See https://linebender.org/wiki/canonical-lints/
// These lints shouldn't apply to examples or tests.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
// These lints shouldn't apply to examples.
#![warn(clippy::print_stdout, clippy::print_stderr)]
// Targeting e.g. 32-bit means structs containing usize can give false positives for 64-bit.
#![cfg_attr(target_pointer_width = "64", warn(clippy::trivially_copy_pass_by_ref))]
// END LINEBENDER LINT SET
#![cfg_attr(docsrs, feature(doc_cfg))]
#![no_std]

extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

mod allocator;
mod atlas;
mod cache;
mod config;
mod engine;
mod error;
mod format;
mod geometry;
mod optimize;
mod pipeline;
mod slab;
mod surface;
mod task;
mod worker;

pub mod backend;

pub use allocator::{Allocation, Allocator, BudgetAllocator};
pub use atlas::{AtlasStats, GlyphId, GlyphInfo};
pub use backend::{Access, Backend, LockInfo, LockMode, PixelHandle};
pub use cache::CacheStats;
pub use config::{AtlasConfig, EngineConfig};
pub use engine::Engine;
pub use error::{Error, ErrorKind};
pub use format::PixelFormat;
pub use geometry::Rect;
pub use pipeline::{IssueId, IssueState, Job, PipelineStats};
pub use surface::{
    DiscardNegotiator, NeverDiscard, OwnerId, SurfaceId, SurfaceInfo, SurfaceLock, Urgency,
};
pub use task::{DataRef, Task, TaskArena, TaskFlags, TaskKind, TaskRef, TASK_SIZE};
#[cfg(feature = "std")]
pub use worker::ThreadWorker;
pub use worker::Worker;
