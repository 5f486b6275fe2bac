// Copyright 2026 the Stipple Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! This crate contains the integration test suite for `stipple`.
//!
//! - The `util` module contains the shared test environment, assertion helpers
//!   and scripted workers.
//! - We do not use the default Rust test harness, but instead use this `mod.rs` file as the
//!   entry point to run all other tests, so that the utilities are compiled once.
//! - Tests are grouped by topic: `cache` for surface ownership, reuse and eviction,
//!   `atlas` for glyph packing, and `pipeline` for issue scheduling and draw ordering.
//!   Put the topic at the start of a test's name, e.g. `cache_find_after_free`.

#![allow(missing_docs, reason = "we don't need docs for testing")]
#![allow(clippy::cast_possible_truncation, reason = "not critical for testing")]

mod pipeline;
mod util;
