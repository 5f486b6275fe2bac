// Copyright 2026 the Stipple Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Utility functions and types shared across tests.

mod asserts;
pub(crate) mod env;
mod workers;

pub(crate) use asserts::{assert_glyphs_disjoint, assert_invariants};
pub(crate) use env::TestEnv;
pub(crate) use workers::ManualWorker;
