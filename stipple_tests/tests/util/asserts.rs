// Copyright 2026 the Stipple Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Various helper functions to assert truths during testing.

use stipple::backend::software::SoftwareBackend;
use stipple::{Engine, GlyphId, GlyphInfo};

/// Assert that the engine's structural invariants hold.
pub(crate) fn assert_invariants(engine: &Engine<SoftwareBackend>, case: &str) {
    if let Err(violation) = engine.check_invariants() {
        panic!("invariant violated after {case}: {violation}");
    }
}

/// Assert that no two live glyphs reserve a common atlas cell.
pub(crate) fn assert_glyphs_disjoint(engine: &Engine<SoftwareBackend>, glyphs: &[GlyphId]) {
    let live: Vec<GlyphInfo> = glyphs
        .iter()
        .filter_map(|glyph| engine.glyph_info(*glyph))
        .collect();
    for (i, a) in live.iter().enumerate() {
        for b in &live[i + 1..] {
            let apart = a.column + a.columns <= b.column
                || b.column + b.columns <= a.column
                || a.row + a.rows <= b.row
                || b.row + b.rows <= a.row;
            assert!(apart, "glyphs {a:?} and {b:?} share cells");
        }
    }
}
