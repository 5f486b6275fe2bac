// Copyright 2026 the Stipple Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Pixel formats understood by the cache.

/// Storage layout of a surface.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// The device's native 32-bit RGBA layout.
    Native,
    /// 8-bit coverage, used for glyphs and masks.
    Alpha8,
    /// 8-bit palette index with a 256-entry colour lookup table.
    Index8,
    /// 16-bit packed 5-6-5 colour.
    Rgb565,
    /// The physical framebuffer. It has no allocatable storage and cannot be cached.
    Framebuffer,
}

impl PixelFormat {
    /// Bytes occupied by one pixel.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Native | Self::Framebuffer => 4,
            Self::Rgb565 => 2,
            Self::Alpha8 | Self::Index8 => 1,
        }
    }

    /// Whether surfaces of this format can be allocated off-screen.
    pub const fn is_virtual(self) -> bool {
        matches!(self, Self::Framebuffer)
    }

    /// Number of colour lookup table entries carried by the format.
    pub const fn clut_len(self) -> usize {
        match self {
            Self::Index8 => 256,
            _ => 0,
        }
    }
}
