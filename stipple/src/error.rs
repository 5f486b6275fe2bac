// Copyright 2026 the Stipple Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use crate::SurfaceId;

/// Error returned by fallible cache and pipeline operations.
///
/// Carries a non-exhaustive [`ErrorKind`] and, when the failure concerns a
/// particular surface, the surface it was reported against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    surface: Option<SurfaceId>,
}

impl Error {
    /// The machine-readable category for this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The surface the error concerns, if any.
    pub fn surface(&self) -> Option<SurfaceId> {
        self.surface
    }

    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            surface: None,
        }
    }

    pub(crate) fn on(kind: ErrorKind, surface: SurfaceId) -> Self {
        Self {
            kind,
            surface: Some(surface),
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let what = match self.kind {
            ErrorKind::OutOfMemory => "out of memory after evict-and-retry",
            ErrorKind::VirtualFormat => "format has no allocatable storage",
            ErrorKind::StaleHandle => "handle refers to a discarded object",
            ErrorKind::NotOwned => "surface has no outstanding owner claim",
            ErrorKind::AlreadyLocked => "already locked",
            ErrorKind::NotLocked => "not locked",
            ErrorKind::LockRefused => "backend refused the lock",
            ErrorKind::ConstSurface => "surface is backed by constant memory",
            ErrorKind::GlyphTooLarge => "glyph footprint exceeds the atlas grid",
            ErrorKind::GlyphInUse => "glyph is still in use",
            ErrorKind::NoAtlas => "no glyph atlas is configured",
        };
        match self.surface {
            Some(surface) => write!(f, "{surface:?}: {what}"),
            None => f.write_str(what),
        }
    }
}

impl core::error::Error for Error {}

/// The non-exhaustive category of an error.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The allocator or backend stayed exhausted after every reclaim tier.
    OutOfMemory,

    /// The requested format is virtual (for example the physical framebuffer).
    VirtualFormat,

    /// The id refers to a surface, glyph or issue that no longer exists.
    StaleHandle,

    /// `free` was called on a surface with no owner claims left.
    NotOwned,

    /// A lock was requested on a surface or glyph that is already locked.
    AlreadyLocked,

    /// `unlock` was called without a matching lock.
    NotLocked,

    /// The backend rejected the lock, e.g. write access to constant memory.
    LockRefused,

    /// Drawing into a surface whose pixels are externally owned.
    ConstSurface,

    /// The glyph needs more rows or columns than the atlas grid has.
    GlyphTooLarge,

    /// The glyph cannot be discarded while its usage count is non-zero.
    GlyphInUse,

    /// Glyph operations were used on an engine without an atlas.
    NoAtlas,
}
