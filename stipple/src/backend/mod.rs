// Copyright 2026 the Stipple Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The pixel backend contract.
//!
//! A [`Backend`] owns the actual pixel memory. The engine only ever holds a
//! [`PixelHandle`] and asks the backend to size, create, lock, execute
//! against and destroy stores.

use core::fmt::Debug;
use core::ops::Range;

use crate::format::PixelFormat;
use crate::geometry::Rect;
use crate::pipeline::Job;
use crate::task::TaskKind;

pub mod software;

/// Opaque reference to a backend pixel store.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PixelHandle(pub u32);

/// Requested pixel access.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Access {
    /// Pixels will only be read.
    Read,
    /// Pixels will only be written.
    Write,
    /// Pixels will be read and written.
    ReadWrite,
}

impl Access {
    /// Whether the access mutates pixels.
    pub const fn writes(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// How a surface lock is acquired.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LockMode {
    /// Requested access.
    pub access: Access,
    /// Drain the pipeline until the access is hazard-free before locking.
    pub wait: bool,
}

impl LockMode {
    /// Waiting read access.
    pub const READ: Self = Self {
        access: Access::Read,
        wait: true,
    };
    /// Waiting write access.
    pub const WRITE: Self = Self {
        access: Access::Write,
        wait: true,
    };
    /// Waiting read-write access.
    pub const READ_WRITE: Self = Self {
        access: Access::ReadWrite,
        wait: true,
    };

    /// Same access without draining the pipeline first.
    #[must_use]
    pub const fn no_wait(self) -> Self {
        Self {
            access: self.access,
            wait: false,
        }
    }
}

/// Geometry granted by [`Backend::lock`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockInfo {
    /// Bytes between the starts of consecutive rows.
    pub pitch: usize,
    /// Byte offset of the locked rectangle's top-left pixel.
    pub offset: usize,
    /// Colour lookup table entries made accessible, for indexed formats.
    pub clut: Option<Range<usize>>,
}

/// Per-device pixel storage and execution.
pub trait Backend: Debug {
    /// Rounds a requested size to the backend's native granularity.
    fn adjust_size(&self, format: PixelFormat, width: u32, height: u32) -> (u32, u32) {
        let _ = format;
        (width, height)
    }

    /// Bytes of pixel memory a store of this size occupies, saturating at
    /// `usize::MAX` when the size cannot be represented.
    fn memory_size(&self, format: PixelFormat, width: u32, height: u32) -> usize;

    /// Allocates a store, or returns `None` if pixel memory is exhausted.
    fn create(&mut self, format: PixelFormat, width: u32, height: u32) -> Option<PixelHandle>;

    /// Wraps externally owned (for example ROM) pixels.
    fn create_const(
        &mut self,
        format: PixelFormat,
        width: u32,
        height: u32,
        pixels: &'static [u8],
    ) -> Option<PixelHandle>;

    /// Releases a store.
    fn destroy(&mut self, handle: PixelHandle);

    /// Grants direct access to `rect`, or refuses (e.g. writes to constant memory).
    fn lock(
        &mut self,
        handle: PixelHandle,
        rect: Rect,
        clut: Option<Range<usize>>,
        access: Access,
    ) -> Option<LockInfo>;

    /// Ends access granted by [`lock`](Self::lock).
    fn unlock(&mut self, handle: PixelHandle, info: &LockInfo);

    /// Raw bytes of a store.
    fn pixels(&self, handle: PixelHandle) -> Option<&[u8]>;

    /// Mutable raw bytes of a store; `None` for constant stores.
    fn pixels_mut(&mut self, handle: PixelHandle) -> Option<&mut [u8]>;

    /// Colour lookup table of an indexed store.
    fn clut_mut(&mut self, handle: PixelHandle) -> Option<&mut [u32]> {
        let _ = handle;
        None
    }

    /// Runs every task of a job, in execution order, to completion.
    fn execute(&mut self, job: &Job);

    /// Whether `kind` has no native path and must be emulated in software.
    fn is_emulated(&self, kind: TaskKind) -> bool {
        matches!(kind, TaskKind::Warp)
    }
}
