// Copyright 2026 the Stipple Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Reference backend keeping every store in main memory.
//!
//! Each pixel format gets its own [`FormatDriver`]; the backend dispatches
//! through the [`Driver`] enum picked once per store at creation time.

#![allow(
    clippy::cast_possible_truncation,
    reason = "pixel channels are masked to their width before narrowing"
)]

use alloc::vec;
use alloc::vec::Vec;
use core::ops::Range;

use super::{Access, Backend, LockInfo, PixelHandle};
use crate::format::PixelFormat;
use crate::geometry::Rect;
use crate::pipeline::Job;
use crate::task::{Task, TaskKind};

/// Per-format pixel encoding.
pub trait FormatDriver {
    /// Rounds a requested size to the format's granularity.
    fn adjust_size(&self, width: u32, height: u32) -> (u32, u32) {
        (width, height)
    }

    /// Bytes per row for `width` pixels.
    fn pitch(&self, width: u32) -> usize;

    /// Encodes a packed `0xAARRGGBB` colour into one pixel.
    fn store(&self, pixel: &mut [u8], argb: u32);

    /// Decodes one pixel to packed `0xAARRGGBB`.
    fn load(&self, pixel: &[u8], clut: &[u32]) -> u32;
}

/// Native 32-bit ARGB, stored little-endian.
#[derive(Copy, Clone, Debug, Default)]
pub struct NativeDriver;

impl FormatDriver for NativeDriver {
    fn pitch(&self, width: u32) -> usize {
        (width as usize).saturating_mul(4)
    }

    fn store(&self, pixel: &mut [u8], argb: u32) {
        pixel.copy_from_slice(&argb.to_le_bytes());
    }

    fn load(&self, pixel: &[u8], _clut: &[u32]) -> u32 {
        u32::from_le_bytes([pixel[0], pixel[1], pixel[2], pixel[3]])
    }
}

/// 8-bit coverage.
#[derive(Copy, Clone, Debug, Default)]
pub struct Alpha8Driver;

impl FormatDriver for Alpha8Driver {
    fn pitch(&self, width: u32) -> usize {
        width as usize
    }

    fn store(&self, pixel: &mut [u8], argb: u32) {
        pixel[0] = (argb >> 24) as u8;
    }

    fn load(&self, pixel: &[u8], _clut: &[u32]) -> u32 {
        u32::from(pixel[0]) << 24 | 0x00ff_ffff
    }
}

/// 8-bit palette index. Stores take the low byte of the colour as the index.
#[derive(Copy, Clone, Debug, Default)]
pub struct Index8Driver;

impl FormatDriver for Index8Driver {
    fn pitch(&self, width: u32) -> usize {
        width as usize
    }

    fn store(&self, pixel: &mut [u8], argb: u32) {
        pixel[0] = argb as u8;
    }

    fn load(&self, pixel: &[u8], clut: &[u32]) -> u32 {
        clut.get(usize::from(pixel[0])).copied().unwrap_or(0)
    }
}

/// Packed 5-6-5 colour; widths are padded to an even pixel count.
#[derive(Copy, Clone, Debug, Default)]
pub struct Rgb565Driver;

impl FormatDriver for Rgb565Driver {
    fn adjust_size(&self, width: u32, height: u32) -> (u32, u32) {
        (width.next_multiple_of(2), height)
    }

    fn pitch(&self, width: u32) -> usize {
        (width as usize).saturating_mul(2)
    }

    fn store(&self, pixel: &mut [u8], argb: u32) {
        let r = (argb >> 19) & 0x1f;
        let g = (argb >> 10) & 0x3f;
        let b = (argb >> 3) & 0x1f;
        let packed = (r << 11 | g << 5 | b) as u16;
        pixel.copy_from_slice(&packed.to_le_bytes());
    }

    fn load(&self, pixel: &[u8], _clut: &[u32]) -> u32 {
        let packed = u32::from(u16::from_le_bytes([pixel[0], pixel[1]]));
        let r = (packed >> 11) & 0x1f;
        let g = (packed >> 5) & 0x3f;
        let b = packed & 0x1f;
        0xff00_0000 | (r << 3 | r >> 2) << 16 | (g << 2 | g >> 4) << 8 | (b << 3 | b >> 2)
    }
}

/// Enum dispatch over the per-format drivers.
#[derive(Copy, Clone, Debug)]
pub enum Driver {
    /// See [`NativeDriver`].
    Native(NativeDriver),
    /// See [`Alpha8Driver`].
    Alpha8(Alpha8Driver),
    /// See [`Index8Driver`].
    Index8(Index8Driver),
    /// See [`Rgb565Driver`].
    Rgb565(Rgb565Driver),
}

impl Driver {
    /// Picks the driver for an allocatable format.
    pub fn for_format(format: PixelFormat) -> Option<Self> {
        Some(match format {
            PixelFormat::Native => Self::Native(NativeDriver),
            PixelFormat::Alpha8 => Self::Alpha8(Alpha8Driver),
            PixelFormat::Index8 => Self::Index8(Index8Driver),
            PixelFormat::Rgb565 => Self::Rgb565(Rgb565Driver),
            PixelFormat::Framebuffer => return None,
        })
    }

    fn get(&self) -> &dyn FormatDriver {
        match self {
            Self::Native(d) => d,
            Self::Alpha8(d) => d,
            Self::Index8(d) => d,
            Self::Rgb565(d) => d,
        }
    }
}

#[derive(Debug)]
enum Storage {
    Owned(Vec<u8>),
    Const(&'static [u8]),
}

#[derive(Debug)]
struct Store {
    format: PixelFormat,
    driver: Driver,
    width: u32,
    height: u32,
    pitch: usize,
    storage: Storage,
    clut: Vec<u32>,
    lock: Option<Access>,
}

impl Store {
    fn bytes(&self) -> &[u8] {
        match &self.storage {
            Storage::Owned(bytes) => bytes,
            Storage::Const(bytes) => bytes,
        }
    }

    fn bounds(&self) -> Rect {
        Rect::from_size(self.width, self.height)
    }

    fn index(&self, x: i32, y: i32) -> usize {
        y as usize * self.pitch + x as usize * self.format.bytes_per_pixel()
    }

    /// Loads the pixel at `(x, y)` if it lies inside the store.
    fn sample(&self, x: i64, y: i64) -> Option<u32> {
        let (x, y) = (i32::try_from(x).ok()?, i32::try_from(y).ok()?);
        self.bounds()
            .contains(&Rect::new(x, y, 1, 1))
            .then(|| self.load(x, y))
    }

    fn load(&self, x: i32, y: i32) -> u32 {
        let i = self.index(x, y);
        let bpp = self.format.bytes_per_pixel();
        self.driver.get().load(&self.bytes()[i..i + bpp], &self.clut)
    }

    fn store(&mut self, x: i32, y: i32, argb: u32) {
        let i = self.index(x, y);
        let bpp = self.format.bytes_per_pixel();
        let driver = self.driver;
        if let Storage::Owned(bytes) = &mut self.storage {
            driver.get().store(&mut bytes[i..i + bpp], argb);
        }
    }
}

/// A record of one executed task, for inspection in tests and tooling.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Executed {
    /// Destination store.
    pub target: PixelHandle,
    /// Operation performed.
    pub kind: TaskKind,
    /// Source store, if the task read one.
    pub source: Option<PixelHandle>,
    /// Destination rectangle as recorded in the task.
    pub rect: Rect,
}

/// In-memory [`Backend`] with an optional byte capacity.
#[derive(Debug)]
pub struct SoftwareBackend {
    stores: Vec<Option<Store>>,
    capacity: usize,
    in_use: usize,
    executed: Vec<Executed>,
}

impl SoftwareBackend {
    /// Creates a backend that may hold at most `capacity` bytes of owned pixels.
    pub fn new(capacity: usize) -> Self {
        Self {
            stores: Vec::new(),
            capacity,
            in_use: 0,
            executed: Vec::new(),
        }
    }

    /// Creates a backend without a capacity limit.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    /// Bytes of owned pixel memory currently allocated.
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Number of live stores.
    pub fn live_stores(&self) -> usize {
        self.stores.iter().filter(|s| s.is_some()).count()
    }

    /// Tasks executed so far, oldest first.
    pub fn executed(&self) -> &[Executed] {
        &self.executed
    }

    /// Takes the execution log, leaving it empty.
    pub fn take_executed(&mut self) -> Vec<Executed> {
        core::mem::take(&mut self.executed)
    }

    /// Reads one pixel as packed `0xAARRGGBB`.
    pub fn pixel(&self, handle: PixelHandle, x: i32, y: i32) -> Option<u32> {
        let store = self.store(handle)?;
        store
            .bounds()
            .contains(&Rect::new(x, y, 1, 1))
            .then(|| store.load(x, y))
    }

    fn store(&self, handle: PixelHandle) -> Option<&Store> {
        self.stores.get(handle.0 as usize)?.as_ref()
    }

    fn store_mut(&mut self, handle: PixelHandle) -> Option<&mut Store> {
        self.stores.get_mut(handle.0 as usize)?.as_mut()
    }

    fn insert(&mut self, store: Store) -> PixelHandle {
        if let Some(free) = self.stores.iter().position(Option::is_none) {
            self.stores[free] = Some(store);
            PixelHandle(free as u32)
        } else {
            self.stores.push(Some(store));
            PixelHandle(self.stores.len() as u32 - 1)
        }
    }

    fn run_task(&mut self, target: PixelHandle, task: &Task, job: &Job) {
        let Some(bounds) = self.store(target).map(Store::bounds) else {
            return;
        };
        let source = task.source();
        let kind = task.kind();
        self.executed.push(Executed {
            target,
            kind,
            source: source.map(|(handle, _, _)| handle),
            rect: task.rect(),
        });
        let Some(clip) = task.rect().intersect(&bounds) else {
            return;
        };

        // Sample the source first so a surface may be copied onto itself.
        let sampled: Vec<Option<u32>> = match (kind, source) {
            (TaskKind::Copy | TaskKind::CopyBlend | TaskKind::Glyph, Some((src, sx, sy))) => {
                let Some(src) = self.store(src) else {
                    return;
                };
                let dx = i64::from(sx) - i64::from(task.rect().x);
                let dy = i64::from(sy) - i64::from(task.rect().y);
                sample_rows(clip, |x, y| {
                    src.sample(i64::from(x) + dx, i64::from(y) + dy)
                })
            }
            (TaskKind::Warp, Some((src, sx, sy))) => {
                let Some(src) = self.store(src) else {
                    return;
                };
                let (sw, sh) = warp_source_size(task, job);
                let rect = task.rect();
                sample_rows(clip, |x, y| {
                    let u = u64::from(x.abs_diff(rect.x)) * u64::from(sw) / u64::from(rect.width.max(1));
                    let v = u64::from(y.abs_diff(rect.y)) * u64::from(sh) / u64::from(rect.height.max(1));
                    let (u, v) = (i64::try_from(u).ok()?, i64::try_from(v).ok()?);
                    src.sample(i64::from(sx) + u, i64::from(sy) + v)
                })
            }
            _ => Vec::new(),
        };

        let Some(dst) = self.store_mut(target) else {
            return;
        };
        let color = task.color();
        let mut i = 0;
        for y in clip.y..clip.bottom() {
            for x in clip.x..clip.right() {
                let out = match kind {
                    TaskKind::Fill => Some(color),
                    TaskKind::Blend => Some(blend(dst.load(x, y), color, 0xff)),
                    TaskKind::Copy | TaskKind::Warp => sampled.get(i).copied().flatten(),
                    TaskKind::CopyBlend => sampled
                        .get(i)
                        .copied()
                        .flatten()
                        .map(|s| blend(dst.load(x, y), s, 0xff)),
                    TaskKind::Glyph => sampled
                        .get(i)
                        .copied()
                        .flatten()
                        .map(|s| blend(dst.load(x, y), color, (s >> 24) as u8)),
                };
                // Source pixels outside the source store leave the destination untouched.
                if let Some(out) = out {
                    dst.store(x, y, out);
                }
                i += 1;
            }
        }
    }
}

/// Bytes of pixel data for a `width` x `height` store, or `None` on overflow.
fn store_len(driver: Driver, width: u32, height: u32) -> Option<usize> {
    driver.get().pitch(width).checked_mul(height as usize)
}

fn sample_rows(
    clip: Rect,
    mut sample: impl FnMut(i32, i32) -> Option<u32>,
) -> Vec<Option<u32>> {
    let mut out = Vec::with_capacity(clip.area() as usize);
    for y in clip.y..clip.bottom() {
        for x in clip.x..clip.right() {
            out.push(sample(x, y));
        }
    }
    out
}

/// Source extent of a warp, stored as two little-endian `u32`s in the task data.
fn warp_source_size(task: &Task, job: &Job) -> (u32, u32) {
    let rect = task.rect();
    let Some(data) = task.data() else {
        return (rect.width, rect.height);
    };
    let bytes = job.arena().data(data);
    if bytes.len() < 8 {
        return (rect.width, rect.height);
    }
    (
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
    )
}

/// Source-over composition of `src` onto `dst`, scaled by `coverage`.
fn blend(dst: u32, src: u32, coverage: u8) -> u32 {
    let alpha = (src >> 24) * u32::from(coverage) / 255;
    if alpha == 0 {
        return dst;
    }
    let inv = 255 - alpha;
    let channel = |shift: u32| {
        let s = (src >> shift) & 0xff;
        let d = (dst >> shift) & 0xff;
        ((s * alpha + d * inv) / 255) << shift
    };
    let out_alpha = alpha + ((dst >> 24) * inv) / 255;
    out_alpha << 24 | channel(16) | channel(8) | channel(0)
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl Backend for SoftwareBackend {
    fn adjust_size(&self, format: PixelFormat, width: u32, height: u32) -> (u32, u32) {
        match Driver::for_format(format) {
            Some(driver) => driver.get().adjust_size(width, height),
            None => (width, height),
        }
    }

    fn memory_size(&self, format: PixelFormat, width: u32, height: u32) -> usize {
        match Driver::for_format(format) {
            Some(driver) => store_len(driver, width, height)
                .and_then(|len| len.checked_add(format.clut_len() * 4))
                .unwrap_or(usize::MAX),
            None => 0,
        }
    }

    fn create(&mut self, format: PixelFormat, width: u32, height: u32) -> Option<PixelHandle> {
        let driver = Driver::for_format(format)?;
        let len = store_len(driver, width, height)?;
        let size = len.checked_add(format.clut_len() * 4)?;
        let in_use = self.in_use.checked_add(size)?;
        if in_use > self.capacity {
            return None;
        }
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(len).ok()?;
        bytes.resize(len, 0);
        self.in_use = in_use;
        Some(self.insert(Store {
            format,
            driver,
            width,
            height,
            pitch: driver.get().pitch(width),
            storage: Storage::Owned(bytes),
            clut: vec![0; format.clut_len()],
            lock: None,
        }))
    }

    fn create_const(
        &mut self,
        format: PixelFormat,
        width: u32,
        height: u32,
        pixels: &'static [u8],
    ) -> Option<PixelHandle> {
        let driver = Driver::for_format(format)?;
        let pitch = driver.get().pitch(width);
        if pixels.len() < store_len(driver, width, height)? {
            return None;
        }
        Some(self.insert(Store {
            format,
            driver,
            width,
            height,
            pitch,
            storage: Storage::Const(pixels),
            clut: vec![0; format.clut_len()],
            lock: None,
        }))
    }

    fn destroy(&mut self, handle: PixelHandle) {
        let Some(slot) = self.stores.get_mut(handle.0 as usize) else {
            return;
        };
        if let Some(store) = slot.take() {
            if let Storage::Owned(_) = store.storage {
                self.in_use -= self.memory_size(store.format, store.width, store.height);
            }
        }
    }

    fn lock(
        &mut self,
        handle: PixelHandle,
        rect: Rect,
        clut: Option<Range<usize>>,
        access: Access,
    ) -> Option<LockInfo> {
        let store = self.store_mut(handle)?;
        if store.lock.is_some() || !store.bounds().contains(&rect) {
            return None;
        }
        if access.writes() && matches!(store.storage, Storage::Const(_)) {
            return None;
        }
        let clut = match clut {
            Some(range) if range.end <= store.clut.len() && range.start <= range.end => Some(range),
            Some(_) => return None,
            None => None,
        };
        store.lock = Some(access);
        Some(LockInfo {
            pitch: store.pitch,
            offset: store.index(rect.x, rect.y),
            clut,
        })
    }

    fn unlock(&mut self, handle: PixelHandle, _info: &LockInfo) {
        if let Some(store) = self.store_mut(handle) {
            store.lock = None;
        }
    }

    fn pixels(&self, handle: PixelHandle) -> Option<&[u8]> {
        Some(self.store(handle)?.bytes())
    }

    fn pixels_mut(&mut self, handle: PixelHandle) -> Option<&mut [u8]> {
        match &mut self.store_mut(handle)?.storage {
            Storage::Owned(bytes) => Some(bytes),
            Storage::Const(_) => None,
        }
    }

    fn clut_mut(&mut self, handle: PixelHandle) -> Option<&mut [u32]> {
        let store = self.store_mut(handle)?;
        (!store.clut.is_empty()).then_some(store.clut.as_mut_slice())
    }

    fn execute(&mut self, job: &Job) {
        for task in job.tasks() {
            self.run_task(job.target(), task, job);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb565_round_trips_primaries() {
        let driver = Rgb565Driver;
        let mut px = [0_u8; 2];
        for color in [0xffff_0000, 0xff00_ff00, 0xff00_00ff, 0xffff_ffff] {
            driver.store(&mut px, color);
            assert_eq!(driver.load(&px, &[]), color);
        }
        assert_eq!(driver.adjust_size(3, 5), (4, 5));
    }

    #[test]
    fn capacity_limits_creation() {
        let mut backend = SoftwareBackend::new(64);
        let a = backend.create(PixelFormat::Native, 4, 4).unwrap();
        assert!(backend.create(PixelFormat::Alpha8, 1, 1).is_none());
        backend.destroy(a);
        assert_eq!(backend.in_use(), 0);
        assert!(backend.create(PixelFormat::Alpha8, 8, 8).is_some());
        assert!(backend.create(PixelFormat::Framebuffer, 1, 1).is_none());
    }

    #[test]
    fn unrepresentable_sizes_are_refused() {
        let mut backend = SoftwareBackend::unbounded();
        assert_eq!(
            backend.memory_size(PixelFormat::Native, u32::MAX, u32::MAX),
            usize::MAX
        );
        assert!(backend
            .create(PixelFormat::Native, u32::MAX, u32::MAX)
            .is_none());
        assert_eq!((backend.in_use(), backend.live_stores()), (0, 0));
    }

    #[test]
    fn const_stores_refuse_writes() {
        static ROM: [u8; 16] = [0xff; 16];
        let mut backend = SoftwareBackend::unbounded();
        let rom = backend
            .create_const(PixelFormat::Alpha8, 4, 4, &ROM)
            .unwrap();
        let rect = Rect::from_size(4, 4);
        assert!(backend.lock(rom, rect, None, Access::Write).is_none());
        let info = backend.lock(rom, rect, None, Access::Read).unwrap();
        assert_eq!(info.pitch, 4);
        backend.unlock(rom, &info);
        assert!(backend.pixels_mut(rom).is_none());
        assert_eq!(backend.in_use(), 0);
    }

    #[test]
    fn blend_respects_coverage() {
        assert_eq!(blend(0xff00_0000, 0xffff_ffff, 0), 0xff00_0000);
        assert_eq!(blend(0xff00_0000, 0xffff_ffff, 255), 0xffff_ffff);
        let half = blend(0xff00_0000, 0xffff_ffff, 128);
        assert_eq!(half >> 24, 0xff);
        assert!((0x7f..=0x81).contains(&((half >> 16) & 0xff)));
    }
}
