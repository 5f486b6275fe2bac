// Copyright 2026 the Stipple Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Task records and the per-issue dual-heap arena.
//!
//! An issue owns one [`TaskArena`]: a single buffer whose top end holds
//! fixed-size [`Task`] records growing downwards, and whose bottom end holds
//! variable-size parameter blobs growing upwards. The records form a
//! singly linked list, newest first, threaded through arena offsets.

use alloc::vec;
use alloc::vec::Vec;
use bytemuck::{Pod, Zeroable};
use smallvec::SmallVec;

use crate::backend::PixelHandle;
use crate::geometry::Rect;

const NONE: u32 = u32::MAX;

/// Size in bytes of one task record.
pub const TASK_SIZE: usize = size_of::<Task>();

/// Drawing operation carried by a [`Task`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskKind {
    /// Fill the rectangle with a solid colour.
    Fill = 0,
    /// Blend a translucent colour over the rectangle.
    Blend = 1,
    /// Copy pixels from a source surface.
    Copy = 2,
    /// Blend pixels from a source surface using its alpha.
    CopyBlend = 3,
    /// Tint an 8-bit coverage mask (a glyph) from the atlas with a colour.
    Glyph = 4,
    /// Scale a source rectangle onto the destination.
    Warp = 5,
}

impl TaskKind {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Blend,
            2 => Self::Copy,
            3 => Self::CopyBlend,
            4 => Self::Glyph,
            5 => Self::Warp,
            _ => Self::Fill,
        }
    }

    /// Whether the operation replaces every destination pixel it touches.
    pub const fn is_opaque(self) -> bool {
        matches!(self, Self::Fill | Self::Copy)
    }
}

/// Per-task flag bits.
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq, Hash)]
pub struct TaskFlags(u8);

impl TaskFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// The backend has no native path for this task and emulates it in software.
    pub const EMULATED: Self = Self(1);

    /// Whether every bit in `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of both flag sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// Handle to a task record inside an issue's arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TaskRef(u32);

/// Handle to a parameter blob inside an issue's arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DataRef {
    offset: u32,
    len: u32,
}

impl DataRef {
    /// Length of the blob in bytes.
    pub const fn len(self) -> usize {
        self.len as usize
    }

    /// Whether the blob is zero-sized.
    pub const fn is_empty(self) -> bool {
        self.len == 0
    }
}

/// One fixed-size drawing command.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Task {
    kind: u8,
    flags: u8,
    _reserved: u16,
    next: u32,
    x: i32,
    y: i32,
    width: u32,
    height: u32,
    src: u32,
    src_x: i32,
    src_y: i32,
    color: u32,
    data: u32,
    data_len: u32,
}

impl Task {
    /// The operation.
    pub fn kind(&self) -> TaskKind {
        TaskKind::from_raw(self.kind)
    }

    /// Sets the operation.
    pub fn set_kind(&mut self, kind: TaskKind) -> &mut Self {
        self.kind = kind as u8;
        self
    }

    /// Flag bits.
    pub fn flags(&self) -> TaskFlags {
        TaskFlags(self.flags)
    }

    /// Replaces the flag bits.
    pub fn set_flags(&mut self, flags: TaskFlags) -> &mut Self {
        self.flags = flags.0;
        self
    }

    /// Destination rectangle.
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    /// Sets the destination rectangle.
    pub fn set_rect(&mut self, rect: Rect) -> &mut Self {
        self.x = rect.x;
        self.y = rect.y;
        self.width = rect.width;
        self.height = rect.height;
        self
    }

    /// Source pixel store and the top-left source coordinate.
    pub fn source(&self) -> Option<(PixelHandle, i32, i32)> {
        (self.src != NONE).then_some((PixelHandle(self.src), self.src_x, self.src_y))
    }

    /// Sets the source pixel store and origin.
    pub fn set_source(&mut self, source: PixelHandle, x: i32, y: i32) -> &mut Self {
        self.src = source.0;
        self.src_x = x;
        self.src_y = y;
        self
    }

    /// Colour as packed `0xAARRGGBB`.
    pub fn color(&self) -> u32 {
        self.color
    }

    /// Sets the packed `0xAARRGGBB` colour.
    pub fn set_color(&mut self, color: u32) -> &mut Self {
        self.color = color;
        self
    }

    /// Parameter blob attached to the task.
    pub fn data(&self) -> Option<DataRef> {
        (self.data != NONE).then_some(DataRef {
            offset: self.data,
            len: self.data_len,
        })
    }

    /// Attaches a parameter blob from the same arena.
    pub fn set_data(&mut self, data: DataRef) -> &mut Self {
        self.data = data.offset;
        self.data_len = data.len;
        self
    }

    /// Whether the task replaces its whole destination rectangle.
    pub fn is_opaque(&self) -> bool {
        self.kind().is_opaque() && !self.flags().contains(TaskFlags::EMULATED)
    }

    fn blank() -> Self {
        Self {
            next: NONE,
            src: NONE,
            data: NONE,
            ..Self::default()
        }
    }
}

/// Dual-heap arena holding one issue's tasks and their parameters.
///
/// Invariant: `data_top <= task_bottom`; the region between them is the gap.
#[derive(Clone)]
pub struct TaskArena {
    words: Vec<u32>,
    data_top: usize,
    task_bottom: usize,
    head: u32,
    len: usize,
}

impl TaskArena {
    /// Creates an arena of `size` bytes, rounded down to whole words.
    pub fn new(size: usize) -> Self {
        let words = size / 4;
        Self {
            words: vec![0; words],
            data_top: 0,
            task_bottom: words * 4,
            head: NONE,
            len: 0,
        }
    }

    /// Total arena size in bytes.
    pub fn capacity(&self) -> usize {
        self.words.len() * 4
    }

    /// Bytes still free between the two heaps.
    pub fn gap(&self) -> usize {
        self.task_bottom - self.data_top
    }

    /// Number of tasks currently linked into the list.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drops every task and blob.
    pub fn reset(&mut self) {
        self.data_top = 0;
        self.task_bottom = self.capacity();
        self.head = NONE;
        self.len = 0;
    }

    fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.words)
    }

    /// Reads a task record.
    pub fn task(&self, task: TaskRef) -> &Task {
        let start = task.0 as usize;
        bytemuck::from_bytes(&self.bytes()[start..start + TASK_SIZE])
    }

    /// Mutably reads a task record.
    pub fn task_mut(&mut self, task: TaskRef) -> &mut Task {
        let start = task.0 as usize;
        bytemuck::from_bytes_mut(&mut self.bytes_mut()[start..start + TASK_SIZE])
    }

    /// Reserves `count` task records.
    ///
    /// Without `clone_of`, each record starts blank and is prepended to the
    /// list. With `clone_of`, each record copies that task's fields and is
    /// spliced in directly after it. Returns `None` if the gap is too small.
    #[expect(
        clippy::cast_possible_truncation,
        reason = "arena offsets are bounded by the arena size"
    )]
    pub fn allocate_tasks(
        &mut self,
        count: usize,
        clone_of: Option<TaskRef>,
    ) -> Option<SmallVec<[TaskRef; 4]>> {
        let needed = count.checked_mul(TASK_SIZE)?;
        if needed > self.gap() {
            return None;
        }
        let mut out = SmallVec::new();
        for _ in 0..count {
            self.task_bottom -= TASK_SIZE;
            let new = TaskRef(self.task_bottom as u32);
            match clone_of {
                Some(original) => {
                    // The copy inherits the original's successor.
                    let copy = *self.task(original);
                    *self.task_mut(new) = copy;
                    self.task_mut(original).next = new.0;
                }
                None => {
                    let mut blank = Task::blank();
                    blank.next = self.head;
                    *self.task_mut(new) = blank;
                    self.head = new.0;
                }
            }
            self.len += 1;
            out.push(new);
        }
        Some(out)
    }

    /// Reserves a single blank task at the head of the list.
    pub fn allocate_task(&mut self) -> Option<TaskRef> {
        self.allocate_tasks(1, None).map(|tasks| tasks[0])
    }

    /// Reserves a zeroed parameter blob of `size` bytes, padded to a word.
    #[expect(
        clippy::cast_possible_truncation,
        reason = "arena offsets are bounded by the arena size"
    )]
    pub fn allocate_data(&mut self, size: usize) -> Option<DataRef> {
        let padded = size.checked_next_multiple_of(4)?;
        if padded > self.gap() {
            return None;
        }
        let offset = self.data_top;
        self.data_top += padded;
        self.bytes_mut()[offset..offset + padded].fill(0);
        Some(DataRef {
            offset: offset as u32,
            len: size as u32,
        })
    }

    /// Releases a blob. Only the most recent blob can be rewound; others
    /// stay reserved until the arena is reset.
    pub fn free_data(&mut self, data: DataRef) -> bool {
        let padded = (data.len as usize).next_multiple_of(4);
        if data.offset as usize + padded == self.data_top {
            self.data_top = data.offset as usize;
            true
        } else {
            false
        }
    }

    /// Bytes of a blob.
    pub fn data(&self, data: DataRef) -> &[u8] {
        let start = data.offset as usize;
        &self.bytes()[start..start + data.len as usize]
    }

    /// Mutable bytes of a blob.
    pub fn data_mut(&mut self, data: DataRef) -> &mut [u8] {
        let start = data.offset as usize;
        &mut self.bytes_mut()[start..start + data.len as usize]
    }

    /// Task handles from newest to oldest.
    pub fn tasks(&self) -> Vec<TaskRef> {
        let mut out = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        while cursor != NONE {
            out.push(TaskRef(cursor));
            cursor = self.task(TaskRef(cursor)).next;
        }
        out
    }

    /// Task handles in the order they must execute (oldest first).
    pub fn execution_order(&self) -> Vec<TaskRef> {
        let mut out = self.tasks();
        out.reverse();
        out
    }

    /// Relinks the list so that it executes in `order` (oldest first).
    ///
    /// Tasks missing from `order` are dropped from the list; their records
    /// stay reserved until the arena is reset.
    pub(crate) fn relink(&mut self, order: &[TaskRef]) {
        let mut next = NONE;
        for task in order {
            self.task_mut(*task).next = next;
            next = task.0;
        }
        self.head = next;
        self.len = order.len();
    }
}

impl core::fmt::Debug for TaskArena {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskArena")
            .field("capacity", &self.capacity())
            .field("tasks", &self.len)
            .field("gap", &self.gap())
            .finish_non_exhaustive()
    }
}
