// Copyright 2026 the Stipple Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Issues: batched drawing commands against one target surface.
//!
//! Every issue lives on exactly one of five lists, matching its
//! [`IssueState`]:
//!
//! ```text
//! Ready -> Used -> Pending -> Running -> Finished -> Ready
//! ```
//!
//! At most one issue runs at a time. An issue's sources and target carry
//! reference counts while it is in flight, which is what lets `flush` and
//! `lock` detect hazards against drawing that has not happened yet.

use smallvec::SmallVec;

use crate::backend::{Backend, PixelHandle};
use crate::error::{Error, ErrorKind};
use crate::geometry::Rect;
use crate::optimize;
use crate::slab::{Chain, Key, Links, List, Slab};
use crate::task::{DataRef, Task, TaskArena, TaskFlags, TaskKind, TaskRef, TASK_SIZE};
use crate::{Allocation, Allocator, Engine, SurfaceId};

/// Handle to an issue.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct IssueId(pub(crate) Key);

/// Lifecycle position of an issue.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum IssueState {
    /// Recycled, with an empty arena.
    Ready = 0,
    /// Open on a target and accepting tasks.
    Used = 1,
    /// Flushed and queued for execution.
    Pending = 2,
    /// Being executed.
    Running = 3,
    /// Executed, waiting for its references to be released.
    Finished = 4,
}

impl IssueState {
    const ALL: [Self; 5] = [
        Self::Ready,
        Self::Used,
        Self::Pending,
        Self::Running,
        Self::Finished,
    ];
}

/// Counters kept by the issue pipeline.
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq)]
pub struct PipelineStats {
    /// Issue arenas currently allocated.
    pub issues: usize,
    /// Issues moved from used to pending.
    pub flushes: u64,
    /// Issues executed.
    pub executed: u64,
    /// Times a flush had to drain in-flight readers of its target first.
    pub hazard_drains: u64,
    /// Tasks removed by overdraw elimination.
    pub tasks_eliminated: u64,
    /// Tasks split around an opaque band.
    pub tasks_split: u64,
    /// Emulated tasks moved next to their group.
    pub tasks_regrouped: u64,
}

/// A flushed issue handed to a backend or [`Worker`](crate::Worker) for execution.
#[derive(Debug)]
pub struct Job {
    issue: IssueId,
    target: PixelHandle,
    arena: TaskArena,
}

impl Job {
    /// The issue being executed.
    pub fn issue(&self) -> IssueId {
        self.issue
    }

    /// Store every task draws into.
    pub fn target(&self) -> PixelHandle {
        self.target
    }

    /// The issue's arena, for reading task parameter blobs.
    pub fn arena(&self) -> &TaskArena {
        &self.arena
    }

    /// Tasks in the order they must be executed.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> + '_ {
        self.arena
            .execution_order()
            .into_iter()
            .map(|task| self.arena.task(task))
    }
}

pub(crate) struct Issue {
    pub(crate) state: IssueState,
    pub(crate) target: Option<SurfaceId>,
    pub(crate) handle: PixelHandle,
    /// Taken while a worker holds the job.
    pub(crate) arena: Option<TaskArena>,
    pub(crate) sources: SmallVec<[SurfaceId; 4]>,
    pub(crate) done: bool,
    links: Links,
    pub(crate) allocation: Allocation,
}

impl Issue {
    fn reads(&self, surface: SurfaceId) -> bool {
        self.sources.contains(&surface)
    }

    fn own_reads(&self, surface: SurfaceId) -> u32 {
        self.sources
            .iter()
            .filter(|s| **s == surface)
            .fold(0, |n, _| n + 1)
    }
}

const LINKS: Chain<Issue> = Chain {
    links: |i| &i.links,
    links_mut: |i| &mut i.links,
};

#[derive(Default)]
pub(crate) struct Pipeline {
    pub(crate) issues: Slab<Issue>,
    lists: [List; 5],
    pub(crate) stats: PipelineStats,
}

impl Pipeline {
    pub(crate) fn list(&self, state: IssueState) -> &List {
        &self.lists[state as usize]
    }

    pub(crate) fn id(&self, index: u32) -> Option<IssueId> {
        self.issues.key_at(index).map(IssueId)
    }

    fn insert(&mut self, arena: TaskArena, allocation: Allocation) -> u32 {
        let key = self.issues.insert(Issue {
            state: IssueState::Ready,
            target: None,
            handle: PixelHandle(u32::MAX),
            arena: Some(arena),
            sources: SmallVec::new(),
            done: false,
            links: Links::default(),
            allocation,
        });
        self.lists[IssueState::Ready as usize].push_front(&mut self.issues, LINKS, key.index);
        self.stats.issues += 1;
        key.index
    }

    fn remove(&mut self, index: u32) -> Option<Issue> {
        let state = self.issues.at(index).state;
        self.lists[state as usize].remove(&mut self.issues, LINKS, index);
        let key = self.issues.key_at(index)?;
        self.stats.issues -= 1;
        self.issues.remove(key)
    }

    /// Moves an issue to the front (newest end) of the list for `state`.
    fn transition(&mut self, index: u32, state: IssueState) {
        let old = self.issues.at(index).state;
        self.lists[old as usize].remove(&mut self.issues, LINKS, index);
        self.issues.at_mut(index).state = state;
        self.lists[state as usize].push_front(&mut self.issues, LINKS, index);
    }

    /// The issue if it is open for recording.
    fn open_issue_mut(&mut self, issue: IssueId) -> Option<&mut Issue> {
        self.issues
            .get_mut(issue.0)
            .filter(|i| i.state == IssueState::Used)
    }

    /// Whether any flushed but unreleased issue reads `surface`.
    pub(crate) fn reads_in_flight(&self, surface: SurfaceId) -> bool {
        [IssueState::Pending, IssueState::Running, IssueState::Finished]
            .into_iter()
            .flat_map(|state| self.list(state).indices(&self.issues, LINKS))
            .any(|index| self.issues.at(index).reads(surface))
    }

    /// Target of an open issue, other than `surface`'s own, that reads
    /// `surface`. Targets in `skip` are ignored.
    fn open_reader(&self, surface: SurfaceId, skip: &[SurfaceId]) -> Option<SurfaceId> {
        self.list(IssueState::Used)
            .indices(&self.issues, LINKS)
            .into_iter()
            .map(|index| self.issues.at(index))
            .filter(|issue| issue.reads(surface))
            .filter_map(|issue| issue.target)
            .find(|target| *target != surface && !skip.contains(target))
    }

    /// Each issue on exactly the list for its state, and at most one running.
    pub(crate) fn check_lists(&self) -> Result<(), &'static str> {
        let mut seen = 0;
        for state in IssueState::ALL {
            let indices = self.list(state).indices(&self.issues, LINKS);
            if indices.iter().any(|i| self.issues.at(*i).state != state) {
                return Err("issue listed under the wrong state");
            }
            seen += indices.len();
        }
        if seen != self.issues.len() {
            return Err("issue missing from the state lists");
        }
        if self.list(IssueState::Running).len() > 1 {
            return Err("more than one running issue");
        }
        Ok(())
    }
}

impl core::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut list = f.debug_struct("Pipeline");
        for state in IssueState::ALL {
            let name = match state {
                IssueState::Ready => "ready",
                IssueState::Used => "used",
                IssueState::Pending => "pending",
                IssueState::Running => "running",
                IssueState::Finished => "finished",
            };
            list.field(name, &self.list(state).len());
        }
        list.finish()
    }
}

/// What a drawing helper records into the target's open issue.
struct Draw {
    kind: TaskKind,
    rect: Rect,
    color: u32,
    source: Option<(SurfaceId, i32, i32)>,
}

/// Narrows a copy of `rect` reading from `(sx, sy)` to the part whose source
/// pixels lie inside a `width` x `height` source.
fn clip_to_source(
    rect: Rect,
    sx: i32,
    sy: i32,
    width: u32,
    height: u32,
) -> Option<(Rect, i32, i32)> {
    let read = Rect::new(sx, sy, rect.width, rect.height)
        .intersect(&Rect::from_size(width, height))?;
    let clipped = Rect::new(
        rect.x.saturating_add_unsigned(read.x.abs_diff(sx)),
        rect.y.saturating_add_unsigned(read.y.abs_diff(sy)),
        read.width,
        read.height,
    );
    Some((clipped, read.x, read.y))
}

impl<B: Backend, A: Allocator> Engine<B, A> {
    /// Returns the issue recording into `surface`, opening one if needed.
    ///
    /// Only one issue can be open on a surface at a time, so this is
    /// idempotent until the surface is flushed.
    pub fn open(&mut self, surface: SurfaceId) -> Result<IssueId, Error> {
        self.advance();
        let target = self.surface(surface)?;
        if target.constant {
            return Err(Error::on(ErrorKind::ConstSurface, surface));
        }
        if let Some(issue) = target.open_issue {
            return Ok(issue);
        }
        let index = self.obtain_issue()?;
        let id = self
            .pipeline
            .id(index)
            .ok_or(Error::new(ErrorKind::StaleHandle))?;
        // Reclaiming an arena may have negotiated the target away.
        let target = self.surface_mut(surface)?;
        target.open_issue = Some(id);
        let handle = target.handle;
        let issue = self.pipeline.issues.at_mut(index);
        issue.target = Some(surface);
        issue.handle = handle;
        self.pipeline.transition(index, IssueState::Used);
        Ok(id)
    }

    /// Takes the oldest ready issue, or allocates a new arena.
    fn obtain_issue(&mut self) -> Result<u32, Error> {
        if let Some(index) = self.pipeline.list(IssueState::Ready).back() {
            return Ok(index);
        }
        let size = self.config.issue_arena_size;
        let allocation = self.charge(size)?;
        Ok(self.pipeline.insert(TaskArena::new(size), allocation))
    }

    /// Current state of an issue, or `None` once it has been purged.
    pub fn issue_state(&self, issue: IssueId) -> Option<IssueState> {
        self.pipeline.issues.get(issue.0).map(|i| i.state)
    }

    /// Reserves `count` task records in an open issue.
    ///
    /// See [`TaskArena::allocate_tasks`]. Returns `None` if the issue is not
    /// open or its arena is too full.
    pub fn allocate_tasks(
        &mut self,
        issue: IssueId,
        count: usize,
        clone_of: Option<TaskRef>,
    ) -> Option<SmallVec<[TaskRef; 4]>> {
        self.pipeline
            .open_issue_mut(issue)?
            .arena
            .as_mut()?
            .allocate_tasks(count, clone_of)
    }

    /// Reserves one blank task record in an open issue.
    pub fn allocate_task(&mut self, issue: IssueId) -> Option<TaskRef> {
        self.allocate_tasks(issue, 1, None).map(|tasks| tasks[0])
    }

    /// Reserves a parameter blob in an open issue.
    pub fn allocate_task_data(&mut self, issue: IssueId, size: usize) -> Option<DataRef> {
        self.pipeline
            .open_issue_mut(issue)?
            .arena
            .as_mut()?
            .allocate_data(size)
    }

    /// Releases a parameter blob. Only the most recent blob actually frees space.
    pub fn free_task_data(&mut self, issue: IssueId, data: DataRef) -> bool {
        self.pipeline
            .open_issue_mut(issue)
            .and_then(|i| i.arena.as_mut())
            .is_some_and(|arena| arena.free_data(data))
    }

    /// A task record of an open issue.
    pub fn task_mut(&mut self, issue: IssueId, task: TaskRef) -> Option<&mut Task> {
        let arena = self.pipeline.open_issue_mut(issue)?.arena.as_mut()?;
        Some(arena.task_mut(task))
    }

    /// A parameter blob of an open issue.
    pub fn task_data_mut(&mut self, issue: IssueId, data: DataRef) -> Option<&mut [u8]> {
        let arena = self.pipeline.open_issue_mut(issue)?.arena.as_mut()?;
        Some(arena.data_mut(data))
    }

    /// Records that an open issue reads `source`, returning its store.
    ///
    /// If `source` has its own open issue, that issue is flushed first so
    /// the read sees it. When that flush had to take this issue along (it
    /// already read `source` before the pending writes), the call fails with
    /// [`ErrorKind::StaleHandle`] and the caller must open a new issue.
    pub fn add_source(&mut self, issue: IssueId, source: SurfaceId) -> Result<PixelHandle, Error> {
        if self.pipeline.open_issue_mut(issue).is_none() {
            return Err(Error::new(ErrorKind::StaleHandle));
        }
        if let Some(other) = self.surface(source)?.open_issue {
            if other != issue {
                self.flush(source)?;
                if self.pipeline.open_issue_mut(issue).is_none() {
                    return Err(Error::on(ErrorKind::StaleHandle, source));
                }
            }
        }
        let src = self.surface_mut(source)?;
        src.used += 1;
        let handle = src.handle;
        if let Some(entry) = self.pipeline.open_issue_mut(issue) {
            entry.sources.push(source);
        }
        Ok(handle)
    }

    /// Signals that the caller is done recording for now.
    ///
    /// The issue is flushed once its arena is close to full or it holds
    /// `max_tasks_per_issue` tasks; otherwise it stays open for batching.
    pub fn close(&mut self, surface: SurfaceId) -> Result<(), Error> {
        let Some(issue) = self.surface(surface)?.open_issue else {
            return Ok(());
        };
        let full = self
            .pipeline
            .issues
            .get(issue.0)
            .and_then(|i| i.arena.as_ref())
            .is_some_and(|arena| {
                arena.gap() < (arena.len() / 2 + 1) * TASK_SIZE
                    || arena.len() >= self.config.max_tasks_per_issue
            });
        if full {
            self.flush(surface)?;
        }
        Ok(())
    }

    /// Queues the open issue on `surface` for execution.
    ///
    /// Open issues elsewhere that read `surface` are flushed first, so they
    /// execute against its current contents. If flushed issues still read
    /// the surface, the pipeline is drained until they have run.
    pub fn flush(&mut self, surface: SurfaceId) -> Result<(), Error> {
        self.surface(surface)?;
        let mut stack: SmallVec<[SurfaceId; 8]> = SmallVec::new();
        stack.push(surface);
        while let Some(&current) = stack.last() {
            let Some(issue) = self.surfaces.get(current.0).and_then(|s| s.open_issue) else {
                stack.pop();
                continue;
            };
            // A reader already being flushed further down the stack forms a
            // cycle; it is left to run after this issue.
            if let Some(reader) = self.pipeline.open_reader(current, &stack) {
                stack.push(reader);
                continue;
            }
            if self.has_hazard(current, issue) {
                log::debug!("flush of {current:?} waits for in-flight readers");
                self.pipeline.stats.hazard_drains += 1;
                self.drain_readers(current);
            }
            self.commit(current, issue);
            stack.pop();
        }
        self.advance();
        Ok(())
    }

    /// Claims beyond the owner, pending writes and the issue's own reads
    /// belong to other readers.
    fn has_hazard(&self, surface: SurfaceId, issue: IssueId) -> bool {
        let Some(target) = self.surfaces.get(surface.0) else {
            return false;
        };
        let own = self
            .pipeline
            .issues
            .get(issue.0)
            .map_or(0, |i| i.own_reads(surface));
        target.used > target.owned + target.pending + own
    }

    fn drain_readers(&mut self, surface: SurfaceId) {
        while self.pipeline.reads_in_flight(surface) {
            if !self.advance() && !self.wait_for_worker() {
                break;
            }
        }
    }

    /// Optimises the issue and moves it to pending.
    fn commit(&mut self, surface: SurfaceId, issue: IssueId) {
        let index = issue.0.index;
        let Some(target) = self.surfaces.get_mut(surface.0) else {
            return;
        };
        target.open_issue = None;
        target.pending += 1;
        target.used += 1;
        let entry = self.pipeline.issues.at_mut(index);
        if let Some(arena) = entry.arena.as_mut() {
            let rewrite = optimize::eliminate_overdraw(arena, entry.handle);
            let regrouped = optimize::group_emulated(arena, entry.handle);
            let stats = &mut self.pipeline.stats;
            stats.tasks_eliminated += rewrite.eliminated as u64;
            stats.tasks_split += rewrite.split as u64;
            stats.tasks_regrouped += regrouped as u64;
        }
        self.pipeline.stats.flushes += 1;
        self.pipeline.transition(index, IssueState::Pending);
        log::debug!("flushed {issue:?} on {surface:?}");
    }

    /// Flushes the oldest open issue. Returns `false` if none is open.
    pub fn flush_oldest(&mut self) -> bool {
        let Some(target) = self
            .pipeline
            .list(IssueState::Used)
            .back()
            .and_then(|index| self.pipeline.issues.at(index).target)
        else {
            return false;
        };
        self.flush(target).is_ok()
    }

    /// Flushes every open issue.
    pub fn flush_all(&mut self) {
        while self.flush_oldest() {}
    }

    /// Moves issues along the pipeline as far as they can go without blocking.
    ///
    /// Returns whether anything changed state.
    pub fn advance(&mut self) -> bool {
        let mut progressed = false;
        loop {
            let mut stepped = false;
            if let Some(index) = self.pipeline.list(IssueState::Running).front() {
                if !self.pipeline.issues.at(index).done {
                    if let Some(job) = self.worker.as_mut().and_then(|w| w.poll()) {
                        self.restore(job);
                    }
                }
                if self.pipeline.issues.at(index).done {
                    self.pipeline.transition(index, IssueState::Finished);
                    stepped = true;
                }
            }
            if self.pipeline.list(IssueState::Running).is_empty() {
                if let Some(index) = self.pipeline.list(IssueState::Pending).back() {
                    self.launch(index);
                    stepped = true;
                }
            }
            while let Some(index) = self.pipeline.list(IssueState::Finished).back() {
                self.release(index);
                stepped = true;
            }
            if !stepped {
                break;
            }
            progressed = true;
        }
        if progressed {
            log::trace!("pipeline advanced: {:?}", self.pipeline);
        }
        progressed
    }

    fn launch(&mut self, index: u32) {
        self.pipeline.transition(index, IssueState::Running);
        let Some(id) = self.pipeline.id(index) else {
            return;
        };
        let entry = self.pipeline.issues.at_mut(index);
        let Some(arena) = entry.arena.take() else {
            entry.done = true;
            return;
        };
        let job = Job {
            issue: id,
            target: entry.handle,
            arena,
        };
        self.pipeline.stats.executed += 1;
        match self.worker.as_mut() {
            Some(worker) => worker.launch(job),
            None => {
                self.backend.execute(&job);
                self.restore(job);
            }
        }
    }

    fn restore(&mut self, job: Job) {
        if let Some(entry) = self.pipeline.issues.get_mut(job.issue.0) {
            entry.arena = Some(job.arena);
            entry.done = true;
        }
    }

    /// Blocks on the worker until the running issue completes.
    ///
    /// Returns `false` if there is nothing to wait for.
    pub(crate) fn wait_for_worker(&mut self) -> bool {
        let Some(index) = self.pipeline.list(IssueState::Running).front() else {
            return false;
        };
        if self.pipeline.issues.at(index).done {
            return false;
        }
        let Some(worker) = self.worker.as_mut() else {
            return false;
        };
        match worker.wait() {
            Some(job) => self.restore(job),
            None => {
                log::error!("worker lost the running job; treating it as finished");
                self.pipeline.issues.at_mut(index).done = true;
            }
        }
        true
    }

    /// Drops the finished issue's references and recycles it.
    fn release(&mut self, index: u32) {
        let size = self.config.issue_arena_size;
        let entry = self.pipeline.issues.at_mut(index);
        let target = entry.target.take();
        let sources = core::mem::take(&mut entry.sources);
        entry.done = false;
        match entry.arena.as_mut() {
            Some(arena) => arena.reset(),
            None => entry.arena = Some(TaskArena::new(size)),
        }
        self.pipeline.transition(index, IssueState::Ready);

        if let Some(surface) = target.and_then(|t| self.surfaces.get_mut(t.0)) {
            surface.pending = surface.pending.saturating_sub(1);
            surface.used = surface.used.saturating_sub(1);
        }
        for source in &sources {
            if let Some(surface) = self.surfaces.get_mut(source.0) {
                surface.used = surface.used.saturating_sub(1);
            }
        }
        for surface in target.into_iter().chain(sources) {
            self.discard_if_idle(surface);
        }
    }

    /// Makes `surface` safe to touch directly.
    ///
    /// Flushes its open issue and runs the pipeline until no pending issue
    /// writes it. With `writes`, also flushes and drains every issue that
    /// reads it.
    pub fn wait_for_surface(&mut self, surface: SurfaceId, writes: bool) -> Result<(), Error> {
        self.flush(surface)?;
        if writes {
            while let Some(reader) = self.pipeline.open_reader(surface, &[]) {
                self.flush(reader)?;
            }
        }
        loop {
            let target = self.surface(surface)?;
            let busy = target.pending > 0 || (writes && self.pipeline.reads_in_flight(surface));
            if !busy {
                return Ok(());
            }
            if !self.advance() && !self.wait_for_worker() {
                log::error!("{surface:?} is still busy but the pipeline cannot advance");
                return Ok(());
            }
        }
    }

    /// Flushes every open issue and runs the pipeline dry.
    pub fn finish(&mut self) {
        self.flush_all();
        while self.advance() || self.wait_for_worker() {}
    }

    /// Frees the arena of the oldest ready issue. Returns `false` if none is ready.
    pub(crate) fn drop_ready_issue(&mut self) -> bool {
        let Some(index) = self.pipeline.list(IssueState::Ready).back() else {
            return false;
        };
        if let Some(issue) = self.pipeline.remove(index) {
            self.allocator.free(issue.allocation);
        }
        true
    }

    /// Frees every ready issue arena, returning how many were freed.
    pub fn purge_issues(&mut self) -> usize {
        let mut freed = 0;
        while self.drop_ready_issue() {
            freed += 1;
        }
        freed
    }

    /// Pipeline counters.
    pub fn pipeline_stats(&self) -> PipelineStats {
        self.pipeline.stats
    }

    /// Records one task, flushing and reopening once if the arena is full.
    fn push_task(&mut self, target: SurfaceId, draw: Draw, data: &[u8]) -> Result<(), Error> {
        let (issue, task, blob) = self.reserve(target, draw.source, data.len())?;
        let source = match draw.source {
            Some((src, x, y)) => Some((self.add_source(issue, src)?, x, y)),
            None => None,
        };
        let flags = if self.backend.is_emulated(draw.kind) {
            TaskFlags::EMULATED
        } else {
            TaskFlags::NONE
        };
        let arena = self
            .pipeline
            .open_issue_mut(issue)
            .and_then(|i| i.arena.as_mut())
            .ok_or(Error::on(ErrorKind::StaleHandle, target))?;
        let record = arena.task_mut(task);
        record
            .set_kind(draw.kind)
            .set_flags(flags)
            .set_rect(draw.rect)
            .set_color(draw.color);
        if let Some((handle, x, y)) = source {
            record.set_source(handle, x, y);
        }
        if let Some(blob) = blob {
            record.set_data(blob);
            arena.data_mut(blob).copy_from_slice(data);
        }
        self.close(target)
    }

    fn reserve(
        &mut self,
        target: SurfaceId,
        source: Option<(SurfaceId, i32, i32)>,
        data_len: usize,
    ) -> Result<(IssueId, TaskRef, Option<DataRef>), Error> {
        for _ in 0..2 {
            if let Some((src, _, _)) = source {
                if src != target && self.surface(src)?.open_issue.is_some() {
                    self.flush(src)?;
                }
            }
            let issue = self.open(target)?;
            let Some(arena) = self
                .pipeline
                .open_issue_mut(issue)
                .and_then(|i| i.arena.as_mut())
            else {
                return Err(Error::on(ErrorKind::StaleHandle, target));
            };
            let blob = if data_len == 0 {
                None
            } else if let Some(blob) = arena.allocate_data(data_len) {
                Some(blob)
            } else {
                self.flush(target)?;
                continue;
            };
            if let Some(task) = arena.allocate_task() {
                return Ok((issue, task, blob));
            }
            if let Some(blob) = blob {
                arena.free_data(blob);
            }
            self.flush(target)?;
        }
        // A fresh arena cannot hold even one task.
        Err(Error::on(ErrorKind::OutOfMemory, target))
    }

    /// Fills `rect` of `surface` with `color`.
    pub fn fill_rect(&mut self, surface: SurfaceId, rect: Rect, color: u32) -> Result<(), Error> {
        let draw = Draw {
            kind: TaskKind::Fill,
            rect,
            color,
            source: None,
        };
        self.push_task(surface, draw, &[])
    }

    /// Composites `color` over `rect` of `surface` using its alpha.
    pub fn blend_rect(&mut self, surface: SurfaceId, rect: Rect, color: u32) -> Result<(), Error> {
        let draw = Draw {
            kind: TaskKind::Blend,
            rect,
            color,
            source: None,
        };
        self.push_task(surface, draw, &[])
    }

    /// Copies pixels of `source` starting at `(sx, sy)` into `rect` of `surface`.
    ///
    /// With `blend`, source pixels are composited using their alpha.
    pub fn copy_rect(
        &mut self,
        surface: SurfaceId,
        rect: Rect,
        source: SurfaceId,
        sx: i32,
        sy: i32,
        blend: bool,
    ) -> Result<(), Error> {
        let extent = self.surface(source)?.identity;
        // Destination pixels with no source pixel behind them are left alone,
        // so the recorded rectangle only covers what the copy writes.
        let (rect, sx, sy) = clip_to_source(rect, sx, sy, extent.width, extent.height)
            .unwrap_or((Rect::new(rect.x, rect.y, 0, 0), sx, sy));
        let draw = Draw {
            kind: if blend {
                TaskKind::CopyBlend
            } else {
                TaskKind::Copy
            },
            rect,
            color: 0,
            source: Some((source, sx, sy)),
        };
        self.push_task(surface, draw, &[])
    }

    /// Scales the `src_rect` region of `source` into `rect` of `surface`.
    pub fn warp_rect(
        &mut self,
        surface: SurfaceId,
        rect: Rect,
        source: SurfaceId,
        src_rect: Rect,
    ) -> Result<(), Error> {
        let mut extent = [0_u8; 8];
        extent[..4].copy_from_slice(&src_rect.width.to_le_bytes());
        extent[4..].copy_from_slice(&src_rect.height.to_le_bytes());
        let draw = Draw {
            kind: TaskKind::Warp,
            rect,
            color: 0,
            source: Some((source, src_rect.x, src_rect.y)),
        };
        self.push_task(surface, draw, &extent)
    }

    /// Draws an atlas coverage mask at `(x, y)` in `color`.
    pub(crate) fn draw_mask(
        &mut self,
        surface: SurfaceId,
        rect: Rect,
        atlas: SurfaceId,
        origin: (i32, i32),
        color: u32,
    ) -> Result<(), Error> {
        let draw = Draw {
            kind: TaskKind::Glyph,
            rect,
            color,
            source: Some((atlas, origin.0, origin.1)),
        };
        self.push_task(surface, draw, &[])
    }
}
