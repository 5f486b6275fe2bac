// Copyright 2026 the Stipple Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Task-list rewriting applied when an issue is flushed.
//!
//! Both passes operate on the execution order (oldest first) and relink the
//! arena in place. Neither pass runs on an issue that reads its own target,
//! since then pixel contents between tasks are observable.

use alloc::vec::Vec;

use crate::backend::PixelHandle;
use crate::task::{TaskArena, TaskFlags, TaskKind, TaskRef};

/// What an optimisation pass changed.
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq)]
pub(crate) struct Rewrite {
    pub(crate) eliminated: usize,
    pub(crate) split: usize,
}

fn reads_target(arena: &TaskArena, order: &[TaskRef], target: PixelHandle) -> bool {
    order
        .iter()
        .any(|t| matches!(arena.task(*t).source(), Some((src, _, _)) if src == target))
}

/// Removes and trims tasks whose output is overwritten by a later opaque task.
///
/// A plain fill cut through the middle by a later full-width band is split in
/// two using a cloned record; at most half the original task count is cloned,
/// and only while the arena gap allows it.
pub(crate) fn eliminate_overdraw(arena: &mut TaskArena, target: PixelHandle) -> Rewrite {
    let mut order = arena.execution_order();
    let mut rewrite = Rewrite::default();
    if order.len() < 2 || reads_target(arena, &order, target) {
        return rewrite;
    }
    let mut clone_budget = order.len() / 2;
    let mut alive: Vec<bool> = alloc::vec![true; order.len()];

    let mut newer = order.len();
    while newer > 0 {
        newer -= 1;
        if !alive[newer] {
            continue;
        }
        let cover = *arena.task(order[newer]);
        if !cover.is_opaque() {
            continue;
        }
        let cover_rect = cover.rect();
        let mut older = newer;
        while older > 0 {
            older -= 1;
            if !alive[older] {
                continue;
            }
            let task = *arena.task(order[older]);
            let rect = task.rect();
            if cover_rect.contains(&rect) || rect.is_empty() {
                alive[older] = false;
                rewrite.eliminated += 1;
                continue;
            }
            // Only plain fills can be reshaped; anything with a source would
            // need its source origin shifted too.
            if task.kind() != TaskKind::Fill || task.flags().contains(TaskFlags::EMULATED) {
                continue;
            }
            let Some(overlap) = rect.intersect(&cover_rect) else {
                continue;
            };
            let full_width = overlap.x == rect.x && overlap.width == rect.width;
            let full_height = overlap.y == rect.y && overlap.height == rect.height;
            let mut trimmed = rect;
            if full_width && overlap.y == rect.y {
                trimmed.y = overlap.bottom();
                trimmed.height = rect.height - overlap.height;
            } else if full_width && overlap.bottom() == rect.bottom() {
                trimmed.height = rect.height - overlap.height;
            } else if full_height && overlap.x == rect.x {
                trimmed.x = overlap.right();
                trimmed.width = rect.width - overlap.width;
            } else if full_height && overlap.right() == rect.right() {
                trimmed.width = rect.width - overlap.width;
            } else if full_width && clone_budget > 0 {
                // The band sits strictly inside: keep the top here and move the
                // bottom into a clone.
                let Some(clones) = arena.allocate_tasks(1, Some(order[older])) else {
                    continue;
                };
                let clone = clones[0];
                clone_budget -= 1;
                let mut bottom = rect;
                bottom.y = overlap.bottom();
                bottom.height = rect.bottom().abs_diff(overlap.bottom());
                arena.task_mut(clone).set_rect(bottom);
                trimmed.height = overlap.y.abs_diff(rect.y);
                order.insert(older + 1, clone);
                alive.insert(older + 1, true);
                newer += 1;
                rewrite.split += 1;
            } else {
                continue;
            }
            arena.task_mut(order[older]).set_rect(trimmed);
        }
    }

    if rewrite.eliminated > 0 || rewrite.split > 0 {
        let kept: Vec<TaskRef> = order
            .iter()
            .zip(&alive)
            .filter_map(|(task, alive)| alive.then_some(*task))
            .collect();
        arena.relink(&kept);
    }
    rewrite
}

/// Moves each emulated task back to join the previous emulated task, as long
/// as nothing it would jump over touches the same pixels.
///
/// Returns the number of tasks moved.
pub(crate) fn group_emulated(arena: &mut TaskArena, target: PixelHandle) -> usize {
    let order = arena.execution_order();
    if order.len() < 3 || reads_target(arena, &order, target) {
        return 0;
    }
    let mut out: Vec<TaskRef> = Vec::with_capacity(order.len());
    let mut group_end: Option<usize> = None;
    let mut moved = 0;
    for task in order {
        let record = *arena.task(task);
        if !record.flags().contains(TaskFlags::EMULATED) {
            out.push(task);
            continue;
        }
        let rect = record.rect();
        let insert_at = match group_end {
            Some(end) if end + 1 < out.len() => {
                let blocked = out[end + 1..]
                    .iter()
                    .any(|other| arena.task(*other).rect().overlaps(&rect));
                (!blocked).then_some(end + 1)
            }
            _ => None,
        };
        match insert_at {
            Some(at) => {
                out.insert(at, task);
                group_end = Some(at);
                moved += 1;
            }
            None => {
                out.push(task);
                group_end = Some(out.len() - 1);
            }
        }
    }
    if moved > 0 {
        arena.relink(&out);
    }
    moved
}
