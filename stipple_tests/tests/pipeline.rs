// Copyright 2026 the Stipple Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Issue scheduling, hazards and draw ordering.

use std::sync::{Arc, Mutex};

use stipple::backend::software::Executed;
use stipple::{
    IssueState, Job, LockMode, PixelFormat, PixelHandle, Rect, SurfaceId, TaskKind, ThreadWorker,
};

use crate::util::{ManualWorker, TestEnv, assert_invariants};

const RED: u32 = 0xffff_0000;
const BLUE: u32 = 0xff00_00ff;
const GREEN: u32 = 0xff00_ff00;

fn native(env: &mut TestEnv, tag: u32) -> SurfaceId {
    env.engine
        .create(PixelFormat::Native, 8, 8, None, 7, tag)
        .unwrap()
}

fn order(executed: &[Executed]) -> Vec<(PixelHandle, TaskKind)> {
    executed.iter().map(|e| (e.target, e.kind)).collect()
}

#[test]
fn pipeline_reads_see_earlier_writes() {
    let mut env = TestEnv::new(1 << 16);
    let a = native(&mut env, 1);
    let b = native(&mut env, 2);
    let (ha, hb) = (
        env.engine.info(a).unwrap().handle,
        env.engine.info(b).unwrap().handle,
    );

    env.engine.fill_rect(a, Rect::from_size(8, 8), RED).unwrap();
    env.engine
        .copy_rect(b, Rect::from_size(8, 8), a, 0, 0, false)
        .unwrap();
    env.engine.finish();

    let executed = env.engine.backend_mut().take_executed();
    assert_eq!(
        order(&executed),
        [(ha, TaskKind::Fill), (hb, TaskKind::Copy)]
    );
    assert_eq!(executed[1].source, Some(ha));
    assert_eq!(env.engine.backend().pixel(hb, 5, 5), Some(RED));
    assert_invariants(&env.engine, "ordered drain");
}

#[test]
fn pipeline_flush_runs_open_readers_first() {
    let mut env = TestEnv::new(1 << 16);
    let a = native(&mut env, 1);
    let b = native(&mut env, 2);
    env.engine.fill_rect(a, Rect::from_size(8, 8), BLUE).unwrap();
    env.engine.flush(a).unwrap();
    env.engine.backend_mut().take_executed();

    // B reads A before A is painted over.
    env.engine
        .copy_rect(b, Rect::from_size(8, 8), a, 0, 0, false)
        .unwrap();
    env.engine.fill_rect(a, Rect::from_size(8, 8), RED).unwrap();
    env.engine.flush(a).unwrap();

    let hb = env.engine.info(b).unwrap().handle;
    let executed = env.engine.backend_mut().take_executed();
    assert_eq!(executed.len(), 2);
    assert_eq!(executed[0].kind, TaskKind::Copy);
    assert_eq!(executed[1].kind, TaskKind::Fill);
    assert_eq!(env.engine.backend().pixel(hb, 0, 0), Some(BLUE));
    assert_invariants(&env.engine, "reader flushed first");
}

#[test]
fn pipeline_self_copy_keeps_its_order() {
    let mut env = TestEnv::new(1 << 16);
    let a = native(&mut env, 1);
    env.engine.fill_rect(a, Rect::new(0, 0, 4, 8), RED).unwrap();
    env.engine
        .copy_rect(a, Rect::new(4, 0, 4, 8), a, 0, 0, false)
        .unwrap();
    env.engine.fill_rect(a, Rect::from_size(8, 8), BLUE).unwrap();
    env.engine.flush(a).unwrap();

    // Reading the target disables overdraw elimination.
    assert_eq!(env.engine.backend().executed().len(), 3);
    assert_eq!(env.engine.pipeline_stats().tasks_eliminated, 0);
    assert_eq!(env.engine.info(a).unwrap().used, 1);
}

#[test]
fn pipeline_overdraw_is_eliminated() {
    let mut env = TestEnv::new(1 << 16);
    let a = native(&mut env, 1);
    env.engine.fill_rect(a, Rect::new(1, 1, 2, 2), RED).unwrap();
    env.engine.blend_rect(a, Rect::new(2, 2, 2, 2), 0x8000_ff00).unwrap();
    env.engine.fill_rect(a, Rect::from_size(8, 8), BLUE).unwrap();
    env.engine.flush(a).unwrap();

    let executed = env.engine.backend_mut().take_executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].rect, Rect::from_size(8, 8));
    assert_eq!(env.engine.pipeline_stats().tasks_eliminated, 2);
}

#[test]
fn pipeline_issue_lists_track_state() {
    let worker = ManualWorker::default();
    let mut env = TestEnv::new(1 << 16);
    env.engine = env.engine.with_worker(worker.clone());
    let a = native(&mut env, 1);
    let b = native(&mut env, 2);

    env.engine.fill_rect(a, Rect::from_size(8, 8), RED).unwrap();
    env.engine.fill_rect(b, Rect::from_size(8, 8), RED).unwrap();
    let ia = env.engine.open(a).unwrap();
    let ib = env.engine.open(b).unwrap();
    assert_eq!(env.engine.issue_state(ia), Some(IssueState::Used));
    assert_invariants(&env.engine, "two open issues");

    env.engine.flush(a).unwrap();
    env.engine.flush(b).unwrap();
    assert_eq!(env.engine.issue_state(ia), Some(IssueState::Running));
    assert_eq!(env.engine.issue_state(ib), Some(IssueState::Pending));
    assert_eq!(env.engine.info(a).unwrap().pending, 1);
    assert_invariants(&env.engine, "one running, one pending");

    worker.complete();
    assert!(env.engine.advance());
    assert_eq!(env.engine.issue_state(ia), Some(IssueState::Ready));
    assert_eq!(env.engine.issue_state(ib), Some(IssueState::Running));
    assert_eq!(env.engine.info(a).unwrap().pending, 0);
    assert_invariants(&env.engine, "first released");

    worker.complete();
    env.engine.advance();
    assert_eq!(env.engine.issue_state(ib), Some(IssueState::Ready));
    assert_eq!(worker.launched(), [ia, ib]);
    assert!(!worker.busy());
    assert_invariants(&env.engine, "drained");
}

#[test]
fn pipeline_lock_waits_for_pending_writes() {
    let worker = ManualWorker::default();
    let mut env = TestEnv::new(1 << 16);
    env.engine = env.engine.with_worker(worker.clone());
    let a = native(&mut env, 1);
    env.engine.fill_rect(a, Rect::from_size(8, 8), RED).unwrap();
    env.engine.flush(a).unwrap();
    assert!(worker.busy());

    let lock = env
        .engine
        .lock(a, Rect::from_size(8, 8), None, LockMode::READ)
        .unwrap();
    assert!(!worker.busy());
    assert_eq!(env.engine.info(a).unwrap().pending, 0);
    env.engine.unlock(lock).unwrap();

    // A no-wait lock does not touch the pipeline.
    env.engine.fill_rect(a, Rect::from_size(8, 8), BLUE).unwrap();
    env.engine.flush(a).unwrap();
    let lock = env
        .engine
        .lock(a, Rect::from_size(8, 8), None, LockMode::READ.no_wait())
        .unwrap();
    assert!(worker.busy());
    env.engine.unlock(lock).unwrap();
    env.engine.finish();
    assert!(!worker.busy());
}

#[test]
fn pipeline_close_batches_until_the_arena_fills() {
    let mut env = TestEnv::with_config(stipple::EngineConfig {
        atlas: None,
        issue_arena_size: 8 * stipple::TASK_SIZE,
        ..stipple::EngineConfig::default()
    });
    let a = native(&mut env, 1);
    for x in 0..8 {
        env.engine.fill_rect(a, Rect::new(x, 0, 1, 1), RED).unwrap();
    }
    // Six tasks leave less gap than the optimizer may need, so the issue
    // was flushed on close and the last two went into a recycled arena.
    assert_eq!(env.engine.pipeline_stats().flushes, 1);
    env.engine.finish();
    assert_eq!(env.engine.pipeline_stats().flushes, 2);
    assert_eq!(env.engine.backend().executed().len(), 8);
    assert_eq!(env.engine.pipeline_stats().issues, 1);
}

#[test]
fn pipeline_warp_is_grouped_with_emulated_work() {
    let mut env = TestEnv::new(1 << 16);
    let src = native(&mut env, 1);
    let dst = env
        .engine
        .create(PixelFormat::Native, 32, 32, None, 7, 2)
        .unwrap();
    env.engine.fill_rect(src, Rect::from_size(8, 8), RED).unwrap();
    env.engine
        .warp_rect(dst, Rect::new(0, 0, 16, 16), src, Rect::from_size(8, 8))
        .unwrap();
    env.engine.fill_rect(dst, Rect::new(20, 20, 4, 4), BLUE).unwrap();
    env.engine
        .warp_rect(dst, Rect::new(16, 0, 4, 4), src, Rect::from_size(8, 8))
        .unwrap();
    env.engine.finish();

    let hdst = env.engine.info(dst).unwrap().handle;
    let kinds: Vec<TaskKind> = env
        .engine
        .backend()
        .executed()
        .iter()
        .filter(|e| e.target == hdst)
        .map(|e| e.kind)
        .collect();
    assert_eq!(kinds, [TaskKind::Warp, TaskKind::Warp, TaskKind::Fill]);
    assert_eq!(env.engine.pipeline_stats().tasks_regrouped, 1);
    assert_eq!(env.engine.backend().pixel(hdst, 15, 15), Some(RED));
}

#[test]
fn pipeline_thread_worker_runs_every_issue() {
    let seen: Arc<Mutex<Vec<(PixelHandle, usize)>>> = Arc::default();
    let log = Arc::clone(&seen);
    let worker = ThreadWorker::new(move |job: &Job| {
        log.lock().unwrap().push((job.target(), job.tasks().count()));
    });
    let mut env = TestEnv::new(1 << 16);
    env.engine = env.engine.with_worker(worker);
    let a = native(&mut env, 1);
    let b = native(&mut env, 2);
    env.engine.fill_rect(a, Rect::new(0, 0, 2, 2), RED).unwrap();
    env.engine.fill_rect(a, Rect::new(4, 4, 2, 2), RED).unwrap();
    env.engine.fill_rect(b, Rect::new(0, 0, 2, 2), BLUE).unwrap();
    env.engine.finish();

    let ha = env.engine.info(a).unwrap().handle;
    let hb = env.engine.info(b).unwrap().handle;
    let mut seen = seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, [(ha, 2), (hb, 1)]);
    assert_eq!(env.engine.info(a).unwrap().pending, 0);
    assert_invariants(&env.engine, "threaded drain");
}

#[test]
fn pipeline_copy_from_a_smaller_source_keeps_uncovered_pixels() {
    let mut env = TestEnv::new(1 << 16);
    let dst = native(&mut env, 1);
    let src = env
        .engine
        .create(PixelFormat::Native, 2, 2, None, 7, 2)
        .unwrap();
    env.engine.fill_rect(src, Rect::from_size(2, 2), BLUE).unwrap();
    env.engine.fill_rect(dst, Rect::from_size(8, 8), RED).unwrap();
    env.engine
        .copy_rect(dst, Rect::from_size(8, 8), src, 0, 0, false)
        .unwrap();
    env.engine.finish();

    let hdst = env.engine.info(dst).unwrap().handle;
    let executed: Vec<Executed> = env
        .engine
        .backend()
        .executed()
        .iter()
        .filter(|e| e.target == hdst)
        .copied()
        .collect();
    assert_eq!(executed.len(), 2);
    assert_eq!(executed[1].kind, TaskKind::Copy);
    assert_eq!(executed[1].rect, Rect::from_size(2, 2));
    assert_eq!(env.engine.pipeline_stats().tasks_eliminated, 0);
    let backend = env.engine.backend();
    assert_eq!(backend.pixel(hdst, 1, 1), Some(BLUE));
    assert_eq!(backend.pixel(hdst, 5, 5), Some(RED));
}

#[test]
fn pipeline_far_off_rectangles_are_clipped() {
    let mut env = TestEnv::new(1 << 16);
    let dst = native(&mut env, 1);
    let src = native(&mut env, 2);
    env.engine.fill_rect(src, Rect::from_size(8, 8), GREEN).unwrap();
    env.engine.fill_rect(dst, Rect::from_size(8, 8), BLUE).unwrap();
    env.engine
        .fill_rect(dst, Rect::new(i32::MAX - 2, 0, 8, 8), RED)
        .unwrap();
    env.engine
        .fill_rect(dst, Rect::new(i32::MIN, 0, u32::MAX, 1), RED)
        .unwrap();
    env.engine
        .copy_rect(dst, Rect::new(i32::MIN, 4, 4, 4), src, 0, 0, false)
        .unwrap();
    env.engine
        .copy_rect(dst, Rect::new(4, 4, 4, 4), src, i32::MIN, i32::MAX, false)
        .unwrap();
    env.engine.finish();

    let hdst = env.engine.info(dst).unwrap().handle;
    let backend = env.engine.backend();
    assert_eq!(backend.pixel(hdst, 0, 0), Some(RED));
    assert_eq!(backend.pixel(hdst, 7, 0), Some(RED));
    assert_eq!(backend.pixel(hdst, 3, 3), Some(BLUE));
    assert_eq!(backend.pixel(hdst, 5, 5), Some(BLUE));
    assert_invariants(&env.engine, "far-off drawing");
}

#[test]
fn pipeline_flush_drains_in_flight_readers() {
    let worker = ManualWorker::default();
    let mut env = TestEnv::new(1 << 16);
    env.engine = env.engine.with_worker(worker.clone());
    let a = native(&mut env, 1);
    let b = native(&mut env, 2);

    env.engine
        .copy_rect(b, Rect::from_size(8, 8), a, 0, 0, false)
        .unwrap();
    env.engine.flush(b).unwrap();
    let reader = worker.launched()[0];
    assert_eq!(env.engine.issue_state(reader), Some(IssueState::Running));

    // Writing `a` must wait until the running copy has read it.
    env.engine.fill_rect(a, Rect::from_size(8, 8), RED).unwrap();
    let writer = env.engine.open(a).unwrap();
    env.engine.flush(a).unwrap();

    assert_eq!(env.engine.pipeline_stats().hazard_drains, 1);
    assert_eq!(env.engine.issue_state(reader), Some(IssueState::Ready));
    assert_eq!(env.engine.issue_state(writer), Some(IssueState::Running));
    assert_eq!(worker.launched(), [reader, writer]);
    assert_invariants(&env.engine, "hazard drained");

    worker.complete();
    env.engine.finish();
    assert_eq!(env.engine.info(a).unwrap().used, 1);
}

/// One recorded drawing call, with sources given by index.
#[derive(Copy, Clone)]
enum Op {
    Fill(Rect, u32),
    Blend(Rect, u32),
    Copy(Rect, usize, i32, i32),
}

fn replay(
    env: &mut TestEnv,
    dst: SurfaceId,
    sources: &[SurfaceId],
    ops: &[Op],
    stepwise: bool,
) {
    for op in ops {
        match *op {
            Op::Fill(rect, color) => env.engine.fill_rect(dst, rect, color).unwrap(),
            Op::Blend(rect, color) => env.engine.blend_rect(dst, rect, color).unwrap(),
            Op::Copy(rect, src, sx, sy) => env
                .engine
                .copy_rect(dst, rect, sources[src], sx, sy, false)
                .unwrap(),
        }
        if stepwise {
            env.engine.flush(dst).unwrap();
        }
    }
    env.engine.finish();
}

#[test]
fn pipeline_optimized_batches_match_in_order_execution() {
    let mut env = TestEnv::new(1 << 16);
    let small = env
        .engine
        .create(PixelFormat::Native, 2, 2, None, 7, 10)
        .unwrap();
    let wide = native(&mut env, 11);
    env.engine.fill_rect(small, Rect::from_size(2, 2), BLUE).unwrap();
    env.engine.fill_rect(wide, Rect::from_size(8, 8), GREEN).unwrap();
    env.engine
        .fill_rect(wide, Rect::new(4, 4, 4, 4), 0xff12_3456)
        .unwrap();

    let ops = [
        Op::Fill(Rect::from_size(8, 8), RED),
        Op::Copy(Rect::from_size(8, 8), 0, 0, 0),
        Op::Fill(Rect::new(0, 2, 8, 4), GREEN),
        Op::Fill(Rect::new(0, 3, 8, 1), BLUE),
        Op::Copy(Rect::new(3, -2, 8, 8), 1, 2, 2),
        Op::Blend(Rect::new(1, 1, 4, 4), 0x8000_ff00),
        Op::Copy(Rect::new(-1, -1, 4, 4), 0, 0, 0),
        Op::Fill(Rect::new(6, 6, 2, 2), 0xffff_ffff),
        Op::Fill(Rect::new(5, 5, 3, 3), 0xff00_0000),
    ];
    let batched = native(&mut env, 1);
    let stepped = native(&mut env, 2);
    replay(&mut env, batched, &[small, wide], &ops, false);
    assert!(env.engine.pipeline_stats().tasks_eliminated >= 1);
    replay(&mut env, stepped, &[small, wide], &ops, true);

    let hb = env.engine.info(batched).unwrap().handle;
    let hs = env.engine.info(stepped).unwrap().handle;
    let backend = env.engine.backend();
    for y in 0..8 {
        for x in 0..8 {
            assert_eq!(
                backend.pixel(hb, x, y),
                backend.pixel(hs, x, y),
                "pixel ({x}, {y}) differs from in-order execution"
            );
        }
    }
}

#[test]
fn pipeline_open_advances_the_scheduler() {
    let worker = ManualWorker::default();
    let mut env = TestEnv::new(1 << 16);
    env.engine = env.engine.with_worker(worker.clone());
    let a = native(&mut env, 1);
    let b = native(&mut env, 2);
    env.engine.fill_rect(a, Rect::from_size(8, 8), RED).unwrap();
    let open = env.engine.open(a).unwrap();
    env.engine.fill_rect(b, Rect::from_size(8, 8), BLUE).unwrap();
    env.engine.flush(b).unwrap();
    let running = worker.launched()[0];
    assert_eq!(env.engine.issue_state(running), Some(IssueState::Running));

    worker.complete();
    // Reopening an already open issue still ticks the pipeline.
    assert_eq!(env.engine.open(a).unwrap(), open);
    assert_eq!(env.engine.issue_state(running), Some(IssueState::Ready));
    assert_eq!(env.engine.info(b).unwrap().pending, 0);
    assert_invariants(&env.engine, "open advanced");
}
