// Copyright 2026 the Stipple Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Workers whose progress the test controls.

use std::cell::RefCell;
use std::rc::Rc;

use stipple::{IssueId, Job, Worker};

#[derive(Default)]
struct State {
    job: Option<Job>,
    complete: bool,
    launched: Vec<IssueId>,
}

/// A worker that only finishes its job once told to.
///
/// Clones share state, so a test can keep one handle after moving the
/// other into the engine.
#[derive(Clone, Default)]
pub(crate) struct ManualWorker {
    state: Rc<RefCell<State>>,
}

impl ManualWorker {
    /// Lets the outstanding job finish at the next poll.
    pub(crate) fn complete(&self) {
        self.state.borrow_mut().complete = true;
    }

    /// Issues launched so far, in launch order.
    pub(crate) fn launched(&self) -> Vec<IssueId> {
        self.state.borrow().launched.clone()
    }

    /// Whether a job is outstanding.
    pub(crate) fn busy(&self) -> bool {
        self.state.borrow().job.is_some()
    }
}

impl Worker for ManualWorker {
    fn launch(&mut self, job: Job) {
        let mut state = self.state.borrow_mut();
        state.launched.push(job.issue());
        state.job = Some(job);
        state.complete = false;
    }

    fn poll(&mut self) -> Option<Job> {
        let mut state = self.state.borrow_mut();
        if !state.complete {
            return None;
        }
        state.complete = false;
        state.job.take()
    }

    fn wait(&mut self) -> Option<Job> {
        let mut state = self.state.borrow_mut();
        state.complete = false;
        state.job.take()
    }
}
