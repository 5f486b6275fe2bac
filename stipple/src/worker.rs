// Copyright 2026 the Stipple Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Asynchronous execution of flushed issues.
//!
//! Without a worker the engine executes each issue on its own backend as
//! soon as it is promoted to running. A [`Worker`] takes the [`Job`] instead
//! and hands it back once it has run; the engine polls for that from
//! `advance`.

use crate::pipeline::Job;

/// Executes at most one job at a time on behalf of the engine.
pub trait Worker {
    /// Starts executing `job`. Only called when no job is outstanding.
    fn launch(&mut self, job: Job);

    /// Returns the outstanding job if it has finished.
    fn poll(&mut self) -> Option<Job>;

    /// Blocks until the outstanding job finishes and returns it.
    ///
    /// Returns `None` if no job is outstanding.
    fn wait(&mut self) -> Option<Job>;
}

#[cfg(feature = "std")]
pub use thread::ThreadWorker;

#[cfg(feature = "std")]
mod thread {
    use alloc::sync::Arc;
    use core::fmt::{Debug, Formatter};
    use std::thread::JoinHandle;

    use super::Worker;
    use crate::pipeline::Job;

    type Executor = dyn Fn(&Job) + Send + Sync;

    /// A [`Worker`] running each job on a spawned thread.
    ///
    /// The executor closure must reach pixel memory on its own; the engine's
    /// backend is not shared with the thread.
    pub struct ThreadWorker {
        executor: Arc<Executor>,
        running: Option<JoinHandle<Job>>,
        launched: u64,
    }

    impl ThreadWorker {
        /// Creates a worker that calls `executor` for every job.
        pub fn new(executor: impl Fn(&Job) + Send + Sync + 'static) -> Self {
            Self {
                executor: Arc::new(executor),
                running: None,
                launched: 0,
            }
        }

        /// Number of jobs started so far.
        pub fn launched(&self) -> u64 {
            self.launched
        }

        fn join(handle: JoinHandle<Job>) -> Option<Job> {
            match handle.join() {
                Ok(job) => Some(job),
                Err(_) => {
                    log::error!("worker thread panicked; its job is lost");
                    None
                }
            }
        }
    }

    impl Worker for ThreadWorker {
        fn launch(&mut self, job: Job) {
            debug_assert!(self.running.is_none(), "one job at a time");
            let executor = Arc::clone(&self.executor);
            self.launched += 1;
            self.running = Some(std::thread::spawn(move || {
                executor(&job);
                job
            }));
        }

        fn poll(&mut self) -> Option<Job> {
            if self.running.as_ref().is_some_and(JoinHandle::is_finished) {
                let handle = self.running.take()?;
                return Self::join(handle);
            }
            None
        }

        fn wait(&mut self) -> Option<Job> {
            let handle = self.running.take()?;
            Self::join(handle)
        }
    }

    impl Debug for ThreadWorker {
        fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
            f.debug_struct("ThreadWorker")
                .field("busy", &self.running.is_some())
                .field("launched", &self.launched)
                .finish_non_exhaustive()
        }
    }
}
