// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Bounded concurrent execution with an error budget.

An [AsynchronousSection] runs submitted futures on the tokio runtime, at most
`size` at a time. Failures are counted as tasks complete. Once more than
`ignore_errors_num` tasks have failed, further submissions are refused and
[AsynchronousSection::close] fails after every in-flight task has finished.
*/

use {
    crate::error::{PacketaryError, Result},
    log::{error, warn},
    std::{
        future::Future,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    },
    tokio::{sync::Semaphore, task::JoinHandle},
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SectionState {
    Open,
    Draining,
    Closed,
}

/// A scope of concurrently executing tasks producing values of type `T`.
pub struct AsynchronousSection<T> {
    semaphore: Arc<Semaphore>,
    ignore_errors_num: usize,
    failures: Arc<AtomicUsize>,
    tasks: Vec<JoinHandle<Result<T>>>,
    state: SectionState,
}

impl<T: Send + 'static> AsynchronousSection<T> {
    /// Construct a section running up to `size` tasks concurrently.
    pub fn new(size: usize, ignore_errors_num: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(size.max(1))),
            ignore_errors_num,
            failures: Arc::new(AtomicUsize::new(0)),
            tasks: vec![],
            state: SectionState::Open,
        }
    }

    /// Number of tasks that have failed so far.
    pub fn errors_count(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// Submit a task.
    ///
    /// Never waits: tasks beyond the concurrency limit queue on the runtime
    /// until a slot frees up.
    pub fn execute<F>(&mut self, task: F) -> Result<()>
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        if self.state != SectionState::Open {
            return Err(PacketaryError::SectionClosed);
        }

        let failures = self.errors_count();
        if failures > self.ignore_errors_num {
            return Err(PacketaryError::TooManyErrors(failures));
        }

        let semaphore = self.semaphore.clone();
        let counter = self.failures.clone();

        self.tasks.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| PacketaryError::Join(e.to_string()))?;

            let res = task.await;
            if res.is_err() {
                counter.fetch_add(1, Ordering::SeqCst);
            }

            res
        }));

        Ok(())
    }

    /// Wait for every submitted task and aggregate their outcome.
    ///
    /// Returns the values of successful tasks in submission order. Fails with
    /// [PacketaryError::TooManyErrors] if more tasks failed than tolerated;
    /// every collected error is logged in that case.
    pub async fn close(mut self) -> Result<Vec<T>> {
        self.state = SectionState::Draining;

        let mut values = vec![];
        let mut errors = vec![];

        for task in std::mem::take(&mut self.tasks) {
            match task.await {
                Ok(Ok(value)) => values.push(value),
                Ok(Err(e)) => errors.push(e),
                Err(e) => errors.push(PacketaryError::Join(e.to_string())),
            }
        }

        self.state = SectionState::Closed;

        if errors.len() > self.ignore_errors_num {
            for e in &errors {
                error!("{}", e);
            }

            Err(PacketaryError::TooManyErrors(errors.len()))
        } else {
            for e in &errors {
                warn!("ignoring error: {}", e);
            }

            Ok(values)
        }
    }
}

impl<T> Drop for AsynchronousSection<T> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
