// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::{Error, Result};

/// A fail-fast group of tasks sharing one cancellation scope.
///
/// The first task that returns an error (or panics) cancels the scope, so
/// every sibling observing [`TaskGroup::token`] winds down. [`TaskGroup::wait`]
/// resolves once all tasks finished and reports that first error.
/// [`Error::Cancelled`] returned by a task is treated as a clean exit.
#[derive(Clone, Default)]
pub struct TaskGroup {
    cancel: CancellationToken,
    tracker: TaskTracker,
    first_error: Arc<Mutex<Option<Error>>>,
}

impl std::fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGroup")
            .field("tasks", &self.tracker.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl TaskGroup {
    /// Creates a new, empty group with its own cancellation scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a group whose scope is a child of `parent`.
    pub fn with_parent(parent: &CancellationToken) -> Self {
        Self {
            cancel: parent.child_token(),
            ..Default::default()
        }
    }

    /// The cancellation token of this group.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancels every task of the group.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns true once the group has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Spawns `task` into the group.
    pub fn spawn<F>(&self, name: impl Into<String>, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let cancel = self.cancel.clone();
        let first_error = self.first_error.clone();
        tracing::trace!(task = %name, "spawning task");
        self.tracker.spawn(async move {
            let outcome = AssertUnwindSafe(task).catch_unwind().await;
            let err = match outcome {
                Ok(Ok(())) | Ok(Err(Error::Cancelled)) => {
                    tracing::debug!(task = %name, "task finished");
                    return;
                }
                Ok(Err(err)) => err,
                Err(_) => Error::TaskPanicked(name.clone()),
            };
            tracing::error!(task = %name, error = %err, "task failed, cancelling all tasks");
            first_error.lock().get_or_insert(err);
            cancel.cancel();
        });
    }

    /// Waits for every task to finish.
    ///
    /// Returns the first error any task returned.
    pub async fn wait(&self) -> Result<()> {
        self.tracker.close();
        self.tracker.wait().await;
        match self.first_error.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
