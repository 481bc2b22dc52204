//! Task pool for managing a link's cancellable background tasks.
//!
//! Each TCPCL link owns one `TaskPool` for its keepalive/idle-timeout timers.
//! `shutdown()` signals cancellation, stops accepting new tasks, then waits
//! for the running ones to finish, so a link can be sure no timer task
//! outlives it.

pub struct TaskPool {
    cancel_token: tokio_util::sync::CancellationToken,
    task_tracker: tokio_util::task::TaskTracker,
}

impl TaskPool {
    pub fn new() -> Self {
        Self {
            cancel_token: tokio_util::sync::CancellationToken::new(),
            task_tracker: tokio_util::task::TaskTracker::new(),
        }
    }

    /// Returns the pool's cancellation token, to be observed in a `select!`
    /// alongside a task's real work.
    pub fn cancel_token(&self) -> &tokio_util::sync::CancellationToken {
        &self.cancel_token
    }

    /// Creates a child token that is cancelled whenever the pool is, but can
    /// also be cancelled independently - used for a single timer that gets
    /// reset (cancelled and respawned) without affecting the others.
    pub fn child_token(&self) -> tokio_util::sync::CancellationToken {
        self.cancel_token.child_token()
    }

    pub fn spawn<F>(&self, task: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.task_tracker.spawn(task)
    }

    /// Cancels every task in the pool, closes it to new spawns, and waits for
    /// the currently running tasks to finish.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_and_shutdown() {
        let pool = TaskPool::new();
        let cancel = pool.cancel_token().clone();

        pool.spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_millis(10)) => {}
                    _ = cancel.cancelled() => break,
                }
            }
        });

        pool.shutdown().await;
        assert!(pool.is_cancelled());
    }

    #[tokio::test]
    async fn child_token_cancels_independently() {
        let pool = TaskPool::new();
        let child = pool.child_token();

        child.cancel();

        assert!(child.is_cancelled());
        assert!(!pool.is_cancelled());
    }

    #[tokio::test]
    async fn parent_cancels_child() {
        let pool = TaskPool::new();
        let child = pool.child_token();

        pool.shutdown().await;

        assert!(child.is_cancelled());
    }
}
