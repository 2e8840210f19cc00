//! Fire-and-forget work that must still finish before the process exits.
//!
//! HTTP workers run on their own runtimes, which are torn down when the
//! server stops. Tasks are therefore spawned onto the runtime that owns
//! `main`, where they are awaited after the server has returned.

use std::future::Future;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;

#[derive(Clone)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
    runtime: Handle,
}

impl BackgroundTasks {
    /// Track tasks on the runtime the caller is running on
    pub fn current() -> Self {
        Self::on(Handle::current())
    }

    pub fn on(runtime: Handle) -> Self {
        Self {
            tracker: TaskTracker::new(),
            runtime,
        }
    }

    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn_on(task, &self.runtime);
    }

    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Close the set and wait for every tracked task to finish
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_task_outlives_the_runtime_that_spawned_it() {
        let tasks = BackgroundTasks::current();
        let (done_tx, done_rx) = oneshot::channel();

        let spawner = tasks.clone();
        std::thread::spawn(move || {
            let worker = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("worker runtime");
            worker.block_on(async move {
                spawner.spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    let _ = done_tx.send(());
                });
            });
            // Dropping the worker runtime here would cancel anything it owned
        })
        .join()
        .expect("worker thread");

        assert_eq!(tasks.len(), 1);
        tasks.shutdown().await;
        assert!(tasks.is_empty());
        assert!(done_rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_with_nothing_running() {
        let tasks = BackgroundTasks::current();
        assert!(tasks.is_empty());
        tasks.shutdown().await;
    }
}
