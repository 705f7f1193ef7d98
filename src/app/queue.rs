use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// In-process background task runner. At most `max_concurrency` tasks run at
/// once; the rest wait for a permit. Task errors are logged, never lost.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    semaphore: Arc<Semaphore>,
}

impl TaskQueue {
    pub fn new(max_concurrency: usize) -> Self {
        let permits = max_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn spawn<F>(&self, name: &'static str, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                tracing::error!(task = name, "task queue is closed; dropping task");
                return;
            };
            if let Err(err) = fut.await {
                tracing::error!(task = name, err = ?err, "background task failed");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn concurrency_is_bounded() -> anyhow::Result<()> {
        let queue = TaskQueue::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                queue.spawn("probe", async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();
        for handle in handles {
            handle.await?;
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        Ok(())
    }

    #[tokio::test]
    async fn failing_task_does_not_panic_the_handle() -> anyhow::Result<()> {
        let queue = TaskQueue::new(1);
        queue
            .spawn("boom", async { anyhow::bail!("boom") })
            .await?;
        Ok(())
    }
}
