use crate::api::{ApiError, PollSource};
use crate::models::Poll;
use log::debug;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// The initial poll fetch of a mounted view, running in the background.
///
/// Cancelling (or dropping) aborts the request, so a fetch that outlives its
/// view never reaches it.
pub struct FetchTask {
    poll_id: String,
    handle: Option<JoinHandle<Result<Poll, ApiError>>>,
}

impl FetchTask {
    pub fn spawn(source: Arc<dyn PollSource>, poll_id: &str) -> Self {
        let id = poll_id.to_string();
        let handle = tokio::spawn(async move { source.get_poll(&id).await });
        Self {
            poll_id: poll_id.to_string(),
            handle: Some(handle),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.handle.is_some()
    }

    /// Wait for the result. Only the first call yields the fetched poll.
    pub async fn join(&mut self) -> Result<Poll, ApiError> {
        let Some(handle) = self.handle.as_mut() else {
            return Err(ApiError::Interrupted(format!("fetch of poll {} already consumed", self.poll_id)));
        };
        let outcome = handle.await;
        self.handle = None;
        match outcome {
            Ok(result) => result,
            Err(e) => Err(ApiError::Interrupted(e.to_string())),
        }
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("Cancelling fetch of poll {}", self.poll_id);
            handle.abort();
        }
    }
}

impl Drop for FetchTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sample_poll;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    struct SlowSource {
        gate: Notify,
        finished: AtomicBool,
    }

    #[async_trait]
    impl PollSource for SlowSource {
        async fn get_poll(&self, poll_id: &str) -> Result<Poll, ApiError> {
            self.gate.notified().await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(sample_poll(poll_id, &[("a", "Tea", 1)]))
        }
    }

    fn slow_source() -> Arc<SlowSource> {
        Arc::new(SlowSource {
            gate: Notify::new(),
            finished: AtomicBool::new(false),
        })
    }

    #[tokio::test]
    async fn join_yields_result_once() {
        let source = slow_source();
        let mut task = FetchTask::spawn(source.clone(), "p1");
        assert!(task.is_pending());

        source.gate.notify_one();
        assert_eq!(task.join().await.unwrap().id, "p1");
        assert!(!task.is_pending());
        assert!(matches!(task.join().await, Err(ApiError::Interrupted(_))));
    }

    #[tokio::test]
    async fn cancelled_fetch_never_completes() {
        let source = slow_source();
        let mut task = FetchTask::spawn(source.clone(), "p1");
        task.cancel();
        assert!(!task.is_pending());

        // let the runtime process the abort, then open the gate
        tokio::task::yield_now().await;
        source.gate.notify_one();
        tokio::task::yield_now().await;
        assert!(!source.finished.load(Ordering::SeqCst));
    }
}
