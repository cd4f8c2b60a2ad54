//! Bounded-admission worker pool for asynchronous dispatch.
//!
//! Pool-backed channels hand each dispatch to an independent tokio task.
//! Admission is gated by a semaphore so a saturated pool pushes back on
//! senders instead of accumulating unbounded work.

use crate::channel::Timeout;
use crate::error::ChannelError;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Semaphore, TryAcquireError};

/// A tokio-task pool with a bounded number of in-flight dispatches.
#[derive(Debug, Clone)]
pub struct TaskPool {
    permits: Option<Arc<Semaphore>>,
    capacity: Option<usize>,
}

impl TaskPool {
    /// Create a pool admitting at most `max_in_flight` concurrent tasks.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::IllegalArgument`] when `max_in_flight` is 0.
    pub fn bounded(max_in_flight: usize) -> Result<Self, ChannelError> {
        if max_in_flight == 0 {
            return Err(ChannelError::IllegalArgument(
                "worker pool capacity must be at least 1".into(),
            ));
        }
        Ok(Self {
            permits: Some(Arc::new(Semaphore::new(max_in_flight))),
            capacity: Some(max_in_flight),
        })
    }

    /// Create a pool with no admission bound.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            permits: None,
            capacity: None,
        }
    }

    /// Get the configured capacity, if bounded.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Spawn a task once the pool admits it.
    ///
    /// The timeout governs only the admission wait, not task execution. The
    /// admitted task holds its permit until it completes.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::DispatchRejected`] when the pool cannot admit
    /// the task within the allowed wait.
    pub async fn spawn<F>(&self, timeout: Timeout, task: F) -> Result<(), ChannelError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = match &self.permits {
            None => None,
            Some(semaphore) => {
                let semaphore = Arc::clone(semaphore);
                let permit = match timeout {
                    Timeout::Immediate => semaphore.try_acquire_owned().map_err(|e| match e {
                        TryAcquireError::NoPermits => {
                            ChannelError::DispatchRejected("worker pool at capacity".into())
                        }
                        TryAcquireError::Closed => {
                            ChannelError::DispatchRejected("worker pool closed".into())
                        }
                    })?,
                    Timeout::Infinite => semaphore.acquire_owned().await.map_err(|_| {
                        ChannelError::DispatchRejected("worker pool closed".into())
                    })?,
                    Timeout::Bounded(wait) => {
                        match tokio::time::timeout(wait, semaphore.acquire_owned()).await {
                            Ok(Ok(permit)) => permit,
                            Ok(Err(_)) => {
                                return Err(ChannelError::DispatchRejected(
                                    "worker pool closed".into(),
                                ))
                            }
                            Err(_) => {
                                return Err(ChannelError::DispatchRejected(
                                    "admission wait timed out".into(),
                                ))
                            }
                        }
                    }
                };
                Some(permit)
            }
        };

        tokio::spawn(async move {
            let _permit = permit;
            task.await;
        });
        Ok(())
    }
}
