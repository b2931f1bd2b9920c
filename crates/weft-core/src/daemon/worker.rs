//! The worker loop actor.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;

use crate::TRACING_TARGET_DAEMON as TARGET;
use crate::crawler::Crawler;

/// Delay sentinel that stops a loop on its next wakeup.
pub const STOP_SENTINEL: i64 = -1;

/// A single-threaded worker actor.
///
/// The loop repeatedly runs crawler cycles, sleeping between them for a
/// delay derived from the previous cycle's backpressure signal. Writing
/// [`STOP_SENTINEL`] into the shared delay stops the loop on its next
/// wakeup; sleeping loops are not woken early. Stopping is idempotent,
/// and [`run`](WorkerLoop::run) returns exactly once.
///
/// A panic inside a cycle is logged and the loop continues; loops only
/// terminate through the sentinel.
pub struct WorkerLoop {
    name: String,
    delay: Arc<AtomicI64>,
}

impl WorkerLoop {
    /// Creates a loop named `name` with no inter-cycle delay.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Returns the loop name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the shared delay cell controlling this loop.
    #[must_use]
    pub fn delay(&self) -> Arc<AtomicI64> {
        self.delay.clone()
    }

    /// Runs cycles until the delay cell holds [`STOP_SENTINEL`].
    pub async fn run(self, crawler: Arc<Crawler>) {
        tracing::debug!(target: TARGET, name = %self.name, "loop started");

        loop {
            if self.delay.load(Ordering::SeqCst) == STOP_SENTINEL {
                break;
            }

            let cycle = AssertUnwindSafe(crawler.run_cycle(&self.name))
                .catch_unwind()
                .await;
            let next_request_time = match cycle {
                Ok(request) => request.next_request_time,
                Err(panic) => {
                    tracing::error!(
                        target: TARGET,
                        name = %self.name,
                        message = %panic_message(&panic),
                        "PANIC in cycle; loop continues"
                    );
                    None
                }
            };

            let gate = self.delay.load(Ordering::SeqCst);
            if gate == STOP_SENTINEL {
                break;
            }

            // The next cycle starts no earlier than the loop's own gate
            // and the previous request's backpressure signal.
            let now = Instant::now();
            let mut until = now + Duration::from_millis(gate.max(0) as u64);
            if let Some(at) = next_request_time {
                until = until.max(at);
            }
            let wait = until.saturating_duration_since(now);
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }

        tracing::debug!(target: TARGET, name = %self.name, "loop stopped");
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::config::{ConfigHandle, Options};
    use crate::context::{Queuable, Request};
    use crate::fetch::{FetchResponse, Fetcher};
    use crate::process::Processor;
    use crate::queue::{QueueName, QueueSet};
    use crate::store::{InMemStore, Store};
    use crate::{Result, fetch};

    /// Panics on the first call, succeeds afterwards.
    struct FlakyFetcher {
        calls: Mutex<u32>,
    }

    #[async_trait::async_trait]
    impl Fetcher for FlakyFetcher {
        async fn fetch(&self, request: &mut Request) -> Result<()> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if call == 1 {
                panic!("injected failure");
            }
            request.response = Some(FetchResponse::new(http::StatusCode::OK));
            request.payload = Some(json!({"id": 9}));
            Ok(())
        }
    }

    fn crawler(fetcher: Arc<dyn fetch::Fetcher>, store: InMemStore) -> (Arc<Crawler>, QueueSet) {
        let queues = QueueSet::in_memory("crawler");
        let options = Options {
            polling_delay_ms: 10,
            ..Options::default()
        };
        let crawler = Crawler::new(
            queues.clone(),
            Arc::new(store),
            None,
            fetcher,
            Processor::new(),
            ConfigHandle::new(options),
        );
        (Arc::new(crawler), queues)
    }

    #[tokio::test]
    async fn sentinel_stops_the_loop_exactly_once() {
        let (crawler, _) = crawler(
            Arc::new(FlakyFetcher {
                calls: Mutex::new(1),
            }),
            InMemStore::new(),
        );
        let worker = WorkerLoop::new("crawler-1");
        let delay = worker.delay();

        let task = tokio::spawn(worker.run(crawler));
        tokio::time::sleep(Duration::from_millis(30)).await;

        delay.store(STOP_SENTINEL, Ordering::SeqCst);
        // idempotent
        delay.store(STOP_SENTINEL, Ordering::SeqCst);

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("loop should observe the sentinel")
            .unwrap();
    }

    #[tokio::test]
    async fn loop_survives_a_panicking_cycle() {
        let store = InMemStore::new();
        let (crawler, queues) = crawler(
            Arc::new(FlakyFetcher {
                calls: Mutex::new(0),
            }),
            store.clone(),
        );
        queues
            .push(
                vec![
                    Queuable::new("user", "https://api.example.com/users/nine"),
                    Queuable::new("user", "https://api.example.com/users/nine"),
                ],
                QueueName::Normal,
            )
            .await
            .unwrap();

        let worker = WorkerLoop::new("crawler-1");
        let delay = worker.delay();
        let task = tokio::spawn(worker.run(crawler));

        // Wait for the second (post-panic) cycle to store the document.
        for _ in 0..100 {
            if store
                .get("user", "https://api.example.com/users/nine")
                .await
                .unwrap()
                .is_some()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        delay.store(STOP_SENTINEL, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("loop should stop")
            .unwrap();

        assert!(
            store
                .get("user", "https://api.example.com/users/nine")
                .await
                .unwrap()
                .is_some()
        );
    }
}
