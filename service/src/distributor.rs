//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//


//! Message distributor
//!
//! A single-consumer FIFO decoupling "a message became known" from "deliver
//! it to every observer". Producers push display-ready lines; one worker
//! task hands each line, in push order, to every registered subscriber.

use crate::{RelayError, Result};
use async_trait::async_trait;
use chatrelay_protocol::{Message, ProtocolError, display_line};
use futures::FutureExt;
use metrics::{counter, gauge};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Receiver of display-ready lines
#[async_trait]
pub trait Subscriber: Send + Sync + 'static {
    /// Called once per published line, in publish order
    async fn on_line(&self, line: &str) -> Result<()>;
}

/// A subscriber wrapping a plain closure
///
/// # Example
///
/// ```
/// use chatrelay_service::CallbackSubscriber;
///
/// let printer = CallbackSubscriber::new(|line: &str| println!("{line}"));
/// ```
pub struct CallbackSubscriber<F> {
    callback: F,
}

impl<F> CallbackSubscriber<F>
where
    F: Fn(&str) + Send + Sync + 'static,
{
    /// Wrap a closure
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F> Subscriber for CallbackSubscriber<F>
where
    F: Fn(&str) + Send + Sync + 'static,
{
    async fn on_line(&self, line: &str) -> Result<()> {
        (self.callback)(line);
        Ok(())
    }
}

/// Handle returned by [`MessageDistributor::register_subscriber`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

type SubscriberList = Arc<RwLock<Vec<(SubscriberId, Arc<dyn Subscriber>)>>>;

/// Fan-out queue for display lines
pub struct MessageDistributor {
    tx: mpsc::UnboundedSender<String>,
    subscribers: SubscriberList,
    next_id: AtomicU64,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
}

impl MessageDistributor {
    /// Create the distributor and spawn its worker
    ///
    /// The worker stops when `cancel` fires and is never restarted. Must be
    /// called from within a Tokio runtime.
    pub fn new(cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscribers: SubscriberList = Arc::default();
        let worker = tokio::spawn(Self::run(rx, subscribers.clone(), cancel.clone()));
        Self {
            tx,
            subscribers,
            next_id: AtomicU64::new(1),
            cancel,
            worker,
        }
    }

    async fn run(
        mut rx: mpsc::UnboundedReceiver<String>,
        subscribers: SubscriberList,
        cancel: CancellationToken,
    ) {
        loop {
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                line = rx.recv() => match line {
                    Some(line) => line,
                    None => break,
                },
            };

            let targets: Vec<_> = subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            for (id, subscriber) in targets {
                match AssertUnwindSafe(subscriber.on_line(&line)).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        counter!("chatrelay.distributor.errors").increment(1);
                        warn!(subscriber = %id, error = %e, "Subscriber failed to take line");
                    }
                    Err(_) => {
                        counter!("chatrelay.distributor.errors").increment(1);
                        warn!(subscriber = %id, "Subscriber panicked while taking line");
                    }
                }
            }
            counter!("chatrelay.distributor.lines").increment(1);
        }
        info!("Message distributor stopped");
    }

    /// Queue a display line for every subscriber
    pub fn publish(&self, line: impl Into<String>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(RelayError::DistributorStopped);
        }
        self.tx
            .send(line.into())
            .map_err(|_| RelayError::DistributorStopped)
    }

    /// Tokenize an INCOMING_MESSAGE frame and publish it as `uuid: text`
    pub fn publish_incoming(&self, raw: &str) -> Result<()> {
        match Message::parse(raw)? {
            Message::Incoming { uuid, text } => self.publish(display_line(&uuid, &text)),
            other => Err(RelayError::Protocol(ProtocolError::Malformed {
                kind: other.kind(),
                reason: "not an incoming message",
            })),
        }
    }

    /// Add a subscriber
    ///
    /// The subscriber sees every line the worker dequeues after this call.
    /// That includes lines published earlier but still queued. The line
    /// being delivered at the moment of the call is not redelivered.
    pub fn register_subscriber(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.push((id, subscriber));
        gauge!("chatrelay.distributor.subscribers").set(subscribers.len() as f64);
        debug!(subscriber = %id, "Subscriber registered");
        id
    }

    /// Remove a subscriber, returning whether it was registered
    pub fn unregister_subscriber(&self, id: SubscriberId) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        gauge!("chatrelay.distributor.subscribers").set(subscribers.len() as f64);
        before != subscribers.len()
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the worker is still delivering
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.worker.is_finished()
    }

    /// Stop the worker. Lines still queued are dropped.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for MessageDistributor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageDistributor")
            .field("subscribers", &self.subscriber_count())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn collector() -> (Arc<dyn Subscriber>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber = CallbackSubscriber::new(move |line: &str| {
            let _ = tx.send(line.to_string());
        });
        (Arc::new(subscriber), rx)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for line")
            .expect("channel closed")
    }

    struct FailingSubscriber;

    #[async_trait]
    impl Subscriber for FailingSubscriber {
        async fn on_line(&self, _line: &str) -> Result<()> {
            Err(RelayError::Other("refused".to_string()))
        }
    }

    /// Reports each line it is handed, then waits for a permit
    struct GatedSubscriber {
        entered: mpsc::UnboundedSender<String>,
        gate: Arc<tokio::sync::Semaphore>,
    }

    #[async_trait]
    impl Subscriber for GatedSubscriber {
        async fn on_line(&self, line: &str) -> Result<()> {
            let _ = self.entered.send(line.to_string());
            let permit = self.gate.acquire().await;
            permit
                .map(|permit| permit.forget())
                .map_err(|_| RelayError::Other("gate closed".to_string()))
        }
    }

    struct PanickingSubscriber;

    #[async_trait]
    impl Subscriber for PanickingSubscriber {
        async fn on_line(&self, _line: &str) -> Result<()> {
            panic!("subscriber bug");
        }
    }

    #[tokio::test]
    async fn test_delivers_in_publish_order() {
        let distributor = MessageDistributor::new(CancellationToken::new());
        let (subscriber, mut rx) = collector();
        distributor.register_subscriber(subscriber);

        for n in 0..20 {
            distributor.publish(format!("line {n}")).unwrap();
        }
        for n in 0..20 {
            assert_eq!(recv(&mut rx).await, format!("line {n}"));
        }
    }

    #[tokio::test]
    async fn test_subscriber_sees_queued_lines_only() {
        let distributor = MessageDistributor::new(CancellationToken::new());
        let (entered, mut entered_rx) = mpsc::unbounded_channel();
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        distributor.register_subscriber(Arc::new(GatedSubscriber {
            entered,
            gate: gate.clone(),
        }));

        // The worker holds "one" while "two" waits in the queue.
        distributor.publish("one").unwrap();
        assert_eq!(recv(&mut entered_rx).await, "one");
        distributor.publish("two").unwrap();

        let (late, mut late_rx) = collector();
        distributor.register_subscriber(late);
        gate.add_permits(2);

        assert_eq!(recv(&mut late_rx).await, "two");
        assert_eq!(recv(&mut entered_rx).await, "two");
        assert!(late_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failing_subscribers_do_not_stop_delivery() {
        let distributor = MessageDistributor::new(CancellationToken::new());
        distributor.register_subscriber(Arc::new(FailingSubscriber));
        distributor.register_subscriber(Arc::new(PanickingSubscriber));
        let (subscriber, mut rx) = collector();
        distributor.register_subscriber(subscriber);

        distributor.publish("first").unwrap();
        distributor.publish("second").unwrap();
        assert_eq!(recv(&mut rx).await, "first");
        assert_eq!(recv(&mut rx).await, "second");
        assert!(distributor.is_running());
    }

    #[tokio::test]
    async fn test_unregister_subscriber() {
        let distributor = MessageDistributor::new(CancellationToken::new());
        let (first, mut first_rx) = collector();
        let (second, mut second_rx) = collector();
        let first_id = distributor.register_subscriber(first);
        distributor.register_subscriber(second);
        assert_eq!(distributor.subscriber_count(), 2);

        assert!(distributor.unregister_subscriber(first_id));
        assert!(!distributor.unregister_subscriber(first_id));
        distributor.publish("only second").unwrap();

        assert_eq!(recv(&mut second_rx).await, "only second");
        assert!(first_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_incoming() {
        let distributor = MessageDistributor::new(CancellationToken::new());
        let (subscriber, mut rx) = collector();
        distributor.register_subscriber(subscriber);

        distributor
            .publish_incoming(&Message::incoming("SERVER", "hello").to_string())
            .unwrap();
        assert_eq!(recv(&mut rx).await, "SERVER: hello");

        assert!(distributor.publish_incoming("/// DEBUG ///").is_err());
        assert!(distributor.publish_incoming("<< MESSAGE >>> <<<<broken").is_err());
    }

    #[tokio::test]
    async fn test_shutdown_stops_worker() {
        let cancel = CancellationToken::new();
        let distributor = MessageDistributor::new(cancel.clone());
        cancel.cancel();

        assert!(matches!(
            distributor.publish("late"),
            Err(RelayError::DistributorStopped)
        ));
        timeout(Duration::from_secs(1), async {
            while !distributor.worker.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(!distributor.is_running());
    }
}
