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


//! Eviction of sessions whose keep-alives stopped arriving

use crate::types::epoch_millis;
use crate::{Relay, ServerMetrics};
use chatrelay_protocol::consts::SERVER_SENDER;
use chatrelay_protocol::display_line;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Periodic liveness check over the session registry
///
/// Each pass compares every session's liveness mark against the wall clock.
/// A session silent for longer than the threshold is announced to everyone
/// as lost, removed from the registry and its transport closed. Passes run
/// with a fixed delay between them, so a slow pass never overlaps the next.
pub struct HeartbeatReaper {
    relay: Arc<Relay>,
    metrics: Arc<ServerMetrics>,
    interval: Duration,
    threshold: Duration,
}

impl HeartbeatReaper {
    /// Create a reaper
    pub fn new(
        relay: Arc<Relay>,
        metrics: Arc<ServerMetrics>,
        interval: Duration,
        threshold: Duration,
    ) -> Self {
        Self {
            relay,
            metrics,
            interval,
            threshold,
        }
    }

    /// Delay between passes
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Silence after which a session counts as lost
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Run one pass as of `now` (milliseconds since the Unix epoch)
    ///
    /// Returns the number of sessions evicted.
    pub async fn reap_once(&self, now: u64) -> usize {
        let threshold = self.threshold.as_millis() as u64;
        let stale: Vec<_> = self
            .relay
            .registry()
            .snapshot()
            .into_iter()
            .filter(|session| now.saturating_sub(session.last_liveness()) > threshold)
            .collect();

        let mut reaped = 0;
        for session in stale {
            let notice = format!("LOST connection to {}", session.name());
            if let Err(e) = self.relay.send_notice(&notice, None).await {
                warn!(session_id = %session.id(), error = %e, "Failed to announce lost session");
            }
            self.relay.publish(display_line(SERVER_SENDER, &notice));

            // A logoff may have raced this pass.
            let Some(removed) = self.relay.registry().delete(session.id()) else {
                continue;
            };
            removed.transport().close().await;
            self.metrics.session_reaped();
            counter!("chatrelay.sessions.reaped").increment(1);
            info!(
                session_id = %session.id(),
                name = session.name(),
                silent_ms = now.saturating_sub(session.last_liveness()),
                "Lost connection to session"
            );
            reaped += 1;
        }
        reaped
    }

    /// Run passes on their own task until `cancel` fires
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    async fn run(self, cancel: CancellationToken) {
        info!(
            interval = ?self.interval,
            threshold = ?self.threshold,
            "Heartbeat reaper started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
            let reaped = self.reap_once(epoch_millis()).await;
            if reaped > 0 {
                debug!(reaped, "Heartbeat pass finished");
            }
        }
        info!("Heartbeat reaper stopped");
    }
}

impl std::fmt::Debug for HeartbeatReaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatReaper")
            .field("interval", &self.interval)
            .field("threshold", &self.threshold)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::RecordingTransport;
    use crate::{CallbackSubscriber, MessageDistributor, SessionId, SessionRegistry, Transport};
    use chatrelay_protocol::Message;
    use tokio::sync::mpsc;

    const NOW: u64 = 1_000_000;

    fn reaper(threshold: Duration) -> (HeartbeatReaper, Arc<Relay>, Arc<ServerMetrics>) {
        let registry = Arc::new(SessionRegistry::new());
        let distributor = Arc::new(MessageDistributor::new(CancellationToken::new()));
        let metrics = Arc::new(ServerMetrics::new());
        let relay = Arc::new(Relay::new(
            registry,
            distributor,
            metrics.clone(),
            Duration::from_secs(1),
        ));
        let reaper = HeartbeatReaper::new(
            relay.clone(),
            metrics.clone(),
            Duration::from_millis(10),
            threshold,
        );
        (reaper, relay, metrics)
    }

    #[tokio::test]
    async fn test_reap_removes_stale_keeps_fresh() {
        let (reaper, relay, metrics) = reaper(Duration::from_secs(30));
        let stale = RecordingTransport::new(1);
        let fresh = RecordingTransport::new(2);
        let registry = relay.registry();
        assert!(registry.register_at(SessionId::from("u1"), "Alice", stale.clone(), NOW - 31_000));
        assert!(registry.register_at(SessionId::from("u2"), "Bob", fresh.clone(), NOW - 1_000));

        assert_eq!(reaper.reap_once(NOW).await, 1);

        assert!(!registry.contains_uuid(&SessionId::from("u1")));
        assert!(registry.contains_uuid(&SessionId::from("u2")));
        assert!(stale.is_closed());
        assert!(!fresh.is_closed());
        assert_eq!(metrics.snapshot().sessions_reaped, 1);

        let notice = Message::server_notice("LOST connection to Alice").to_string();
        assert_eq!(fresh.frames(), vec![notice]);
    }

    #[tokio::test]
    async fn test_reap_threshold_is_exclusive() {
        let (reaper, relay, _) = reaper(Duration::from_secs(30));
        let transport = RecordingTransport::new(1);
        let id = SessionId::from("u1");
        assert!(relay.registry().register_at(id.clone(), "Alice", transport, NOW - 30_000));

        assert_eq!(reaper.reap_once(NOW).await, 0);
        assert!(relay.registry().contains_uuid(&id));
    }

    #[tokio::test]
    async fn test_keep_alive_prevents_reaping() {
        let (reaper, relay, _) = reaper(Duration::from_secs(30));
        let transport = RecordingTransport::new(1);
        let id = SessionId::from("u1");
        assert!(relay.registry().register_at(id.clone(), "Alice", transport, NOW - 60_000));
        assert!(relay.registry().touch_liveness(&id, NOW - 5_000));

        assert_eq!(reaper.reap_once(NOW).await, 0);
    }

    #[tokio::test]
    async fn test_reap_publishes_line() {
        let (reaper, relay, _) = reaper(Duration::from_secs(30));
        let (tx, mut rx) = mpsc::unbounded_channel();
        relay
            .distributor()
            .register_subscriber(Arc::new(CallbackSubscriber::new(move |line: &str| {
                let _ = tx.send(line.to_string());
            })));
        relay.registry().register_at(
            SessionId::from("u1"),
            "Alice",
            RecordingTransport::new(1),
            NOW - 31_000,
        );

        reaper.reap_once(NOW).await;
        assert_eq!(
            rx.recv().await.as_deref(),
            Some("SERVER: LOST connection to Alice")
        );
    }

    #[tokio::test]
    async fn test_spawned_reaper_stops_on_cancel() {
        let (reaper, relay, _) = reaper(Duration::from_millis(1));
        relay
            .registry()
            .register_at(SessionId::from("u1"), "Alice", RecordingTransport::new(1), 0);

        let cancel = CancellationToken::new();
        let handle = reaper.spawn(cancel.clone());
        tokio::time::timeout(Duration::from_secs(2), async {
            while !relay.registry().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
