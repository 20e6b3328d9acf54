//! Connectivity Monitor
//!
//! Tracks process-wide network reachability. Host integrations push
//! `online`/`offline` transitions through [`ConnectivityMonitor::set_network_status`];
//! the orchestrator subscribes and pauses or resumes sessions in bulk.
//!
//! [`ConnectivityMonitor::spawn_reachability_probe`] provides a heartbeat for
//! hosts without a native reachability signal: a TCP connect to the backend
//! every interval, `offline` after consecutive failures.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Consecutive probe failures before reporting offline
const PROBE_FAILURE_THRESHOLD: u32 = 2;

/// Per-probe connect timeout
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Network reachability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
    Online,
    Offline,
}

pub struct ConnectivityMonitor {
    tx: watch::Sender<NetworkStatus>,
}

impl ConnectivityMonitor {
    /// Create a monitor that starts online
    pub fn new() -> Self {
        let (tx, _) = watch::channel(NetworkStatus::Online);
        Self { tx }
    }

    /// Record a reachability change; returns true if the status changed
    pub fn set_network_status(&self, online: bool) -> bool {
        let next = if online {
            NetworkStatus::Online
        } else {
            NetworkStatus::Offline
        };
        let changed = self.tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            info!("Network status changed: {:?}", next);
        }
        changed
    }

    pub fn status(&self) -> NetworkStatus {
        *self.tx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.status() == NetworkStatus::Online
    }

    /// Receiver that wakes on every transition
    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.tx.subscribe()
    }

    /// Heartbeat `addr` (host:port) every `interval` and report reachability
    pub fn spawn_reachability_probe(
        self: &Arc<Self>,
        addr: String,
        interval: Duration,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut failures = 0u32;

            loop {
                ticker.tick().await;
                match tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(&addr)).await {
                    Ok(Ok(_)) => {
                        if failures > 0 {
                            debug!("Reachability probe to {} recovered", addr);
                        }
                        failures = 0;
                        monitor.set_network_status(true);
                    }
                    Ok(Err(e)) => {
                        failures += 1;
                        warn!("Reachability probe to {} failed ({}): {}", addr, failures, e);
                    }
                    Err(_) => {
                        failures += 1;
                        warn!("Reachability probe to {} timed out ({})", addr, failures);
                    }
                }

                if failures >= PROBE_FAILURE_THRESHOLD {
                    monitor.set_network_status(false);
                }
            }
        })
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        let monitor = ConnectivityMonitor::new();
        assert!(monitor.is_online());

        assert!(monitor.set_network_status(false));
        assert_eq!(monitor.status(), NetworkStatus::Offline);

        // Repeated signal is not a transition
        assert!(!monitor.set_network_status(false));

        assert!(monitor.set_network_status(true));
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn test_subscriber_sees_transition() {
        let monitor = ConnectivityMonitor::new();
        let mut rx = monitor.subscribe();

        monitor.set_network_status(false);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), NetworkStatus::Offline);
    }

    #[tokio::test]
    async fn test_probe_reports_offline_and_recovery() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Nothing listens here once dropped
        drop(listener);

        let monitor = Arc::new(ConnectivityMonitor::new());
        let probe = monitor.spawn_reachability_probe(addr.to_string(), Duration::from_millis(10));

        let mut rx = monitor.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == NetworkStatus::Offline))
            .await
            .unwrap()
            .unwrap();

        let _listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == NetworkStatus::Online))
            .await
            .unwrap()
            .unwrap();

        probe.abort();
    }
}
