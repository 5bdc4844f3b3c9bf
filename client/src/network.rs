//! Network-state observer.
//!
//! Two states, no debouncing: every transition is delivered, and rapid
//! flapping produces repeated flush attempts that the coordinator's
//! reentrancy guard absorbs.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    Online,
    Offline,
}

impl NetworkState {
    pub fn is_online(self) -> bool {
        self == NetworkState::Online
    }
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkState::Online => f.write_str("online"),
            NetworkState::Offline => f.write_str("offline"),
        }
    }
}

/// Publishes reachability transitions. Clones share the same state.
#[derive(Debug, Clone)]
pub struct NetworkObserver {
    tx: Arc<watch::Sender<NetworkState>>,
}

impl NetworkObserver {
    pub fn new(initial: NetworkState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> NetworkState {
        *self.tx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.current().is_online()
    }

    /// Record the observed state. Returns `true` on a transition.
    pub fn set(&self, state: NetworkState) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            tracing::info!(state = %state, "network state changed");
        }
        changed
    }

    pub fn set_online(&self) -> bool {
        self.set(NetworkState::Online)
    }

    pub fn set_offline(&self) -> bool {
        self.set(NetworkState::Offline)
    }

    /// A receiver that wakes on every transition.
    pub fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.tx.subscribe()
    }

    /// Poll `{base_url}/health` and feed the result into this observer.
    ///
    /// Any successful response counts as online; errors and non-2xx
    /// statuses count as offline.
    pub fn spawn_health_probe(
        &self,
        client: reqwest::Client,
        base_url: &str,
        every: Duration,
    ) -> JoinHandle<()> {
        let observer = self.clone();
        let url = format!("{}/health", base_url.trim_end_matches('/'));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let reachable = match client.get(&url).timeout(every).send().await {
                    Ok(resp) => resp.status().is_success(),
                    Err(e) => {
                        tracing::debug!(error = %e, url = %url, "health probe failed");
                        false
                    }
                };
                observer.set(if reachable {
                    NetworkState::Online
                } else {
                    NetworkState::Offline
                });
            }
        })
    }
}

impl Default for NetworkObserver {
    fn default() -> Self {
        Self::new(NetworkState::Offline)
    }
}
