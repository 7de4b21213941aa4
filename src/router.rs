//! Per-request routing decision.
//!
//! For every request whose host matches the configured keyword, each backend is
//! checked (cache first, then a probe) and woken if it is down and the request is
//! not excluded. The primary destination is then probed fresh to decide whether
//! the request can be forwarded.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::backend::BackendStates;
use crate::config::Config;
use crate::exclusion::permits_wake;
use crate::health_check::Prober;
use crate::wake::Waker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// Host does not contain the keyword; nothing was probed.
    Reject,
    /// Primary destination failed its probe.
    Unavailable,
    /// Primary destination is healthy; proxy the request.
    Forward,
}

pub struct Router {
    config: Arc<Config>,
    states: BackendStates,
    prober: Arc<dyn Prober>,
    waker: Arc<dyn Waker>,
    cache_window: Duration,
}

impl Router {
    pub fn new(
        config: Arc<Config>,
        states: BackendStates,
        prober: Arc<dyn Prober>,
        waker: Arc<dyn Waker>,
    ) -> Self {
        let cache_window = config.cache_window();
        Self {
            config,
            states,
            prober,
            waker,
            cache_window,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn route(&self, host: &str, path: &str) -> RouteDecision {
        if !host.contains(self.config.general.main_host_keyword.as_str()) {
            return RouteDecision::Reject;
        }

        self.sweep_backends(host, path).await;

        // Deliberately uncached, even if the primary is also listed as a backend.
        if self.prober.probe(&self.config.general.destination).await {
            RouteDecision::Forward
        } else {
            warn!(
                "Destination {} is down, answering 503",
                self.config.general.destination
            );
            RouteDecision::Unavailable
        }
    }

    async fn sweep_backends(&self, host: &str, path: &str) {
        for (name, backend) in &self.config.backends {
            let up = if self.states.is_recently_online(name, self.cache_window) {
                true
            } else if self.prober.probe(&backend.destination).await {
                self.states.mark_online(name);
                true
            } else {
                false
            };

            if up || !permits_wake(backend, host, path) {
                continue;
            }

            info!("⏰ Backend {} down -> sending WoL to {}", name, backend.mac_address);
            if let Err(e) = self
                .waker
                .wake(&backend.mac_address, &backend.broadcast_ip, backend.wol_port)
                .await
            {
                warn!("WoL for backend {} failed: {}", name, e);
            }
        }
    }
}
