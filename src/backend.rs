use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::debug;

use crate::config::Config;

/// Last time a backend was confirmed online. `None` until the first successful probe.
#[derive(Debug, Default)]
struct Liveness {
    last_online: Mutex<Option<Instant>>,
}

/// Liveness cache with one guarded record per configured backend.
///
/// The set of names is fixed at construction; records are never added or removed,
/// so lookups need no outer lock and unrelated backends never contend.
#[derive(Debug, Clone, Default)]
pub struct BackendStates {
    records: Arc<HashMap<String, Liveness>>,
}

impl BackendStates {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let records = names
            .into_iter()
            .map(|name| (name.into(), Liveness::default()))
            .collect();
        Self {
            records: Arc::new(records),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.backends.keys().cloned())
    }

    pub fn is_recently_online(&self, name: &str, window: Duration) -> bool {
        self.is_recently_online_at(name, window, Instant::now())
    }

    pub fn mark_online(&self, name: &str) {
        self.mark_online_at(name, Instant::now());
    }

    fn is_recently_online_at(&self, name: &str, window: Duration, now: Instant) -> bool {
        let Some(record) = self.records.get(name) else {
            return false;
        };
        let last_online = *record.last_online.lock().unwrap_or_else(|e| e.into_inner());
        match last_online {
            Some(at) => now.saturating_duration_since(at) < window,
            None => false,
        }
    }

    fn mark_online_at(&self, name: &str, now: Instant) {
        let Some(record) = self.records.get(name) else {
            debug!("mark_online for unknown backend {}", name);
            return;
        };
        let mut last_online = record.last_online.lock().unwrap_or_else(|e| e.into_inner());
        // A slower racing update must not move the timestamp backward.
        *last_online = Some(match *last_online {
            Some(prev) if prev > now => prev,
            _ => now,
        });
    }

    #[cfg(test)]
    fn last_online(&self, name: &str) -> Option<Instant> {
        self.records
            .get(name)
            .and_then(|record| *record.last_online.lock().unwrap())
    }
}
