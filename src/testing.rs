//! Recording fakes for the probe and wake seams.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::health_check::Prober;
use crate::wake::{WakeError, Waker};

/// Answers probes from a fixed table (unknown URLs are down) and records every call.
#[derive(Default)]
pub struct FakeProber {
    healthy: HashMap<String, bool>,
    calls: Mutex<Vec<String>>,
}

impl FakeProber {
    pub fn with(entries: &[(&str, bool)]) -> Arc<Self> {
        Arc::new(Self {
            healthy: entries
                .iter()
                .map(|(url, up)| (url.to_string(), *up))
                .collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, url: &str) -> usize {
        self.calls().iter().filter(|u| u.as_str() == url).count()
    }
}

#[async_trait]
impl Prober for FakeProber {
    async fn probe(&self, url: &str) -> bool {
        self.calls.lock().unwrap().push(url.to_string());
        self.healthy.get(url).copied().unwrap_or(false)
    }
}

#[derive(Default)]
pub struct FakeWaker {
    fail_for: Option<String>,
    calls: Mutex<Vec<(String, String, u16)>>,
}

impl FakeWaker {
    pub fn failing_for(mac: &str) -> Arc<Self> {
        Arc::new(Self {
            fail_for: Some(mac.to_string()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<(String, String, u16)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Waker for FakeWaker {
    async fn wake(&self, mac: &str, broadcast: &str, port: u16) -> Result<(), WakeError> {
        self.calls
            .lock()
            .unwrap()
            .push((mac.to_string(), broadcast.to_string(), port));
        if self.fail_for.as_deref() == Some(mac) {
            return Err(WakeError::InvalidAddress(mac.to_string()));
        }
        Ok(())
    }
}
