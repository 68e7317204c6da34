//! Reusable test helpers for link and navigation integration tests.
//!
//! The scripted relay hands the far end of every accepted connection to the
//! test, so tests can read what the link wrote, push frames at it, or close
//! the connection by dropping the pushing side.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use saferoute_core::link::{LinkError, LinkResult, RelaySocket, RelayTransport};
use saferoute_core::location::{Coordinates, LocalFix, PeerSample};
use tokio::sync::mpsc;

/// What the scripted relay does with the next open request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Open {
    /// Accept the connection.
    Accept,
    /// Refuse immediately.
    Refuse,
    /// Never answer.
    Hang,
}

/// The relay's side of one accepted connection.
pub struct RelayEnd {
    /// Lines written by the link.
    pub sent: mpsc::UnboundedReceiver<String>,
    /// Pushes lines to the link. Dropping it closes the connection.
    pub push: mpsc::UnboundedSender<String>,
}

impl RelayEnd {
    /// Drains everything written so far.
    pub fn drain(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = self.sent.try_recv() {
            lines.push(line);
        }
        lines
    }
}

/// In-memory relay following a script of open outcomes.
///
/// Once the script runs out every request is accepted.
#[derive(Default)]
pub struct ScriptedRelay {
    script: Mutex<VecDeque<Open>>,
    ends: Mutex<VecDeque<RelayEnd>>,
    opens: AtomicUsize,
}

impl ScriptedRelay {
    /// Creates a relay that follows `script`.
    pub fn with_script(script: &[Open]) -> Self {
        Self {
            script: Mutex::new(script.iter().copied().collect()),
            ..Self::default()
        }
    }

    /// Appends outcomes to the script.
    pub fn push_script(&self, outcomes: &[Open]) {
        self.script.lock().extend(outcomes.iter().copied());
    }

    /// Number of open requests so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Takes the oldest accepted connection not yet taken.
    pub fn take_end(&self) -> RelayEnd {
        self.ends
            .lock()
            .pop_front()
            .expect("no accepted relay connection")
    }
}

#[async_trait]
impl RelayTransport for ScriptedRelay {
    async fn open(&self, endpoint: &str) -> LinkResult<RelaySocket> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().pop_front().unwrap_or(Open::Accept);
        match next {
            Open::Accept => {
                let (outbound, sent) = mpsc::unbounded_channel();
                let (push, inbound) = mpsc::unbounded_channel();
                self.ends.lock().push_back(RelayEnd { sent, push });
                Ok(RelaySocket { outbound, inbound })
            }
            Open::Refuse => Err(LinkError::Connection {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            }),
            Open::Hang => std::future::pending().await,
        }
    }
}

/// A complete sample.
pub fn sample(device_id: &str, heading: f64, latitude: f64, longitude: f64, timestamp_ms: i64) -> PeerSample {
    PeerSample {
        device_id: device_id.to_string(),
        heading: Some(heading),
        latitude: Some(latitude),
        longitude: Some(longitude),
        timestamp_ms,
    }
}

/// A complete local fix.
pub fn fix(heading: f64, latitude: f64, longitude: f64) -> LocalFix {
    LocalFix::new(Some(heading), Coordinates::new(latitude, longitude))
}

/// Turns on debug logging for the test binary. Safe to call repeatedly.
pub fn init_logging() {
    let _ = saferoute_core::logging::init("saferoute_core=debug");
}
