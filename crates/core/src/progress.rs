//! Progress Reporter
//!
//! A write-only side channel the walk controller updates as it goes, so an
//! outside observer can render live status. The controller never reads back
//! what it writes.

use crate::journey::Hop;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Which half of the run is in progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    #[default]
    Exploring,
    GeneratingNarrative,
}

/// The latest known state of a run, as seen by an observer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub status: Phase,
    /// 1-based index of the hop being explored; 0 before the first hop.
    pub current_hop: usize,
    pub max_hops: usize,
    pub current_topic: String,
    pub journey: Vec<Hop>,
}

/// Observer interface invoked synchronously by the walk controller.
pub trait ProgressReporter: Send + Sync {
    fn set_max(&self, max_hops: usize);
    fn set_current_hop(&self, hop: usize);
    fn set_current_topic(&self, topic: &str);
    fn set_phase(&self, phase: Phase);
    fn append_hop(&self, hop: &Hop);
}

/// Publishes progress through a `tokio::sync::watch` channel.
///
/// Every write is visible to receivers as soon as it returns.
pub struct WatchProgress {
    tx: watch::Sender<ProgressSnapshot>,
}

impl WatchProgress {
    pub fn new() -> (Self, watch::Receiver<ProgressSnapshot>) {
        let (tx, rx) = watch::channel(ProgressSnapshot::default());
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tx.subscribe()
    }

    /// A copy of the current snapshot.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.tx.borrow().clone()
    }
}

impl ProgressReporter for WatchProgress {
    fn set_max(&self, max_hops: usize) {
        self.tx.send_modify(|s| s.max_hops = max_hops);
    }

    fn set_current_hop(&self, hop: usize) {
        self.tx.send_modify(|s| s.current_hop = hop);
    }

    fn set_current_topic(&self, topic: &str) {
        self.tx.send_modify(|s| s.current_topic = topic.to_string());
    }

    fn set_phase(&self, phase: Phase) {
        self.tx.send_modify(|s| s.status = phase);
    }

    fn append_hop(&self, hop: &Hop) {
        self.tx.send_modify(|s| s.journey.push(hop.clone()));
    }
}
