use serde::{Deserialize, Serialize};

/// When a refresh cycle is allowed to replace the visible aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishPolicy {
    /// Publish once every source has succeeded or failed.
    #[default]
    AllTerminal,
    /// Publish only once every source has succeeded. A single failure starves
    /// the cycle and the previous aggregate stays visible.
    AllSucceeded,
}

/// Terminal state of one refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CycleState {
    Published,
    PartiallyPublished { succeeded: usize, failed: usize },
    Starved { succeeded: usize, failed: usize },
}

/// Counts terminal outcomes for a cycle over a fixed number of sources and
/// reports the moment the publish condition is first met.
#[derive(Debug, Clone)]
pub struct PublishBarrier {
    policy: PublishPolicy,
    total: usize,
    succeeded: usize,
    failed: usize,
    released: bool,
}

impl PublishBarrier {
    pub fn new(policy: PublishPolicy, total: usize) -> Self {
        Self {
            policy,
            total,
            succeeded: 0,
            failed: 0,
            released: false,
        }
    }

    /// Records one terminal outcome. Returns `true` exactly once, on the
    /// outcome that satisfies the policy.
    pub fn record(&mut self, success: bool) -> bool {
        debug_assert!(
            self.terminal() < self.total,
            "more outcomes than sources in the cycle"
        );
        if success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.try_release()
    }

    /// Releases an empty cycle, which has no outcomes to record.
    pub fn release_if_empty(&mut self) -> bool {
        self.total == 0 && self.try_release()
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn terminal(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn state(&self) -> CycleState {
        let (succeeded, failed) = (self.succeeded, self.failed);
        if !self.released {
            CycleState::Starved { succeeded, failed }
        } else if failed == 0 {
            CycleState::Published
        } else {
            CycleState::PartiallyPublished { succeeded, failed }
        }
    }

    fn try_release(&mut self) -> bool {
        if self.released {
            return false;
        }
        let reached = match self.policy {
            PublishPolicy::AllTerminal => self.terminal() == self.total,
            PublishPolicy::AllSucceeded => self.succeeded == self.total,
        };
        self.released = reached;
        reached
    }
}
