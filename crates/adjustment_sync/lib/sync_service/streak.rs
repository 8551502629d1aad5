/// What the scheduler should do after recording one cycle outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakAction {
    /// The cycle succeeded; the streak is over and alerting is re-armed.
    Reset,
    /// The streak grew but no alert is due.
    Continue { consecutive: u32 },
    /// The streak crossed the threshold and no alert has been delivered for it yet.
    Alert { consecutive: u32 },
}

/// Process-local consecutive-failure counter with a one-shot alert latch.
///
/// The latch is only disarmed by [`FailureStreak::alert_delivered`], so a failed delivery is
/// retried on the next failing cycle.
#[derive(Debug, Clone)]
pub struct FailureStreak {
    max_failures: u32,
    consecutive: u32,
    alert_armed: bool,
}

impl FailureStreak {
    pub fn new(max_failures: u32) -> Self {
        Self {
            max_failures,
            consecutive: 0,
            alert_armed: true,
        }
    }

    pub fn record(&mut self, failed: bool) -> StreakAction {
        if !failed {
            self.consecutive = 0;
            self.alert_armed = true;
            return StreakAction::Reset;
        }

        self.consecutive = self.consecutive.saturating_add(1);
        if self.consecutive > self.max_failures && self.alert_armed {
            StreakAction::Alert {
                consecutive: self.consecutive,
            }
        } else {
            StreakAction::Continue {
                consecutive: self.consecutive,
            }
        }
    }

    pub fn alert_delivered(&mut self) {
        self.alert_armed = false;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}
