//! History tracking flags.
//!
//! Two independent flags per session: `excess` (history passed the configured
//! length; never cleared) and the error latch (an error surfaced in the current
//! computed state; cleared once a later current state is error-free).

/// Excess flag and error latch of one bridge session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryTracker {
    excess: bool,
    error_latched: bool,
}

impl HistoryTracker {
    /// Both flags cleared.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            excess: false,
            error_latched: false,
        }
    }

    /// True once history reached the configured bound in this session.
    #[must_use]
    pub const fn is_excess(&self) -> bool {
        self.excess
    }

    /// True while an error is latched.
    #[must_use]
    pub const fn is_error_latched(&self) -> bool {
        self.error_latched
    }

    /// Records the staged length after an ACTION relay.
    ///
    /// Only ever sets the flag; a shorter history later does not clear it.
    pub fn observe_length(&mut self, staged: usize, max_age: Option<usize>) -> bool {
        if !self.excess {
            if let Some(max) = max_age.filter(|max| *max > 0) {
                self.excess = staged >= max;
            }
        }
        self.excess
    }

    /// Latches an error.
    pub fn latch_error(&mut self) {
        self.error_latched = true;
    }

    /// Clears the latch when the current computed state is error-free.
    ///
    /// Returns true if the latch was cleared by this call.
    pub fn reconcile_error(&mut self, current_has_error: bool) -> bool {
        if self.error_latched && !current_has_error {
            self.error_latched = false;
            return true;
        }
        false
    }
}
