//! Session lifecycle state machine and the status projection the
//! surrounding UI watches.
//!
//! ```text
//! Idle ─▶ Initializing ─▶ Ready ─▶ Connecting ─▶ Active ─▶ Ending ─▶ Terminated
//!   │          │            │          │           │          │
//!   └──────────┴────────────┴──────────┴───────────┴──────────┴─▶ Failed
//! ```
//!
//! `Ready` and `Connecting` may also go straight to `Ending` (stop before the
//! conversation started); `Idle` and `Initializing` may be dropped straight
//! to `Terminated` on unmount.  `Terminated` and `Failed` are absorbing.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    /// Avatar pre-warm in progress.
    Initializing,
    /// Avatar is live; waiting for start.
    Ready,
    /// Waiting for admission or for the voice channel to come up.
    Connecting,
    /// Conversation running; events are bridged.
    Active,
    /// Ordered teardown and grace phases.
    Ending,
    Terminated,
    Failed,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Ending => "ending",
            SessionState::Terminated => "terminated",
            SessionState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Terminated | SessionState::Failed)
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }
        matches!(
            (self, next),
            (Idle, Initializing)
                | (Initializing, Ready)
                | (Ready, Connecting)
                | (Connecting, Active)
                | (Ready | Connecting | Active, Ending)
                | (Ending, Terminated)
                | (Idle | Initializing, Terminated)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// SessionStatus
// ---------------------------------------------------------------------------

/// Everything a presentation layer needs, published on a `watch` channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub is_connected: bool,
    /// Whether the avatar render target should be visible.
    pub show_video: bool,
    /// Seconds left on the countdown.
    pub time_remaining: u64,
    /// 1-based queue position while waiting for admission.
    pub queue_position: Option<usize>,
    /// Shown while ending ("Saving your pitch...").
    pub ending_message: Option<String>,
    /// Transient, time-limited error notice.
    pub notice: Option<String>,
    pub transcript_len: usize,
}

impl SessionStatus {
    pub fn new(duration_secs: u64) -> Self {
        Self {
            state: SessionState::Idle,
            is_connected: false,
            show_video: false,
            time_remaining: duration_secs,
            queue_position: None,
            ending_message: None,
            notice: None,
            transcript_len: 0,
        }
    }

    pub fn countdown(&self) -> String {
        format_countdown(self.time_remaining)
    }
}

/// `HH:MM:SS`, hours not capped.
pub fn format_countdown(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    const ALL: [SessionState; 8] = [
        Idle,
        Initializing,
        Ready,
        Connecting,
        Active,
        Ending,
        Terminated,
        Failed,
    ];

    #[test]
    fn happy_path_is_allowed() {
        let path = [Idle, Initializing, Ready, Connecting, Active, Ending, Terminated];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for next in ALL {
            assert!(!Terminated.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
    }

    #[test]
    fn failed_reachable_from_every_live_state() {
        for from in ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert!(from.can_transition_to(Failed), "{from} -> failed");
        }
    }

    #[test]
    fn cannot_skip_ahead() {
        assert!(!Idle.can_transition_to(Active));
        assert!(!Ready.can_transition_to(Active));
        assert!(!Active.can_transition_to(Terminated));
        assert!(!Active.can_transition_to(Connecting));
    }

    #[test]
    fn countdown_formats_hours_minutes_seconds() {
        assert_eq!(format_countdown(0), "00:00:00");
        assert_eq!(format_countdown(120), "00:02:00");
        assert_eq!(format_countdown(3_725), "01:02:05");
        assert_eq!(SessionStatus::new(59).countdown(), "00:00:59");
    }

    #[test]
    fn labels_are_lowercase() {
        assert_eq!(Connecting.to_string(), "connecting");
        assert_eq!(Terminated.label(), "terminated");
    }
}
