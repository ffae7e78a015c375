//! Session events for observers of a running session.
//!
//! The orchestrator publishes a `SessionEvent` after every state change that
//! a presentation layer may want to render. Events are delivered over a
//! tokio broadcast channel and are not kept for late subscribers.
//!
//! # Event Types
//!
//! - `problem_ready` - A new problem was acquired
//! - `step_ready` - An Assist step is waiting for an answer
//! - `step_recorded` - An answer was added to the transcript
//! - `session_complete` - The problem was graded
//! - `mode_changed` / `mode_rejected` - Result of a mode toggle
//! - `degraded_mode` - The session switched to the offline bank
//! - `error` - A remote call or transition failed

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::TutorError;
use crate::mode::Mode;

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for `problem_ready`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemReadyPayload {
    /// Problem statement.
    pub problem_text: String,
    /// Difficulty level.
    pub level: u32,
}

/// Payload for `step_ready`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReadyPayload {
    /// 1-based step index.
    pub index: u32,
    /// Prompt to show.
    pub prompt: String,
}

/// Payload for `step_recorded`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecordedPayload {
    /// Index of the recorded step.
    pub index: u32,
    /// Transcript length after recording.
    pub transcript_len: usize,
}

/// Payload for `session_complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCompletePayload {
    /// Score in `[0, 10]`.
    pub score: f64,
    /// Grader remarks.
    pub remarks: Vec<String>,
    /// Optional tip.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tip: Option<String>,
}

/// Payload for `mode_changed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeChangedPayload {
    /// The new mode.
    pub mode: Mode,
}

/// Payload for `mode_rejected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeRejectedPayload {
    /// Learner-facing reason.
    pub reason: String,
}

/// Payload for `degraded_mode`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedModePayload {
    /// Why the session went offline.
    pub reason: String,
}

/// Payload for `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Learner-facing message.
    pub message: String,
    /// Failure classification.
    pub kind: String,
}

// ============================================================================
// Event Enum
// ============================================================================

/// Events published by the session orchestrator.
///
/// Serialized as JSON objects with "event" and "payload" fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A new problem was acquired.
    ProblemReady(ProblemReadyPayload),
    /// An Assist step is waiting for an answer.
    StepReady(StepReadyPayload),
    /// An answer was added to the transcript.
    StepRecorded(StepRecordedPayload),
    /// The problem was graded.
    SessionComplete(SessionCompletePayload),
    /// The mode changed.
    ModeChanged(ModeChangedPayload),
    /// A mode change was refused.
    ModeRejected(ModeRejectedPayload),
    /// The session switched to the offline bank.
    DegradedMode(DegradedModePayload),
    /// A remote call or transition failed.
    Error(ErrorPayload),
}

impl SessionEvent {
    /// Creates a `ProblemReady` event.
    #[must_use]
    pub fn problem_ready(problem_text: impl Into<String>, level: u32) -> Self {
        Self::ProblemReady(ProblemReadyPayload {
            problem_text: problem_text.into(),
            level,
        })
    }

    /// Creates a `StepReady` event.
    #[must_use]
    pub fn step_ready(index: u32, prompt: impl Into<String>) -> Self {
        Self::StepReady(StepReadyPayload {
            index,
            prompt: prompt.into(),
        })
    }

    /// Creates a `StepRecorded` event.
    #[must_use]
    pub const fn step_recorded(index: u32, transcript_len: usize) -> Self {
        Self::StepRecorded(StepRecordedPayload {
            index,
            transcript_len,
        })
    }

    /// Creates a `SessionComplete` event.
    #[must_use]
    pub const fn session_complete(score: f64, remarks: Vec<String>, tip: Option<String>) -> Self {
        Self::SessionComplete(SessionCompletePayload { score, remarks, tip })
    }

    /// Creates a `ModeChanged` event.
    #[must_use]
    pub const fn mode_changed(mode: Mode) -> Self {
        Self::ModeChanged(ModeChangedPayload { mode })
    }

    /// Creates a `ModeRejected` event.
    #[must_use]
    pub fn mode_rejected(reason: impl Into<String>) -> Self {
        Self::ModeRejected(ModeRejectedPayload {
            reason: reason.into(),
        })
    }

    /// Creates a `DegradedMode` event.
    #[must_use]
    pub fn degraded_mode(reason: impl Into<String>) -> Self {
        Self::DegradedMode(DegradedModePayload {
            reason: reason.into(),
        })
    }

    /// Creates an `Error` event from an engine error.
    #[must_use]
    pub fn error(err: &TutorError) -> Self {
        Self::Error(ErrorPayload {
            message: err.user_message().to_string(),
            kind: err.kind().to_string(),
        })
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::ProblemReady(_) => "problem_ready",
            Self::StepReady(_) => "step_ready",
            Self::StepRecorded(_) => "step_recorded",
            Self::SessionComplete(_) => "session_complete",
            Self::ModeChanged(_) => "mode_changed",
            Self::ModeRejected(_) => "mode_rejected",
            Self::DegradedMode(_) => "degraded_mode",
            Self::Error(_) => "error",
        }
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Broadcasts session events to all subscribers.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBroadcaster {
    /// Creates a broadcaster; `capacity` events are buffered per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new subscriber.
    ///
    /// A subscriber that falls behind receives `Lagged` and misses events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Sends an event and returns how many subscribers will receive it.
    pub fn send(&self, event: SessionEvent) -> usize {
        // Err only means nobody is subscribed
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_shape() {
        let event = SessionEvent::step_ready(2, "divide by 2");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "step_ready");
        assert_eq!(json["payload"]["index"], 2);
        assert_eq!(json["payload"]["prompt"], "divide by 2");

        let event = SessionEvent::session_complete(8.0, vec!["sign error".into()], None);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "session_complete");
        assert!(json["payload"].get("tip").is_none());
    }

    #[test]
    fn test_event_names_match_serialized_tags() {
        let events = [
            SessionEvent::problem_ready("q", 1),
            SessionEvent::step_ready(1, "p"),
            SessionEvent::step_recorded(1, 1),
            SessionEvent::session_complete(1.0, vec![], None),
            SessionEvent::mode_changed(Mode::Assist),
            SessionEvent::mode_rejected("r"),
            SessionEvent::degraded_mode("d"),
            SessionEvent::error(&TutorError::api(503, "busy")),
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["event"], event.event_name());
        }
    }

    #[test]
    fn test_error_event_uses_user_message() {
        let event = SessionEvent::error(&TutorError::network("refused", 4));
        match event {
            SessionEvent::Error(payload) => {
                assert!(payload.message.contains("Unable to connect"));
                assert_eq!(payload.kind, "transient");
            }
            other => unreachable!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_send_without_subscribers() {
        let broadcaster = EventBroadcaster::default();
        assert_eq!(broadcaster.receiver_count(), 0);
        assert_eq!(broadcaster.send(SessionEvent::degraded_mode("offline")), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let broadcaster = EventBroadcaster::new(8);
        let mut first = broadcaster.subscribe();
        let mut second = broadcaster.subscribe();

        assert_eq!(broadcaster.send(SessionEvent::mode_changed(Mode::Solo)), 2);
        assert_eq!(first.recv().await.unwrap(), SessionEvent::mode_changed(Mode::Solo));
        assert_eq!(second.recv().await.unwrap().event_name(), "mode_changed");
    }
}
