//! Adaptive Tutor Session Engine
//!
//! Acquires problems from a generation service, runs the guided step
//! dialogue (Assist) or grades free-form answers (Solo), and keeps the
//! per-learner history that steers the next problem. Remote calls go through
//! a retrying client; an offline problem bank takes over when the service
//! is unreachable.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod mode;
pub mod offline;
pub mod orchestrator;
pub mod session;
pub mod step;
pub mod subjects;
pub mod wire;

pub use client::{
    HttpTransport, Method, Operation, RawResponse, ResilientClient, RetryPolicy, Sleeper,
    TokioSleeper, Transport, TransportError,
};
pub use config::{Config, RetrySettings, SoloGrading, CONFIG_FILE_NAME};
pub use error::{FailureKind, RecoveryAction, Result, TutorError};
pub use events::{EventBroadcaster, SessionEvent};
pub use gateway::{HttpGateway, Selection, ServiceMode, ServiceSelector, TutorGateway};
pub use mode::{Mode, ModeArbiter, ToggleOutcome, MODE_LOCKED_REASON};
pub use offline::{OfflineGateway, OFFLINE_SUBJECT_ID};
pub use orchestrator::{Completion, FetchState, SessionOrchestrator, SessionSnapshot, TurnOutcome};
pub use session::{ConversationStep, PastProblem, Session, SessionStore, MAX_SCORE, MIN_SCORE};
pub use step::{ActiveStep, StepController, StepPhase, StepResult};
pub use subjects::SubjectCatalog;
pub use wire::{CreatedSubject, GeneratedProblem, Grade, NewSubject, Subject};
