//! Session lifecycle coordination.
//!
//! `SessionOrchestrator` composes the store, the step controller and the mode
//! arbiter behind one async mutex. Every operation follows the same shape:
//!
//! 1. lock, check guards, move to the in-flight state, take a `Ticket`
//! 2. unlock and call the gateway
//! 3. lock again and apply the result if the ticket's epoch is still current
//!
//! The epoch is bumped on every new-problem request and on a switch to the
//! offline bank, so results that arrive for a superseded problem are dropped.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::{Config, SoloGrading};
use crate::error::{Result, TutorError};
use crate::events::{EventBroadcaster, SessionEvent};
use crate::gateway::{ServiceMode, TutorGateway};
use crate::mode::{Mode, ModeArbiter, ToggleOutcome};
use crate::offline::OfflineGateway;
use crate::session::{ConversationStep, PastProblem, SessionStore};
use crate::step::{ActiveStep, StepController, StepPhase, StepResult};

// ============================================================================
// Public types
// ============================================================================

/// Progress of a guarded remote operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchState {
    /// Not requested, or the last request failed.
    #[default]
    Idle,
    /// A request is outstanding.
    Fetching,
    /// The request succeeded.
    Ready,
}

/// Grade and feedback for a finished problem.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completion {
    /// Score in `[0, 10]`.
    pub score: f64,
    /// Grader remarks.
    pub remarks: Vec<String>,
    /// Optional tip.
    pub tip: Option<String>,
}

/// What an orchestrator operation produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Nothing was requested: the operation was already in flight or the
    /// session state did not call for it.
    Skipped,
    /// The result belonged to a superseded problem and was dropped.
    Stale,
    /// A problem is ready.
    Problem {
        /// Problem statement.
        problem_text: String,
        /// Difficulty level.
        level: u32,
    },
    /// A step is waiting for the learner's answer.
    Step(ActiveStep),
    /// The problem was graded.
    Completed(Completion),
    /// A solo answer was not final; the service sent guidance instead.
    Hint(String),
}

/// Point-in-time copy of the session for display.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Current problem, if any.
    pub problem_text: Option<String>,
    /// Difficulty level.
    pub level: u32,
    /// Active mode.
    pub mode: Mode,
    /// Assist dialogue phase.
    pub phase: StepPhase,
    /// Step waiting for an answer.
    pub active_step: Option<ActiveStep>,
    /// Submitted steps.
    pub transcript: Vec<ConversationStep>,
    /// Completed problems.
    pub history: Vec<PastProblem>,
    /// Whether the current problem is graded.
    pub complete: bool,
    /// Grade of the current problem, once complete.
    pub completion: Option<Completion>,
    /// Online or offline.
    pub service_mode: ServiceMode,
    /// Problem acquisition state.
    pub problem_fetch: FetchState,
    /// Solo grading state.
    pub grading: FetchState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingRetry {
    Problem,
    NextStep,
    SoloAnswer(String),
}

struct Ticket {
    epoch: u64,
    problem_text: String,
    transcript: Vec<ConversationStep>,
    mode: Mode,
    gateway: Arc<dyn TutorGateway>,
}

struct Inner {
    store: SessionStore,
    controller: StepController,
    arbiter: ModeArbiter,
    problem_fetch: FetchState,
    grading: FetchState,
    epoch: u64,
    gateway: Arc<dyn TutorGateway>,
    service_mode: ServiceMode,
    completion: Option<Completion>,
    pending_retry: Option<PendingRetry>,
}

impl Inner {
    fn ticket(&self) -> Ticket {
        Ticket {
            epoch: self.epoch,
            problem_text: self.store.current_problem().unwrap_or_default().to_string(),
            transcript: self.store.transcript().to_vec(),
            mode: self.arbiter.mode(),
            gateway: Arc::clone(&self.gateway),
        }
    }

    fn has_problem(&self) -> bool {
        self.problem_fetch == FetchState::Ready && self.store.current_problem().is_some()
    }

    fn has_open_problem(&self) -> bool {
        self.has_problem() && !self.store.is_complete()
    }

    fn require_open_problem(&self) -> Result<()> {
        if !self.has_problem() {
            return Err(TutorError::invariant("no problem is ready"));
        }
        if self.store.is_complete() {
            return Err(TutorError::invariant(
                "the problem is complete; start a new problem",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SessionOrchestrator
// ============================================================================

/// Drives one learner's sessions against a gateway.
pub struct SessionOrchestrator {
    user_id: String,
    subject_id: String,
    solo_grading: SoloGrading,
    offline_fallback: bool,
    events: EventBroadcaster,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for SessionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOrchestrator")
            .field("user_id", &self.user_id)
            .field("subject_id", &self.subject_id)
            .field("solo_grading", &self.solo_grading)
            .finish_non_exhaustive()
    }
}

impl SessionOrchestrator {
    /// Creates an orchestrator in Solo mode with steps-based solo grading.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn TutorGateway>,
        user_id: impl Into<String>,
        subject_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            subject_id: subject_id.into(),
            solo_grading: SoloGrading::default(),
            offline_fallback: true,
            events: EventBroadcaster::default(),
            inner: Mutex::new(Inner {
                store: SessionStore::new(),
                controller: StepController::new(),
                arbiter: ModeArbiter::default(),
                problem_fetch: FetchState::Idle,
                grading: FetchState::Idle,
                epoch: 0,
                gateway,
                service_mode: ServiceMode::Online,
                completion: None,
                pending_retry: None,
            }),
        }
    }

    /// Applies the mode, grading and fallback settings from `config`.
    #[must_use]
    pub fn with_config(self, config: &Config) -> Self {
        self.with_mode(config.default_mode)
            .with_solo_grading(config.solo_grading)
            .with_offline_fallback(config.offline_fallback)
    }

    /// Sets the starting mode.
    #[must_use]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.inner.get_mut().arbiter = ModeArbiter::new(mode);
        self
    }

    /// Sets how solo answers are graded.
    #[must_use]
    pub fn with_solo_grading(mut self, solo_grading: SoloGrading) -> Self {
        self.solo_grading = solo_grading;
        self
    }

    /// Allows or forbids switching to the offline bank.
    #[must_use]
    pub fn with_offline_fallback(mut self, allowed: bool) -> Self {
        self.offline_fallback = allowed;
        self
    }

    /// Records whether the gateway is the remote service or the offline bank.
    #[must_use]
    pub fn with_service_mode(mut self, service_mode: ServiceMode) -> Self {
        self.inner.get_mut().service_mode = service_mode;
        self
    }

    /// Publishes events on an existing broadcaster.
    #[must_use]
    pub fn with_events(mut self, events: EventBroadcaster) -> Self {
        self.events = events;
        self
    }

    /// Subscribes to session events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// The learner this orchestrator serves.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The subject problems are generated for.
    #[must_use]
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// The gateway currently in use.
    pub async fn gateway(&self) -> Arc<dyn TutorGateway> {
        Arc::clone(&self.lock().await.gateway)
    }

    /// Copies the current session state.
    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.lock().await;
        let session = inner.store.session();
        SessionSnapshot {
            problem_text: session.current_problem.clone(),
            level: session.level,
            mode: inner.arbiter.mode(),
            phase: inner.controller.phase(),
            active_step: inner.controller.active_step().cloned(),
            transcript: session.transcript.clone(),
            history: session.history.clone(),
            complete: session.complete,
            completion: inner.completion.clone(),
            service_mode: inner.service_mode,
            problem_fetch: inner.problem_fetch,
            grading: inner.grading,
        }
    }

    async fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().await
    }

    fn emit(&self, event: SessionEvent) {
        self.events.send(event);
    }

    fn emit_error(&self, err: &TutorError) {
        self.emit(SessionEvent::error(err));
    }

    // ------------------------------------------------------------------------
    // Problem acquisition
    // ------------------------------------------------------------------------

    /// Makes sure a problem exists, fetching one only if none is ready or in
    /// flight.
    pub async fn ensure_problem(&self) -> Result<TurnOutcome> {
        self.fetch_problem(false).await
    }

    /// Requests a new problem. Transcript and completion reset when it
    /// arrives; history is kept.
    pub async fn start_new_problem(&self) -> Result<TurnOutcome> {
        self.fetch_problem(true).await
    }

    async fn fetch_problem(&self, force: bool) -> Result<TurnOutcome> {
        let (ticket, recent) = {
            let mut inner = self.lock().await;
            match inner.problem_fetch {
                FetchState::Fetching => {
                    debug!("Problem fetch already in flight");
                    return Ok(TurnOutcome::Skipped);
                }
                FetchState::Ready if !force => {
                    return Ok(TurnOutcome::Problem {
                        problem_text: inner.store.current_problem().unwrap_or_default().to_string(),
                        level: inner.store.session().level,
                    });
                }
                FetchState::Ready | FetchState::Idle => {}
            }
            inner.epoch += 1;
            inner.problem_fetch = FetchState::Fetching;
            inner.grading = FetchState::Idle;
            inner.controller.reset();
            inner.arbiter.new_problem();
            inner.pending_retry = None;
            (inner.ticket(), inner.store.last_completed().cloned())
        };

        info!(
            epoch = ticket.epoch,
            gateway = ticket.gateway.name(),
            "Requesting problem"
        );
        let result = ticket
            .gateway
            .generate_problem(&self.user_id, &self.subject_id, recent.as_ref())
            .await;

        let mut inner = self.lock().await;
        if inner.epoch != ticket.epoch {
            debug!(epoch = ticket.epoch, current = inner.epoch, "Discarding stale problem");
            return Ok(TurnOutcome::Stale);
        }
        match result {
            Ok(problem) => {
                inner.store.start(problem.problem_text.clone(), problem.level);
                inner.problem_fetch = FetchState::Ready;
                inner.completion = None;
                self.emit(SessionEvent::problem_ready(&problem.problem_text, problem.level));
                Ok(TurnOutcome::Problem {
                    problem_text: problem.problem_text,
                    level: problem.level,
                })
            }
            Err(err) => {
                warn!(error = %err, "Problem request failed");
                inner.problem_fetch = FetchState::Idle;
                inner.pending_retry = Some(PendingRetry::Problem);
                self.emit_error(&err);
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Assist dialogue
    // ------------------------------------------------------------------------

    /// Requests the first Assist step if the dialogue has not started.
    ///
    /// Calls made while the request is outstanding are no-ops. If a step is
    /// already showing it is returned without a request.
    pub async fn ensure_first_step(&self) -> Result<TurnOutcome> {
        let ticket = {
            let mut inner = self.lock().await;
            if inner.arbiter.mode() != Mode::Assist || !inner.has_open_problem() {
                return Ok(TurnOutcome::Skipped);
            }
            if let Some(step) = inner.controller.active_step() {
                return Ok(TurnOutcome::Step(step.clone()));
            }
            let transcript_len = inner.store.transcript().len();
            if !inner.controller.begin_first_step(transcript_len) {
                return Ok(TurnOutcome::Skipped);
            }
            inner.ticket()
        };
        self.fetch_step(ticket).await
    }

    /// Records the answer to the active step and requests the next one.
    ///
    /// The step leaves "active" before the request is sent. If the request
    /// fails the answer stays recorded; use `retry` rather than answering
    /// again.
    pub async fn submit_step_answer(&self, answer: &str) -> Result<TurnOutcome> {
        let ticket = {
            let mut inner = self.lock().await;
            inner.require_open_problem()?;
            if inner.arbiter.mode() != Mode::Assist {
                return Err(TutorError::invariant("step answers require Assist mode"));
            }
            let step = inner.controller.submit(answer)?;
            let index = step.index;
            if let Err(err) = inner.store.append_step(step) {
                inner.controller.fail();
                return Err(err);
            }
            inner.pending_retry = None;
            self.emit(SessionEvent::step_recorded(index, inner.store.transcript().len()));
            inner.ticket()
        };
        self.fetch_step(ticket).await
    }

    /// Re-requests the next Assist step after a failed request.
    pub async fn retry_next_step(&self) -> Result<TurnOutcome> {
        let ticket = {
            let mut inner = self.lock().await;
            inner.require_open_problem()?;
            if inner.arbiter.mode() != Mode::Assist {
                return Ok(TurnOutcome::Skipped);
            }
            let transcript_len = inner.store.transcript().len();
            if !inner.controller.begin_retry(transcript_len) {
                return Ok(TurnOutcome::Skipped);
            }
            inner.pending_retry = None;
            inner.ticket()
        };
        self.fetch_step(ticket).await
    }

    async fn fetch_step(&self, ticket: Ticket) -> Result<TurnOutcome> {
        debug!(
            epoch = ticket.epoch,
            transcript = ticket.transcript.len(),
            "Requesting step"
        );
        let result = ticket
            .gateway
            .next_step(&ticket.problem_text, &ticket.transcript, None)
            .await;

        let mut inner = self.lock().await;
        if inner.epoch != ticket.epoch || inner.store.is_complete() {
            debug!(epoch = ticket.epoch, current = inner.epoch, "Discarding stale step");
            return Ok(TurnOutcome::Stale);
        }

        let result = match result {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %err, "Step request failed");
                inner.controller.fail();
                inner.pending_retry = Some(PendingRetry::NextStep);
                self.emit_error(&err);
                return Err(err);
            }
        };

        if let StepResult::Continue { step_index, .. } = &result {
            let expected = inner.store.next_index();
            if *step_index != expected {
                inner.controller.fail();
                let err = TutorError::protocol(format!(
                    "step {step_index} does not follow the transcript, expected {expected}"
                ));
                self.emit_error(&err);
                return Err(err);
            }
        }

        inner.controller.apply(&result);
        match result {
            StepResult::Continue { step_index, prompt } => {
                let step = ActiveStep {
                    index: step_index,
                    prompt,
                };
                if inner.arbiter.mode() == Mode::Solo {
                    if let Some(parked) = inner.controller.park() {
                        debug!(index = parked.index, "Parking step received during Solo");
                        inner.arbiter.park(parked);
                    }
                    return Ok(TurnOutcome::Skipped);
                }
                self.emit(SessionEvent::step_ready(step.index, &step.prompt));
                Ok(TurnOutcome::Step(step))
            }
            StepResult::Complete { score, remarks, tip } => {
                let completion = self.finalize(&mut inner, ticket.mode, score, remarks, tip)?;
                Ok(TurnOutcome::Completed(completion))
            }
        }
    }

    // ------------------------------------------------------------------------
    // Solo grading
    // ------------------------------------------------------------------------

    /// Grades a free-form answer to the current problem.
    ///
    /// With steps-based grading the service may answer with guidance instead
    /// of a grade; that comes back as `TurnOutcome::Hint` and the problem
    /// stays open.
    pub async fn submit_solo_answer(&self, answer: &str) -> Result<TurnOutcome> {
        let ticket = {
            let mut inner = self.lock().await;
            inner.require_open_problem()?;
            if inner.arbiter.mode() != Mode::Solo {
                return Err(TutorError::invariant("free-form answers require Solo mode"));
            }
            if inner.grading == FetchState::Fetching {
                debug!("Solo grading already in flight");
                return Ok(TurnOutcome::Skipped);
            }
            inner.grading = FetchState::Fetching;
            inner.pending_retry = None;
            inner.ticket()
        };

        debug!(epoch = ticket.epoch, grading = ?self.solo_grading, "Grading solo answer");
        let result = match self.solo_grading {
            SoloGrading::Steps => {
                ticket
                    .gateway
                    .next_step(&ticket.problem_text, &ticket.transcript, Some(answer))
                    .await
            }
            SoloGrading::GradeEndpoint => ticket
                .gateway
                .grade_answer(&ticket.problem_text, answer)
                .await
                .map(|grade| StepResult::Complete {
                    score: grade.marks,
                    remarks: grade.remarks,
                    tip: grade.correction,
                }),
        };

        let mut inner = self.lock().await;
        if inner.epoch != ticket.epoch {
            debug!(epoch = ticket.epoch, current = inner.epoch, "Discarding stale grade");
            return Ok(TurnOutcome::Stale);
        }
        if inner.store.is_complete() {
            debug!(epoch = ticket.epoch, "Problem completed while grading, discarding grade");
            inner.grading = FetchState::Idle;
            return Ok(TurnOutcome::Stale);
        }
        match result {
            Ok(StepResult::Continue { prompt, .. }) => {
                inner.grading = FetchState::Idle;
                Ok(TurnOutcome::Hint(prompt))
            }
            Ok(StepResult::Complete { score, remarks, tip }) => {
                inner.grading = FetchState::Ready;
                inner.controller.complete();
                let completion = self.finalize(&mut inner, ticket.mode, score, remarks, tip)?;
                Ok(TurnOutcome::Completed(completion))
            }
            Err(err) => {
                warn!(error = %err, "Solo grading failed");
                inner.grading = FetchState::Idle;
                inner.pending_retry = Some(PendingRetry::SoloAnswer(answer.to_string()));
                self.emit_error(&err);
                Err(err)
            }
        }
    }

    fn finalize(
        &self,
        inner: &mut Inner,
        mode: Mode,
        score: f64,
        remarks: Vec<String>,
        tip: Option<String>,
    ) -> Result<Completion> {
        let problem_text = inner
            .store
            .current_problem()
            .ok_or_else(|| TutorError::invariant("completion without a problem"))?
            .to_string();
        let past = PastProblem::new(problem_text, score, remarks, inner.store.session().level, mode);
        let completion = Completion {
            score: past.score,
            remarks: past.remarks.clone(),
            tip,
        };
        inner.store.record_completion(past)?;
        inner.completion = Some(completion.clone());
        self.emit(SessionEvent::session_complete(
            completion.score,
            completion.remarks.clone(),
            completion.tip.clone(),
        ));
        Ok(completion)
    }

    /// Submits an answer in the active mode.
    pub async fn submit_answer(&self, answer: &str) -> Result<TurnOutcome> {
        let mode = self.lock().await.arbiter.mode();
        match mode {
            Mode::Assist => self.submit_step_answer(answer).await,
            Mode::Solo => self.submit_solo_answer(answer).await,
        }
    }

    /// Repeats the last failed request, if any.
    pub async fn retry(&self) -> Result<TurnOutcome> {
        let pending = self.lock().await.pending_retry.take();
        match pending {
            Some(PendingRetry::Problem) => self.fetch_problem(true).await,
            Some(PendingRetry::NextStep) => self.retry_next_step().await,
            Some(PendingRetry::SoloAnswer(answer)) => self.submit_solo_answer(&answer).await,
            None => Ok(TurnOutcome::Skipped),
        }
    }

    // ------------------------------------------------------------------------
    // Mode and service
    // ------------------------------------------------------------------------

    /// Switches between Solo and Assist.
    ///
    /// Leaving Assist parks any unanswered step; coming back restores it.
    /// Leaving Assist after an answer was recorded is rejected.
    pub async fn toggle_mode(&self) -> ToggleOutcome {
        let mut inner = self.lock().await;
        let has_submitted = inner.store.has_submitted();
        let outcome = inner.arbiter.toggle(has_submitted);
        match &outcome {
            ToggleOutcome::Switched(Mode::Solo) => {
                if let Some(step) = inner.controller.park() {
                    inner.arbiter.park(step);
                }
                self.emit(SessionEvent::mode_changed(Mode::Solo));
            }
            ToggleOutcome::Switched(Mode::Assist) => {
                self.emit(SessionEvent::mode_changed(Mode::Assist));
                if let Some(step) = inner.arbiter.take_parked() {
                    self.emit(SessionEvent::step_ready(step.index, &step.prompt));
                    inner.controller.restore(step);
                }
            }
            ToggleOutcome::Rejected(reason) => {
                info!(%reason, "Mode change rejected");
                self.emit(SessionEvent::mode_rejected(reason));
            }
        }
        outcome
    }

    /// Replaces the gateway with the offline problem bank.
    ///
    /// Any in-flight request is superseded and the problem must be acquired
    /// again. History is kept.
    pub async fn enter_offline_mode(&self) -> Result<()> {
        if !self.offline_fallback {
            return Err(TutorError::config_validation(
                "offline mode is disabled",
                "Set offlineFallback to true in your tutor.json",
            ));
        }
        let mut inner = self.lock().await;
        if inner.service_mode == ServiceMode::Offline {
            return Ok(());
        }
        warn!("Switching to the offline problem bank");
        inner.gateway = Arc::new(OfflineGateway::new());
        inner.service_mode = ServiceMode::Offline;
        inner.epoch += 1;
        inner.problem_fetch = FetchState::Idle;
        inner.grading = FetchState::Idle;
        inner.controller.reset();
        inner.arbiter.new_problem();
        inner.pending_retry = None;
        self.emit(SessionEvent::degraded_mode(
            "tutoring service unavailable, using the offline problem bank",
        ));
        Ok(())
    }
}
