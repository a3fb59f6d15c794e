//! Session Orchestrator.
//!
//! The facade: the only component through which timer callbacks and client
//! intents reach session state. Every state-mutating
//! operation acquires the session's lock for its full duration and follows
//! the sequence *validate → mutate in-memory → persist → schedule/cancel →
//! publish*.

use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::activity::ActivityTracker;
use crate::bus::MessageBus;
use crate::feedback_store::gating_satisfied;
use crate::phase::{
    can_skip, now_epoch_ms, phase_change_envelope, timer_start_envelope,
};
use crate::projection::project_case;
use crate::registry::{active_doctor, available_roles, has_active_role, ParticipantRegistry};
use crate::repository::{CaseRepository, FeedbackRepository, ParticipantRepository, SessionRepository};
use crate::scheduler::{BoxFuture, Scheduler, TimerHandle};
use crate::types::{
    Case, CaseId, Envelope, Feedback, FeedbackSubmission, OrchestratorError, ParticipantView,
    Participant, Phase, Role, Session, SessionCode, SessionConfig, SessionConfigView,
    SessionStatus, UserId,
};

/// Per-session lock and armed-timer bookkeeping. Lives for the
/// lifetime of the session's code in the orchestrator's global map; entries
/// are dropped once the session completes.
struct SessionRuntime {
    lock: AsyncMutex<()>,
    timer_handle: parking_lot::Mutex<Option<TimerHandle>>,
}

impl SessionRuntime {
    fn new() -> Self {
        Self {
            lock: AsyncMutex::new(()),
            timer_handle: parking_lot::Mutex::new(None),
        }
    }
}

/// Input to `Create`.
pub struct CreateSessionInput {
    pub title: String,
    pub creator: UserId,
    pub creator_name: String,
    pub config: SessionConfig,
}

pub struct SessionOrchestrator {
    sessions: Arc<dyn SessionRepository>,
    participants: ParticipantRegistry,
    feedback: Arc<dyn FeedbackRepository>,
    cases: Arc<dyn CaseRepository>,
    bus: Arc<MessageBus>,
    scheduler: Arc<dyn Scheduler>,
    activity: ActivityTracker,
    runtimes: DashMap<SessionCode, Arc<SessionRuntime>>,
    /// Full case content picked at `Configure`/`NewCase` time, kept around so
    /// entering `READING` can re-project it without a second repository
    /// round trip (the case repository only exposes random-pick queries, not
    /// lookup by id).
    case_cache: DashMap<CaseId, Case>,
    /// `SessionDefaultsConfig.feedback_phase_seconds` — the FEEDBACK phase's
    /// fixed duration, threaded in at construction rather than hardcoded.
    feedback_phase_seconds: u64,
    /// `SessionDefaultsConfig.code_generation_attempts` — retries
    /// `generate_unique_code` makes before giving up.
    code_generation_attempts: u32,
    self_ref: Arc<OnceLock<Weak<SessionOrchestrator>>>,
}

impl SessionOrchestrator {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        participants_repo: Arc<dyn ParticipantRepository>,
        feedback: Arc<dyn FeedbackRepository>,
        cases: Arc<dyn CaseRepository>,
        scheduler: Arc<dyn Scheduler>,
        idle_timeout: Duration,
        feedback_phase_seconds: u64,
        code_generation_attempts: u32,
    ) -> Arc<Self> {
        let self_ref: Arc<OnceLock<Weak<SessionOrchestrator>>> = Arc::new(OnceLock::new());
        let on_idle_ref = self_ref.clone();
        let on_idle: Arc<dyn Fn(SessionCode, UserId) -> BoxFuture + Send + Sync> =
            Arc::new(move |code, user| {
                let on_idle_ref = on_idle_ref.clone();
                Box::pin(async move {
                    if let Some(orch) = on_idle_ref.get().and_then(Weak::upgrade) {
                        if let Err(e) = orch.leave(&code, &user).await {
                            warn!(session = %code, user = %user.0, error = %e, "idle-eviction leave failed");
                        }
                    }
                })
            });

        let orchestrator = Arc::new(Self {
            sessions,
            participants: ParticipantRegistry::new(participants_repo),
            feedback,
            cases,
            bus: Arc::new(MessageBus::new()),
            scheduler: scheduler.clone(),
            activity: ActivityTracker::new(scheduler, on_idle).with_idle_timeout(idle_timeout),
            runtimes: DashMap::new(),
            case_cache: DashMap::new(),
            feedback_phase_seconds,
            code_generation_attempts,
            self_ref: self_ref.clone(),
        });
        let _ = self_ref.set(Arc::downgrade(&orchestrator));
        orchestrator
    }

    pub fn bus(&self) -> Arc<MessageBus> {
        self.bus.clone()
    }

    /// Registers (or reuses) the activity watchdog for `(code, user)`; called
    /// on every inbound message on a client's topic subscription and on each
    /// client intent.
    pub fn touch_activity(&self, code: SessionCode, user: UserId) {
        self.activity.touch_activity(code, user);
    }

    fn runtime(&self, code: &SessionCode) -> Arc<SessionRuntime> {
        self.runtimes
            .entry(code.clone())
            .or_insert_with(|| Arc::new(SessionRuntime::new()))
            .clone()
    }

    async fn load_session(&self, code: &SessionCode) -> Result<Session, OrchestratorError> {
        self.sessions
            .find_by_code(code)
            .await
            .map_err(|e| e.into_orchestrator_error(code))?
            .ok_or_else(|| OrchestratorError::NotFound(code.clone()))
    }

    async fn active_participant(
        &self,
        session: &Session,
        user: &UserId,
    ) -> Result<Participant, OrchestratorError> {
        self.participants
            .find(session.id, user)
            .await
            .map_err(|e| e.into_orchestrator_error(&session.code))?
            .filter(|p| p.is_active)
            .ok_or_else(|| OrchestratorError::ParticipantNotFound {
                code: session.code.clone(),
                user: user.0.clone(),
            })
    }

    async fn require_active_doctor(
        &self,
        session: &Session,
        user: &UserId,
    ) -> Result<(), OrchestratorError> {
        let participant = self.active_participant(session, user).await?;
        if participant.role != Role::Doctor {
            return Err(OrchestratorError::Forbidden(format!(
                "{} does not hold the DOCTOR role in session {}",
                user, session.code
            )));
        }
        Ok(())
    }

    async fn generate_unique_code(&self) -> Result<SessionCode, OrchestratorError> {
        for _ in 0..self.code_generation_attempts {
            let digits: String = {
                let mut rng = rand::thread_rng();
                (0..6).map(|_| rng.gen_range(0..10).to_string()).collect()
            };
            let code = SessionCode::from_raw(digits);
            let existing = self
                .sessions
                .find_by_code(&code)
                .await
                .map_err(|e| e.into_orchestrator_error(&code))?;
            match existing {
                None => return Ok(code),
                Some(s) if s.is_completed() => return Ok(code),
                Some(_) => continue,
            }
        }
        Err(OrchestratorError::Transient(
            "exhausted retries allocating a unique session code".into(),
        ))
    }

    // ---- session lifecycle operations -----------------------------------

    pub async fn create(&self, input: CreateSessionInput) -> Result<Session, OrchestratorError> {
        let code = self.generate_unique_code().await?;
        let session = Session::new(code.clone(), input.title, input.creator.clone(), input.config);
        self.sessions
            .save(&session)
            .await
            .map_err(|e| e.into_orchestrator_error(&code))?;

        let doctor = Participant::new(session.id, input.creator, input.creator_name, Role::Doctor);
        self.participants
            .save(&doctor)
            .await
            .map_err(|e| e.into_orchestrator_error(&code))?;

        info!(session = %code, "session created");
        Ok(session)
    }

    pub async fn join(
        &self,
        code: &SessionCode,
        requested_role: Role,
        user: UserId,
        user_name: String,
    ) -> Result<Session, OrchestratorError> {
        let runtime = self.runtime(code);
        let session = {
            let _guard = runtime.lock.lock().await;
            let session = self.load_session(code).await?;
            if session.is_completed() {
                return Err(OrchestratorError::session_completed(code));
            }

            let active = self
                .participants
                .active(session.id)
                .await
                .map_err(|e| e.into_orchestrator_error(code))?;

            if requested_role == Role::Doctor {
                if user != session.created_by_user_id {
                    return Err(OrchestratorError::forbidden_doctor());
                }
            } else if !available_roles(&active).contains(&requested_role) {
                return Err(OrchestratorError::role_unavailable(requested_role));
            }

            let existing = self
                .participants
                .find(session.id, &user)
                .await
                .map_err(|e| e.into_orchestrator_error(code))?;

            let participant = match existing {
                Some(p) if p.is_active => {
                    return Err(OrchestratorError::Conflict(format!(
                        "{user} is already an active participant of session {code}"
                    )));
                }
                Some(mut p) => {
                    p.is_active = true;
                    p.role = requested_role;
                    p.user_name = user_name.clone();
                    p
                }
                None => Participant::new(session.id, user.clone(), user_name.clone(), requested_role),
            };
            self.participants
                .save(&participant)
                .await
                .map_err(|e| e.into_orchestrator_error(code))?;

            let active = self
                .participants
                .active(session.id)
                .await
                .map_err(|e| e.into_orchestrator_error(code))?;
            self.publish_participant_update(&session, &active);
            session
        };

        // Session activity singleton: runs after the join lock is
        // released so that locking another session's runtime never nests
        // under this one's.
        self.enforce_activity_singleton(&session.code, &user).await;

        Ok(session)
    }

    pub async fn configure(
        &self,
        code: &SessionCode,
        user: &UserId,
        config: SessionConfig,
    ) -> Result<Session, OrchestratorError> {
        let runtime = self.runtime(code);
        let _guard = runtime.lock.lock().await;
        let mut session = self.load_session(code).await?;
        if session.is_completed() {
            return Err(OrchestratorError::session_completed(code));
        }
        self.require_active_doctor(&session, user).await?;
        if session.phase != Phase::Waiting {
            return Err(OrchestratorError::InvalidState(
                "Configure is only legal while WAITING".into(),
            ));
        }

        let picked = self
            .pick_case(&config, &session.used_case_ids)
            .await?;
        let Some(case) = picked else {
            self.bus.publish(
                &code.topic(),
                Envelope::TopicSelectionNeeded {
                    session_code: code.clone(),
                    completed_topic: config.selected_topics.last().cloned().unwrap_or_default(),
                    available_topics: Vec::new(),
                },
            ).ok();
            return Err(OrchestratorError::Conflict(
                "no case available for the selected topics".into(),
            ));
        };

        session.config = config;
        session.used_case_ids.push(case.id.clone());
        session.selected_case_id = Some(case.id.clone());
        self.case_cache.insert(case.id.clone(), case);

        self.sessions
            .save(&session)
            .await
            .map_err(|e| e.into_orchestrator_error(code))?;

        let active = self
            .participants
            .active(session.id)
            .await
            .map_err(|e| e.into_orchestrator_error(code))?;
        self.publish_session_update_broadcast(&session, &active);

        Ok(session)
    }

    pub async fn start(&self, code: &SessionCode, user: &UserId) -> Result<Session, OrchestratorError> {
        let runtime = self.runtime(code);
        let _guard = runtime.lock.lock().await;
        let mut session = self.load_session(code).await?;
        if session.is_completed() {
            return Err(OrchestratorError::session_completed(code));
        }
        self.require_active_doctor(&session, user).await?;
        if session.phase != Phase::Waiting {
            return Err(OrchestratorError::InvalidState(
                "Start is only legal while WAITING".into(),
            ));
        }

        let active = self
            .participants
            .active(session.id)
            .await
            .map_err(|e| e.into_orchestrator_error(code))?;
        if active.is_empty() {
            return Err(OrchestratorError::InvalidState(
                "at least one active participant is required to start".into(),
            ));
        }

        session.status = SessionStatus::InProgress;
        session.started_at = Some(chrono::Utc::now());
        self.transition_to(&mut session, &runtime, Phase::Reading).await?;
        Ok(session)
    }

    pub async fn skip_phase(
        &self,
        code: &SessionCode,
        user: &UserId,
        acting_as_admin: bool,
    ) -> Result<Session, OrchestratorError> {
        let runtime = self.runtime(code);
        let _guard = runtime.lock.lock().await;
        let mut session = self.load_session(code).await?;
        if session.is_completed() {
            return Err(OrchestratorError::session_completed(code));
        }
        if !acting_as_admin {
            self.require_active_doctor(&session, user).await?;
        }
        if !can_skip(session.phase) {
            return Err(OrchestratorError::InvalidState(format!(
                "cannot skip while in phase {}",
                session.phase
            )));
        }

        let next = match session.phase {
            Phase::Reading => Phase::Consultation,
            Phase::Consultation => Phase::Feedback,
            _ => unreachable!("can_skip only admits READING/CONSULTATION"),
        };
        self.transition_to(&mut session, &runtime, next).await?;
        Ok(session)
    }

    pub async fn new_case(&self, code: &SessionCode, user: &UserId) -> Result<Session, OrchestratorError> {
        let runtime = self.runtime(code);
        let _guard = runtime.lock.lock().await;
        let mut session = self.load_session(code).await?;
        if session.is_completed() {
            return Err(OrchestratorError::session_completed(code));
        }
        self.require_active_doctor(&session, user).await?;

        match session.phase {
            Phase::Reading => {}
            Phase::Feedback => self.require_gating_satisfied(&session).await?,
            _ => {
                return Err(OrchestratorError::InvalidState(
                    "NewCase is only legal in READING, or in FEEDBACK once gating is satisfied"
                        .into(),
                ))
            }
        }

        let picked = self
            .pick_case(&session.config, &session.used_case_ids)
            .await?;
        let Some(case) = picked else {
            self.bus.publish(
                &code.topic(),
                Envelope::TopicSelectionNeeded {
                    session_code: code.clone(),
                    completed_topic: session
                        .config
                        .selected_topics
                        .last()
                        .cloned()
                        .unwrap_or_default(),
                    available_topics: Vec::new(),
                },
            ).ok();
            return Err(OrchestratorError::Conflict(
                "no further cases available for the selected topics".into(),
            ));
        };

        session.current_round += 1;
        session.used_case_ids.push(case.id.clone());
        session.selected_case_id = Some(case.id.clone());
        self.case_cache.insert(case.id.clone(), case);

        self.reset_round_flags(code, session.id).await?;
        self.transition_to(&mut session, &runtime, Phase::Reading).await?;
        Ok(session)
    }

    pub async fn change_role(&self, code: &SessionCode, user: &UserId) -> Result<Session, OrchestratorError> {
        let runtime = self.runtime(code);
        let _guard = runtime.lock.lock().await;
        let mut session = self.load_session(code).await?;
        if session.is_completed() {
            return Err(OrchestratorError::session_completed(code));
        }
        self.require_active_doctor(&session, user).await?;
        if session.phase != Phase::Feedback {
            return Err(OrchestratorError::InvalidState(
                "ChangeRole is only legal in FEEDBACK".into(),
            ));
        }
        self.require_gating_satisfied(&session).await?;

        self.bus.publish(
            &code.topic(),
            Envelope::RoleChange {
                session_code: code.clone(),
                message: "Roles have been reset; rejoin to select a new role.".into(),
            },
        ).ok();

        let active = self
            .participants
            .active(session.id)
            .await
            .map_err(|e| e.into_orchestrator_error(code))?;
        for mut p in active {
            if p.user_id != session.created_by_user_id {
                p.is_active = false;
                self.participants
                    .save(&p)
                    .await
                    .map_err(|e| e.into_orchestrator_error(code))?;
            }
        }

        self.stop_timer(&mut session, &runtime);
        session.phase = Phase::Waiting;
        self.sessions
            .save(&session)
            .await
            .map_err(|e| e.into_orchestrator_error(code))?;

        let active = self
            .participants
            .active(session.id)
            .await
            .map_err(|e| e.into_orchestrator_error(code))?;
        self.publish_session_update_broadcast(&session, &active);
        Ok(session)
    }

    pub async fn submit_feedback(
        &self,
        code: &SessionCode,
        sender: &UserId,
        submission: FeedbackSubmission,
    ) -> Result<Feedback, OrchestratorError> {
        let runtime = self.runtime(code);
        let _guard = runtime.lock.lock().await;
        let session = self.load_session(code).await?;
        if session.is_completed() {
            return Err(OrchestratorError::session_completed(code));
        }
        crate::feedback_store::validate_submission(&submission).map_err(OrchestratorError::Validation)?;
        let sender_participant = self.active_participant(&session, sender).await?;
        if !matches!(sender_participant.role, Role::Patient | Role::Observer) {
            return Err(OrchestratorError::Forbidden(
                "only PATIENT or OBSERVER may submit feedback".into(),
            ));
        }
        if !matches!(session.phase, Phase::Consultation | Phase::Feedback) {
            return Err(OrchestratorError::InvalidState(
                "feedback may only be submitted during CONSULTATION or FEEDBACK".into(),
            ));
        }
        let active = self
            .participants
            .active(session.id)
            .await
            .map_err(|e| e.into_orchestrator_error(code))?;
        let recipient = active_doctor(&active)
            .map(|p| p.user_id.clone())
            .ok_or_else(|| {
                OrchestratorError::InvalidState("no active DOCTOR to receive feedback".into())
            })?;
        let case_id = session
            .selected_case_id
            .clone()
            .ok_or_else(|| OrchestratorError::InvalidState("no case selected".into()))?;

        let feedback = self
            .feedback
            .upsert(
                session.id,
                sender.clone(),
                recipient,
                case_id,
                session.current_round,
                submission,
            )
            .await
            .map_err(|e| e.into_orchestrator_error(code))?;

        Ok(feedback)
    }

    /// `Leave`. Deactivates the participant then applies the endgame rules.
    pub async fn leave(&self, code: &SessionCode, user: &UserId) -> Result<(), OrchestratorError> {
        self.deactivate_user_in_session(code, user).await
    }

    // ---- internal transition plumbing ---------------------------------

    async fn require_gating_satisfied(&self, session: &Session) -> Result<(), OrchestratorError> {
        let Some(case_id) = session.selected_case_id.as_ref() else {
            return Err(OrchestratorError::Conflict("no case selected for this round".into()));
        };
        let active = self
            .participants
            .active(session.id)
            .await
            .map_err(|e| e.into_orchestrator_error(&session.code))?;
        let rows = self
            .feedback
            .find_for_round(session.id, case_id, session.current_round)
            .await
            .map_err(|e| e.into_orchestrator_error(&session.code))?;
        if gating_satisfied(&rows, &active) {
            Ok(())
        } else {
            Err(OrchestratorError::Conflict(
                "feedback gating not satisfied for the current round".into(),
            ))
        }
    }

    /// Picks the next case for `config`. A `recall_date_range` takes
    /// precedence over `selected_topics`: recall mode (§3/§6.3) re-surfaces
    /// any prior case authored in that window rather than restricting by
    /// category.
    async fn pick_case(
        &self,
        config: &SessionConfig,
        used: &[CaseId],
    ) -> Result<Option<Case>, OrchestratorError> {
        let picked = match &config.recall_date_range {
            Some(range) => self.cases.pick_random_by_date_range(range.from, range.to, used).await,
            None => self.cases.pick_random_by_category_names(&config.selected_topics, used).await,
        };
        picked.map_err(|e| OrchestratorError::Transient(e.to_string()))
    }

    async fn reset_round_flags(
        &self,
        code: &SessionCode,
        session_id: crate::types::SessionId,
    ) -> Result<(), OrchestratorError> {
        let active = self
            .participants
            .active(session_id)
            .await
            .map_err(|e| e.into_orchestrator_error(code))?;
        for mut p in active {
            p.has_completed = false;
            p.has_given_feedback = false;
            self.participants
                .save(&p)
                .await
                .map_err(|e| e.into_orchestrator_error(code))?;
        }
        Ok(())
    }

    fn stop_timer(&self, session: &mut Session, runtime: &SessionRuntime) {
        if let Some(handle) = runtime.timer_handle.lock().take() {
            self.scheduler.cancel(handle);
        }
        session.timer_start_timestamp = None;
    }

    fn arm_timer(&self, session: &Session, runtime: &Arc<SessionRuntime>, phase: Phase, duration_secs: u64) {
        let self_ref = self.self_ref.clone();
        let code = session.code.clone();
        let callback: BoxFuture = Box::pin(async move {
            if let Some(orch) = self_ref.get().and_then(Weak::upgrade) {
                orch.handle_timer_expiry(code, phase).await;
            }
        });
        let handle = self.scheduler.schedule(Duration::from_secs(duration_secs), callback);
        *runtime.timer_handle.lock() = Some(handle);
    }

    /// Drives `session` into `new_phase`, persisting, scheduling and
    /// publishing in order: `PHASE_CHANGE`, then `TIMER_START`, then (when
    /// entering `READING`) the private `CASE_DATA` envelopes.
    async fn transition_to(
        &self,
        session: &mut Session,
        runtime: &Arc<SessionRuntime>,
        new_phase: Phase,
    ) -> Result<(), OrchestratorError> {
        self.stop_timer(session, runtime);
        session.phase = new_phase;
        session.phase_start_time = Some(Instant::now());
        let now_ms = now_epoch_ms();
        let duration = session.duration_for(new_phase, self.feedback_phase_seconds);
        if new_phase.is_timed() {
            session.timer_start_timestamp = Some(now_ms);
        }

        self.sessions
            .save(session)
            .await
            .map_err(|e| e.into_orchestrator_error(&session.code))?;

        self.bus
            .publish(&session.code.topic(), phase_change_envelope(&session.code, new_phase, duration, now_ms))
            .ok();

        if new_phase.is_timed() {
            self.bus
                .publish(
                    &session.code.topic(),
                    timer_start_envelope(&session.code, new_phase, duration, now_ms),
                )
                .ok();
            self.arm_timer(session, runtime, new_phase, duration);
        }

        if new_phase == Phase::Reading {
            self.emit_case_data(session).await?;
        }

        Ok(())
    }

    async fn emit_case_data(&self, session: &Session) -> Result<(), OrchestratorError> {
        let Some(case_id) = session.selected_case_id.as_ref() else {
            return Ok(());
        };
        let Some(case) = self.case_cache.get(case_id).map(|r| r.value().clone()) else {
            warn!(session = %session.code, case = %case_id, "case content missing from cache");
            return Ok(());
        };
        let active = self
            .participants
            .active(session.id)
            .await
            .map_err(|e| e.into_orchestrator_error(&session.code))?;
        for p in active {
            let projection = project_case(&case, p.role);
            let _ = self.bus.publish_private(
                &session.code,
                &p.user_id,
                Envelope::CaseData {
                    session_code: session.code.clone(),
                    case: projection,
                },
            );
        }
        Ok(())
    }

    /// Timer-expiry entry point. Re-acquires the session
    /// lock and re-reads the session before acting; a stale phase or a
    /// completed session makes this a no-op.
    async fn handle_timer_expiry(&self, code: SessionCode, armed_phase: Phase) {
        let runtime = self.runtime(&code);
        let _guard = runtime.lock.lock().await;
        let mut session = match self.load_session(&code).await {
            Ok(s) => s,
            Err(_) => return,
        };
        if session.is_completed() || session.phase != armed_phase {
            return;
        }

        let result = match armed_phase {
            Phase::Reading => self.transition_to(&mut session, &runtime, Phase::Consultation).await,
            Phase::Consultation => self.transition_to(&mut session, &runtime, Phase::Feedback).await,
            Phase::Feedback => {
                // Forced completion regardless of gating.
                self.end_session(&mut session, &runtime, "Session completed successfully")
                    .await
            }
            Phase::Waiting | Phase::Completed => Ok(()),
        };

        if let Err(e) = result {
            warn!(session = %code, error = %e, "timer-driven transition failed");
        }
    }

    async fn deactivate_user_in_session(
        &self,
        code: &SessionCode,
        user: &UserId,
    ) -> Result<(), OrchestratorError> {
        let runtime = self.runtime(code);
        let _guard = runtime.lock.lock().await;
        let mut session = self.load_session(code).await?;
        if session.is_completed() {
            return Ok(());
        }

        let Some(mut participant) = self
            .participants
            .find(session.id, user)
            .await
            .map_err(|e| e.into_orchestrator_error(code))?
        else {
            return Ok(());
        };
        if !participant.is_active {
            return Ok(());
        }

        let role = participant.role;
        let name = participant.user_name.clone();
        participant.is_active = false;
        self.participants
            .save(&participant)
            .await
            .map_err(|e| e.into_orchestrator_error(code))?;
        self.activity.remove(code, user);

        self.bus.publish(
            &code.topic(),
            Envelope::UserLeft {
                session_code: code.clone(),
                user_id: user.0.clone(),
                user_name: name,
                user_role: Some(role),
            },
        ).ok();

        self.apply_endgame(&mut session, &runtime).await
    }

    /// Endgame rules after any Leave.
    async fn apply_endgame(
        &self,
        session: &mut Session,
        runtime: &Arc<SessionRuntime>,
    ) -> Result<(), OrchestratorError> {
        let active = self
            .participants
            .active(session.id)
            .await
            .map_err(|e| e.into_orchestrator_error(&session.code))?;

        if active.len() < 2 {
            self.end_session(session, runtime, "insufficient_participants").await
        } else if !has_active_role(&active, Role::Doctor) && session.phase != Phase::Completed {
            self.end_session(session, runtime, "doctor_left").await
        } else {
            self.publish_participant_update(session, &active);
            Ok(())
        }
    }

    /// Ends a session: cancels its scheduler handle, marks it COMPLETED, and
    /// publishes `PHASE_CHANGE(COMPLETED, 0)` followed by `SESSION_ENDED`.
    async fn end_session(
        &self,
        session: &mut Session,
        runtime: &Arc<SessionRuntime>,
        reason: &str,
    ) -> Result<(), OrchestratorError> {
        self.stop_timer(session, runtime);
        session.phase = Phase::Completed;
        session.status = SessionStatus::Completed;
        session.ended_at = Some(chrono::Utc::now());

        self.sessions
            .save(session)
            .await
            .map_err(|e| e.into_orchestrator_error(&session.code))?;

        let now_ms = now_epoch_ms();
        self.bus
            .publish(
                &session.code.topic(),
                phase_change_envelope(&session.code, Phase::Completed, 0, now_ms),
            )
            .ok();
        self.bus
            .publish(
                &session.code.topic(),
                Envelope::SessionEnded {
                    session_code: session.code.clone(),
                    reason: reason.to_string(),
                    timestamp: now_ms,
                },
            )
            .ok();

        self.activity.remove_session(&session.code);
        self.runtimes.remove(&session.code);
        info!(session = %session.code, reason, "session ended");
        Ok(())
    }

    /// Session activity singleton: deactivates `user` in every
    /// other non-completed session they are active in.
    async fn enforce_activity_singleton(&self, joined_code: &SessionCode, user: &UserId) {
        let Ok(others) = self.participants.other_active_sessions(user).await else {
            return;
        };
        for participant in others {
            let Ok(Some(other_session)) = self.sessions.find_by_id(participant.session_id).await
            else {
                continue;
            };
            if &other_session.code == joined_code {
                continue;
            }
            if let Err(e) = self.deactivate_user_in_session(&other_session.code, user).await {
                warn!(
                    session = %other_session.code,
                    user = %user.0,
                    error = %e,
                    "failed to enforce session-activity singleton"
                );
            }
        }
    }

    fn publish_participant_update(&self, session: &Session, active: &[Participant]) {
        self.bus.publish(
            &session.code.topic(),
            Envelope::ParticipantUpdate {
                session_code: session.code.clone(),
                participants: active.iter().map(participant_view).collect(),
            },
        ).ok();
    }

    /// Broadcasts a role-neutral `SESSION_UPDATE`; `selectedCase` is always
    /// omitted here since the shared topic must never carry case content.
    /// A role-filtered copy is sent privately via [`Self::snapshot_for`]
    /// when a client subscribes.
    fn publish_session_update_broadcast(&self, session: &Session, active: &[Participant]) {
        self.bus.publish(
            &session.code.topic(),
            Envelope::SessionUpdate {
                session_code: session.code.clone(),
                title: session.title.clone(),
                phase: session.phase,
                status: session.status,
                config: SessionConfigView::from(&session.config),
                participants: active.iter().map(participant_view).collect(),
                selected_case: None,
                current_round: session.current_round,
                timer_start_timestamp: session.timer_start_timestamp,
            },
        ).ok();
    }

    /// Builds the role-filtered `SESSION_UPDATE` snapshot for one user,
    /// delivered over their private queue on (re)subscribe.
    pub async fn snapshot_for(
        &self,
        code: &SessionCode,
        user: &UserId,
    ) -> Result<Envelope, OrchestratorError> {
        let session = self.load_session(code).await?;
        let participant = self.active_participant(&session, user).await?;
        let active = self
            .participants
            .active(session.id)
            .await
            .map_err(|e| e.into_orchestrator_error(code))?;

        let selected_case = match session.selected_case_id.as_ref() {
            Some(case_id) => self
                .case_cache
                .get(case_id)
                .map(|c| project_case(c.value(), participant.role)),
            None => None,
        };

        Ok(Envelope::SessionUpdate {
            session_code: session.code.clone(),
            title: session.title.clone(),
            phase: session.phase,
            status: session.status,
            config: SessionConfigView::from(&session.config),
            participants: active.iter().map(participant_view).collect(),
            selected_case,
            current_round: session.current_round,
            timer_start_timestamp: session.timer_start_timestamp,
        })
    }
}

fn participant_view(p: &Participant) -> ParticipantView {
    ParticipantView {
        user_id: p.user_id.0.clone(),
        name: p.user_name.clone(),
        role: p.role,
        is_active: p.is_active,
        has_completed: p.has_completed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::{
        InMemoryCaseRepository, InMemoryFeedbackRepository, InMemoryParticipantRepository,
        InMemorySessionRepository,
    };
    use crate::types::CriterionScore;

    fn sample_case(category: &str, title: &str) -> Case {
        Case {
            id: CaseId(format!("{category}-{title}")),
            category: category.to_string(),
            title: title.to_string(),
            description: "a patient presents with symptoms".into(),
            doctor_sections: vec!["history".into()],
            patient_sections: vec!["chief complaint".into()],
            notes: "note".into(),
            image_ref: None,
            feedback_criteria: vec!["communication".into()],
        }
    }

    fn build_orchestrator(idle_timeout_secs: u64) -> (Arc<SessionOrchestrator>, Arc<InMemoryCaseRepository>) {
        let sessions = Arc::new(InMemorySessionRepository::default());
        let participants = Arc::new(InMemoryParticipantRepository::default());
        let feedback = Arc::new(InMemoryFeedbackRepository::default());
        let cases = Arc::new(InMemoryCaseRepository::default());
        cases.seed(sample_case("cardio", "Chest pain assessment"));
        cases.seed(sample_case("cardio", "Palpitations workup"));
        let scheduler = Arc::new(crate::scheduler::TokioScheduler::new());
        let orchestrator = SessionOrchestrator::new(
            sessions,
            participants,
            feedback,
            cases.clone(),
            scheduler,
            Duration::from_secs(idle_timeout_secs),
            crate::types::FEEDBACK_PHASE_SECONDS,
            32,
        );
        (orchestrator, cases)
    }

    async fn create_configured_session(
        orchestrator: &SessionOrchestrator,
        reading_minutes: u32,
        consultation_minutes: u32,
    ) -> Session {
        let session = orchestrator
            .create(CreateSessionInput {
                title: "s".into(),
                creator: UserId("A".into()),
                creator_name: "Alice".into(),
                config: SessionConfig::default(),
            })
            .await
            .unwrap();

        orchestrator
            .configure(
                &session.code,
                &UserId("A".into()),
                SessionConfig {
                    reading_minutes,
                    consultation_minutes,
                    selected_topics: vec!["cardio".into()],
                    ..SessionConfig::default()
                },
            )
            .await
            .unwrap()
    }

    fn score_submission(score: f64) -> FeedbackSubmission {
        FeedbackSubmission {
            comment: "looked thorough".into(),
            criteria_scores: vec![CriterionScore::Direct {
                name: "communication".into(),
                score,
            }],
        }
    }

    /// S1 — happy path across all three timed phases through completion,
    /// asserting PHASE_CHANGE precedes TIMER_START at each step (property 2).
    #[tokio::test(start_paused = true)]
    async fn s1_happy_path_three_roles() {
        let (orchestrator, _cases) = build_orchestrator(300);
        let session = create_configured_session(&orchestrator, 1, 1).await;
        let mut sub = orchestrator.bus().subscribe(&session.code.topic());

        orchestrator
            .join(&session.code, Role::Patient, UserId("B".into()), "Bob".into())
            .await
            .unwrap();
        orchestrator
            .join(&session.code, Role::Observer, UserId("C".into()), "Cara".into())
            .await
            .unwrap();
        orchestrator.start(&session.code, &UserId("A".into())).await.unwrap();

        assert!(matches!(
            sub.receiver.recv().await.unwrap(),
            Envelope::ParticipantUpdate { .. }
        ));
        assert!(matches!(
            sub.receiver.recv().await.unwrap(),
            Envelope::ParticipantUpdate { .. }
        ));
        match sub.receiver.recv().await.unwrap() {
            Envelope::PhaseChange { phase: Phase::Reading, duration_seconds: 60, .. } => {}
            other => panic!("expected PHASE_CHANGE(READING,60), got {other:?}"),
        }
        match sub.receiver.recv().await.unwrap() {
            Envelope::TimerStart { phase: Phase::Reading, duration_seconds: 60, .. } => {}
            other => panic!("expected TIMER_START(READING,60), got {other:?}"),
        }

        tokio::time::sleep(Duration::from_secs(60)).await;
        match sub.receiver.recv().await.unwrap() {
            Envelope::PhaseChange { phase: Phase::Consultation, duration_seconds: 60, .. } => {}
            other => panic!("expected PHASE_CHANGE(CONSULTATION,60), got {other:?}"),
        }
        match sub.receiver.recv().await.unwrap() {
            Envelope::TimerStart { phase: Phase::Consultation, duration_seconds: 60, .. } => {}
            other => panic!("expected TIMER_START(CONSULTATION,60), got {other:?}"),
        }

        tokio::time::sleep(Duration::from_secs(60)).await;
        match sub.receiver.recv().await.unwrap() {
            Envelope::PhaseChange { phase: Phase::Feedback, duration_seconds: 600, .. } => {}
            other => panic!("expected PHASE_CHANGE(FEEDBACK,600), got {other:?}"),
        }
        match sub.receiver.recv().await.unwrap() {
            Envelope::TimerStart { phase: Phase::Feedback, duration_seconds: 600, .. } => {}
            other => panic!("expected TIMER_START(FEEDBACK,600), got {other:?}"),
        }

        orchestrator
            .submit_feedback(&session.code, &UserId("B".into()), score_submission(4.0))
            .await
            .unwrap();
        orchestrator
            .submit_feedback(&session.code, &UserId("C".into()), score_submission(5.0))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(600)).await;
        match sub.receiver.recv().await.unwrap() {
            Envelope::PhaseChange { phase: Phase::Completed, duration_seconds: 0, .. } => {}
            other => panic!("expected PHASE_CHANGE(COMPLETED,0), got {other:?}"),
        }
        match sub.receiver.recv().await.unwrap() {
            Envelope::SessionEnded { reason, .. } => {
                assert_eq!(reason, "Session completed successfully");
            }
            other => panic!("expected SESSION_ENDED, got {other:?}"),
        }
    }

    /// S2 — a Skip issued mid-READING transitions exactly once; the
    /// already-armed expiry callback observes a stale phase and no-ops
    /// (property 3, no phantom transitions).
    #[tokio::test(start_paused = true)]
    async fn s2_skip_race_yields_exactly_one_transition() {
        let (orchestrator, _cases) = build_orchestrator(300);
        let session = create_configured_session(&orchestrator, 1, 1).await;
        orchestrator.start(&session.code, &UserId("A".into())).await.unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        let mut sub = orchestrator.bus().subscribe(&session.code.topic());
        let after_skip = orchestrator
            .skip_phase(&session.code, &UserId("A".into()), false)
            .await
            .unwrap();
        assert_eq!(after_skip.phase, Phase::Consultation);

        match sub.receiver.recv().await.unwrap() {
            Envelope::PhaseChange { phase: Phase::Consultation, .. } => {}
            other => panic!("expected PHASE_CHANGE(CONSULTATION), got {other:?}"),
        }
        match sub.receiver.recv().await.unwrap() {
            Envelope::TimerStart { phase: Phase::Consultation, .. } => {}
            other => panic!("expected TIMER_START(CONSULTATION), got {other:?}"),
        }

        // The original READING expiry (armed for t=60s) fires at t=60 but
        // the phase has already moved on; it must not emit a transition.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(sub.receiver.try_recv().is_err());
    }

    /// S3 — gated NewCase: a NewCase attempt fails Conflict until both
    /// PATIENT and OBSERVER have submitted feedback for the round, then
    /// succeeds and bumps currentRound / usedCaseIds (properties 5, 6, 7).
    #[tokio::test(start_paused = true)]
    async fn s3_gated_new_case() {
        let (orchestrator, _cases) = build_orchestrator(300);
        let session = create_configured_session(&orchestrator, 1, 1).await;
        orchestrator
            .join(&session.code, Role::Patient, UserId("B".into()), "Bob".into())
            .await
            .unwrap();
        orchestrator
            .join(&session.code, Role::Observer, UserId("C".into()), "Cara".into())
            .await
            .unwrap();
        orchestrator.start(&session.code, &UserId("A".into())).await.unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await; // READING, CONSULTATION both expire

        let before = orchestrator
            .new_case(&session.code, &UserId("A".into()))
            .await;
        assert!(matches!(before, Err(OrchestratorError::Conflict(_))));

        orchestrator
            .submit_feedback(&session.code, &UserId("B".into()), score_submission(4.0))
            .await
            .unwrap();
        let still_missing_observer = orchestrator
            .new_case(&session.code, &UserId("A".into()))
            .await;
        assert!(matches!(still_missing_observer, Err(OrchestratorError::Conflict(_))));

        orchestrator
            .submit_feedback(&session.code, &UserId("C".into()), score_submission(5.0))
            .await
            .unwrap();
        let used_before = orchestrator.load_session(&session.code).await.unwrap().used_case_ids.len();
        let after = orchestrator
            .new_case(&session.code, &UserId("A".into()))
            .await
            .unwrap();
        assert_eq!(after.current_round, 2);
        assert_eq!(after.used_case_ids.len(), used_before + 1);
        assert_ne!(after.selected_case_id, after.used_case_ids.first().cloned());
        assert_eq!(after.phase, Phase::Reading);
    }

    /// S4 — idle eviction: silence for T_idle triggers an on-behalf-of Leave
    /// and, once active drops below 2, ends the session (property 11).
    #[tokio::test(start_paused = true)]
    async fn s4_idle_eviction_ends_session() {
        let (orchestrator, _cases) = build_orchestrator(300);
        let session = create_configured_session(&orchestrator, 1, 1).await;
        orchestrator
            .join(&session.code, Role::Observer, UserId("C".into()), "Cara".into())
            .await
            .unwrap();
        orchestrator.touch_activity(session.code.clone(), UserId("C".into()));

        let mut sub = orchestrator.bus().subscribe(&session.code.topic());
        tokio::time::sleep(Duration::from_secs(300)).await;

        let mut saw_user_left = false;
        let mut saw_session_ended = false;
        while let Ok(envelope) = sub.receiver.try_recv() {
            match envelope {
                Envelope::UserLeft { user_id, .. } if user_id == "C" => saw_user_left = true,
                Envelope::SessionEnded { reason, .. } => {
                    assert_eq!(reason, "insufficient_participants");
                    saw_session_ended = true;
                }
                _ => {}
            }
        }
        assert!(saw_user_left, "expected UserLeft for the idle participant");
        assert!(saw_session_ended, "expected SessionEnded once active < 2");
    }

    /// S5 — the session-activity singleton: joining a second session
    /// deactivates the same user in the first.
    #[tokio::test(start_paused = true)]
    async fn s5_creator_joins_second_session() {
        let (orchestrator, _cases) = build_orchestrator(300);
        let first = create_configured_session(&orchestrator, 1, 1).await;
        orchestrator
            .join(&first.code, Role::Observer, UserId("D".into()), "Dee".into())
            .await
            .unwrap();
        orchestrator.start(&first.code, &UserId("A".into())).await.unwrap();

        let mut first_sub = orchestrator.bus().subscribe(&first.code.topic());

        // A second, independently-created session (creator "E") that A only
        // joins as an OBSERVER, matching the scenario's "A active in 111111,
        // then joins 222222" rather than A creating the second session.
        let second = orchestrator
            .create(CreateSessionInput {
                title: "t".into(),
                creator: UserId("E".into()),
                creator_name: "Eve".into(),
                config: SessionConfig::default(),
            })
            .await
            .unwrap();
        orchestrator
            .join(&second.code, Role::Observer, UserId("A".into()), "Alice".into())
            .await
            .unwrap();

        let mut saw_user_left = false;
        while let Ok(envelope) = first_sub.receiver.try_recv() {
            if let Envelope::UserLeft { user_id, .. } = envelope {
                if user_id == "A" {
                    saw_user_left = true;
                }
            }
        }
        assert!(saw_user_left, "expected USER_LEFT(A) on the first session");

        let second_active = orchestrator
            .snapshot_for(&second.code, &UserId("A".into()))
            .await
            .unwrap();
        match second_active {
            Envelope::SessionUpdate { participants, .. } => {
                assert!(participants.iter().any(|p| p.user_id == "A" && p.is_active));
            }
            other => panic!("expected SESSION_UPDATE, got {other:?}"),
        }
    }

    /// S6 — doctor-role privacy: CASE_DATA omits `title` for DOCTOR and
    /// carries it for PATIENT/OBSERVER (properties 9 and C10's projection).
    #[tokio::test(start_paused = true)]
    async fn s6_doctor_role_privacy() {
        let (orchestrator, _cases) = build_orchestrator(300);
        let session = create_configured_session(&orchestrator, 1, 1).await;
        orchestrator
            .join(&session.code, Role::Patient, UserId("B".into()), "Bob".into())
            .await
            .unwrap();

        orchestrator.start(&session.code, &UserId("A".into())).await.unwrap();

        let doctor_case = orchestrator.snapshot_for(&session.code, &UserId("A".into())).await.unwrap();
        let patient_case = orchestrator.snapshot_for(&session.code, &UserId("B".into())).await.unwrap();

        match doctor_case {
            Envelope::SessionUpdate { selected_case: Some(case), .. } => {
                assert!(case.title.is_none(), "DOCTOR must never see the case title");
            }
            other => panic!("expected SESSION_UPDATE with a selected case, got {other:?}"),
        }
        match patient_case {
            Envelope::SessionUpdate { selected_case: Some(case), .. } => {
                assert_eq!(case.title.as_deref(), Some("Chest pain assessment"));
            }
            other => panic!("expected SESSION_UPDATE with a selected case, got {other:?}"),
        }
    }

    /// Property 4 — role uniqueness: a second PATIENT join is rejected while
    /// the first remains active.
    #[tokio::test]
    async fn role_uniqueness_rejects_second_active_patient() {
        let (orchestrator, _cases) = build_orchestrator(300);
        let session = create_configured_session(&orchestrator, 5, 5).await;
        orchestrator
            .join(&session.code, Role::Patient, UserId("B".into()), "Bob".into())
            .await
            .unwrap();
        let second = orchestrator
            .join(&session.code, Role::Patient, UserId("D".into()), "Dee".into())
            .await;
        assert!(matches!(second, Err(OrchestratorError::Conflict(_))));
    }

    /// Property 8 — idempotent feedback: resubmitting for the same
    /// (session, sender, case, round) updates the one row rather than
    /// creating a second.
    #[tokio::test]
    async fn idempotent_feedback_resubmission() {
        let (orchestrator, _cases) = build_orchestrator(300);
        let session = create_configured_session(&orchestrator, 5, 5).await;
        orchestrator
            .join(&session.code, Role::Patient, UserId("B".into()), "Bob".into())
            .await
            .unwrap();
        orchestrator.start(&session.code, &UserId("A".into())).await.unwrap();
        orchestrator
            .skip_phase(&session.code, &UserId("A".into()), false)
            .await
            .unwrap();

        let first = orchestrator
            .submit_feedback(&session.code, &UserId("B".into()), score_submission(2.0))
            .await
            .unwrap();
        let second = orchestrator
            .submit_feedback(&session.code, &UserId("B".into()), score_submission(4.0))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.overall_performance(), 4.0);
    }

    /// Property — a feedback submission with an empty comment is rejected as
    /// `Validation` before any repository write.
    #[tokio::test]
    async fn submit_feedback_rejects_missing_comment() {
        let (orchestrator, _cases) = build_orchestrator(300);
        let session = create_configured_session(&orchestrator, 5, 5).await;
        orchestrator
            .join(&session.code, Role::Patient, UserId("B".into()), "Bob".into())
            .await
            .unwrap();
        orchestrator.start(&session.code, &UserId("A".into())).await.unwrap();

        let result = orchestrator
            .submit_feedback(
                &session.code,
                &UserId("B".into()),
                FeedbackSubmission {
                    comment: "   ".into(),
                    criteria_scores: vec![CriterionScore::Direct { name: "communication".into(), score: 3.0 }],
                },
            )
            .await;
        assert!(matches!(result, Err(OrchestratorError::Validation(_))));
    }

    /// Non-DOCTOR callers are forbidden from the DOCTOR-only operations.
    #[tokio::test]
    async fn non_doctor_cannot_start_session() {
        let (orchestrator, _cases) = build_orchestrator(300);
        let session = create_configured_session(&orchestrator, 5, 5).await;
        orchestrator
            .join(&session.code, Role::Observer, UserId("C".into()), "Cara".into())
            .await
            .unwrap();
        let result = orchestrator.start(&session.code, &UserId("C".into())).await;
        assert!(matches!(result, Err(OrchestratorError::Forbidden(_))));
    }
}
