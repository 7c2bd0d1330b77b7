//! Turn orchestration
//!
//! Drives one user turn end to end: classify, resolve the intent, merge
//! extractions, inherit, synthesize, normalize and validate, then either
//! dispatch the function call or ask the next question. Session mutations
//! roll back to the pre-turn checkpoint when the turn fails.

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use task_router_core::{
    Catalog, CatalogHandle, Error, ErrorCode, ErrorMonitor, InboundContext, IntentDef, Nlu,
    NluContext, NluOutput, Result, RetryConfig, RetryPolicy, Session, SessionState, SessionStore,
    SlotMap, SlotSource, SlotValue, TurnRecord, TurnStatus, UserProfile,
};

use crate::dispatch::Dispatcher;
use crate::followup::{self, RecoveryAction, ReplySignals, ResponseClass};
use crate::graph::{GraphCache, IntentGraph};
use crate::inheritance::InheritanceEngine;
use crate::normalize::{normalize_boolean, normalize_slot};
use crate::question::{select_strategy, ContextStrategy, QuestionGenerator, StrategyFeatures};
use crate::resolver::{IntentResolver, Resolution};
use crate::validate::{cross_validate, validate_slot};

/// Wire status of a processed turn (legacy names preserved).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Completed,
    Incomplete,
    Ambiguous,
    ApiError,
    ValidationError,
    MultiIntentProcessing,
    IntentCancelled,
    IntentPostponed,
    InterruptionHandled,
    RagflowHandled,
    SuggestionRejected,
}

/// Wire response type (legacy names preserved).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    TaskCompletion,
    ApiResult,
    SlotPrompt,
    Disambiguation,
    ErrorWithAlternatives,
    ValidationErrorPrompt,
    MultiIntentWithContinuation,
    CancellationConfirmation,
    PostponementWithSave,
    SmallTalkWithContextReturn,
    RagflowResponse,
    RejectionAcknowledgment,
}

/// One candidate in a disambiguation prompt.
#[derive(Debug, Clone, Serialize)]
pub struct AmbiguousIntent {
    pub intent_name: String,
    pub display_name: String,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Everything the transport layer needs to build the response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub reply: String,
    pub status: ReplyStatus,
    pub response_kind: ResponseKind,
    pub intent: Option<String>,
    pub confidence: f32,
    pub slots: SlotMap,
    pub missing_slots: Vec<String>,
    pub validation_errors: BTreeMap<String, String>,
    pub ambiguous_intents: Vec<AmbiguousIntent>,
    pub api_result: Option<serde_json::Value>,
    pub suggestions: Vec<String>,
    pub next_action: String,
    pub turn_index: u32,
}

impl TurnOutcome {
    fn new(reply: impl Into<String>, status: ReplyStatus, kind: ResponseKind) -> Self {
        Self {
            reply: reply.into(),
            status,
            response_kind: kind,
            intent: None,
            confidence: 0.0,
            slots: SlotMap::new(),
            missing_slots: Vec::new(),
            validation_errors: BTreeMap::new(),
            ambiguous_intents: Vec::new(),
            api_result: None,
            suggestions: Vec::new(),
            next_action: "none".to_string(),
            turn_index: 0,
        }
    }

    fn turn_status(&self) -> TurnStatus {
        match self.status {
            ReplyStatus::Completed | ReplyStatus::IntentCancelled => TurnStatus::Completed,
            ReplyStatus::Incomplete
            | ReplyStatus::MultiIntentProcessing
            | ReplyStatus::IntentPostponed
            | ReplyStatus::InterruptionHandled
            | ReplyStatus::SuggestionRejected => TurnStatus::Incomplete,
            ReplyStatus::Ambiguous => TurnStatus::Ambiguous,
            ReplyStatus::ApiError => TurnStatus::ApiError,
            ReplyStatus::ValidationError => TurnStatus::ValidationError,
            ReplyStatus::RagflowHandled => TurnStatus::Delegated,
        }
    }
}

/// Explicit cancellation phrases.
const CANCEL_MARKERS: [&str; 5] = ["取消", "不订了", "不要了", "算了", "别订了"];

/// Save-for-later phrases; progress survives on the intent stack.
const POSTPONE_MARKERS: [&str; 4] = ["回头再说", "稍后再", "等会再", "先放一放"];

pub struct TurnEngine {
    catalog: CatalogHandle,
    nlu: Arc<dyn Nlu>,
    store: Arc<dyn SessionStore>,
    resolver: IntentResolver,
    inheritance: InheritanceEngine,
    graphs: GraphCache,
    questions: QuestionGenerator,
    dispatcher: Dispatcher,
    monitor: Arc<ErrorMonitor>,
    retry: RetryPolicy,
}

impl TurnEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: CatalogHandle,
        nlu: Arc<dyn Nlu>,
        store: Arc<dyn SessionStore>,
        resolver: IntentResolver,
        questions: QuestionGenerator,
        dispatcher: Dispatcher,
        monitor: Arc<ErrorMonitor>,
    ) -> Self {
        Self {
            catalog,
            nlu,
            store,
            resolver,
            inheritance: InheritanceEngine::new(),
            graphs: GraphCache::new(),
            questions,
            dispatcher,
            monitor,
            retry: RetryPolicy::new(RetryConfig::default()),
        }
    }

    /// Replace the store retry policy (transient storage and network
    /// failures only; turns are idempotent to re-persist).
    pub fn with_retry_policy(mut self, config: RetryConfig) -> Self {
        self.retry = RetryPolicy::new(config);
        self
    }

    pub fn catalog(&self) -> &CatalogHandle {
        &self.catalog
    }

    pub fn evict_graph(&self, intent_name: &str) {
        self.graphs.evict_intent(intent_name);
    }

    /// Process one turn. The session is exclusively held by the caller;
    /// on error all session mutations are rolled back.
    pub async fn process_turn(
        &self,
        session: &mut Session,
        user_text: &str,
        overlay: &InboundContext,
    ) -> Result<TurnOutcome> {
        let started = std::time::Instant::now();
        let checkpoint = session.clone();

        let result = async {
            let mut outcome = self.run_turn(session, user_text, overlay).await?;
            outcome.turn_index = session.turn_count;
            let record = TurnRecord {
                turn_index: session.turn_count,
                user_text: user_text.to_string(),
                recognized_intent: outcome.intent.clone(),
                confidence: outcome.confidence,
                slots_snapshot: session.collected_slots.clone(),
                reply_text: outcome.reply.clone(),
                reply_kind: format!("{:?}", outcome.response_kind),
                status: outcome.turn_status(),
                duration_ms: started.elapsed().as_millis() as u64,
                timestamp: Utc::now(),
            };
            // The history ring is appended only after the turn has been
            // persisted.
            self.retry
                .run("append_turn", || {
                    self.store.append_turn(&session.session_id, &record)
                })
                .await?;
            session.push_turn(record);
            session.touch();
            let snapshot = &*session;
            if let Err(err) = self
                .retry
                .run("put_session", || self.store.put_session(snapshot))
                .await
            {
                // The turn is already appended; the live session and its
                // cached copy carry the state until a later write (or the
                // expiry flush) reaches the store.
                self.monitor.observe(&err.detail);
                err.record();
                tracing::warn!(
                    session_id = %session.session_id,
                    code = %err.code(),
                    "session store write failed, continuing cache-only"
                );
            }
            Ok(outcome)
        }
        .await;

        match result {
            Ok(outcome) => {
                metrics::histogram!("router_turn_duration_ms")
                    .record(started.elapsed().as_millis() as f64);
                Ok(outcome)
            },
            Err(err) => {
                // Observation happens at the boundary that finalizes the
                // error; here we only restore the pre-turn state.
                *session = checkpoint;
                Err(err)
            },
        }
    }

    async fn run_turn(
        &self,
        session: &mut Session,
        user_text: &str,
        overlay: &InboundContext,
    ) -> Result<TurnOutcome> {
        let user_text = user_text.trim();
        if user_text.is_empty() {
            return Err(Error::new(ErrorCode::MissingRequiredField, "empty input"));
        }
        let catalog = self.catalog.current();
        apply_overlay(session, overlay);

        // Profile and classification are independent; fetch together.
        let nlu_context = NluContext {
            session_id: session.session_id.clone(),
            current_intent: session.current_intent.clone(),
            turn_count: session.turn_count,
            catalog_digest: catalog.digest(),
        };
        let (nlu_result, profile_result) = futures::join!(
            self.nlu.classify(user_text, &nlu_context),
            self.store.get_profile(&session.user_id)
        );
        let output = nlu_result?;
        // A missing or failing profile read degrades inheritance, never
        // the turn.
        let profile = profile_result.unwrap_or_else(|err| {
            tracing::warn!(code = %err.code(), "profile read failed, continuing without");
            None
        });

        // Save-for-later keeps the progress on the stack; cancellation
        // discards it. Postponement is checked first because phrases like
        // "先放一放" must not read as cancellation.
        if session.current_intent.is_some()
            && POSTPONE_MARKERS.iter().any(|m| user_text.contains(m))
        {
            let postponed = session.postpone_intent().unwrap_or_default();
            let display = catalog
                .intent(&postponed)
                .map(|i| i.display_name.clone())
                .unwrap_or(postponed);
            let mut outcome = TurnOutcome::new(
                format!("好的，已为您保存{display}的进度，需要继续时告诉我即可。"),
                ReplyStatus::IntentPostponed,
                ResponseKind::PostponementWithSave,
            );
            outcome.next_action = "resume_later".to_string();
            return Ok(outcome);
        }

        // Explicit cancellation short-circuits everything else.
        if session.current_intent.is_some()
            && CANCEL_MARKERS.iter().any(|m| user_text.contains(m))
        {
            let cancelled = session.current_intent.clone().unwrap_or_default();
            let display = catalog
                .intent(&cancelled)
                .map(|i| i.display_name.clone())
                .unwrap_or(cancelled);
            session.cancel_intent();
            session.pending_disambiguation.clear();
            let mut outcome = TurnOutcome::new(
                format!("好的，已为您取消{display}。还有什么可以帮您？"),
                ReplyStatus::IntentCancelled,
                ResponseKind::CancellationConfirmation,
            );
            outcome.next_action = "none".to_string();
            return Ok(outcome);
        }

        // An open disambiguation prompt absorbs the reply first.
        if !session.pending_disambiguation.is_empty() {
            let offered = session.pending_disambiguation.clone();
            if let Some(choice) =
                self.resolver
                    .resolve_disambiguation(&offered, user_text, &catalog)
            {
                session.pending_disambiguation.clear();
                session.begin_intent(&choice);
                return self
                    .collect_and_advance(session, user_text, &output, &catalog, profile.as_ref(), 0.95)
                    .await;
            }
            session.pending_disambiguation.clear();
        }

        match self.resolver.resolve(session, &output, &catalog) {
            Resolution::NewIntent { name, confidence } => {
                session.begin_intent(&name);
                self.collect_and_advance(session, user_text, &output, &catalog, profile.as_ref(), confidence)
                    .await
            },
            Resolution::ContinueIntent { confidence, .. } => {
                self.collect_and_advance(session, user_text, &output, &catalog, profile.as_ref(), confidence)
                    .await
            },
            Resolution::Ambiguous { candidates } => {
                session.state = SessionState::Clarifying;
                session.pending_disambiguation =
                    candidates.iter().map(|c| c.name.clone()).collect();

                let listed: Vec<String> = candidates
                    .iter()
                    .enumerate()
                    .filter_map(|(i, c)| {
                        catalog
                            .intent(&c.name)
                            .map(|intent| format!("{}. {}", i + 1, intent.display_name))
                    })
                    .collect();
                let mut outcome = TurnOutcome::new(
                    format!("您是想办理哪一项？\n{}", listed.join("\n")),
                    ReplyStatus::Ambiguous,
                    ResponseKind::Disambiguation,
                );
                outcome.ambiguous_intents = candidates
                    .iter()
                    .filter_map(|c| {
                        catalog.intent(&c.name).map(|intent| AmbiguousIntent {
                            intent_name: intent.name.clone(),
                            display_name: intent.display_name.clone(),
                            confidence: c.confidence,
                            description: intent.description.clone(),
                        })
                    })
                    .collect();
                outcome.confidence = candidates.first().map(|c| c.confidence).unwrap_or(0.0);
                outcome.next_action = "disambiguate".to_string();
                Ok(outcome)
            },
            Resolution::Unknown => {
                let mut outcome = TurnOutcome::new(
                    "这个问题超出了我能直接办理的范围，已为您转接智能助手。\
                     您也可以告诉我想办理的业务，比如订机票或查询余额。",
                    ReplyStatus::RagflowHandled,
                    ResponseKind::RagflowResponse,
                );
                outcome.next_action = "delegate".to_string();
                outcome.suggestions = catalog
                    .intents()
                    .map(|i| i.display_name.clone())
                    .collect();
                outcome.suggestions.sort();
                Ok(outcome)
            },
        }
    }

    /// The slot-filling half of the turn: merge, inherit, synthesize,
    /// normalize, validate, then dispatch or ask.
    async fn collect_and_advance(
        &self,
        session: &mut Session,
        user_text: &str,
        output: &NluOutput,
        catalog: &Catalog,
        profile: Option<&UserProfile>,
        confidence: f32,
    ) -> Result<TurnOutcome> {
        let intent_name = session
            .current_intent
            .clone()
            .ok_or_else(|| Error::new(ErrorCode::InvalidState, "no intent in flight"))?;
        let intent = catalog
            .intent(&intent_name)
            .ok_or_else(|| {
                Error::new(
                    ErrorCode::ResourceNotFound,
                    format!("intent '{intent_name}' not in catalog"),
                )
            })?
            .clone();
        let graph = self.graphs.get_or_build(&intent, catalog.version)?;
        let today = Utc::now().date_naive();

        // A pending yes/no on an inferred value is answered before any
        // extraction merge.
        let confirmation_answer = self.apply_pending_confirmation(session, user_text);

        let newly_extracted = merge_extractions(session, &intent, output);

        // Classify the reply against the question it answers.
        let classification = if confirmation_answer.is_some() {
            None
        } else {
            session.pending_slot.clone().map(|pending| {
                let signals = ReplySignals {
                    extracted_expected: usize::from(newly_extracted.contains(&pending)),
                    expected: 1,
                    any_invalid: false,
                    extracted_other: newly_extracted.len().saturating_sub(usize::from(
                        newly_extracted.contains(&pending),
                    )),
                };
                followup::classify(user_text, &signals)
            })
        };

        self.inheritance.apply(
            &intent,
            &mut session.collected_slots,
            &session.intent_stack,
            &session.history_ring,
            profile,
        );

        synthesize_computed(session, &graph);
        normalize_and_validate(session, &intent, today);
        resolve_mutex_conflicts(session, &graph);

        let values = session.collected_slots.valid_values();
        let validation = graph.validate_all(&values);
        let invalid = session.collected_slots.invalid_errors();

        let mut outcome = if !invalid.is_empty() {
            self.invalid_outcome(session, &intent, invalid, classification)
        } else if validation.is_ok() {
            self.dispatch_outcome(session, &intent, catalog).await
        } else {
            self.prompt_outcome(session, &intent, &graph, &validation.missing_required, classification)
        };

        // A rejected inferred value turns the follow-up prompt into an
        // acknowledgment so clients render it as such.
        if confirmation_answer == Some(false) && outcome.status == ReplyStatus::Incomplete {
            outcome.status = ReplyStatus::SuggestionRejected;
            outcome.response_kind = ResponseKind::RejectionAcknowledgment;
            outcome.reply = format!("好的，我们重新确认。{}", outcome.reply);
        }

        outcome.intent = Some(intent.name.clone());
        outcome.confidence = confidence;
        // The dispatch path snapshots slots before completion clears them.
        if outcome.slots.is_empty() {
            outcome.slots = session.collected_slots.clone();
        }
        Ok(outcome)
    }

    /// Returns `Some(answer)` when the reply settled a pending
    /// confirmation of an inferred value.
    fn apply_pending_confirmation(&self, session: &mut Session, user_text: &str) -> Option<bool> {
        let pending = session.pending_slot.clone()?;
        let value = session.collected_slots.get(&pending)?;
        let is_inferred = matches!(value.source, SlotSource::Inherited | SlotSource::Default)
            && !value.confirmed
            && value.is_valid();
        if !is_inferred {
            return None;
        }
        match normalize_boolean(user_text) {
            Some(true) => {
                if let Some(value) = session.collected_slots.get_mut(&pending) {
                    value.confirm();
                }
                Some(true)
            },
            Some(false) => {
                session.collected_slots.remove(&pending);
                Some(false)
            },
            None => None,
        }
    }

    fn invalid_outcome(
        &self,
        session: &mut Session,
        intent: &IntentDef,
        invalid: BTreeMap<String, String>,
        classification: Option<ResponseClass>,
    ) -> TurnOutcome {
        // Deterministic target: the first invalid slot in prompt order.
        let (slot_name, error) = invalid
            .iter()
            .next()
            .map(|(k, v)| (k.clone(), v.clone()))
            .expect("invalid map checked non-empty");
        let def = intent.slot(&slot_name);

        let class = classification.unwrap_or(ResponseClass::Invalid);
        let action = match def {
            Some(def) => followup::track_failure(
                session,
                &slot_name,
                def.kind,
                def.required,
                if followup::counts_as_failure(class) {
                    class
                } else {
                    ResponseClass::Invalid
                },
            ),
            None => RecoveryAction::Continue,
        };

        let reply = match &action {
            RecoveryAction::Continue => {
                self.questions.for_invalid(intent, &slot_name, &error, session).text
            },
            RecoveryAction::OfferSkip { slot } => {
                session.collected_slots.remove(slot);
                session.clear_failed_attempts(slot);
                let display = intent
                    .slot(slot)
                    .map(|d| d.display_name.clone())
                    .unwrap_or_else(|| slot.clone());
                format!("{display}多次未能识别，已先为您跳过这一项，稍后可以再补充。")
            },
            RecoveryAction::Handoff { slot } => {
                let display = intent
                    .slot(slot)
                    .map(|d| d.display_name.clone())
                    .unwrap_or_else(|| slot.clone());
                format!("{display}多次未能识别，已为您转接人工客服处理。")
            },
        };

        session.pending_slot = Some(slot_name.clone());
        session.remember_question(reply.clone());
        if session.state != SessionState::Recovering {
            session.state = SessionState::Collecting;
        }

        let mut outcome =
            TurnOutcome::new(reply, ReplyStatus::ValidationError, ResponseKind::ValidationErrorPrompt);
        outcome.validation_errors = invalid;
        outcome.next_action = format!("correct_slot:{slot_name}");
        outcome
    }

    async fn dispatch_outcome(
        &self,
        session: &mut Session,
        intent: &IntentDef,
        catalog: &Catalog,
    ) -> TurnOutcome {
        match self.dispatcher.dispatch(intent, &session.collected_slots).await {
            Ok(reply) => {
                let dispatched_slots = session.collected_slots.clone();
                let resumed = session.complete_intent();
                let text = match resumed.as_deref().and_then(|name| catalog.intent(name)) {
                    Some(next) => {
                        format!("{}\n我们继续之前的{}。", reply.text, next.display_name)
                    },
                    None => reply.text,
                };
                let mut outcome =
                    TurnOutcome::new(text, ReplyStatus::Completed, ResponseKind::ApiResult);
                outcome.api_result = reply.api_result;
                outcome.slots = dispatched_slots;
                outcome.next_action = match resumed {
                    Some(name) => format!("resume_intent:{name}"),
                    None => "none".to_string(),
                };
                outcome
            },
            Err(err) => {
                // The intent stays in flight so the user can retry.
                self.monitor.observe(&err.detail);
                err.record();
                tracing::error!(
                    code = %err.code(),
                    intent = %intent.name,
                    "function dispatch failed"
                );
                let mut outcome = TurnOutcome::new(
                    format!("{}，您可以稍后再试。", err.detail.user_message()),
                    ReplyStatus::ApiError,
                    ResponseKind::ErrorWithAlternatives,
                );
                outcome.suggestions = vec![
                    "稍后再试一次".to_string(),
                    "换一个时间或条件".to_string(),
                    "转人工客服".to_string(),
                ];
                outcome.next_action = "retry_dispatch".to_string();
                outcome
            },
        }
    }

    fn prompt_outcome(
        &self,
        session: &mut Session,
        intent: &IntentDef,
        graph: &IntentGraph,
        missing_required: &[String],
        classification: Option<ResponseClass>,
    ) -> TurnOutcome {
        // Ask in dependency order: fillable missing slots first.
        let values = session.collected_slots.valid_values();
        let fillable = graph.next_fillable(&values);
        let ordered_missing: Vec<&str> = fillable
            .iter()
            .copied()
            .filter(|name| missing_required.iter().any(|m| m == name))
            .chain(
                missing_required
                    .iter()
                    .map(String::as_str)
                    .filter(|name| !fillable.contains(name)),
            )
            .collect();

        let required_names: Vec<&str> = intent.required_slots().map(|s| s.name.as_str()).collect();
        let features = StrategyFeatures {
            missing_count: ordered_missing.len(),
            invalid_count: 0,
            failed_attempts_on_target: ordered_missing
                .first()
                .and_then(|name| session.failed_attempts.get(*name))
                .copied()
                .unwrap_or(0),
            completion_rate: session.completion_rate(&required_names),
            engagement: session.engagement,
            time_pressure: session.time_pressure,
            unconfirmed_inferred: session
                .collected_slots
                .iter()
                .filter(|(_, v)| {
                    matches!(v.source, SlotSource::Inherited | SlotSource::Default)
                        && !v.confirmed
                        && v.is_valid()
                })
                .count(),
            user_uncertain: matches!(
                classification,
                Some(ResponseClass::Unclear) | Some(ResponseClass::Ambiguous)
            ),
        };
        let strategy = select_strategy(&features);

        // Track non-answers against the pending slot's budget.
        if let (Some(class), Some(pending)) = (classification, session.pending_slot.clone()) {
            if let Some(def) = intent.slot(&pending) {
                let action =
                    followup::track_failure(session, &pending, def.kind, def.required, class);
                if let RecoveryAction::Handoff { slot } | RecoveryAction::OfferSkip { slot } =
                    action
                {
                    let display = intent
                        .slot(&slot)
                        .map(|d| d.display_name.clone())
                        .unwrap_or_else(|| slot.clone());
                    let reply = if def.required {
                        format!("{display}多次未能确认，已为您转接人工客服处理。")
                    } else {
                        session.collected_slots.remove(&slot);
                        session.clear_failed_attempts(&slot);
                        format!("{display}先跳过，我们继续其他信息。")
                    };
                    let mut outcome = TurnOutcome::new(
                        reply,
                        ReplyStatus::Incomplete,
                        ResponseKind::SlotPrompt,
                    );
                    outcome.missing_slots =
                        ordered_missing.iter().map(|s| s.to_string()).collect();
                    outcome.next_action = "recovery".to_string();
                    return outcome;
                }
            }
        }

        let question =
            self.questions
                .for_missing(intent, &ordered_missing, session, strategy);
        session.pending_slot = question.targets.first().cloned();
        session.state = SessionState::Collecting;
        session.remember_question(question.text.clone());

        let mut outcome = TurnOutcome::new(
            question.text,
            ReplyStatus::Incomplete,
            ResponseKind::SlotPrompt,
        );
        outcome.missing_slots = ordered_missing.iter().map(|s| s.to_string()).collect();
        outcome.next_action = session
            .pending_slot
            .as_ref()
            .map(|slot| format!("collect_slot:{slot}"))
            .unwrap_or_else(|| "collect".to_string());
        outcome
    }
}

/// Clamped engagement / time-pressure overrides from the request overlay.
fn apply_overlay(session: &mut Session, overlay: &InboundContext) {
    if let Some(value) = overlay.temp_preferences.get("engagement").and_then(|v| v.as_f64()) {
        session.engagement = value.clamp(0.0, 1.0) as f32;
    }
    if let Some(value) = overlay
        .temp_preferences
        .get("time_pressure")
        .and_then(|v| v.as_f64())
    {
        session.time_pressure = value.clamp(0.0, 1.0) as f32;
    }
}

/// Merge this turn's NLU extractions into the session slot table.
/// Returns the names that received a new value.
fn merge_extractions(session: &mut Session, intent: &IntentDef, output: &NluOutput) -> Vec<String> {
    let mut merged = Vec::new();
    for (name, extraction) in &output.slots {
        let Some(_def) = intent.slot(name) else {
            tracing::debug!(slot = %name, intent = %intent.name, "extraction for undefined slot dropped");
            continue;
        };
        match session.collected_slots.get_mut(name) {
            Some(existing) => {
                if existing.final_text() == extraction.extracted {
                    continue;
                }
                // The user said it this turn; it replaces whatever was
                // there, as a correction if the old value had passed.
                existing.set_corrected(extraction.extracted.clone());
                existing.confidence = extraction.confidence;
            },
            None => {
                session.collected_slots.insert(SlotValue::extracted(
                    name,
                    extraction.extracted.clone(),
                    extraction.confidence,
                ));
            },
        }
        merged.push(name.clone());
    }
    // Re-promote parked values the user re-stated.
    for name in merged.iter() {
        session.partial_slots.remove(name);
    }
    merged
}

fn synthesize_computed(session: &mut Session, graph: &IntentGraph) {
    let values: BTreeMap<String, String> = session
        .collected_slots
        .iter()
        .filter(|(_, v)| !v.is_invalid())
        .map(|(k, v)| (k.clone(), v.final_text()))
        .collect();
    for (target, value) in graph.synthesize_computed(&values) {
        session.collected_slots.insert(
            SlotValue::extracted(&target, value, 0.9).with_source(SlotSource::Suggested),
        );
    }
}

/// Run the two validation passes over every slot that needs them.
fn normalize_and_validate(session: &mut Session, intent: &IntentDef, today: NaiveDate) {
    for (name, value) in session.collected_slots.iter_mut() {
        let Some(def) = intent.slot(name) else {
            continue;
        };
        if value.normalized.is_none() && !value.is_invalid() {
            match normalize_slot(def, &value.extracted, today) {
                Ok(normalized) => value.set_valid(normalized),
                Err(error) => value.set_invalid(error),
            }
        }
        if let Some(normalized) = value.normalized.clone() {
            if let Err(error) = validate_slot(def, &normalized, today) {
                value.set_invalid(error);
            }
        }
    }

    for (slot_name, error) in cross_validate(intent, &session.collected_slots) {
        if let Some(value) = session.collected_slots.get_mut(&slot_name) {
            value.set_invalid(error);
        }
    }
}

/// MUTEX losers move to `partial_slots` so a later correction can
/// re-promote them; the higher-confidence side stays.
fn resolve_mutex_conflicts(session: &mut Session, graph: &IntentGraph) {
    let values = session.collected_slots.valid_values();
    let validation = graph.validate_all(&values);
    for conflict in validation.conflicts {
        let left_confidence = session
            .collected_slots
            .get(&conflict.left)
            .map(|v| v.confidence)
            .unwrap_or(0.0);
        let right_confidence = session
            .collected_slots
            .get(&conflict.right)
            .map(|v| v.confidence)
            .unwrap_or(0.0);
        let loser = if left_confidence >= right_confidence {
            conflict.right
        } else {
            conflict.left
        };
        if let Some(removed) = session.collected_slots.remove(&loser) {
            tracing::info!(slot = %loser, "mutex conflict, parking lower-confidence value");
            session.partial_slots.insert(loser, removed.raw_text);
        }
    }
}
