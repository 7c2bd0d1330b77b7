//! End-to-end dialogue scenarios against the default catalog, with a
//! rule-based mock NLU and a scripted function executor.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use task_router_config::default_catalog;
use task_router_core::{
    CatalogHandle, CircuitBreaker, CircuitBreakerConfig, Error, ErrorCode, ErrorMonitor,
    ExtractedSlot, FunctionExecutor, FunctionOutcome, InboundContext, IntentCandidate, Nlu,
    NluContext, NluOutput, Result, Session, SessionState,
};
use task_router_engine::{
    Dispatcher, IntentResolver, QuestionGenerator, ReplyStatus, ResolverConfig, ResponseKind,
    TurnEngine,
};
use task_router_nlu::{KeywordNlu, ResilientNlu};
use task_router_persistence::InMemoryStore;

/// Context-free pattern NLU for the default catalog; close enough to the
/// real backend for scenario flows.
struct RuleNlu;

fn slot(text: &str, confidence: f32) -> ExtractedSlot {
    ExtractedSlot {
        extracted: text.to_string(),
        raw_text: text.to_string(),
        confidence,
    }
}

const CITIES: [&str; 6] = ["北京", "上海", "广州", "深圳", "杭州", "成都"];
const DATE_WORDS: [&str; 5] = ["今天", "明天", "后天", "大后天", "昨天"];

#[async_trait]
impl Nlu for RuleNlu {
    async fn classify(&self, utterance: &str, _context: &NluContext) -> Result<NluOutput> {
        let mut output = NluOutput::default();

        if utterance.contains("机票") || utterance.contains("航班") {
            output.candidates.push(IntentCandidate::new("book_flight", 0.92));
        } else if utterance.contains("火车票") {
            output.candidates.push(IntentCandidate::new("book_train", 0.92));
        } else if utterance.contains("余额") {
            output.candidates.push(IntentCandidate::new("check_balance", 0.85));
        } else if utterance.contains("订票") {
            output.candidates.push(IntentCandidate::new("book_flight", 0.62));
            output.candidates.push(IntentCandidate::new("book_train", 0.60));
            output.candidates.push(IntentCandidate::new("book_movie", 0.57));
        }

        // Slot extractions by surface patterns.
        for city in CITIES {
            if utterance.contains(&format!("从{city}")) {
                output.slots.insert("departure_city".to_string(), slot(city, 0.9));
            }
            if utterance.contains(&format!("到{city}")) || utterance.contains(&format!("去{city}")) {
                output.slots.insert("arrival_city".to_string(), slot(city, 0.9));
            }
        }
        for word in DATE_WORDS {
            if utterance.contains(word) {
                output.slots.insert("departure_date".to_string(), slot(word, 0.85));
                break;
            }
        }
        if let Some(digits) = utterance
            .split(|c: char| !c.is_ascii_digit())
            .find(|s| s.len() >= 16)
        {
            output.slots.insert("card_number".to_string(), slot(digits, 0.9));
        }

        output.sort();
        Ok(output)
    }

    fn name(&self) -> &str {
        "rule_nlu"
    }
}

struct ScriptedExecutor {
    calls: AtomicU32,
}

#[async_trait]
impl FunctionExecutor for ScriptedExecutor {
    async fn call(
        &self,
        function_name: &str,
        slots: &HashMap<String, String>,
        _deadline: Duration,
    ) -> Result<FunctionOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match function_name {
            "flight_booking" => {
                assert!(slots.contains_key("departure_city"));
                assert!(slots.contains_key("arrival_city"));
                assert!(slots.contains_key("departure_date"));
                Ok(FunctionOutcome {
                    success: true,
                    message: None,
                    data: Some(serde_json::json!({ "order_id": "FL-1024" })),
                    error: None,
                    transient: false,
                })
            },
            "balance_inquiry" => Ok(FunctionOutcome {
                success: true,
                message: None,
                data: Some(serde_json::json!({ "balance": "8888.00" })),
                error: None,
                transient: false,
            }),
            other => Ok(FunctionOutcome {
                success: false,
                message: None,
                data: None,
                error: Some(format!("unknown function {other}")),
                transient: false,
            }),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct Harness {
    engine: TurnEngine,
    store: Arc<InMemoryStore>,
    executor: Arc<ScriptedExecutor>,
}

fn harness_with_nlu(nlu: Arc<dyn Nlu>) -> Harness {
    let catalog = CatalogHandle::new(default_catalog(1));
    let store = Arc::new(InMemoryStore::new());
    let executor = Arc::new(ScriptedExecutor {
        calls: AtomicU32::new(0),
    });
    let engine = TurnEngine::new(
        catalog,
        nlu,
        store.clone(),
        IntentResolver::new(ResolverConfig::default()),
        QuestionGenerator::default(),
        Dispatcher::new(executor.clone(), Duration::from_secs(1)),
        Arc::new(ErrorMonitor::default()),
    );
    Harness {
        engine,
        store,
        executor,
    }
}

fn harness() -> Harness {
    harness_with_nlu(Arc::new(RuleNlu))
}

async fn turn(
    harness: &Harness,
    session: &mut Session,
    text: &str,
) -> task_router_engine::TurnOutcome {
    harness
        .engine
        .process_turn(session, text, &InboundContext::default())
        .await
        .expect("turn should not fail")
}

#[tokio::test]
async fn s1_complete_booking_in_one_turn() {
    let h = harness();
    let mut session = Session::new("s1", "u1");

    let outcome = turn(&h, &mut session, "我想订一张明天从北京到上海的机票").await;

    assert_eq!(outcome.status, ReplyStatus::Completed);
    assert_eq!(outcome.response_kind, ResponseKind::ApiResult);
    assert_eq!(outcome.intent.as_deref(), Some("book_flight"));
    assert_eq!(outcome.api_result.unwrap()["order_id"], "FL-1024");

    let tomorrow = (Utc::now().date_naive() + ChronoDuration::days(1))
        .format("%Y-%m-%d")
        .to_string();
    assert_eq!(
        outcome.slots.get("departure_city").unwrap().final_text(),
        "北京"
    );
    assert_eq!(outcome.slots.get("arrival_city").unwrap().final_text(), "上海");
    assert_eq!(
        outcome.slots.get("departure_date").unwrap().final_text(),
        tomorrow
    );
    assert_eq!(h.executor.calls.load(Ordering::SeqCst), 1);
    // Intent completed and cleared.
    assert!(session.current_intent.is_none());
    assert_eq!(session.state, SessionState::Active);
}

#[tokio::test]
async fn s2_missing_slots_progressive_prompt() {
    let h = harness();
    let mut session = Session::new("s2", "u2");

    let outcome = turn(&h, &mut session, "我要订机票").await;

    assert_eq!(outcome.status, ReplyStatus::Incomplete);
    assert_eq!(outcome.response_kind, ResponseKind::SlotPrompt);
    for required in ["departure_city", "arrival_city", "departure_date"] {
        assert!(
            outcome.missing_slots.iter().any(|s| s == required),
            "missing_slots should contain {required}"
        );
    }
    // Asks exactly the top-priority missing slot.
    assert!(outcome.reply.contains("出发城市") || outcome.reply.contains("城市"));
    assert_eq!(session.pending_slot.as_deref(), Some("departure_city"));
    assert_eq!(h.executor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn s3_same_city_rejected() {
    let h = harness();
    let mut session = Session::new("s3", "u3");

    turn(&h, &mut session, "我要订机票，从北京出发").await;
    assert_eq!(
        session.collected_slots.get("departure_city").unwrap().final_text(),
        "北京"
    );

    let outcome = turn(&h, &mut session, "到北京").await;
    assert_eq!(outcome.status, ReplyStatus::ValidationError);
    assert_eq!(outcome.response_kind, ResponseKind::ValidationErrorPrompt);
    assert!(outcome
        .validation_errors
        .get("arrival_city")
        .unwrap()
        .contains("不能相同"));
    // The departure city survives untouched.
    assert_eq!(
        session.collected_slots.get("departure_city").unwrap().final_text(),
        "北京"
    );
}

#[tokio::test]
async fn s4_ambiguous_booking() {
    let h = harness();
    let mut session = Session::new("s4", "u4");

    let outcome = turn(&h, &mut session, "我想订票").await;

    assert_eq!(outcome.status, ReplyStatus::Ambiguous);
    assert_eq!(outcome.response_kind, ResponseKind::Disambiguation);
    assert!(outcome.ambiguous_intents.len() >= 2);
    for candidate in &outcome.ambiguous_intents {
        assert!(candidate.confidence >= 0.5);
    }
    // Ordered by confidence descending.
    let confidences: Vec<f32> = outcome.ambiguous_intents.iter().map(|c| c.confidence).collect();
    let mut sorted = confidences.clone();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
    assert_eq!(confidences, sorted);

    // Selecting by ordinal resolves the ambiguity.
    let outcome = turn(&h, &mut session, "第一个").await;
    assert_eq!(outcome.intent.as_deref(), Some("book_flight"));
    assert_eq!(outcome.status, ReplyStatus::Incomplete);
}

#[tokio::test]
async fn s5_nlu_outage_uses_keyword_fallback() {
    struct DownNlu;

    #[async_trait]
    impl Nlu for DownNlu {
        async fn classify(&self, _utterance: &str, _context: &NluContext) -> Result<NluOutput> {
            Err(Error::new(ErrorCode::ExternalTimeout, "nlu down"))
        }

        fn name(&self) -> &str {
            "down"
        }
    }

    let catalog = CatalogHandle::new(default_catalog(1));
    let breaker = Arc::new(CircuitBreaker::new(
        "nlu",
        CircuitBreakerConfig {
            failure_threshold: 2,
            window_secs: 60,
            recovery_timeout_secs: 3600,
            half_open_max_calls: 1,
        },
    ));
    let resilient = Arc::new(ResilientNlu::new(
        Arc::new(DownNlu),
        Arc::new(KeywordNlu::new(catalog.clone())),
        breaker,
    ));
    let h = harness_with_nlu(resilient);

    let mut session = Session::new("s5", "u5");
    for _ in 0..3 {
        // Every turn keeps producing a typed reply, breaker open or not.
        let outcome = turn(&h, &mut session, "查询余额").await;
        assert_eq!(outcome.intent.as_deref(), Some("check_balance"));
        assert_eq!(outcome.status, ReplyStatus::Incomplete);
        assert!(outcome.missing_slots.iter().any(|s| s == "card_number"));
        // Fallback confidence stays low.
        assert!(outcome.confidence <= 0.65);
    }
}

#[tokio::test]
async fn s6_past_date_rejected() {
    let h = harness();
    let mut session = Session::new("s6", "u6");

    let outcome = turn(&h, &mut session, "我想订昨天从北京到上海的机票").await;

    assert_eq!(outcome.status, ReplyStatus::ValidationError);
    assert!(outcome
        .validation_errors
        .get("departure_date")
        .unwrap()
        .contains("过去的日期"));
    // The city slots stay valid.
    assert!(session.collected_slots.get("departure_city").unwrap().is_valid());
    assert!(session.collected_slots.get("arrival_city").unwrap().is_valid());

    // A corrected date completes the booking.
    let outcome = turn(&h, &mut session, "改成明天").await;
    assert_eq!(outcome.status, ReplyStatus::Completed);
}

#[tokio::test]
async fn multi_turn_collection_to_completion() {
    let h = harness();
    let mut session = Session::new("s7", "u7");

    let outcome = turn(&h, &mut session, "我要订机票").await;
    assert_eq!(outcome.status, ReplyStatus::Incomplete);

    let outcome = turn(&h, &mut session, "从北京出发").await;
    assert_eq!(outcome.status, ReplyStatus::Incomplete);
    assert!(outcome.missing_slots.iter().any(|s| s == "arrival_city"));

    let outcome = turn(&h, &mut session, "到上海").await;
    assert_eq!(outcome.status, ReplyStatus::Incomplete);
    assert!(outcome.missing_slots.iter().any(|s| s == "departure_date"));

    let outcome = turn(&h, &mut session, "明天").await;
    assert_eq!(outcome.status, ReplyStatus::Completed);
    assert_eq!(outcome.api_result.unwrap()["order_id"], "FL-1024");

    // Four turns were persisted, in order, before the ring was updated.
    let turns = h.store.turns_for("s7");
    assert_eq!(turns.len(), 4);
    assert_eq!(session.turn_count, 4);
    assert!(turns.windows(2).all(|w| w[0].turn_index < w[1].turn_index));
}

#[tokio::test]
async fn intent_switch_pushes_and_resumes() {
    let h = harness();
    let mut session = Session::new("s8", "u8");

    turn(&h, &mut session, "我要订机票，从北京出发").await;
    assert_eq!(session.current_intent.as_deref(), Some("book_flight"));

    // A confident balance query suspends the booking.
    let outcome = turn(&h, &mut session, "先帮我查询余额，卡号6222021234567890123").await;
    assert_eq!(outcome.intent.as_deref(), Some("check_balance"));
    assert_eq!(outcome.status, ReplyStatus::Completed);

    // Completing the query resumed the booking with its slot intact.
    assert_eq!(session.current_intent.as_deref(), Some("book_flight"));
    assert!(outcome.next_action.contains("resume_intent"));
    assert_eq!(
        session.collected_slots.get("departure_city").unwrap().final_text(),
        "北京"
    );
}

#[tokio::test]
async fn cancellation_clears_intent() {
    let h = harness();
    let mut session = Session::new("s9", "u9");

    turn(&h, &mut session, "我要订机票").await;
    let outcome = turn(&h, &mut session, "算了，不订了").await;

    assert_eq!(outcome.status, ReplyStatus::IntentCancelled);
    assert_eq!(outcome.response_kind, ResponseKind::CancellationConfirmation);
    assert!(session.current_intent.is_none());
    assert!(session.collected_slots.is_empty());
}

#[tokio::test]
async fn postponement_saves_progress_for_resume() {
    let h = harness();
    let mut session = Session::new("s15", "u15");

    turn(&h, &mut session, "我要订机票，从北京出发").await;
    let outcome = turn(&h, &mut session, "先放一放，等会再弄").await;
    assert_eq!(outcome.status, ReplyStatus::IntentPostponed);
    assert_eq!(outcome.response_kind, ResponseKind::PostponementWithSave);
    assert!(session.current_intent.is_none());
    assert_eq!(session.intent_stack.len(), 1);

    // Finishing another task pops the saved booking back, slots intact.
    let outcome = turn(&h, &mut session, "查询余额，卡号6222021234567890123").await;
    assert_eq!(outcome.status, ReplyStatus::Completed);
    assert_eq!(session.current_intent.as_deref(), Some("book_flight"));
    assert_eq!(
        session.collected_slots.get("departure_city").unwrap().final_text(),
        "北京"
    );
}

#[tokio::test]
async fn unknown_utterance_delegates() {
    let h = harness();
    let mut session = Session::new("s10", "u10");

    let outcome = turn(&h, &mut session, "给我讲个笑话吧").await;
    assert_eq!(outcome.status, ReplyStatus::RagflowHandled);
    assert_eq!(outcome.response_kind, ResponseKind::RagflowResponse);
    assert!(!outcome.suggestions.is_empty());
}

#[tokio::test]
async fn empty_input_is_typed_error() {
    let h = harness();
    let mut session = Session::new("s11", "u11");
    let before = session.clone();

    let err = h
        .engine
        .process_turn(&mut session, "   ", &InboundContext::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::MissingRequiredField);
    // The session rolled back to its checkpoint.
    assert_eq!(session.turn_count, before.turn_count);
    assert_eq!(session.state, before.state);
}

#[tokio::test]
async fn profile_inheritance_fills_departure_city() {
    let h = harness();
    let mut profile = task_router_core::UserProfile {
        user_id: "u12".to_string(),
        ..Default::default()
    };
    profile
        .preferences
        .insert("home_city".to_string(), "杭州".to_string());
    h.store.seed_profile(profile);

    let mut session = Session::new("s12", "u12");
    let outcome = turn(&h, &mut session, "我要订机票").await;

    // Departure city inherited from the profile, so the first question
    // moves on to the arrival city.
    assert_eq!(
        session.collected_slots.get("departure_city").unwrap().final_text(),
        "杭州"
    );
    assert!(outcome.missing_slots.iter().all(|s| s != "departure_city"));
    assert!(outcome.missing_slots.iter().any(|s| s == "arrival_city"));
}

#[tokio::test]
async fn repeated_invalid_dates_reach_recovery() {
    let h = harness();
    let mut session = Session::new("s13", "u13");

    turn(&h, &mut session, "我要订机票，从北京到上海").await;

    // Three past dates exhaust the date slot's failure budget.
    let first = turn(&h, &mut session, "昨天").await;
    assert_eq!(first.status, ReplyStatus::ValidationError);
    // Clear the rejected value so the next turn re-extracts cleanly.
    let second = turn(&h, &mut session, "还是昨天").await;
    assert_eq!(second.status, ReplyStatus::ValidationError);
    let third = turn(&h, &mut session, "就要昨天").await;
    assert_eq!(third.status, ReplyStatus::ValidationError);
    assert!(third.reply.contains("人工"));
    assert_eq!(session.state, SessionState::Recovering);
}

#[tokio::test]
async fn question_not_repeated_verbatim() {
    let h = harness();
    let mut session = Session::new("s14", "u14");

    let first = turn(&h, &mut session, "我要订机票").await;
    // An unhelpful answer forces a re-ask of the same slot.
    let second = turn(&h, &mut session, "嗯").await;

    assert_eq!(second.status, ReplyStatus::Incomplete);
    assert_ne!(first.reply, second.reply);
}

#[tokio::test]
async fn store_write_outage_degrades_to_cache_only() {
    use task_router_core::{RetryConfig, SessionStore, TurnRecord, UserProfile};

    // Turns still append, but the periodic session write is down.
    struct WriteFailingStore {
        inner: InMemoryStore,
    }

    #[async_trait]
    impl SessionStore for WriteFailingStore {
        async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
            self.inner.get_session(session_id).await
        }

        async fn put_session(&self, _session: &Session) -> Result<()> {
            Err(Error::new(ErrorCode::StorageConnection, "store down"))
        }

        async fn append_turn(&self, session_id: &str, turn: &TurnRecord) -> Result<()> {
            self.inner.append_turn(session_id, turn).await
        }

        async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
            self.inner.get_profile(user_id).await
        }

        async fn put_profile(&self, profile: &UserProfile) -> Result<()> {
            self.inner.put_profile(profile).await
        }

        async fn delete_session(&self, session_id: &str) -> Result<()> {
            self.inner.delete_session(session_id).await
        }

        fn name(&self) -> &str {
            "write_failing"
        }
    }

    let engine = TurnEngine::new(
        CatalogHandle::new(default_catalog(1)),
        Arc::new(RuleNlu),
        Arc::new(WriteFailingStore {
            inner: InMemoryStore::new(),
        }),
        IntentResolver::new(ResolverConfig::default()),
        QuestionGenerator::default(),
        Dispatcher::new(
            Arc::new(ScriptedExecutor {
                calls: AtomicU32::new(0),
            }),
            Duration::from_secs(1),
        ),
        Arc::new(ErrorMonitor::default()),
    )
    .with_retry_policy(RetryConfig {
        max_retries: 1,
        initial_backoff_ms: 1,
        max_backoff_ms: 2,
        multiplier: 2.0,
    });

    let mut session = Session::new("s16", "u16");
    let outcome = engine
        .process_turn(&mut session, "我要订机票", &InboundContext::default())
        .await
        .expect("store write outage must not fail the turn");
    assert_eq!(outcome.status, ReplyStatus::Incomplete);
    // The in-memory session kept the turn even though the store write
    // was lost.
    assert_eq!(session.turn_count, 1);
}
