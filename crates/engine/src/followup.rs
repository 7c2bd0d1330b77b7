//! Follow-up analysis
//!
//! While a session is collecting or clarifying, each user reply is
//! classified against the question it answers: lexical indicators first,
//! then whether the expected slots were actually extractable, then
//! length heuristics. The class picks the follow-up kind and drives the
//! failure accounting that eventually moves a session into recovery.

use once_cell::sync::Lazy;
use serde::Serialize;

use task_router_core::{Session, SessionState, SlotKind};

/// Classification of a reply to a slot question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseClass {
    /// Answered, and the expected values were extracted.
    Complete,
    /// Nothing usable extracted from a minimal reply.
    Incomplete,
    /// Vague or deferential ("随便", "都行").
    Ambiguous,
    /// A value arrived but failed validation.
    Invalid,
    /// Some expected values arrived, not all.
    Partial,
    /// The user is contradicting an earlier value ("不对", "不是").
    Conflicting,
    /// The user does not know ("不知道").
    Unclear,
    /// The reply talks about something else entirely.
    OffTopic,
}

/// What kind of follow-up the class calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpKind {
    Clarification,
    Completion,
    Correction,
    Validation,
    Disambiguation,
    Specification,
    Confirmation,
}

static CONFLICT_MARKERS: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["不对", "错了", "不是这个", "改成", "换成", "说错了"]);
static UNCLEAR_MARKERS: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["不知道", "不清楚", "不确定", "没想好", "忘了"]);
static AMBIGUOUS_MARKERS: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["随便", "都行", "都可以", "无所谓", "你看着办", "那个", "这个吧"]);

/// Signals about the reply gathered by the orchestrator before
/// classification.
#[derive(Debug, Clone, Default)]
pub struct ReplySignals {
    /// Expected slots the turn actually filled with usable values.
    pub extracted_expected: usize,
    /// Slots the pending question asked for.
    pub expected: usize,
    /// Any extracted value failed validation.
    pub any_invalid: bool,
    /// The turn extracted values for slots outside the expected set.
    pub extracted_other: usize,
}

/// Classify one reply given the gathered signals.
pub fn classify(user_text: &str, signals: &ReplySignals) -> ResponseClass {
    let text = user_text.trim();

    if CONFLICT_MARKERS.iter().any(|m| text.contains(m)) {
        return ResponseClass::Conflicting;
    }
    if UNCLEAR_MARKERS.iter().any(|m| text.contains(m)) {
        return ResponseClass::Unclear;
    }
    if AMBIGUOUS_MARKERS.iter().any(|m| text.contains(m)) {
        return ResponseClass::Ambiguous;
    }

    if signals.any_invalid {
        return ResponseClass::Invalid;
    }
    if signals.expected > 0 && signals.extracted_expected >= signals.expected {
        return ResponseClass::Complete;
    }
    if signals.extracted_expected > 0 {
        return ResponseClass::Partial;
    }
    if signals.extracted_other > 0 {
        // Values arrived, just not for what was asked.
        return ResponseClass::Partial;
    }

    // Nothing extractable: short replies are incomplete answers, long
    // ones have wandered off the question.
    if text.chars().count() > 12 {
        ResponseClass::OffTopic
    } else {
        ResponseClass::Incomplete
    }
}

/// Map a class to the follow-up kind the generator should use.
pub fn follow_up_kind(class: ResponseClass) -> FollowUpKind {
    match class {
        ResponseClass::Complete => FollowUpKind::Confirmation,
        ResponseClass::Incomplete | ResponseClass::Partial => FollowUpKind::Completion,
        ResponseClass::Ambiguous => FollowUpKind::Specification,
        ResponseClass::Invalid => FollowUpKind::Validation,
        ResponseClass::Conflicting => FollowUpKind::Correction,
        ResponseClass::Unclear => FollowUpKind::Clarification,
        ResponseClass::OffTopic => FollowUpKind::Clarification,
    }
}

/// Whether the class counts against the target slot's failure budget.
pub fn counts_as_failure(class: ResponseClass) -> bool {
    matches!(
        class,
        ResponseClass::Invalid | ResponseClass::Incomplete | ResponseClass::Unclear
    )
}

/// What the engine should do after repeated failures on one slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum RecoveryAction {
    /// Keep asking; the budget is not exhausted.
    Continue,
    /// Optional slot: offer to skip it and move on.
    OfferSkip { slot: String },
    /// Required slot: hand the session to a human.
    Handoff { slot: String },
}

/// Update failure accounting for a classified reply; at the per-kind
/// ceiling the session moves to recovery.
pub fn track_failure(
    session: &mut Session,
    slot_name: &str,
    slot_kind: SlotKind,
    slot_required: bool,
    class: ResponseClass,
) -> RecoveryAction {
    if !counts_as_failure(class) {
        session.clear_failed_attempts(slot_name);
        return RecoveryAction::Continue;
    }

    let attempts = session.record_failed_attempt(slot_name);
    let ceiling = slot_kind.failure_ceiling();
    if attempts < ceiling {
        return RecoveryAction::Continue;
    }

    session.state = SessionState::Recovering;
    tracing::info!(
        session_id = %session.session_id,
        slot = slot_name,
        attempts,
        "failure ceiling reached, entering recovery"
    );
    if slot_required {
        RecoveryAction::Handoff {
            slot: slot_name.to_string(),
        }
    } else {
        RecoveryAction::OfferSkip {
            slot: slot_name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals(extracted: usize, expected: usize, invalid: bool) -> ReplySignals {
        ReplySignals {
            extracted_expected: extracted,
            expected,
            any_invalid: invalid,
            extracted_other: 0,
        }
    }

    #[test]
    fn test_lexical_classes() {
        assert_eq!(classify("不对，是上海", &signals(1, 1, false)), ResponseClass::Conflicting);
        assert_eq!(classify("我不知道", &signals(0, 1, false)), ResponseClass::Unclear);
        assert_eq!(classify("随便", &signals(0, 1, false)), ResponseClass::Ambiguous);
    }

    #[test]
    fn test_extraction_classes() {
        assert_eq!(classify("北京", &signals(1, 1, false)), ResponseClass::Complete);
        assert_eq!(classify("北京", &signals(1, 2, false)), ResponseClass::Partial);
        assert_eq!(classify("昨天", &signals(0, 1, true)), ResponseClass::Invalid);
        assert_eq!(classify("嗯", &signals(0, 1, false)), ResponseClass::Incomplete);
        assert_eq!(
            classify("对了我想起来上次去玩的时候天气特别好", &signals(0, 1, false)),
            ResponseClass::OffTopic
        );
    }

    #[test]
    fn test_follow_up_mapping() {
        assert_eq!(follow_up_kind(ResponseClass::Partial), FollowUpKind::Completion);
        assert_eq!(follow_up_kind(ResponseClass::Invalid), FollowUpKind::Validation);
        assert_eq!(follow_up_kind(ResponseClass::Conflicting), FollowUpKind::Correction);
        assert_eq!(follow_up_kind(ResponseClass::Ambiguous), FollowUpKind::Specification);
        assert_eq!(follow_up_kind(ResponseClass::Unclear), FollowUpKind::Clarification);
    }

    #[test]
    fn test_failure_budget_to_handoff() {
        let mut session = Session::new("s", "u");
        session.begin_intent("book_flight");

        for _ in 0..2 {
            let action = track_failure(
                &mut session,
                "departure_date",
                SlotKind::Date,
                true,
                ResponseClass::Invalid,
            );
            assert_eq!(action, RecoveryAction::Continue);
        }
        let action = track_failure(
            &mut session,
            "departure_date",
            SlotKind::Date,
            true,
            ResponseClass::Invalid,
        );
        assert_eq!(
            action,
            RecoveryAction::Handoff {
                slot: "departure_date".to_string()
            }
        );
        assert_eq!(session.state, SessionState::Recovering);
    }

    #[test]
    fn test_optional_slot_offers_skip() {
        let mut session = Session::new("s", "u");
        session.begin_intent("book_flight");
        // Phone-format slots get a tighter budget of two.
        track_failure(&mut session, "contact_phone", SlotKind::Phone, false, ResponseClass::Invalid);
        let action = track_failure(
            &mut session,
            "contact_phone",
            SlotKind::Phone,
            false,
            ResponseClass::Invalid,
        );
        assert_eq!(
            action,
            RecoveryAction::OfferSkip {
                slot: "contact_phone".to_string()
            }
        );
    }

    #[test]
    fn test_success_clears_budget() {
        let mut session = Session::new("s", "u");
        session.begin_intent("book_flight");
        track_failure(&mut session, "departure_date", SlotKind::Date, true, ResponseClass::Invalid);
        track_failure(&mut session, "departure_date", SlotKind::Date, true, ResponseClass::Complete);
        assert!(session.failed_attempts.get("departure_date").is_none());
    }
}
