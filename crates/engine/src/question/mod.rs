//! Question generation
//!
//! Chooses what to ask next when a turn leaves slots missing or invalid.
//! A context strategy is selected as a pure function of the session
//! state; candidates come from the slot's own prompt template plus the
//! shared library, scored by confidence, context relevance and
//! personalization, minus a repetition penalty over the per-user
//! recent-question ring.

pub mod templates;

use serde::Serialize;
use std::collections::HashSet;

use task_router_core::{IntentDef, QuestionKind, Session, SlotDef};

use self::templates::{expand, for_slot};

/// How the next question approaches the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextStrategy {
    /// Initial collection; walk the missing slots one at a time.
    Progressive,
    /// Zero in on a single slot.
    Focused,
    /// Confirm inferred values before dispatch.
    Confirmatory,
    /// Prior failures on the target; slow down and show examples.
    Recovery,
    /// Time pressure; compact multi-slot prompt.
    Efficient,
    /// The user seems unsure; offer guidance.
    Exploratory,
}

/// Phrasing register, adapted to engagement and time pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStyle {
    Friendly,
    Concise,
    Detailed,
    Professional,
}

/// Inputs to strategy selection; derived from the session each turn.
#[derive(Debug, Clone)]
pub struct StrategyFeatures {
    pub missing_count: usize,
    pub invalid_count: usize,
    pub failed_attempts_on_target: u32,
    pub completion_rate: f32,
    pub engagement: f32,
    pub time_pressure: f32,
    /// Inferred (inherited/default) values awaiting confirmation.
    pub unconfirmed_inferred: usize,
    /// Lexical uncertainty in the last reply ("不知道", "随便", ...).
    pub user_uncertain: bool,
}

/// Pure strategy selection; first matching rule wins.
pub fn select_strategy(features: &StrategyFeatures) -> ContextStrategy {
    if features.failed_attempts_on_target > 0 || features.invalid_count > 0 {
        return ContextStrategy::Recovery;
    }
    if features.user_uncertain {
        return ContextStrategy::Exploratory;
    }
    if features.time_pressure >= 0.6 && features.missing_count > 1 {
        return ContextStrategy::Efficient;
    }
    if features.completion_rate >= 0.8 && features.unconfirmed_inferred > 0 {
        return ContextStrategy::Confirmatory;
    }
    if features.missing_count == 1 || features.engagement < 0.4 {
        return ContextStrategy::Focused;
    }
    ContextStrategy::Progressive
}

fn preferred_style(engagement: f32, time_pressure: f32) -> QuestionStyle {
    if time_pressure >= 0.6 {
        QuestionStyle::Concise
    } else if engagement >= 0.6 {
        QuestionStyle::Friendly
    } else {
        QuestionStyle::Detailed
    }
}

/// A scored question candidate.
#[derive(Debug, Clone)]
struct Candidate {
    text: String,
    kind: QuestionKind,
    confidence: f32,
    context_relevance: f32,
    personalization: f32,
    repetition_penalty: f32,
}

impl Candidate {
    fn total_score(&self) -> f32 {
        self.confidence * 0.4 + self.context_relevance * 0.3 + self.personalization * 0.3
            - self.repetition_penalty
    }
}

/// The emitted question plus bookkeeping for the envelope.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedQuestion {
    pub text: String,
    pub kind: QuestionKind,
    pub strategy: ContextStrategy,
    /// Slots the question targets, first is primary.
    pub targets: Vec<String>,
}

pub struct QuestionGenerator {
    /// Candidates generated per slot before scoring.
    max_candidates: usize,
}

impl QuestionGenerator {
    pub fn new(max_candidates: usize) -> Self {
        Self { max_candidates }
    }

    /// Generate the next question for the missing slots (resolution
    /// order, required first; the caller passes them that way).
    pub fn for_missing(
        &self,
        intent: &IntentDef,
        missing: &[&str],
        session: &Session,
        strategy: ContextStrategy,
    ) -> GeneratedQuestion {
        let defs: Vec<&SlotDef> = missing.iter().filter_map(|name| intent.slot(name)).collect();

        if strategy == ContextStrategy::Efficient && defs.len() > 1 {
            return self.compact_prompt(&defs, strategy);
        }

        let Some(target) = defs.first() else {
            // Nothing concrete to ask; fall back to an open prompt.
            return GeneratedQuestion {
                text: format!("请补充{}所需的信息。", intent.display_name),
                kind: QuestionKind::Direct,
                strategy,
                targets: Vec::new(),
            };
        };
        self.for_slot_target(target, session, strategy, None)
    }

    /// Generate a clarifying question for an invalid slot, quoting the
    /// validation error.
    pub fn for_invalid(
        &self,
        intent: &IntentDef,
        slot_name: &str,
        error: &str,
        session: &Session,
    ) -> GeneratedQuestion {
        match intent.slot(slot_name) {
            Some(def) => self.for_slot_target(def, session, ContextStrategy::Recovery, Some(error)),
            None => GeneratedQuestion {
                text: error.to_string(),
                kind: QuestionKind::Clarification,
                strategy: ContextStrategy::Recovery,
                targets: vec![slot_name.to_string()],
            },
        }
    }

    fn for_slot_target(
        &self,
        def: &SlotDef,
        session: &Session,
        strategy: ContextStrategy,
        error: Option<&str>,
    ) -> GeneratedQuestion {
        let style = preferred_style(session.engagement, session.time_pressure);
        let mut candidates: Vec<Candidate> = Vec::new();

        // The slot's own prompt template is the strongest candidate.
        if let Some(template) = def.prompt_template.as_deref() {
            candidates.push(Candidate {
                text: expand(template, def),
                kind: QuestionKind::Direct,
                confidence: 1.0,
                context_relevance: 0.9,
                personalization: 0.7,
                repetition_penalty: 0.0,
            });
        }

        for template in for_slot(def).iter().take(self.max_candidates) {
            let relevance = match (strategy, template.kind) {
                (ContextStrategy::Recovery, QuestionKind::Clarification) => 1.0,
                (ContextStrategy::Recovery, QuestionKind::Suggestion) => 0.9,
                (ContextStrategy::Exploratory, QuestionKind::Suggestion) => 1.0,
                (ContextStrategy::Exploratory, QuestionKind::Choice) => 0.9,
                (ContextStrategy::Confirmatory, QuestionKind::Confirmation) => 1.0,
                (_, QuestionKind::Direct) => 0.8,
                (_, QuestionKind::Choice) => 0.8,
                _ => 0.5,
            };
            candidates.push(Candidate {
                text: expand(template.text, def),
                kind: template.kind,
                confidence: 0.5 + 0.1 * template.priority as f32,
                context_relevance: relevance,
                personalization: if template.style == style { 1.0 } else { 0.4 },
                repetition_penalty: 0.0,
            });
        }

        for candidate in &mut candidates {
            candidate.repetition_penalty = repetition_penalty(&candidate.text, session);
        }
        candidates.sort_by(|a, b| {
            b.total_score()
                .partial_cmp(&a.total_score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // Never emit the exact question asked last time for this slot.
        let last_question = session.recent_questions.back();
        let chosen = candidates
            .iter()
            .find(|c| Some(&c.text) != last_question)
            .or_else(|| candidates.first())
            .cloned()
            .unwrap_or_else(|| Candidate {
                text: format!("请提供{}。", def.display_name),
                kind: QuestionKind::Direct,
                confidence: 0.3,
                context_relevance: 0.3,
                personalization: 0.3,
                repetition_penalty: 0.0,
            });

        let text = match error {
            Some(message) => format!("{message}。{}", chosen.text),
            None => chosen.text,
        };

        GeneratedQuestion {
            text,
            kind: if error.is_some() {
                QuestionKind::Clarification
            } else {
                chosen.kind
            },
            strategy,
            targets: vec![def.name.clone()],
        }
    }

    /// One compact prompt over several missing slots (EFFICIENT).
    fn compact_prompt(&self, defs: &[&SlotDef], strategy: ContextStrategy) -> GeneratedQuestion {
        let names: Vec<&str> = defs.iter().take(3).map(|d| d.display_name.as_str()).collect();
        GeneratedQuestion {
            text: format!("请一并提供：{}。", names.join("、")),
            kind: QuestionKind::Direct,
            strategy,
            targets: defs.iter().take(3).map(|d| d.name.clone()).collect(),
        }
    }
}

impl Default for QuestionGenerator {
    fn default() -> Self {
        Self::new(4)
    }
}

/// Penalty for resembling recently asked questions: 0.2 per near-match,
/// capped at 0.6.
fn repetition_penalty(text: &str, session: &Session) -> f32 {
    let similar = session
        .recent_questions
        .iter()
        .filter(|q| similarity(q, text) > 0.8)
        .count();
    (similar as f32 * 0.2).min(0.6)
}

/// Character-bigram Jaccard similarity.
fn similarity(a: &str, b: &str) -> f32 {
    let grams = |s: &str| -> HashSet<(char, char)> {
        let chars: Vec<char> = s.chars().collect();
        chars.windows(2).map(|w| (w[0], w[1])).collect()
    };
    let ga = grams(a);
    let gb = grams(b);
    if ga.is_empty() || gb.is_empty() {
        return if a == b { 1.0 } else { 0.0 };
    }
    let intersection = ga.intersection(&gb).count() as f32;
    let union = ga.union(&gb).count() as f32;
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;
    use task_router_core::{SlotKind, SlotValidation};

    fn features() -> StrategyFeatures {
        StrategyFeatures {
            missing_count: 3,
            invalid_count: 0,
            failed_attempts_on_target: 0,
            completion_rate: 0.0,
            engagement: 0.7,
            time_pressure: 0.3,
            unconfirmed_inferred: 0,
            user_uncertain: false,
        }
    }

    fn intent() -> IntentDef {
        IntentDef {
            name: "book_flight".to_string(),
            display_name: "订机票".to_string(),
            description: None,
            confidence_threshold: 0.7,
            slots: vec![
                SlotDef::new("departure_city", "出发城市", SlotKind::Text)
                    .required()
                    .with_examples(vec!["北京".to_string(), "上海".to_string()]),
                SlotDef::new("arrival_city", "到达城市", SlotKind::Text)
                    .required()
                    .with_prompt("请问您要到哪个城市？"),
                SlotDef::new("departure_date", "出发日期", SlotKind::Date).required(),
                SlotDef::new("seat_class", "舱位", SlotKind::Enum).with_validation(
                    SlotValidation {
                        options: vec!["经济舱".to_string(), "商务舱".to_string()],
                        ..Default::default()
                    },
                ),
            ],
            dependencies: Vec::new(),
            inheritance: Vec::new(),
            examples: Vec::new(),
            function_name: "flight_booking".to_string(),
            reply_template: None,
        }
    }

    #[test]
    fn test_strategy_selection_rules() {
        let mut f = features();
        assert_eq!(select_strategy(&f), ContextStrategy::Progressive);

        f.missing_count = 1;
        assert_eq!(select_strategy(&f), ContextStrategy::Focused);

        f.missing_count = 3;
        f.time_pressure = 0.8;
        assert_eq!(select_strategy(&f), ContextStrategy::Efficient);

        f.time_pressure = 0.3;
        f.user_uncertain = true;
        assert_eq!(select_strategy(&f), ContextStrategy::Exploratory);

        f.user_uncertain = false;
        f.failed_attempts_on_target = 2;
        assert_eq!(select_strategy(&f), ContextStrategy::Recovery);

        f.failed_attempts_on_target = 0;
        f.completion_rate = 0.9;
        f.unconfirmed_inferred = 1;
        assert_eq!(select_strategy(&f), ContextStrategy::Confirmatory);
    }

    #[test]
    fn test_prompt_template_wins() {
        let generator = QuestionGenerator::default();
        let session = Session::new("s", "u");
        let question = generator.for_missing(
            &intent(),
            &["arrival_city"],
            &session,
            ContextStrategy::Focused,
        );
        assert_eq!(question.text, "请问您要到哪个城市？");
        assert_eq!(question.targets, vec!["arrival_city"]);
    }

    #[test]
    fn test_asks_first_missing_slot() {
        let generator = QuestionGenerator::default();
        let session = Session::new("s", "u");
        let question = generator.for_missing(
            &intent(),
            &["departure_city", "arrival_city", "departure_date"],
            &session,
            ContextStrategy::Progressive,
        );
        assert_eq!(question.targets, vec!["departure_city"]);
        assert!(question.text.contains("出发城市"));
    }

    #[test]
    fn test_efficient_compact_prompt() {
        let generator = QuestionGenerator::default();
        let session = Session::new("s", "u");
        let question = generator.for_missing(
            &intent(),
            &["departure_city", "arrival_city", "departure_date"],
            &session,
            ContextStrategy::Efficient,
        );
        assert_eq!(question.targets.len(), 3);
        assert!(question.text.contains("出发城市"));
        assert!(question.text.contains("出发日期"));
    }

    #[test]
    fn test_invalid_slot_quotes_error() {
        let generator = QuestionGenerator::default();
        let session = Session::new("s", "u");
        let question = generator.for_invalid(
            &intent(),
            "departure_date",
            "出发日期不能是过去的日期",
            &session,
        );
        assert!(question.text.starts_with("出发日期不能是过去的日期"));
        assert_eq!(question.kind, QuestionKind::Clarification);
        assert_eq!(question.strategy, ContextStrategy::Recovery);
    }

    #[test]
    fn test_no_exact_repeat() {
        let generator = QuestionGenerator::default();
        let mut session = Session::new("s", "u");
        let first = generator.for_missing(
            &intent(),
            &["departure_city"],
            &session,
            ContextStrategy::Focused,
        );
        session.remember_question(first.text.clone());
        let second = generator.for_missing(
            &intent(),
            &["departure_city"],
            &session,
            ContextStrategy::Focused,
        );
        assert_ne!(first.text, second.text);
    }

    #[test]
    fn test_enum_slot_gets_choices() {
        let generator = QuestionGenerator::default();
        let session = Session::new("s", "u");
        let question = generator.for_missing(
            &intent(),
            &["seat_class"],
            &session,
            ContextStrategy::Focused,
        );
        assert!(question.text.contains("经济舱"));
    }

    #[test]
    fn test_style_follows_time_pressure() {
        assert_eq!(preferred_style(0.7, 0.8), QuestionStyle::Concise);
        assert_eq!(preferred_style(0.8, 0.2), QuestionStyle::Friendly);
        assert_eq!(preferred_style(0.3, 0.2), QuestionStyle::Detailed);
    }
}
