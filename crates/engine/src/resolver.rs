//! Intent resolution
//!
//! Chooses between confident, ambiguous, unknown and continuation cases
//! per turn. Thresholds come from configuration; the decision is a pure
//! function of the session, the candidate list and the catalog.

use serde::Serialize;

use task_router_core::{Catalog, IntentCandidate, NluOutput, Session};

/// Resolver thresholds; defaults match the shipped configuration.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Margin a candidate must beat the runner-up by to win outright.
    pub margin: f32,
    /// Confidence needed to switch away from an in-flight intent.
    pub switch_threshold: f32,
    /// Candidates within this distance of the top are ambiguous together.
    pub ambiguity_window: f32,
    /// Candidates below this floor never participate.
    pub ambiguity_floor: f32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            margin: 0.1,
            switch_threshold: 0.75,
            ambiguity_window: 0.08,
            ambiguity_floor: 0.5,
        }
    }
}

/// Per-turn resolution outcome; not persisted beyond the turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Resolution {
    /// Take up a new intent (suspending any in flight).
    NewIntent { name: String, confidence: f32 },
    /// The utterance is additional input for the intent in flight.
    ContinueIntent { name: String, confidence: f32 },
    /// Several plausible candidates; ask the user to choose.
    Ambiguous { candidates: Vec<IntentCandidate> },
    /// Nothing plausible; delegate to the conversational back-end.
    Unknown,
}

pub struct IntentResolver {
    config: ResolverConfig,
}

impl IntentResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    /// Decide what this turn's candidates mean for the session.
    pub fn resolve(&self, session: &Session, output: &NluOutput, catalog: &Catalog) -> Resolution {
        // Unknown intents can't be acted on; drop them up front.
        let candidates: Vec<&IntentCandidate> = output
            .candidates
            .iter()
            .filter(|c| catalog.intent(&c.name).is_some())
            .collect();

        let Some(top) = candidates.first().copied() else {
            return self.continue_or_unknown(session, 0.0);
        };
        let runner_up = candidates.get(1).map(|c| c.confidence).unwrap_or(0.0);

        // An in-flight intent holds on unless the top candidate clearly
        // beats it.
        if let Some(current) = session.current_intent.as_deref() {
            if top.name == current {
                return Resolution::ContinueIntent {
                    name: current.to_string(),
                    confidence: top.confidence,
                };
            }
            let current_confidence = candidates
                .iter()
                .find(|c| c.name == current)
                .map(|c| c.confidence)
                .unwrap_or(0.0);
            let beats_current = top.confidence - current_confidence >= self.config.margin;
            if !beats_current && top.confidence < self.config.switch_threshold {
                return Resolution::ContinueIntent {
                    name: current.to_string(),
                    confidence: current_confidence,
                };
            }
        }

        // Confident winner.
        let threshold = catalog
            .intent(&top.name)
            .map(|i| i.confidence_threshold)
            .unwrap_or(1.0);
        if top.confidence >= threshold && top.confidence - runner_up >= self.config.margin {
            return Resolution::NewIntent {
                name: top.name.clone(),
                confidence: top.confidence,
            };
        }

        // A cluster of close, plausible candidates is ambiguous.
        let cluster: Vec<IntentCandidate> = candidates
            .iter()
            .filter(|c| {
                c.confidence >= self.config.ambiguity_floor
                    && top.confidence - c.confidence <= self.config.ambiguity_window
            })
            .map(|c| (*c).clone())
            .collect();
        if cluster.len() >= 2 {
            return Resolution::Ambiguous { candidates: cluster };
        }

        // A lone plausible candidate above its threshold still wins even
        // without margin (nothing close competes below the floor).
        if top.confidence >= threshold {
            return Resolution::NewIntent {
                name: top.name.clone(),
                confidence: top.confidence,
            };
        }

        self.continue_or_unknown(session, top.confidence)
    }

    /// With nothing actionable, an in-flight intent keeps collecting
    /// (the utterance may still carry slot values); otherwise delegate.
    fn continue_or_unknown(&self, session: &Session, confidence: f32) -> Resolution {
        match session.current_intent.as_deref() {
            Some(current) => Resolution::ContinueIntent {
                name: current.to_string(),
                confidence,
            },
            None => Resolution::Unknown,
        }
    }

    /// Match a disambiguation answer against the offered candidates:
    /// ordinal ("1"/"第一个"), exact name, or display-name containment.
    pub fn resolve_disambiguation(
        &self,
        offered: &[String],
        utterance: &str,
        catalog: &Catalog,
    ) -> Option<String> {
        let text = utterance.trim();

        let ordinal = match text {
            "1" | "一" | "第一个" => Some(0),
            "2" | "二" | "第二个" => Some(1),
            "3" | "三" | "第三个" => Some(2),
            "4" | "四" | "第四个" => Some(3),
            _ => None,
        };
        if let Some(index) = ordinal {
            return offered.get(index).cloned();
        }

        for name in offered {
            if text == name {
                return Some(name.clone());
            }
            if let Some(intent) = catalog.intent(name) {
                if text.contains(intent.display_name.as_str())
                    || intent.display_name.contains(text) && !text.is_empty()
                {
                    return Some(name.clone());
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use task_router_core::{IntentDef, SlotDef, SlotKind};

    fn catalog() -> Catalog {
        let mk = |name: &str, display: &str, threshold: f32| IntentDef {
            name: name.to_string(),
            display_name: display.to_string(),
            description: None,
            confidence_threshold: threshold,
            slots: vec![SlotDef::new("x", "X", SlotKind::Text)],
            dependencies: Vec::new(),
            inheritance: Vec::new(),
            examples: Vec::new(),
            function_name: format!("{name}_fn"),
            reply_template: None,
        };
        Catalog::new(
            vec![
                mk("book_flight", "订机票", 0.7),
                mk("book_train", "订火车票", 0.7),
                mk("book_movie", "订电影票", 0.7),
                mk("check_balance", "查询余额", 0.65),
            ],
            1,
        )
    }

    fn output(pairs: &[(&str, f32)]) -> NluOutput {
        let mut out = NluOutput {
            candidates: pairs
                .iter()
                .map(|(n, c)| IntentCandidate::new(*n, *c))
                .collect(),
            slots: Default::default(),
        };
        out.sort();
        out
    }

    fn resolver() -> IntentResolver {
        IntentResolver::new(ResolverConfig::default())
    }

    #[test]
    fn test_confident_new_intent() {
        let session = Session::new("s", "u");
        let resolution = resolver().resolve(
            &session,
            &output(&[("book_flight", 0.92), ("book_train", 0.4)]),
            &catalog(),
        );
        assert_eq!(
            resolution,
            Resolution::NewIntent {
                name: "book_flight".to_string(),
                confidence: 0.92
            }
        );
    }

    #[test]
    fn test_continuation_holds_against_weak_candidate() {
        let mut session = Session::new("s", "u");
        session.begin_intent("book_flight");
        // A mild 0.6 candidate for another intent does not displace the
        // booking in flight.
        let resolution = resolver().resolve(
            &session,
            &output(&[("check_balance", 0.6)]),
            &catalog(),
        );
        assert!(matches!(
            resolution,
            Resolution::ContinueIntent { ref name, .. } if name == "book_flight"
        ));
    }

    #[test]
    fn test_strong_candidate_switches_intent() {
        let mut session = Session::new("s", "u");
        session.begin_intent("book_flight");
        let resolution = resolver().resolve(
            &session,
            &output(&[("check_balance", 0.9)]),
            &catalog(),
        );
        assert!(matches!(
            resolution,
            Resolution::NewIntent { ref name, .. } if name == "check_balance"
        ));
    }

    #[test]
    fn test_ambiguous_cluster() {
        let session = Session::new("s", "u");
        let resolution = resolver().resolve(
            &session,
            &output(&[
                ("book_flight", 0.62),
                ("book_train", 0.60),
                ("book_movie", 0.57),
            ]),
            &catalog(),
        );
        match resolution {
            Resolution::Ambiguous { candidates } => {
                assert_eq!(candidates.len(), 3);
                // Ordered by confidence.
                assert_eq!(candidates[0].name, "book_flight");
                assert!(candidates.iter().all(|c| c.confidence >= 0.5));
            },
            other => panic!("expected ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn test_below_floor_is_unknown() {
        let session = Session::new("s", "u");
        let resolution = resolver().resolve(
            &session,
            &output(&[("book_flight", 0.3), ("book_train", 0.28)]),
            &catalog(),
        );
        assert_eq!(resolution, Resolution::Unknown);
    }

    #[test]
    fn test_no_candidates_is_unknown() {
        let session = Session::new("s", "u");
        assert_eq!(
            resolver().resolve(&session, &output(&[]), &catalog()),
            Resolution::Unknown
        );
    }

    #[test]
    fn test_unknown_catalog_names_filtered() {
        let session = Session::new("s", "u");
        let resolution = resolver().resolve(
            &session,
            &output(&[("order_pizza", 0.95)]),
            &catalog(),
        );
        assert_eq!(resolution, Resolution::Unknown);
    }

    #[test]
    fn test_disambiguation_by_ordinal_and_name() {
        let offered = vec!["book_flight".to_string(), "book_train".to_string()];
        let r = resolver();
        let c = catalog();
        assert_eq!(
            r.resolve_disambiguation(&offered, "1", &c).as_deref(),
            Some("book_flight")
        );
        assert_eq!(
            r.resolve_disambiguation(&offered, "第二个", &c).as_deref(),
            Some("book_train")
        );
        assert_eq!(
            r.resolve_disambiguation(&offered, "我要订火车票", &c).as_deref(),
            Some("book_train")
        );
        assert_eq!(r.resolve_disambiguation(&offered, "都不是", &c), None);
    }
}
