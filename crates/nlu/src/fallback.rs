//! Keyword fallback NLU
//!
//! Used while the circuit breaker for the primary NLU is open. Scores
//! intents by character overlap between the utterance and their example
//! utterances, and extracts only what appears verbatim (enum options,
//! slot examples). Degraded but well-typed: confidences stay low so the
//! resolver treats the result with appropriate suspicion.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

use task_router_core::{
    CatalogHandle, ExtractedSlot, IntentCandidate, IntentDef, Nlu, NluContext, NluOutput, Result,
};

/// Fallback confidences never exceed this; keyword overlap is weak
/// evidence.
const MAX_FALLBACK_CONFIDENCE: f32 = 0.65;

pub struct KeywordNlu {
    catalog: CatalogHandle,
}

impl KeywordNlu {
    pub fn new(catalog: CatalogHandle) -> Self {
        Self { catalog }
    }

    /// Character-bigram overlap, robust for unsegmented Chinese text.
    fn overlap(utterance: &str, example: &str) -> f32 {
        let grams = |s: &str| -> HashSet<(char, char)> {
            let chars: Vec<char> = s.chars().collect();
            chars.windows(2).map(|w| (w[0], w[1])).collect()
        };
        let a = grams(utterance);
        let b = grams(example);
        if b.is_empty() {
            return 0.0;
        }
        let common = a.intersection(&b).count();
        common as f32 / b.len() as f32
    }

    fn score_intent(utterance: &str, intent: &IntentDef) -> f32 {
        let best_example = intent
            .examples
            .iter()
            .map(|e| Self::overlap(utterance, e))
            .fold(0.0_f32, f32::max);
        let name_hit = if utterance.contains(intent.display_name.as_str()) {
            0.3
        } else {
            0.0
        };
        ((best_example * 0.6) + name_hit).min(MAX_FALLBACK_CONFIDENCE)
    }

    fn extract_verbatim(utterance: &str, intent: &IntentDef) -> HashMap<String, ExtractedSlot> {
        let mut slots = HashMap::new();
        for slot in &intent.slots {
            let mut hit: Option<&str> = None;
            for option in &slot.validation.options {
                if utterance.contains(option.as_str()) {
                    hit = Some(option);
                    break;
                }
            }
            if hit.is_none() {
                for example in &slot.examples {
                    if utterance.contains(example.as_str()) {
                        hit = Some(example);
                        break;
                    }
                }
            }
            if let Some(text) = hit {
                slots.insert(
                    slot.name.clone(),
                    ExtractedSlot {
                        extracted: text.to_string(),
                        raw_text: text.to_string(),
                        confidence: 0.5,
                    },
                );
            }
        }
        slots
    }
}

#[async_trait]
impl Nlu for KeywordNlu {
    async fn classify(&self, utterance: &str, _context: &NluContext) -> Result<NluOutput> {
        let catalog = self.catalog.current();
        let mut candidates: Vec<IntentCandidate> = catalog
            .intents()
            .map(|intent| IntentCandidate::new(&intent.name, Self::score_intent(utterance, intent)))
            .filter(|c| c.confidence > 0.05)
            .collect();

        let mut output = NluOutput {
            candidates: std::mem::take(&mut candidates),
            slots: HashMap::new(),
        };
        output.sort();

        if let Some(top) = output.top().cloned() {
            if let Some(intent) = catalog.intent(&top.name) {
                output.slots = Self::extract_verbatim(utterance, intent);
            }
        }

        tracing::debug!(
            candidates = output.candidates.len(),
            slots = output.slots.len(),
            "keyword fallback classification"
        );
        Ok(output)
    }

    fn name(&self) -> &str {
        "keyword_fallback"
    }
}
