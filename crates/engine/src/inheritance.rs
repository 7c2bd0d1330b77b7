//! Slot inheritance
//!
//! Before validation, supplements the slots extracted this turn from the
//! session, recent conversation turns, the user profile, and configured
//! defaults, per declarative rules. Rules run in descending priority; a
//! named transform may rewrite the value before assignment.

use std::collections::{BTreeMap, VecDeque};

use task_router_core::{
    EdgeCondition, InheritSource, InheritStrategy, InheritanceRule, IntentDef, IntentFrame,
    SlotMap, SlotSource, SlotValue, TurnRecord, UserProfile,
};

use crate::graph::condition_holds;
use crate::transforms;

/// Confidence assigned to values carried over from context rather than
/// said this turn.
const INHERITED_CONFIDENCE: f32 = 0.8;

/// What the engine did, for logs and operator snapshots.
#[derive(Debug, Default)]
pub struct InheritanceOutcome {
    /// Slot name -> source the value came from.
    pub inherited: BTreeMap<String, InheritSource>,
    pub applied_rules: usize,
    /// (target slot, reason) for every rule that did not fire.
    pub skipped: Vec<(String, String)>,
}

pub struct InheritanceEngine;

impl InheritanceEngine {
    pub fn new() -> Self {
        Self
    }

    /// Apply the intent's inheritance rules on top of `slots` (the values
    /// extracted or already collected this turn). Suspended intents and
    /// the turn history are the session-side sources.
    pub fn apply(
        &self,
        intent: &IntentDef,
        slots: &mut SlotMap,
        intent_stack: &[IntentFrame],
        history: &VecDeque<TurnRecord>,
        profile: Option<&UserProfile>,
    ) -> InheritanceOutcome {
        let mut outcome = InheritanceOutcome::default();

        let mut rules: Vec<&InheritanceRule> = intent.inheritance.iter().collect();
        rules.sort_by_key(|r| std::cmp::Reverse(r.priority));

        for rule in rules {
            // The loader validates targets, but rules can arrive through
            // admin writes too; never set a slot the intent lacks.
            if intent.slot(&rule.target_slot).is_none() {
                tracing::warn!(
                    intent = %intent.name,
                    target = %rule.target_slot,
                    "inheritance rule targets unknown slot, skipping"
                );
                outcome
                    .skipped
                    .push((rule.target_slot.clone(), "unknown target slot".to_string()));
                continue;
            }

            if !self.condition_met(rule.condition.as_ref(), slots) {
                outcome
                    .skipped
                    .push((rule.target_slot.clone(), "condition not met".to_string()));
                continue;
            }

            let Some(raw) = self.source_value(rule, slots, intent_stack, history, profile) else {
                outcome
                    .skipped
                    .push((rule.target_slot.clone(), "source has no value".to_string()));
                continue;
            };

            let value = match rule.transform.as_deref() {
                Some(name) => match transforms::apply(name, &raw) {
                    Some(transformed) => transformed,
                    None => {
                        tracing::warn!(transform = name, "unknown inheritance transform, skipping");
                        outcome
                            .skipped
                            .push((rule.target_slot.clone(), format!("unknown transform '{name}'")));
                        continue;
                    },
                },
                None => raw,
            };

            match self.combine(rule, slots, value) {
                Some(source) => {
                    outcome.inherited.insert(rule.target_slot.clone(), source);
                    outcome.applied_rules += 1;
                },
                None => {
                    outcome
                        .skipped
                        .push((rule.target_slot.clone(), "extracted value kept".to_string()));
                },
            }
        }

        outcome
    }

    fn condition_met(&self, condition: Option<&EdgeCondition>, slots: &SlotMap) -> bool {
        let values: BTreeMap<String, String> = slots
            .iter()
            .filter(|(_, v)| !v.is_invalid())
            .map(|(k, v)| (k.clone(), v.final_text()))
            .collect();
        condition_holds(condition, &values)
    }

    /// Look the source value up in the rule's source scope.
    fn source_value(
        &self,
        rule: &InheritanceRule,
        slots: &SlotMap,
        intent_stack: &[IntentFrame],
        history: &VecDeque<TurnRecord>,
        profile: Option<&UserProfile>,
    ) -> Option<String> {
        match rule.source {
            InheritSource::Session => {
                // Current collection first, then suspended intents,
                // newest suspension first.
                if let Some(value) = slots.get(&rule.source_slot).filter(|v| v.is_valid()) {
                    return Some(value.final_text());
                }
                intent_stack.iter().rev().find_map(|frame| {
                    frame
                        .slots
                        .get(&rule.source_slot)
                        .filter(|v| v.is_valid())
                        .map(|v| v.final_text())
                })
            },
            InheritSource::Conversation => history.iter().rev().find_map(|turn| {
                turn.slots_snapshot
                    .get(&rule.source_slot)
                    .filter(|v| v.is_valid())
                    .map(|v| v.final_text())
            }),
            InheritSource::UserProfile => profile
                .and_then(|p| p.preferences.get(&rule.source_slot))
                .cloned(),
            InheritSource::Default => rule.default_value.clone(),
        }
    }

    /// Combine the inherited candidate with any extracted value per the
    /// rule's strategy. Returns the recorded source on assignment.
    fn combine(
        &self,
        rule: &InheritanceRule,
        slots: &mut SlotMap,
        value: String,
    ) -> Option<InheritSource> {
        let existing_valid = slots
            .get(&rule.target_slot)
            .map(|v| !v.is_invalid())
            .unwrap_or(false);
        let source_kind = if rule.source == InheritSource::Default {
            SlotSource::Default
        } else {
            SlotSource::Inherited
        };

        match rule.strategy {
            InheritStrategy::Supplement => {
                if existing_valid {
                    return None;
                }
                slots.insert(
                    SlotValue::inherited(&rule.target_slot, value, INHERITED_CONFIDENCE)
                        .with_source(source_kind),
                );
                Some(rule.source)
            },
            InheritStrategy::Overwrite => {
                slots.insert(
                    SlotValue::inherited(&rule.target_slot, value, INHERITED_CONFIDENCE)
                        .with_source(source_kind),
                );
                Some(rule.source)
            },
            InheritStrategy::Merge => {
                // Defined only for list slots: concatenate, de-duplicate.
                let merged = match slots.get(&rule.target_slot) {
                    Some(existing) if !existing.is_invalid() => {
                        let mut items: Vec<String> = existing
                            .final_text()
                            .split(',')
                            .map(str::to_string)
                            .filter(|s| !s.is_empty())
                            .collect();
                        for item in value.split(',').filter(|s| !s.is_empty()) {
                            if !items.iter().any(|i| i == item) {
                                items.push(item.to_string());
                            }
                        }
                        items.join(",")
                    },
                    _ => value,
                };
                let mut merged_value =
                    SlotValue::inherited(&rule.target_slot, merged, INHERITED_CONFIDENCE)
                        .with_source(source_kind);
                merged_value.normalized = None;
                slots.insert(merged_value);
                Some(rule.source)
            },
        }
    }
}

impl Default for InheritanceEngine {
    fn default() -> Self {
        Self::new()
    }
}
