//! Slot validation
//!
//! Second pass after normalization: per-slot constraint checks from the
//! definition's `validation{}` block, then cross-slot consistency driven
//! by the intent (distinct cities, temporal ordering, passenger limits).
//! Failures produce user-facing error strings; the question generator
//! turns them into clarifying questions instead of failing the turn.

use chrono::NaiveDate;
use regex::Regex;
use std::collections::BTreeMap;

use task_router_core::{
    DependencyKind, IntentDef, NormalizedValue, SlotDef, SlotMap, SlotValidation,
};

use crate::normalize::normalize_date;

/// Check one normalized value against its definition's constraints.
pub fn validate_slot(
    def: &SlotDef,
    value: &NormalizedValue,
    reference_date: NaiveDate,
) -> Result<(), String> {
    let rules = &def.validation;
    let text = value.as_text();

    if let Some(min_length) = rules.min_length {
        if text.chars().count() < min_length {
            return Err(format!("{}至少需要{}个字符", def.display_name, min_length));
        }
    }
    if let Some(max_length) = rules.max_length {
        if text.chars().count() > max_length {
            return Err(format!("{}不能超过{}个字符", def.display_name, max_length));
        }
    }

    if let Some(number) = value.as_number() {
        if let Some(min) = rules.min {
            if number < min {
                return Err(format!("{}不能小于{}", def.display_name, trim_float(min)));
            }
        }
        if let Some(max) = rules.max {
            if number > max {
                return Err(format!("{}不能大于{}", def.display_name, trim_float(max)));
            }
        }
    }

    if let Some(pattern) = &rules.pattern {
        match Regex::new(pattern) {
            Ok(regex) => {
                if !regex.is_match(&text) {
                    return Err(rules
                        .pattern_message
                        .clone()
                        .unwrap_or_else(|| format!("{}格式不正确", def.display_name)));
                }
            },
            Err(e) => {
                // A bad pattern is a catalog defect; fail open and log
                // rather than rejecting user input.
                tracing::error!(slot = %def.name, error = %e, "invalid validation pattern");
            },
        }
    }

    if !rules.options.is_empty() {
        if let NormalizedValue::Option(option) = value {
            if !rules.options.contains(option) {
                return Err(format!(
                    "{}只能是：{}",
                    def.display_name,
                    rules.options.join("、")
                ));
            }
        }
    }

    if let Some(date) = value.as_date() {
        if let Some(bound) = resolve_date_bound(rules, true, reference_date) {
            if date < bound {
                return Err(past_date_message(def, rules, reference_date));
            }
        }
        if let Some(bound) = resolve_date_bound(rules, false, reference_date) {
            if date > bound {
                return Err(format!(
                    "{}不能晚于{}",
                    def.display_name,
                    bound.format("%Y-%m-%d")
                ));
            }
        }
    }

    Ok(())
}

fn past_date_message(def: &SlotDef, rules: &SlotValidation, reference_date: NaiveDate) -> String {
    let bound = resolve_date_bound(rules, true, reference_date);
    if bound == Some(reference_date) {
        format!("{}不能是过去的日期", def.display_name)
    } else {
        format!(
            "{}不能早于{}",
            def.display_name,
            bound.unwrap_or(reference_date).format("%Y-%m-%d")
        )
    }
}

fn resolve_date_bound(
    rules: &SlotValidation,
    lower: bool,
    reference_date: NaiveDate,
) -> Option<NaiveDate> {
    let raw = if lower {
        rules.min_date.as_deref()?
    } else {
        rules.max_date.as_deref()?
    };
    if raw == "today" {
        return Some(reference_date);
    }
    normalize_date(raw, reference_date)
}

fn trim_float(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Cross-slot consistency for one intent's collected values. Returns a
/// map of slot name to user-facing error; empty means consistent.
pub fn cross_validate(intent: &IntentDef, slots: &SlotMap) -> BTreeMap<String, String> {
    let mut errors = BTreeMap::new();

    // Departure and arrival must differ when the intent carries both.
    if intent.slot("departure_city").is_some() && intent.slot("arrival_city").is_some() {
        let departure = slots.get("departure_city").filter(|v| v.is_valid());
        let arrival = slots.get("arrival_city").filter(|v| v.is_valid());
        if let (Some(dep), Some(arr)) = (departure, arrival) {
            if dep.final_text() == arr.final_text() {
                errors.insert(
                    "arrival_city".to_string(),
                    "出发城市和到达城市不能相同".to_string(),
                );
            }
        }
    }

    // Temporal edges: `to` strictly after `from`.
    for edge in &intent.dependencies {
        if edge.kind != DependencyKind::Temporal {
            continue;
        }
        let from = slots
            .get(&edge.from)
            .filter(|v| v.is_valid())
            .and_then(|v| v.normalized.as_ref().and_then(|n| n.as_date()));
        let to = slots
            .get(&edge.to)
            .filter(|v| v.is_valid())
            .and_then(|v| v.normalized.as_ref().and_then(|n| n.as_date()));
        if let (Some(from_date), Some(to_date)) = (from, to) {
            if to_date <= from_date {
                let from_name = intent
                    .slot(&edge.from)
                    .map(|s| s.display_name.as_str())
                    .unwrap_or(edge.from.as_str());
                let to_name = intent
                    .slot(&edge.to)
                    .map(|s| s.display_name.as_str())
                    .unwrap_or(edge.to.as_str());
                errors.insert(
                    edge.to.clone(),
                    format!("{to_name}必须晚于{from_name}"),
                );
            }
        }
    }

    // Passenger counts are whole and small.
    if let Some(count) = slots.get("passenger_count").filter(|v| v.is_valid()) {
        if let Some(n) = count.normalized.as_ref().and_then(|v| v.as_number()) {
            if n.fract() != 0.0 {
                errors.insert(
                    "passenger_count".to_string(),
                    "乘客人数必须是整数".to_string(),
                );
            } else if !(1.0..=9.0).contains(&n) {
                errors.insert(
                    "passenger_count".to_string(),
                    "乘客人数须在1到9之间".to_string(),
                );
            }
        }
    }

    errors
}
