//! Slot values
//!
//! A [`SlotValue`] is one filled parameter: the raw text the user produced,
//! the extracted form, and (after normalization) a typed canonical value.
//! The session owns a [`SlotMap`] per conversation; turns persist copies.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a slot value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotSource {
    UserInput,
    Inherited,
    Default,
    Suggested,
}

impl SlotSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotSource::UserInput => "user_input",
            SlotSource::Inherited => "inherited",
            SlotSource::Default => "default",
            SlotSource::Suggested => "suggested",
        }
    }
}

/// Validation state of a slot value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    /// Extracted but not yet validated.
    Pending,
    Valid,
    Invalid,
    /// Re-supplied by the user after a rejection.
    Corrected,
}

/// Canonical typed value produced by the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum NormalizedValue {
    Text(String),
    Number(f64),
    /// ISO calendar date.
    Date(NaiveDate),
    /// `HH:MM`, 24-hour.
    Time(String),
    Boolean(bool),
    /// Canonical enum option.
    Option(String),
    List(Vec<String>),
}

impl NormalizedValue {
    /// Wire/display form; what the dispatcher sends and templates expand.
    pub fn as_text(&self) -> String {
        match self {
            NormalizedValue::Text(s) | NormalizedValue::Time(s) | NormalizedValue::Option(s) => {
                s.clone()
            },
            NormalizedValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{n}")
                }
            },
            NormalizedValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            NormalizedValue::Boolean(b) => b.to_string(),
            NormalizedValue::List(items) => items.join(","),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            NormalizedValue::Number(n) => Some(*n),
            NormalizedValue::Text(s) | NormalizedValue::Option(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            NormalizedValue::Date(d) => Some(*d),
            NormalizedValue::Text(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d").ok(),
            _ => None,
        }
    }
}

/// One filled parameter of the current intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotValue {
    pub slot_name: String,
    /// Verbatim span of user input the value came from.
    pub raw_text: String,
    /// Extracted string, before normalization.
    pub extracted: String,
    /// Canonical value; present once the validator passes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized: Option<NormalizedValue>,
    pub confidence: f32,
    pub source: SlotSource,
    pub state: SlotState,
    /// User-facing validation error when `state == Invalid`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set once the user explicitly confirmed the value.
    #[serde(default)]
    pub confirmed: bool,
}

impl SlotValue {
    pub fn extracted(
        slot_name: impl Into<String>,
        raw_text: impl Into<String>,
        confidence: f32,
    ) -> Self {
        let raw_text = raw_text.into();
        Self {
            slot_name: slot_name.into(),
            extracted: raw_text.clone(),
            raw_text,
            normalized: None,
            confidence,
            source: SlotSource::UserInput,
            state: SlotState::Pending,
            error: None,
            confirmed: false,
        }
    }

    pub fn inherited(
        slot_name: impl Into<String>,
        value: impl Into<String>,
        confidence: f32,
    ) -> Self {
        let value = value.into();
        Self {
            slot_name: slot_name.into(),
            raw_text: value.clone(),
            extracted: value,
            normalized: None,
            confidence,
            source: SlotSource::Inherited,
            state: SlotState::Pending,
            error: None,
            confirmed: false,
        }
    }

    pub fn with_source(mut self, source: SlotSource) -> Self {
        self.source = source;
        self
    }

    /// Mark the value valid with its canonical form.
    pub fn set_valid(&mut self, normalized: NormalizedValue) {
        self.normalized = Some(normalized);
        self.error = None;
        // A correction that passes validation stays marked as corrected.
        if self.state != SlotState::Corrected {
            self.state = SlotState::Valid;
        }
    }

    pub fn set_invalid(&mut self, error: impl Into<String>) {
        self.state = SlotState::Invalid;
        self.normalized = None;
        self.error = Some(error.into());
    }

    /// Replace the value after the user corrected a rejected input.
    pub fn set_corrected(&mut self, raw_text: impl Into<String>) {
        let raw = raw_text.into();
        self.raw_text = raw.clone();
        self.extracted = raw;
        self.normalized = None;
        self.error = None;
        self.state = SlotState::Corrected;
        self.source = SlotSource::UserInput;
    }

    pub fn confirm(&mut self) {
        self.confirmed = true;
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.state, SlotState::Valid | SlotState::Corrected) && self.normalized.is_some()
    }

    pub fn is_invalid(&self) -> bool {
        self.state == SlotState::Invalid
    }

    /// The value the dispatcher sends: canonical if available, else the
    /// extracted text.
    pub fn final_text(&self) -> String {
        self.normalized
            .as_ref()
            .map(|n| n.as_text())
            .unwrap_or_else(|| self.extracted.clone())
    }
}

/// The session's slot table for the current intent. Keyed by slot name;
/// ordered so prompts and snapshots are deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotMap {
    values: BTreeMap<String, SlotValue>,
}

impl SlotMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&SlotValue> {
        self.values.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut SlotValue> {
        self.values.get_mut(name)
    }

    pub fn insert(&mut self, value: SlotValue) -> Option<SlotValue> {
        self.values.insert(value.slot_name.clone(), value)
    }

    pub fn remove(&mut self, name: &str) -> Option<SlotValue> {
        self.values.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SlotValue)> {
        self.values.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut SlotValue)> {
        self.values.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Names of slots that currently hold a usable (non-invalid) value.
    pub fn filled_names(&self) -> Vec<&str> {
        self.values
            .iter()
            .filter(|(_, v)| !v.is_invalid())
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// name -> final text for every valid slot; what dependency evaluation
    /// and dispatch operate on.
    pub fn valid_values(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .filter(|(_, v)| v.is_valid())
            .map(|(k, v)| (k.clone(), v.final_text()))
            .collect()
    }

    pub fn invalid_errors(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .filter_map(|(k, v)| {
                v.error
                    .as_ref()
                    .filter(|_| v.is_invalid())
                    .map(|e| (k.clone(), e.clone()))
            })
            .collect()
    }
}

impl FromIterator<SlotValue> for SlotMap {
    fn from_iter<T: IntoIterator<Item = SlotValue>>(iter: T) -> Self {
        let mut map = SlotMap::new();
        for value in iter {
            map.insert(value);
        }
        map
    }
}
