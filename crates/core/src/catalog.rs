//! Intent catalog
//!
//! Read-only configuration shared across all sessions: intents, their slot
//! definitions, inter-slot dependencies and inheritance rules. An admin
//! reload publishes a whole new [`Catalog`] snapshot atomically; ongoing
//! turns keep the snapshot they started with.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Slot value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    Text,
    Number,
    Date,
    Time,
    Email,
    Phone,
    Entity,
    Boolean,
    Enum,
}

impl SlotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotKind::Text => "text",
            SlotKind::Number => "number",
            SlotKind::Date => "date",
            SlotKind::Time => "time",
            SlotKind::Email => "email",
            SlotKind::Phone => "phone",
            SlotKind::Entity => "entity",
            SlotKind::Boolean => "boolean",
            SlotKind::Enum => "enum",
        }
    }

    /// Strict-format slots tolerate fewer failed attempts before the
    /// session escalates to recovery.
    pub fn failure_ceiling(&self) -> u32 {
        match self {
            SlotKind::Email | SlotKind::Phone => 2,
            _ => 3,
        }
    }
}

/// Declarative validation constraints attached to a slot definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotValidation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Regex applied to the normalized value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// User-facing message when `pattern` fails.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern_message: Option<String>,
    /// Canonical options for enum slots.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    /// Earliest acceptable date (ISO), or `"today"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_date: Option<String>,
}

/// Typed parameter template of an intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotDef {
    pub name: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub kind: SlotKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub is_list: bool,
    #[serde(default)]
    pub validation: SlotValidation,
    /// Example values, used by prompts and the keyword NLU fallback.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
    /// Optional per-slot question template; `{display_name}` and
    /// `{examples}` expand against context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub extraction_priority: i32,
}

impl SlotDef {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>, kind: SlotKind) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            kind,
            required: false,
            is_list: false,
            validation: SlotValidation::default(),
            examples: Vec::new(),
            prompt_template: None,
            sort_order: 0,
            extraction_priority: 0,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_validation(mut self, validation: SlotValidation) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_examples(mut self, examples: Vec<String>) -> Self {
        self.examples = examples;
        self
    }

    pub fn with_prompt(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = Some(template.into());
        self
    }

    pub fn with_sort_order(mut self, order: i32) -> Self {
        self.sort_order = order;
        self
    }
}

/// Relation kind between two slots of one intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// `to` may be filled only after `from` has a value.
    Required,
    /// `to` is required only while `condition` holds.
    Conditional,
    /// `from` and `to` must not both be set.
    Mutex,
    /// Required with meaningful ordering (country -> city -> address).
    Hierarchical,
    /// At least one member of the named group must be filled.
    GroupAny,
    /// Every member of the named group must be filled.
    GroupAll,
    /// `to` must be chronologically after `from`.
    Temporal,
    /// `to` is derived from `from` by a named transform.
    Computed,
}

impl DependencyKind {
    /// Edge kinds that participate in cycle detection; a cycle over these
    /// makes the intent unfillable.
    pub fn is_ordering(&self) -> bool {
        matches!(self, DependencyKind::Required | DependencyKind::Hierarchical)
    }
}

/// Condition attached to a `Conditional` edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeCondition {
    /// The condition slot's normalized value equals `value`.
    ValueEquals { slot: String, value: String },
    /// The condition slot's normalized value is one of `values`.
    ValueIn { slot: String, values: Vec<String> },
    /// The condition slot parses as a number within [min, max].
    ValueRange {
        slot: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    /// The condition slot has any non-empty value.
    HasValue { slot: String },
}

/// One directed dependency between two slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    pub kind: DependencyKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<EdgeCondition>,
    /// Group name for GroupAny / GroupAll edges.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Transform name for Computed edges.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
    #[serde(default)]
    pub priority: i32,
}

impl DependencyEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>, kind: DependencyKind) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind,
            condition: None,
            group: None,
            transform: None,
            priority: 0,
        }
    }

    pub fn with_condition(mut self, condition: EdgeCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Where an inherited slot value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InheritSource {
    /// The live session's collected slots (suspended intents included).
    Session,
    /// Slot snapshots from the last-N conversation turns.
    Conversation,
    /// The user's stored profile.
    UserProfile,
    /// A literal configured default.
    Default,
}

/// How an inherited candidate combines with a directly extracted value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InheritStrategy {
    /// Use the inherited value only when nothing was extracted.
    Supplement,
    /// Prefer the inherited value.
    Overwrite,
    /// List slots only: concatenate and de-duplicate.
    Merge,
}

/// Declarative carry-over of a value into a target slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InheritanceRule {
    pub source_slot: String,
    pub target_slot: String,
    pub source: InheritSource,
    pub strategy: InheritStrategy,
    /// Optional gate; the rule only fires while it holds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<EdgeCondition>,
    /// Named pure transform applied before assignment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
    /// Literal value for `InheritSource::Default`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default)]
    pub priority: i32,
}

/// Question phrasing kind for template selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    Direct,
    Choice,
    Confirmation,
    Clarification,
    FollowUp,
    Suggestion,
    Conditional,
}

/// A dispatchable user goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentDef {
    pub name: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Minimum NLU confidence for this intent to be taken directly.
    pub confidence_threshold: f32,
    pub slots: Vec<SlotDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<DependencyEdge>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inheritance: Vec<InheritanceRule>,
    /// Example utterances, used by the keyword NLU fallback.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
    /// Function dispatched once the slot set is complete.
    pub function_name: String,
    /// Reply template over the function result, used when the result
    /// carries no message. `{field}` expands against `result.data`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_template: Option<String>,
}

impl IntentDef {
    pub fn slot(&self, name: &str) -> Option<&SlotDef> {
        self.slots.iter().find(|s| s.name == name)
    }

    pub fn required_slots(&self) -> impl Iterator<Item = &SlotDef> {
        self.slots.iter().filter(|s| s.required)
    }
}

/// Immutable configuration snapshot shared across sessions.
///
/// Hot reload swaps the whole snapshot behind an `Arc`; a turn in flight
/// sees either the old or the new catalog, never a mix.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    intents: HashMap<String, IntentDef>,
    /// Monotonic version, bumped on every publish.
    pub version: u64,
}

impl Catalog {
    pub fn new(intents: Vec<IntentDef>, version: u64) -> Self {
        Self {
            intents: intents.into_iter().map(|i| (i.name.clone(), i)).collect(),
            version,
        }
    }

    pub fn intent(&self, name: &str) -> Option<&IntentDef> {
        self.intents.get(name)
    }

    pub fn intents(&self) -> impl Iterator<Item = &IntentDef> {
        self.intents.values()
    }

    pub fn intent_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.intents.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    /// Digest handed to the NLU so it can scope classification to the
    /// published catalog generation.
    pub fn digest(&self) -> String {
        format!("catalog-v{}-{}", self.version, self.intents.len())
    }
}

/// Shared handle to the published catalog snapshot.
///
/// Readers clone the `Arc` and keep using their snapshot for the rest of
/// the turn; `publish` swaps the pointer atomically.
#[derive(Clone, Default)]
pub struct CatalogHandle {
    current: std::sync::Arc<parking_lot::RwLock<std::sync::Arc<Catalog>>>,
}

impl CatalogHandle {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            current: std::sync::Arc::new(parking_lot::RwLock::new(std::sync::Arc::new(catalog))),
        }
    }

    /// The snapshot to use for this turn.
    pub fn current(&self) -> std::sync::Arc<Catalog> {
        self.current.read().clone()
    }

    /// Publish a new snapshot. Ongoing turns keep the one they hold.
    pub fn publish(&self, catalog: Catalog) {
        let version = catalog.version;
        *self.current.write() = std::sync::Arc::new(catalog);
        tracing::info!(version, "published catalog snapshot");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flight_intent() -> IntentDef {
        IntentDef {
            name: "book_flight".to_string(),
            display_name: "订机票".to_string(),
            description: None,
            confidence_threshold: 0.7,
            slots: vec![
                SlotDef::new("departure_city", "出发城市", SlotKind::Text).required(),
                SlotDef::new("arrival_city", "到达城市", SlotKind::Text).required(),
                SlotDef::new("departure_date", "出发日期", SlotKind::Date).required(),
            ],
            dependencies: vec![DependencyEdge::new(
                "departure_city",
                "arrival_city",
                DependencyKind::Required,
            )],
            inheritance: Vec::new(),
            examples: vec!["我想订机票".to_string()],
            function_name: "flight_booking".to_string(),
            reply_template: None,
        }
    }

    #[test]
    fn test_catalog_lookup() {
        let catalog = Catalog::new(vec![flight_intent()], 1);
        assert_eq!(catalog.len(), 1);
        let intent = catalog.intent("book_flight").unwrap();
        assert_eq!(intent.slots.len(), 3);
        assert!(intent.slot("departure_city").is_some());
        assert!(intent.slot("unknown").is_none());
        assert!(catalog.intent("book_train").is_none());
    }

    #[test]
    fn test_required_slots() {
        let intent = flight_intent();
        assert_eq!(intent.required_slots().count(), 3);
    }

    #[test]
    fn test_digest_changes_with_version() {
        let a = Catalog::new(vec![flight_intent()], 1);
        let b = Catalog::new(vec![flight_intent()], 2);
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn test_ordering_edge_kinds() {
        assert!(DependencyKind::Required.is_ordering());
        assert!(DependencyKind::Hierarchical.is_ordering());
        assert!(!DependencyKind::Mutex.is_ordering());
        assert!(!DependencyKind::Temporal.is_ordering());
    }

    #[test]
    fn test_failure_ceiling_stricter_for_formats() {
        assert_eq!(SlotKind::Phone.failure_ceiling(), 2);
        assert_eq!(SlotKind::Text.failure_ceiling(), 3);
    }

    #[test]
    fn test_catalog_handle_swap() {
        let handle = CatalogHandle::new(Catalog::new(vec![flight_intent()], 1));
        let before = handle.current();
        handle.publish(Catalog::new(Vec::new(), 2));
        // The old snapshot stays usable; new readers see the new one.
        assert_eq!(before.version, 1);
        assert_eq!(handle.current().version, 2);
        assert!(handle.current().is_empty());
    }

    #[test]
    fn test_edge_condition_serde() {
        let cond = EdgeCondition::ValueIn {
            slot: "trip_type".to_string(),
            values: vec!["round_trip".to_string()],
        };
        let yaml = serde_json::to_string(&cond).unwrap();
        assert!(yaml.contains("value_in"));
    }
}
