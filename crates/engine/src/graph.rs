//! Slot dependency graph
//!
//! Per intent, a directed graph over its slot definitions built from the
//! configured dependency edges. Built at first use and cached per catalog
//! version; an admin reload naturally evicts by changing the version.
//!
//! Cycles over ordering edges (REQUIRED, HIERARCHICAL) make an intent
//! unfillable and fail registration.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use task_router_core::{
    DependencyEdge, DependencyKind, EdgeCondition, Error, ErrorCode, IntentDef, Result,
};

use crate::transforms;

/// Outcome of evaluating every edge against the current values.
#[derive(Debug, Default)]
pub struct GraphValidation {
    /// Edges whose requirement is not met (required-before, group
    /// completeness, unmet conditional requirements).
    pub unsatisfied: Vec<String>,
    /// Hard conflicts: both sides of a MUTEX set.
    pub conflicts: Vec<MutexConflict>,
    /// Required slots (conditional requirements included) with no value.
    pub missing_required: Vec<String>,
}

impl GraphValidation {
    pub fn is_ok(&self) -> bool {
        self.unsatisfied.is_empty() && self.conflicts.is_empty() && self.missing_required.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutexConflict {
    pub left: String,
    pub right: String,
}

/// Immutable dependency graph for one intent.
#[derive(Debug)]
pub struct IntentGraph {
    /// Slot name -> ordering parents (REQUIRED / HIERARCHICAL edges in).
    ordering_parents: HashMap<String, Vec<String>>,
    /// Deterministic full resolution order.
    resolution_order: Vec<String>,
    edges: Vec<DependencyEdge>,
    required: HashSet<String>,
    all_slots: Vec<String>,
}

impl IntentGraph {
    /// Build and verify the graph. Fails with a configuration error when
    /// ordering edges form a cycle.
    pub fn build(intent: &IntentDef) -> Result<Self> {
        let all_slots: Vec<String> = intent.slots.iter().map(|s| s.name.clone()).collect();
        let mut ordering_parents: HashMap<String, Vec<String>> = HashMap::new();
        for slot in &all_slots {
            ordering_parents.insert(slot.clone(), Vec::new());
        }
        for edge in &intent.dependencies {
            if edge.kind.is_ordering() {
                ordering_parents
                    .entry(edge.to.clone())
                    .or_default()
                    .push(edge.from.clone());
            }
        }

        if let Some(cycle) = find_cycle(&ordering_parents) {
            return Err(Error::new(
                ErrorCode::Configuration,
                format!(
                    "intent '{}' has a dependency cycle: {}",
                    intent.name,
                    cycle.join(" -> ")
                ),
            ));
        }

        let resolution_order = resolution_order(intent, &ordering_parents);
        let required = intent
            .slots
            .iter()
            .filter(|s| s.required)
            .map(|s| s.name.clone())
            .collect();

        Ok(Self {
            ordering_parents,
            resolution_order,
            edges: intent.dependencies.clone(),
            required,
            all_slots,
        })
    }

    /// Deterministic topological order over all slots.
    pub fn resolution_order(&self) -> &[String] {
        &self.resolution_order
    }

    /// Slots with no value whose every ordering parent is filled, in
    /// resolution order (required before optional).
    pub fn next_fillable(&self, values: &BTreeMap<String, String>) -> Vec<&str> {
        let mut fillable: Vec<&str> = self
            .resolution_order
            .iter()
            .filter(|slot| !values.contains_key(*slot))
            .filter(|slot| {
                self.ordering_parents
                    .get(*slot)
                    .map(|parents| parents.iter().all(|p| values.contains_key(p)))
                    .unwrap_or(true)
            })
            .map(|s| s.as_str())
            .collect();
        fillable.sort_by_key(|slot| {
            let order = self
                .resolution_order
                .iter()
                .position(|s| s == slot)
                .unwrap_or(usize::MAX);
            (!self.required.contains(*slot), order)
        });
        fillable
    }

    /// Evaluate every edge against the current values.
    pub fn validate_all(&self, values: &BTreeMap<String, String>) -> GraphValidation {
        let mut result = GraphValidation::default();
        let mut conditionally_required: HashSet<&str> = HashSet::new();
        let mut group_members: HashMap<&str, (DependencyKind, Vec<&str>)> = HashMap::new();

        for edge in &self.edges {
            match edge.kind {
                DependencyKind::Required | DependencyKind::Hierarchical => {
                    if values.contains_key(&edge.to) && !values.contains_key(&edge.from) {
                        result
                            .unsatisfied
                            .push(format!("{} -> {}", edge.from, edge.to));
                    }
                },
                DependencyKind::Conditional => {
                    if condition_holds(edge.condition.as_ref(), values) {
                        conditionally_required.insert(edge.to.as_str());
                    }
                },
                DependencyKind::Mutex => {
                    if values.contains_key(&edge.from) && values.contains_key(&edge.to) {
                        result.conflicts.push(MutexConflict {
                            left: edge.from.clone(),
                            right: edge.to.clone(),
                        });
                    }
                },
                DependencyKind::GroupAny | DependencyKind::GroupAll => {
                    if let Some(group) = edge.group.as_deref() {
                        let entry = group_members
                            .entry(group)
                            .or_insert_with(|| (edge.kind, Vec::new()));
                        for member in [edge.from.as_str(), edge.to.as_str()] {
                            if !entry.1.contains(&member) {
                                entry.1.push(member);
                            }
                        }
                    }
                },
                // Temporal ordering is value-level and checked by the
                // validator; Computed slots are synthesized, not required.
                DependencyKind::Temporal | DependencyKind::Computed => {},
            }
        }

        for (group, (kind, members)) in group_members {
            let filled = members.iter().filter(|m| values.contains_key(**m)).count();
            let satisfied = match kind {
                DependencyKind::GroupAny => filled >= 1,
                _ => filled == members.len(),
            };
            if !satisfied {
                result.unsatisfied.push(format!("group:{group}"));
            }
        }

        for slot in &self.all_slots {
            let is_required =
                self.required.contains(slot) || conditionally_required.contains(slot.as_str());
            if is_required && !values.contains_key(slot) {
                result.missing_required.push(slot.clone());
            }
        }
        // Deterministic prompt order.
        let order: HashMap<&str, usize> = self
            .resolution_order
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), i))
            .collect();
        result
            .missing_required
            .sort_by_key(|s| order.get(s.as_str()).copied().unwrap_or(usize::MAX));

        result
    }

    /// Synthesize values for COMPUTED edges whose source is filled and
    /// target empty. Returns (target, value) pairs.
    pub fn synthesize_computed(&self, values: &BTreeMap<String, String>) -> Vec<(String, String)> {
        let mut synthesized = Vec::new();
        for edge in &self.edges {
            if edge.kind != DependencyKind::Computed {
                continue;
            }
            if values.contains_key(&edge.to) {
                continue;
            }
            let Some(source) = values.get(&edge.from) else {
                continue;
            };
            let Some(transform) = edge.transform.as_deref() else {
                continue;
            };
            match transforms::apply(transform, source) {
                Some(value) => synthesized.push((edge.to.clone(), value)),
                None => {
                    tracing::warn!(transform, edge_to = %edge.to, "unknown computed transform");
                },
            }
        }
        synthesized
    }
}

/// Evaluate an edge condition over the current string values. A missing
/// condition always holds.
pub fn condition_holds(
    condition: Option<&EdgeCondition>,
    values: &BTreeMap<String, String>,
) -> bool {
    match condition {
        None => true,
        Some(EdgeCondition::ValueEquals { slot, value }) => {
            values.get(slot).map(|v| v == value).unwrap_or(false)
        },
        Some(EdgeCondition::ValueIn { slot, values: set }) => values
            .get(slot)
            .map(|v| set.iter().any(|s| s == v))
            .unwrap_or(false),
        Some(EdgeCondition::ValueRange { slot, min, max }) => values
            .get(slot)
            .and_then(|v| v.parse::<f64>().ok())
            .map(|n| min.map(|m| n >= m).unwrap_or(true) && max.map(|m| n <= m).unwrap_or(true))
            .unwrap_or(false),
        Some(EdgeCondition::HasValue { slot }) => {
            values.get(slot).map(|v| !v.trim().is_empty()).unwrap_or(false)
        },
    }
}

/// DFS cycle search over ordering parents; returns one cycle path.
fn find_cycle(parents: &HashMap<String, Vec<String>>) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        White,
        Grey,
        Black,
    }

    fn dfs(
        node: &str,
        parents: &HashMap<String, Vec<String>>,
        marks: &mut HashMap<String, Mark>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        marks.insert(node.to_string(), Mark::Grey);
        path.push(node.to_string());
        for parent in parents.get(node).into_iter().flatten() {
            match marks.get(parent.as_str()).copied().unwrap_or(Mark::White) {
                Mark::Grey => {
                    let start = path.iter().position(|p| p == parent).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..].to_vec();
                    cycle.push(parent.clone());
                    return Some(cycle);
                },
                Mark::White => {
                    if let Some(cycle) = dfs(parent, parents, marks, path) {
                        return Some(cycle);
                    }
                },
                Mark::Black => {},
            }
        }
        path.pop();
        marks.insert(node.to_string(), Mark::Black);
        None
    }

    let mut marks: HashMap<String, Mark> = HashMap::new();
    let mut nodes: Vec<&String> = parents.keys().collect();
    nodes.sort();
    for node in nodes {
        if marks.get(node.as_str()).copied().unwrap_or(Mark::White) == Mark::White {
            let mut path = Vec::new();
            if let Some(cycle) = dfs(node, parents, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

/// Kahn's algorithm with a deterministic tie-break: required slots first,
/// then extraction priority descending, then sort order, then name.
fn resolution_order(
    intent: &IntentDef,
    ordering_parents: &HashMap<String, Vec<String>>,
) -> Vec<String> {
    let tie_break = |name: &str| -> (bool, i32, i32, String) {
        let def = intent.slot(name);
        (
            !def.map(|d| d.required).unwrap_or(false),
            -def.map(|d| d.extraction_priority).unwrap_or(0),
            def.map(|d| d.sort_order).unwrap_or(0),
            name.to_string(),
        )
    };

    let mut remaining: HashMap<&str, usize> = intent
        .slots
        .iter()
        .map(|s| {
            (
                s.name.as_str(),
                ordering_parents.get(&s.name).map(|p| p.len()).unwrap_or(0),
            )
        })
        .collect();
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for (child, parents) in ordering_parents {
        for parent in parents {
            children.entry(parent.as_str()).or_default().push(child.as_str());
        }
    }

    let mut order = Vec::with_capacity(intent.slots.len());
    while !remaining.is_empty() {
        let mut ready: Vec<&str> = remaining
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| *name)
            .collect();
        if ready.is_empty() {
            // Defensive: cycles are rejected at build; drain what is left
            // deterministically rather than looping.
            ready = remaining.keys().copied().collect();
        }
        ready.sort_by_key(|name| tie_break(name));
        let next = ready[0];
        remaining.remove(next);
        for child in children.get(next).into_iter().flatten() {
            if let Some(degree) = remaining.get_mut(child) {
                *degree = degree.saturating_sub(1);
            }
        }
        order.push(next.to_string());
    }
    order
}

/// Graph cache keyed by (intent name, catalog version).
#[derive(Default)]
pub struct GraphCache {
    graphs: RwLock<HashMap<(String, u64), Arc<IntentGraph>>>,
}

impl GraphCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(&self, intent: &IntentDef, catalog_version: u64) -> Result<Arc<IntentGraph>> {
        let key = (intent.name.clone(), catalog_version);
        if let Some(graph) = self.graphs.read().get(&key) {
            return Ok(graph.clone());
        }
        let graph = Arc::new(IntentGraph::build(intent)?);
        let mut cache = self.graphs.write();
        // A reload leaves stale versions behind; drop them.
        cache.retain(|(_, version), _| *version == catalog_version);
        cache.insert(key, graph.clone());
        Ok(graph)
    }

    pub fn evict_intent(&self, intent_name: &str) {
        self.graphs.write().retain(|(name, _), _| name != intent_name);
    }

    pub fn len(&self) -> usize {
        self.graphs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.read().is_empty()
    }
}
