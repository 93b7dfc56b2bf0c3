//! Decision tree compiler: flat rules → cost-aware split tree.
//!
//! The tree is an arena (`Vec<TreeNode>`) addressed by index; node 0 is the
//! root. Each split picks the unused key maximising
//!
//! ```text
//! score(key) = coverage(key) / (1 + cost(key))
//! coverage   = |rules with an `eq` condition on key| / |rules at this node|
//! ```
//!
//! so cheap, widely used keys (time fields) are tested before expensive
//! ones (location). Rules with an `eq` on the split key go to the branch for
//! that value; rules without one join every branch *and* the default branch.
//! A node becomes a leaf when no candidate key remains, at most
//! [`LEAF_SIZE`] rules remain, or the key budget is spent.
//!
//! # Invariants
//!
//! - Every rule handed to [`DecisionTree::compile`] appears in at least one leaf.
//! - Depth ≤ number of distinct split keys ≤ `max_keys`.

use hashbrown::HashMap;
use tracing::debug;

use crate::rule::{ContextMap, Operator, Rule};

/// Nodes with this many rules or fewer are not split further.
pub const LEAF_SIZE: usize = 2;

/// Default maximum number of distinct split keys on any root→leaf path.
pub const DEFAULT_MAX_KEYS: usize = 5;

/// Static evaluation cost of a context key. Lower is cheaper.
///
/// | Cost | Keys |
/// |---|---|
/// | 0 | `hour`, `minute`, `timeOfDay`, `dayOfWeek`, `isWeekend` |
/// | 1 | `batteryLevel`, `isCharging`, `networkType` |
/// | 2 | `motionState`, `stepCount`, anything unknown |
/// | 3 | `geofence`, `location`, `latitude`, `longitude`, `wifiSsid`, `cellId`, `heartRate`, `ambientLight`, `noiseLevel` |
pub fn feature_cost(key: &str) -> u8 {
    match key {
        "hour" | "minute" | "timeOfDay" | "dayOfWeek" | "isWeekend" => 0,
        "batteryLevel" | "isCharging" | "networkType" => 1,
        "motionState" | "stepCount" => 2,
        "geofence" | "location" | "latitude" | "longitude" | "wifiSsid" | "cellId" | "heartRate"
        | "ambientLight" | "noiseLevel" => 3,
        _ => 2,
    }
}

/// One arena node.
#[derive(Clone, Debug, PartialEq)]
pub enum TreeNode {
    /// Candidate rules, as indices into the slice the tree was compiled from.
    Leaf {
        /// Rule indices.
        rules: Vec<usize>,
    },
    /// Test one context key.
    Split {
        /// Context key tested at this node.
        key: String,
        /// Exact value → child node index, sorted by value.
        branches: Vec<(String, usize)>,
        /// Child for values not listed in `branches`.
        default: Option<usize>,
    },
}

/// Compiled decision tree over a rule slice.
#[derive(Clone, Debug, Default)]
pub struct DecisionTree {
    nodes: Vec<TreeNode>,
}

struct Pending {
    node: usize,
    rules: Vec<usize>,
    used: Vec<String>,
}

impl DecisionTree {
    /// Compile the enabled rules of `rules`. Indices in the tree refer to `rules`.
    ///
    /// An empty (or fully disabled) rule set yields an empty tree.
    pub fn compile(rules: &[Rule], max_keys: usize) -> Self {
        let enabled: Vec<usize> = rules
            .iter()
            .enumerate()
            .filter(|(_, r)| r.enabled)
            .map(|(i, _)| i)
            .collect();
        if enabled.is_empty() {
            return Self::default();
        }

        let mut nodes = vec![TreeNode::Leaf { rules: Vec::new() }];
        let mut stack = vec![Pending {
            node: 0,
            rules: enabled,
            used: Vec::new(),
        }];

        while let Some(Pending { node, rules: here, used }) = stack.pop() {
            let split = if here.len() <= LEAF_SIZE || used.len() >= max_keys {
                None
            } else {
                best_split_key(rules, &here, &used)
            };

            let Some(key) = split else {
                nodes[node] = TreeNode::Leaf { rules: here };
                continue;
            };

            let mut by_value: HashMap<&str, Vec<usize>> = HashMap::new();
            let mut wildcard = Vec::new();
            for &idx in &here {
                match eq_value(&rules[idx], &key) {
                    Some(v) => by_value.entry(v).or_default().push(idx),
                    None => wildcard.push(idx),
                }
            }

            let mut values: Vec<&str> = by_value.keys().copied().collect();
            values.sort_unstable();

            let mut child_used = used.clone();
            child_used.push(key.clone());

            let mut branches = Vec::with_capacity(values.len());
            for value in values {
                let mut members = by_value.remove(value).unwrap_or_default();
                members.extend_from_slice(&wildcard);
                members.sort_unstable();
                let child = nodes.len();
                nodes.push(TreeNode::Leaf { rules: Vec::new() });
                branches.push((value.to_string(), child));
                stack.push(Pending {
                    node: child,
                    rules: members,
                    used: child_used.clone(),
                });
            }

            let default = if wildcard.is_empty() {
                None
            } else {
                let child = nodes.len();
                nodes.push(TreeNode::Leaf { rules: Vec::new() });
                stack.push(Pending {
                    node: child,
                    rules: wildcard,
                    used: child_used,
                });
                Some(child)
            };

            nodes[node] = TreeNode::Split {
                key,
                branches,
                default,
            };
        }

        debug!(nodes = nodes.len(), "compiled decision tree");
        Self { nodes }
    }

    /// `true` when compiled from an empty rule set.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of arena nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The arena, root first.
    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    /// Walk the tree for `ctx` and return the candidate rule indices, sorted
    /// and deduplicated.
    ///
    /// At a split whose key is present, the matching branch is taken, or the
    /// default when no branch matches. When the key is absent every branch
    /// and the default are explored, so missing data stays a soft 0.5 rather
    /// than hiding rules.
    pub fn candidates(&self, ctx: &ContextMap) -> Vec<usize> {
        let mut out = Vec::new();
        if self.nodes.is_empty() {
            return out;
        }
        let mut stack = vec![0usize];
        while let Some(idx) = stack.pop() {
            match &self.nodes[idx] {
                TreeNode::Leaf { rules } => out.extend_from_slice(rules),
                TreeNode::Split {
                    key,
                    branches,
                    default,
                } => match ctx.get(key) {
                    Some(value) => {
                        let hit = branches
                            .binary_search_by(|(v, _)| v.as_str().cmp(value.as_str()))
                            .ok()
                            .map(|i| branches[i].1);
                        if let Some(child) = hit.or(*default) {
                            stack.push(child);
                        }
                    }
                    None => {
                        stack.extend(branches.iter().map(|(_, c)| *c));
                        stack.extend(*default);
                    }
                },
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Every rule index present in some leaf, sorted and deduplicated.
    pub fn reachable_rules(&self) -> Vec<usize> {
        let mut out: Vec<usize> = self
            .nodes
            .iter()
            .filter_map(|n| match n {
                TreeNode::Leaf { rules } => Some(rules.iter().copied()),
                TreeNode::Split { .. } => None,
            })
            .flatten()
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Longest root→leaf path, counted in split nodes.
    pub fn depth(&self) -> usize {
        if self.nodes.is_empty() {
            return 0;
        }
        let mut max = 0;
        let mut stack = vec![(0usize, 0usize)];
        while let Some((idx, d)) = stack.pop() {
            match &self.nodes[idx] {
                TreeNode::Leaf { .. } => max = max.max(d),
                TreeNode::Split {
                    branches, default, ..
                } => {
                    stack.extend(branches.iter().map(|(_, c)| (*c, d + 1)));
                    if let Some(c) = default {
                        stack.push((*c, d + 1));
                    }
                }
            }
        }
        max
    }
}

/// First `eq` value the rule requires for `key`, if any.
fn eq_value<'r>(rule: &'r Rule, key: &str) -> Option<&'r str> {
    rule.conditions
        .iter()
        .find(|c| c.op == Operator::Eq && c.key == key)
        .map(|c| c.value.as_str())
}

fn best_split_key(rules: &[Rule], here: &[usize], used: &[String]) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for &idx in here {
        let mut seen: Vec<&str> = Vec::new();
        for c in &rules[idx].conditions {
            if c.op == Operator::Eq
                && !seen.contains(&c.key.as_str())
                && !used.iter().any(|u| u == &c.key)
            {
                seen.push(&c.key);
                *counts.entry(&c.key).or_default() += 1;
            }
        }
    }

    let total = here.len() as f64;
    let mut best: Option<(&str, f64)> = None;
    for (key, count) in counts {
        let score = (count as f64 / total) / (1.0 + feature_cost(key) as f64);
        best = match best {
            Some((bk, bs)) if bs > score || (bs == score && bk < key) => Some((bk, bs)),
            _ => Some((key, score)),
        };
    }
    best.map(|(k, _)| k.to_string())
}

// ─── Tests ──────────────────────────────────────────────────────────────────
