// =============================================================================
// Decision Tree — C7 Gini-impurity CART classifier
// =============================================================================
//
// Trains over generic `Vec<f64>` samples rather than the 14-element feature
// contract directly, so the same tree machinery could in principle classify
// any fixed-arity numeric input. Nodes are stored in a flat, pre-order
// array; a node's children are two contiguous subtrees immediately
// following it, so `leftChild = idx + 1` always holds and only
// `rightChild` needs to be recorded.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{MarketError, MarketResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    pub feature_idx: usize,
    pub threshold: f64,
    pub left_child: usize,
    pub right_child: usize,
    pub class_label: u8,
    pub is_leaf: bool,
    /// Fraction of the leaf's training samples that held `class_label`.
    /// Unused on internal nodes.
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<TreeNode>,
    max_depth: usize,
}

struct Sample<'a> {
    features: &'a [f64],
    label: u8,
}

impl DecisionTree {
    /// Train a tree over `samples` (each a fixed-arity `Vec<f64>`) and
    /// matching `labels`, stopping at `max_depth`.
    pub fn train(samples: &[Vec<f64>], labels: &[u8], max_depth: usize) -> MarketResult<Self> {
        if samples.len() != labels.len() {
            return Err(MarketError::Validation("samples and labels length mismatch".into()));
        }
        if samples.is_empty() {
            return Err(MarketError::Validation("cannot train on an empty sample set".into()));
        }

        let pairs: Vec<Sample> = samples.iter().zip(labels.iter()).map(|(f, l)| Sample { features: f, label: *l }).collect();
        let mut nodes = Vec::new();
        build_node(&pairs, 0, max_depth, &mut nodes);
        Ok(Self { nodes, max_depth })
    }

    /// Traverse from the root, returning `(label, confidence)`.
    pub fn predict(&self, features: &[f64]) -> (u8, f64) {
        if self.nodes.is_empty() {
            return (0, 0.0);
        }
        let mut idx = 0usize;
        loop {
            let node = &self.nodes[idx];
            if node.is_leaf {
                return (node.class_label, node.confidence);
            }
            let value = features.get(node.feature_idx).copied().unwrap_or(0.0);
            idx = if value <= node.threshold { node.left_child } else { node.right_child };
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Persist as a JSON array of nodes with file mode 0600.
    pub fn save(&self, path: impl AsRef<Path>) -> MarketResult<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&self.nodes).map_err(|e| MarketError::Fatal(format!("serialize tree: {e}")))?;
        fs::write(path, json).map_err(|e| MarketError::Fatal(format!("write tree file: {e}")))?;
        let mut perms = fs::metadata(path).map_err(|e| MarketError::Fatal(format!("stat tree file: {e}")))?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms).map_err(|e| MarketError::Fatal(format!("chmod tree file: {e}")))?;
        Ok(())
    }

    /// Load and validate child-index bounds; out-of-range indices are a
    /// fatal load error rather than a panic at predict time.
    pub fn load(path: impl AsRef<Path>, max_depth: usize) -> MarketResult<Self> {
        let json = fs::read_to_string(path).map_err(|e| MarketError::Fatal(format!("read tree file: {e}")))?;
        let nodes: Vec<TreeNode> = serde_json::from_str(&json).map_err(|e| MarketError::Fatal(format!("parse tree file: {e}")))?;

        let n = nodes.len();
        for node in &nodes {
            if !node.is_leaf && (node.left_child >= n || node.right_child >= n) {
                return Err(MarketError::Fatal(format!(
                    "tree node has out-of-range child index (left={}, right={}, len={})",
                    node.left_child, node.right_child, n
                )));
            }
        }

        Ok(Self { nodes, max_depth })
    }
}

fn majority_label(samples: &[Sample]) -> (u8, f64) {
    let mut counts = std::collections::BTreeMap::new();
    for s in samples {
        *counts.entry(s.label).or_insert(0usize) += 1;
    }
    // BTreeMap iterates in key order, so ties resolve to the lowest class id.
    let (label, count) = counts.into_iter().max_by_key(|(label, count)| (*count, std::cmp::Reverse(*label))).unwrap();
    let confidence = count as f64 / samples.len() as f64;
    (label, confidence)
}

fn gini(samples: &[Sample]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut counts = std::collections::HashMap::new();
    for s in samples {
        *counts.entry(s.label).or_insert(0usize) += 1;
    }
    let n = samples.len() as f64;
    1.0 - counts.values().map(|&c| (c as f64 / n).powi(2)).sum::<f64>()
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    values[values.len() / 2]
}

/// Best split across all features: threshold = median of that feature's
/// values across the current sample; impurity = weighted Gini.
fn best_split(samples: &[Sample]) -> Option<(usize, f64)> {
    if samples.is_empty() {
        return None;
    }
    let arity = samples[0].features.len();
    let n = samples.len() as f64;

    let mut best: Option<(usize, f64, f64)> = None; // (feature_idx, threshold, impurity)

    for feature_idx in 0..arity {
        let mut values: Vec<f64> = samples.iter().map(|s| s.features[feature_idx]).collect();
        let threshold = median(&mut values);

        let left: Vec<&Sample> = samples.iter().filter(|s| s.features[feature_idx] <= threshold).collect();
        let right: Vec<&Sample> = samples.iter().filter(|s| s.features[feature_idx] > threshold).collect();
        if left.is_empty() || right.is_empty() {
            continue;
        }

        let left_samples: Vec<Sample> = left.iter().map(|s| Sample { features: s.features, label: s.label }).collect();
        let right_samples: Vec<Sample> = right.iter().map(|s| Sample { features: s.features, label: s.label }).collect();
        let impurity = (left_samples.len() as f64 / n) * gini(&left_samples) + (right_samples.len() as f64 / n) * gini(&right_samples);

        if best.as_ref().map(|(_, _, best_impurity)| impurity < *best_impurity).unwrap_or(true) {
            best = Some((feature_idx, threshold, impurity));
        }
    }

    best.map(|(idx, threshold, _)| (idx, threshold))
}

/// Appends this node (and its subtree, if any) to `nodes` in pre-order,
/// returning its own index. Uses a placeholder-then-patch technique: the
/// node is pushed first so its index is known, left subtree follows
/// immediately, and `right_child` is patched in once the left subtree's
/// length is known.
fn build_node(samples: &[Sample], depth: usize, max_depth: usize, nodes: &mut Vec<TreeNode>) -> usize {
    let idx = nodes.len();
    let all_same = samples.iter().all(|s| s.label == samples[0].label);

    if depth >= max_depth || all_same || samples.len() < 2 {
        let (label, confidence) = majority_label(samples);
        nodes.push(TreeNode { feature_idx: 0, threshold: 0.0, left_child: 0, right_child: 0, class_label: label, is_leaf: true, confidence });
        return idx;
    }

    let split = best_split(samples);
    let (feature_idx, threshold) = match split {
        Some(s) => s,
        None => {
            let (label, confidence) = majority_label(samples);
            nodes.push(TreeNode { feature_idx: 0, threshold: 0.0, left_child: 0, right_child: 0, class_label: label, is_leaf: true, confidence });
            return idx;
        }
    };

    let left_samples: Vec<Sample> = samples.iter().filter(|s| s.features[feature_idx] <= threshold).map(|s| Sample { features: s.features, label: s.label }).collect();
    let right_samples: Vec<Sample> = samples.iter().filter(|s| s.features[feature_idx] > threshold).map(|s| Sample { features: s.features, label: s.label }).collect();

    nodes.push(TreeNode { feature_idx, threshold, left_child: 0, right_child: 0, class_label: 0, is_leaf: false, confidence: 0.0 });

    let left_idx = build_node(&left_samples, depth + 1, max_depth, nodes);
    let right_idx = build_node(&right_samples, depth + 1, max_depth, nodes);

    nodes[idx].left_child = left_idx;
    nodes[idx].right_child = right_idx;
    idx
}
