//! Documentation plan payloads.
//!
//! A plan is a forest of `{ name, title, prompt, children }` nodes recovered
//! from the plan pass. [`parse_plan`] accepts either `{"items": [...]}` or a
//! bare array, strips whitespace from every title, and rejects empty
//! forests. [`PlanTree::flatten`] turns the forest into persisted
//! [`CatalogueNode`]s with fresh ids, parent links, and sibling order.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::extract::{extract_first, Strategy};
use crate::models::CatalogueNode;

/// Structural tag the plan pass is asked to wrap its JSON in.
pub const PLAN_TAG: &str = "documentation_structure";

/// Ordered recovery chain for plan-pass output.
pub const PLAN_STRATEGIES: [Strategy; 3] = [
    Strategy::Tagged(PLAN_TAG),
    Strategy::Fenced("json"),
    Strategy::Raw,
];

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("no structured plan found in generation output")]
    NoPayload,
    #[error("plan JSON is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("plan contains no catalogue nodes")]
    Empty,
}

/// One node of a recovered plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanNode {
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub children: Vec<PlanNode>,
    #[serde(default, alias = "dependent_files", alias = "dependentFile")]
    pub dependent_file: Vec<String>,
}

/// A recovered plan forest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanTree {
    pub items: Vec<PlanNode>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PlanPayload {
    Wrapped { items: Vec<PlanNode> },
    Bare(Vec<PlanNode>),
}

/// Extract and parse a plan from raw plan-pass output.
pub fn recover_plan(output: &str) -> Result<PlanTree, PlanError> {
    let (_, payload) = extract_first(output, &PLAN_STRATEGIES).ok_or(PlanError::NoPayload)?;
    parse_plan(&payload)
}

/// Parse a JSON plan payload.
pub fn parse_plan(json: &str) -> Result<PlanTree, PlanError> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let items = match serde_json::from_value::<PlanPayload>(value)? {
        PlanPayload::Wrapped { items } | PlanPayload::Bare(items) => items,
    };

    if items.is_empty() {
        return Err(PlanError::Empty);
    }

    let mut tree = PlanTree { items };
    for node in &mut tree.items {
        strip_titles(node);
    }
    Ok(tree)
}

fn strip_titles(node: &mut PlanNode) {
    node.title.retain(|c| !c.is_whitespace());
    for child in &mut node.children {
        strip_titles(child);
    }
}

impl PlanTree {
    /// Total number of nodes in the forest.
    pub fn len(&self) -> usize {
        fn count(nodes: &[PlanNode]) -> usize {
            nodes.iter().map(|n| 1 + count(&n.children)).sum()
        }
        count(&self.items)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Flatten into catalogue nodes, parents before children.
    pub fn flatten(&self, job_id: &str) -> Vec<CatalogueNode> {
        let mut out = Vec::with_capacity(self.len());
        flatten_into(&self.items, job_id, None, &mut out);
        out
    }
}

fn flatten_into(
    nodes: &[PlanNode],
    job_id: &str,
    parent_id: Option<&str>,
    out: &mut Vec<CatalogueNode>,
) {
    for (order, node) in nodes.iter().enumerate() {
        let id = Uuid::new_v4().to_string();
        out.push(CatalogueNode {
            id: id.clone(),
            job_id: job_id.to_string(),
            parent_id: parent_id.map(str::to_string),
            name: node.name.clone(),
            title: node.title.clone(),
            prompt: node.prompt.clone(),
            dependent_files: node.dependent_file.clone(),
            order: order as i64,
            is_completed: false,
        });
        flatten_into(&node.children, job_id, Some(&id), out);
    }
}
