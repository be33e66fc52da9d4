//! Control-chain analysis: cycles among control rules and chains longer
//! than the runtime hop limit.
//!
//! A rule links to every VALUE_SET rule whose target its formula reads,
//! the same links the runtime engine follows. Evaluating a rule at the
//! end of a chain of more than `max_chain_depth` links always falls back
//! (display rules) or blocks (VALUE_SET rules), and a cycle of links can
//! never be resolved.

use std::collections::BTreeMap;

use formula_core::{control_links, ControlRule, CycleReport, DependencyGraph};
use serde::Serialize;

/// Default runtime hop limit for control chains.
pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 10;

/// The longest chain of rules pulled in by one rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlChain {
    /// Rules in application order; the requested rule is last.
    pub rule_ids: Vec<String>,
    /// Links between consecutive rules.
    pub hops: usize,
}

impl ControlChain {
    /// The rule whose evaluation pulls in the whole chain.
    pub fn requested_rule(&self) -> &str {
        self.rule_ids.last().map_or("", String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlChainAnalysisResult {
    pub has_cycle: bool,
    /// Cycles over rule ids.
    pub cycles: Vec<CycleReport>,
    /// Longest chain, when the rule links have no cycles.
    pub longest_chain: Option<ControlChain>,
    /// Chains whose hop count exceeds `max_chain_depth`, one per requested
    /// rule.
    pub over_limit: Vec<ControlChain>,
    pub max_chain_depth: usize,
    pub analyzed_rule_count: usize,
}

pub fn analyze_control_chains(
    entity_id: &str,
    rules: &[ControlRule],
    max_chain_depth: usize,
) -> ControlChainAnalysisResult {
    let graph = DependencyGraph::from_references(control_links(rules, entity_id));
    let cycles = graph.find_cycles();

    let (longest_chain, over_limit) = match graph.evaluation_order() {
        Ok(order) => chain_lengths(&graph, &order, max_chain_depth),
        Err(_) => (None, Vec::new()),
    };
    tracing::debug!(
        entity = entity_id,
        rules = rules.len(),
        cycles = cycles.len(),
        over_limit = over_limit.len(),
        "analyzed control chains"
    );
    ControlChainAnalysisResult {
        has_cycle: !cycles.is_empty(),
        cycles,
        longest_chain,
        over_limit,
        max_chain_depth,
        analyzed_rule_count: rules.len(),
    }
}

/// Longest path from every node of an acyclic graph. `order` lists each
/// node after all of its targets.
fn chain_lengths(
    graph: &DependencyGraph,
    order: &[String],
    max_chain_depth: usize,
) -> (Option<ControlChain>, Vec<ControlChain>) {
    // node -> (hops, next node on the longest chain)
    let mut best: BTreeMap<&str, (usize, Option<&str>)> = BTreeMap::new();
    for node in order {
        let mut entry = (0, None);
        for target in graph.dependencies_of(node).into_iter().flatten() {
            let hops = best.get(target.as_str()).map_or(0, |(h, _)| *h) + 1;
            if hops > entry.0 {
                entry = (hops, Some(target.as_str()));
            }
        }
        best.insert(node.as_str(), entry);
    }

    let chain_from = |start: &str| {
        let mut rule_ids = vec![start.to_owned()];
        let mut cursor = best.get(start).and_then(|(_, next)| *next);
        while let Some(node) = cursor {
            rule_ids.push(node.to_owned());
            cursor = best.get(node).and_then(|(_, next)| *next);
        }
        rule_ids.reverse();
        ControlChain {
            hops: rule_ids.len() - 1,
            rule_ids,
        }
    };

    let longest = best
        .iter()
        .filter(|(_, (hops, _))| *hops > 0)
        .max_by(|a, b| a.1 .0.cmp(&b.1 .0).then_with(|| b.0.cmp(a.0)))
        .map(|(start, _)| chain_from(start));
    let over_limit = best
        .iter()
        .filter(|(_, (hops, _))| *hops > max_chain_depth)
        .map(|(start, _)| chain_from(start))
        .collect();
    (longest, over_limit)
}
