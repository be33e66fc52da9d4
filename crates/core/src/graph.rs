//! Per-entity dependency graph over calculated fields, with cycle
//! detection and evaluation ordering.
//!
//! An edge `from -> to` means `from`'s formula references `to`. The graph is
//! rebuilt from scratch on every call; nothing is memoized between calls.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::error::{Severity, SyntaxError};
use crate::parser::parse_formula;
use crate::resolve::collect_references;
use crate::schema::SchemaSnapshot;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct DependencyEdge {
    pub from_field_id: String,
    pub to_field_id: String,
}

/// One cycle, rotated to start at its smallest field id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub field_ids: Vec<String>,
    /// e.g. `"A → B → C → A"`
    pub cycle_path: String,
    pub severity: Severity,
}

impl CycleReport {
    fn from_path(path: &[&str]) -> Self {
        let start = path
            .iter()
            .enumerate()
            .min_by_key(|(_, id)| **id)
            .map_or(0, |(i, _)| i);
        let field_ids: Vec<String> = path[start..]
            .iter()
            .chain(path[..start].iter())
            .map(|s| (*s).to_owned())
            .collect();
        let mut nodes: Vec<&str> = field_ids.iter().map(String::as_str).collect();
        nodes.push(field_ids[0].as_str());
        CycleReport {
            cycle_path: nodes.join(" \u{2192} "),
            field_ids,
            severity: Severity::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnPath,
    Done,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
    unparsed: BTreeMap<String, Vec<SyntaxError>>,
}

impl DependencyGraph {
    /// Build the graph of all calculated fields of the snapshot's entity.
    ///
    /// A calculated field whose formula does not parse is still a node, but
    /// contributes no edges; its errors are kept in [`Self::unparsed`].
    pub fn build(schema: &SchemaSnapshot) -> Self {
        let calculated: BTreeSet<&str> = schema.calculated_fields().map(|(id, _)| id).collect();
        let mut graph = DependencyGraph::default();
        for (field_id, def) in schema.calculated_fields() {
            let targets = graph.edges.entry(field_id.to_owned()).or_default();
            let Some(src) = def.formula.as_deref().filter(|s| !s.trim().is_empty()) else {
                continue;
            };
            match parse_formula(src) {
                Ok(expr) => {
                    targets.extend(
                        collect_references(&expr, &schema.entity_id)
                            .into_iter()
                            .filter(|r| calculated.contains(r.as_str())),
                    );
                }
                Err(errors) => {
                    graph.unparsed.insert(field_id.to_owned(), errors);
                }
            }
        }
        graph
    }

    /// Build a graph from explicit adjacency. Targets that are not
    /// themselves keys are dropped.
    pub fn from_references<I, S>(references: I) -> Self
    where
        I: IntoIterator<Item = (S, BTreeSet<String>)>,
        S: Into<String>,
    {
        let mut edges: BTreeMap<String, BTreeSet<String>> = references
            .into_iter()
            .map(|(k, v)| (k.into(), v))
            .collect();
        let nodes: BTreeSet<String> = edges.keys().cloned().collect();
        for targets in edges.values_mut() {
            targets.retain(|t| nodes.contains(t));
        }
        DependencyGraph {
            edges,
            unparsed: BTreeMap::new(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.edges.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(String::as_str)
    }

    pub fn edges(&self) -> Vec<DependencyEdge> {
        self.edges
            .iter()
            .flat_map(|(from, targets)| {
                targets.iter().map(move |to| DependencyEdge {
                    from_field_id: from.clone(),
                    to_field_id: to.clone(),
                })
            })
            .collect()
    }

    pub fn dependencies_of(&self, field_id: &str) -> Option<&BTreeSet<String>> {
        self.edges.get(field_id)
    }

    /// Calculated fields whose formula failed to parse.
    pub fn unparsed(&self) -> &BTreeMap<String, Vec<SyntaxError>> {
        &self.unparsed
    }

    /// Every cycle in the graph, found by one depth-first pass.
    ///
    /// Each back edge to a node on the current path yields one cycle; the
    /// search continues afterwards. Self references are one-node cycles.
    /// Reports are deduplicated and sorted, so the result is independent of
    /// insertion order.
    pub fn find_cycles(&self) -> Vec<CycleReport> {
        let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(self.edges.len());
        let mut found: BTreeMap<Vec<String>, CycleReport> = BTreeMap::new();

        for root in self.edges.keys() {
            if marks.contains_key(root.as_str()) {
                continue;
            }
            // Explicit stack of (node, index of next neighbour to visit).
            let mut stack: Vec<(&str, Vec<&str>, usize)> = Vec::new();
            let mut path: Vec<&str> = Vec::new();
            let root = root.as_str();
            marks.insert(root, Mark::OnPath);
            path.push(root);
            stack.push((root, self.neighbours(root), 0));

            while let Some((node, neighbours, next)) = stack.last_mut() {
                if *next >= neighbours.len() {
                    marks.insert(*node, Mark::Done);
                    path.pop();
                    stack.pop();
                    continue;
                }
                let target = neighbours[*next];
                *next += 1;
                match marks.get(target) {
                    Some(Mark::OnPath) => {
                        if let Some(pos) = path.iter().position(|&n| n == target) {
                            let report = CycleReport::from_path(&path[pos..]);
                            found.entry(report.field_ids.clone()).or_insert(report);
                        }
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(target, Mark::OnPath);
                        path.push(target);
                        let next_neighbours = self.neighbours(target);
                        stack.push((target, next_neighbours, 0));
                    }
                }
            }
        }
        found.into_values().collect()
    }

    pub fn is_acyclic(&self) -> bool {
        self.find_cycles().is_empty()
    }

    /// Fields ordered so that every field comes after the fields it reads.
    /// Ties are broken by field id.
    pub fn evaluation_order(&self) -> Result<Vec<String>, Vec<CycleReport>> {
        let mut pending: BTreeMap<&str, usize> = self
            .edges
            .iter()
            .map(|(id, deps)| (id.as_str(), deps.len()))
            .collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for (from, targets) in &self.edges {
            for to in targets {
                dependents.entry(to.as_str()).or_default().push(from.as_str());
            }
        }
        let mut ready: BTreeSet<&str> = pending
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.edges.len());
        while let Some(id) = ready.pop_first() {
            order.push(id.to_owned());
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(n) = pending.get_mut(dependent) {
                    *n -= 1;
                    if *n == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }
        if order.len() == self.edges.len() {
            Ok(order)
        } else {
            Err(self.find_cycles())
        }
    }

    fn neighbours(&self, node: &str) -> Vec<&str> {
        self.edges
            .get(node)
            .map(|t| t.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDefinition, FormulaType};

    fn entity(formulas: &[(&str, &str)]) -> SchemaSnapshot {
        formulas.iter().fold(SchemaSnapshot::new("e"), |s, (id, f)| {
            s.with_field(*id, FieldDefinition::calculated(FormulaType::Number, *f))
        })
    }

    fn ids(report: &CycleReport) -> Vec<&str> {
        report.field_ids.iter().map(String::as_str).collect()
    }

    #[test]
    fn two_node_cycle() {
        let graph = DependencyGraph::build(&entity(&[("A", "B + 1"), ("B", "A + 1")]));
        let cycles = graph.find_cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(ids(&cycles[0]), vec!["A", "B"]);
        assert_eq!(cycles[0].cycle_path, "A \u{2192} B \u{2192} A");
        assert_eq!(cycles[0].severity, Severity::Error);
    }

    #[test]
    fn self_reference_is_one_node_cycle() {
        let graph = DependencyGraph::build(&entity(&[("A", "A * 2")]));
        let cycles = graph.find_cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(ids(&cycles[0]), vec!["A"]);
        assert_eq!(cycles[0].cycle_path, "A \u{2192} A");
    }

    #[test]
    fn cycle_is_rotated_to_smallest_id() {
        let graph = DependencyGraph::build(&entity(&[("c", "b"), ("b", "a"), ("a", "c")]));
        let cycles = graph.find_cycles();
        assert_eq!(ids(&cycles[0]), vec!["a", "c", "b"]);
        assert_eq!(cycles[0].cycle_path, "a \u{2192} c \u{2192} b \u{2192} a");
    }

    #[test]
    fn disjoint_cycles_are_all_reported() {
        let graph = DependencyGraph::build(&entity(&[
            ("a", "b"),
            ("b", "a"),
            ("c", "d"),
            ("d", "e"),
            ("e", "c"),
            ("f", "f"),
            ("g", "a + c"),
        ]));
        let cycles = graph.find_cycles();
        assert_eq!(cycles.len(), 3);
        assert_eq!(ids(&cycles[0]), vec!["a", "b"]);
        assert_eq!(ids(&cycles[1]), vec!["c", "d", "e"]);
        assert_eq!(ids(&cycles[2]), vec!["f"]);
    }

    #[test]
    fn input_fields_are_not_nodes() {
        let schema = entity(&[("total", "net + tax")])
            .with_field("net", FieldDefinition::input(FormulaType::Number))
            .with_field("tax", FieldDefinition::input(FormulaType::Number));
        let graph = DependencyGraph::build(&schema);
        assert_eq!(graph.node_count(), 1);
        assert!(graph.edges().is_empty());
    }

    #[test]
    fn linear_chain_orders_dependencies_first() {
        let graph = DependencyGraph::build(&entity(&[("A", "B + 1"), ("B", "C + 1"), ("C", "10")]));
        assert!(graph.is_acyclic());
        assert_eq!(
            graph.evaluation_order().expect("acyclic"),
            vec!["C".to_string(), "B".to_string(), "A".to_string()]
        );
        assert_eq!(
            graph.edges(),
            vec![
                DependencyEdge {
                    from_field_id: "A".into(),
                    to_field_id: "B".into()
                },
                DependencyEdge {
                    from_field_id: "B".into(),
                    to_field_id: "C".into()
                },
            ]
        );
    }

    #[test]
    fn evaluation_order_fails_with_cycles() {
        let graph = DependencyGraph::build(&entity(&[("A", "B"), ("B", "A"), ("C", "1")]));
        let cycles = graph.evaluation_order().unwrap_err();
        assert_eq!(cycles.len(), 1);
    }

    #[test]
    fn unparsable_formula_is_a_node_without_edges() {
        let graph = DependencyGraph::build(&entity(&[("A", "B +"), ("B", "A")]));
        assert_eq!(graph.node_count(), 2);
        assert!(graph.unparsed().contains_key("A"));
        assert!(graph.is_acyclic());
    }

    #[test]
    fn from_references_drops_unknown_targets() {
        let graph = DependencyGraph::from_references([
            ("x", BTreeSet::from(["y".to_string(), "zz".to_string()])),
            ("y", BTreeSet::new()),
        ]);
        assert_eq!(graph.edges().len(), 1);
    }

    #[test]
    fn long_chain_does_not_overflow_the_stack() {
        let formulas: Vec<(String, String)> = (0..20_000)
            .map(|i| (format!("f{:05}", i), format!("f{:05} + 1", i + 1)))
            .collect();
        let schema = formulas.iter().fold(SchemaSnapshot::new("e"), |s, (id, f)| {
            s.with_field(id.clone(), FieldDefinition::calculated(FormulaType::Number, f.clone()))
        });
        let graph = DependencyGraph::build(&schema);
        assert!(graph.is_acyclic());
        assert_eq!(graph.evaluation_order().map(|o| o.len()).ok(), Some(20_000));
    }
}
