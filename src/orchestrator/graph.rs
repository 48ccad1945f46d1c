use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::BTreeMap;

use anyhow::anyhow;

use super::error::StackError;
use super::phase::PhaseDescriptor;

/// A validated set of phases in an order that respects every `depends_on`.
///
/// Edges point from dependency to dependent, so a topological sort yields
/// dependencies first.
#[derive(Debug)]
pub struct PhasePlan {
    phases: Vec<PhaseDescriptor>,
}

impl PhasePlan {
    /// Order `phases` by their declared dependencies.
    ///
    /// Fails on a duplicate phase name, a dependency on a phase that is not in
    /// the list, or a cycle.
    pub fn new(phases: Vec<PhaseDescriptor>) -> Result<Self, StackError> {
        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut node_map: BTreeMap<String, NodeIndex> = BTreeMap::new();

        for phase in &phases {
            if node_map.contains_key(&phase.name) {
                return Err(anyhow!("phase '{}' is defined more than once", phase.name).into());
            }
            let idx = graph.add_node(phase.name.clone());
            node_map.insert(phase.name.clone(), idx);
        }

        for phase in &phases {
            let dependent = node_map[&phase.name];
            for dep in &phase.depends_on {
                let dep_idx = node_map.get(dep).ok_or_else(|| {
                    anyhow!(
                        "phase '{}' depends on '{}', which is not defined",
                        phase.name,
                        dep
                    )
                })?;
                graph.add_edge(*dep_idx, dependent, ());
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            anyhow!(
                "dependency cycle detected involving '{}'",
                graph[cycle.node_id()]
            )
        })?;

        // Node indices were assigned in input order.
        let mut slots: Vec<Option<PhaseDescriptor>> = phases.into_iter().map(Some).collect();
        let phases = order
            .into_iter()
            .filter_map(|idx| slots[idx.index()].take())
            .collect();

        Ok(Self { phases })
    }

    pub fn names(&self) -> Vec<&str> {
        self.phases.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn into_phases(self) -> Vec<PhaseDescriptor> {
        self.phases
    }
}
