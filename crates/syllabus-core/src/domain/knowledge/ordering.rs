//! Prerequisite ordering with deterministic cycle breaking
//!
//! Kahn's algorithm over `prereq_of` edges (prerequisite -> dependent). Ready
//! nodes are taken by (depth, difficulty, title, id). When nothing is ready the
//! remaining subgraph contains a cycle: among its source strongly connected
//! components, the node with the lowest title is emitted and the break recorded.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::collections::HashMap;

use super::concept::Difficulty;

/// A node to order
#[derive(Debug, Clone)]
pub struct OrderNode {
    pub id: String,
    pub title: String,
    /// Traversal depth (0 = seed)
    pub depth: usize,
    pub difficulty: Option<Difficulty>,
}

/// A cycle that had to be broken to finish the ordering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleBreak {
    /// IDs of the strongly connected component, sorted by title then id
    pub members: Vec<String>,
    /// ID of the node emitted ahead of its unmet prerequisites
    pub emitted: String,
}

/// Result of ordering
#[derive(Debug, Clone, Default)]
pub struct PrerequisiteOrder {
    /// Node IDs, prerequisites first
    pub order: Vec<String>,
    pub cycle_breaks: Vec<CycleBreak>,
}

const UNVISITED: usize = usize::MAX;

/// Order `nodes` so every prerequisite precedes its dependents, except inside cycles
///
/// `edges` are `(prerequisite, dependent)` pairs; edges with an endpoint outside
/// `nodes`, self-loops and duplicates are ignored.
pub fn prerequisite_order(nodes: &[OrderNode], edges: &[(String, String)]) -> PrerequisiteOrder {
    let mut position: HashMap<&str, usize> = HashMap::new();
    let mut unique: Vec<&OrderNode> = Vec::with_capacity(nodes.len());
    for node in nodes {
        if !position.contains_key(node.id.as_str()) {
            position.insert(&node.id, unique.len());
            unique.push(node);
        }
    }

    let n = unique.len();
    let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
    for (from, to) in edges {
        if let (Some(&u), Some(&v)) = (position.get(from.as_str()), position.get(to.as_str())) {
            if u != v {
                successors[u].insert(v);
            }
        }
    }

    let mut in_degree = vec![0usize; n];
    for succ in &successors {
        for &v in succ {
            in_degree[v] += 1;
        }
    }

    let key = |i: usize| {
        let node = unique[i];
        (
            node.depth,
            Difficulty::rank(node.difficulty),
            node.title.as_str(),
            node.id.as_str(),
            i,
        )
    };

    let mut ready: BTreeSet<_> = (0..n).filter(|&i| in_degree[i] == 0).map(key).collect();
    let mut remaining = vec![true; n];
    let mut result = PrerequisiteOrder::default();

    while result.order.len() < n {
        let next = match ready.pop_first() {
            Some((.., i)) => i,
            None => {
                let (emitted, members) = break_cycle(&unique, &successors, &remaining);
                result.cycle_breaks.push(CycleBreak {
                    members: members.iter().map(|&i| unique[i].id.clone()).collect(),
                    emitted: unique[emitted].id.clone(),
                });
                emitted
            }
        };

        remaining[next] = false;
        result.order.push(unique[next].id.clone());
        for &v in &successors[next] {
            if remaining[v] {
                in_degree[v] = in_degree[v].saturating_sub(1);
                if in_degree[v] == 0 {
                    ready.insert(key(v));
                }
            }
        }
    }

    result
}

/// Pick the node to force out of a blocked subgraph; returns it with its component
fn break_cycle(
    nodes: &[&OrderNode],
    successors: &[BTreeSet<usize>],
    remaining: &[bool],
) -> (usize, Vec<usize>) {
    let components = strongly_connected_components(successors, remaining);

    let mut component_of = vec![UNVISITED; nodes.len()];
    for (c, members) in components.iter().enumerate() {
        for &i in members {
            component_of[i] = c;
        }
    }

    let mut has_incoming = vec![false; components.len()];
    for (u, succ) in successors.iter().enumerate() {
        if !remaining[u] {
            continue;
        }
        for &v in succ {
            if remaining[v] && component_of[u] != component_of[v] {
                has_incoming[component_of[v]] = true;
            }
        }
    }

    let by_title = |&i: &usize| (nodes[i].title.as_str(), nodes[i].id.as_str());

    // Every remaining node has an unmet prerequisite, so at least one source
    // component exists and it is a real cycle.
    let (component, emitted) = components
        .iter()
        .enumerate()
        .filter(|(c, _)| !has_incoming[*c])
        .flat_map(|(c, members)| members.iter().map(move |&i| (c, i)))
        .min_by_key(|(_, i)| by_title(i))
        .unwrap_or((0, components[0][0]));

    let mut members = components[component].clone();
    members.sort_by_key(by_title);
    (emitted, members)
}

/// Tarjan's algorithm restricted to `remaining` nodes, without recursion
fn strongly_connected_components(
    successors: &[BTreeSet<usize>],
    remaining: &[bool],
) -> Vec<Vec<usize>> {
    let n = successors.len();
    let mut index = vec![UNVISITED; n];
    let mut lowlink = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut next_index = 0usize;
    let mut components = Vec::new();

    let live_successors = |v: usize| -> Vec<usize> {
        successors[v].iter().copied().filter(|&w| remaining[w]).collect()
    };

    for root in 0..n {
        if !remaining[root] || index[root] != UNVISITED {
            continue;
        }

        index[root] = next_index;
        lowlink[root] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack[root] = true;
        let mut work: Vec<(usize, Vec<usize>, usize)> = vec![(root, live_successors(root), 0)];

        while let Some(top) = work.last_mut() {
            let v = top.0;
            if top.2 < top.1.len() {
                let w = top.1[top.2];
                top.2 += 1;
                if index[w] == UNVISITED {
                    index[w] = next_index;
                    lowlink[w] = next_index;
                    next_index += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    work.push((w, live_successors(w), 0));
                } else if on_stack[w] {
                    lowlink[v] = lowlink[v].min(index[w]);
                }
                continue;
            }

            work.pop();
            if let Some(parent) = work.last() {
                lowlink[parent.0] = lowlink[parent.0].min(lowlink[v]);
            }
            if lowlink[v] == index[v] {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                components.push(component);
            }
        }
    }

    components
}
