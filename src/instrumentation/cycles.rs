// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Cycle detection over named dependency graphs.
//!
//! Used for scope exclusions and rule inclusions. The walk is a depth-first
//! search that keeps the current path; nodes that have been fully explored
//! are memoized, so every edge is followed at most once.

use std::collections::{BTreeMap, HashSet};

/// Find cycles in a graph given as adjacency lists.
///
/// Each returned cycle is the path from the first re-encountered node back
/// to itself, e.g. `["a", "b", "c", "a"]`; a self-loop is `["a", "a"]`.
/// Edges pointing to nodes absent from the map are ignored.
pub fn find_cycles(graph: &BTreeMap<String, Vec<String>>) -> Vec<Vec<String>> {
    let mut explored: HashSet<&str> = HashSet::new();
    let mut cycles = Vec::new();

    for start in graph.keys() {
        if explored.contains(start.as_str()) {
            continue;
        }
        let mut path: Vec<&str> = Vec::new();
        visit(graph, start, &mut path, &mut explored, &mut cycles);
    }
    cycles
}

fn visit<'a>(
    graph: &'a BTreeMap<String, Vec<String>>,
    node: &'a str,
    path: &mut Vec<&'a str>,
    explored: &mut HashSet<&'a str>,
    cycles: &mut Vec<Vec<String>>,
) {
    path.push(node);
    if let Some(edges) = graph.get(node) {
        for next in edges {
            let next = next.as_str();
            if !graph.contains_key(next) {
                continue;
            }
            if let Some(pos) = path.iter().position(|p| *p == next) {
                let mut cycle: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
                cycle.push(next.to_string());
                cycles.push(cycle);
            } else if !explored.contains(next) {
                visit(graph, next, path, explored, cycles);
            }
        }
    }
    path.pop();
    explored.insert(node);
}

/// Render a cycle as `a -> b -> a`.
pub fn format_cycle(cycle: &[String]) -> String {
    cycle.join(" -> ")
}
