//! Dependency graph validation and start/stop ordering.
//!
//! Units form a directed graph over their `dependencies` sets. The
//! resolver confirms referential integrity, detects cycles before a
//! unit is persisted, and computes deterministic start/stop sequences
//! over a unit set's transitive closure.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::{Result, WardenError};
use crate::unit::UnitRecord;

pub struct DependencyResolver;

impl DependencyResolver {
    /// Validates a candidate unit against the full known set: every
    /// declared dependency must exist, and adding (or updating) the
    /// candidate must not introduce a cycle. `all_units` may already
    /// contain an older version of the candidate; the candidate's
    /// edges take precedence.
    pub fn validate(candidate: &UnitRecord, all_units: &[UnitRecord]) -> Result<()> {
        let known: HashSet<&str> = all_units
            .iter()
            .map(|u| u.id.as_str())
            .chain(std::iter::once(candidate.id.as_str()))
            .collect();

        for dep in &candidate.dependencies {
            if dep == &candidate.id {
                return Err(WardenError::CyclicDependency {
                    path: vec![candidate.id.clone(), candidate.id.clone()],
                });
            }
            if !known.contains(dep.as_str()) {
                return Err(WardenError::MissingDependency {
                    unit_id: candidate.id.clone(),
                    dependency_id: dep.clone(),
                });
            }
        }

        let edges = edge_map(candidate, all_units);
        detect_cycle(&candidate.id, &edges)?;

        debug!(unit_id = %candidate.id, deps = candidate.dependencies.len(), "Dependencies validated");
        Ok(())
    }

    /// Topological start order over the transitive dependency closure
    /// of `roots`: every unit appears after all of its dependencies,
    /// and a shared (diamond) dependency appears exactly once. Ties
    /// break by insertion order of `all_units` for determinism.
    pub fn start_order(roots: &[String], all_units: &[UnitRecord]) -> Result<Vec<String>> {
        let by_id: HashMap<&str, &UnitRecord> =
            all_units.iter().map(|u| (u.id.as_str(), u)).collect();

        // Collect the closure, verifying referential integrity on the way.
        let mut closure: HashSet<String> = HashSet::new();
        let mut pending: Vec<(String, String)> = roots
            .iter()
            .map(|r| (r.clone(), r.clone()))
            .collect();
        while let Some((owner, id)) = pending.pop() {
            let unit = by_id.get(id.as_str()).ok_or_else(|| {
                if roots.contains(&id) {
                    WardenError::UnitNotFound(id.clone())
                } else {
                    WardenError::MissingDependency {
                        unit_id: owner.clone(),
                        dependency_id: id.clone(),
                    }
                }
            })?;
            if closure.insert(id.clone()) {
                for dep in &unit.dependencies {
                    pending.push((id.clone(), dep.clone()));
                }
            }
        }

        // Kahn's algorithm, scanning members in insertion order at
        // every step so sequencing is stable and testable.
        let members: Vec<&UnitRecord> = all_units
            .iter()
            .filter(|u| closure.contains(&u.id))
            .collect();

        let mut remaining_deps: HashMap<&str, HashSet<&str>> = members
            .iter()
            .map(|u| {
                let deps: HashSet<&str> = u
                    .dependencies
                    .iter()
                    .map(String::as_str)
                    .filter(|d| closure.contains(*d))
                    .collect();
                (u.id.as_str(), deps)
            })
            .collect();

        let mut order: Vec<String> = Vec::with_capacity(members.len());
        let mut placed: HashSet<&str> = HashSet::new();

        while order.len() < members.len() {
            let next = members.iter().find(|u| {
                !placed.contains(u.id.as_str())
                    && remaining_deps[u.id.as_str()]
                        .iter()
                        .all(|d| placed.contains(d))
            });

            match next {
                Some(unit) => {
                    placed.insert(unit.id.as_str());
                    order.push(unit.id.clone());
                }
                None => {
                    // Every unplaced unit still waits on another: a cycle.
                    let stuck = members
                        .iter()
                        .find(|u| !placed.contains(u.id.as_str()))
                        .expect("unplaced unit must exist");
                    let edges = full_edge_map(all_units);
                    return Err(detect_cycle(&stuck.id, &edges)
                        .err()
                        .unwrap_or(WardenError::CyclicDependency {
                            path: vec![stuck.id.clone()],
                        }));
                }
            }
        }

        Ok(order)
    }

    /// Stop order: dependents stop before their dependencies, i.e. the
    /// reverse of the start sequence over the same closure.
    pub fn stop_order(roots: &[String], all_units: &[UnitRecord]) -> Result<Vec<String>> {
        let mut order = Self::start_order(roots, all_units)?;
        order.reverse();
        Ok(order)
    }
}

/// Adjacency map of the full set with the candidate's edges overriding
/// any stored version of it.
fn edge_map<'a>(
    candidate: &'a UnitRecord,
    all_units: &'a [UnitRecord],
) -> HashMap<&'a str, Vec<&'a str>> {
    let mut edges: HashMap<&str, Vec<&str>> = all_units
        .iter()
        .filter(|u| u.id != candidate.id)
        .map(|u| {
            (
                u.id.as_str(),
                u.dependencies.iter().map(String::as_str).collect(),
            )
        })
        .collect();
    edges.insert(
        candidate.id.as_str(),
        candidate.dependencies.iter().map(String::as_str).collect(),
    );
    edges
}

fn full_edge_map(all_units: &[UnitRecord]) -> HashMap<&str, Vec<&str>> {
    all_units
        .iter()
        .map(|u| {
            (
                u.id.as_str(),
                u.dependencies.iter().map(String::as_str).collect(),
            )
        })
        .collect()
}

/// Depth-first search from `start` with a recursion-stack marker. Any
/// back-edge to a node on the current stack is a cycle; the reported
/// path is the ordered cycle closed on the repeated node.
fn detect_cycle(start: &str, edges: &HashMap<&str, Vec<&str>>) -> Result<()> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = Vec::new();
    let mut on_stack: HashSet<&str> = HashSet::new();

    fn visit<'a>(
        node: &'a str,
        edges: &HashMap<&'a str, Vec<&'a str>>,
        visited: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
        on_stack: &mut HashSet<&'a str>,
    ) -> Result<()> {
        visited.insert(node);
        stack.push(node);
        on_stack.insert(node);

        for next in edges.get(node).into_iter().flatten() {
            if on_stack.contains(next) {
                let pos = stack.iter().position(|n| n == next).unwrap_or(0);
                let mut path: Vec<String> = stack[pos..].iter().map(|s| s.to_string()).collect();
                path.push(next.to_string());
                return Err(WardenError::CyclicDependency { path });
            }
            if !visited.contains(next) {
                visit(next, edges, visited, stack, on_stack)?;
            }
        }

        stack.pop();
        on_stack.remove(node);
        Ok(())
    }

    visit(start, edges, &mut visited, &mut stack, &mut on_stack)
}
