use crate::stamp::Stamp;
use log::debug;
use std::collections::{BTreeMap, HashSet};

/// Finds circular references in a set of stamps.
///
/// Every distinct host gets its own depth-first search, so cycles in
/// disconnected parts of the graph are all found. Hosts are visited in
/// name order and edges in input order, which makes the output stable for
/// an unchanged input.
pub struct CircularDependencyChecker {
    edges: BTreeMap<String, Vec<String>>,
}

impl CircularDependencyChecker {
    pub fn new(stamps: &[Stamp]) -> Self {
        let mut edges: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for stamp in stamps {
            edges
                .entry(stamp.host.clone())
                .or_default()
                .push(stamp.dependency.clone());
        }
        CircularDependencyChecker { edges }
    }

    pub fn host_count(&self) -> usize {
        self.edges.len()
    }

    /// One cycle per host that lies on a cycle. Each path starts and ends
    /// with the same name. Hosts that only lead into a cycle are skipped.
    pub fn check(&self) -> Vec<Vec<String>> {
        let mut results = Vec::new();
        for host in self.edges.keys() {
            let mut path = Vec::new();
            let mut stack = HashSet::new();
            if self.visit(host, &mut path, &mut stack) && path.contains(host) {
                debug!("Circular dependency from '{}': {}", host, path.join(" -> "));
                results.push(path);
            }
        }
        results
    }

    /// Like `check`, but rotations of the same cycle are reported once.
    pub fn unique_cycles(&self) -> Vec<Vec<String>> {
        let mut seen = HashSet::new();
        let mut unique = Vec::new();
        for cycle in self.check() {
            if seen.insert(Self::canonical(&cycle)) {
                unique.push(cycle);
            }
        }
        unique
    }

    fn visit<'a>(
        &'a self,
        host: &'a str,
        path: &mut Vec<String>,
        stack: &mut HashSet<&'a str>,
    ) -> bool {
        stack.insert(host);
        path.push(host.to_string());

        if let Some(dependencies) = self.edges.get(host) {
            for dependency in dependencies {
                if stack.contains(dependency.as_str()) {
                    // Cut the lead-in so the path is the cycle itself.
                    if let Some(start) = path.iter().position(|name| name == dependency) {
                        path.drain(..start);
                    }
                    path.push(dependency.clone());
                    return true;
                }
                if self.visit(dependency, path, stack) {
                    return true;
                }
            }
        }

        path.pop();
        stack.remove(host);
        false
    }

    // Rotation starting at the smallest name, closing element dropped.
    fn canonical(cycle: &[String]) -> Vec<String> {
        let ring = &cycle[..cycle.len().saturating_sub(1)];
        let Some(start) = ring
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.cmp(b.1))
            .map(|(index, _)| index)
        else {
            return Vec::new();
        };
        ring[start..].iter().chain(ring[..start].iter()).cloned().collect()
    }
}
