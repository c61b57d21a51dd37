//! Dependency resolution.
//!
//! Computes a topological load order over the registered plugins and the
//! reverse-dependency closure used for cascading unload/reload.
//!
//! # Ordering
//!
//! Depth-first traversal in registry insertion order; every plugin appears
//! after all of its transitive dependencies, and ties between mutually
//! independent plugins follow insertion order, so the result is
//! deterministic for a fixed scan order.
//!
//! # Partial failure
//!
//! A cycle or missing dependency excludes the offending plugin and every
//! plugin transitively requiring it; everything else stays loadable. Each
//! excluded plugin gets exactly one [`ResolveError`].

use mikro_types::{ErrorCode, Requirement, Version};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Resolver view of one registered plugin.
#[derive(Debug, Clone)]
pub struct ResolveNode {
    /// Plugin name.
    pub name: String,
    /// Declared version.
    pub version: Version,
    /// Raw requirement strings.
    pub dependencies: Vec<String>,
}

/// Why a plugin was excluded from the load order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// The plugin sits on a dependency cycle.
    #[error("dependency cycle through plugin {plugin:?}")]
    Cycle {
        /// Cycle member.
        plugin: String,
    },

    /// A requirement cannot be met.
    #[error("plugin {plugin:?} requires {requirement:?}: {reason}")]
    Missing {
        /// Plugin declaring the requirement.
        plugin: String,
        /// The requirement as written.
        requirement: String,
        /// Why it is unmet.
        reason: String,
    },
}

impl ResolveError {
    /// The excluded plugin.
    #[must_use]
    pub fn plugin(&self) -> &str {
        match self {
            Self::Cycle { plugin } | Self::Missing { plugin, .. } => plugin,
        }
    }
}

impl ErrorCode for ResolveError {
    fn code(&self) -> &'static str {
        match self {
            Self::Cycle { .. } => "KERNEL_DEP_CYCLE",
            Self::Missing { .. } => "KERNEL_DEP_MISSING",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

/// Outcome of a resolution pass.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Loadable plugins in dependency-respecting order.
    pub order: Vec<String>,
    /// One error per excluded plugin, in discovery order.
    pub errors: Vec<ResolveError>,
}

impl Resolution {
    /// Returns `true` when `name` made it into the order.
    #[must_use]
    pub fn includes(&self, name: &str) -> bool {
        self.order.iter().any(|n| n == name)
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Colour {
    Grey,
    Black,
}

struct Walker<'a> {
    index: HashMap<&'a str, &'a ResolveNode>,
    colour: HashMap<String, Colour>,
    excluded: HashSet<String>,
    errored: HashSet<String>,
    errors: Vec<ResolveError>,
    order: Vec<String>,
    stack: Vec<String>,
}

impl<'a> Walker<'a> {
    fn record(&mut self, error: ResolveError) {
        if self.errored.insert(error.plugin().to_string()) {
            self.errors.push(error);
        }
    }

    /// Visits `name`; returns `true` when it ends up in the order.
    fn visit(&mut self, name: &str) -> bool {
        match self.colour.get(name) {
            Some(Colour::Black) => return !self.excluded.contains(name),
            Some(Colour::Grey) => {
                // Every plugin on the stack from the grey node onward is a
                // cycle member.
                let start = self.stack.iter().position(|n| n == name).unwrap_or(0);
                let members: Vec<String> = self.stack[start..].to_vec();
                for member in members {
                    self.record(ResolveError::Cycle {
                        plugin: member.clone(),
                    });
                    self.excluded.insert(member);
                }
                return false;
            }
            None => {}
        }

        self.colour.insert(name.to_string(), Colour::Grey);
        self.stack.push(name.to_string());

        let dependencies = self.index[name].dependencies.clone();
        let mut ok = true;
        for raw in &dependencies {
            match raw.parse::<Requirement>() {
                Err(e) => {
                    self.record(ResolveError::Missing {
                        plugin: name.to_string(),
                        requirement: raw.clone(),
                        reason: e.reason,
                    });
                    ok = false;
                }
                Ok(req) => match self.index.get(req.name.as_str()) {
                    None => {
                        self.record(ResolveError::Missing {
                            plugin: name.to_string(),
                            requirement: raw.clone(),
                            reason: "not in the registry".to_string(),
                        });
                        ok = false;
                    }
                    Some(dep) if !req.satisfied_by(&dep.version) => {
                        self.record(ResolveError::Missing {
                            plugin: name.to_string(),
                            requirement: raw.clone(),
                            reason: format!("version {} does not satisfy it", dep.version),
                        });
                        ok = false;
                    }
                    Some(_) => {
                        let dep_name = req.name.clone();
                        if !self.visit(&dep_name) {
                            self.record(ResolveError::Missing {
                                plugin: name.to_string(),
                                requirement: raw.clone(),
                                reason: "dependency excluded".to_string(),
                            });
                            ok = false;
                        }
                    }
                },
            }
        }

        self.stack.pop();
        self.colour.insert(name.to_string(), Colour::Black);

        if ok && !self.excluded.contains(name) {
            self.order.push(name.to_string());
            true
        } else {
            self.excluded.insert(name.to_string());
            false
        }
    }
}

/// Resolves the load order for `nodes` (in registry insertion order).
#[must_use]
pub fn resolve(nodes: &[ResolveNode]) -> Resolution {
    let index: HashMap<&str, &ResolveNode> =
        nodes.iter().map(|n| (n.name.as_str(), n)).collect();
    let mut walker = Walker {
        index,
        colour: HashMap::new(),
        excluded: HashSet::new(),
        errored: HashSet::new(),
        errors: Vec::new(),
        order: Vec::new(),
        stack: Vec::new(),
    };
    for node in nodes {
        walker.visit(&node.name);
    }
    Resolution {
        order: walker.order,
        errors: walker.errors,
    }
}

/// Computes the reverse-dependency closure of `target`.
///
/// Returns every plugin in `order` that transitively requires `target`,
/// preserving topological order. Constraints are ignored here; only the
/// requirement names define edges.
#[must_use]
pub fn reverse_deps(nodes: &[ResolveNode], target: &str, order: &[String]) -> Vec<String> {
    let deps_of: HashMap<String, Vec<String>> = nodes
        .iter()
        .map(|n| {
            let names = n
                .dependencies
                .iter()
                .filter_map(|raw| raw.parse::<Requirement>().ok().map(|r| r.name))
                .collect();
            (n.name.clone(), names)
        })
        .collect();

    fn requires(
        name: &str,
        target: &str,
        deps_of: &HashMap<String, Vec<String>>,
        reachable: &mut HashMap<String, bool>,
        visiting: &mut HashSet<String>,
    ) -> bool {
        if let Some(&known) = reachable.get(name) {
            return known;
        }
        if !visiting.insert(name.to_string()) {
            return false;
        }
        let mut hit = false;
        if let Some(deps) = deps_of.get(name) {
            for dep in deps {
                if dep == target
                    || (deps_of.contains_key(dep.as_str())
                        && requires(dep, target, deps_of, reachable, visiting))
                {
                    hit = true;
                    break;
                }
            }
        }
        visiting.remove(name);
        reachable.insert(name.to_string(), hit);
        hit
    }

    let mut reachable: HashMap<String, bool> = HashMap::new();
    order
        .iter()
        .filter(|name| name.as_str() != target)
        .filter(|name| {
            requires(name, target, &deps_of, &mut reachable, &mut HashSet::new())
        })
        .cloned()
        .collect()
}
