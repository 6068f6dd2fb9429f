//! Method override graph
//!
//! Records, for every virtual method, the methods that override it in
//! sub-classes and implementors (transitively), and the inverse relation.
//! Overrides are matched by name and arity.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::errors::{AnalysisError, Result};
use crate::program::{ClassId, MethodId, Program};

#[derive(Debug, Default)]
pub struct MethodOverrideGraph {
    nodes: Vec<MethodId>,
    overriding: FxHashMap<MethodId, Vec<MethodId>>,
    overridden: FxHashMap<MethodId, Vec<MethodId>>,
}

impl MethodOverrideGraph {
    /// Build the graph for every virtual method of the program.
    ///
    /// Fails if the class hierarchy contains a cycle.
    pub fn build(program: &Program) -> Result<Self> {
        check_acyclic(program)?;

        let mut children: FxHashMap<ClassId, Vec<ClassId>> = FxHashMap::default();
        for (id, class) in program.classes() {
            if let Some(parent) = class.super_class {
                children.entry(parent).or_default().push(id);
            }
            for &intf in &class.interfaces {
                children.entry(intf).or_default().push(id);
            }
        }

        let mut graph = MethodOverrideGraph::default();
        for (method_id, method) in program.methods() {
            if !method.is_virtual() {
                continue;
            }
            graph.nodes.push(method_id);
            let declaring = program.class(method.class);

            let mut seen_classes = FxHashSet::default();
            let mut seen_methods = FxHashSet::default();
            let mut pending: Vec<ClassId> =
                children.get(&method.class).cloned().unwrap_or_default();
            pending.reverse();
            while let Some(class) = pending.pop() {
                if !seen_classes.insert(class) {
                    continue;
                }
                let found = if declaring.is_interface {
                    // Implementors may inherit the implementation from a
                    // super class that does not itself implement the interface
                    program
                        .super_chain(class)
                        .find_map(|c| declared_override(program, c, method_id))
                } else {
                    declared_override(program, class, method_id)
                };
                if let Some(overrider) = found {
                    if seen_methods.insert(overrider) {
                        graph
                            .overriding
                            .entry(method_id)
                            .or_default()
                            .push(overrider);
                        graph
                            .overridden
                            .entry(overrider)
                            .or_default()
                            .push(method_id);
                    }
                }
                if let Some(grandchildren) = children.get(&class) {
                    pending.extend(grandchildren.iter().rev().copied());
                }
            }
        }

        debug!(
            "[mog] {} virtual methods, {} with overrides",
            graph.nodes.len(),
            graph.overriding.len()
        );
        Ok(graph)
    }

    /// Virtual methods known to the graph, in program order
    pub fn nodes(&self) -> &[MethodId] {
        &self.nodes
    }

    /// All methods that override `method`, transitively
    pub fn overriding_methods(&self, method: MethodId) -> &[MethodId] {
        self.overriding
            .get(&method)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All methods that `method` overrides, transitively
    pub fn overridden_methods(&self, method: MethodId) -> &[MethodId] {
        self.overridden
            .get(&method)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Virtual methods with no override anywhere in the program; calls to
    /// them resolve statically
    pub fn non_true_virtuals(&self, program: &Program) -> FxHashSet<MethodId> {
        self.nodes
            .iter()
            .copied()
            .filter(|&m| !program.method(m).is_external() && self.overriding_methods(m).is_empty())
            .collect()
    }
}

fn declared_override(program: &Program, class: ClassId, base: MethodId) -> Option<MethodId> {
    let base = program.method(base);
    program.class(class).methods.iter().copied().find(|&m| {
        let candidate = program.method(m);
        candidate.is_virtual() && candidate.name == base.name && candidate.arity == base.arity
    })
}

fn check_acyclic(program: &Program) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        Active,
        Done,
    }

    let ids: Vec<ClassId> = program.classes().map(|(id, _)| id).collect();
    let mut marks: FxHashMap<ClassId, Mark> =
        ids.iter().map(|&id| (id, Mark::Unvisited)).collect();

    let parents = |class: ClassId| -> Vec<ClassId> {
        let class = program.class(class);
        class
            .super_class
            .iter()
            .chain(class.interfaces.iter())
            .copied()
            .collect()
    };

    for &start in &ids {
        if marks[&start] != Mark::Unvisited {
            continue;
        }
        // (class, parents still to visit)
        let mut stack: Vec<(ClassId, Vec<ClassId>)> = vec![(start, parents(start))];
        marks.insert(start, Mark::Active);
        while let Some((class, remaining)) = stack.last_mut() {
            match remaining.pop() {
                Some(parent) => match marks[&parent] {
                    Mark::Active => {
                        return Err(AnalysisError::OverrideGraph {
                            class: program.class(parent).name.clone(),
                        })
                    }
                    Mark::Unvisited => {
                        marks.insert(parent, Mark::Active);
                        let next = parents(parent);
                        stack.push((parent, next));
                    }
                    Mark::Done => {}
                },
                None => {
                    marks.insert(*class, Mark::Done);
                    stack.pop();
                }
            }
        }
    }
    Ok(())
}
