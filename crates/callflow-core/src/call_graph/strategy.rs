//! Call graph construction strategies
//!
//! Each strategy answers two questions: which methods are roots, and which
//! callees a method's invokes contribute. They differ in how they treat
//! dynamic dispatch:
//!
//! - [`SingleCallee`] keeps only statically resolvable calls (under-approximates).
//! - [`CompleteCallGraph`] fans every call out to all overriders (over-approximates).
//! - [`MultipleCallee`] fans out like the complete graph, but methods with more
//!   overriders than a threshold become roots instead of fan-out targets.

use dashmap::DashSet;
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, trace};

use crate::override_graph::MethodOverrideGraph;
use crate::program::{InsnId, Instruction, InvokeKind, MethodId, Program};

/// An invoke in a caller's body together with one callee it may reach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSite {
    pub callee: MethodId,
    pub invoke: InsnId,
}

/// The two questions every construction strategy answers
pub trait BuildStrategy {
    fn roots(&self) -> Vec<MethodId>;

    fn callsites(&self, method: MethodId) -> Vec<CallSite>;
}

/// Configuration tag selecting a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    #[default]
    SingleCallee,
    Complete,
    MultipleCallee,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::SingleCallee => "single-callee",
            StrategyKind::Complete => "complete",
            StrategyKind::MultipleCallee => "multiple-callee",
        };
        f.write_str(name)
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single-callee" | "single" => Ok(StrategyKind::SingleCallee),
            "complete" => Ok(StrategyKind::Complete),
            "multiple-callee" | "multiple" => Ok(StrategyKind::MultipleCallee),
            other => Err(format!(
                "unknown call graph strategy '{}' (expected single-callee, complete or multiple-callee)",
                other
            )),
        }
    }
}

/// Iterate the invokes of a method body, resolved against the program.
/// Resolution misses are skipped.
pub(crate) fn resolved_invokes<'p>(
    program: &'p Program,
    method: MethodId,
) -> impl Iterator<Item = (InsnId, InvokeKind, MethodId)> + 'p {
    program
        .method(method)
        .body()
        .into_iter()
        .flat_map(|body| body.iter())
        .filter_map(move |(id, insn)| {
            let Instruction::Invoke {
                kind, method: mref, ..
            } = insn
            else {
                return None;
            };
            match program.resolve_method(mref, *kind, method) {
                Some(callee) => Some((id, *kind, callee)),
                None => {
                    trace!(
                        "[cg] unresolved {} at {} in {}",
                        mref,
                        id,
                        program.method_name(method)
                    );
                    None
                }
            }
        })
}

/// Keeps only calls whose target is statically known.
///
/// Roots are every method with code that is pinned, a static initializer or
/// definitely virtual; the latter are reached through dispatch the graph
/// does not model.
pub struct SingleCallee<'a> {
    program: &'a Program,
    non_virtual: FxHashSet<MethodId>,
}

impl<'a> SingleCallee<'a> {
    pub fn new(program: &'a Program, mog: &MethodOverrideGraph) -> Self {
        Self {
            program,
            non_virtual: mog.non_true_virtuals(program),
        }
    }

    /// Virtual, and not proven to have a single implementation
    pub fn is_definitely_virtual(&self, method: MethodId) -> bool {
        self.program.method(method).is_virtual() && !self.non_virtual.contains(&method)
    }
}

impl BuildStrategy for SingleCallee<'_> {
    fn roots(&self) -> Vec<MethodId> {
        self.program
            .methods()
            .filter(|(id, m)| {
                m.has_body() && (self.is_definitely_virtual(*id) || m.is_root() || m.is_clinit())
            })
            .map(|(id, _)| id)
            .collect()
    }

    fn callsites(&self, method: MethodId) -> Vec<CallSite> {
        resolved_invokes(self.program, method)
            .filter(|&(_, _, callee)| {
                !self.is_definitely_virtual(callee) && self.program.method(callee).is_concrete()
            })
            .map(|(invoke, _, callee)| CallSite { callee, invoke })
            .collect()
    }
}

/// Root gathering shared by the complete and multiple-callee strategies.
///
/// Besides static initializers and pinned methods, every method related by
/// overriding to a pinned method (or to a non-renamable interface method,
/// which a dynamic proxy may call) is a root, and so is every non-external
/// override of an external method.
pub struct MultipleCalleeBase<'a> {
    single: SingleCallee<'a>,
    mog: &'a MethodOverrideGraph,
}

impl<'a> MultipleCalleeBase<'a> {
    pub fn new(program: &'a Program, mog: &'a MethodOverrideGraph) -> Self {
        Self {
            single: SingleCallee::new(program, mog),
            mog,
        }
    }

    fn program(&self) -> &'a Program {
        self.single.program
    }

    /// Base roots plus `additional`, which is filtered against the roots
    /// already gathered
    fn roots_with(
        &self,
        additional: impl Fn(&FxHashSet<MethodId>) -> Vec<MethodId>,
    ) -> Vec<MethodId> {
        let program = self.program();
        let mut roots = Vec::new();
        let mut emplaced = FxHashSet::default();

        let add_override =
            |method: MethodId, roots: &mut Vec<MethodId>, emplaced: &mut FxHashSet<MethodId>| {
                let m = program.method(method);
                // Pinned methods are added by the walk itself
                if !m.has_body() || m.is_root() || m.is_external() {
                    return;
                }
                if emplaced.insert(method) {
                    roots.push(method);
                }
            };

        for (id, method) in program.methods() {
            if method.is_clinit() {
                if emplaced.insert(id) {
                    roots.push(id);
                }
                continue;
            }
            let proxied = method.is_virtual()
                && program.class(method.class).is_interface
                && !method.renamable;
            if !method.is_root() && !proxied {
                continue;
            }
            if emplaced.insert(id) {
                roots.push(id);
            }
            for &overriding in self.mog.overriding_methods(id) {
                add_override(overriding, &mut roots, &mut emplaced);
            }
            for &overridden in self.mog.overridden_methods(id) {
                add_override(overridden, &mut roots, &mut emplaced);
            }
        }

        for &method in self.mog.nodes() {
            if !program.method(method).is_external() {
                continue;
            }
            for &overriding in self.mog.overriding_methods(method) {
                if !program.method(overriding).is_external() && emplaced.insert(overriding) {
                    roots.push(overriding);
                }
            }
        }

        let extra = additional(&emplaced);
        roots.extend(extra);
        roots
    }
}

impl BuildStrategy for MultipleCalleeBase<'_> {
    fn roots(&self) -> Vec<MethodId> {
        self.roots_with(|_| Vec::new())
    }

    fn callsites(&self, method: MethodId) -> Vec<CallSite> {
        self.single.callsites(method)
    }
}

/// Sound over-approximation: every call reaches its resolved target and
/// all of the target's overriders.
///
/// Roots are only the pinned methods and static initializers; everything
/// else must be reached through the fan-out.
pub struct CompleteCallGraph<'a> {
    base: MultipleCalleeBase<'a>,
}

impl<'a> CompleteCallGraph<'a> {
    pub fn new(program: &'a Program, mog: &'a MethodOverrideGraph) -> Self {
        Self {
            base: MultipleCalleeBase::new(program, mog),
        }
    }
}

impl BuildStrategy for CompleteCallGraph<'_> {
    fn roots(&self) -> Vec<MethodId> {
        self.base
            .program()
            .methods()
            .filter(|(_, m)| m.is_root() || m.is_clinit())
            .map(|(id, _)| id)
            .collect()
    }

    fn callsites(&self, method: MethodId) -> Vec<CallSite> {
        let program = self.base.program();
        let mut callsites = Vec::new();
        for (invoke, _, callee) in resolved_invokes(program, method) {
            if program.method(callee).is_concrete() {
                callsites.push(CallSite { callee, invoke });
            }
            callsites.extend(
                self.base
                    .mog
                    .overriding_methods(callee)
                    .iter()
                    .map(|&callee| CallSite { callee, invoke }),
            );
        }
        callsites
    }
}

/// Bounded fan-out: virtual calls expand to their overriders unless the
/// callee is a big override, in which case the callee and its overriders
/// are roots of their own.
pub struct MultipleCallee<'a> {
    base: MultipleCalleeBase<'a>,
    threshold: u32,
    big_overrides: FxHashSet<MethodId>,
}

impl<'a> MultipleCallee<'a> {
    pub fn new(program: &'a Program, mog: &'a MethodOverrideGraph, threshold: u32) -> Self {
        let big_overrides = find_big_overrides(program, mog, threshold);
        debug!(
            "[cg] {} big override methods (threshold {})",
            big_overrides.len(),
            threshold
        );
        Self {
            base: MultipleCalleeBase::new(program, mog),
            threshold,
            big_overrides,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn is_big_override(&self, method: MethodId) -> bool {
        self.big_overrides.contains(&method)
    }
}

impl BuildStrategy for MultipleCallee<'_> {
    fn roots(&self) -> Vec<MethodId> {
        let program = self.base.program();
        self.base.roots_with(|existing| {
            // Program order keeps the root list stable across runs
            program
                .methods()
                .map(|(id, _)| id)
                .filter(|id| {
                    self.big_overrides.contains(id)
                        && !program.method(*id).is_external()
                        && !existing.contains(id)
                })
                .collect()
        })
    }

    fn callsites(&self, method: MethodId) -> Vec<CallSite> {
        let program = self.base.program();
        let mut callsites = Vec::new();
        for (invoke, kind, callee) in resolved_invokes(program, method) {
            if self.base.single.is_definitely_virtual(callee) {
                if self.is_big_override(callee) {
                    continue;
                }
                if program.method(callee).has_body() {
                    callsites.push(CallSite { callee, invoke });
                }
                if kind != InvokeKind::Super {
                    callsites.extend(
                        self.base
                            .mog
                            .overriding_methods(callee)
                            .iter()
                            .map(|&callee| CallSite { callee, invoke }),
                    );
                }
            } else if program.method(callee).is_concrete() {
                callsites.push(CallSite { callee, invoke });
            }
        }
        callsites
    }
}

/// Every virtual callee whose overriders with code outnumber the threshold,
/// together with all of those overriders. Scans bodies in parallel.
fn find_big_overrides(
    program: &Program,
    mog: &MethodOverrideGraph,
    threshold: u32,
) -> FxHashSet<MethodId> {
    let found: DashSet<MethodId> = DashSet::new();
    let callers: Vec<MethodId> = program
        .methods()
        .filter(|(_, m)| m.has_body())
        .map(|(id, _)| id)
        .collect();

    callers.par_iter().for_each(|&caller| {
        for (_, _, callee) in resolved_invokes(program, caller) {
            if !program.method(callee).is_virtual() {
                continue;
            }
            let overriding = mog.overriding_methods(callee);
            let with_code = overriding
                .iter()
                .filter(|&&m| program.method(m).has_body())
                .count();
            if with_code > threshold as usize {
                found.insert(callee);
                for &m in overriding {
                    found.insert(m);
                }
            }
        }
    });

    found.into_iter().collect()
}

/// The closed set of construction strategies
pub enum CallGraphStrategy<'a> {
    SingleCallee(SingleCallee<'a>),
    Complete(CompleteCallGraph<'a>),
    MultipleCallee(MultipleCallee<'a>),
}

impl<'a> CallGraphStrategy<'a> {
    pub fn new(
        program: &'a Program,
        mog: &'a MethodOverrideGraph,
        kind: StrategyKind,
        big_override_threshold: u32,
    ) -> Self {
        match kind {
            StrategyKind::SingleCallee => {
                CallGraphStrategy::SingleCallee(SingleCallee::new(program, mog))
            }
            StrategyKind::Complete => {
                CallGraphStrategy::Complete(CompleteCallGraph::new(program, mog))
            }
            StrategyKind::MultipleCallee => CallGraphStrategy::MultipleCallee(
                MultipleCallee::new(program, mog, big_override_threshold),
            ),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            CallGraphStrategy::SingleCallee(_) => StrategyKind::SingleCallee,
            CallGraphStrategy::Complete(_) => StrategyKind::Complete,
            CallGraphStrategy::MultipleCallee(_) => StrategyKind::MultipleCallee,
        }
    }
}

impl BuildStrategy for CallGraphStrategy<'_> {
    fn roots(&self) -> Vec<MethodId> {
        match self {
            CallGraphStrategy::SingleCallee(s) => s.roots(),
            CallGraphStrategy::Complete(s) => s.roots(),
            CallGraphStrategy::MultipleCallee(s) => s.roots(),
        }
    }

    fn callsites(&self, method: MethodId) -> Vec<CallSite> {
        match self {
            CallGraphStrategy::SingleCallee(s) => s.callsites(method),
            CallGraphStrategy::Complete(s) => s.callsites(method),
            CallGraphStrategy::MultipleCallee(s) => s.callsites(method),
        }
    }
}
