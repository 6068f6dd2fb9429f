//! Whole-program field and return type approximations
//!
//! Rebuilt from the global analysis after every iteration and then frozen:
//! every local analysis of one iteration observes the same snapshot.
//! Fields and methods without an entry are unconstrained (top), and so is
//! every field no reachable method writes.

use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt::{self, Write as _};
use tracing::trace;

use super::domain::TypeDomain;
use super::global::GlobalTypeAnalyzer;
use crate::errors::Result;
use crate::program::{FieldId, Instruction, MethodId, Program};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WholeProgramState {
    fields: FxHashMap<FieldId, TypeDomain>,
    methods: FxHashMap<MethodId, TypeDomain>,
}

/// What one method contributes to the next state
#[derive(Default)]
struct Evidence {
    /// Every field the method stores into, tracked or not
    written: Vec<FieldId>,
    field_writes: Vec<(FieldId, TypeDomain)>,
    /// Tracked field values at an initializer's exit
    initialized: Vec<(FieldId, TypeDomain)>,
    return_type: Option<(MethodId, TypeDomain)>,
}

impl WholeProgramState {
    /// Aggregate field writes and return types over the reachable methods.
    ///
    /// Initializer-tracked fields contribute their value at the
    /// initializer's exit. A written field that no initializer exit covers
    /// also holds its default `null` until the first write runs. Return
    /// types are only recorded for methods whose calls resolve statically.
    pub fn build(
        program: &Program,
        gta: &GlobalTypeAnalyzer<'_>,
        non_true_virtuals: &FxHashSet<MethodId>,
    ) -> Result<Self> {
        let candidates: Vec<MethodId> = gta
            .graph()
            .methods()
            .filter(|&m| program.method(m).has_body() && gta.is_reachable(m))
            .collect();

        let evidence = candidates
            .par_iter()
            .map(|&method| collect_evidence(program, gta, non_true_virtuals, method))
            .collect::<Result<Vec<_>>>()?;

        let mut wps = WholeProgramState::default();
        let mut written: FxHashSet<FieldId> = FxHashSet::default();
        let mut initialized: FxHashSet<FieldId> = FxHashSet::default();
        for item in evidence {
            written.extend(item.written);
            for (field, value) in item.initialized {
                initialized.insert(field);
                wps.join_field(field, value);
            }
            for (field, value) in item.field_writes {
                wps.join_field(field, value);
            }
            if let Some((method, value)) = item.return_type {
                wps.methods.insert(method, value);
            }
        }
        for &field in written.difference(&initialized) {
            trace!(
                "[wps] {} may be read before its first write",
                program.field(field).qualified_name()
            );
            wps.join_field(field, TypeDomain::null());
        }
        wps.fields
            .retain(|field, value| written.contains(field) && !value.is_top());
        wps.methods.retain(|_, value| !value.is_top());
        Ok(wps)
    }

    fn join_field(&mut self, field: FieldId, value: TypeDomain) {
        self.fields
            .entry(field)
            .and_modify(|known| *known = known.join(&value))
            .or_insert(value);
    }

    pub fn get_field_type(&self, field: FieldId) -> TypeDomain {
        self.fields
            .get(&field)
            .copied()
            .unwrap_or_else(TypeDomain::top)
    }

    pub fn get_return_type(&self, method: MethodId) -> TypeDomain {
        self.methods
            .get(&method)
            .copied()
            .unwrap_or_else(TypeDomain::top)
    }

    pub fn num_resolved_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn num_resolved_methods(&self) -> usize {
        self.methods.len()
    }

    /// Pointwise order; `self` must be at least as precise as `other` on
    /// every field and method `other` constrains
    pub fn leq(&self, other: &Self) -> bool {
        partition_leq(&self.fields, &other.fields) && partition_leq(&self.methods, &other.methods)
    }

    /// Fields with their values, in program order
    pub fn fields<'p>(&self, program: &'p Program) -> Vec<(&'p str, TypeDomain)> {
        program
            .fields()
            .filter_map(|(id, field)| {
                self.fields
                    .get(&id)
                    .map(|value| (field.qualified_name(), *value))
            })
            .collect()
    }

    /// Methods with their return values, in program order
    pub fn methods<'p>(&self, program: &'p Program) -> Vec<(&'p str, TypeDomain)> {
        program
            .methods()
            .filter_map(|(id, method)| {
                self.methods
                    .get(&id)
                    .map(|value| (method.qualified_name(), *value))
            })
            .collect()
    }

    pub fn field_partition_diff(&self, other: &Self, program: &Program) -> String {
        let mut out = String::new();
        for (id, field) in program.fields() {
            let (old, new) = (self.get_field_type(id), other.get_field_type(id));
            if old != new {
                let _ = writeln!(
                    out,
                    "{}: {} -> {}",
                    field.qualified_name(),
                    old.display(program),
                    new.display(program)
                );
            }
        }
        out
    }

    pub fn method_partition_diff(&self, other: &Self, program: &Program) -> String {
        let mut out = String::new();
        for (id, method) in program.methods() {
            let (old, new) = (self.get_return_type(id), other.get_return_type(id));
            if old != new {
                let _ = writeln!(
                    out,
                    "{}: {} -> {}",
                    method.qualified_name(),
                    old.display(program),
                    new.display(program)
                );
            }
        }
        out
    }

    pub fn display<'a>(&'a self, program: &'a Program) -> impl fmt::Display + 'a {
        WholeProgramStateDisplay { wps: self, program }
    }
}

struct WholeProgramStateDisplay<'a> {
    wps: &'a WholeProgramState,
    program: &'a Program,
}

impl fmt::Display for WholeProgramStateDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "fields:")?;
        for (name, value) in self.wps.fields(self.program) {
            writeln!(f, "  {}: {}", name, value.display(self.program))?;
        }
        writeln!(f, "methods:")?;
        for (name, value) in self.wps.methods(self.program) {
            writeln!(f, "  {}: {}", name, value.display(self.program))?;
        }
        Ok(())
    }
}

fn partition_leq<K: Eq + std::hash::Hash>(
    mine: &FxHashMap<K, TypeDomain>,
    theirs: &FxHashMap<K, TypeDomain>,
) -> bool {
    theirs.iter().all(|(key, their_value)| {
        mine.get(key)
            .map_or_else(|| their_value.is_top(), |value| value.leq(their_value))
    })
}

fn collect_evidence(
    program: &Program,
    gta: &GlobalTypeAnalyzer<'_>,
    non_true_virtuals: &FxHashSet<MethodId>,
    method: MethodId,
) -> Result<Evidence> {
    let lta = gta.get_local_analysis(method)?;
    let mut evidence = Evidence::default();

    lta.for_each_state(|_, insn, state| {
        let (src, field) = match insn {
            Instruction::IPut { src, field, .. } | Instruction::SPut { src, field } => {
                (*src, field)
            }
            _ => return,
        };
        let Some(field) = field.field else {
            return;
        };
        evidence.written.push(field);
        if !lta.is_tracked_write(insn) {
            evidence.field_writes.push((field, state.get(src)));
        }
    });
    if let Some(exit) = lta.exit_field_state() {
        evidence.initialized.extend(exit);
    }

    let m = program.method(method);
    if !m.is_virtual() || non_true_virtuals.contains(&method) {
        let returned = lta.return_type();
        if !returned.is_bottom() {
            trace!(
                "[wps] {} returns {}",
                program.method_name(method),
                returned.display(program)
            );
            evidence.return_type = Some((method, returned));
        }
    }
    Ok(evidence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::type_analysis::domain::TypeTag;
    use indoc::indoc;

    fn program() -> Program {
        Program::from_yaml_str(indoc! {r#"
            classes:
              - name: Slot
                fields:
                  - { name: value, type: Slot, static: true }
                methods:
                  - name: get
                    static: true
                    code:
                      - { op: sget, dest: 0, field: Slot.value }
                      - { op: return, src: 0 }
        "#})
        .unwrap()
    }

    #[test]
    fn test_absent_entries_are_top() {
        let program = program();
        let wps = WholeProgramState::default();
        let field = program.field_by_name("Slot.value").unwrap();
        let get = program.method_by_name("Slot.get").unwrap();
        assert!(wps.get_field_type(field).is_top());
        assert!(wps.get_return_type(get).is_top());
    }

    #[test]
    fn test_leq_is_pointwise() {
        let program = program();
        let field = program.field_by_name("Slot.value").unwrap();
        let slot = program.class_by_name("Slot").unwrap();

        let empty = WholeProgramState::default();
        let mut precise = WholeProgramState::default();
        precise
            .fields
            .insert(field, TypeDomain::not_null(TypeTag::Class(slot)));
        let mut nullable = WholeProgramState::default();
        nullable.fields.insert(
            field,
            TypeDomain::not_null(TypeTag::Class(slot)).join_with_null(),
        );

        assert!(precise.leq(&nullable));
        assert!(!nullable.leq(&precise));
        assert!(precise.leq(&empty));
        assert!(!empty.leq(&precise));
        assert!(empty.leq(&empty));
    }

    #[test]
    fn test_diff_lists_changed_entries() {
        let program = program();
        let field = program.field_by_name("Slot.value").unwrap();

        let old = WholeProgramState::default();
        let mut new = WholeProgramState::default();
        new.fields.insert(field, TypeDomain::null());

        let diff = old.field_partition_diff(&new, &program);
        assert!(diff.starts_with("Slot.value: "));
        assert_eq!(diff.lines().count(), 1);
        assert!(old.method_partition_diff(&new, &program).is_empty());
        assert_eq!(new.num_resolved_fields(), 1);
        assert!(new.display(&program).to_string().contains("Slot.value"));
    }
}
