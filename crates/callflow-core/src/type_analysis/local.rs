//! Intraprocedural type analysis
//!
//! A forward worklist fixpoint over a method's control-flow graph. Block entry
//! states are joined at merge points; states at individual instructions are
//! recovered by replaying a block from its entry state.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug_span, trace};

use super::domain::{AbstractEnvironment, Nullness, SingletonType, TypeDomain, TypeTag};
use super::whole_program_state::WholeProgramState;
use crate::errors::Result;
use crate::program::{
    BlockId, ClassId, FieldId, FieldRef, InsnId, Instruction, MethodBody, MethodId, Program, Reg,
};

/// Register to value
pub type RegisterEnvironment = AbstractEnvironment<Reg>;

/// Receiver register of instance methods
const THIS_REG: Reg = 0;

/// What a local analysis knows beyond its own body
#[derive(Clone, Copy)]
pub struct LocalContext<'a> {
    pub wps: &'a WholeProgramState,
    /// Declaring class when analyzing a `<clinit>`
    pub clinit_type: Option<ClassId>,
    /// Declaring class when analyzing an `<init>`
    pub ctor_type: Option<ClassId>,
    /// Field reads may observe fields before their initializer ran
    pub any_init_reachable: bool,
}

impl<'a> LocalContext<'a> {
    pub fn new(wps: &'a WholeProgramState) -> Self {
        Self {
            wps,
            clinit_type: None,
            ctor_type: None,
            any_init_reachable: false,
        }
    }

    /// Context for `method`, with initializer tracking scoped to its class
    pub fn for_method(program: &Program, method: MethodId, wps: &'a WholeProgramState) -> Self {
        let m = program.method(method);
        Self {
            wps,
            clinit_type: m.is_clinit().then_some(m.class),
            ctor_type: m.is_init().then_some(m.class),
            any_init_reachable: false,
        }
    }
}

/// Registers plus the fields an initializer is tracking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeState {
    regs: RegisterEnvironment,
    fields: FxHashMap<FieldId, TypeDomain>,
}

impl TypeState {
    pub fn bottom() -> Self {
        Self {
            regs: RegisterEnvironment::bottom(),
            fields: FxHashMap::default(),
        }
    }

    pub fn is_bottom(&self) -> bool {
        self.regs.is_bottom()
    }

    pub fn get(&self, reg: Reg) -> TypeDomain {
        self.regs.get(reg)
    }

    pub fn set(&mut self, reg: Reg, value: TypeDomain) {
        self.regs.set(reg, value);
    }

    pub fn registers(&self) -> &RegisterEnvironment {
        &self.regs
    }

    pub fn field(&self, field: FieldId) -> Option<TypeDomain> {
        self.fields.get(&field).copied()
    }

    pub fn leq(&self, other: &Self) -> bool {
        if self.is_bottom() {
            return true;
        }
        if other.is_bottom() {
            return false;
        }
        self.regs.leq(&other.regs)
            && self.fields.iter().all(|(field, value)| {
                other
                    .fields
                    .get(field)
                    .map_or(true, |theirs| value.leq(theirs))
            })
    }

    pub fn join(&self, other: &Self) -> Self {
        if self.is_bottom() {
            return other.clone();
        }
        if other.is_bottom() {
            return self.clone();
        }
        let mut fields = self.fields.clone();
        for (field, value) in &other.fields {
            fields
                .entry(*field)
                .and_modify(|mine| *mine = mine.join(value))
                .or_insert(*value);
        }
        Self {
            regs: self.regs.join(&other.regs),
            fields,
        }
    }

    fn join_with(&mut self, other: &Self) -> bool {
        if other.leq(self) {
            return false;
        }
        *self = self.join(other);
        true
    }
}

pub struct LocalTypeAnalyzer<'a> {
    program: &'a Program,
    method: MethodId,
    body: &'a MethodBody,
    context: LocalContext<'a>,
    tracked: FxHashSet<FieldId>,
    entry_states: Vec<TypeState>,
}

impl<'a> LocalTypeAnalyzer<'a> {
    /// Fails if `method` has no body
    pub fn new(program: &'a Program, method: MethodId, context: LocalContext<'a>) -> Result<Self> {
        let body = program.body_of(method)?;
        let tracked = tracked_fields(program, &context);
        let blocks = body.cfg().blocks().len();
        Ok(Self {
            program,
            method,
            body,
            context,
            tracked,
            entry_states: vec![TypeState::bottom(); blocks],
        })
    }

    pub fn method(&self) -> MethodId {
        self.method
    }

    /// Own-class fields of this initializer whose value is tracked
    /// flow-sensitively from their default `null`
    pub fn tracked_fields(&self) -> &FxHashSet<FieldId> {
        &self.tracked
    }

    /// Whether `insn` stores into a tracked field. Its value then reaches
    /// the whole program through [`Self::exit_field_state`].
    pub fn is_tracked_write(&self, insn: &Instruction) -> bool {
        match insn {
            Instruction::IPut { object, field, .. } => {
                self.tracked_target(field, Some(*object)).is_some()
            }
            Instruction::SPut { field, .. } => self.tracked_target(field, None).is_some(),
            _ => false,
        }
    }

    /// Compute entry states for every block, starting from `params`
    pub fn run(&mut self, params: RegisterEnvironment) {
        let _span = debug_span!("analyze_method", method = %self.program.method_name(self.method))
            .entered();

        let cfg = self.body.cfg();
        let initial = TypeState {
            regs: params,
            fields: self
                .tracked
                .iter()
                .map(|&field| (field, TypeDomain::null()))
                .collect(),
        };
        for state in &mut self.entry_states {
            *state = TypeState::bottom();
        }
        self.entry_states[cfg.entry().index()] = initial;

        let mut worklist = vec![cfg.entry()];
        let mut iterations = 0usize;
        while let Some(block) = worklist.pop() {
            iterations += 1;
            let mut state = self.entry_states[block.index()].clone();
            if state.is_bottom() {
                continue;
            }
            for idx in cfg.block(block).insns() {
                self.analyze_instruction(&self.body.instructions()[idx], &mut state);
            }
            for &succ in &cfg.block(block).succs {
                if self.entry_states[succ.index()].join_with(&state) && !worklist.contains(&succ) {
                    worklist.push(succ);
                }
            }
        }
        trace!("[local] fixpoint after {} block visits", iterations);
    }

    pub fn entry_state_at(&self, block: BlockId) -> &TypeState {
        &self.entry_states[block.index()]
    }

    /// Abstract transfer of one instruction
    pub fn analyze_instruction(&self, insn: &Instruction, state: &mut TypeState) {
        if state.is_bottom() {
            return;
        }
        match insn {
            Instruction::LoadParam { .. }
            | Instruction::If { .. }
            | Instruction::Goto { .. }
            | Instruction::Return { .. }
            | Instruction::Throw { .. } => {}
            Instruction::Const { dest, .. } => {
                state.set(*dest, TypeDomain::not_null(TypeTag::Int));
            }
            Instruction::ConstNull { dest } => state.set(*dest, TypeDomain::null()),
            Instruction::NewInstance { dest, class } => {
                let value = match class {
                    Some(class) => TypeDomain::not_null(TypeTag::Class(*class)),
                    None => TypeDomain::new(Nullness::NotNull, SingletonType::Top),
                };
                state.set(*dest, value);
            }
            Instruction::Move { dest, src } => {
                let value = state.get(*src);
                state.set(*dest, value);
            }
            Instruction::Invoke {
                kind, method, dest, ..
            } => {
                if let Some(dest) = dest {
                    let value = self
                        .program
                        .resolve_method(method, *kind, self.method)
                        .map(|callee| self.context.wps.get_return_type(callee))
                        .unwrap_or_else(TypeDomain::top);
                    state.set(*dest, value);
                }
            }
            Instruction::IGet {
                dest,
                object,
                field,
            } => {
                let value = match self.tracked_target(field, Some(*object)) {
                    Some(tracked) => state.field(tracked).unwrap_or_else(TypeDomain::null),
                    None => self.field_value(field),
                };
                state.set(*dest, value);
            }
            Instruction::SGet { dest, field } => {
                let value = match self.tracked_target(field, None) {
                    Some(tracked) => state.field(tracked).unwrap_or_else(TypeDomain::null),
                    None => self.field_value(field),
                };
                state.set(*dest, value);
            }
            Instruction::IPut { src, object, field } => {
                if let Some(tracked) = self.tracked_target(field, Some(*object)) {
                    let value = state.get(*src);
                    state.fields.insert(tracked, value);
                }
            }
            Instruction::SPut { src, field } => {
                if let Some(tracked) = self.tracked_target(field, None) {
                    let value = state.get(*src);
                    state.fields.insert(tracked, value);
                }
            }
            Instruction::CheckCast { dest, src, class } => {
                let value = state.get(*src);
                let singleton = match class {
                    Some(class) => SingletonType::Known(TypeTag::Class(*class)),
                    None => SingletonType::Top,
                };
                // A null reference passes any cast and stays null
                let cast = if value == TypeDomain::null() {
                    value
                } else {
                    value.with_singleton(singleton)
                };
                state.set(*dest, cast);
            }
        }
    }

    /// The tracked field an access refers to. Instance accesses only count
    /// when they go through the receiver.
    fn tracked_target(&self, field: &FieldRef, object: Option<Reg>) -> Option<FieldId> {
        let id = field.field?;
        if !self.tracked.contains(&id) {
            return None;
        }
        match object {
            Some(reg) if reg != THIS_REG => None,
            _ => Some(id),
        }
    }

    fn field_value(&self, field: &FieldRef) -> TypeDomain {
        let value = field
            .field
            .map(|id| self.context.wps.get_field_type(id))
            .unwrap_or_else(TypeDomain::top);
        if self.context.any_init_reachable {
            value.join_with_null()
        } else {
            value
        }
    }

    /// Visit every instruction of a reachable block with the state holding
    /// just before it
    pub fn for_each_state(&self, mut f: impl FnMut(InsnId, &Instruction, &TypeState)) {
        let cfg = self.body.cfg();
        for block in cfg.blocks() {
            let mut state = self.entry_states[block.id.index()].clone();
            if state.is_bottom() {
                continue;
            }
            for idx in block.insns() {
                let insn = &self.body.instructions()[idx];
                f(InsnId(idx as u32), insn, &state);
                self.analyze_instruction(insn, &mut state);
            }
        }
    }

    /// Join of all returned values; bottom if the method returns nothing
    pub fn return_type(&self) -> TypeDomain {
        let mut result = TypeDomain::bottom();
        self.for_each_state(|_, insn, state| {
            if let Instruction::Return { src: Some(src) } = insn {
                result = result.join(&state.get(*src));
            }
        });
        result
    }

    /// Values of the tracked fields at the method's returns.
    /// `None` when no return is reachable.
    pub fn exit_field_state(&self) -> Option<FxHashMap<FieldId, TypeDomain>> {
        let mut exit: Option<TypeState> = None;
        self.for_each_state(|_, insn, state| {
            if matches!(insn, Instruction::Return { .. }) {
                exit = Some(match exit.take() {
                    Some(acc) => acc.join(state),
                    None => state.clone(),
                });
            }
        });
        exit.map(|state| state.fields)
    }
}

/// Every static field of the class for `<clinit>`, every instance field of
/// the class for `<init>`
fn tracked_fields(program: &Program, context: &LocalContext<'_>) -> FxHashSet<FieldId> {
    let own_fields = |class: ClassId, want_static: bool| {
        program
            .class(class)
            .fields
            .iter()
            .copied()
            .filter(move |&id| program.field(id).is_static == want_static)
    };
    let mut tracked = FxHashSet::default();
    if let Some(class) = context.clinit_type {
        tracked.extend(own_fields(class, true));
    }
    if let Some(class) = context.ctor_type {
        tracked.extend(own_fields(class, false));
    }
    tracked
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn params(values: &[TypeDomain]) -> RegisterEnvironment {
        let mut env = RegisterEnvironment::top();
        for (reg, value) in values.iter().enumerate() {
            env.set(reg as Reg, *value);
        }
        env
    }

    #[test]
    fn test_branches_join_at_merge() {
        let program = Program::from_yaml_str(indoc! {r#"
            classes:
              - name: Maybe
                methods:
                  - name: pick
                    static: true
                    params: [I]
                    code:
                      - { op: if, src: 0, target: none }
                      - { op: new, dest: 1, class: Maybe }
                      - { op: goto, target: done }
                      - { op: label, name: none }
                      - { op: const-null, dest: 1 }
                      - { op: label, name: done }
                      - { op: return, src: 1 }
        "#})
        .unwrap();
        let pick = program.method_by_name("Maybe.pick").unwrap();
        let wps = WholeProgramState::default();
        let mut analyzer =
            LocalTypeAnalyzer::new(&program, pick, LocalContext::new(&wps)).unwrap();
        analyzer.run(params(&[TypeDomain::not_null(TypeTag::Int)]));

        let returned = analyzer.return_type();
        assert_eq!(returned.nullness(), Nullness::Top);
        assert_eq!(
            returned.singleton(),
            SingletonType::Known(TypeTag::Class(program.class_by_name("Maybe").unwrap()))
        );
    }

    #[test]
    fn test_loop_reaches_fixpoint() {
        let program = Program::from_yaml_str(indoc! {r#"
            classes:
              - name: Counter
                methods:
                  - name: spin
                    static: true
                    params: [I]
                    code:
                      - { op: const-null, dest: 1 }
                      - { op: label, name: head }
                      - { op: if, src: 0, target: exit }
                      - { op: const, dest: 1, value: 1 }
                      - { op: goto, target: head }
                      - { op: label, name: exit }
                      - { op: return, src: 1 }
        "#})
        .unwrap();
        let spin = program.method_by_name("Counter.spin").unwrap();
        let wps = WholeProgramState::default();
        let mut analyzer =
            LocalTypeAnalyzer::new(&program, spin, LocalContext::new(&wps)).unwrap();
        analyzer.run(RegisterEnvironment::top());

        assert_eq!(
            analyzer.return_type(),
            TypeDomain::not_null(TypeTag::Int).join_with_null()
        );
    }

    #[test]
    fn test_unreachable_block_stays_bottom() {
        let program = Program::from_yaml_str(indoc! {r#"
            classes:
              - name: Dead
                methods:
                  - name: run
                    static: true
                    code:
                      - { op: return }
                      - { op: const, dest: 0, value: 3 }
                      - { op: return, src: 0 }
        "#})
        .unwrap();
        let run = program.method_by_name("Dead.run").unwrap();
        let wps = WholeProgramState::default();
        let mut analyzer = LocalTypeAnalyzer::new(&program, run, LocalContext::new(&wps)).unwrap();
        analyzer.run(RegisterEnvironment::top());

        assert!(analyzer.entry_state_at(BlockId(1)).is_bottom());
        assert!(analyzer.return_type().is_bottom());
    }

    #[test]
    fn test_ctor_tracks_receiver_fields() {
        let program = Program::from_yaml_str(indoc! {r#"
            classes:
              - name: Box
                fields:
                  - { name: item, type: Box }
                  - { name: spare, type: Box }
                methods:
                  - name: "<init>"
                    params: [I]
                    code:
                      - { op: iget, dest: 2, object: 0, field: Box.item }
                      - { op: if, src: 1, target: skip }
                      - { op: new, dest: 3, class: Box }
                      - { op: iput, src: 3, object: 0, field: Box.item }
                      - { op: label, name: skip }
                      - { op: return }
        "#})
        .unwrap();
        let init = program.method_by_name("Box.<init>").unwrap();
        let item = program.field_by_name("Box.item").unwrap();
        let spare = program.field_by_name("Box.spare").unwrap();
        let wps = WholeProgramState::default();
        let mut analyzer = LocalTypeAnalyzer::new(
            &program,
            init,
            LocalContext::for_method(&program, init, &wps),
        )
        .unwrap();
        assert!(analyzer.tracked_fields().contains(&item));
        assert!(analyzer.tracked_fields().contains(&spare));

        analyzer.run(RegisterEnvironment::top());
        let exit = analyzer.exit_field_state().unwrap();
        let box_class = program.class_by_name("Box").unwrap();
        assert_eq!(
            exit[&item],
            TypeDomain::not_null(TypeTag::Class(box_class)).join_with_null()
        );
        // Never assigned, so still the default
        assert_eq!(exit[&spare], TypeDomain::null());

        // The read before the write sees the default null
        let mut read = None;
        analyzer.for_each_state(|id, _, state| {
            if id == InsnId(3) {
                read = Some(state.get(2));
            }
        });
        assert_eq!(read, Some(TypeDomain::null()));
    }

    #[test]
    fn test_any_init_reachable_reads_may_be_null() {
        let program = Program::from_yaml_str(indoc! {r#"
            classes:
              - name: Holder
                fields:
                  - { name: value, type: Holder, static: true }
                methods:
                  - name: read
                    static: true
                    code:
                      - { op: sget, dest: 0, field: Holder.value }
                      - { op: return, src: 0 }
        "#})
        .unwrap();
        let read = program.method_by_name("Holder.read").unwrap();
        let wps = WholeProgramState::default();
        let mut context = LocalContext::new(&wps);
        context.any_init_reachable = true;
        let mut analyzer = LocalTypeAnalyzer::new(&program, read, context).unwrap();
        analyzer.run(RegisterEnvironment::top());

        // Unknown field value joined with null is still unknown
        assert!(analyzer.return_type().is_top());
    }

    #[test]
    fn test_method_without_body_is_rejected() {
        let program = Program::from_yaml_str(indoc! {r#"
            classes:
              - name: Api
                methods:
                  - name: call
                    abstract: true
        "#})
        .unwrap();
        let call = program.method_by_name("Api.call").unwrap();
        let wps = WholeProgramState::default();
        assert!(LocalTypeAnalyzer::new(&program, call, LocalContext::new(&wps)).is_err());
    }
}
