//! Minimal bytecode program model
//!
//! Classes, methods and fields live in `id_arena` arenas and are referenced by
//! stable ids. Nothing in the analyses mutates a program after it is loaded;
//! they only read bodies and flags.

mod cfg;
mod instruction;
mod spec;

pub use cfg::{Block, BlockId, ControlFlowGraph};
pub use instruction::{FieldRef, InsnId, Instruction, InvokeKind, MethodRef, Reg};
pub use spec::{ClassSpec, FieldSpec, InstructionSpec, MethodSpec, ProgramSpec};

use id_arena::{Arena, Id};
use indexmap::IndexMap;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use crate::errors::{AnalysisError, Result};

pub type ClassId = Id<Class>;
pub type MethodId = Id<Method>;
pub type FieldId = Id<Field>;

pub const CLINIT_NAME: &str = "<clinit>";
pub const INIT_NAME: &str = "<init>";

#[derive(Debug, Clone)]
pub struct Class {
    pub name: String,
    pub super_class: Option<ClassId>,
    pub interfaces: Vec<ClassId>,
    pub is_interface: bool,
    /// Defined outside the analyzed program (framework / library class)
    pub is_external: bool,
    pub methods: Vec<MethodId>,
    pub fields: Vec<FieldId>,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub class: ClassId,
    pub name: String,
    pub is_static: bool,
    qualified_name: String,
}

impl Field {
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }
}

/// Code of a concrete method
#[derive(Debug)]
pub struct MethodBody {
    instructions: Vec<Instruction>,
    cfg: OnceLock<ControlFlowGraph>,
}

impl MethodBody {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self {
            instructions,
            cfg: OnceLock::new(),
        }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn instruction(&self, id: InsnId) -> &Instruction {
        &self.instructions[id.index()]
    }

    /// Instructions paired with their ids, in program order
    pub fn iter(&self) -> impl Iterator<Item = (InsnId, &Instruction)> {
        self.instructions
            .iter()
            .enumerate()
            .map(|(idx, insn)| (InsnId(idx as u32), insn))
    }

    /// The `LoadParam` instructions at the head of the body
    pub fn param_instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions
            .iter()
            .take_while(|insn| matches!(insn, Instruction::LoadParam { .. }))
    }

    /// Control-flow graph, built on first use
    pub fn cfg(&self) -> &ControlFlowGraph {
        self.cfg
            .get_or_init(|| ControlFlowGraph::build(&self.instructions))
    }
}

#[derive(Debug)]
pub struct Method {
    pub class: ClassId,
    pub name: String,
    /// Number of parameter registers, including `this` for instance methods
    pub arity: u32,
    pub is_static: bool,
    pub is_abstract: bool,
    pub is_external: bool,
    /// Pinned entry point (kept by configuration, reachable from outside)
    pub is_root: bool,
    /// Whether the method's name may be changed; interface methods that
    /// cannot be renamed may be invoked through a dynamic proxy
    pub renamable: bool,
    body: Option<MethodBody>,
    qualified_name: String,
}

impl Method {
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    pub fn body(&self) -> Option<&MethodBody> {
        self.body.as_ref()
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    pub fn is_concrete(&self) -> bool {
        self.has_body()
    }

    pub fn is_external(&self) -> bool {
        self.is_external
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    pub fn is_clinit(&self) -> bool {
        self.name == CLINIT_NAME
    }

    pub fn is_init(&self) -> bool {
        self.name == INIT_NAME
    }

    pub fn is_any_init(&self) -> bool {
        self.is_clinit() || self.is_init()
    }

    /// Dispatched dynamically: instance methods other than constructors
    pub fn is_virtual(&self) -> bool {
        !self.is_static && !self.is_any_init()
    }
}

pub struct Program {
    classes: Arena<Class>,
    methods: Arena<Method>,
    fields: Arena<Field>,
    class_names: IndexMap<String, ClassId>,
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("classes", &self.classes.len())
            .field("methods", &self.methods.len())
            .field("fields", &self.fields.len())
            .finish()
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Program {
    pub fn new() -> Self {
        Self {
            classes: Arena::new(),
            methods: Arena::new(),
            fields: Arena::new(),
            class_names: IndexMap::new(),
        }
    }

    /// Load a program description, choosing the format by file extension
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let spec = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str::<ProgramSpec>(&content)
                .map_err(|e| AnalysisError::Load(e.to_string()))?,
            _ => serde_yaml::from_str::<ProgramSpec>(&content)
                .map_err(|e| AnalysisError::Load(e.to_string()))?,
        };
        spec.lower()
    }

    pub fn from_yaml_str(source: &str) -> Result<Self> {
        let spec: ProgramSpec =
            serde_yaml::from_str(source).map_err(|e| AnalysisError::Load(e.to_string()))?;
        spec.lower()
    }

    pub fn from_json_str(source: &str) -> Result<Self> {
        let spec: ProgramSpec =
            serde_json::from_str(source).map_err(|e| AnalysisError::Load(e.to_string()))?;
        spec.lower()
    }

    pub fn class(&self, id: ClassId) -> &Class {
        &self.classes[id]
    }

    pub fn method(&self, id: MethodId) -> &Method {
        &self.methods[id]
    }

    pub fn field(&self, id: FieldId) -> &Field {
        &self.fields[id]
    }

    pub fn classes(&self) -> impl Iterator<Item = (ClassId, &Class)> {
        self.classes.iter()
    }

    pub fn methods(&self) -> impl Iterator<Item = (MethodId, &Method)> {
        self.methods.iter()
    }

    pub fn fields(&self) -> impl Iterator<Item = (FieldId, &Field)> {
        self.fields.iter()
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    pub fn class_by_name(&self, name: &str) -> Option<ClassId> {
        self.class_names.get(name).copied()
    }

    /// Look up a method by its qualified `Class.name` form
    pub fn method_by_name(&self, qualified: &str) -> Option<MethodId> {
        let (class_name, name) = qualified.rsplit_once('.')?;
        let class = self.class_by_name(class_name)?;
        self.classes[class]
            .methods
            .iter()
            .copied()
            .find(|&m| self.methods[m].name == name)
    }

    /// Look up a field by its qualified `Class.name` form
    pub fn field_by_name(&self, qualified: &str) -> Option<FieldId> {
        let (class_name, name) = qualified.rsplit_once('.')?;
        let class = self.class_by_name(class_name)?;
        self.classes[class]
            .fields
            .iter()
            .copied()
            .find(|&f| self.fields[f].name == name)
    }

    pub fn method_name(&self, id: MethodId) -> &str {
        self.methods[id].qualified_name()
    }

    /// Body of a method that must have one
    pub fn body_of(&self, id: MethodId) -> Result<&MethodBody> {
        self.methods[id]
            .body()
            .ok_or_else(|| AnalysisError::MissingBody {
                method: self.method_name(id).to_string(),
            })
    }

    /// The class followed by its super classes, nearest first
    pub fn super_chain(&self, class: ClassId) -> impl Iterator<Item = ClassId> + '_ {
        let limit = self.classes.len();
        std::iter::successors(Some(class), move |&c| self.classes[c].super_class).take(limit)
    }

    fn find_declared(&self, class: ClassId, name: &str, want_static: bool) -> Option<MethodId> {
        self.classes[class].methods.iter().copied().find(|&m| {
            let method = &self.methods[m];
            method.name == name && method.is_static == want_static
        })
    }

    fn find_in_interfaces(&self, class: ClassId, name: &str) -> Option<MethodId> {
        let mut pending: Vec<ClassId> = self
            .super_chain(class)
            .flat_map(|c| self.classes[c].interfaces.iter().copied())
            .collect();
        let mut seen = rustc_hash::FxHashSet::default();
        while let Some(intf) = pending.pop() {
            if !seen.insert(intf) {
                continue;
            }
            if let Some(found) = self.find_declared(intf, name, false) {
                return Some(found);
            }
            pending.extend(self.classes[intf].interfaces.iter().copied());
        }
        None
    }

    /// Resolve a call-site reference to a method definition.
    ///
    /// Returns `None` for references into classes absent from the program or
    /// members that cannot be found; callers skip such invokes.
    pub fn resolve_method(
        &self,
        mref: &MethodRef,
        kind: InvokeKind,
        caller: MethodId,
    ) -> Option<MethodId> {
        let class = mref.class?;
        match kind {
            InvokeKind::Static => self
                .super_chain(class)
                .find_map(|c| self.find_declared(c, &mref.name, true)),
            InvokeKind::Direct => self.find_declared(class, &mref.name, false),
            InvokeKind::Virtual => self
                .super_chain(class)
                .find_map(|c| self.find_declared(c, &mref.name, false))
                .or_else(|| self.find_in_interfaces(class, &mref.name)),
            InvokeKind::Super => {
                let caller_class = self.methods[caller].class;
                let start = self.classes[caller_class].super_class.unwrap_or(class);
                self.super_chain(start)
                    .find_map(|c| self.find_declared(c, &mref.name, false))
            }
            InvokeKind::Interface => self
                .find_declared(class, &mref.name, false)
                .or_else(|| self.find_in_interfaces(class, &mref.name))
                .or_else(|| {
                    self.super_chain(class)
                        .find_map(|c| self.find_declared(c, &mref.name, false))
                }),
        }
    }

    /// Resolve a field name against a class and its super classes
    pub fn resolve_field(&self, class: ClassId, name: &str) -> Option<FieldId> {
        self.super_chain(class).find_map(|c| {
            self.classes[c]
                .fields
                .iter()
                .copied()
                .find(|&f| self.fields[f].name == name)
        })
    }

    pub(crate) fn alloc_class(&mut self, class: Class) -> ClassId {
        let name = class.name.clone();
        let id = self.classes.alloc(class);
        self.class_names.insert(name, id);
        id
    }

    pub(crate) fn class_mut(&mut self, id: ClassId) -> &mut Class {
        &mut self.classes[id]
    }

    pub(crate) fn alloc_field(
        &mut self,
        class: ClassId,
        name: String,
        is_static: bool,
    ) -> FieldId {
        let qualified_name = format!("{}.{}", self.classes[class].name, name);
        let id = self.fields.alloc(Field {
            class,
            name,
            is_static,
            qualified_name,
        });
        self.classes[class].fields.push(id);
        id
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn alloc_method(
        &mut self,
        class: ClassId,
        name: String,
        arity: u32,
        is_static: bool,
        is_abstract: bool,
        is_root: bool,
        renamable: bool,
    ) -> MethodId {
        let qualified_name = format!("{}.{}", self.classes[class].name, name);
        let is_external = self.classes[class].is_external;
        let id = self.methods.alloc(Method {
            class,
            name,
            arity,
            is_static,
            is_abstract,
            is_external,
            is_root,
            renamable,
            body: None,
            qualified_name,
        });
        self.classes[class].methods.push(id);
        id
    }

    pub(crate) fn set_body(&mut self, method: MethodId, body: MethodBody) {
        self.methods[method].body = Some(body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    const HIERARCHY: &str = indoc! {r#"
        classes:
          - name: Runnable
            interface: true
            external: true
            methods:
              - name: run
                abstract: true
          - name: Base
            interfaces: [Runnable]
            methods:
              - name: run
                code:
                  - { op: return }
              - name: make
                static: true
                code:
                  - { op: return }
          - name: Derived
            super: Base
            methods:
              - name: "<init>"
                code:
                  - { op: return }
              - name: helper
                code:
                  - { op: invoke, kind: super, method: Base.run, args: [0] }
                  - { op: return }
    "#};

    #[test]
    fn test_method_flags() {
        let program = Program::from_yaml_str(HIERARCHY).unwrap();
        let run = program.method_by_name("Base.run").unwrap();
        let make = program.method_by_name("Base.make").unwrap();
        let init = program.method_by_name("Derived.<init>").unwrap();
        let intf_run = program.method_by_name("Runnable.run").unwrap();

        assert!(program.method(run).is_virtual());
        assert!(program.method(run).is_concrete());
        assert!(!program.method(make).is_virtual());
        assert!(!program.method(init).is_virtual());
        assert!(program.method(init).is_any_init());
        assert!(program.method(intf_run).is_external());
        assert!(!program.method(intf_run).has_body());
        assert_eq!(program.method(run).arity, 1);
        assert_eq!(program.method(make).arity, 0);
    }

    #[test]
    fn test_resolve_virtual_through_super_chain() {
        let program = Program::from_yaml_str(HIERARCHY).unwrap();
        let caller = program.method_by_name("Derived.helper").unwrap();
        let mref = MethodRef {
            class: program.class_by_name("Derived"),
            class_name: "Derived".to_string(),
            name: "run".to_string(),
        };
        assert_eq!(
            program.resolve_method(&mref, InvokeKind::Virtual, caller),
            program.method_by_name("Base.run")
        );
        assert_eq!(
            program.resolve_method(&mref, InvokeKind::Super, caller),
            program.method_by_name("Base.run")
        );
        // Static lookups never pick instance methods
        assert_eq!(program.resolve_method(&mref, InvokeKind::Static, caller), None);
    }

    #[test]
    fn test_resolve_interface_method() {
        let program = Program::from_yaml_str(HIERARCHY).unwrap();
        let caller = program.method_by_name("Derived.helper").unwrap();
        let mref = MethodRef {
            class: program.class_by_name("Runnable"),
            class_name: "Runnable".to_string(),
            name: "run".to_string(),
        };
        assert_eq!(
            program.resolve_method(&mref, InvokeKind::Interface, caller),
            program.method_by_name("Runnable.run")
        );
    }

    #[test]
    fn test_unknown_class_is_a_resolution_miss() {
        let program = Program::from_yaml_str(HIERARCHY).unwrap();
        let caller = program.method_by_name("Derived.helper").unwrap();
        let mref = MethodRef {
            class: None,
            class_name: "Missing".to_string(),
            name: "run".to_string(),
        };
        assert_eq!(program.resolve_method(&mref, InvokeKind::Virtual, caller), None);
    }

    #[test]
    fn test_body_of_reports_method() {
        let program = Program::from_yaml_str(HIERARCHY).unwrap();
        let intf_run = program.method_by_name("Runnable.run").unwrap();
        let err = program.body_of(intf_run).unwrap_err();
        assert!(err.to_string().contains("Runnable.run"));
    }
}
