//! Serializable program description and its lowering into a `Program`
//!
//! Methods reference each other symbolically (`Class.name`). Lowering
//! allocates every class and member first, then resolves references inside
//! bodies, so declaration order does not matter. References to classes that
//! are not described are kept unresolved: they model calls into libraries
//! that are absent from the analyzed program.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::{
    Class, FieldRef, InsnId, Instruction, InvokeKind, MethodBody, MethodId, MethodRef, Program,
    Reg,
};
use crate::errors::{AnalysisError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramSpec {
    #[serde(default)]
    pub classes: Vec<ClassSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassSpec {
    pub name: String,
    #[serde(default, rename = "super")]
    pub super_class: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub interface: bool,
    #[serde(default)]
    pub external: bool,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub methods: Vec<MethodSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    /// Declared type name; descriptive only, the analyses infer their own
    #[serde(default, rename = "type")]
    pub declared_type: Option<String>,
    #[serde(default, rename = "static")]
    pub is_static: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodSpec {
    pub name: String,
    /// Parameter types, excluding `this`
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default, rename = "static")]
    pub is_static: bool,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default)]
    pub root: bool,
    #[serde(default = "default_true")]
    pub renamable: bool,
    /// Absent for abstract, native and external methods
    #[serde(default)]
    pub code: Option<Vec<InstructionSpec>>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum InstructionSpec {
    Const {
        dest: Reg,
        #[serde(default)]
        value: i64,
    },
    ConstNull {
        dest: Reg,
    },
    New {
        dest: Reg,
        class: String,
    },
    Move {
        dest: Reg,
        src: Reg,
    },
    Invoke {
        kind: InvokeKind,
        method: String,
        #[serde(default)]
        args: Vec<Reg>,
        #[serde(default)]
        dest: Option<Reg>,
    },
    Iget {
        dest: Reg,
        object: Reg,
        field: String,
    },
    Iput {
        src: Reg,
        object: Reg,
        field: String,
    },
    Sget {
        dest: Reg,
        field: String,
    },
    Sput {
        src: Reg,
        field: String,
    },
    CheckCast {
        dest: Reg,
        src: Reg,
        class: String,
    },
    If {
        src: Reg,
        target: String,
    },
    Goto {
        target: String,
    },
    Label {
        name: String,
    },
    Return {
        #[serde(default)]
        src: Option<Reg>,
    },
    Throw {
        src: Reg,
    },
}

impl ProgramSpec {
    /// Build the program, resolving every symbolic name
    pub fn lower(&self) -> Result<Program> {
        let mut program = Program::new();

        for class in &self.classes {
            if program.class_by_name(&class.name).is_some() {
                return Err(AnalysisError::Load(format!(
                    "duplicate class {}",
                    class.name
                )));
            }
            program.alloc_class(Class {
                name: class.name.clone(),
                super_class: None,
                interfaces: Vec::new(),
                is_interface: class.interface,
                is_external: class.external,
                methods: Vec::new(),
                fields: Vec::new(),
            });
        }

        for class in &self.classes {
            let id = lookup_class(&program, &class.name)?;
            let super_class = class
                .super_class
                .as_deref()
                .map(|name| lookup_class(&program, name))
                .transpose()?;
            let interfaces = class
                .interfaces
                .iter()
                .map(|name| lookup_class(&program, name))
                .collect::<Result<Vec<_>>>()?;
            let entry = program.class_mut(id);
            entry.super_class = super_class;
            entry.interfaces = interfaces;
        }

        let mut pending: Vec<(MethodId, &[InstructionSpec])> = Vec::new();
        for class in &self.classes {
            let id = lookup_class(&program, &class.name)?;
            for field in &class.fields {
                if program.field_by_name(&format!("{}.{}", class.name, field.name)).is_some() {
                    return Err(AnalysisError::Load(format!(
                        "duplicate field {}.{}",
                        class.name, field.name
                    )));
                }
                program.alloc_field(id, field.name.clone(), field.is_static);
            }
            for method in &class.methods {
                if program
                    .method_by_name(&format!("{}.{}", class.name, method.name))
                    .is_some()
                {
                    return Err(AnalysisError::Load(format!(
                        "duplicate method {}.{}",
                        class.name, method.name
                    )));
                }
                if class.external && method.code.is_some() {
                    return Err(AnalysisError::Load(format!(
                        "external method {}.{} cannot have code",
                        class.name, method.name
                    )));
                }
                let arity = method.params.len() as u32 + u32::from(!method.is_static);
                let method_id = program.alloc_method(
                    id,
                    method.name.clone(),
                    arity,
                    method.is_static,
                    method.is_abstract,
                    method.root,
                    method.renamable,
                );
                if let Some(code) = &method.code {
                    pending.push((method_id, code.as_slice()));
                }
            }
        }

        for (method, code) in pending {
            let body = lower_body(&program, method, code)?;
            program.set_body(method, body);
        }

        Ok(program)
    }
}

fn lookup_class(program: &Program, name: &str) -> Result<super::ClassId> {
    program
        .class_by_name(name)
        .ok_or_else(|| AnalysisError::Load(format!("unknown class {}", name)))
}

fn split_member<'a>(owner: &str, reference: &'a str) -> Result<(&'a str, &'a str)> {
    reference.rsplit_once('.').ok_or_else(|| {
        AnalysisError::Load(format!(
            "in {}: member reference '{}' must have the form Class.name",
            owner, reference
        ))
    })
}

fn lower_body(program: &Program, method: MethodId, code: &[InstructionSpec]) -> Result<MethodBody> {
    let owner = program.method_name(method).to_string();
    let arity = program.method(method).arity;

    let mut labels: FxHashMap<&str, u32> = FxHashMap::default();
    let mut next = arity;
    for insn in code {
        if let InstructionSpec::Label { name } = insn {
            if labels.insert(name.as_str(), next).is_some() {
                return Err(AnalysisError::Load(format!(
                    "in {}: duplicate label {}",
                    owner, name
                )));
            }
        } else {
            next += 1;
        }
    }
    let len = next;
    let target_of = |name: &str| -> Result<InsnId> {
        match labels.get(name) {
            Some(&pos) if pos < len => Ok(InsnId(pos)),
            Some(_) => Err(AnalysisError::Load(format!(
                "in {}: label {} does not precede an instruction",
                owner, name
            ))),
            None => Err(AnalysisError::Load(format!(
                "in {}: undefined label {}",
                owner, name
            ))),
        }
    };
    let method_ref = |reference: &str| -> Result<MethodRef> {
        let (class_name, name) = split_member(&owner, reference)?;
        Ok(MethodRef {
            class: program.class_by_name(class_name),
            class_name: class_name.to_string(),
            name: name.to_string(),
        })
    };
    let field_ref = |reference: &str| -> Result<FieldRef> {
        let (class_name, name) = split_member(&owner, reference)?;
        Ok(FieldRef {
            field: program
                .class_by_name(class_name)
                .and_then(|class| program.resolve_field(class, name)),
            name: reference.to_string(),
        })
    };

    let mut instructions: Vec<Instruction> = (0..arity)
        .map(|dest| Instruction::LoadParam { dest })
        .collect();
    for insn in code {
        let lowered = match insn {
            InstructionSpec::Label { .. } => continue,
            InstructionSpec::Const { dest, value } => Instruction::Const {
                dest: *dest,
                value: *value,
            },
            InstructionSpec::ConstNull { dest } => Instruction::ConstNull { dest: *dest },
            InstructionSpec::New { dest, class } => Instruction::NewInstance {
                dest: *dest,
                class: program.class_by_name(class),
            },
            InstructionSpec::Move { dest, src } => Instruction::Move {
                dest: *dest,
                src: *src,
            },
            InstructionSpec::Invoke {
                kind,
                method,
                args,
                dest,
            } => Instruction::Invoke {
                kind: *kind,
                method: method_ref(method)?,
                args: args.clone(),
                dest: *dest,
            },
            InstructionSpec::Iget {
                dest,
                object,
                field,
            } => Instruction::IGet {
                dest: *dest,
                object: *object,
                field: field_ref(field)?,
            },
            InstructionSpec::Iput { src, object, field } => Instruction::IPut {
                src: *src,
                object: *object,
                field: field_ref(field)?,
            },
            InstructionSpec::Sget { dest, field } => Instruction::SGet {
                dest: *dest,
                field: field_ref(field)?,
            },
            InstructionSpec::Sput { src, field } => Instruction::SPut {
                src: *src,
                field: field_ref(field)?,
            },
            InstructionSpec::CheckCast { dest, src, class } => Instruction::CheckCast {
                dest: *dest,
                src: *src,
                class: program.class_by_name(class),
            },
            InstructionSpec::If { src, target } => Instruction::If {
                src: *src,
                target: target_of(target)?,
            },
            InstructionSpec::Goto { target } => Instruction::Goto {
                target: target_of(target)?,
            },
            InstructionSpec::Return { src } => Instruction::Return { src: *src },
            InstructionSpec::Throw { src } => Instruction::Throw { src: *src },
        };
        instructions.push(lowered);
    }

    Ok(MethodBody::new(instructions))
}
