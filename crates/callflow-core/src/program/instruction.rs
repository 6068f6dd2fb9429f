use serde::{Deserialize, Serialize};
use std::fmt;

use super::{ClassId, FieldId};

/// Register number. Parameters occupy the lowest registers, `this` first.
pub type Reg = u32;

/// Position of an instruction inside its method body.
///
/// Instruction ids double as call-site identities: an edge of the call graph
/// refers to the invoke that produced it by the invoke's `InsnId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InsnId(pub u32);

impl InsnId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InsnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Dispatch flavour of an invoke, which also selects how the target is searched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvokeKind {
    Static,
    Direct,
    Virtual,
    Super,
    Interface,
}

/// Symbolic method reference as written at the call site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRef {
    /// Referenced class, `None` when the class is absent from the program
    pub class: Option<ClassId>,
    pub class_name: String,
    pub name: String,
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class_name, self.name)
    }
}

/// Field reference, resolved against the class hierarchy at load time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub field: Option<FieldId>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    LoadParam {
        dest: Reg,
    },
    Const {
        dest: Reg,
        value: i64,
    },
    ConstNull {
        dest: Reg,
    },
    NewInstance {
        dest: Reg,
        class: Option<ClassId>,
    },
    Move {
        dest: Reg,
        src: Reg,
    },
    Invoke {
        kind: InvokeKind,
        method: MethodRef,
        args: Vec<Reg>,
        dest: Option<Reg>,
    },
    IGet {
        dest: Reg,
        object: Reg,
        field: FieldRef,
    },
    IPut {
        src: Reg,
        object: Reg,
        field: FieldRef,
    },
    SGet {
        dest: Reg,
        field: FieldRef,
    },
    SPut {
        src: Reg,
        field: FieldRef,
    },
    CheckCast {
        dest: Reg,
        src: Reg,
        class: Option<ClassId>,
    },
    If {
        src: Reg,
        target: InsnId,
    },
    Goto {
        target: InsnId,
    },
    Return {
        src: Option<Reg>,
    },
    Throw {
        src: Reg,
    },
}

impl Instruction {
    pub fn branch_target(&self) -> Option<InsnId> {
        match self {
            Instruction::If { target, .. } | Instruction::Goto { target } => Some(*target),
            _ => None,
        }
    }

    /// Whether this instruction ends its basic block
    pub fn ends_block(&self) -> bool {
        matches!(
            self,
            Instruction::If { .. }
                | Instruction::Goto { .. }
                | Instruction::Return { .. }
                | Instruction::Throw { .. }
        )
    }

    /// Whether control can continue to the next instruction
    pub fn falls_through(&self) -> bool {
        !matches!(
            self,
            Instruction::Goto { .. } | Instruction::Return { .. } | Instruction::Throw { .. }
        )
    }
}
