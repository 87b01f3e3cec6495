//! Intermediate representation emitted by semantic analysis and consumed by
//! layout/linking/emission (spec.md §4.5.5, §9 "tagged-variant enum … dispatched
//! by exhaustive pattern matching").

use super::ast::{AxisSpec, SourceInfo};
use crate::isa::Opcode;
use crate::molecule::MoleculeType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterFile {
    Data,
    Proc,
    Location,
    FormalParam,
}

/// Folds a register file tag and its physical index into one flat `usize`:
/// `Data` 0-7, `Proc` 100-101, `Location` 200-203, `FormalParam` 300-307.
/// Shared by `emit.rs` (debug alias metadata) and `layout.rs` (operand encoding).
pub fn flatten_register_index(kind: RegisterFile, index: usize) -> usize {
    let base = match kind {
        RegisterFile::Data => 0,
        RegisterFile::Proc => 100,
        RegisterFile::Location => 200,
        RegisterFile::FormalParam => 300,
    };
    base + index
}

#[derive(Debug, Clone, PartialEq)]
pub enum IrOperand {
    Reg(RegisterFile, usize),
    Imm(i64),
    TypedImm(MoleculeType, i64),
    Vec(Vec<i64>),
    LabelRef(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefOperand {
    pub file: RegisterFile,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IrItem {
    LabelDef {
        name: String,
        info: SourceInfo,
    },
    Instruction {
        opcode: Opcode,
        operands: Vec<IrOperand>,
        ref_operands: Vec<RefOperand>,
        val_operands: Vec<IrOperand>,
        info: SourceInfo,
    },
    /// `core:org` — relocates the layout cursor.
    SetOrigin {
        coord: Vec<i64>,
        info: SourceInfo,
    },
    /// `core:dir` — changes the layout direction vector.
    SetDirection {
        dv: Vec<i64>,
        info: SourceInfo,
    },
    /// `core:place` — writes a molecule into one or more absolute/relative cells
    /// outside the normal instruction stream.
    Place {
        value: (MoleculeType, i64),
        placements: Vec<Vec<AxisSpec>>,
        info: SourceInfo,
    },
    /// `core:proc_enter` — marks a procedure body's first instruction for
    /// layout; carries no marshalling of its own. The `POP`s that load
    /// `%FPR0..` from the actuals the caller pushed are ordinary
    /// [`IrItem::Instruction`]s that `semantic.rs` emits immediately after this.
    ProcEnter {
        arity: usize,
        info: SourceInfo,
    },
    /// `core:proc_exit` — marks a procedure body's end for layout; a pure
    /// position marker, like [`IrItem::ProcEnter`].
    ProcExit {
        info: SourceInfo,
    },
}

impl IrItem {
    pub fn info(&self) -> &SourceInfo {
        match self {
            Self::LabelDef { info, .. }
            | Self::Instruction { info, .. }
            | Self::SetOrigin { info, .. }
            | Self::SetDirection { info, .. }
            | Self::Place { info, .. }
            | Self::ProcEnter { info, .. }
            | Self::ProcExit { info, .. } => info,
        }
    }
}
