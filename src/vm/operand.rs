//! Generic operand decoding shared by every opcode handler (spec.md §4.2 DECODE).
//!
//! Each opcode's catalog entry lists its [`ArgSource`]s in emission order. A value
//! source (`Register`/`Immediate`/`Stack`) consumes zero or one cells from the
//! instruction stream along the organism's `DV`; a vector source additionally may
//! consume `dims` cells when it is a vector literal.

use crate::environment::Environment;
use crate::isa::ArgSource;
use crate::molecule::{Molecule, Vector};
use crate::organism::{FailureReason, Organism, LOCATION_REGISTER_COUNT};

/// Walks the instruction stream following the opcode cell, handing out operand
/// values according to each source's decoding rule.
pub struct OperandCursor<'a> {
    env: &'a Environment,
    ip: &'a [i64],
    dv: &'a Vector,
    cells_consumed: i64,
}

impl<'a> OperandCursor<'a> {
    pub fn new(env: &'a Environment, ip: &'a [i64], dv: &'a Vector) -> Self {
        Self {
            env,
            ip,
            dv,
            cells_consumed: 0,
        }
    }

    /// Total instruction-stream cells consumed so far (excludes the opcode cell
    /// itself); used to compute the `(1 + arity)` step in ADVANCE.
    pub fn cells_consumed(&self) -> i64 {
        self.cells_consumed
    }

    fn next_cell(&mut self) -> Result<Molecule, FailureReason> {
        self.cells_consumed += 1;
        let pos = self.env.position_after(self.ip, self.dv, self.cells_consumed);
        if self.env.normalize(&pos).is_none() {
            return Err(FailureReason::TruncatedInstruction);
        }
        Ok(self.env.get(&pos))
    }

    /// Read one scalar-valued operand per `source` (spec.md §4.2 argument sources).
    pub fn read_value(
        &mut self,
        org: &mut Organism,
        source: ArgSource,
    ) -> Result<Molecule, FailureReason> {
        match source {
            ArgSource::Register => {
                let cell = self.next_cell()?;
                org.get_register(cell.scalar).ok_or(FailureReason::TruncatedInstruction)
            }
            ArgSource::Immediate => self.next_cell(),
            ArgSource::Stack => org.data_stack.pop().ok_or(FailureReason::StackUnderflow),
            _ => unreachable!("read_value called with a vector source"),
        }
    }

    /// Read one vector-valued operand per `source`.
    pub fn read_vector(
        &mut self,
        org: &mut Organism,
        source: ArgSource,
    ) -> Result<Vector, FailureReason> {
        match source {
            ArgSource::VectorRegister => {
                let cell = self.next_cell()?;
                let idx = (cell.scalar.rem_euclid(LOCATION_REGISTER_COUNT as i64)) as usize;
                Ok(org.lr[idx].clone())
            }
            ArgSource::VectorStack => {
                org.location_stack.pop().ok_or(FailureReason::StackUnderflow)
            }
            ArgSource::VectorImmediate => {
                let mut components = Vec::with_capacity(org.dims());
                for _ in 0..org.dims() {
                    let cell = self.next_cell()?;
                    components.push(cell.scalar);
                }
                Ok(Vector::new(components))
            }
            _ => unreachable!("read_vector called with a value source"),
        }
    }

    /// Register-index operand for opcodes whose operand names a register slot to
    /// write into rather than a value to read (e.g. the destination of `PEEK`,
    /// `SETI`). Returns the raw flat index (`compiler::ir::flatten_register_index`'s
    /// scheme); `Organism::get_register`/`set_register` decode it, falling through
    /// to the `%DR` band for anything outside the `%FPR` range.
    pub fn read_register_index(&mut self) -> Result<i64, FailureReason> {
        let cell = self.next_cell()?;
        Ok(cell.scalar)
    }

    /// `%LR` slot operand for opcodes whose operand names a location-register
    /// destination rather than a vector value to read (`POS`, `TURN`, `SETV`).
    pub fn read_vector_register_index(&mut self) -> Result<usize, FailureReason> {
        let cell = self.next_cell()?;
        Ok((cell.scalar.rem_euclid(LOCATION_REGISTER_COUNT as i64)) as usize)
    }
}
