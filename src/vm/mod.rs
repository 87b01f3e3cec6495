//! The organism VM's per-instruction state machine (spec.md §4.2, §4.3):
//! FETCH -> DECODE -> VALIDATE -> PROPOSE -> APPLY -> ADVANCE.
//!
//! `step()` runs everything except APPLY, which belongs to [`crate::scheduler`]
//! because it depends on every organism's proposal for the tick (conflict
//! resolution). Grounded on mettatron's `BytecodeVM::step()`
//! (`backend/bytecode/vm/mod.rs`): read opcode at the instruction pointer, trace it,
//! dispatch by `match`.

mod cost;
mod env_ops;
mod operand;

pub use cost::CostModel;

use crate::environment::Environment;
use crate::isa::{ArgSource, Opcode};
use crate::molecule::{Molecule, MoleculeType, Vector};
use crate::organism::{CallFrame, FailureReason, Organism};
use operand::OperandCursor;
use tracing::{debug, trace};

/// A world write an organism wants to make this tick. Collected, never applied,
/// until the scheduler resolves conflicts across every organism's proposal.
#[derive(Debug, Clone)]
pub struct WorldWrite {
    pub coord: Vec<i64>,
    pub molecule: Molecule,
    pub new_owner: Option<u64>,
}

/// The result of PROPOSE for one organism's one instruction this tick.
#[derive(Debug, Clone, Default)]
pub struct Proposal {
    pub world_writes: Vec<WorldWrite>,
    /// Energy charged only if at least one of `world_writes` survives conflict
    /// resolution (spec.md §4.4, §9 Open Question).
    pub pending_cost: i64,
    pub cells_consumed: i64,
}

impl Proposal {
    pub fn no_write() -> Self {
        Self::default()
    }

    pub fn single_write(write: WorldWrite) -> Self {
        Self {
            world_writes: vec![write],
            pending_cost: 0,
            cells_consumed: 0,
        }
    }
}

/// Runs FETCH through PROPOSE for one organism. Returns the proposal for the
/// scheduler to resolve and apply. Organism-local effects (registers, stacks,
/// pointers, and unconditional energy costs) are already applied to `org` by the
/// time this returns; only `proposal.world_writes` remain pending.
pub fn step(org: &mut Organism, env: &Environment, cost_model: &CostModel) -> Proposal {
    org.reset_transient_flags();

    // FETCH
    let opcode_cell = env.get(&org.ip);
    let opcode = match opcode_cell.mol_type {
        MoleculeType::Code => Opcode::from_byte(opcode_cell.scalar as u8),
        _ => None,
    };
    let Some(opcode) = opcode else {
        org.fail(FailureReason::NotExecutable);
        org.er -= cost_model.failure_cost(Opcode::Nop);
        debug!(target: "evochora::vm::step", organism = org.id, ip = ?org.ip, "not executable");
        org.ip = env.next_position(&org.ip, &org.dv);
        return Proposal::no_write();
    };

    trace!(target: "evochora::vm::step", organism = org.id, ip = ?org.ip, op = %opcode.mnemonic());

    // DECODE + VALIDATE + PROPOSE, fused per-opcode below (mirrors the source's
    // per-opcode handler shape rather than a fully generic interpreter loop).
    let dv = org.dv.clone();
    let ip = org.ip.clone();
    let mut cursor = OperandCursor::new(env, &ip, &dv);
    let outcome = dispatch(org, env, opcode, &mut cursor);
    let cells_consumed = cursor.cells_consumed();

    let mut proposal = match outcome {
        Ok(mut p) => {
            p.cells_consumed = cells_consumed;
            p
        }
        Err(reason) => {
            org.fail(reason);
            org.er -= cost_model.failure_cost(opcode);
            debug!(target: "evochora::vm::step", organism = org.id, op = %opcode.mnemonic(), reason = %reason, "instruction failed");
            let mut p = Proposal::no_write();
            p.cells_consumed = cells_consumed;
            p
        }
    };

    if !org.instruction_failed {
        if proposal.world_writes.is_empty() {
            org.er -= cost_model.base_cost(opcode);
        } else {
            let mut cost = cost_model.base_cost(opcode);
            for write in &proposal.world_writes {
                let target_owner = env.owner_of(&write.coord);
                cost += cost_model.write_surcharge(
                    opcode,
                    write.molecule.scalar,
                    target_owner,
                    org.id,
                    org.parent_id,
                );
            }
            proposal.pending_cost = cost;
        }
    }

    // ADVANCE
    if !org.skip_ip_advance {
        org.ip = env.position_after(&ip, &dv, 1 + proposal.cells_consumed);
    }

    proposal
}

fn dispatch(
    org: &mut Organism,
    env: &Environment,
    opcode: Opcode,
    cursor: &mut OperandCursor,
) -> Result<Proposal, FailureReason> {
    let sources: Vec<ArgSource> = opcode.info().sources.iter().copied().collect();

    match opcode {
        Opcode::Nop => Ok(Proposal::no_write()),

        Opcode::JmpI => {
            let target = cursor.read_value(org, sources[0])?;
            org.ip = resolve_absolute(env, &org.ip, target.scalar);
            org.skip_ip_advance = true;
            Ok(Proposal::no_write())
        }
        Opcode::JmpR => {
            let reg = cursor.read_register_index()?;
            let target = org.get_register(reg).ok_or(FailureReason::TruncatedInstruction)?;
            org.ip = resolve_absolute(env, &org.ip, target.scalar);
            org.skip_ip_advance = true;
            Ok(Proposal::no_write())
        }
        Opcode::Call => call(org, env, cursor),
        Opcode::Ret => ret(org),
        Opcode::Ifi => {
            let a = cursor.read_value(org, sources[0])?;
            let b = cursor.read_value(org, sources[1])?;
            skip_if(org, env, a.scalar > b.scalar, cursor.cells_consumed())
        }
        Opcode::Ifr => {
            let a = cursor.read_value(org, sources[0])?;
            let b = cursor.read_value(org, sources[1])?;
            skip_if(org, env, a.scalar > b.scalar, cursor.cells_consumed())
        }
        Opcode::Iftr => {
            let reg = cursor.read_register_index()?;
            let flag = org.get_register(reg).ok_or(FailureReason::TruncatedInstruction)?;
            skip_if(org, env, flag.scalar != 0, cursor.cells_consumed())
        }

        Opcode::AddR | Opcode::AddI => {
            let dest = cursor.read_register_index()?;
            let rhs = cursor.read_value(org, sources[1])?;
            let lhs = org.get_register(dest).ok_or(FailureReason::TruncatedInstruction)?;
            org.set_register(dest, Molecule::new(lhs.mol_type, lhs.scalar.wrapping_add(rhs.scalar)));
            Ok(Proposal::no_write())
        }
        Opcode::AddS => {
            let a = org.data_stack.pop().ok_or(FailureReason::StackUnderflow)?;
            let b = org.data_stack.pop().ok_or(FailureReason::StackUnderflow)?;
            org.data_stack.push(Molecule::new(a.mol_type, a.scalar.wrapping_add(b.scalar)));
            Ok(Proposal::no_write())
        }
        Opcode::SubR | Opcode::SubI => {
            let dest = cursor.read_register_index()?;
            let rhs = cursor.read_value(org, sources[1])?;
            let lhs = org.get_register(dest).ok_or(FailureReason::TruncatedInstruction)?;
            org.set_register(dest, Molecule::new(lhs.mol_type, lhs.scalar.wrapping_sub(rhs.scalar)));
            Ok(Proposal::no_write())
        }
        Opcode::SubS => {
            let a = org.data_stack.pop().ok_or(FailureReason::StackUnderflow)?;
            let b = org.data_stack.pop().ok_or(FailureReason::StackUnderflow)?;
            org.data_stack.push(Molecule::new(b.mol_type, b.scalar.wrapping_sub(a.scalar)));
            Ok(Proposal::no_write())
        }
        Opcode::GtI | Opcode::GtR => {
            let dest = cursor.read_register_index()?;
            let rhs = cursor.read_value(org, sources[1])?;
            let lhs = org.get_register(dest).ok_or(FailureReason::TruncatedInstruction)?;
            let result = if lhs.scalar > rhs.scalar { 1 } else { 0 };
            org.set_register(dest, Molecule::new(MoleculeType::Data, result));
            Ok(Proposal::no_write())
        }
        Opcode::GtS => {
            let a = org.data_stack.pop().ok_or(FailureReason::StackUnderflow)?;
            let b = org.data_stack.pop().ok_or(FailureReason::StackUnderflow)?;
            let result = if b.scalar > a.scalar { 1 } else { 0 };
            org.data_stack.push(Molecule::new(MoleculeType::Data, result));
            Ok(Proposal::no_write())
        }

        Opcode::SetI | Opcode::SetR => {
            // Flat-decoded (`compiler::ir::flatten_register_index`'s scheme) so a
            // CALL site's VAL-actual marshalling can target an `%FPR` slot
            // directly; for any operand outside that band this is the same `%DR`
            // write as before.
            let dest = cursor.read_register_index()?;
            let value = cursor.read_value(org, sources[1])?;
            if !org.set_register(dest, value) {
                return Err(FailureReason::TruncatedInstruction);
            }
            Ok(Proposal::no_write())
        }
        Opcode::SetV => {
            let lr_idx = cursor.read_vector_register_index()?;
            let vector = cursor.read_vector(org, sources[1])?;
            org.lr[lr_idx] = vector;
            Ok(Proposal::no_write())
        }
        Opcode::Push => {
            let reg = cursor.read_register_index()?;
            let value = org.get_register(reg).ok_or(FailureReason::TruncatedInstruction)?;
            org.data_stack.push(value);
            Ok(Proposal::no_write())
        }
        Opcode::Pop => {
            let reg = cursor.read_register_index()?;
            let value = org.data_stack.pop().ok_or(FailureReason::StackUnderflow)?;
            if !org.set_register(reg, value) {
                return Err(FailureReason::TruncatedInstruction);
            }
            Ok(Proposal::no_write())
        }
        Opcode::Pos => {
            let lr_idx = cursor.read_vector_register_index()?;
            org.lr[lr_idx] = Vector::new(org.ip.clone());
            Ok(Proposal::no_write())
        }
        Opcode::Turn => {
            let lr_idx = cursor.read_vector_register_index()?;
            org.lr[lr_idx] = org.dv.clone();
            Ok(Proposal::no_write())
        }
        Opcode::Seek => {
            let vector = cursor.read_vector(org, sources[0])?;
            env_ops::seek(org, env, &vector)
        }

        Opcode::PeekR | Opcode::PeekI => {
            let dest = cursor.read_register_index()?;
            let vector = cursor.read_vector(org, sources[1])?;
            env_ops::peek(org, env, env_ops::Destination::Register(dest), &vector)
        }
        Opcode::PeekS => {
            let vector = cursor.read_vector(org, sources[0])?;
            env_ops::peek(org, env, env_ops::Destination::Stack, &vector)
        }
        Opcode::ScanR | Opcode::ScanI => {
            let dest = cursor.read_register_index()?;
            let vector = cursor.read_vector(org, sources[1])?;
            env_ops::scan(org, env, env_ops::Destination::Register(dest), &vector)
        }
        Opcode::ScanS => {
            let vector = cursor.read_vector(org, sources[0])?;
            env_ops::scan(org, env, env_ops::Destination::Stack, &vector)
        }
        Opcode::DelR | Opcode::DelS | Opcode::DelI => {
            let vector = cursor.read_vector(org, sources[0])?;
            env_ops::del(org, env, &vector)
        }

        Opcode::PokeRR | Opcode::PokeRS | Opcode::PokeRI |
        Opcode::PokeIR | Opcode::PokeIS | Opcode::PokeII |
        Opcode::PokeSR | Opcode::PokeSS | Opcode::PokeSI => {
            let value = cursor.read_value(org, sources[0])?;
            let vector = cursor.read_vector(org, sources[1])?;
            env_ops::poke(org, env, value, &vector)
        }
        Opcode::PpkRR | Opcode::PpkRS | Opcode::PpkRI |
        Opcode::PpkIR | Opcode::PpkIS | Opcode::PpkII |
        Opcode::PpkSR | Opcode::PpkSS | Opcode::PpkSI => {
            let value = cursor.read_value(org, sources[0])?;
            let vector = cursor.read_vector(org, sources[1])?;
            env_ops::ppk(org, env, value, &vector)
        }
        Opcode::OvwrRR | Opcode::OvwrRS | Opcode::OvwrRI |
        Opcode::OvwrIR | Opcode::OvwrIS | Opcode::OvwrII |
        Opcode::OvwrSR | Opcode::OvwrSS | Opcode::OvwrSI => {
            let value = cursor.read_value(org, sources[0])?;
            let vector = cursor.read_vector(org, sources[1])?;
            env_ops::ovwr(org, env, value, &vector)
        }

        Opcode::Nrg => {
            let dest = cursor.read_register_index()?;
            env_ops::nrg(org, dest);
            Ok(Proposal::no_write())
        }
        Opcode::Rid => {
            let dest = cursor.read_register_index()?;
            env_ops::rid(org, dest);
            Ok(Proposal::no_write())
        }
        Opcode::Pid => {
            let dest = cursor.read_register_index()?;
            env_ops::pid(org, dest);
            Ok(Proposal::no_write())
        }
    }
}

/// `JMPI`'s operand is an absolute linear offset along axis 0 from the program's
/// origin; `nextPosition`-normalized like any other coordinate arithmetic.
fn resolve_absolute(env: &Environment, ip: &[i64], linear: i64) -> Vec<i64> {
    let mut coord = vec![0i64; ip.len()];
    if !coord.is_empty() {
        coord[0] = linear;
    }
    env.normalize(&coord).unwrap_or(coord)
}

/// On a true condition, advances IP past this instruction *and* the following one
/// (spec.md §4.3 "conditional skip"). The following instruction's own footprint is
/// looked up from the static catalog, not executed, so skipping never pops a stack
/// or mutates a register.
fn skip_if(org: &mut Organism, env: &Environment, condition: bool, own_cells: i64) -> Result<Proposal, FailureReason> {
    if condition {
        let next_ip = env.position_after(&org.ip, &org.dv, 1 + own_cells);
        let next_cell = env.get(&next_ip);
        let next_span = if next_cell.mol_type == MoleculeType::Code {
            match Opcode::from_byte(next_cell.scalar as u8) {
                Some(op) => 1 + op.stream_cells(org.dims()),
                None => 1,
            }
        } else {
            1
        };
        org.ip = env.position_after(&next_ip, &org.dv, next_span);
        org.skip_ip_advance = true;
    }
    Ok(Proposal::no_write())
}

fn call(org: &mut Organism, env: &Environment, cursor: &mut OperandCursor) -> Result<Proposal, FailureReason> {
    let target = cursor.read_value(org, ArgSource::Immediate)?;
    let return_ip = env.position_after(&org.ip, &org.dv, 1 + cursor.cells_consumed());
    org.call_stack.push(CallFrame {
        return_ip,
        saved_pr: org.pr,
    });
    if org.call_stack.len() > 256 {
        org.call_stack.pop();
        return Err(FailureReason::CallStackOverflow);
    }
    org.ip = resolve_absolute(env, &org.ip, target.scalar);
    org.skip_ip_advance = true;
    Ok(Proposal::no_write())
}

fn ret(org: &mut Organism) -> Result<Proposal, FailureReason> {
    let frame = org.call_stack.pop().ok_or(FailureReason::StackUnderflow)?;
    org.pr = frame.saved_pr;
    org.ip = frame.return_ip;
    org.skip_ip_advance = true;
    Ok(Proposal::no_write())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;
    use crate::isa::Opcode;

    fn write_instruction(env: &mut Environment, pos: &[i64], op: Opcode, args: &[Molecule]) {
        env.set(pos, Molecule::new(MoleculeType::Code, op.to_byte() as i64));
        let mut cursor = pos.to_vec();
        for arg in args {
            cursor[0] += 1;
            env.set(&cursor, *arg);
        }
    }

    #[test]
    fn seti_loads_register_and_charges_base_cost() {
        let mut env = Environment::new(vec![16], true);
        write_instruction(
            &mut env,
            &[0],
            Opcode::SetI,
            &[Molecule::new(MoleculeType::Data, 0), Molecule::new(MoleculeType::Data, 123)],
        );
        let mut org = Organism::new(0, 1, vec![0], 100, None, 0);
        let cost_model = CostModel::default();
        let proposal = step(&mut org, &env, &cost_model);
        assert!(proposal.world_writes.is_empty());
        assert!(!org.instruction_failed);
        assert_eq!(org.get_dr(0), Some(Molecule::new(MoleculeType::Data, 123)));
        assert_eq!(org.er, 100 - cost_model.base_cost(Opcode::SetI));
    }

    #[test]
    fn fetch_of_non_code_cell_fails_and_advances_by_one() {
        let env = Environment::new(vec![16], true);
        let mut org = Organism::new(0, 1, vec![0], 100, None, 0);
        let cost_model = CostModel::default();
        step(&mut org, &env, &cost_model);
        assert!(org.instruction_failed);
        assert_eq!(org.ip, vec![1]);
    }

    #[test]
    fn push_then_pop_round_trips_value() {
        let mut env = Environment::new(vec![16], true);
        write_instruction(&mut env, &[0], Opcode::Push, &[Molecule::new(MoleculeType::Data, 0)]);
        write_instruction(&mut env, &[2], Opcode::Pop, &[Molecule::new(MoleculeType::Data, 1)]);
        let mut org = Organism::new(0, 1, vec![0], 100, None, 0);
        org.set_dr(0, Molecule::new(MoleculeType::Data, 42));
        let cost_model = CostModel::default();
        step(&mut org, &env, &cost_model);
        assert_eq!(org.data_stack, vec![Molecule::new(MoleculeType::Data, 42)]);
        step(&mut org, &env, &cost_model);
        assert!(org.data_stack.is_empty());
        assert_eq!(org.get_dr(1), Some(Molecule::new(MoleculeType::Data, 42)));
    }
}
