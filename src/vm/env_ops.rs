//! Handlers for the environment-interaction opcode family: `PEEK`, `POKE`, `PPK`,
//! `SCAN`, `DEL`, `OVWR`, `SEEK` (spec.md §4.2).
//!
//! Every opcode here forms its target coordinate from a vector and is therefore
//! subject to the unity-vector rule (spec.md §9 Open Question, resolved: applied
//! uniformly). World writes are *proposed*, never applied directly — conflict
//! resolution happens later in [`crate::scheduler`].

use super::{Proposal, WorldWrite};
use crate::environment::Environment;
use crate::molecule::{Molecule, MoleculeType};
use crate::organism::{FailureReason, Organism};

/// Where a read opcode's result lands: a general register (flat-indexed, see
/// `Organism::set_register`) for the `R`/`I` vector suffixes, or the data stack
/// for the `S` suffix.
pub enum Destination {
    Register(i64),
    Stack,
}

fn deposit(org: &mut Organism, dest: Destination, value: Molecule) {
    match dest {
        Destination::Register(flat) => {
            org.set_register(flat, value);
        }
        Destination::Stack => org.data_stack.push(value),
    }
}

/// PEEK: read-and-consume. Fails if the target cell is empty.
pub fn peek(org: &mut Organism, env: &Environment, dest: Destination, vector: &crate::molecule::Vector) -> Result<Proposal, FailureReason> {
    if !vector.is_unity() {
        return Err(FailureReason::NonUnityVector);
    }
    let target = env.next_position(org.active_dp_pos(), vector);
    let value = env.get(&target);
    if value.is_empty() {
        return Err(FailureReason::PeekOnEmptyCell);
    }
    deposit(org, dest, value);
    Ok(Proposal::single_write(WorldWrite {
        coord: target,
        molecule: Molecule::empty(),
        new_owner: None,
    }))
}

/// SCAN: non-consuming read. Never fails; an empty target simply yields an empty
/// molecule.
pub fn scan(org: &mut Organism, env: &Environment, dest: Destination, vector: &crate::molecule::Vector) -> Result<Proposal, FailureReason> {
    if !vector.is_unity() {
        return Err(FailureReason::NonUnityVector);
    }
    let target = env.next_position(org.active_dp_pos(), vector);
    let value = env.get(&target);
    deposit(org, dest, value);
    Ok(Proposal::no_write())
}

/// DEL: consume without reading into a register.
pub fn del(org: &mut Organism, env: &Environment, vector: &crate::molecule::Vector) -> Result<Proposal, FailureReason> {
    if !vector.is_unity() {
        return Err(FailureReason::NonUnityVector);
    }
    let target = env.next_position(org.active_dp_pos(), vector);
    if env.get(&target).is_empty() {
        return Err(FailureReason::PeekOnEmptyCell);
    }
    Ok(Proposal::single_write(WorldWrite {
        coord: target,
        molecule: Molecule::empty(),
        new_owner: None,
    }))
}

/// POKE: write iff the target cell is currently empty.
pub fn poke(org: &mut Organism, env: &Environment, value: Molecule, vector: &crate::molecule::Vector) -> Result<Proposal, FailureReason> {
    if !vector.is_unity() {
        return Err(FailureReason::NonUnityVector);
    }
    let target = env.next_position(org.active_dp_pos(), vector);
    if !env.get(&target).is_empty() {
        return Err(FailureReason::PokeOnOccupiedCell);
    }
    Ok(Proposal::single_write(WorldWrite {
        coord: target,
        molecule: value,
        new_owner: Some(org.id),
    }))
}

/// PPK: atomic read-then-write. Writes unconditionally (unlike `POKE`) and pushes the
/// prior cell content onto the organism's data stack, making the read observable.
pub fn ppk(org: &mut Organism, env: &Environment, value: Molecule, vector: &crate::molecule::Vector) -> Result<Proposal, FailureReason> {
    if !vector.is_unity() {
        return Err(FailureReason::NonUnityVector);
    }
    let target = env.next_position(org.active_dp_pos(), vector);
    let prior = env.get(&target);
    org.data_stack.push(prior);
    Ok(Proposal::single_write(WorldWrite {
        coord: target,
        molecule: value,
        new_owner: Some(org.id),
    }))
}

/// OVWR: unconditional write, prior content discarded without being observable.
pub fn ovwr(org: &mut Organism, env: &Environment, value: Molecule, vector: &crate::molecule::Vector) -> Result<Proposal, FailureReason> {
    if !vector.is_unity() {
        return Err(FailureReason::NonUnityVector);
    }
    let target = env.next_position(org.active_dp_pos(), vector);
    Ok(Proposal::single_write(WorldWrite {
        coord: target,
        molecule: value,
        new_owner: Some(org.id),
    }))
}

/// SEEK: move the active data pointer by a unit vector; no environment write.
pub fn seek(org: &mut Organism, env: &Environment, vector: &crate::molecule::Vector) -> Result<Proposal, FailureReason> {
    if !vector.is_unity() {
        return Err(FailureReason::NonUnityVector);
    }
    let next = env.next_position(org.active_dp_pos(), vector);
    org.set_active_dp_pos(next);
    Ok(Proposal::no_write())
}

/// Read own/parent energy and id (spec.md §4.2 introspection).
pub fn nrg(org: &mut Organism, dest_reg: i64) {
    org.set_register(dest_reg, Molecule::new(MoleculeType::Energy, org.er));
}

pub fn rid(org: &mut Organism, dest_reg: i64) {
    org.set_register(dest_reg, Molecule::new(MoleculeType::Data, org.id as i64));
}

pub fn pid(org: &mut Organism, dest_reg: i64) {
    let value = org.parent_id.map(|p| p as i64).unwrap_or(-1);
    org.set_register(dest_reg, Molecule::new(MoleculeType::Data, value));
}
