//! Writes a frozen [`ProgramArtifact`] into an [`Environment`] at a chosen origin
//! and creates the entry organism (spec.md §6 "Runtime bootstrap input").

use crate::artifact::{parse_coord_key, ProgramArtifact};
use crate::environment::Environment;
use crate::molecule::Molecule;
use crate::scheduler::Scheduler;

/// Adds `origin` and `rel` axis-wise.
fn translate(origin: &[i64], rel: &[i64]) -> Vec<i64> {
    origin.iter().zip(rel.iter()).map(|(o, r)| o + r).collect()
}

/// Writes `machineCodeLayout` and `initialWorldObjects` into `env` at `origin`, then
/// registers an organism whose `IP == origin` on `scheduler`. Returns the new
/// organism's id.
pub fn bootstrap(
    scheduler: &mut Scheduler,
    artifact: &ProgramArtifact,
    origin: Vec<i64>,
    initial_energy: i64,
) -> u64 {
    write_layout(&mut scheduler.env, artifact, &origin);
    scheduler.spawn(origin, initial_energy, None)
}

/// Like [`bootstrap`] but for an organism spawned at runtime (e.g. by a future
/// reproduction opcode), attributing `parent_id`.
pub fn bootstrap_child(
    scheduler: &mut Scheduler,
    artifact: &ProgramArtifact,
    origin: Vec<i64>,
    initial_energy: i64,
    parent_id: u64,
) -> u64 {
    write_layout(&mut scheduler.env, artifact, &origin);
    scheduler.spawn(origin, initial_energy, Some(parent_id))
}

fn write_layout(env: &mut Environment, artifact: &ProgramArtifact, origin: &[i64]) {
    for (key, encoded) in &artifact.machine_code_layout {
        let rel = parse_coord_key(key);
        let abs = translate(origin, &rel);
        env.set(&abs, Molecule::decode(*encoded));
    }
    for (key, encoded) in &artifact.initial_world_objects {
        let rel = parse_coord_key(key);
        let abs = translate(origin, &rel);
        env.set(&abs, Molecule::decode(*encoded));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::coord_key;
    use crate::molecule::MoleculeType;
    use crate::vm::CostModel;

    #[test]
    fn bootstrap_writes_layout_relative_to_origin_and_spawns_an_organism() {
        let mut artifact = ProgramArtifact::new("p");
        artifact
            .machine_code_layout
            .insert(coord_key(&[0, 0]), Molecule::new(MoleculeType::Code, 0).encode());
        artifact
            .initial_world_objects
            .insert(coord_key(&[3, 4]), Molecule::new(MoleculeType::Data, 5).encode());

        let env = Environment::new(vec![16, 16], true);
        let mut scheduler = Scheduler::new(env, CostModel::default());
        let id = bootstrap(&mut scheduler, &artifact, vec![2, 2], 100);

        assert_eq!(scheduler.env.get(&[2, 2]), Molecule::new(MoleculeType::Code, 0));
        assert_eq!(scheduler.env.get(&[5, 6]), Molecule::new(MoleculeType::Data, 5));
        assert_eq!(scheduler.organisms[0].id, id);
        assert_eq!(scheduler.organisms[0].ip, vec![2, 2]);
    }
}
