//! Drives every organism one tick at a time and resolves write conflicts
//! deterministically (spec.md §4.4).

use crate::environment::Environment;
use crate::organism::Organism;
use crate::vm::{self, CostModel, WorldWrite};
use std::collections::HashMap;
use tracing::trace;

/// Owns the environment and the organism population; advances the simulation one
/// tick at a time.
pub struct Scheduler {
    pub env: Environment,
    pub organisms: Vec<Organism>,
    pub cost_model: CostModel,
    pub tick: u64,
    next_organism_id: u64,
}

impl Scheduler {
    pub fn new(env: Environment, cost_model: CostModel) -> Self {
        Self {
            env,
            organisms: Vec::new(),
            cost_model,
            tick: 0,
            next_organism_id: 0,
        }
    }

    /// Registers a new organism, assigning it the next ascending id.
    pub fn spawn(&mut self, start_pos: Vec<i64>, initial_energy: i64, parent_id: Option<u64>) -> u64 {
        let id = self.next_organism_id;
        self.next_organism_id += 1;
        let dims = self.env.dims();
        self.organisms.push(Organism::new(id, dims, start_pos, initial_energy, parent_id, self.tick));
        id
    }

    pub fn live_organisms(&self) -> impl Iterator<Item = &Organism> {
        self.organisms.iter().filter(|o| !o.is_dead())
    }

    /// Runs one full tick: FETCH..PROPOSE for every live organism (ascending id
    /// order), conflict-resolve proposed world writes, APPLY survivors, sweep the
    /// newly dead, advance the tick counter.
    pub fn tick(&mut self) {
        let live_ids: Vec<usize> = self
            .organisms
            .iter()
            .enumerate()
            .filter(|(_, o)| !o.is_dead())
            .map(|(i, _)| i)
            .collect();

        trace!(target: "evochora::scheduler::tick", tick = self.tick, live = live_ids.len());

        let mut proposals: Vec<(u64, vm::Proposal)> = Vec::with_capacity(live_ids.len());
        for idx in live_ids {
            let org = &mut self.organisms[idx];
            let proposal = vm::step(org, &self.env, &self.cost_model);
            proposals.push((org.id, proposal));
        }

        // Group every proposed write by target coordinate; lowest organism id wins.
        let mut winners: HashMap<Vec<i64>, u64> = HashMap::new();
        for (id, proposal) in &proposals {
            for write in &proposal.world_writes {
                winners
                    .entry(write.coord.clone())
                    .and_modify(|winner| {
                        if *id < *winner {
                            *winner = *id;
                        }
                    })
                    .or_insert(*id);
            }
        }

        // APPLY, in ascending organism-id order for determinism (spec.md §4.4 step 4).
        let mut ordered: Vec<usize> = (0..proposals.len()).collect();
        ordered.sort_by_key(|&i| proposals[i].0);

        for i in ordered {
            let (id, proposal) = &proposals[i];
            let mut any_survived = false;
            for write in &proposal.world_writes {
                if winners.get(&write.coord) == Some(id) {
                    self.apply_write(write);
                    any_survived = true;
                }
            }
            if any_survived {
                if let Some(org) = self.organisms.iter_mut().find(|o| o.id == *id) {
                    org.er -= proposal.pending_cost;
                }
            }
        }

        // Dead organisms (ER <= 0) keep their id and record but are skipped from here
        // on; `live_organisms` filters on `is_dead`, so no separate sweep is needed.
        self.tick += 1;
    }

    fn apply_write(&mut self, write: &WorldWrite) {
        self.env.set(&write.coord, write.molecule);
        self.env.set_owner(&write.coord, write.new_owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::Opcode;
    use crate::molecule::{Molecule, MoleculeType};

    fn write_instruction(
        env: &mut Environment,
        pos: &[i64],
        dv: &crate::molecule::Vector,
        op: Opcode,
        args: &[Molecule],
    ) {
        env.set(pos, Molecule::new(MoleculeType::Code, op.to_byte() as i64));
        for (i, arg) in args.iter().enumerate() {
            let cell = env.position_after(pos, dv, (i + 1) as i64);
            env.set(&cell, *arg);
        }
    }

    #[test]
    fn lowest_id_wins_a_contended_cell() {
        use crate::molecule::Vector;

        // Code is laid out along axis 0 (the default DV); the poke targets a
        // neighbor along axis 1, so the two organisms' instructions never overlap.
        let mut env = Environment::new(vec![8, 8], true);
        let along_axis0 = Vector::new(vec![1, 0]);
        write_instruction(
            &mut env,
            &[0, 0],
            &along_axis0,
            Opcode::PokeII,
            &[
                Molecule::new(MoleculeType::Data, 7),
                Molecule::new(MoleculeType::Data, 0),
                Molecule::new(MoleculeType::Data, 1),
            ],
        );
        write_instruction(
            &mut env,
            &[0, 2],
            &along_axis0,
            Opcode::PokeII,
            &[
                Molecule::new(MoleculeType::Data, 9),
                Molecule::new(MoleculeType::Data, 0),
                Molecule::new(MoleculeType::Data, -1),
            ],
        );

        let mut sched = Scheduler::new(env, CostModel::default());
        let id0 = sched.spawn(vec![0, 0], 1000, None);
        let id1 = sched.spawn(vec![0, 2], 1000, None);
        assert!(id0 < id1);

        sched.tick();

        // Both organisms target coord (0,1); the lowest id (0) wins.
        assert_eq!(sched.env.get(&[0, 1]), Molecule::new(MoleculeType::Data, 7));
    }

    #[test]
    fn dead_organism_is_skipped_on_subsequent_ticks() {
        let env = Environment::new(vec![8], true);
        let mut sched = Scheduler::new(env, CostModel::default());
        sched.spawn(vec![0], 0, None);
        assert_eq!(sched.live_organisms().count(), 0);
        sched.tick();
        assert_eq!(sched.organisms.len(), 1);
    }
}
