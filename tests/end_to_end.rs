//! The literal end-to-end scenarios source -> artifact -> bootstrap -> tick
//! (spec.md §8 "End-to-end scenarios").

use evochora::bootstrap::bootstrap;
use evochora::compiler::{compile_source, CompileOptions};
use evochora::isa::Opcode;
use evochora::molecule::{Molecule, MoleculeType};
use evochora::vm::CostModel;
use evochora::{Environment, Scheduler};

fn opts(dims: usize) -> CompileOptions {
    CompileOptions { dims, shape: None }
}

#[test]
fn define_and_set() {
    let artifact = compile_source("p", "t.asm", ".DEFINE V DATA:5\nSETI %DR0 V\n", &opts(1)).unwrap();

    let env = Environment::new(vec![32], true);
    let mut sched = Scheduler::new(env, CostModel::default());
    bootstrap(&mut sched, &artifact, vec![0], 100);

    sched.tick();

    let org = &sched.organisms[0];
    assert_eq!(org.dr[0], Molecule::new(MoleculeType::Data, 5));
    assert_eq!(org.er, 100 - CostModel::default().base_cost(Opcode::SetI));
}

#[test]
fn register_alias() {
    let artifact = compile_source("p", "t.asm", ".REG %X 0\nSETI %X DATA:123\n", &opts(1)).unwrap();

    let env = Environment::new(vec![32], true);
    let mut sched = Scheduler::new(env, CostModel::default());
    bootstrap(&mut sched, &artifact, vec![0], 100);

    sched.tick();

    assert_eq!(sched.organisms[0].dr[0], Molecule::new(MoleculeType::Data, 123));
}

#[test]
fn org_relocation() {
    let artifact = compile_source("p", "t.asm", ".ORG 7|9\nSETI %DR0 DATA:1\n", &opts(2)).unwrap();

    assert_eq!(
        artifact.machine_code_layout.get("7|9"),
        Some(&Molecule::new(MoleculeType::Code, Opcode::SetI.to_byte() as i64).encode())
    );
}

#[test]
fn place_writes_initial_world_objects() {
    let artifact = compile_source(
        "p",
        "t.asm",
        ".PLACE DATA:5 3|4\n.PLACE STRUCTURE:9 10|1\nNOP\n",
        &opts(2),
    )
    .unwrap();

    let env = Environment::new(vec![32, 32], true);
    let mut sched = Scheduler::new(env, CostModel::default());
    bootstrap(&mut sched, &artifact, vec![0, 0], 100);

    assert_eq!(sched.env.get(&[3, 4]), Molecule::new(MoleculeType::Data, 5));
    assert_eq!(sched.env.get(&[10, 1]), Molecule::new(MoleculeType::Structure, 9));
}

#[test]
fn conflict_resolution_favors_the_lowest_organism_id() {
    // Two organisms three cells apart along axis 0, so their own code never
    // overlaps, each executing a single PokeII whose target vector is aimed so
    // both land on the same contended cell.
    let env = Environment::new(vec![16, 16], true);
    let mut sched = Scheduler::new(env, CostModel::default());

    let dv = evochora::Vector::new(vec![1, 0]);
    write_poke(&mut sched, &[0, 0], &dv, 7);
    write_poke(&mut sched, &[3, 0], &dv, 9);

    let id0 = sched.spawn(vec![0, 0], 1000, None);
    let id1 = sched.spawn(vec![3, 0], 1000, None);
    assert!(id0 < id1);

    // Point both organisms' active data pointer at the same contended cell's
    // neighbor-of-origin so their unity-vector poke targets coincide.
    sched.organisms[0].dp[0] = vec![8, 8];
    sched.organisms[1].dp[0] = vec![8, 8];

    sched.tick();

    assert_eq!(sched.env.get(&[9, 8]), Molecule::new(MoleculeType::Data, 7));
}

fn write_poke(sched: &mut Scheduler, pos: &[i64], dv: &evochora::Vector, value: i64) {
    sched.env.set(pos, Molecule::new(MoleculeType::Code, Opcode::PokeII.to_byte() as i64));
    let value_cell = sched.env.position_after(pos, dv, 1);
    sched.env.set(&value_cell, Molecule::new(MoleculeType::Data, value));
    let vector_cell = sched.env.position_after(pos, dv, 2);
    sched.env.set(&vector_cell, Molecule::new(MoleculeType::Data, 1));
    let vector_cell2 = sched.env.position_after(pos, dv, 3);
    sched.env.set(&vector_cell2, Molecule::new(MoleculeType::Data, 0));
}

#[test]
fn proc_call_marshals_ref_and_val_params_through_fpr() {
    // `out` is REF (round-trips through the caller's %DR0), `n` is VAL
    // (one-way copy of the literal 41). The body sets `out` to `n` and then
    // increments it, so the caller should see 42 in %DR0 after RET.
    let artifact = compile_source(
        "p",
        "t.asm",
        "JMPI MAIN\n.PROC SETBOTH REF out VAL n\nSETR %out %n\nADDI %out DATA:1\n.ENDP\nMAIN:\nSETI %DR0 DATA:5\nCALL SETBOTH REF %DR0 VAL DATA:41\n",
        &opts(1),
    )
    .unwrap();

    let env = Environment::new(vec![64], true);
    let mut sched = Scheduler::new(env, CostModel::default());
    bootstrap(&mut sched, &artifact, vec![0], 1000);

    sched.tick(); // JMPI MAIN
    sched.tick(); // SETI %DR0 DATA:5
    sched.tick(); // PUSH %DR0 (CALL's REF marshalling)
    sched.tick(); // SETI %FPR1 DATA:41 (CALL's VAL marshalling)
    sched.tick(); // CALL SETBOTH
    sched.tick(); // POP %FPR0 (ProcEnter)
    sched.tick(); // SETR %out %n, inside the body

    let org = &sched.organisms[0];
    assert!(!org.instruction_failed);
    assert_eq!(org.fpr[0], Molecule::new(MoleculeType::Data, 41), "in-body read of the VAL param into the REF slot");

    sched.tick(); // ADDI %out DATA:1
    sched.tick(); // PUSH %FPR0 (RET's writeback push)
    sched.tick(); // RET
    sched.tick(); // POP %DR0 (CALL site's REF writeback)

    let org = &sched.organisms[0];
    assert!(!org.instruction_failed);
    assert_eq!(org.dr[0], Molecule::new(MoleculeType::Data, 42), "REF actual observes the callee's write after RET");
}

#[test]
fn macro_expansion() {
    let artifact = compile_source(
        "p",
        "t.asm",
        ".MACRO INC REG\nADDI REG DATA:1\n.ENDM\nINC %DR0\n",
        &opts(1),
    )
    .unwrap();

    let env = Environment::new(vec![32], true);
    let mut sched = Scheduler::new(env, CostModel::default());
    bootstrap(&mut sched, &artifact, vec![0], 100);
    sched.organisms[0].dr[0] = Molecule::new(MoleculeType::Data, 10);

    sched.tick();

    assert_eq!(sched.organisms[0].dr[0], Molecule::new(MoleculeType::Data, 11));
}
