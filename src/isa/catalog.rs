//! The static opcode metadata table, built once and shared by the compiler (arity for
//! layout) and the runtime (argument sources and cost for the VM step machine).
//!
//! Grounded on mettatron's `opcodes.rs`, which builds its `OPCODE_TABLE: [Option<Opcode>; 256]`
//! once via a `Lazy`/`OnceLock` and indexes it from both the assembler and the VM.

use super::{ArgSource, Opcode};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Static metadata for one opcode.
pub struct OpcodeInfo {
    pub mnemonic: &'static str,
    pub sources: SmallVec<[ArgSource; 2]>,
    /// Cost charged before any value- or ownership-dependent surcharge (spec.md §4.2).
    pub base_cost: i64,
    pub writes_environment: bool,
    /// Whether a per-cell ownership surcharge applies to this opcode's write (only
    /// opcodes that can write into a cell someone else owns).
    pub ownership_sensitive: bool,
}

pub struct IsaCatalog {
    by_opcode: HashMap<Opcode, OpcodeInfo>,
    by_mnemonic: HashMap<&'static str, Opcode>,
}

impl IsaCatalog {
    pub fn info(&self, op: Opcode) -> &OpcodeInfo {
        self.by_opcode
            .get(&op)
            .expect("every Opcode::ALL variant has a catalog entry")
    }

    pub fn by_mnemonic(&self, name: &str) -> Option<Opcode> {
        self.by_mnemonic.get(name).copied()
    }
}

fn src(kind: ArgSource) -> SmallVec<[ArgSource; 2]> {
    let mut v = SmallVec::new();
    v.push(kind);
    v
}

fn src2(a: ArgSource, b: ArgSource) -> SmallVec<[ArgSource; 2]> {
    let mut v = SmallVec::new();
    v.push(a);
    v.push(b);
    v
}

fn entry(
    mnemonic: &'static str,
    sources: SmallVec<[ArgSource; 2]>,
    base_cost: i64,
    writes_environment: bool,
    ownership_sensitive: bool,
) -> OpcodeInfo {
    OpcodeInfo {
        mnemonic,
        sources,
        base_cost,
        writes_environment,
        ownership_sensitive,
    }
}

fn build() -> IsaCatalog {
    use ArgSource::*;

    let mut by_opcode = HashMap::new();
    let mut push = |op: Opcode, info: OpcodeInfo| {
        by_opcode.insert(op, info);
    };

    // --- Control ---
    push(Opcode::Nop, entry("NOP", SmallVec::new(), 1, false, false));
    push(Opcode::JmpI, entry("JMPI", src(Immediate), 1, false, false));
    push(Opcode::JmpR, entry("JMPR", src(Register), 1, false, false));
    push(Opcode::Call, entry("CALL", src(Immediate), 2, false, false));
    push(Opcode::Ret, entry("RET", SmallVec::new(), 1, false, false));
    push(Opcode::Ifi, entry("IFI", src2(Register, Immediate), 1, false, false));
    push(Opcode::Ifr, entry("IFR", src2(Register, Register), 1, false, false));
    push(Opcode::Iftr, entry("IFTR", src(Register), 1, false, false));

    // --- Arithmetic/logic ---
    push(Opcode::AddR, entry("ADDR", src2(Register, Register), 1, false, false));
    push(Opcode::AddI, entry("ADDI", src2(Register, Immediate), 1, false, false));
    push(Opcode::AddS, entry("ADDS", SmallVec::new(), 1, false, false));
    push(Opcode::SubR, entry("SUBR", src2(Register, Register), 1, false, false));
    push(Opcode::SubI, entry("SUBI", src2(Register, Immediate), 1, false, false));
    push(Opcode::SubS, entry("SUBS", SmallVec::new(), 1, false, false));
    push(Opcode::GtI, entry("GTI", src2(Register, Immediate), 1, false, false));
    push(Opcode::GtR, entry("GTR", src2(Register, Register), 1, false, false));
    push(Opcode::GtS, entry("GTS", SmallVec::new(), 1, false, false));

    // --- Data movement ---
    push(Opcode::SetI, entry("SETI", src2(Register, Immediate), 1, false, false));
    push(Opcode::SetR, entry("SETR", src2(Register, Register), 1, false, false));
    push(Opcode::SetV, entry("SETV", src2(Register, VectorImmediate), 1, false, false));
    push(Opcode::Push, entry("PUSH", src(Register), 1, false, false));
    push(Opcode::Pop, entry("POP", src(Register), 1, false, false));
    push(Opcode::Pos, entry("POS", src(VectorRegister), 1, false, false));
    push(Opcode::Turn, entry("TURN", src(VectorRegister), 1, false, false));
    push(Opcode::Seek, entry("SEEK", src(VectorRegister), 1, false, false));

    // --- Environment: PEEK (consume, read into register) ---
    push(Opcode::PeekR, entry("PEEKR", src2(Register, VectorRegister), 2, true, true));
    push(Opcode::PeekS, entry("PEEKS", src(VectorStack), 2, true, true));
    push(Opcode::PeekI, entry("PEEKI", src2(Register, VectorImmediate), 2, true, true));

    // --- Environment: SCAN (non-consuming read into register) ---
    push(Opcode::ScanR, entry("SCANR", src2(Register, VectorRegister), 1, false, false));
    push(Opcode::ScanS, entry("SCANS", src(VectorStack), 1, false, false));
    push(Opcode::ScanI, entry("SCANI", src2(Register, VectorImmediate), 1, false, false));

    // --- Environment: DEL (consume, discard) ---
    push(Opcode::DelR, entry("DELR", src(VectorRegister), 2, true, true));
    push(Opcode::DelS, entry("DELS", src(VectorStack), 2, true, true));
    push(Opcode::DelI, entry("DELI", src(VectorImmediate), 2, true, true));

    // --- Environment: POKE (write iff target empty), <value><vector> ---
    push(Opcode::PokeRR, entry("POKERR", src2(Register, VectorRegister), 2, true, true));
    push(Opcode::PokeRS, entry("POKERS", src2(Register, VectorStack), 2, true, true));
    push(Opcode::PokeRI, entry("POKERI", src2(Register, VectorImmediate), 2, true, true));
    push(Opcode::PokeIR, entry("POKEIR", src2(Immediate, VectorRegister), 2, true, true));
    push(Opcode::PokeIS, entry("POKEIS", src2(Immediate, VectorStack), 2, true, true));
    push(Opcode::PokeII, entry("POKEII", src2(Immediate, VectorImmediate), 2, true, true));
    push(Opcode::PokeSR, entry("POKESR", src2(Stack, VectorRegister), 2, true, true));
    push(Opcode::PokeSS, entry("POKESS", src2(Stack, VectorStack), 2, true, true));
    push(Opcode::PokeSI, entry("POKESI", src2(Stack, VectorImmediate), 2, true, true));

    // --- Environment: PPK (atomic read-then-write), <value><vector> ---
    push(Opcode::PpkRR, entry("PPKRR", src2(Register, VectorRegister), 2, true, true));
    push(Opcode::PpkRS, entry("PPKRS", src2(Register, VectorStack), 2, true, true));
    push(Opcode::PpkRI, entry("PPKRI", src2(Register, VectorImmediate), 2, true, true));
    push(Opcode::PpkIR, entry("PPKIR", src2(Immediate, VectorRegister), 2, true, true));
    push(Opcode::PpkIS, entry("PPKIS", src2(Immediate, VectorStack), 2, true, true));
    push(Opcode::PpkII, entry("PPKII", src2(Immediate, VectorImmediate), 2, true, true));
    push(Opcode::PpkSR, entry("PPKSR", src2(Stack, VectorRegister), 2, true, true));
    push(Opcode::PpkSS, entry("PPKSS", src2(Stack, VectorStack), 2, true, true));
    push(Opcode::PpkSI, entry("PPKSI", src2(Stack, VectorImmediate), 2, true, true));

    // --- Environment: OVWR (unconditional write), <value><vector> ---
    push(Opcode::OvwrRR, entry("OVWRRR", src2(Register, VectorRegister), 3, true, true));
    push(Opcode::OvwrRS, entry("OVWRRS", src2(Register, VectorStack), 3, true, true));
    push(Opcode::OvwrRI, entry("OVWRRI", src2(Register, VectorImmediate), 3, true, true));
    push(Opcode::OvwrIR, entry("OVWRIR", src2(Immediate, VectorRegister), 3, true, true));
    push(Opcode::OvwrIS, entry("OVWRIS", src2(Immediate, VectorStack), 3, true, true));
    push(Opcode::OvwrII, entry("OVWRII", src2(Immediate, VectorImmediate), 3, true, true));
    push(Opcode::OvwrSR, entry("OVWRSR", src2(Stack, VectorRegister), 3, true, true));
    push(Opcode::OvwrSS, entry("OVWRSS", src2(Stack, VectorStack), 3, true, true));
    push(Opcode::OvwrSI, entry("OVWRSI", src2(Stack, VectorImmediate), 3, true, true));

    // --- Introspection ---
    push(Opcode::Nrg, entry("NRG", src(Register), 1, false, false));
    push(Opcode::Rid, entry("RID", src(Register), 1, false, false));
    push(Opcode::Pid, entry("PID", src(Register), 1, false, false));

    let by_mnemonic = by_opcode
        .iter()
        .map(|(&op, info)| (info.mnemonic, op))
        .collect();

    IsaCatalog {
        by_opcode,
        by_mnemonic,
    }
}

/// The process-wide catalog, built once on first access.
pub fn catalog() -> &'static IsaCatalog {
    static CATALOG: OnceLock<IsaCatalog> = OnceLock::new();
    CATALOG.get_or_init(build)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::Opcode;

    #[test]
    fn every_declared_opcode_has_catalog_metadata() {
        let cat = catalog();
        for &op in Opcode::ALL {
            let info = cat.info(op);
            assert!(!info.mnemonic.is_empty());
        }
    }

    #[test]
    fn mnemonics_are_unique() {
        let cat = catalog();
        assert_eq!(cat.by_mnemonic.len(), Opcode::ALL.len());
    }

    #[test]
    fn ownership_sensitive_implies_writes_environment() {
        let cat = catalog();
        for &op in Opcode::ALL {
            let info = cat.info(op);
            if info.ownership_sensitive {
                assert!(info.writes_environment, "{} is ownership-sensitive but doesn't write", info.mnemonic);
            }
        }
    }
}
