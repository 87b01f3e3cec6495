//! Resolves label references left by layout and captures CALL binding metadata
//! into the artifact's debug maps (spec.md §4.5.6, §3 "label_address_to_name",
//! "call_site_bindings").

use super::ir::RefOperand;
use super::layout::LayoutResult;
use super::semantic::SymbolTable;
use crate::artifact::coord_key;
use crate::molecule::Molecule;
use std::collections::BTreeMap;

pub struct LinkResult {
    pub machine_code: BTreeMap<String, i64>,
    pub label_address_to_name: BTreeMap<i64, String>,
    pub call_site_bindings: BTreeMap<i64, Vec<String>>,
}

/// Patches every `LabelRef` placeholder cell with its resolved linear address
/// (the address axis, matching [`crate::vm::step`]'s absolute-jump convention) and
/// builds the two debug maps keyed by that same address.
pub fn link(mut layout: LayoutResult, symbols: &SymbolTable) -> LinkResult {
    for (coord, symbol_id) in &layout.patch_sites {
        let Some(position) = layout.label_positions.get(symbol_id) else {
            continue;
        };
        let address = position[0];
        let key = coord_key(coord);
        layout.machine_code.insert(key, Molecule::new(crate::molecule::MoleculeType::Data, address).encode());
    }

    let mut label_address_to_name = BTreeMap::new();
    for (symbol_id, position) in &layout.label_positions {
        if let Ok(id) = symbol_id.parse::<u64>() {
            if let Some(symbol) = symbols.get(id) {
                label_address_to_name.insert(position[0], symbol.name.clone());
            }
        }
    }

    let mut call_site_bindings = BTreeMap::new();
    for call_site in &layout.call_sites {
        let bindings = describe_bindings(&call_site.ref_operands, symbols);
        call_site_bindings.insert(call_site.address, bindings);
    }

    LinkResult {
        machine_code: layout.machine_code,
        label_address_to_name,
        call_site_bindings,
    }
}

fn describe_bindings(ref_operands: &[RefOperand], _symbols: &SymbolTable) -> Vec<String> {
    ref_operands
        .iter()
        .map(|r| format!("{:?}{}", r.file, r.index))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::diagnostics::Diagnostics;
    use crate::compiler::ir::{IrItem, IrOperand};
    use crate::compiler::layout::layout;
    use crate::isa::Opcode;

    fn info() -> crate::compiler::ast::SourceInfo {
        crate::compiler::ast::SourceInfo { file: "t.asm".into(), line: 1, column: 1 }
    }

    #[test]
    fn label_ref_is_patched_with_the_labels_linear_address() {
        let mut diags = Diagnostics::new();
        let items = vec![
            IrItem::Instruction {
                opcode: Opcode::JmpI,
                operands: vec![IrOperand::LabelRef("0".into())],
                ref_operands: vec![],
                val_operands: vec![],
                info: info(),
            },
            IrItem::LabelDef { name: "0".into(), info: info() },
            IrItem::Instruction { opcode: Opcode::Nop, operands: vec![], ref_operands: vec![], val_operands: vec![], info: info() },
        ];
        let layout_result = layout(&items, 1, None, &mut diags);
        let symbols = SymbolTable::new();
        let linked = link(layout_result, &symbols);
        assert_eq!(linked.machine_code.get("1"), Some(&Molecule::new(crate::molecule::MoleculeType::Data, 2).encode()));
    }
}
