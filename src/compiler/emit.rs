//! Assembles the final [`ProgramArtifact`] from a linked layout plus the symbol
//! table and token map semantic analysis produced (spec.md §3, §4.5.6).

use super::ir::flatten_register_index;
use super::linker::LinkResult;
use super::semantic::{SymbolKind, SymbolTable};
use crate::artifact::{ProgramArtifact, SourceLocation, TokenInfo, TokenPosition};
use std::collections::BTreeMap;

pub fn emit(
    program_id: &str,
    link: LinkResult,
    source_map: BTreeMap<i64, SourceLocation>,
    initial_world_objects: BTreeMap<String, i64>,
    symbols: &SymbolTable,
    token_map: Vec<(TokenPosition, TokenInfo)>,
    proc_params: BTreeMap<String, Vec<String>>,
) -> ProgramArtifact {
    let mut artifact = ProgramArtifact::new(program_id);
    artifact.machine_code_layout = link.machine_code;
    artifact.initial_world_objects = initial_world_objects;
    artifact.label_address_to_name = link.label_address_to_name;
    artifact.call_site_bindings = link.call_site_bindings;
    artifact.source_map = source_map;
    artifact.token_map = token_map;
    artifact.proc_name_to_param_names = proc_params;

    for symbol in symbols.all() {
        if let SymbolKind::RegisterAlias(kind, index) = &symbol.kind {
            artifact.register_alias_map.insert(symbol.name.clone(), flatten_register_index(*kind, *index));
        }
    }
    artifact
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::coord_key;

    #[test]
    fn emit_copies_every_linked_map_into_the_artifact() {
        let mut machine_code = BTreeMap::new();
        machine_code.insert(coord_key(&[0]), 5);
        let link = LinkResult {
            machine_code,
            label_address_to_name: BTreeMap::new(),
            call_site_bindings: BTreeMap::new(),
        };
        let symbols = SymbolTable::new();
        let artifact = emit("p", link, BTreeMap::new(), BTreeMap::new(), &symbols, Vec::new(), BTreeMap::new());
        assert_eq!(artifact.machine_code_layout.get("0"), Some(&5));
        assert_eq!(artifact.program_id, "p");
    }
}
