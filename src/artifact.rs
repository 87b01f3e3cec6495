//! The compiler's frozen output: machine code, initial cell placements, and debug
//! maps (spec.md §3, §6).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A coordinate serialized as a flat vector of axis values (stable under JSON, and
/// orderable so `BTreeMap` keys produce deterministic artifact output).
pub type RelCoord = Vec<i64>;

/// A molecule, encoded to its single-integer wire form (spec.md §3).
pub type EncodedMolecule = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub token_text: String,
    pub symbol_kind: String,
    pub scope: String,
    pub is_definition: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPosition {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

/// The compiler's single frozen deliverable (spec.md §3 "ProgramArtifact").
///
/// `BTreeMap` everywhere a Rust `HashMap` would otherwise do, so that JSON
/// serialization is byte-identical across compilations of the same source
/// (spec.md §8: "Compilation is deterministic").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramArtifact {
    pub program_id: String,
    pub machine_code_layout: BTreeMap<String, EncodedMolecule>,
    pub initial_world_objects: BTreeMap<String, EncodedMolecule>,
    pub label_address_to_name: BTreeMap<i64, String>,
    pub register_alias_map: BTreeMap<String, usize>,
    pub proc_name_to_param_names: BTreeMap<String, Vec<String>>,
    pub source_map: BTreeMap<i64, SourceLocation>,
    pub token_map: Vec<(TokenPosition, TokenInfo)>,
    pub call_site_bindings: BTreeMap<i64, Vec<String>>,
}

/// Renders a coordinate the same way everywhere so map keys round-trip through
/// JSON (object keys must be strings) and stay human-readable in CLI output.
pub fn coord_key(coord: &[i64]) -> String {
    coord
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join("|")
}

pub fn parse_coord_key(key: &str) -> RelCoord {
    key.split('|').filter_map(|p| p.parse().ok()).collect()
}

impl ProgramArtifact {
    pub fn new(program_id: impl Into<String>) -> Self {
        Self {
            program_id: program_id.into(),
            machine_code_layout: BTreeMap::new(),
            initial_world_objects: BTreeMap::new(),
            label_address_to_name: BTreeMap::new(),
            register_alias_map: BTreeMap::new(),
            proc_name_to_param_names: BTreeMap::new(),
            source_map: BTreeMap::new(),
            token_map: Vec::new(),
            call_site_bindings: BTreeMap::new(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coord_key_round_trips() {
        let coord = vec![3, -4, 0];
        assert_eq!(parse_coord_key(&coord_key(&coord)), coord);
    }

    #[test]
    fn artifact_round_trips_through_json() {
        let mut artifact = ProgramArtifact::new("test-program");
        artifact.machine_code_layout.insert(coord_key(&[0, 0]), 5);
        let json = artifact.to_json().unwrap();
        let back = ProgramArtifact::from_json(&json).unwrap();
        assert_eq!(back.program_id, "test-program");
        assert_eq!(back.machine_code_layout.get("0|0"), Some(&5));
    }
}
