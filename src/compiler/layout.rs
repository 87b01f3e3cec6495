//! Walks the lowered IR once, assigning every instruction and `.PLACE` write a
//! coordinate relative to the program's own local origin (spec.md §4.5.5). The
//! program is laid out in its own coordinate space; [`crate::bootstrap`] later
//! translates it into a real [`crate::environment::Environment`] at a chosen
//! origin, so nothing here ever wraps or bounds-checks against a target shape
//! except when resolving a `.PLACE` wildcard.

use super::ast::AxisSpec;
use super::diagnostics::Diagnostics;
use super::ir::{flatten_register_index, IrItem, IrOperand, RefOperand, RegisterFile};
use crate::artifact::{coord_key, SourceLocation};
use crate::molecule::{Molecule, MoleculeType, Vector};
use itertools::Itertools;
use std::collections::{BTreeMap, HashMap};

pub struct CallSite {
    pub address: i64,
    pub ref_operands: Vec<RefOperand>,
    pub val_operands: Vec<IrOperand>,
}

pub struct LayoutResult {
    pub machine_code: BTreeMap<String, i64>,
    pub initial_world_objects: BTreeMap<String, i64>,
    /// Symbol id (stringified) -> local coordinate of the labeled instruction.
    pub label_positions: HashMap<String, Vec<i64>>,
    /// Coordinate of an operand cell still holding a placeholder, and the symbol id
    /// it must resolve to once every label's position is known.
    pub patch_sites: Vec<(Vec<i64>, String)>,
    pub source_map: BTreeMap<i64, SourceLocation>,
    pub call_sites: Vec<CallSite>,
}

struct Cursor {
    pos: Vec<i64>,
    dv: Vector,
}

pub fn layout(items: &[IrItem], dims: usize, env_shape: Option<&[i64]>, diags: &mut Diagnostics) -> LayoutResult {
    let mut cursor = Cursor { pos: vec![0; dims], dv: unity_dv(dims) };
    let mut result = LayoutResult {
        machine_code: BTreeMap::new(),
        initial_world_objects: BTreeMap::new(),
        label_positions: HashMap::new(),
        patch_sites: Vec::new(),
        source_map: BTreeMap::new(),
        call_sites: Vec::new(),
    };

    for item in items {
        match item {
            IrItem::LabelDef { name, .. } => {
                result.label_positions.insert(name.clone(), cursor.pos.clone());
            }
            IrItem::SetOrigin { coord, info } => {
                if coord.len() != dims {
                    diags.error(
                        &info.file,
                        info.line,
                        format!("`.ORG` coordinate has {} axes, but this program is {}-dimensional", coord.len(), dims),
                    );
                } else {
                    cursor.pos = coord.clone();
                }
            }
            IrItem::SetDirection { dv, info } => {
                if dv.len() != dims {
                    diags.error(
                        &info.file,
                        info.line,
                        format!("`.DIR` vector has {} axes, but this program is {}-dimensional", dv.len(), dims),
                    );
                } else {
                    cursor.dv = Vector::new(dv.clone());
                }
            }
            IrItem::ProcEnter { .. } | IrItem::ProcExit { .. } => {
                // Pure position markers; the `POP %FPR...`/`PUSH %FPR...` that
                // actually marshal parameters are ordinary `Instruction` items
                // `semantic.rs` emits around these, laid out by the arm below.
            }
            IrItem::Place { value, placements, info } => {
                let coords = expand_placements(placements, env_shape, &info.file, info.line, diags);
                let encoded = Molecule::new(value.0, value.1).encode();
                for coord in coords {
                    result.initial_world_objects.insert(coord_key(&coord), encoded);
                }
            }
            IrItem::Instruction { opcode, operands, ref_operands, val_operands, info } => {
                let address = cursor.pos[0];
                result.source_map.entry(address).or_insert_with(|| SourceLocation {
                    file: info.file.clone(),
                    line: info.line,
                    text: format!("{}", opcode.mnemonic()),
                });
                result.machine_code.insert(
                    coord_key(&cursor.pos),
                    Molecule::new(MoleculeType::Code, opcode.to_byte() as i64).encode(),
                );
                if !ref_operands.is_empty() || !val_operands.is_empty() {
                    result.call_sites.push(CallSite {
                        address,
                        ref_operands: ref_operands.clone(),
                        val_operands: val_operands.clone(),
                    });
                }
                step(&mut cursor.pos, &cursor.dv, 1);
                for operand in operands {
                    write_operand(&mut result, &mut cursor, operand);
                }
            }
        }
    }
    result
}

fn unity_dv(dims: usize) -> Vector {
    let mut v = vec![0i64; dims];
    if !v.is_empty() {
        v[0] = 1;
    }
    Vector::new(v)
}

fn step(pos: &mut [i64], dv: &Vector, count: i64) {
    for (p, d) in pos.iter_mut().zip(dv.0.iter()) {
        *p += d * count;
    }
}

fn write_operand(result: &mut LayoutResult, cursor: &mut Cursor, operand: &IrOperand) {
    match operand {
        // `FormalParam` operands get the shared flat encoding (base 300) so
        // `PUSH`/`POP` can tell a `%FPR` slot apart from a `%DR` one at the same
        // raw index; every other file keeps its bare index, unchanged from
        // before this operand ever carried a file tag.
        IrOperand::Reg(RegisterFile::FormalParam, idx) => {
            result.machine_code.insert(
                coord_key(&cursor.pos),
                Molecule::new(MoleculeType::Data, flatten_register_index(RegisterFile::FormalParam, *idx) as i64).encode(),
            );
            step(&mut cursor.pos, &cursor.dv, 1);
        }
        IrOperand::Reg(_, idx) => {
            result.machine_code.insert(coord_key(&cursor.pos), Molecule::new(MoleculeType::Data, *idx as i64).encode());
            step(&mut cursor.pos, &cursor.dv, 1);
        }
        IrOperand::Imm(v) => {
            result.machine_code.insert(coord_key(&cursor.pos), Molecule::new(MoleculeType::Data, *v).encode());
            step(&mut cursor.pos, &cursor.dv, 1);
        }
        IrOperand::TypedImm(ty, v) => {
            result.machine_code.insert(coord_key(&cursor.pos), Molecule::new(*ty, *v).encode());
            step(&mut cursor.pos, &cursor.dv, 1);
        }
        IrOperand::Vec(components) => {
            for c in components {
                result.machine_code.insert(coord_key(&cursor.pos), Molecule::new(MoleculeType::Data, *c).encode());
                step(&mut cursor.pos, &cursor.dv, 1);
            }
        }
        IrOperand::LabelRef(id) => {
            result.patch_sites.push((cursor.pos.clone(), id.clone()));
            result.machine_code.insert(coord_key(&cursor.pos), Molecule::new(MoleculeType::Data, 0).encode());
            step(&mut cursor.pos, &cursor.dv, 1);
        }
    }
}

fn expand_placements(
    placements: &[Vec<AxisSpec>],
    env_shape: Option<&[i64]>,
    file: &str,
    line: u32,
    diags: &mut Diagnostics,
) -> Vec<Vec<i64>> {
    let mut coords = Vec::new();
    for axes in placements {
        let mut per_axis: Vec<Vec<i64>> = Vec::with_capacity(axes.len());
        for (axis_idx, spec) in axes.iter().enumerate() {
            let values = match spec {
                AxisSpec::Value(v) => vec![*v],
                AxisSpec::Range(a, b) => (*a..=*b).collect(),
                AxisSpec::SteppedRange(a, step, b) => {
                    if *step == 0 {
                        diags.error(file, line, "`.PLACE` stepped range cannot have a step of 0");
                        vec![*a]
                    } else if *step > 0 {
                        (*a..=*b).step_by(*step as usize).collect()
                    } else {
                        let mut v = Vec::new();
                        let mut cur = *a;
                        while cur >= *b {
                            v.push(cur);
                            cur += step;
                        }
                        v
                    }
                }
                AxisSpec::Wildcard => match env_shape.and_then(|s| s.get(axis_idx)) {
                    Some(&extent) => (0..extent).collect(),
                    None => {
                        diags.error(file, line, "`.PLACE` wildcard requires a known environment shape");
                        vec![0]
                    }
                },
            };
            per_axis.push(values);
        }
        if per_axis.iter().any(|v| v.is_empty()) {
            continue;
        }
        for combo in per_axis.into_iter().multi_cartesian_product() {
            coords.push(combo);
        }
    }
    coords
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::SourceInfo;
    use crate::compiler::ir::RegisterFile;
    use crate::isa::Opcode;

    fn info() -> SourceInfo {
        SourceInfo { file: "t.asm".into(), line: 1, column: 1 }
    }

    #[test]
    fn instruction_advances_cursor_by_one_plus_arity() {
        let mut diags = Diagnostics::new();
        let items = vec![
            IrItem::Instruction {
                opcode: Opcode::SetI,
                operands: vec![IrOperand::Reg(RegisterFile::Data, 0), IrOperand::Imm(5)],
                ref_operands: vec![],
                val_operands: vec![],
                info: info(),
            },
            IrItem::Instruction {
                opcode: Opcode::Nop,
                operands: vec![],
                ref_operands: vec![],
                val_operands: vec![],
                info: info(),
            },
        ];
        let result = layout(&items, 1, None, &mut diags);
        assert_eq!(result.machine_code.get("0"), Some(&Molecule::new(MoleculeType::Code, Opcode::SetI.to_byte() as i64).encode()));
        assert_eq!(result.machine_code.get("3"), Some(&Molecule::new(MoleculeType::Code, Opcode::Nop.to_byte() as i64).encode()));
    }

    #[test]
    fn label_def_captures_the_position_of_the_next_instruction() {
        let mut diags = Diagnostics::new();
        let items = vec![
            IrItem::Instruction { opcode: Opcode::Nop, operands: vec![], ref_operands: vec![], val_operands: vec![], info: info() },
            IrItem::LabelDef { name: "42".into(), info: info() },
            IrItem::Instruction { opcode: Opcode::Nop, operands: vec![], ref_operands: vec![], val_operands: vec![], info: info() },
        ];
        let result = layout(&items, 1, None, &mut diags);
        assert_eq!(result.label_positions.get("42"), Some(&vec![1]));
    }

    #[test]
    fn place_wildcard_needs_an_environment_shape() {
        let mut diags = Diagnostics::new();
        let items = vec![IrItem::Place {
            value: (MoleculeType::Energy, 3),
            placements: vec![vec![AxisSpec::Wildcard, AxisSpec::Value(0)]],
            info: info(),
        }];
        layout(&items, 2, None, &mut diags);
        assert!(diags.has_errors());
    }

    #[test]
    fn place_range_expands_to_every_coordinate_in_range() {
        let mut diags = Diagnostics::new();
        let items = vec![IrItem::Place {
            value: (MoleculeType::Energy, 9),
            placements: vec![vec![AxisSpec::Range(0, 2), AxisSpec::Value(5)]],
            info: info(),
        }];
        let result = layout(&items, 2, None, &mut diags);
        assert!(!diags.has_errors());
        assert_eq!(result.initial_world_objects.len(), 3);
        assert!(result.initial_world_objects.contains_key("1|5"));
    }

    #[test]
    fn org_with_wrong_axis_count_is_a_layout_error() {
        let mut diags = Diagnostics::new();
        let items = vec![IrItem::SetOrigin { coord: vec![1, 2, 3], info: info() }];
        layout(&items, 2, None, &mut diags);
        assert!(diags.has_errors());
    }
}
