//! The value stored in a single environment cell or register: a typed scalar, with
//! an alternate vector representation for instruction arguments and direction/
//! location registers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The four cell type-tags (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MoleculeType {
    Code,
    Data,
    Energy,
    Structure,
}

impl MoleculeType {
    /// Tag bits occupy the high bits of the serialized integer.
    const TAG_SHIFT: u32 = 58;

    pub fn from_tag_bits(bits: u64) -> Option<Self> {
        match bits {
            0 => Some(Self::Code),
            1 => Some(Self::Data),
            2 => Some(Self::Energy),
            3 => Some(Self::Structure),
            _ => None,
        }
    }

    fn tag_bits(self) -> u64 {
        match self {
            Self::Code => 0,
            Self::Data => 1,
            Self::Energy => 2,
            Self::Structure => 3,
        }
    }
}

impl fmt::Display for MoleculeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code => write!(f, "CODE"),
            Self::Data => write!(f, "DATA"),
            Self::Energy => write!(f, "ENERGY"),
            Self::Structure => write!(f, "STRUCTURE"),
        }
    }
}

/// A single typed cell value: (type-tag, scalar). Serializes to one i64 where the
/// high bits hold the type tag and the low bits hold the scalar (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Molecule {
    pub mol_type: MoleculeType,
    pub scalar: i64,
}

impl Molecule {
    pub const SCALAR_MASK: u64 = (1u64 << MoleculeType::TAG_SHIFT) - 1;
    const SIGN_BIT: u64 = 1u64 << (MoleculeType::TAG_SHIFT - 1);

    pub fn new(mol_type: MoleculeType, scalar: i64) -> Self {
        Self { mol_type, scalar }
    }

    /// Empty cells are DATA with scalar 0 (spec.md §3).
    pub fn empty() -> Self {
        Self::new(MoleculeType::Data, 0)
    }

    pub fn is_empty(&self) -> bool {
        self.mol_type == MoleculeType::Data && self.scalar == 0
    }

    /// Pack into a single integer for storage/serialization.
    pub fn encode(self) -> i64 {
        let tag = self.mol_type.tag_bits() << MoleculeType::TAG_SHIFT;
        let scalar = (self.scalar as u64) & Self::SCALAR_MASK;
        (tag | scalar) as i64
    }

    /// Unpack a previously-encoded integer. Falls back to the empty molecule if the
    /// tag bits are out of range (never errors, matching C1's total-read contract).
    pub fn decode(encoded: i64) -> Self {
        let bits = encoded as u64;
        let tag = bits >> MoleculeType::TAG_SHIFT;
        let raw_scalar = bits & Self::SCALAR_MASK;
        let scalar = if raw_scalar & Self::SIGN_BIT != 0 {
            (raw_scalar | !Self::SCALAR_MASK) as i64
        } else {
            raw_scalar as i64
        };
        match MoleculeType::from_tag_bits(tag) {
            Some(mol_type) => Self::new(mol_type, scalar),
            None => Self::empty(),
        }
    }
}

impl Default for Molecule {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for Molecule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.mol_type, self.scalar)
    }
}

/// A fixed-arity tuple of signed integers, used for direction vectors, location
/// registers, and coordinate-forming instruction arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vector(pub Vec<i64>);

impl Vector {
    pub fn new(components: Vec<i64>) -> Self {
        Self(components)
    }

    pub fn zero(dims: usize) -> Self {
        Self(vec![0; dims])
    }

    pub fn dims(&self) -> usize {
        self.0.len()
    }

    /// A unit vector has exactly one component equal to +-1 and all others 0
    /// (spec.md GLOSSARY).
    pub fn is_unity(&self) -> bool {
        let mut nonzero = 0;
        for &c in &self.0 {
            match c {
                0 => {}
                1 | -1 => nonzero += 1,
                _ => return false,
            }
        }
        nonzero == 1
    }

    pub fn add(&self, other: &Vector) -> Vector {
        Vector(
            self.0
                .iter()
                .zip(other.0.iter())
                .map(|(a, b)| a + b)
                .collect(),
        )
    }

    pub fn scale(&self, factor: i64) -> Vector {
        Vector(self.0.iter().map(|c| c * factor).collect())
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", parts.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn molecule_round_trips_through_encode_decode() {
        for (t, s) in [
            (MoleculeType::Code, 0),
            (MoleculeType::Data, 5),
            (MoleculeType::Energy, -17),
            (MoleculeType::Structure, 9),
        ] {
            let m = Molecule::new(t, s);
            assert_eq!(Molecule::decode(m.encode()), m);
        }
    }

    #[test]
    fn empty_molecule_is_data_zero() {
        let m = Molecule::empty();
        assert!(m.is_empty());
        assert_eq!(m.mol_type, MoleculeType::Data);
        assert_eq!(m.scalar, 0);
    }

    #[test]
    fn unity_vector_rule() {
        assert!(Vector::new(vec![1, 0]).is_unity());
        assert!(Vector::new(vec![0, -1, 0]).is_unity());
        assert!(!Vector::new(vec![1, 1]).is_unity());
        assert!(!Vector::new(vec![0, 0]).is_unity());
        assert!(!Vector::new(vec![2, 0]).is_unity());
    }

    #[test]
    fn negative_scalar_round_trips() {
        let m = Molecule::new(MoleculeType::Data, -1);
        assert_eq!(Molecule::decode(m.encode()), m);
    }
}
