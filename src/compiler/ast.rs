//! Parse-tree node types (spec.md §4.5.3, §9 "tagged-variant AST").
//!
//! One flat, exhaustively-matched enum per tree level rather than a trait-object
//! visitor hierarchy, the replacement §9 calls for.

#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

/// An instruction or directive argument expression (spec.md §4.5.3).
#[derive(Debug, Clone, PartialEq)]
pub enum ArgExpr {
    Number(i64),
    /// `TYPE:number`, e.g. `DATA:5`.
    TypedImm(String, i64),
    /// `n1|n2|…`.
    Vector(Vec<i64>),
    /// A `%NAME` register, physical or alias.
    Register(String),
    /// A bare name: constant, label, or (for `CALL`) a REF/VAL actual.
    Identifier(String),
}

/// One axis of a `.PLACE` coordinate, which may be a single value, a range, a
/// stepped range, or a wildcard meaning "every value along this axis."
#[derive(Debug, Clone, PartialEq)]
pub enum AxisSpec {
    Value(i64),
    Range(i64, i64),
    SteppedRange(i64, i64, i64),
    Wildcard,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallArgs {
    pub target: ArgExpr,
    pub ref_args: Vec<String>,
    pub val_args: Vec<ArgExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcParam {
    pub name: String,
    /// True for a REF (by-reference) formal, false for VAL (by-value).
    pub by_ref: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AstNode {
    Label {
        name: String,
        info: SourceInfo,
    },
    Instruction {
        mnemonic: String,
        args: Vec<ArgExpr>,
        call: Option<CallArgs>,
        info: SourceInfo,
    },
    Procedure {
        name: String,
        params: Vec<ProcParam>,
        body: Vec<AstNode>,
        info: SourceInfo,
    },
    /// `.SCOPE`/`.ENDS`: flattened into its surrounding body at lowering, purely a
    /// source-level grouping with no effect on symbol visibility.
    Scope {
        body: Vec<AstNode>,
        info: SourceInfo,
    },
    Directive {
        name: String,
        args: Vec<ArgExpr>,
        info: SourceInfo,
    },
    Place {
        value: ArgExpr,
        placements: Vec<Vec<AxisSpec>>,
        info: SourceInfo,
    },
    /// A `name:` prefix sharing a line with the directive/instruction it labels.
    Labelled {
        name: String,
        inner: Box<AstNode>,
        info: SourceInfo,
    },
}

impl AstNode {
    pub fn info(&self) -> &SourceInfo {
        match self {
            Self::Label { info, .. }
            | Self::Instruction { info, .. }
            | Self::Procedure { info, .. }
            | Self::Scope { info, .. }
            | Self::Directive { info, .. }
            | Self::Place { info, .. }
            | Self::Labelled { info, .. } => info,
        }
    }
}
