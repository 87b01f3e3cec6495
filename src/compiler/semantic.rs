//! Symbol table construction and AST→IR lowering (spec.md §4.5.4, §4.5.5).
//!
//! Two sequential passes over the same node list: the first registers every
//! label/procedure symbol so later code can call forward; the second resolves
//! constants, register aliases, and references while lowering each node to IR.
//! Forward references to `.DEFINE`/`.REG`/`.PREG` are not supported — those must
//! precede their use, as in most assemblers.

use super::ast::{ArgExpr, AstNode, CallArgs as AstCallArgs, ProcParam};
use super::diagnostics::Diagnostics;
use super::ir::{IrItem, IrOperand, RefOperand, RegisterFile};
use crate::artifact::{TokenInfo, TokenPosition};
use crate::isa::{ArgSource, Opcode};
use crate::molecule::MoleculeType;
use crate::organism::{DATA_REGISTER_COUNT, FORMAL_PARAM_REGISTER_COUNT, LOCATION_REGISTER_COUNT, PROC_REGISTER_COUNT};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    Number(i64),
    TypedImm(MoleculeType, i64),
    Vector(Vec<i64>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SymbolKind {
    Procedure { arity: usize },
    Label,
    Constant(ConstantValue),
    RegisterAlias(RegisterFile, usize),
    Parameter,
}

impl SymbolKind {
    fn tag(&self) -> &'static str {
        match self {
            Self::Procedure { .. } => "PROCEDURE",
            Self::Label => "LABEL",
            Self::Constant(_) => "CONSTANT",
            Self::RegisterAlias(..) => "REGISTER_ALIAS",
            Self::Parameter => "PARAMETER",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub id: u64,
    pub name: String,
    pub kind: SymbolKind,
    pub module: String,
    pub exported: bool,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    by_module_name: HashMap<(String, String), u64>,
    by_id: HashMap<u64, Symbol>,
    next_id: u64,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u64) -> Option<&Symbol> {
        self.by_id.get(&id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Symbol> {
        self.by_id.values()
    }

    fn define(
        &mut self,
        module: &str,
        name: &str,
        kind: SymbolKind,
        exported: bool,
        diags: &mut Diagnostics,
        file: &str,
        line: u32,
    ) -> u64 {
        let key = (module.to_string(), name.to_string());
        if let Some(&existing) = self.by_module_name.get(&key) {
            diags.error(file, line, format!("duplicate symbol '{}' in module '{}'", name, module));
            return existing;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.by_module_name.insert(key, id);
        self.by_id.insert(id, Symbol { id, name: name.to_string(), kind, module: module.to_string(), exported });
        id
    }

    fn lookup_in_module(&self, module: &str, name: &str) -> Option<&Symbol> {
        self.by_module_name.get(&(module.to_string(), name.to_string())).and_then(|id| self.by_id.get(id))
    }
}

const GLOBAL_MODULE: &str = "global";

fn split_qualified(name: &str) -> Option<(&str, &str)> {
    name.split_once('.')
}

/// Maps a physical register name (without `%`) to its register file and index.
/// Checked in descending prefix length so `FPR0` isn't mistaken for `PR` + garbage.
fn parse_physical_register(name: &str) -> Option<(RegisterFile, usize)> {
    if let Some(rest) = name.strip_prefix("FPR") {
        return rest.parse().ok().filter(|&n: &usize| n < FORMAL_PARAM_REGISTER_COUNT).map(|n| (RegisterFile::FormalParam, n));
    }
    if let Some(rest) = name.strip_prefix("DR") {
        return rest.parse().ok().filter(|&n: &usize| n < DATA_REGISTER_COUNT).map(|n| (RegisterFile::Data, n));
    }
    if let Some(rest) = name.strip_prefix("PR") {
        return rest.parse().ok().filter(|&n: &usize| n < PROC_REGISTER_COUNT).map(|n| (RegisterFile::Proc, n));
    }
    if let Some(rest) = name.strip_prefix("LR") {
        return rest.parse().ok().filter(|&n: &usize| n < LOCATION_REGISTER_COUNT).map(|n| (RegisterFile::Location, n));
    }
    None
}

struct Ctx {
    symbols: SymbolTable,
    current_module: String,
    import_aliases: HashMap<String, String>,
    reg_alias_scopes: Vec<HashMap<String, (RegisterFile, usize)>>,
    param_scopes: Vec<HashMap<String, (bool, usize)>>,
    token_map: Vec<(TokenPosition, TokenInfo)>,
    proc_params: std::collections::BTreeMap<String, Vec<String>>,
    /// `by_ref` flag per declared parameter, keyed by procedure name, populated
    /// during `predeclare`. Lets a CALL site validate its REF/VAL actual counts
    /// against the callee's real signature (spec.md §4.3 CALL step 3) before
    /// any marshalling instructions are emitted.
    proc_signatures: HashMap<String, Vec<bool>>,
    /// How many leading `%FPR` slots are REF parameters, one entry per `.PROC`
    /// currently being lowered (pushed/popped alongside `param_scopes`). Tells
    /// `lower_instruction`'s `RET` handling how many `%FPR` slots to push back
    /// onto the stack before each return inside that procedure's body.
    proc_ref_counts: Vec<usize>,
}

impl Ctx {
    fn new() -> Self {
        Self {
            symbols: SymbolTable::new(),
            current_module: GLOBAL_MODULE.to_string(),
            import_aliases: HashMap::new(),
            reg_alias_scopes: vec![HashMap::new()],
            param_scopes: Vec::new(),
            token_map: Vec::new(),
            proc_params: std::collections::BTreeMap::new(),
            proc_signatures: HashMap::new(),
            proc_ref_counts: Vec::new(),
        }
    }

    fn record_token(&mut self, text: &str, kind: &str, is_definition: bool, file: &str, line: u32, column: u32) {
        self.token_map.push((
            TokenPosition { file: file.to_string(), line, column },
            TokenInfo { token_text: text.to_string(), symbol_kind: kind.to_string(), scope: self.current_module.clone(), is_definition },
        ));
    }
}

pub struct AnalysisResult {
    pub symbols: SymbolTable,
    pub ir: Vec<IrItem>,
    pub token_map: Vec<(TokenPosition, TokenInfo)>,
    pub proc_params: std::collections::BTreeMap<String, Vec<String>>,
}

pub fn analyze(program: &[AstNode], diags: &mut Diagnostics) -> AnalysisResult {
    let mut ctx = Ctx::new();
    predeclare(program, &mut ctx, diags);
    ctx.current_module = GLOBAL_MODULE.to_string();
    let ir = lower_items(program, &mut ctx, diags);
    AnalysisResult { symbols: ctx.symbols, ir, token_map: ctx.token_map, proc_params: ctx.proc_params }
}

/// Pass 1: registers every label and procedure name so instructions can reference
/// them regardless of declaration order.
fn predeclare(nodes: &[AstNode], ctx: &mut Ctx, diags: &mut Diagnostics) {
    for node in nodes {
        match node {
            AstNode::Directive { name, args, info } if name == "MODULE" => {
                if let Some(ArgExpr::Identifier(m)) = args.first() {
                    ctx.current_module = m.clone();
                } else {
                    diags.error(&info.file, info.line, "`.MODULE` requires a module name operand");
                }
            }
            AstNode::Label { name, info } => {
                ctx.symbols.define(&ctx.current_module.clone(), name, SymbolKind::Label, false, diags, &info.file, info.line);
            }
            AstNode::Labelled { name, info, .. } => {
                ctx.symbols.define(&ctx.current_module.clone(), name, SymbolKind::Label, false, diags, &info.file, info.line);
            }
            AstNode::Procedure { name, params, body, info } => {
                ctx.symbols.define(
                    &ctx.current_module.clone(),
                    name,
                    SymbolKind::Procedure { arity: params.len() },
                    false,
                    diags,
                    &info.file,
                    info.line,
                );
                ctx.proc_signatures.insert(name.clone(), params.iter().map(|p| p.by_ref).collect());
                predeclare(body, ctx, diags);
            }
            AstNode::Scope { body, .. } => predeclare(body, ctx, diags),
            _ => {}
        }
    }
}

/// Pass 2: resolves constants/aliases/references and lowers into IR, in source order.
fn lower_items(nodes: &[AstNode], ctx: &mut Ctx, diags: &mut Diagnostics) -> Vec<IrItem> {
    let mut out = Vec::new();
    for node in nodes {
        lower_one(node, ctx, diags, &mut out);
    }
    out
}

fn lower_one(node: &AstNode, ctx: &mut Ctx, diags: &mut Diagnostics, out: &mut Vec<IrItem>) {
    match node {
        AstNode::Label { name, info } => {
            let id = resolve_own_label(ctx, name);
            out.push(IrItem::LabelDef { name: id.to_string(), info: info.clone() });
        }
        AstNode::Labelled { name, inner, info } => {
            let id = resolve_own_label(ctx, name);
            out.push(IrItem::LabelDef { name: id.to_string(), info: info.clone() });
            lower_one(inner, ctx, diags, out);
        }
        AstNode::Instruction { mnemonic, args, call, info } => {
            lower_instruction(mnemonic, args, call.as_ref(), info, ctx, diags, out);
        }
        AstNode::Procedure { name, params, body, info } => {
            let id = resolve_own_label(ctx, name);
            out.push(IrItem::LabelDef { name: id.to_string(), info: info.clone() });
            out.push(IrItem::ProcEnter { arity: params.len(), info: info.clone() });
            for param in params {
                if Opcode::from_mnemonic(&param.name).is_some() {
                    diags.error(&info.file, info.line, format!("parameter '{}' collides with an opcode mnemonic", param.name));
                }
                let scoped_name = format!("{}::{}", name, param.name);
                ctx.symbols.define(&ctx.current_module.clone(), &scoped_name, SymbolKind::Parameter, false, diags, &info.file, info.line);
            }
            ctx.proc_params.insert(name.clone(), params.iter().map(|p| p.name.clone()).collect());
            // Spec.md §4.5.5: the caller pushes REF actuals (reverse order) and
            // SETIs VAL actuals directly into the high `%FPR` slots before CALL;
            // here, right after entry, pop the REF actuals back off the stack
            // into the low slots `param_bindings` assigned them (forward order,
            // so the first POP lands the first REF actual in `%FPR0`).
            let ref_count = params.iter().filter(|p| p.by_ref).count();
            for i in 0..ref_count {
                out.push(IrItem::Instruction {
                    opcode: Opcode::Pop,
                    operands: vec![IrOperand::Reg(RegisterFile::FormalParam, i)],
                    ref_operands: Vec::new(),
                    val_operands: Vec::new(),
                    info: info.clone(),
                });
            }
            ctx.param_scopes.push(param_bindings(params));
            ctx.reg_alias_scopes.push(HashMap::new());
            ctx.proc_ref_counts.push(ref_count);
            out.extend(lower_items(body, ctx, diags));
            ctx.proc_ref_counts.pop();
            ctx.reg_alias_scopes.pop();
            ctx.param_scopes.pop();
            out.push(IrItem::ProcExit { info: info.clone() });
        }
        AstNode::Scope { body, .. } => {
            out.extend(lower_items(body, ctx, diags));
        }
        AstNode::Place { value, placements, info } => {
            let typed = expect_typed_imm(value, ctx, diags, info);
            out.push(IrItem::Place { value: typed, placements: placements.clone(), info: info.clone() });
        }
        AstNode::Directive { name, args, info } => lower_directive(name, args, info, ctx, diags, out),
    }
}

/// Assigns each parameter its `%FPR` slot: REF parameters fill the low slots in
/// declaration order, VAL parameters fill the remaining high slots, regardless
/// of how REF/VAL are interleaved in the `.PROC` header. This lets the callee's
/// `ProcEnter` POP exactly `0..ref_count` without knowing the VAL actuals'
/// positions, and lets the caller SETI each VAL actual straight to its slot.
fn param_bindings(params: &[ProcParam]) -> HashMap<String, (bool, usize)> {
    let ref_count = params.iter().filter(|p| p.by_ref).count();
    let mut next_ref = 0;
    let mut next_val = ref_count;
    params
        .iter()
        .map(|p| {
            let idx = if p.by_ref {
                let i = next_ref;
                next_ref += 1;
                i
            } else {
                let i = next_val;
                next_val += 1;
                i
            };
            (p.name.clone(), (p.by_ref, idx))
        })
        .collect()
}

fn resolve_own_label(ctx: &mut Ctx, name: &str) -> u64 {
    ctx.symbols
        .lookup_in_module(&ctx.current_module, name)
        .map(|s| s.id)
        .unwrap_or_else(|| {
            // Defined during predeclare(); absence means a bug in pass symmetry, not
            // a user-facing error, so fall back to a fresh id rather than panicking.
            ctx.symbols.define(&ctx.current_module.clone(), name, SymbolKind::Label, false, &mut Diagnostics::new(), "", 0)
        })
}

fn lower_directive(name: &str, args: &[ArgExpr], info: &super::ast::SourceInfo, ctx: &mut Ctx, diags: &mut Diagnostics, out: &mut Vec<IrItem>) {
    match name {
        "MODULE" => {
            if let Some(ArgExpr::Identifier(m)) = args.first() {
                ctx.current_module = m.clone();
            }
        }
        // `.REQUIRE`/`.INCLUDE` never reach here: `preprocess::splice_includes`
        // consumes them (and splices the named file's tokens in directly) before
        // semantic analysis ever sees the token stream.
        "IMPORT" => {
            if let (Some(ArgExpr::Identifier(canonical)), Some(ArgExpr::Identifier(alias))) = (args.first(), args.get(1)) {
                ctx.import_aliases.insert(alias.clone(), canonical.clone());
            } else if let Some(ArgExpr::Identifier(canonical)) = args.first() {
                ctx.import_aliases.insert(canonical.clone(), canonical.clone());
            } else {
                diags.error(&info.file, info.line, format!("`.{}` requires a module operand", name));
            }
        }
        "EXPORT" => {
            for arg in args {
                if let ArgExpr::Identifier(sym_name) = arg {
                    export_symbol(ctx, sym_name);
                } else {
                    diags.error(&info.file, info.line, "`.EXPORT` operands must be identifiers");
                }
            }
        }
        "DEFINE" => {
            if let (Some(ArgExpr::Identifier(const_name)), Some(value_expr)) = (args.first(), args.get(1)) {
                let value = lower_constant_literal(value_expr, ctx, diags, info);
                ctx.symbols.define(
                    &ctx.current_module.clone(),
                    const_name,
                    SymbolKind::Constant(value),
                    false,
                    diags,
                    &info.file,
                    info.line,
                );
                ctx.record_token(const_name, "CONSTANT", true, &info.file, info.line, info.column);
            } else {
                diags.error(&info.file, info.line, "`.DEFINE` requires a name and a value");
            }
        }
        "REG" | "PREG" => {
            if let (Some(ArgExpr::Register(alias_name)), Some(ArgExpr::Number(idx))) = (args.first(), args.get(1)) {
                let binding = (RegisterFile::Data, *idx as usize);
                let scope = if name == "REG" { ctx.reg_alias_scopes.first_mut() } else { ctx.reg_alias_scopes.last_mut() };
                if let Some(scope) = scope {
                    scope.insert(alias_name.clone(), binding);
                }
                ctx.symbols.define(
                    &ctx.current_module.clone(),
                    alias_name,
                    SymbolKind::RegisterAlias(RegisterFile::Data, *idx as usize),
                    false,
                    diags,
                    &info.file,
                    info.line,
                );
            } else {
                diags.error(&info.file, info.line, format!("`.{}` requires a register and an index", name));
            }
        }
        "ORG" => {
            let coord = expect_coord(args, ctx, diags, info);
            out.push(IrItem::SetOrigin { coord, info: info.clone() });
        }
        "DIR" => {
            let dv = expect_coord(args, ctx, diags, info);
            out.push(IrItem::SetDirection { dv, info: info.clone() });
        }
        other => {
            diags.warn(&info.file, info.line, format!("directive `.{}` has no effect in this implementation", other));
        }
    }
}

fn export_symbol(ctx: &mut Ctx, name: &str) {
    let module = ctx.current_module.clone();
    if let Some(&id) = ctx_lookup_id(ctx, &module, name) {
        if let Some(sym) = ctx.symbols.by_id.get_mut(&id) {
            sym.exported = true;
        }
    }
}

fn ctx_lookup_id<'a>(ctx: &'a Ctx, module: &str, name: &str) -> Option<&'a u64> {
    ctx.symbols.by_module_name.get(&(module.to_string(), name.to_string()))
}

fn expect_coord(args: &[ArgExpr], ctx: &mut Ctx, diags: &mut Diagnostics, info: &super::ast::SourceInfo) -> Vec<i64> {
    match args.first() {
        Some(ArgExpr::Vector(v)) => v.clone(),
        Some(ArgExpr::Number(n)) => vec![*n],
        Some(ArgExpr::Identifier(name)) => match lower_constant_literal(&ArgExpr::Identifier(name.clone()), ctx, diags, info) {
            ConstantValue::Vector(v) => v,
            ConstantValue::Number(n) => vec![n],
            ConstantValue::TypedImm(_, n) => vec![n],
        },
        _ => {
            diags.error(&info.file, info.line, "expected a coordinate vector");
            Vec::new()
        }
    }
}

fn expect_typed_imm(expr: &ArgExpr, ctx: &mut Ctx, diags: &mut Diagnostics, info: &super::ast::SourceInfo) -> (MoleculeType, i64) {
    match lower_constant_literal(expr, ctx, diags, info) {
        ConstantValue::TypedImm(t, n) => (t, n),
        ConstantValue::Number(n) => (MoleculeType::Data, n),
        ConstantValue::Vector(_) => {
            diags.error(&info.file, info.line, "`.PLACE` value must be a typed literal, not a vector");
            (MoleculeType::Data, 0)
        }
    }
}

fn parse_molecule_type(name: &str) -> Option<MoleculeType> {
    match name.to_ascii_uppercase().as_str() {
        "CODE" => Some(MoleculeType::Code),
        "DATA" => Some(MoleculeType::Data),
        "ENERGY" => Some(MoleculeType::Energy),
        "STRUCTURE" => Some(MoleculeType::Structure),
        _ => None,
    }
}

fn lower_constant_literal(expr: &ArgExpr, ctx: &mut Ctx, diags: &mut Diagnostics, info: &super::ast::SourceInfo) -> ConstantValue {
    match expr {
        ArgExpr::Number(n) => ConstantValue::Number(*n),
        ArgExpr::Vector(v) => ConstantValue::Vector(v.clone()),
        ArgExpr::TypedImm(type_name, n) => match parse_molecule_type(type_name) {
            Some(t) => ConstantValue::TypedImm(t, *n),
            None => {
                diags.error(&info.file, info.line, format!("unknown molecule type '{}'", type_name));
                ConstantValue::TypedImm(MoleculeType::Data, *n)
            }
        },
        ArgExpr::Identifier(name) => match resolve_reference(ctx, name) {
            Some(Symbol { kind: SymbolKind::Constant(value), .. }) => value.clone(),
            _ => {
                diags.error(&info.file, info.line, format!("unresolved reference '{}'", name));
                ConstantValue::Number(0)
            }
        },
        ArgExpr::Register(name) => {
            diags.error(&info.file, info.line, format!("expected a value, found register '%{}'", name));
            ConstantValue::Number(0)
        }
    }
}

fn resolve_reference<'a>(ctx: &'a Ctx, name: &str) -> Option<&'a Symbol> {
    if let Some((qualifier, tail)) = split_qualified(name) {
        let canonical = ctx.import_aliases.get(qualifier)?;
        let sym = ctx.symbols.lookup_in_module(canonical, tail)?;
        return sym.exported.then_some(sym);
    }
    ctx.symbols
        .lookup_in_module(&ctx.current_module, name)
        .or_else(|| ctx.symbols.lookup_in_module(GLOBAL_MODULE, name))
}

fn resolve_register(ctx: &Ctx, name: &str) -> Option<(RegisterFile, usize)> {
    if let Some(reg) = parse_physical_register(name) {
        return Some(reg);
    }
    for scope in ctx.reg_alias_scopes.iter().rev() {
        if let Some(&binding) = scope.get(name) {
            return Some(binding);
        }
    }
    // REF and VAL parameters resolve identically here: both live in `%FPR`
    // slots `param_bindings` assigned (REF low, VAL high), and a read or write
    // against either is just an ordinary access to that slot. `by_ref` only
    // matters at `.PROC` entry/`RET` (how many slots get pushed back onto the
    // stack) and at the CALL site (actual-count validation against the
    // declared signature) — both already wired through `proc_ref_counts` and
    // `proc_signatures`, not through this per-access lookup.
    if let Some(&(_, idx)) = ctx.param_scopes.last().and_then(|s| s.get(name)) {
        return Some((RegisterFile::FormalParam, idx));
    }
    None
}

fn lower_instruction(
    mnemonic: &str,
    args: &[ArgExpr],
    call: Option<&AstCallArgs>,
    info: &super::ast::SourceInfo,
    ctx: &mut Ctx,
    diags: &mut Diagnostics,
    out: &mut Vec<IrItem>,
) {
    let Some(opcode) = Opcode::from_mnemonic(mnemonic) else {
        diags.error(&info.file, info.line, format!("unknown opcode '{}'", mnemonic));
        return;
    };
    let written_sources: Vec<ArgSource> = opcode
        .info()
        .sources
        .iter()
        .copied()
        .filter(|s| !matches!(s, ArgSource::Stack | ArgSource::VectorStack))
        .collect();

    if opcode == Opcode::Call {
        let Some(call) = call else {
            diags.error(&info.file, info.line, "CALL requires a target label");
            return;
        };
        let target = lower_operand(&call.target, ArgSource::Immediate, ctx, diags, info);
        let ref_operands: Vec<RefOperand> = call
            .ref_args
            .iter()
            .filter_map(|reg| {
                resolve_register(ctx, reg)
                    .map(|(file, index)| RefOperand { file, index })
                    .or_else(|| {
                        diags.error(&info.file, info.line, format!("invalid register '%{}'", reg));
                        None
                    })
            })
            .collect();
        let val_operands: Vec<IrOperand> = call.val_args.iter().map(|a| lower_operand(a, ArgSource::Immediate, ctx, diags, info)).collect();

        if let ArgExpr::Identifier(proc_name) = &call.target {
            if let Some(signature) = ctx.proc_signatures.get(proc_name) {
                let expected_refs = signature.iter().filter(|by_ref| **by_ref).count();
                let expected_vals = signature.len() - expected_refs;
                if ref_operands.len() != expected_refs || val_operands.len() != expected_vals {
                    diags.error(
                        &info.file,
                        info.line,
                        format!(
                            "CALL to '{}' passes {} REF/{} VAL actual(s), but it declares {} REF/{} VAL parameter(s)",
                            proc_name,
                            ref_operands.len(),
                            val_operands.len(),
                            expected_refs,
                            expected_vals,
                        ),
                    );
                }
            }
        }

        // spec.md §4.3 CALL step 3/4: relay every actual into the callee's
        // `%FPR` bank. REF actuals round-trip through the data stack (PUSH here
        // in reverse order, POP at the callee's `ProcEnter` in forward order,
        // so `%FPR0` ends up holding the first REF actual); VAL actuals are a
        // one-way copy, so a direct `SETI` into the slot is simpler and safer
        // than forcing them through a scratch register to reach `PUSH`.
        let ref_count = ref_operands.len();
        for reg in ref_operands.iter().rev() {
            out.push(IrItem::Instruction {
                opcode: Opcode::Push,
                operands: vec![IrOperand::Reg(reg.file, reg.index)],
                ref_operands: Vec::new(),
                val_operands: Vec::new(),
                info: info.clone(),
            });
        }
        for (i, val) in val_operands.iter().enumerate() {
            out.push(IrItem::Instruction {
                opcode: Opcode::SetI,
                operands: vec![IrOperand::Reg(RegisterFile::FormalParam, ref_count + i), val.clone()],
                ref_operands: Vec::new(),
                val_operands: Vec::new(),
                info: info.clone(),
            });
        }

        let writeback_targets = ref_operands.clone();
        out.push(IrItem::Instruction { opcode, operands: vec![target], ref_operands, val_operands, info: info.clone() });

        // RET step 1 pushed `%FPR0..ref_count-1` back onto the stack (reverse
        // order); pop them here (forward order) into the real REF actuals.
        for reg in &writeback_targets {
            out.push(IrItem::Instruction {
                opcode: Opcode::Pop,
                operands: vec![IrOperand::Reg(reg.file, reg.index)],
                ref_operands: Vec::new(),
                val_operands: Vec::new(),
                info: info.clone(),
            });
        }
        return;
    }

    if opcode == Opcode::Ret {
        let ref_count = ctx.proc_ref_counts.last().copied().unwrap_or(0);
        for i in (0..ref_count).rev() {
            out.push(IrItem::Instruction {
                opcode: Opcode::Push,
                operands: vec![IrOperand::Reg(RegisterFile::FormalParam, i)],
                ref_operands: Vec::new(),
                val_operands: Vec::new(),
                info: info.clone(),
            });
        }
        out.push(IrItem::Instruction { opcode, operands: Vec::new(), ref_operands: Vec::new(), val_operands: Vec::new(), info: info.clone() });
        return;
    }

    if args.len() != written_sources.len() {
        diags.error(
            &info.file,
            info.line,
            format!("'{}' expects {} operand(s), found {}", mnemonic, written_sources.len(), args.len()),
        );
    }
    let operands: Vec<IrOperand> = args
        .iter()
        .zip(written_sources.iter())
        .map(|(arg, &source)| lower_operand(arg, source, ctx, diags, info))
        .collect();
    out.push(IrItem::Instruction { opcode, operands, ref_operands: Vec::new(), val_operands: Vec::new(), info: info.clone() });
}

fn lower_operand(arg: &ArgExpr, source: ArgSource, ctx: &mut Ctx, diags: &mut Diagnostics, info: &super::ast::SourceInfo) -> IrOperand {
    match (arg, source) {
        (ArgExpr::Register(name), ArgSource::Register | ArgSource::VectorRegister) => match resolve_register(ctx, name) {
            Some((file, idx)) => {
                ctx.record_token(name, "REGISTER_ALIAS", false, &info.file, info.line, info.column);
                IrOperand::Reg(file, idx)
            }
            None => {
                diags.error(&info.file, info.line, format!("invalid register index '%{}'", name));
                IrOperand::Reg(RegisterFile::Data, 0)
            }
        },
        (ArgExpr::Vector(v), ArgSource::VectorImmediate) => IrOperand::Vec(v.clone()),
        (ArgExpr::Identifier(name), ArgSource::VectorImmediate) => match resolve_reference(ctx, name) {
            Some(sym) => {
                ctx.record_token(name, sym.kind.tag(), false, &info.file, info.line, info.column);
                match &sym.kind {
                    SymbolKind::Constant(ConstantValue::Vector(v)) => IrOperand::Vec(v.clone()),
                    _ => {
                        diags.error(&info.file, info.line, format!("'{}' is not a vector constant", name));
                        IrOperand::Vec(Vec::new())
                    }
                }
            }
            None => {
                diags.error(&info.file, info.line, format!("unresolved reference '{}'", name));
                IrOperand::Vec(Vec::new())
            }
        },
        (ArgExpr::Number(n), ArgSource::Immediate) => IrOperand::Imm(*n),
        (ArgExpr::TypedImm(t, n), ArgSource::Immediate) => match parse_molecule_type(t) {
            Some(t) => IrOperand::TypedImm(t, *n),
            None => {
                diags.error(&info.file, info.line, format!("unknown molecule type '{}'", t));
                IrOperand::TypedImm(MoleculeType::Data, *n)
            }
        },
        (ArgExpr::Identifier(name), ArgSource::Immediate) => match resolve_reference(ctx, name) {
            Some(sym) => {
                ctx.record_token(name, sym.kind.tag(), false, &info.file, info.line, info.column);
                match &sym.kind {
                    SymbolKind::Constant(ConstantValue::Number(n)) => IrOperand::Imm(*n),
                    SymbolKind::Constant(ConstantValue::TypedImm(t, n)) => IrOperand::TypedImm(*t, *n),
                    SymbolKind::Constant(ConstantValue::Vector(_)) => {
                        diags.error(&info.file, info.line, format!("'{}' is a vector, expected a scalar", name));
                        IrOperand::Imm(0)
                    }
                    SymbolKind::Label | SymbolKind::Procedure { .. } => IrOperand::LabelRef(sym.id.to_string()),
                    SymbolKind::RegisterAlias(..) | SymbolKind::Parameter => {
                        diags.error(&info.file, info.line, format!("'{}' cannot be used as an immediate", name));
                        IrOperand::Imm(0)
                    }
                }
            }
            None => {
                diags.error(&info.file, info.line, format!("unresolved reference '{}'", name));
                IrOperand::Imm(0)
            }
        },
        (other, expected) => {
            diags.error(&info.file, info.line, format!("argument {:?} does not match expected source {:?}", other, expected));
            IrOperand::Imm(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::Lexer;
    use crate::compiler::parser::Parser;

    fn analyze_source(src: &str) -> (AnalysisResult, Diagnostics) {
        let tokens = Lexer::new(src, "t.asm").tokenize().unwrap();
        let ast = Parser::new(&tokens).parse_program().unwrap();
        let mut diags = Diagnostics::new();
        let result = analyze(&ast, &mut diags);
        (result, diags)
    }

    #[test]
    fn define_then_seti_resolves_the_constant() {
        let (result, diags) = analyze_source(".DEFINE V DATA:5\nSETI %DR0 V\n");
        assert!(!diags.has_errors());
        match &result.ir[1] {
            IrItem::Instruction { opcode, operands, .. } => {
                assert_eq!(*opcode, Opcode::SetI);
                assert_eq!(operands[0], IrOperand::Reg(RegisterFile::Data, 0));
                assert_eq!(operands[1], IrOperand::TypedImm(MoleculeType::Data, 5));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn reg_alias_resolves_to_the_aliased_physical_register() {
        let (result, diags) = analyze_source(".REG %X 0\nSETI %X DATA:123\n");
        assert!(!diags.has_errors());
        match &result.ir[1] {
            IrItem::Instruction { operands, .. } => {
                assert_eq!(operands[0], IrOperand::Reg(RegisterFile::Data, 0));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn forward_reference_to_a_label_resolves() {
        let (result, diags) = analyze_source("JMPI TARGET\nTARGET:\nNOP\n");
        assert!(!diags.has_errors());
        match &result.ir[0] {
            IrItem::Instruction { operands, .. } => {
                assert!(matches!(&operands[0], IrOperand::LabelRef(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn duplicate_label_is_an_error() {
        let (_, diags) = analyze_source("A:\nNOP\nA:\nNOP\n");
        assert!(diags.has_errors());
    }

    #[test]
    fn unresolved_reference_is_an_error() {
        let (_, diags) = analyze_source("SETI %DR0 NOSUCHCONST\n");
        assert!(diags.has_errors());
    }

    #[test]
    fn arity_mismatch_is_an_error() {
        let (_, diags) = analyze_source("ADDR %DR0\n");
        assert!(diags.has_errors());
    }
}
