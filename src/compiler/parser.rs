//! Recursive-descent parser turning a preprocessed token stream into an AST
//! (spec.md §4.5.3). Grounded on mettatron's `sexpr::Parser`: a cursor over a
//! token slice with `peek`/`advance`/`expect` helpers and one method per
//! production, retargeted from S-expressions to the assembly grammar §6 gives.

use super::ast::{ArgExpr, AstNode, AxisSpec, CallArgs, ProcParam, SourceInfo};
use super::lexer::{Token, TokenKind};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    UnexpectedToken { found: String, expected: String, file: String, line: u32 },
    MissingDirectiveOperand { directive: String, file: String, line: u32 },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedToken { found, expected, file, line } => {
                write!(f, "{}:{}: unexpected token {}, expected {}", file, line, found, expected)
            }
            Self::MissingDirectiveOperand { directive, file, line } => {
                write!(f, "{}:{}: directive .{} is missing a required operand", file, line, directive)
            }
        }
    }
}

impl std::error::Error for ParseError {}

pub struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

type PResult<T> = Result<T, ParseError>;

impl<'t> Parser<'t> {
    pub fn new(tokens: &'t [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn parse_program(&mut self) -> PResult<Vec<AstNode>> {
        let mut nodes = Vec::new();
        self.skip_newlines();
        while !self.at_eof() {
            nodes.push(self.parse_statement()?);
            self.skip_newlines();
        }
        Ok(nodes)
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn at_eof(&self) -> bool {
        matches!(self.current().kind, TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn skip_newlines(&mut self) {
        while matches!(self.current().kind, TokenKind::Newline) {
            self.advance();
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let tok = self.current();
        ParseError::UnexpectedToken {
            found: tok.kind.to_string(),
            expected: expected.to_string(),
            file: tok.file.clone(),
            line: tok.line,
        }
    }

    fn source_info(&self) -> SourceInfo {
        let tok = self.current();
        SourceInfo { file: tok.file.clone(), line: tok.line, column: tok.column }
    }

    fn expect_identifier(&mut self) -> PResult<String> {
        match self.current().kind.clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn expect_directive(&mut self, name: &str) -> PResult<()> {
        match &self.current().kind {
            TokenKind::Directive(d) if d.eq_ignore_ascii_case(name) => {
                self.advance();
                Ok(())
            }
            _ => Err(self.unexpected(&format!(".{}", name))),
        }
    }

    fn at_directive(&self, name: &str) -> bool {
        matches!(&self.current().kind, TokenKind::Directive(d) if d.eq_ignore_ascii_case(name))
    }

    fn end_of_statement(&self) -> bool {
        matches!(self.current().kind, TokenKind::Newline | TokenKind::Eof)
    }

    fn parse_statement(&mut self) -> PResult<AstNode> {
        if let TokenKind::Identifier(name) = self.current().kind.clone() {
            if matches!(self.tokens.get(self.pos + 1).map(|t| &t.kind), Some(TokenKind::Colon)) {
                let info = self.source_info();
                self.advance(); // identifier
                self.advance(); // colon
                if self.end_of_statement() {
                    return Ok(AstNode::Label { name, info });
                }
                let inner = self.parse_directive_or_instruction()?;
                return Ok(AstNode::Labelled { name, inner: Box::new(inner), info });
            }
        }
        self.parse_directive_or_instruction()
    }

    fn parse_directive_or_instruction(&mut self) -> PResult<AstNode> {
        match self.current().kind.clone() {
            TokenKind::Opcode(_) => self.parse_instruction(),
            TokenKind::Directive(name) => self.parse_directive(&name),
            _ => Err(self.unexpected("directive or opcode")),
        }
    }

    fn parse_instruction(&mut self) -> PResult<AstNode> {
        let info = self.source_info();
        let mnemonic = match self.advance().kind {
            TokenKind::Opcode(m) => m,
            _ => unreachable!(),
        };
        let mut args = Vec::new();
        let mut call = None;
        if mnemonic == "CALL" {
            let target = self.parse_arg_expr()?;
            let mut ref_args = Vec::new();
            let mut val_args = Vec::new();
            if self.at_keyword("REF") {
                self.advance();
                ref_args = self.parse_register_list()?;
            }
            if self.at_keyword("VAL") {
                self.advance();
                val_args = self.parse_arg_list()?;
            }
            call = Some(CallArgs { target, ref_args, val_args });
        } else {
            while !self.end_of_statement() {
                args.push(self.parse_arg_expr()?);
                if matches!(self.current().kind, TokenKind::Comma) {
                    self.advance();
                }
            }
        }
        Ok(AstNode::Instruction { mnemonic, args, call, info })
    }

    fn at_keyword(&self, word: &str) -> bool {
        matches!(&self.current().kind, TokenKind::Identifier(id) if id.eq_ignore_ascii_case(word))
    }

    fn parse_register_list(&mut self) -> PResult<Vec<String>> {
        let mut out = Vec::new();
        loop {
            match self.current().kind.clone() {
                TokenKind::Register(name) => {
                    self.advance();
                    out.push(name);
                }
                _ => break,
            }
            if matches!(self.current().kind, TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(out)
    }

    fn parse_arg_list(&mut self) -> PResult<Vec<ArgExpr>> {
        let mut out = Vec::new();
        while !self.end_of_statement() && !self.at_keyword("REF") {
            out.push(self.parse_arg_expr()?);
            if matches!(self.current().kind, TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(out)
    }

    fn parse_arg_expr(&mut self) -> PResult<ArgExpr> {
        match self.current().kind.clone() {
            TokenKind::Register(name) => {
                self.advance();
                Ok(ArgExpr::Register(name))
            }
            TokenKind::Number(n) => {
                self.advance();
                if matches!(self.current().kind, TokenKind::Pipe) {
                    let mut components = vec![n];
                    while matches!(self.current().kind, TokenKind::Pipe) {
                        self.advance();
                        components.push(self.expect_number()?);
                    }
                    Ok(ArgExpr::Vector(components))
                } else {
                    Ok(ArgExpr::Number(n))
                }
            }
            TokenKind::Identifier(word) => {
                self.advance();
                if matches!(self.current().kind, TokenKind::Colon) {
                    self.advance();
                    let n = self.expect_number()?;
                    Ok(ArgExpr::TypedImm(word, n))
                } else {
                    Ok(ArgExpr::Identifier(word))
                }
            }
            _ => Err(self.unexpected("argument")),
        }
    }

    fn expect_number(&mut self) -> PResult<i64> {
        match self.current().kind.clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(n)
            }
            _ => Err(self.unexpected("number")),
        }
    }

    fn parse_directive(&mut self, name: &str) -> PResult<AstNode> {
        let upper = name.to_ascii_uppercase();
        match upper.as_str() {
            "PROC" => self.parse_proc(),
            "SCOPE" => self.parse_scope(),
            "PLACE" => self.parse_place(),
            _ => {
                let info = self.source_info();
                self.advance(); // the directive token itself
                let mut args = Vec::new();
                while !self.end_of_statement() {
                    args.push(self.parse_arg_expr()?);
                    if matches!(self.current().kind, TokenKind::Comma) {
                        self.advance();
                    }
                }
                Ok(AstNode::Directive { name: upper, args, info })
            }
        }
    }

    fn parse_proc(&mut self) -> PResult<AstNode> {
        let info = self.source_info();
        self.expect_directive("PROC")?;
        let name = self.expect_identifier()?;
        let mut params = Vec::new();
        while !self.end_of_statement() {
            let by_ref = if self.at_keyword("REF") {
                self.advance();
                true
            } else if self.at_keyword("VAL") {
                self.advance();
                false
            } else {
                false
            };
            let param_name = match self.current().kind.clone() {
                TokenKind::Identifier(id) => {
                    self.advance();
                    id
                }
                _ => break,
            };
            params.push(ProcParam { name: param_name, by_ref });
            if matches!(self.current().kind, TokenKind::Comma) {
                self.advance();
            }
        }
        self.skip_newlines();
        let mut body = Vec::new();
        while !self.at_directive("ENDP") {
            if self.at_eof() {
                return Err(self.unexpected(".ENDP"));
            }
            body.push(self.parse_statement()?);
            self.skip_newlines();
        }
        self.expect_directive("ENDP")?;
        Ok(AstNode::Procedure { name, params, body, info })
    }

    fn parse_scope(&mut self) -> PResult<AstNode> {
        let info = self.source_info();
        self.expect_directive("SCOPE")?;
        self.skip_newlines();
        let mut body = Vec::new();
        while !self.at_directive("ENDS") {
            if self.at_eof() {
                return Err(self.unexpected(".ENDS"));
            }
            body.push(self.parse_statement()?);
            self.skip_newlines();
        }
        self.expect_directive("ENDS")?;
        Ok(AstNode::Scope { body, info })
    }

    fn parse_place(&mut self) -> PResult<AstNode> {
        let info = self.source_info();
        self.expect_directive("PLACE")?;
        let value = self.parse_arg_expr()?;
        let mut placements = vec![self.parse_one_placement()?];
        while matches!(self.current().kind, TokenKind::Comma) {
            self.advance();
            placements.push(self.parse_one_placement()?);
        }
        Ok(AstNode::Place { value, placements, info })
    }

    fn parse_one_placement(&mut self) -> PResult<Vec<AxisSpec>> {
        let mut axes = vec![self.parse_axis_spec()?];
        while matches!(self.current().kind, TokenKind::Pipe) {
            self.advance();
            axes.push(self.parse_axis_spec()?);
        }
        Ok(axes)
    }

    fn parse_axis_spec(&mut self) -> PResult<AxisSpec> {
        if matches!(self.current().kind, TokenKind::Star) {
            self.advance();
            return Ok(AxisSpec::Wildcard);
        }
        let first = self.expect_number()?;
        if matches!(self.current().kind, TokenKind::DotDot) {
            self.advance();
            let last = self.expect_number()?;
            return Ok(AxisSpec::Range(first, last));
        }
        if matches!(self.current().kind, TokenKind::Colon) {
            self.advance();
            let step = self.expect_number()?;
            if matches!(self.current().kind, TokenKind::Colon) {
                self.advance();
            }
            let last = self.expect_number()?;
            return Ok(AxisSpec::SteppedRange(first, step, last));
        }
        Ok(AxisSpec::Value(first))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::Lexer;

    fn parse(src: &str) -> Vec<AstNode> {
        let tokens = Lexer::new(src, "t.asm").tokenize().unwrap();
        Parser::new(&tokens).parse_program().unwrap()
    }

    #[test]
    fn parses_define_and_set() {
        let nodes = parse(".DEFINE V DATA:5\nSETI %DR0 V\n");
        assert_eq!(nodes.len(), 2);
        match &nodes[0] {
            AstNode::Directive { name, args, .. } => {
                assert_eq!(name, "DEFINE");
                assert_eq!(args[0], ArgExpr::Identifier("V".into()));
                assert_eq!(args[1], ArgExpr::TypedImm("DATA".into(), 5));
            }
            other => panic!("expected directive, got {:?}", other),
        }
        match &nodes[1] {
            AstNode::Instruction { mnemonic, args, .. } => {
                assert_eq!(mnemonic, "SETI");
                assert_eq!(args[0], ArgExpr::Register("DR0".into()));
                assert_eq!(args[1], ArgExpr::Identifier("V".into()));
            }
            other => panic!("expected instruction, got {:?}", other),
        }
    }

    #[test]
    fn parses_place_with_range_and_wildcard() {
        let nodes = parse(".PLACE DATA:5 3|4\n");
        match &nodes[0] {
            AstNode::Place { value, placements, .. } => {
                assert_eq!(*value, ArgExpr::TypedImm("DATA".into(), 5));
                assert_eq!(placements, &vec![vec![AxisSpec::Value(3), AxisSpec::Value(4)]]);
            }
            other => panic!("expected place, got {:?}", other),
        }

        let nodes = parse(".PLACE ENERGY:1 0..3|*\n");
        match &nodes[0] {
            AstNode::Place { placements, .. } => {
                assert_eq!(placements[0][0], AxisSpec::Range(0, 3));
                assert_eq!(placements[0][1], AxisSpec::Wildcard);
            }
            other => panic!("expected place, got {:?}", other),
        }
    }

    #[test]
    fn parses_call_with_ref_and_val() {
        let nodes = parse("CALL MYPROC REF %DR0, %DR1 VAL DATA:1\n");
        match &nodes[0] {
            AstNode::Instruction { call: Some(call), .. } => {
                assert_eq!(call.target, ArgExpr::Identifier("MYPROC".into()));
                assert_eq!(call.ref_args, vec!["DR0".to_string(), "DR1".to_string()]);
                assert_eq!(call.val_args, vec![ArgExpr::TypedImm("DATA".into(), 1)]);
            }
            other => panic!("expected call instruction, got {:?}", other),
        }
    }

    #[test]
    fn parses_a_label_sharing_a_line_with_its_instruction() {
        let nodes = parse("LOOP: NOP\n");
        match &nodes[0] {
            AstNode::Labelled { name, inner, .. } => {
                assert_eq!(name, "LOOP");
                assert!(matches!(inner.as_ref(), AstNode::Instruction { mnemonic, .. } if mnemonic == "NOP"));
            }
            other => panic!("expected labelled node, got {:?}", other),
        }
    }

    #[test]
    fn parses_proc_block() {
        let nodes = parse(".PROC INC REF X\nADDI %DR0 DATA:1\n.ENDP\n");
        match &nodes[0] {
            AstNode::Procedure { name, params, body, .. } => {
                assert_eq!(name, "INC");
                assert_eq!(params, &vec![ProcParam { name: "X".into(), by_ref: true }]);
                assert_eq!(body.len(), 1);
            }
            other => panic!("expected procedure, got {:?}", other),
        }
    }
}
