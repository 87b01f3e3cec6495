//! Tokenizer for the assembly source language (spec.md §4.5.1, §6).
//!
//! Grounded on mettatron's S-expression `Lexer` (`sexpr.rs`): a `Vec<char>` cursor
//! with `line`/`column` tracking and the same `current`/`peek`/`advance` shape,
//! retargeted at the directive/opcode/register grammar spec.md §6 defines instead
//! of parenthesized S-expressions.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// A `.NAME` directive, stored without its leading dot.
    Directive(String),
    /// A recognized opcode mnemonic.
    Opcode(String),
    /// A `%NAME` register reference, stored without its leading `%`.
    Register(String),
    Identifier(String),
    Number(i64),
    Str(String),
    Pipe,
    Colon,
    Comma,
    DotDot,
    Star,
    Newline,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directive(s) => write!(f, ".{}", s),
            Self::Opcode(s) => write!(f, "{}", s),
            Self::Register(s) => write!(f, "%{}", s),
            Self::Identifier(s) => write!(f, "{}", s),
            Self::Number(n) => write!(f, "{}", n),
            Self::Str(s) => write!(f, "\"{}\"", s),
            Self::Pipe => write!(f, "|"),
            Self::Colon => write!(f, ":"),
            Self::Comma => write!(f, ","),
            Self::DotDot => write!(f, ".."),
            Self::Star => write!(f, "*"),
            Self::Newline => write!(f, "<newline>"),
            Self::Eof => write!(f, "<eof>"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub column: u32,
    pub file: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LexError {
    UnexpectedChar { ch: char, file: String, line: u32, column: u32 },
    UnterminatedString { file: String, line: u32, column: u32 },
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedChar { ch, file, line, column } => {
                write!(f, "{}:{}:{}: unexpected character '{}'", file, line, column, ch)
            }
            Self::UnterminatedString { file, line, column } => {
                write!(f, "{}:{}:{}: unterminated string literal", file, line, column)
            }
        }
    }
}

impl std::error::Error for LexError {}

/// Mnemonics recognized as opcodes rather than bare identifiers. Populated from the
/// ISA catalog so the lexer and the ISA never drift apart.
fn is_opcode(word: &str) -> bool {
    crate::isa::Opcode::from_mnemonic(word).is_some()
}

pub struct Lexer {
    input: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    file: String,
}

impl Lexer {
    pub fn new(source: &str, file: impl Into<String>) -> Self {
        Self {
            input: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            file: file.into(),
        }
    }

    fn current(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.input.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn skip_non_newline_whitespace(&mut self) {
        while matches!(self.current(), Some(c) if c.is_whitespace() && c != '\n') {
            self.advance();
        }
    }

    fn skip_comment(&mut self) {
        if self.current() == Some('#') {
            while !matches!(self.current(), None | Some('\n')) {
                self.advance();
            }
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_non_newline_whitespace();
            self.skip_comment();
            let (line, column) = (self.line, self.column);
            let Some(ch) = self.current() else {
                tokens.push(Token { kind: TokenKind::Eof, line, column, file: self.file.clone() });
                break;
            };
            let kind = match ch {
                '\n' => {
                    self.advance();
                    TokenKind::Newline
                }
                '|' => {
                    self.advance();
                    TokenKind::Pipe
                }
                ':' => {
                    self.advance();
                    TokenKind::Colon
                }
                ',' => {
                    self.advance();
                    TokenKind::Comma
                }
                '*' => {
                    self.advance();
                    TokenKind::Star
                }
                '.' if self.peek(1) == Some('.') => {
                    self.advance();
                    self.advance();
                    TokenKind::DotDot
                }
                '"' => self.lex_string(line, column)?,
                '%' => {
                    self.advance();
                    TokenKind::Register(self.lex_word())
                }
                '.' => {
                    self.advance();
                    TokenKind::Directive(self.lex_word().to_ascii_uppercase())
                }
                c if c == '-' || c.is_ascii_digit() => self.lex_number(),
                c if c.is_alphabetic() || c == '_' => {
                    let word = self.lex_word();
                    if is_opcode(&word) {
                        TokenKind::Opcode(word.to_ascii_uppercase())
                    } else {
                        TokenKind::Identifier(word)
                    }
                }
                other => {
                    return Err(LexError::UnexpectedChar { ch: other, file: self.file.clone(), line, column });
                }
            };
            tokens.push(Token { kind, line, column, file: self.file.clone() });
        }
        Ok(tokens)
    }

    fn lex_word(&mut self) -> String {
        let mut word = String::new();
        while matches!(self.current(), Some(c) if c.is_alphanumeric() || c == '_' || c == '.') {
            word.push(self.advance().unwrap());
        }
        word
    }

    fn lex_number(&mut self) -> TokenKind {
        let mut text = String::new();
        if self.current() == Some('-') {
            text.push(self.advance().unwrap());
        }
        while matches!(self.current(), Some(c) if c.is_ascii_digit()) {
            text.push(self.advance().unwrap());
        }
        TokenKind::Number(text.parse().unwrap_or(0))
    }

    fn lex_string(&mut self, line: u32, column: u32) -> Result<TokenKind, LexError> {
        self.advance(); // opening quote
        let mut text = String::new();
        loop {
            match self.current() {
                None | Some('\n') => {
                    return Err(LexError::UnterminatedString { file: self.file.clone(), line, column });
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some(c) => {
                    text.push(c);
                    self.advance();
                }
            }
        }
        Ok(TokenKind::Str(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src, "test.asm")
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_a_define_and_seti() {
        let kinds = kinds(".DEFINE V DATA:5\nSETI %DR0 V\n");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Directive("DEFINE".into()),
                TokenKind::Identifier("V".into()),
                TokenKind::Identifier("DATA".into()),
                TokenKind::Colon,
                TokenKind::Number(5),
                TokenKind::Newline,
                TokenKind::Opcode("SETI".into()),
                TokenKind::Register("DR0".into()),
                TokenKind::Identifier("V".into()),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_run_to_end_of_line() {
        let kinds = kinds("NOP # a trailing comment\nNOP\n");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Opcode("NOP".into()),
                TokenKind::Newline,
                TokenKind::Opcode("NOP".into()),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn vector_literal_lexes_as_numbers_separated_by_pipes() {
        let kinds = kinds("1|2|-3\n");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Number(1),
                TokenKind::Pipe,
                TokenKind::Number(2),
                TokenKind::Pipe,
                TokenKind::Number(-3),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let result = Lexer::new("\"abc\n", "test.asm").tokenize();
        assert!(matches!(result, Err(LexError::UnterminatedString { .. })));
    }
}
