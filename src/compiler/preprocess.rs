//! Token-level preprocessing: include splicing and macro/routine expansion
//! (spec.md §4.5.2). Runs before parsing so the parser never sees an include,
//! macro, or routine token.

use super::diagnostics::Diagnostics;
use super::lexer::{Lexer, Token, TokenKind};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

struct MacroDef {
    params: Vec<String>,
    body: Vec<Token>,
}

/// Reads `entry_path`, recursively splicing in `.INCLUDE`/`.REQUIRE` targets, then
/// expands every `.MACRO`/`.ENDM` and `.ROUTINE`/`.ENDR` block over the merged
/// stream. Returns the flat token stream the parser consumes.
pub fn preprocess(entry_path: &Path, diags: &mut Diagnostics) -> Vec<Token> {
    let mut in_progress = HashSet::new();
    let mut completed = HashSet::new();
    let mut tokens = splice_includes(entry_path, diags, &mut in_progress, &mut completed);
    tokens.push(Token { kind: TokenKind::Eof, line: 0, column: 0, file: entry_path.display().to_string() });
    expand_macros_and_routines(tokens, diags)
}

/// Like [`preprocess`] but over in-memory source text (used by tests and by any
/// caller that already has the source loaded).
pub fn preprocess_source(file: &str, text: &str, diags: &mut Diagnostics) -> Vec<Token> {
    let tokens = match Lexer::new(text, file).tokenize() {
        Ok(t) => t,
        Err(e) => {
            diags.error(file, 0, e.to_string());
            vec![Token { kind: TokenKind::Eof, line: 0, column: 0, file: file.to_string() }]
        }
    };
    expand_macros_and_routines(tokens, diags)
}

fn canonical_or_self(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn splice_includes(
    path: &Path,
    diags: &mut Diagnostics,
    in_progress: &mut HashSet<PathBuf>,
    completed: &mut HashSet<PathBuf>,
) -> Vec<Token> {
    let canonical = canonical_or_self(path);
    if in_progress.contains(&canonical) {
        diags.error(&path.display().to_string(), 0, format!("circular include of '{}'", path.display()));
        return Vec::new();
    }
    if completed.contains(&canonical) {
        return Vec::new();
    }
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            diags.error(&path.display().to_string(), 0, format!("cannot read '{}': {}", path.display(), e));
            return Vec::new();
        }
    };
    let file_label = path.display().to_string();
    let tokens = match Lexer::new(&text, file_label.clone()).tokenize() {
        Ok(t) => t,
        Err(e) => {
            diags.error(&file_label, 0, e.to_string());
            return Vec::new();
        }
    };

    in_progress.insert(canonical.clone());
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut out = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let tok = &tokens[i];
        let is_include = matches!(&tok.kind, TokenKind::Directive(d) if d.eq_ignore_ascii_case("INCLUDE") || d.eq_ignore_ascii_case("REQUIRE"));
        if is_include {
            if let Some(Token { kind: TokenKind::Str(rel), .. }) = tokens.get(i + 1) {
                let included_path = base_dir.join(rel);
                out.extend(splice_includes(&included_path, diags, in_progress, completed));
                i += 2;
                if matches!(tokens.get(i).map(|t| &t.kind), Some(TokenKind::Newline)) {
                    i += 1;
                }
                continue;
            } else {
                diags.error(&file_label, tok.line, "`.INCLUDE`/`.REQUIRE` requires a string path operand");
            }
        }
        if !matches!(tok.kind, TokenKind::Eof) {
            out.push(tok.clone());
        }
        i += 1;
    }
    in_progress.remove(&canonical);
    completed.insert(canonical);
    out
}

/// Finds the token index of a matching `END` directive for a block opened at
/// `start`, honoring nesting of same-kind blocks.
fn find_block_end(tokens: &[Token], start: usize, open: &str, close: &str) -> Option<usize> {
    let mut depth = 1;
    let mut i = start;
    while i < tokens.len() {
        match &tokens[i].kind {
            TokenKind::Directive(d) if d.eq_ignore_ascii_case(open) => depth += 1,
            TokenKind::Directive(d) if d.eq_ignore_ascii_case(close) => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn expand_macros_and_routines(tokens: Vec<Token>, diags: &mut Diagnostics) -> Vec<Token> {
    let mut macros: HashMap<String, MacroDef> = HashMap::new();
    let mut routines: Vec<Vec<Token>> = Vec::new();
    let mut body: Vec<Token> = Vec::new();

    let mut i = 0;
    while i < tokens.len() {
        match &tokens[i].kind {
            TokenKind::Directive(d) if d.eq_ignore_ascii_case("MACRO") => {
                let Some(end) = find_block_end(&tokens, i + 1, "MACRO", "ENDM") else {
                    diags.error(&tokens[i].file, tokens[i].line, "`.MACRO` without matching `.ENDM`");
                    break;
                };
                let (name, params) = read_macro_header(&tokens, i + 1, diags);
                let newline_after_header = tokens[i + 1..end].iter().position(|t| matches!(t.kind, TokenKind::Newline)).map(|p| i + 1 + p + 1).unwrap_or(end);
                let macro_body = tokens[newline_after_header..end].to_vec();
                macros.insert(name, MacroDef { params, body: macro_body });
                i = end + 1;
            }
            TokenKind::Directive(d) if d.eq_ignore_ascii_case("ROUTINE") => {
                let Some(end) = find_block_end(&tokens, i + 1, "ROUTINE", "ENDR") else {
                    diags.error(&tokens[i].file, tokens[i].line, "`.ROUTINE` without matching `.ENDR`");
                    break;
                };
                // A routine desugars to a procedure emitted once at end-of-stream; its
                // header (name and params) already matches `.PROC`'s grammar.
                let mut routine_tokens = vec![Token { kind: TokenKind::Directive("PROC".into()), ..tokens[i].clone() }];
                routine_tokens.extend_from_slice(&tokens[i + 1..end]);
                routine_tokens.push(Token { kind: TokenKind::Directive("ENDP".into()), ..tokens[end].clone() });
                routines.push(routine_tokens);
                i = end + 1;
            }
            _ => {
                body.push(tokens[i].clone());
                i += 1;
            }
        }
    }

    let mut expanded = expand_macro_calls(body, &macros, diags);
    let eof = if matches!(expanded.last().map(|t| &t.kind), Some(TokenKind::Eof)) {
        expanded.pop()
    } else {
        None
    };
    let mut out = expanded;
    for routine in routines {
        out.extend(routine);
    }
    out.push(eof.unwrap_or(Token { kind: TokenKind::Eof, line: 0, column: 0, file: String::new() }));
    out
}

fn read_macro_header(tokens: &[Token], start: usize, diags: &mut Diagnostics) -> (String, Vec<String>) {
    let mut i = start;
    let name = match tokens.get(i).map(|t| &t.kind) {
        Some(TokenKind::Identifier(n)) => {
            i += 1;
            n.clone()
        }
        _ => {
            diags.error(&tokens[start].file, tokens[start].line, "`.MACRO` requires a name");
            String::new()
        }
    };
    let mut params = Vec::new();
    while let Some(TokenKind::Identifier(p)) = tokens.get(i).map(|t| &t.kind) {
        params.push(p.clone());
        i += 1;
    }
    (name, params)
}

fn expand_macro_calls(tokens: Vec<Token>, macros: &HashMap<String, MacroDef>, diags: &mut Diagnostics) -> Vec<Token> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        if let TokenKind::Identifier(name) = &tokens[i].kind {
            if let Some(def) = macros.get(name) {
                let call_line = tokens[i].line;
                let call_file = tokens[i].file.clone();
                let mut j = i + 1;
                let mut arg_groups: Vec<Vec<Token>> = Vec::new();
                let mut current = Vec::new();
                while j < tokens.len() && !matches!(tokens[j].kind, TokenKind::Newline | TokenKind::Eof) {
                    if matches!(tokens[j].kind, TokenKind::Comma) {
                        arg_groups.push(std::mem::take(&mut current));
                    } else {
                        current.push(tokens[j].clone());
                    }
                    j += 1;
                }
                if !current.is_empty() || !arg_groups.is_empty() {
                    arg_groups.push(current);
                }
                if arg_groups.len() != def.params.len() {
                    diags.error(&call_file, call_line, format!("macro '{}' expects {} argument(s), found {}", name, def.params.len(), arg_groups.len()));
                }
                let substitution: HashMap<&str, &[Token]> = def
                    .params
                    .iter()
                    .zip(arg_groups.iter())
                    .map(|(p, a)| (p.as_str(), a.as_slice()))
                    .collect();
                for body_tok in &def.body {
                    if let TokenKind::Identifier(id) = &body_tok.kind {
                        if let Some(replacement) = substitution.get(id.as_str()) {
                            out.extend(replacement.iter().cloned());
                            continue;
                        }
                    }
                    out.push(body_tok.clone());
                }
                i = j + 1;
                continue;
            }
        }
        out.push(tokens[i].clone());
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind.clone()).collect()
    }

    #[test]
    fn expands_a_single_parameter_macro_call() {
        let mut diags = Diagnostics::new();
        let tokens = preprocess_source("t.asm", ".MACRO INC REG\nADDI REG DATA:1\n.ENDM\nINC %DR0\n", &mut diags);
        assert!(!diags.has_errors());
        assert_eq!(
            kinds(&tokens)[..5],
            [
                TokenKind::Opcode("ADDI".into()),
                TokenKind::Register("DR0".into()),
                TokenKind::Identifier("DATA".into()),
                TokenKind::Colon,
                TokenKind::Number(1),
            ]
        );
    }

    #[test]
    fn routine_is_emitted_once_at_end_of_stream() {
        let mut diags = Diagnostics::new();
        let tokens = preprocess_source("t.asm", "CALL HELPER\n.ROUTINE HELPER\nNOP\n.ENDR\n", &mut diags);
        assert!(!diags.has_errors());
        let kinds = kinds(&tokens);
        assert!(kinds.contains(&TokenKind::Directive("PROC".into())));
        assert!(kinds.contains(&TokenKind::Directive("ENDP".into())));
    }

    #[test]
    fn macro_arity_mismatch_is_an_error() {
        let mut diags = Diagnostics::new();
        preprocess_source("t.asm", ".MACRO INC REG\nADDI REG DATA:1\n.ENDM\nINC\n", &mut diags);
        assert!(diags.has_errors());
    }
}
