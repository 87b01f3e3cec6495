//! The assembly compiler pipeline (spec.md §4.5): lex -> preprocess -> parse ->
//! analyze -> layout -> link -> emit, grounded on mettatron's top-level
//! `compile()` (`backend/compile.rs`): one function stringing every stage
//! together and returning either the finished artifact or the errors collected
//! along the way.

pub mod ast;
pub mod diagnostics;
pub mod emit;
pub mod ir;
pub mod lexer;
pub mod linker;
pub mod parser;
pub mod preprocess;
pub mod semantic;

mod layout;

use crate::artifact::ProgramArtifact;
use diagnostics::Diagnostics;
use std::path::Path;

/// What the caller knows about the target environment at compile time. `shape` is
/// only required to resolve `.PLACE` wildcards; `dims` always determines how many
/// axes every instruction's vector operands and coordinates carry.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub dims: usize,
    pub shape: Option<Vec<i64>>,
}

/// Compiles in-memory source text, skipping include resolution (every `.INCLUDE`
/// still goes through the token-level preprocessor; there is simply no filesystem
/// to resolve a relative path against).
pub fn compile_source(program_id: &str, file: &str, source: &str, opts: &CompileOptions) -> Result<ProgramArtifact, Diagnostics> {
    let mut diags = Diagnostics::new();
    let tokens = preprocess::preprocess_source(file, source, &mut diags);
    run_pipeline(program_id, tokens, opts, diags)
}

/// Compiles an entry file from disk, resolving `.INCLUDE`/`.REQUIRE` relative to
/// its directory.
pub fn compile_file(program_id: &str, entry_path: &Path, opts: &CompileOptions) -> Result<ProgramArtifact, Diagnostics> {
    let mut diags = Diagnostics::new();
    let tokens = preprocess::preprocess(entry_path, &mut diags);
    run_pipeline(program_id, tokens, opts, diags)
}

fn run_pipeline(program_id: &str, tokens: Vec<lexer::Token>, opts: &CompileOptions, mut diags: Diagnostics) -> Result<ProgramArtifact, Diagnostics> {
    if diags.has_errors() {
        return Err(diags);
    }

    let ast = parser::Parser::new(&tokens).parse_program();
    let ast = match ast {
        Ok(ast) => ast,
        Err(e) => {
            diags.error("", 0, e.to_string());
            return Err(diags);
        }
    };

    let analysis = semantic::analyze(&ast, &mut diags);
    if diags.has_errors() {
        return Err(diags);
    }

    let layout_result = layout::layout(&analysis.ir, opts.dims, opts.shape.as_deref(), &mut diags);
    if diags.has_errors() {
        return Err(diags);
    }

    let source_map = layout_result.source_map.clone();
    let initial_world_objects = layout_result.initial_world_objects.clone();
    let link_result = linker::link(layout_result, &analysis.symbols);

    Ok(emit::emit(
        program_id,
        link_result,
        source_map,
        initial_world_objects,
        &analysis.symbols,
        analysis.token_map,
        analysis.proc_params,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_minimal_program_to_an_artifact() {
        let opts = CompileOptions { dims: 1, shape: None };
        let artifact = compile_source("p", "t.asm", "SETI %DR0 DATA:5\nNOP\n", &opts).unwrap();
        assert!(!artifact.machine_code_layout.is_empty());
        assert_eq!(artifact.program_id, "p");
    }

    #[test]
    fn a_parse_error_yields_diagnostics_instead_of_an_artifact() {
        let opts = CompileOptions { dims: 1, shape: None };
        let result = compile_source("p", "t.asm", ".PROC\n", &opts);
        assert!(result.is_err());
    }

    #[test]
    fn forward_label_reference_resolves_through_the_whole_pipeline() {
        let opts = CompileOptions { dims: 1, shape: None };
        let artifact = compile_source("p", "t.asm", "JMPI target\nNOP\ntarget:\nNOP\n", &opts).unwrap();
        assert_eq!(artifact.machine_code_layout.get("1"), Some(&crate::molecule::Molecule::new(crate::molecule::MoleculeType::Data, 3).encode()));
    }
}
