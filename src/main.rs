//! `compile` - the compiler CLI surface kept from the host project's command
//! dispatcher (spec.md §6): the only piece of the original CLI that survives,
//! since it is the boundary artifact consumers (the runtime, debug tools) sit
//! behind. Grounded on mettatron's `main.rs` hand-rolled `parse_args`/exit-code
//! convention: no argument-parsing crate, plain `env::args()` plus a match.

use evochora::compiler::{compile_file, CompileOptions};
use std::env;
use std::path::PathBuf;
use std::process;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_usage() {
    eprintln!("evochora-compile {}", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    compile --file <PATH> [--env <WxH[xD][:flat|:toroidal]>]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    --file <PATH>   Entry assembly source file (required)");
    eprintln!("    --env <SHAPE>   Target environment shape, e.g. 80x40 or 80x40x4:flat");
    eprintln!("                    Needed only to resolve .PLACE wildcards; default is toroidal");
    eprintln!("    -h, --help      Print this help message");
    eprintln!("    -v, --version   Print version information");
    eprintln!();
    eprintln!("Emits the compiled program artifact as JSON on stdout.");
}

fn print_version() {
    println!("evochora-compile {}", VERSION);
}

struct Options {
    file: PathBuf,
    dims: usize,
    shape: Option<Vec<i64>>,
}

/// Parses `WxHxD[:flat|:toroidal]`. The topology suffix is accepted for
/// symmetry with the runtime's own `--env` flag but does not affect
/// compilation: only the axis extents matter, for `.PLACE` wildcard expansion.
fn parse_env_shape(spec: &str) -> Result<Vec<i64>, String> {
    let dims_part = spec.split(':').next().unwrap_or(spec);
    let mut shape = Vec::new();
    for axis in dims_part.split('x') {
        let extent: i64 = axis
            .parse()
            .map_err(|_| format!("invalid --env shape '{}': '{}' is not an integer", spec, axis))?;
        if extent <= 0 {
            return Err(format!("invalid --env shape '{}': axis extents must be positive", spec));
        }
        shape.push(extent);
    }
    if shape.is_empty() {
        return Err(format!("invalid --env shape '{}': at least one axis is required", spec));
    }
    Ok(shape)
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();

    let mut file = None;
    let mut shape = None;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                process::exit(0);
            }
            "--file" => {
                i += 1;
                let value = args.get(i).ok_or_else(|| "missing path after --file".to_string())?;
                file = Some(PathBuf::from(value));
            }
            "--env" => {
                i += 1;
                let value = args.get(i).ok_or_else(|| "missing shape after --env".to_string())?;
                shape = Some(parse_env_shape(value)?);
            }
            other => {
                return Err(format!("unknown argument: {}", other));
            }
        }
        i += 1;
    }

    let file = file.ok_or_else(|| "missing required --file <PATH>".to_string())?;
    let dims = shape.as_ref().map(|s| s.len()).unwrap_or(2);

    Ok(Options { file, dims, shape })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .without_time()
        .init();

    let options = match parse_args() {
        Ok(options) => options,
        Err(message) => {
            eprintln!("[ERROR] {}", message);
            process::exit(1);
        }
    };

    let program_id = options
        .file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "program".to_string());

    let opts = CompileOptions { dims: options.dims, shape: options.shape.clone() };

    let artifact = match compile_file(&program_id, &options.file, &opts) {
        Ok(artifact) => artifact,
        Err(diags) => {
            for entry in diags.entries() {
                eprintln!("{}", entry);
            }
            process::exit(1);
        }
    };

    match serde_json::to_string_pretty(&artifact) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("[ERROR] failed to serialize artifact: {}", e);
            process::exit(2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_two_axis_shape() {
        assert_eq!(parse_env_shape("80x40").unwrap(), vec![80, 40]);
    }

    #[test]
    fn parses_a_shape_with_a_topology_suffix() {
        assert_eq!(parse_env_shape("80x40x4:flat").unwrap(), vec![80, 40, 4]);
    }

    #[test]
    fn rejects_a_non_numeric_axis() {
        assert!(parse_env_shape("80xNaN").is_err());
    }

    #[test]
    fn rejects_a_zero_axis() {
        assert!(parse_env_shape("0x10").is_err());
    }
}
