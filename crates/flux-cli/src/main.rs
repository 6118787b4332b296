//! Flux command line tools.
//!
//! Provides the `flux` binary for working with stored function artifacts
//! outside the editor: listing them, regenerating program text from the
//! structural form, checking graph invariants and rewriting both artifacts.
//!
//! Exit codes: 0 = success, 1 = error, 2 = invariant violations found,
//! 3 = I/O or storage failure.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use flux_codegen::{write_function, WriterOptions};
use flux_reader::{read_structural, ReadError};
use flux_storage::{ArtifactStore, Artifacts, DirStore, FunctionKey, SqliteStore};

/// Flux dataflow function tools.
#[derive(Parser)]
#[command(name = "flux", about = "Flux dataflow function tools")]
struct Cli {
    /// Root directory of the artifact store.
    #[arg(long, env = "FLUX_STORE", default_value = ".flux", global = true)]
    store: PathBuf,

    /// Use the SQLite database at this path instead of the directory store.
    #[arg(long, env = "FLUX_DB", global = true)]
    db: Option<PathBuf>,

    /// JSON file with writer options.
    #[arg(long, env = "FLUX_WRITER_OPTIONS", global = true)]
    options: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// List stored functions.
    List,

    /// Regenerate a function's program text from its structural form.
    Render {
        /// Package import path.
        package: String,
        /// Function name.
        function: String,
    },

    /// Check a function's graph invariants.
    Check {
        /// Package import path.
        package: String,
        /// Function name.
        function: String,
    },

    /// Regenerate and rewrite both artifacts of every stored function, or
    /// of one package.
    Fmt {
        /// Only functions of this package.
        package: Option<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    process::exit(run(cli));
}

fn run(cli: Cli) -> i32 {
    let options = match load_options(cli.options.as_deref()) {
        Ok(options) => options,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return 1;
        }
    };

    let mut store: Box<dyn ArtifactStore> = match &cli.db {
        Some(path) => match SqliteStore::new(path) {
            Ok(s) => Box::new(s),
            Err(e) => {
                eprintln!("Error: failed to open database '{}': {}", path.display(), e);
                return 3;
            }
        },
        None => Box::new(DirStore::new(&cli.store)),
    };

    let mut out = io::stdout().lock();
    match cli.command {
        Commands::List => run_list(store.as_ref(), &mut out),
        Commands::Render { package, function } => {
            run_render(store.as_ref(), &FunctionKey::new(package, function), &options, &mut out)
        }
        Commands::Check { package, function } => {
            run_check(store.as_ref(), &FunctionKey::new(package, function), &mut out)
        }
        Commands::Fmt { package } => run_fmt(store.as_mut(), package.as_deref(), &options, &mut out),
    }
}

fn load_options(path: Option<&std::path::Path>) -> Result<WriterOptions, String> {
    let Some(path) = path else {
        return Ok(WriterOptions::default());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read options '{}': {}", path.display(), e))?;
    serde_json::from_str(&text).map_err(|e| format!("invalid options '{}': {}", path.display(), e))
}

/// Execute the list subcommand.
fn run_list(store: &dyn ArtifactStore, out: &mut impl Write) -> i32 {
    let keys = match store.list_functions() {
        Ok(keys) => keys,
        Err(e) => {
            eprintln!("Error: failed to list functions: {}", e);
            return 3;
        }
    };
    for key in keys {
        if writeln!(out, "{}", key).is_err() {
            return 3;
        }
    }
    0
}

/// The stored structural form of `key`, or an exit code.
fn load(store: &dyn ArtifactStore, key: &FunctionKey) -> Result<String, i32> {
    match store.load_structural(key) {
        Ok(Some(text)) => Ok(text),
        Ok(None) => {
            eprintln!("Error: function {} not found", key);
            Err(1)
        }
        Err(e) => {
            eprintln!("Error: failed to load {}: {}", key, e);
            Err(3)
        }
    }
}

/// Execute the render subcommand.
fn run_render(store: &dyn ArtifactStore, key: &FunctionKey, options: &WriterOptions, out: &mut impl Write) -> i32 {
    let text = match load(store, key) {
        Ok(text) => text,
        Err(code) => return code,
    };
    let graph = match read_structural(&text) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("Error: {}: {}", key, e);
            return 1;
        }
    };
    match write_function(&graph, options) {
        Ok(written) => match out.write_all(written.source.as_bytes()) {
            Ok(()) => 0,
            Err(_) => 3,
        },
        Err(e) => {
            eprintln!("Error: cannot write {}: {}", key, e);
            1
        }
    }
}

/// Execute the check subcommand.
fn run_check(store: &dyn ArtifactStore, key: &FunctionKey, out: &mut impl Write) -> i32 {
    let text = match load(store, key) {
        Ok(text) => text,
        Err(code) => return code,
    };
    let (lines, violated): (Vec<String>, bool) = match read_structural(&text) {
        Ok(_) => (vec![format!("{}: ok", key)], false),
        Err(ReadError::Invalid { diagnostics }) => (
            diagnostics
                .iter()
                .map(|d| format!("{}: [{}] {}", key, d.tag(), d))
                .collect(),
            true,
        ),
        Err(e) => {
            eprintln!("Error: {}: {}", key, e);
            return 1;
        }
    };
    for line in &lines {
        if writeln!(out, "{}", line).is_err() {
            return 3;
        }
    }
    if violated {
        2
    } else {
        0
    }
}

/// Execute the fmt subcommand.
fn run_fmt(store: &mut dyn ArtifactStore, package: Option<&str>, options: &WriterOptions, out: &mut impl Write) -> i32 {
    let keys = match store.list_functions() {
        Ok(keys) => keys,
        Err(e) => {
            eprintln!("Error: failed to list functions: {}", e);
            return 3;
        }
    };
    let mut code = 0;
    for key in keys.iter().filter(|k| package.map_or(true, |p| k.package == p)) {
        let text = match load(store, key) {
            Ok(text) => text,
            Err(c) => {
                code = code.max(c);
                continue;
            }
        };
        let written = match read_structural(&text)
            .map_err(|e| e.to_string())
            .and_then(|g| write_function(&g, options).map_err(|e| e.to_string()))
        {
            Ok(written) => written,
            Err(e) => {
                eprintln!("Error: {}: {}", key, e);
                code = code.max(1);
                continue;
            }
        };
        let artifacts = Artifacts {
            structural: written.structural,
            source: written.source,
        };
        let status = match store.save_function(key, &artifacts) {
            Ok(true) => "formatted",
            Ok(false) => "unchanged",
            Err(e) => {
                eprintln!("Error: failed to save {}: {}", key, e);
                code = 3;
                continue;
            }
        };
        tracing::debug!(function = %key, status, "fmt");
        if writeln!(out, "{} {}", status, key).is_err() {
            return 3;
        }
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux_core::{BranchKind, FunctionGraph, NodeKind, StructuralForm};
    use flux_storage::InMemoryStore;

    const PKG: &str = "example.com/app";

    fn store_with(graph: &FunctionGraph) -> (InMemoryStore, FunctionKey) {
        let mut store = InMemoryStore::new();
        let key = FunctionKey::new(graph.package(), graph.name());
        let written = write_function(graph, &WriterOptions::default()).unwrap();
        store
            .save_function(
                &key,
                &Artifacts {
                    structural: written.structural,
                    source: "stale".into(),
                },
            )
            .unwrap();
        (store, key)
    }

    fn output(f: impl FnOnce(&mut Vec<u8>) -> i32) -> (i32, String) {
        let mut buf = Vec::new();
        let code = f(&mut buf);
        (code, String::from_utf8(buf).unwrap())
    }

    #[test]
    fn test_cli_parses_subcommands_and_flags() {
        let cli = Cli::parse_from(["flux", "--store", "/tmp/s", "render", PKG, "Noop"]);
        assert_eq!(cli.store, PathBuf::from("/tmp/s"));
        assert!(matches!(cli.command, Commands::Render { ref function, .. } if function == "Noop"));

        let cli = Cli::parse_from(["flux", "fmt", "--db", "flux.db"]);
        assert_eq!(cli.db, Some(PathBuf::from("flux.db")));
        assert!(matches!(cli.command, Commands::Fmt { package: None }));
    }

    #[test]
    fn test_render_regenerates_program_text() {
        let (store, key) = store_with(&FunctionGraph::new(PKG, "Noop"));
        let (code, text) = output(|out| run_render(&store, &key, &WriterOptions::default(), out));
        assert_eq!(code, 0);
        assert_eq!(text, "package app\n\nfunc Noop() {\n\treturn\n}\n");
    }

    #[test]
    fn test_render_missing_function_fails() {
        let store = InMemoryStore::new();
        let key = FunctionKey::new(PKG, "Gone");
        let (code, text) = output(|out| run_render(&store, &key, &WriterOptions::default(), out));
        assert_eq!(code, 1);
        assert!(text.is_empty());
    }

    #[test]
    fn test_list_prints_keys() {
        let (store, _) = store_with(&FunctionGraph::new(PKG, "Noop"));
        let (code, text) = output(|out| run_list(&store, out));
        assert_eq!(code, 0);
        assert_eq!(text, "example.com/app.Noop\n");
    }

    #[test]
    fn test_check_reports_ok_and_violations() {
        let (store, key) = store_with(&FunctionGraph::new(PKG, "Noop"));
        let (code, text) = output(|out| run_check(&store, &key, out));
        assert_eq!(code, 0);
        assert_eq!(text, "example.com/app.Noop: ok\n");

        // A break moved out of its loop decodes but breaks an invariant.
        let mut g = FunctionGraph::new(PKG, "Bad");
        let root = g.root_block();
        let lp = g.add_node(root, NodeKind::Loop).unwrap();
        let body = g.get_node(lp).unwrap().blocks[0];
        g.add_node(
            body,
            NodeKind::Branch {
                kind: BranchKind::Break,
            },
        )
        .unwrap();
        let mut form = StructuralForm::from_graph(&g);
        let branch = form.nodes.len() - 1;
        form.nodes[branch].block = 0;
        let mut store = InMemoryStore::new();
        let key = FunctionKey::new(PKG, "Bad");
        let structural = form.to_json().unwrap();
        store
            .save_function(
                &key,
                &Artifacts {
                    structural,
                    source: String::new(),
                },
            )
            .unwrap();
        let (code, text) = output(|out| run_check(&store, &key, out));
        assert_eq!(code, 2);
        assert!(text.contains("[branch]"));
    }

    #[test]
    fn test_fmt_rewrites_then_skips() {
        let (mut store, key) = store_with(&FunctionGraph::new(PKG, "Noop"));
        let (code, text) = output(|out| run_fmt(&mut store, None, &WriterOptions::default(), out));
        assert_eq!(code, 0);
        assert_eq!(text, "formatted example.com/app.Noop\n");
        assert_eq!(
            store.load_source(&key).unwrap().as_deref(),
            Some("package app\n\nfunc Noop() {\n\treturn\n}\n")
        );

        let (code, text) = output(|out| run_fmt(&mut store, Some(PKG), &WriterOptions::default(), out));
        assert_eq!(code, 0);
        assert_eq!(text, "unchanged example.com/app.Noop\n");

        let (_, text) = output(|out| run_fmt(&mut store, Some("other"), &WriterOptions::default(), out));
        assert!(text.is_empty());
    }

    #[test]
    fn test_options_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("writer.json");
        std::fs::write(&path, r#"{"indent": "  ", "seq_comments": false}"#).unwrap();
        let options = load_options(Some(&path)).unwrap();
        assert_eq!(options.indent, "  ");
        assert!(!options.seq_comments);
        assert!(load_options(Some(&dir.path().join("missing.json"))).is_err());
    }
}
