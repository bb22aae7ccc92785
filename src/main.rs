use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use kiln::bytecode::disasm::{print_module, print_module_stats};
use kiln::diagnostics::Diagnostic;
use kiln::emit::load_artifact;
use kiln::token_dumper::TokenDumper;
use kiln::{CompileSession, CompilerConfig};

/// Extension of binary artifacts; such inputs are disassembled instead of
/// compiled.
const ARTIFACT_EXTENSION: &str = "kbc";
const SNAPSHOT_EXTENSION: &str = "kbs";

/// kiln source-to-bytecode compiler
#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Compiles kiln source into stack-machine bytecode")]
struct Args {
    /// Source file, or a .kbc artifact to disassemble
    file: PathBuf,

    /// Output path (defaults to the input with a .kbc or .kbs extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Show tokens only
    #[arg(long)]
    tokens: bool,

    /// Disable ANSI colors in the token dump
    #[arg(long)]
    no_color: bool,

    /// Print lexemes instead of Debug output in the token dump
    #[arg(long)]
    pretty: bool,

    /// Print the transformed AST and stop
    #[arg(long)]
    ast: bool,

    /// Print a disassembly of the compiled module
    #[arg(long, alias = "bytecode")]
    bc: bool,

    /// Print bytecode statistics
    #[arg(long)]
    stats: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = EmitKind::Artifact)]
    emit: EmitKind,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Skip constant folding
    #[arg(long)]
    no_fold: bool,

    /// Skip dead-code elimination
    #[arg(long)]
    no_dce: bool,

    /// Keep comments in the token stream
    #[arg(long)]
    preserve_comments: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EmitKind {
    /// Binary module artifact
    Artifact,
    /// postcard snapshot of the compiled module
    Snapshot,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if !run(&args)? {
        std::process::exit(1);
    }
    Ok(())
}

/// Returns false when the unit failed.
fn run(args: &Args) -> Result<bool> {
    if has_extension(&args.file, ARTIFACT_EXTENSION) {
        let bytes = fs::read(&args.file).with_context(|| format!("failed to read '{}'", args.file.display()))?;
        let module =
            load_artifact(&bytes).with_context(|| format!("'{}' is not a valid artifact", args.file.display()))?;
        print_module(&module);
        if args.stats {
            print_module_stats(&module);
        }
        return Ok(true);
    }

    let source =
        fs::read_to_string(&args.file).with_context(|| format!("failed to read '{}'", args.file.display()))?;
    let mut session = CompileSession::with_config(load_config(args)?);

    if args.tokens {
        let mut dumper = TokenDumper::new();
        if args.no_color {
            dumper = dumper.no_color();
        }
        if args.pretty {
            dumper = dumper.pretty();
        }
        dumper.dump(&session.tokens(&source));
        return Ok(true);
    }

    if args.ast {
        let (unit, diagnostics) = session.transform(&source);
        report(&args.file, &diagnostics);
        println!("{:#?}", unit);
        return Ok(!diagnostics.iter().any(Diagnostic::fails_unit));
    }

    let output = session.compile(&source);
    report(&args.file, &output.diagnostics);
    let failed = output.failed();
    let Some(module) = output.module else {
        return Ok(false);
    };

    if args.bc {
        print_module(&module);
    }
    if args.stats {
        print_module_stats(&module);
    }

    let (bytes, extension) = match args.emit {
        EmitKind::Artifact => (module.to_bytes()?, ARTIFACT_EXTENSION),
        EmitKind::Snapshot => (
            module
                .to_snapshot()
                .map_err(|e| anyhow::anyhow!("snapshot encoding failed: {}", e))?,
            SNAPSHOT_EXTENSION,
        ),
    };
    let path = args
        .output
        .clone()
        .unwrap_or_else(|| args.file.with_extension(extension));
    fs::write(&path, &bytes).with_context(|| format!("failed to write '{}'", path.display()))?;
    tracing::info!(path = %path.display(), bytes = bytes.len(), "wrote output");

    Ok(!failed)
}

fn load_config(args: &Args) -> Result<CompilerConfig> {
    let mut config = match &args.config {
        Some(path) => CompilerConfig::load(path)?,
        None => CompilerConfig::default(),
    };
    if args.no_fold {
        config.fold_constants = false;
    }
    if args.no_dce {
        config.eliminate_dead_code = false;
    }
    if args.preserve_comments {
        config.preserve_comments = true;
    }
    Ok(config)
}

fn report(file: &Path, diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        let severity = if diagnostic.fails_unit() { "error" } else { "warning" };
        eprintln!("{}: {}: {}", file.display(), severity, diagnostic);
        if let Some(hint) = diagnostic.hint() {
            eprintln!("  hint: {}", hint);
        }
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(extension)
}
