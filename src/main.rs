//! Anvil command line driver
//!
//! Loads a JSON compilation unit, resolves every declaration and reports
//! the diagnostics.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{debug, info};

use anvil::feedback::{CheckFeedback, CheckStats, ErrorReport, TypeEntry};
use anvil::frontend::ast::DeclKind;
use anvil::frontend::semantic::Context;
use anvil::frontend::unit::{load_unit, LoadedUnit, UnitFile};
use anvil::middle::expr_gen::GenContext;
use anvil::middle::ir_printer::print_ir;

/// Anvil type checker
#[derive(Parser, Debug)]
#[command(name = "anvilc")]
#[command(author = "Z1529")]
#[command(version = "0.1.0")]
#[command(about = "Anvil - type resolution and IR lowering for compilation units")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve every declaration of a unit and report diagnostics
    Check {
        /// Unit file (.json)
        input: PathBuf,

        /// Diagnostic output format
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,

        /// Print the resolved type of every declaration
        #[arg(long)]
        emit_types: bool,

        /// Print the IR declarations of variables and functions
        #[arg(long)]
        emit_ir: bool,
    },
    /// Print version information
    Version,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check {
            input,
            format,
            emit_types,
            emit_ir,
        } => match check_file(&input, format, emit_types, emit_ir) {
            Ok(true) => {}
            Ok(false) => process::exit(1),
            Err(e) => {
                eprintln!("Error: {:#}", e);
                process::exit(1);
            }
        },
        Commands::Version => {
            println!("anvilc 0.1.0");
            println!("Anvil type resolver");
            println!("License: Apache-2.0");
        }
    }
}

/// Check a unit file. Returns whether it resolved without errors.
fn check_file(input: &Path, format: Format, emit_types: bool, emit_ir: bool) -> Result<bool> {
    let start = Instant::now();
    let text = fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
    let unit = UnitFile::from_json(&text).with_context(|| format!("parsing {}", input.display()))?;

    let mut ctx = Context::default();
    let loaded = match load_unit(&mut ctx, &unit) {
        Ok(loaded) => loaded,
        Err(e) => {
            let report = ErrorReport::from_error(&e, &LoadedUnit::default());
            emit_reports(input, format, vec![report], None, CheckStats::default());
            return Ok(false);
        }
    };
    let load_time = start.elapsed();
    info!("loaded {} declarations from {}", loaded.decls.len(), input.display());

    let resolved = ctx.resolve_all();
    let resolve_time = start.elapsed() - load_time;
    debug!("resolution finished in {:?}", resolve_time);

    let mut diagnostics: Vec<ErrorReport> = ctx
        .diagnostics
        .iter()
        .map(|e| ErrorReport::from_error(e, &loaded))
        .collect();

    let ir = if emit_ir && resolved {
        match lower_declarations(&ctx, &loaded, module_name(input)) {
            Ok(ir) => Some(ir),
            Err(e) => {
                diagnostics.push(ErrorReport::from_error(&e, &loaded));
                None
            }
        }
    } else {
        None
    };

    let types = emit_types.then(|| type_entries(&ctx, &loaded));
    let stats = CheckStats {
        module_count: unit.modules.len(),
        decl_count: loaded.decls.len(),
        type_count: ctx.types.len(),
        load_time_ms: load_time.as_millis() as u64,
        resolve_time_ms: resolve_time.as_millis() as u64,
        total_time_ms: start.elapsed().as_millis() as u64,
    };
    let success = emit_reports(input, format, diagnostics, types, stats);

    if let Some(ir) = ir {
        println!("{}", ir);
    }
    Ok(success && resolved)
}

fn module_name(input: &Path) -> &str {
    input.file_stem().and_then(|s| s.to_str()).unwrap_or("module")
}

fn type_entries(ctx: &Context, loaded: &LoadedUnit) -> Vec<TypeEntry> {
    loaded
        .decls
        .iter()
        .map(|&id| {
            let decl = ctx.decl(id);
            TypeEntry {
                name: format!("{}::{}", ctx.module_name(decl.module), decl.name.name),
                kind: decl.kind.describe().to_string(),
                ty: decl.ty.map(|ty| ctx.types.name(ty).to_string()),
            }
        })
        .collect()
}

/// Module storage for every variable and a declaration for every function
fn lower_declarations(ctx: &Context, loaded: &LoadedUnit, name: &str) -> anvil::utils::Result<String> {
    let mut codegen = GenContext::new(ctx, name)?;
    for &id in &loaded.decls {
        match ctx.decl(id).kind {
            DeclKind::Var { .. } => {
                codegen.add_global(id)?;
            }
            DeclKind::Func { .. } => {
                codegen.declare_function(id)?;
            }
            _ => {}
        }
    }
    Ok(print_ir(&codegen.finish()?))
}

/// Print the reports; returns whether none of them is an error
fn emit_reports(
    input: &Path,
    format: Format,
    diagnostics: Vec<ErrorReport>,
    types: Option<Vec<TypeEntry>>,
    stats: CheckStats,
) -> bool {
    let mut feedback = CheckFeedback::new(input.display().to_string(), diagnostics, stats);
    feedback.types = types;

    match format {
        Format::Json => println!("{}", feedback.to_json()),
        Format::Text => {
            for report in &feedback.diagnostics {
                eprint!("{}", report.render_text());
            }
            if let Some(types) = &feedback.types {
                for entry in types {
                    match &entry.ty {
                        Some(ty) => println!("{}: {}", entry.name, ty),
                        None => println!("{}: <{}>", entry.name, entry.kind),
                    }
                }
            }
            if feedback.diagnostics.is_empty() {
                println!("No errors found in {}", input.display());
            } else {
                let errors = feedback.diagnostics.len();
                eprintln!("{} diagnostic(s) in {}", errors, input.display());
            }
        }
    }
    feedback.success
}
