//! LuaScript compiler CLI

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use luascript_ast::parse_program;
use luascript_codegen::{Artifact, BackendManager, CompileOptions, CompileOutput, LuaVersion, Target};
use luascript_error::{Diagnostic, DiagnosticRenderer, Diagnostics, ErrorCode, SourceCache};
use luascript_ir::{lower_with, validate, validate_json, LowerOptions, Module};
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};
use tracing::{debug, info, Level};

const DEFAULT_PARSER: &str = "acorn --ecma2022 --locations";

/// What the input file contains
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum InputKind {
    /// IR JSON document
    Ir,
    /// JavaScript source, parsed by the external parser
    Js,
    /// ESTree JSON
    Ast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TargetArg {
    Lua,
    Wasm,
    Llvm,
    Mlir,
    /// Every registered backend
    All,
}

impl TargetArg {
    fn target(self) -> Option<Target> {
        match self {
            TargetArg::Lua => Some(Target::Lua),
            TargetArg::Wasm => Some(Target::Wasm),
            TargetArg::Llvm => Some(Target::Llvm),
            TargetArg::Mlir => Some(Target::Mlir),
            TargetArg::All => None,
        }
    }
}

#[derive(Parser)]
#[command(name = "luascript")]
#[command(version)]
#[command(about = "Compiles JavaScript to Lua, WebAssembly, LLVM IR and MLIR", long_about = None)]
struct Cli {
    /// More logging on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// JSON file with compile options
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct InputArgs {
    /// Input file
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Input format (default: from the extension and contents)
    #[arg(long = "as", value_name = "KIND")]
    kind: Option<InputKind>,

    /// ESTree parser command; the file path is appended
    #[arg(long, env = "LUASCRIPT_PARSER", default_value = DEFAULT_PARSER)]
    parser: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Validates an IR document, or lowers a program and validates the result
    Check {
        #[command(flatten)]
        input: InputArgs,
    },

    /// Prints the lowered IR as JSON
    Ir {
        #[command(flatten)]
        input: InputArgs,

        /// Output file (default: stdout)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Compiles to one or all targets
    Compile {
        #[command(flatten)]
        input: InputArgs,

        /// Code generation target
        #[arg(short, long, default_value = "lua")]
        target: TargetArg,

        /// Output file, or directory with `-t all` (default: stdout for text targets)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Optimization level
        #[arg(short = 'O', value_name = "LEVEL", value_parser = clap::value_parser!(u8).range(0..=3))]
        opt_level: Option<u8>,

        /// Target triple for LLVM output
        #[arg(long, value_name = "TRIPLE")]
        triple: Option<String>,

        /// Lua version to emit (5.1 or 5.4)
        #[arg(long, value_name = "VERSION")]
        lua_version: Option<String>,

        /// Annotate output with source positions
        #[arg(short = 'g', long)]
        debug_info: bool,
    },

    /// Prints the JSON-Schema document describing the IR
    Schema {
        /// Output file (default: stdout)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

/// Diagnostics collected before the command gave up.
struct Failure(Diagnostics);

impl From<Diagnostic> for Failure {
    fn from(diagnostic: Diagnostic) -> Self {
        Failure(std::iter::once(diagnostic).collect())
    }
}

type CliResult<T> = Result<T, Failure>;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut cache = SourceCache::new();
    let result = run(cli, &mut cache);
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(Failure(diagnostics)) => {
            let mut renderer = DiagnosticRenderer::new(&cache);
            if !std::io::stderr().is_terminal() {
                renderer = renderer.without_colors();
            }
            for diagnostic in diagnostics.iter() {
                eprintln!("{}", renderer.render(diagnostic));
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run(cli: Cli, cache: &mut SourceCache) -> CliResult<()> {
    let mut options = load_options(cli.config.as_deref())?;

    match cli.command {
        Commands::Check { input } => {
            let kind = input_kind(&input)?;
            if kind == InputKind::Ir {
                let text = read(&input.input)?;
                let report = validate_json(&text);
                if !report.ok {
                    return Err(validation_failure(&input.input, &report.errors));
                }
                println!("{}: valid IR", input.input.display());
                return Ok(());
            }
            let module = load_module(&input, kind, cache)?;
            println!("{}: ok ({} nodes)", input.input.display(), module.len());
            Ok(())
        }

        Commands::Ir { input, output } => {
            let kind = input_kind(&input)?;
            let module = load_module(&input, kind, cache)?;
            let json = module
                .to_json_pretty()
                .map_err(|e| Diagnostic::error(e.to_string()).with_code(ErrorCode::INVALID_IR_JSON))?;
            write_text(output.as_deref(), &json)
        }

        Commands::Compile {
            input,
            target,
            output,
            opt_level,
            triple,
            lua_version,
            debug_info,
        } => {
            if let Some(level) = opt_level {
                options.opt_level = level;
            }
            if let Some(triple) = triple {
                options.target_triple = triple;
            }
            if let Some(version) = lua_version {
                options.lua.version = parse_lua_version(&version)?;
            }
            options.debug_info |= debug_info;

            let kind = input_kind(&input)?;
            let module = load_module(&input, kind, cache)?;
            let manager = BackendManager::with_defaults(&options);
            debug!(?options, "compiling");

            match target.target() {
                Some(target) => {
                    let result = manager
                        .compile(&module, target.as_str())
                        .map_err(|e| Diagnostic::from(&e))?;
                    let artifact = check_output(result)?;
                    let path = output.or_else(|| (target == Target::Wasm).then(|| default_output(&input.input, target)));
                    write_artifact(path.as_deref(), &artifact)
                }
                None => {
                    let directory = match output {
                        Some(dir) => dir,
                        None => input.input.parent().map(Path::to_path_buf).unwrap_or_default(),
                    };
                    fs::create_dir_all(&directory).map_err(|e| io_error(&directory, e))?;
                    let mut failed = Diagnostics::new();
                    for result in manager.compile_all_parallel(&module) {
                        let target = result.target;
                        match check_output(result) {
                            Ok(artifact) => {
                                let name = default_output(&input.input, target);
                                let path = directory.join(name.file_name().unwrap_or(name.as_os_str()));
                                write_artifact(Some(&path), &artifact)?;
                                info!(%target, path = %path.display(), "wrote artifact");
                            }
                            Err(Failure(diagnostics)) => failed.extend(diagnostics),
                        }
                    }
                    if failed.has_errors() {
                        return Err(Failure(failed));
                    }
                    Ok(())
                }
            }
        }

        Commands::Schema { output } => {
            let schema = luascript_ir::validate::json_schema();
            let text = serde_json::to_string_pretty(&schema)
                .map_err(|e| Diagnostic::error(e.to_string()).with_code(ErrorCode::INVALID_IR_JSON))?;
            write_text(output.as_deref(), &text)
        }
    }
}

fn load_options(path: Option<&Path>) -> CliResult<CompileOptions> {
    let Some(path) = path else {
        return Ok(CompileOptions::default());
    };
    let text = read(path)?;
    CompileOptions::from_json(&text).map_err(|e| {
        Diagnostic::error(format!("invalid config {}: {e}", path.display())).into()
    })
}

fn parse_lua_version(version: &str) -> CliResult<LuaVersion> {
    match version {
        "5.1" => Ok(LuaVersion::Lua51),
        "5.4" => Ok(LuaVersion::Lua54),
        other => Err(Diagnostic::error(format!("unsupported Lua version `{other}`"))
            .with_note("supported versions: 5.1, 5.4")
            .into()),
    }
}

fn read(path: &Path) -> CliResult<String> {
    fs::read_to_string(path).map_err(|e| io_error(path, e))
}

fn io_error(path: &Path, error: std::io::Error) -> Failure {
    Diagnostic::error(format!("{}: {error}", path.display())).into()
}

/// `.js`/`.mjs`/`.cjs` is source; JSON with a `schemaVersion` is IR;
/// any other JSON is ESTree.
fn input_kind(input: &InputArgs) -> CliResult<InputKind> {
    if let Some(kind) = input.kind {
        return Ok(kind);
    }
    let extension = input.input.extension().and_then(|e| e.to_str()).unwrap_or_default();
    if matches!(extension, "js" | "mjs" | "cjs") {
        return Ok(InputKind::Js);
    }
    let text = read(&input.input)?;
    let is_ir = serde_json::from_str::<serde_json::Value>(&text)
        .map(|v| v.get("schemaVersion").is_some())
        .unwrap_or(false);
    Ok(if is_ir { InputKind::Ir } else { InputKind::Ast })
}

/// Produces a validated module from any input kind.
fn load_module(input: &InputArgs, kind: InputKind, cache: &mut SourceCache) -> CliResult<Module> {
    let path = &input.input;
    let module = match kind {
        InputKind::Ir => {
            let text = read(path)?;
            let report = validate_json(&text);
            if !report.ok {
                return Err(validation_failure(path, &report.errors));
            }
            Module::from_json(&text)
                .map_err(|e| Diagnostic::error(e.to_string()).with_code(ErrorCode::INVALID_IR_JSON))?
        }
        InputKind::Js | InputKind::Ast => {
            let (estree, source) = if kind == InputKind::Js {
                (run_parser(&input.parser, path)?, read(path)?)
            } else {
                (read(path)?, String::new())
            };
            let program = parse_program(&estree).map_err(|e| {
                Diagnostic::error(format!("{}: {e}", path.display())).with_code(ErrorCode::INVALID_AST)
            })?;
            let file_id = cache.add(path.display().to_string(), source);
            let options = LowerOptions {
                file_id,
                source_name: Some(path.display().to_string()),
                ..LowerOptions::default()
            };
            lower_with(&program, &options).map_err(|e| Diagnostic::from(&e))?
        }
    };

    let report = validate(&module);
    if !report.ok {
        return Err(validation_failure(path, &report.errors));
    }
    info!(nodes = module.len(), "module ready");
    Ok(module)
}

fn run_parser(command: &str, path: &Path) -> CliResult<String> {
    let mut parts = command.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| Diagnostic::error("empty parser command").with_code(ErrorCode::PARSER_FAILED))?;
    debug!(parser = command, file = %path.display(), "running parser");

    let output = Command::new(program).args(parts).arg(path).output().map_err(|e| {
        Diagnostic::error(format!("failed to run `{program}`: {e}"))
            .with_code(ErrorCode::PARSER_FAILED)
            .with_note("set --parser or LUASCRIPT_PARSER to an ESTree parser command")
    })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Diagnostic::error(format!("parser exited with {}", output.status))
            .with_code(ErrorCode::PARSER_FAILED)
            .with_note(stderr.trim().to_string())
            .into());
    }
    String::from_utf8(output.stdout).map_err(|e| {
        Diagnostic::error(format!("parser output is not UTF-8: {e}"))
            .with_code(ErrorCode::PARSER_FAILED)
            .into()
    })
}

fn validation_failure(path: &Path, errors: &[String]) -> Failure {
    Failure(
        errors
            .iter()
            .map(|error| {
                Diagnostic::error(error.clone())
                    .with_code(ErrorCode::SCHEMA_VIOLATION)
                    .with_note(format!("in {}", path.display()))
            })
            .collect(),
    )
}

fn check_output(output: CompileOutput) -> CliResult<Artifact> {
    match output.output {
        Some(artifact) if output.success => Ok(artifact),
        _ => Err(Failure(output.diagnostics.iter().map(Diagnostic::from).collect())),
    }
}

fn default_output(input: &Path, target: Target) -> PathBuf {
    input.with_extension(target.extension())
}

fn write_text(path: Option<&Path>, text: &str) -> CliResult<()> {
    write_artifact(path, &Artifact::Text(text.to_string()))
}

fn write_artifact(path: Option<&Path>, artifact: &Artifact) -> CliResult<()> {
    match (path, artifact) {
        (Some(path), _) => fs::write(path, artifact.as_bytes()).map_err(|e| io_error(path, e)),
        (None, Artifact::Text(text)) => {
            print!("{text}");
            if !text.ends_with('\n') {
                println!();
            }
            Ok(())
        }
        (None, Artifact::Binary(_)) => {
            Err(Diagnostic::error("binary output needs a file").with_note("pass -o <file>").into())
        }
    }
}
