use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use fathom_core::debugger::create_debugger;
use fathom_core::error::FathomError;
use fathom_core::layout::{LayoutIndex, TypeKind};
use fathom_core::session::{BreakpointSpec, Session};
use fathom_core::symbols::BinaryImage;
use fathom_utils::{info, init_logging, warn, LogFormat, LogLevel, LogSettings};

/// Inspect C types and evaluate member-access expressions, including
/// members of anonymous structs and unions.
#[derive(Parser, Debug)]
#[command(name = "fathom")]
#[command(version)]
#[command(about = "Resolve members of anonymous C structs and unions from debug info and live processes", long_about = None)]
struct Cli
{
    /// Log level (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,
    /// Log format: pretty or json (overrides FATHOM_LOG_FORMAT)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Print the flattened member table of a struct or union
    Layout
    {
        /// Executable or object file with DWARF
        binary: PathBuf,
        /// Type name (`node`, `struct node`, `union u`)
        type_name: String,
        /// Optional dotted member path (`foo.d`) to print a single offset
        member: Option<String>,
    },
    /// List named structs and unions
    Types
    {
        /// Executable or object file with DWARF
        binary: PathBuf,
    },
    /// Launch a program, stop at a breakpoint, and evaluate expressions
    Eval
    {
        /// Executable to launch
        binary: PathBuf,
        /// Where to stop: `file:line`, a function name, or `0x` address
        #[arg(short = 'b', long = "break")]
        breakpoint: BreakpointSpec,
        /// Expression to evaluate (repeatable)
        #[arg(short, long = "expr", required = true)]
        expressions: Vec<String>,
        /// Print the breakpoint list after evaluating
        #[arg(long, default_value_t = false)]
        list_breakpoints: bool,
        /// Arguments to pass to the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn main()
{
    let cli = Cli::parse();

    let settings = match LogSettings::from_env() {
        Ok(settings) => settings.with_level(cli.log_level).with_format(cli.log_format),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };
    let _guard = match init_logging(&settings) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };

    match run_command(cli.command) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

/// Returns `Ok(false)` when the command ran but some evaluation failed
fn run_command(command: Commands) -> Result<bool, FathomError>
{
    match command {
        Commands::Layout {
            binary,
            type_name,
            member,
        } => {
            print_layout(&binary, &type_name, member.as_deref())?;
            Ok(true)
        }
        Commands::Types { binary } => {
            print_types(&binary)?;
            Ok(true)
        }
        Commands::Eval {
            binary,
            breakpoint,
            expressions,
            list_breakpoints,
            args,
        } => run_eval(&binary, &breakpoint, &expressions, list_breakpoints, &args),
    }
}

fn load_index(binary: &Path) -> Result<LayoutIndex, FathomError>
{
    let image = BinaryImage::open(binary)?;
    let debug_info = image.debug_info()?;
    Ok(LayoutIndex::new(Arc::clone(debug_info.graph())))
}

fn print_layout(binary: &Path, type_name: &str, member: Option<&str>) -> Result<(), FathomError>
{
    let index = load_index(binary)?;
    let graph = index.graph();
    let ty = graph
        .find(type_name)
        .ok_or_else(|| FathomError::UnknownType(type_name.to_string()))?;

    if let Some(path) = member {
        let components: Vec<&str> = path.split('.').map(str::trim).collect();
        let (offset, member_ty) = index.offset_of(ty, &components)?;
        println!("{path}: offset = {offset}, type = {}", graph.display_name(member_ty));
        return Ok(());
    }

    let layout = index.flatten(ty)?;
    println!(
        "{} (size = {})",
        layout.type_name(),
        graph.size_of(ty).map_or_else(|| "?".to_string(), |size| size.to_string())
    );
    for member in layout.members() {
        println!("  {:>6}  {:<24} {}", member.offset, member.name, graph.display_name(member.ty));
    }
    Ok(())
}

fn print_types(binary: &Path) -> Result<(), FathomError>
{
    let index = load_index(binary)?;
    let graph = index.graph();
    let mut names: Vec<(String, Option<u64>)> = graph
        .iter()
        .filter(|descriptor| matches!(descriptor.kind, TypeKind::Struct | TypeKind::Union))
        .filter(|descriptor| descriptor.name.is_some() && descriptor.size.is_some())
        .map(|descriptor| (graph.display_name(descriptor.id), descriptor.size))
        .collect();
    names.sort();
    names.dedup();
    for (name, size) in names {
        println!("{name} (size = {})", size.unwrap_or(0));
    }
    Ok(())
}

fn run_eval(
    binary: &Path,
    breakpoint: &BreakpointSpec,
    expressions: &[String],
    list_breakpoints: bool,
    args: &[String],
) -> Result<bool, FathomError>
{
    let program = binary.canonicalize()?;
    info!("Launching program: {} with args: {:?}", program.display(), args);

    let mut session = Session::open(&program, create_debugger()?)?;
    let pid = session.launch(&args.iter().map(String::as_str).collect::<Vec<_>>())?;
    println!("Process {pid} launched: '{}'", program.display());

    let id = session.break_at(breakpoint)?;
    println!("Breakpoint {id}: {breakpoint}");

    let reason = session.continue_to_stop()?;
    println!("{}", session.stop_report()?);
    if !reason.is_alive() {
        warn!("Process ended before reaching {breakpoint}");
        return Ok(false);
    }

    let mut all_ok = true;
    for expression in expressions {
        match session.evaluate(expression) {
            Ok(evaluation) => println!("{evaluation}"),
            Err(e) => {
                all_ok = false;
                println!("error: {e}");
            }
        }
    }

    if list_breakpoints {
        for info in session.debugger().breakpoints() {
            println!("{info}");
        }
    }

    session.debugger_mut().kill()?;
    Ok(all_ok)
}
