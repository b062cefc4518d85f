//! Konan CLI - コマンドラインインターフェース
//!
//! Kotlin/Nativeプロセスの値・型・例外を調べる konan のREPLインターフェース

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use konan_core::{
    BreakpointSpec, CatchMode, Command, FormatterConfig, Inspection, KonanTarget, Session,
    StopReason, Symbol, ValueLocation,
};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// 子要素の表示上限
const CHILD_LIMIT: usize = 64;

/// Konan - Kotlin/Native language introspection
#[derive(Parser)]
#[command(name = "konan")]
#[command(version = "0.1.0")]
#[command(about = "Inspect values, types and exceptions of Kotlin/Native processes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: DebugCommand,

    #[command(flatten)]
    options: Options,
}

#[derive(Args)]
struct Options {
    /// Kotlin/Native target (linux, osx, ios, raspberrypi, macbook, host, ...)
    #[arg(long, global = true, default_value_t = KonanTarget::host())]
    target: KonanTarget,

    /// Maximum number of UTF-16 code units shown for a string
    #[arg(long, global = true, default_value_t = 1024)]
    max_string: usize,

    /// Maximum number of array elements shown in a summary
    #[arg(long, global = true, default_value_t = 16)]
    max_preview: usize,

    /// Maximum nesting depth of element summaries
    #[arg(long, global = true, default_value_t = 3)]
    max_depth: usize,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum DebugCommand {
    /// Attach to an existing process
    Attach {
        /// Path to the executable binary
        binary: String,

        /// Process ID to attach to
        #[arg(short, long)]
        pid: i32,
    },

    /// Read symbols and type metadata of a binary without a process
    Inspect {
        /// Path to the executable binary or shared library
        binary: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.options.verbose);

    println!("Konan - Kotlin/Native language introspection");
    println!("Version 0.1.0 (target {})", cli.options.target);
    println!();

    let mut session = init_session(cli.command, &cli.options)?;
    run_repl(&mut session)?;

    Ok(())
}

/// `RUST_LOG` が無ければ warn、`--verbose` なら debug
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// セッションを作成してバイナリを読み込み、必要ならアタッチする
fn init_session(command: DebugCommand, options: &Options) -> Result<Session> {
    let config = FormatterConfig {
        max_string_units: options.max_string,
        max_array_preview: options.max_preview,
        max_depth: options.max_depth,
    };
    let mut session = Session::new(options.target, config)?;

    match command {
        DebugCommand::Attach { binary, pid } => {
            println!("Loading binary: {}", binary);
            println!("Attaching to process: {}", pid);
            println!();

            session.load_binary(&binary)?;
            session.attach(pid)?;
            println!("Attached to process {} ({} images loaded)", pid, session.images().len());
        }
        DebugCommand::Inspect { binary } => {
            println!("Loading binary: {}", binary);
            session.load_binary(&binary)?;
            println!("Loaded symbols and type metadata from {}", binary);
        }
    }

    if !session.is_runtime_loaded() {
        println!("Kotlin/Native runtime not found yet; exception breakpoints will stay pending");
    }
    println!();

    Ok(session)
}

fn history_path() -> Option<PathBuf> {
    home::home_dir().map(|home| home.join(".konan_history"))
}

/// REPLループを実行する
fn run_repl(session: &mut Session) -> Result<()> {
    println!("Type 'help' for available commands, 'quit' to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;
    let history = history_path();
    if let Some(path) = &history {
        // 初回は履歴ファイルが無い
        let _ = rl.load_history(path);
    }

    loop {
        let readline = rl.readline("(konan) ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line)?;

                match Command::parse(line) {
                    Some(Command::Quit) => {
                        println!("Goodbye!");
                        break;
                    }
                    Some(command) => {
                        if let Err(e) = handle_command(session, command) {
                            eprintln!("Error: {}", e);
                        }
                    }
                    None => {
                        println!("Unknown command: {}", line);
                        println!("Type 'help' for available commands.");
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    if let Some(path) = &history {
        if let Err(e) = rl.save_history(path) {
            tracing::warn!("failed to save history to {}: {}", path.display(), e);
        }
    }
    Ok(())
}

fn handle_command(session: &mut Session, command: Command) -> Result<()> {
    match command {
        Command::Print {
            location,
            type_name,
        } => handle_print(session, location, &type_name),
        Command::Children {
            location,
            type_name,
        } => handle_children(session, location, &type_name),
        Command::Type {
            location,
            type_name,
        } => handle_type(session, location, &type_name),
        Command::Catch(mode) => handle_catch(session, mode),
        Command::Continue => handle_continue(session)?,
        Command::Images => handle_images(session),
        Command::Find(pattern) => {
            let symbols = session.find_symbols(&pattern);
            print_symbol_list(&format!("Symbols matching '{}'", pattern), &symbols, Some(10));
        }
        Command::Help => print_help(),
        Command::Quit => {}
    }
    Ok(())
}

fn print_inspection(inspection: &Inspection) {
    if inspection.name.is_empty() {
        println!("({}) {}", inspection.dynamic_type, inspection.summary);
    } else {
        println!(
            "  {} = ({}) {}",
            inspection.name, inspection.dynamic_type, inspection.summary
        );
    }
}

/// Printコマンドを処理する
fn handle_print(session: &Session, location: ValueLocation, type_name: &str) {
    let value = session.value_at(location, type_name);
    print_inspection(&session.inspect(&value));
}

/// Childrenコマンドを処理する
fn handle_children(session: &Session, location: ValueLocation, type_name: &str) {
    let value = session.value_at(location, type_name);
    let (count, children) = session.children(&value, CHILD_LIMIT);
    if count == 0 {
        println!("No children");
        return;
    }

    println!("{} children:", count);
    for child in &children {
        print_inspection(child);
    }
    if count > children.len() {
        println!("  ... and {} more", count - children.len());
    }
}

/// Typeコマンドを処理する
fn handle_type(session: &Session, location: ValueLocation, type_name: &str) {
    let value = session.value_at(location, type_name);
    let inspection = session.inspect(&value);
    println!("Static type:  {}", inspection.static_type);
    println!("Dynamic type: {}", inspection.dynamic_type);
    if inspection.static_type.is_reference() {
        match session.describe(&value) {
            Ok(description) => println!("Object:       {}", description),
            Err(e) => println!("Object:       <{}>", e),
        }
    }
}

fn print_breakpoint_spec(spec: &BreakpointSpec) {
    if let Some(diagnostic) = &spec.diagnostic {
        println!("Exception breakpoint pending: {}", diagnostic);
    }
    for location in &spec.locations {
        match location.address {
            Some(_) => println!("  {}", location),
            None => println!("  {} (unresolved)", location),
        }
    }
}

/// Catchコマンドを処理する
fn handle_catch(session: &mut Session, mode: CatchMode) {
    if mode == CatchMode::Off {
        session.clear_exception_breakpoint();
        println!("Exception breakpoint cleared");
        return;
    }

    let (catch_enabled, throw_enabled) = mode.flags();
    let spec = session.set_exception_breakpoint(catch_enabled, throw_enabled);
    println!("Exception breakpoint ({:?}):", mode);
    print_breakpoint_spec(spec);
}

/// Continueコマンドを処理する
fn handle_continue(session: &mut Session) -> Result<()> {
    println!("Continuing execution...");

    let was_pending = session.exception_breakpoint().is_pending();
    let stop_reason = session.continue_execution()?;

    println!();
    match stop_reason {
        StopReason::Breakpoint => println!("Stopped (SIGTRAP) at stop {}", session.stop_id()),
        StopReason::Signal(signal) => println!("Received signal: {:?}", signal),
        StopReason::Exited(code) => println!("Process exited with code {}", code),
        StopReason::Other => println!("Process stopped (unknown reason)"),
    }

    if was_pending && !session.exception_breakpoint().is_empty() {
        println!("Kotlin/Native runtime loaded; exception breakpoint resolved:");
        print_breakpoint_spec(session.exception_breakpoint());
    }

    Ok(())
}

/// Imagesコマンドを処理する
fn handle_images(session: &Session) {
    if session.images().is_empty() {
        println!("No images loaded");
        return;
    }

    println!("Loaded images ({}):", session.images().len());
    for image in session.images().images() {
        println!(
            "  {} (bias 0x{:x}, {} symbols)",
            image.name(),
            image.bias(),
            image.symbols().all_symbols().count()
        );
    }
    println!(
        "Kotlin/Native runtime: {}",
        if session.is_runtime_loaded() { "loaded" } else { "not loaded" }
    );
}

/// シンボルリストを表示するヘルパー関数
fn print_symbol_list(title: &str, symbols: &[(String, Symbol)], limit: Option<usize>) {
    if symbols.is_empty() {
        println!("No {} found", title);
        return;
    }

    let display_limit = limit.unwrap_or(symbols.len());
    println!("{} ({} found):", title, symbols.len());

    for (i, (image, sym)) in symbols.iter().take(display_limit).enumerate() {
        if sym.size > 0 {
            println!(
                "  {}. {} @ 0x{:x} (size: {}) [{}]",
                i + 1,
                sym.display_name(),
                sym.address,
                sym.size,
                image
            );
        } else {
            println!("  {}. {} @ 0x{:x} [{}]", i + 1, sym.display_name(), sym.address, image);
        }
    }

    if symbols.len() > display_limit {
        println!("  ... and {} more", symbols.len() - display_limit);
    }
}

fn print_help() {
    println!("Available commands:");
    println!();
    println!("  help           - Show this help message");
    println!("  quit/exit/q    - Exit");
    println!();
    println!("Value commands (<loc> is an address or a register such as $rdi):");
    println!("  print <loc> <type>     - Show the summary of a value");
    println!("  children <loc> <type>  - Show the children of a value");
    println!("  type <loc> <type>      - Show the static and dynamic type of a value");
    println!();
    println!("Process commands:");
    println!("  catch [throw|catch|both|off] - Set or clear the exception breakpoint");
    println!("  continue (c)   - Continue execution");
    println!("  images         - List loaded images");
    println!("  find <pattern> - Find symbols matching pattern");
    println!();
    println!("Examples:");
    println!("  print 0x7ffe3a10 kotlin.Any?");
    println!("  children $rdi kotlin.collections.List");
    println!("  catch both");
    println!("  find Throwable");
}
