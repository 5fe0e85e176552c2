//! stackrepl CLI: evaluate code, run scripts, or start the REPL.

use std::env;
use std::path::{Path, PathBuf};
use std::process;

use stackrepl::bytecode::{ForthCompiler, Vm, VmConfig};
use stackrepl::config::{parse_size, ReplConfig};
use stackrepl::console::{Console, History, LineSource, ScriptSource, StdinSource};
use stackrepl::interrupt::install_sigint_handler;
use stackrepl::{Repl, Session, VERSION};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// What to run.
enum Command {
    /// Interactive REPL
    Repl,
    /// Evaluate each line of a string
    Eval { code: String },
    /// Feed script files line by line
    Run { files: Vec<PathBuf> },
}

/// CLI options parsed from arguments.
struct Options {
    command: Command,
    config: Option<PathBuf>,
    memory: Option<usize>,
    no_history: bool,
    no_color: bool,
}

fn print_usage() {
    eprintln!("stackrepl {} - Forth stack machine REPL", VERSION);
    eprintln!();
    eprintln!("Usage: stackrepl [options] [script...]");
    eprintln!("       stackrepl -e <code>");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -e <code>         Evaluate each line of code and exit");
    eprintln!("  --config PATH     Read configuration from PATH");
    eprintln!("  --memory BYTES    VM memory size (decimal or 0x hex)");
    eprintln!("  --no-history      Do not load or save input history");
    eprintln!("  --no-color        Disable colored output");
    eprintln!("  --version, -V     Print version and exit");
    eprintln!("  --help, -h        Show this help message");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  stackrepl                     Start interactive REPL");
    eprintln!("  stackrepl words.fs            Run a script file");
    eprintln!("  stackrepl -e '2 3 + .'        Evaluate code");
}

fn usage_error(message: &str) -> ! {
    eprintln!("{}", message);
    print_usage();
    process::exit(64);
}

fn parse_args() -> Options {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut options = Options {
        command: Command::Repl,
        config: None,
        memory: None,
        no_history: false,
        no_color: false,
    };

    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                process::exit(0);
            }
            "--version" | "-V" => {
                println!("stackrepl {}", VERSION);
                process::exit(0);
            }
            "-e" => {
                i += 1;
                if i >= args.len() {
                    usage_error("-e requires a code argument");
                }
                if let Command::Run { .. } = options.command {
                    usage_error("-e cannot be combined with script files");
                }
                options.command = Command::Eval {
                    code: args[i].clone(),
                };
            }
            "--config" => {
                i += 1;
                if i >= args.len() {
                    usage_error("--config requires a path");
                }
                options.config = Some(PathBuf::from(&args[i]));
            }
            "--memory" => {
                i += 1;
                if i >= args.len() {
                    usage_error("--memory requires a size in bytes");
                }
                match parse_size("--memory", &args[i]) {
                    Ok(size) => options.memory = Some(size),
                    Err(e) => usage_error(&e.to_string()),
                }
            }
            "--no-history" => options.no_history = true,
            "--no-color" => options.no_color = true,
            _ if arg.starts_with('-') => usage_error(&format!("Unknown option: {}", arg)),
            _ => match &mut options.command {
                Command::Run { files } => files.push(PathBuf::from(arg)),
                Command::Repl => {
                    options.command = Command::Run {
                        files: vec![PathBuf::from(arg)],
                    }
                }
                Command::Eval { .. } => {
                    usage_error("script files cannot be combined with -e")
                }
            },
        }
        i += 1;
    }

    options
}

fn init_logging(config: &ReplConfig) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(options: &Options) -> ReplConfig {
    let mut config = match ReplConfig::load(options.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    if let Some(memory) = options.memory {
        config.memory_size = memory;
    }
    if options.no_history {
        config.history = false;
    }
    if options.no_color {
        config.color = false;
    }
    config
}

fn main() {
    let options = parse_args();
    let config = load_config(&options);
    init_logging(&config);

    if !config.color {
        colored::control::set_override(false);
    }

    let status = run(&options.command, &config);
    process::exit(status);
}

/// Run `command` and return the process exit status.
fn run(command: &Command, config: &ReplConfig) -> i32 {
    let mut vm = Vm::with_config(VmConfig {
        memory_size: config.memory_size,
        ..VmConfig::default()
    });
    let mut compiler = ForthCompiler::new();

    let session = match Session::create(&mut vm, &mut compiler, Some(config.line_buffer_size)) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    if let Err(e) = install_sigint_handler(session.interrupt_flag()) {
        warn!(error = %e, "could not install SIGINT handler");
    }

    let mut repl = Repl::new(session).with_prompts(&config.prompt, &config.paste_prompt);
    let mut console = Console::new(config.color);

    match command {
        Command::Repl => {
            let history = config
                .history_file
                .clone()
                .filter(|_| config.history)
                .map(|path| History::load(path, config.history_max));
            let mut source = StdinSource::new(history);
            match repl.run(&mut source, &mut console) {
                Ok(_) => 0,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    1
                }
            }
        }
        Command::Eval { code } => {
            let mut source = ScriptSource::from_text(code);
            feed_script(&mut repl, &mut source, &mut console, Path::new("-e"))
        }
        Command::Run { files } => {
            for path in files {
                let mut source = match ScriptSource::from_file(path) {
                    Ok(source) => source,
                    Err(e) => {
                        eprintln!("Error: Failed to read file '{}': {}", path.display(), e);
                        return 1;
                    }
                };
                let status = feed_script(&mut repl, &mut source, &mut console, path);
                if status != 0 {
                    return status;
                }
            }
            0
        }
    }
}

/// Feed every line of `source`; non-zero if any submission failed.
fn feed_script(
    repl: &mut Repl<'_, Vm, ForthCompiler>,
    source: &mut dyn LineSource,
    console: &mut Console,
    origin: &Path,
) -> i32 {
    match repl.run_lines(source, console) {
        Ok(summary) => {
            debug!(origin = %origin.display(), lines = summary.lines, failures = summary.failures, "script finished");
            if summary.failures > 0 {
                1
            } else {
                0
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}
