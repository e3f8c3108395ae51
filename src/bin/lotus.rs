use std::{fs, path::PathBuf, process::ExitCode, time::Duration};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lotus::{LotusError, Repl, Session, ShellConfig, ShellResult};

#[derive(Parser)]
#[command(author, version, about = "Lotus code-execution shell")]
struct Args {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Default per-call timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a Lotus script file in a fresh session
    Run { script: PathBuf },
    /// Start an interactive shell session
    Repl,
    /// Evaluate a snippet of Lotus code
    Eval {
        source: String,
        /// Import preamble to apply before the snippet
        #[arg(long)]
        imports: Option<String>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<ExitCode, LotusError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    match args.command.unwrap_or(Command::Repl) {
        Command::Run { script } => {
            let source = fs::read_to_string(&script)?;
            let result = execute(config, &source, None)?;
            report(&result, false)
        }
        Command::Repl => {
            let mut repl = Repl::new(Session::new(config)?)?;
            repl.run()?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Eval {
            source,
            imports,
            json,
        } => {
            let result = execute(config, &source, imports.as_deref())?;
            report(&result, json)
        }
    }
}

fn load_config(args: &Args) -> Result<ShellConfig, LotusError> {
    let mut config = match &args.config {
        Some(path) => ShellConfig::load(path)?,
        None => ShellConfig::default(),
    }
    .with_env_overrides()?;
    if let Some(timeout_ms) = args.timeout_ms {
        config.timeout_ms = Some(timeout_ms);
    }
    Ok(config)
}

fn execute(
    config: ShellConfig,
    source: &str,
    imports: Option<&str>,
) -> Result<ShellResult, LotusError> {
    let timeout = config.timeout_ms.map(Duration::from_millis);
    let session = Session::new(config)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    runtime.block_on(session.execute(source, imports, timeout))
}

fn report(result: &ShellResult, json: bool) -> Result<ExitCode, LotusError> {
    if json {
        println!("{}", result.to_json_pretty()?);
    } else if result.is_error() {
        print!("{}", result.stdout);
        let rendered = result.render();
        eprintln!("{}", rendered[result.stdout.len()..].trim_end());
    } else {
        let rendered = result.render();
        if !rendered.is_empty() {
            println!("{}", rendered.trim_end_matches('\n'));
        }
    }
    Ok(if result.is_error() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
