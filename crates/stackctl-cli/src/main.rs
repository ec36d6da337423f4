mod cmd;
mod interrupt;
mod output;
mod root;

use clap::error::ErrorKind;
use clap::{Args, CommandFactory, Parser, Subcommand};
use stackctl_core::StackError;
use std::path::PathBuf;

const EXIT_USAGE: i32 = 64;

#[derive(Parser)]
#[command(
    name = "stackctl",
    about = "Provision TLS material, launch the compose stack, and wait until it is healthy",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from stackctl.yaml, .env or docker-compose.yml)
    #[arg(long, global = true, env = "STACKCTL_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ModeArg {
    /// Deployment profile: local or production
    #[arg(default_value = "production")]
    mode: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create directories and certificates, rebuild and start the stack, wait
    /// for health, then initialise and seed the database
    Setup(ModeArg),

    /// Rebuild images without starting anything
    Build(ModeArg),

    /// Start the stack without rebuilding
    Start {
        #[command(flatten)]
        mode: ModeArg,

        /// Block until every service is healthy
        #[arg(long)]
        wait: bool,
    },

    /// Stop and remove the stack's containers
    Stop(ModeArg),

    /// Poll service health once
    Status(ModeArg),

    /// Create or renew the proxy's TLS certificate
    Ssl(ModeArg),

    /// Load reference data
    Seed(ModeArg),

    /// Create database tables
    Initdb(ModeArg),

    /// Create the initial superuser
    Createsuperuser(ModeArg),

    /// Check the database connection
    Checkdb(ModeArg),

    /// Run the development server
    Runserver(ModeArg),

    /// Open a Python shell in the API service
    Shell(ModeArg),

    /// Open a bash shell in the API service
    Bash(ModeArg),
}

impl Commands {
    fn verbose(&self) -> bool {
        matches!(
            self,
            Commands::Setup(_) | Commands::Build(_) | Commands::Start { .. } | Commands::Stop(_)
        )
    }
}

fn subcommand_names() -> Vec<String> {
    let mut names: Vec<String> = Cli::command()
        .get_subcommands()
        .map(|s| s.get_name().to_string())
        .collect();
    if !names.iter().any(|n| n == "help") {
        names.push("help".to_string());
    }
    names
}

fn parse_cli() -> Cli {
    match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            eprintln!("\nrecognised subcommands: {}", subcommand_names().join(", "));
            std::process::exit(EXIT_USAGE);
        }
    }
}

fn main() {
    let cli = parse_cli();

    let default_level = if cli.command.verbose() {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let json = cli.json;

    let result = match cli.command {
        Commands::Setup(m) => cmd::lifecycle::setup(&root, &m.mode, json),
        Commands::Build(m) => cmd::lifecycle::build(&root, &m.mode, json),
        Commands::Start { mode, wait } => cmd::lifecycle::start(&root, &mode.mode, wait, json),
        Commands::Stop(m) => cmd::lifecycle::stop(&root, &m.mode, json),
        Commands::Status(m) => cmd::lifecycle::status(&root, &m.mode, json),
        Commands::Ssl(m) => cmd::ssl::run(&root, &m.mode, json),
        Commands::Seed(m) => cmd::collaborator::run(&root, &m.mode, "seed"),
        Commands::Initdb(m) => cmd::collaborator::run(&root, &m.mode, "initdb"),
        Commands::Createsuperuser(m) => cmd::collaborator::run(&root, &m.mode, "createsuperuser"),
        Commands::Checkdb(m) => cmd::collaborator::run(&root, &m.mode, "checkdb"),
        Commands::Runserver(m) => cmd::collaborator::run(&root, &m.mode, "runserver"),
        Commands::Shell(m) => cmd::collaborator::run(&root, &m.mode, "shell"),
        Commands::Bash(m) => cmd::collaborator::run(&root, &m.mode, "bash"),
    };

    if let Err(e) = result {
        let (category, code) = match e.downcast_ref::<StackError>() {
            Some(err) => (err.category(), err.exit_code()),
            None => ("Error", 1),
        };
        eprintln!("error[{category}]: {e:#}");
        std::process::exit(code);
    }
}
