use anyhow::Result;
use beatrunner::cli::{App, LaunchArgs, container, launch};
use beatrunner::infra::config::default_config_dir;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "beatrunner",
    about = "Launches monitoring sidecars against running containers for integration tests"
)]
struct Cli {
    /// Configuration directory (default: ~/.config/beatrunner)
    #[arg(long, env = "BEATRUNNER_CONFIG_DIR", default_value_os_t = default_config_dir())]
    config_dir: std::path::PathBuf,

    /// Debug logging unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch an agent configured for an already running service
    Launch(LaunchArgs),
    /// Print the runtime facts of a container as JSON
    Inspect { container: String },
    /// Stop a container
    Stop { container: String },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let app = App::new(&cli.config_dir)?;

    match cli.command {
        Commands::Launch(args) => {
            let launched = launch::run(args, &app)?;
            println!("{}", launched.service.container_name());
        }
        Commands::Inspect { container: name } => {
            let info = container::inspect(&app, &name)?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::Stop { container: name } => container::stop(&app, &name)?,
    }

    Ok(())
}
