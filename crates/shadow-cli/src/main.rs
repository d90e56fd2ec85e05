mod commands;
mod output;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::demo::DemoArgs;
use commands::routes::RoutesArgs;

#[derive(Parser, Debug)]
#[command(name = "shadow", version, about = "Shadow object tooling")]
struct Cli {
    #[command(flatten)]
    opts: GlobalOpts,

    #[command(subcommand)]
    command: Command,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalOpts {
    /// Emit JSON instead of human readable output
    #[arg(long, global = true)]
    pub json: bool,

    /// Log filter, e.g. `debug` or `shadow_env=trace` (env: SHADOW_LOG)
    #[arg(long, global = true, env = "SHADOW_LOG", default_value = "warn")]
    pub log: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve the composition route of a token from a registry config
    Routes(RoutesArgs),

    /// Drive a small component tree through a shadow env
    Demo(DemoArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.opts.log);

    match cli.command {
        Command::Routes(args) => commands::routes::cmd_routes(&cli.opts, &args),
        Command::Demo(args) => commands::demo::cmd_demo(&cli.opts, &args).await,
    }
}

fn setup_logging(filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
