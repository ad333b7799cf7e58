use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "warpbridge",
    about = "WarpGrid bridge — blocking HTTP over the cooperative host",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Bridge configuration file (TOML). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one HTTP request through the bridge client and print the body
    Fetch {
        /// Target URL (plain http only)
        url: String,
        /// Request method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,
        /// Extra header as `Name: value` (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        /// Request body
        #[arg(short, long)]
        data: Option<String>,
        /// Content type sent with --data; empty omits the header
        #[arg(long, default_value = "")]
        content_type: String,
        /// Print status and response headers to stderr
        #[arg(short, long)]
        include: bool,
    },
    /// Serve HTTP with the built-in echo handler behind the streaming responder
    Serve {
        /// Address to bind
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        bind: String,
    },
    /// Print the effective configuration as TOML
    Config,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("warpbridge=info".parse()?)
        )
        .init();

    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Fetch {
            url,
            method,
            headers,
            data,
            content_type,
            include,
        } => commands::fetch::fetch(
            &config,
            &commands::fetch::FetchArgs {
                url,
                method,
                headers,
                data,
                content_type,
                include,
            },
        ),
        Commands::Serve { bind } => commands::serve::serve(&config, &bind),
        Commands::Config => commands::config::print(&config),
    }
}
