//! KarryTask main binary.

mod config;
mod embedded;
mod init;
mod intent;
mod resolver;
mod routes;
mod server;
mod session;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Parser)]
#[command(name = "karrytask", version, about = "KarryTask tasks, notes and assistant")]
struct Cli {
    /// Config file (default: ~/.karrytask/config.toml).
    #[arg(long, global = true, env = "KARRYTASK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the HTTP server (default).
    Serve,
    /// Write a config template next to the config path (idempotent).
    Init,
    /// Validate config and open the store.
    Doctor,
    /// Resolve one utterance against the configured store and print the reply.
    Ask {
        #[arg(required = true, num_args = 1..)]
        utterance: Vec<String>,
    },
    /// Print the task list.
    Tasks,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv_path = dotenvy::dotenv().ok();
    init_tracing()?;
    install_panic_hook();
    if let Some(path) = dotenv_path {
        tracing::debug!(path = %path.display(), "loaded .env");
    }

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Serve);

    match command {
        Command::Serve => server::serve(cli.config).await,
        Command::Init => {
            let report = init::initialize(cli.config).await?;
            if report.created.is_empty() {
                println!("karrytask init: already initialized");
                for path in &report.skipped {
                    println!("kept {} unchanged", path.display());
                }
            } else {
                println!("karrytask init: initialized {}", report.root.display());
                for path in &report.created {
                    println!("created {}", path.display());
                }
            }
            println!(
                "next: set llm.api_key (or GEMINI_API_KEY) in {}",
                report.config_path.display()
            );
            Ok(())
        }
        Command::Doctor => server::doctor(cli.config).await,
        Command::Ask { utterance } => server::ask(cli.config, &utterance.join(" ")).await,
        Command::Tasks => server::print_tasks(cli.config).await,
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(v) => v,
        Err(_) => EnvFilter::new(
            "info,karrytask=debug,kt_app=debug,kt_llm=debug,kt_tools=debug,tower_http=info",
        ),
    };
    let log_format = std::env::var("KARRYTASK_LOG_FORMAT")
        .unwrap_or_else(|_| "json".to_string())
        .to_ascii_lowercase();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    match log_format.as_str() {
        "json" => builder
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .init(),
        "pretty" => builder.pretty().init(),
        "compact" => builder.compact().init(),
        other => {
            return Err(anyhow::anyhow!(
                "unsupported KARRYTASK_LOG_FORMAT={other:?}; expected one of: json, pretty, compact"
            ));
        }
    }

    tracing::info!(
        log_format = %log_format,
        env_filter = ?std::env::var("RUST_LOG").ok(),
        "tracing initialized"
    );
    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_payload_to_string(panic_info.payload());
        tracing::error!(
            panic_location = %location,
            panic_payload = %payload,
            "panic captured"
        );
        default_hook(panic_info);
    }));
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return msg.to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}
