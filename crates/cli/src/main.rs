mod config;
mod error;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use runtime::{EngineSupervisor, Orchestrator, ToolDirectory};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use config::Config;
use error::{Error, Result};

#[derive(Parser)]
#[command(name = "toolbridge")]
#[command(about = "Let a local inference engine call MCP tools", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./toolbridge.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session
    Chat,
    /// Connect every provider and list the tools they serve
    Tools,
    /// Kill stray engines on the engine port and check a fresh one starts
    ResetEngine,
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Logs go to stderr so answers on stdout stay clean.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::discover(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Chat) | None => cmd_chat(config).await,
        Some(Commands::Tools) => cmd_tools(config).await,
        Some(Commands::ResetEngine) => cmd_reset_engine(config).await,
    }
}

async fn cmd_chat(config: Config) -> Result<()> {
    println!("toolbridge v{}", env!("CARGO_PKG_VERSION"));

    let directory = connect_directory(&config).await;
    let providers = directory.providers();
    println!(
        "Providers: {} ({} tools)",
        if providers.is_empty() {
            "none".to_string()
        } else {
            providers.join(", ")
        },
        directory.tools().len()
    );

    let supervisor = Arc::new(EngineSupervisor::new(config.engine.clone()));
    if let Err(e) = supervisor.ensure_running().await {
        // Not fatal: every turn retries.
        eprintln!("Engine not ready: {e}");
    }
    println!(
        "Model: {} at {}",
        config.engine.model,
        config.engine.normalized_base_url()
    );
    println!("Type 'list-tools', 'reset-engine', or 'quit'. Ctrl+C exits.\n");

    let mut orchestrator = Orchestrator::new(supervisor.clone(), directory.clone())
        .with_config(config.orchestrator_config());
    let result = chat_loop(&mut orchestrator).await;

    directory.close_all().await;
    supervisor.shutdown().await;
    println!("\nSession ended.");
    result
}

async fn chat_loop(orchestrator: &mut Orchestrator<Arc<EngineSupervisor>>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => break,
        };
        // EOF
        let Some(line) = line else { break };

        match line.trim() {
            "" => continue,
            "quit" | "exit" => break,
            "list-tools" => print_tools(orchestrator.directory()),
            "reset-engine" => match orchestrator.engine().reset().await {
                Ok(()) => println!("Engine restarted.\n"),
                Err(e) => eprintln!("Engine reset failed: {e}\n"),
            },
            input => {
                let answer = tokio::select! {
                    answer = orchestrator.respond(input) => answer,
                    _ = tokio::signal::ctrl_c() => break,
                };
                println!("\n{answer}\n");
            }
        }
    }

    Ok(())
}

async fn cmd_tools(config: Config) -> Result<()> {
    let configured = config.providers.len();
    let directory = connect_directory(&config).await;

    if configured > 0 && directory.providers().is_empty() {
        return Err(Error::NoProviders(configured));
    }
    print_tools(&directory);

    directory.close_all().await;
    Ok(())
}

async fn cmd_reset_engine(config: Config) -> Result<()> {
    let supervisor = EngineSupervisor::new(config.engine);
    let url = supervisor.config().normalized_base_url();

    let outcome = supervisor.reset().await;
    supervisor.shutdown().await;
    outcome?;

    println!("Engine at {url} restarted cleanly; 'toolbridge chat' will launch it again.");
    Ok(())
}

async fn connect_directory(config: &Config) -> Arc<ToolDirectory> {
    let directory = Arc::new(
        ToolDirectory::new(config.provider_configs()).with_keywords(config.keyword_table()),
    );
    for failure in directory.connect_all().await {
        eprintln!(
            "Provider '{}' unavailable: {}",
            failure.provider, failure.error
        );
    }
    directory
}

fn print_tools(directory: &ToolDirectory) {
    let tools = directory.tools();
    if tools.is_empty() {
        println!("No tools available.");
        return;
    }

    println!("{:<28}  {:<14}  DESCRIPTION", "TOOL", "PROVIDER");
    println!("{}", "-".repeat(80));
    for registered in tools {
        let description = registered.tool.description.as_deref().unwrap_or("");
        println!(
            "{:<28}  {:<14}  {description}",
            registered.tool.name, registered.provider
        );
    }
}
