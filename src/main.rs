use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use escpos_emulator::{EmulatorConfig, EmulatorError, ErrorCondition, VirtualPrinterServer};

/// Headless virtual ESC/POS receipt printer
#[derive(Parser, Debug)]
#[command(name = "escpos-emulator")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// TCP port (9100 is the usual raw printing port)
    #[arg(long, default_value_t = 9100)]
    port: u16,

    /// Simulated print-head delay per command, in milliseconds
    #[arg(long, default_value_t = 2)]
    delay_ms: u64,

    /// Window in which consecutive text commands are merged, in milliseconds
    #[arg(long, default_value_t = 5)]
    coalesce_ms: u64,

    /// Power-on character code table (ESC t n)
    #[arg(long, default_value_t = 0)]
    codepage: u8,

    /// Fault to arm, e.g. `paper_out:after_commands=5` or `timeout:random=0.1:2`
    #[arg(long = "fault", value_name = "SPEC")]
    faults: Vec<ErrorCondition>,

    /// Seed for random fault triggers
    #[arg(long)]
    seed: Option<u64>,

    /// Print status, print history and fault history as JSON on exit
    #[arg(long)]
    dump: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // DEBUG set in the environment lowers the default level to debug,
    // which logs every received byte; RUST_LOG overrides both
    let default_level = if std::env::var("DEBUG").is_ok() { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut config = EmulatorConfig::default()
        .with_addr(cli.host, cli.port)
        .with_command_delay(Duration::from_millis(cli.delay_ms))
        .with_coalesce_window(Duration::from_millis(cli.coalesce_ms))
        .with_initial_codepage(cli.codepage);
    if let Some(seed) = cli.seed {
        config = config.with_rng_seed(seed);
    }

    let server = match VirtualPrinterServer::start(config).await {
        Ok(server) => server,
        Err(EmulatorError::Bind { addr, source }) => {
            eprintln!("ERROR: Failed to bind to {}: {}", addr, source);
            eprintln!("The port is probably already in use. Please:");
            eprintln!("  1. Stop any other emulator instances");
            eprintln!("  2. Check for other applications using the port:");
            eprintln!("     lsof -i :{}", cli.port);
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };
    println!("TCP Server listening on {}", server.local_addr());

    for fault in cli.faults {
        server.add_error_condition(fault).await?;
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    server.stop().await;

    if cli.dump {
        let dump = serde_json::json!({
            "status": server.status().await?,
            "print_history": server.print_history().await?,
            "error_history": server.error_history().await?,
        });
        println!("{}", serde_json::to_string_pretty(&dump)?);
    }

    Ok(())
}
