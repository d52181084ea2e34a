use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use deckbridge_core::{
    ButtonIndex, ButtonPos, DeviceSession, PanelGeometry, PayloadStore, Server, ServerConfig,
    ShutdownHandle, SimulatedDriver, SimulatedPanelHandle, TempFileStore,
};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Panel bridge server (simulated panels)", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP port on 127.0.0.1
    #[arg(short, long)]
    port: Option<u16>,

    /// Number of simulated panels
    #[arg(long)]
    panels: Option<usize>,

    /// Tick interval in milliseconds
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Shared payload directory
    #[arg(long)]
    payload_dir: Option<PathBuf>,

    /// Write the effective configuration to this file and exit
    #[arg(long)]
    write_config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn server_config(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load_from_file(path)?,
            None => ServerConfig::default(),
        };
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(panels) = self.panels {
            config.simulated_panels = panels;
        }
        if let Some(tick_ms) = self.tick_ms {
            config.tick_interval_ms = tick_ms;
        }
        if let Some(dir) = &self.payload_dir {
            config.payload_dir = Some(dir.clone());
        }
        Ok(config)
    }
}

/// A line typed on the server console.
#[derive(Debug, PartialEq, Eq)]
enum ConsoleCommand {
    Down { panel: usize, button: ButtonIndex },
    Up { panel: usize, button: ButtonIndex },
    Press { panel: usize, button: ButtonIndex },
    Quit,
}

/// Parse `down|up|press <panel> <button>` or `quit`. Buttons are a linear
/// index or `column,row`.
fn parse_command(line: &str, geometry: PanelGeometry) -> Result<ConsoleCommand> {
    let mut words = line.split_whitespace();
    let verb = words.next().ok_or_else(|| anyhow!("empty command"))?;
    if verb == "quit" || verb == "exit" {
        return Ok(ConsoleCommand::Quit);
    }
    let panel: usize = words
        .next()
        .ok_or_else(|| anyhow!("missing panel"))?
        .parse()
        .context("panel must be a number")?;
    let button_word = words.next().ok_or_else(|| anyhow!("missing button"))?;
    let button = match button_word.split_once(',') {
        Some((column, row)) => {
            let pos = ButtonPos::new(
                column.trim().parse().context("bad column")?,
                row.trim().parse().context("bad row")?,
            );
            geometry
                .index_of(pos)
                .ok_or_else(|| anyhow!("button {} outside the grid", pos))?
        }
        None => button_word.parse().context("button must be a number")?,
    };
    match verb {
        "down" => Ok(ConsoleCommand::Down { panel, button }),
        "up" => Ok(ConsoleCommand::Up { panel, button }),
        "press" => Ok(ConsoleCommand::Press { panel, button }),
        other => bail!("unknown command '{}'", other),
    }
}

fn run_console(panels: Vec<SimulatedPanelHandle>, geometry: PanelGeometry, stop: ShutdownHandle) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let command = match parse_command(&line, geometry) {
            Ok(command) => command,
            Err(e) => {
                warn!("{:#}", e);
                continue;
            }
        };
        let (panel, button) = match command {
            ConsoleCommand::Quit => {
                stop.trigger();
                break;
            }
            ConsoleCommand::Down { panel, button }
            | ConsoleCommand::Up { panel, button }
            | ConsoleCommand::Press { panel, button } => (panel, button),
        };
        let Some(handle) = panels.get(panel) else {
            warn!(panel, "No such panel");
            continue;
        };
        match command {
            ConsoleCommand::Down { .. } => handle.key_down(button),
            ConsoleCommand::Up { .. } => handle.key_up(button),
            ConsoleCommand::Press { .. } => handle.press(button),
            ConsoleCommand::Quit => {}
        }
    }
}

fn run(args: Args) -> Result<()> {
    let config = args.server_config()?;
    if let Some(path) = &args.write_config {
        config.save_to_file(path)?;
        info!(path = %path.display(), "Configuration written");
        return Ok(());
    }

    let payload_dir = config
        .payload_dir
        .clone()
        .unwrap_or_else(TempFileStore::default_dir);
    let store: Arc<dyn PayloadStore> = Arc::new(TempFileStore::new(&payload_dir)?);
    info!(dir = %payload_dir.display(), "Payload directory");

    let driver = SimulatedDriver::new(config.simulated_panels, config.geometry);
    let session = Arc::new(DeviceSession::new(&driver, store)?);
    let server = Server::bind(&config, session)?;
    let stop = server.shutdown_handle();

    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            info!("Shutdown requested");
            stop.trigger();
        })
        .context("Failed to install signal handler")?;
    }

    let handles = driver.handles();
    let geometry = config.geometry;
    thread::Builder::new()
        .name("deckbridge-console".into())
        .spawn(move || run_console(handles, geometry, stop))?;

    info!(
        panels = config.simulated_panels,
        "Type 'down|up|press <panel> <button>' to simulate keys, 'quit' to stop"
    );
    server.run()?;
    Ok(())
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
