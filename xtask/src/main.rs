use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the workspace
    Build,
    /// Run the server with simulated panels
    Serve {
        /// Number of simulated panels
        #[arg(long, default_value_t = 1)]
        panels: usize,
    },
    /// Run the client and print button edges
    Watch,
}

fn cargo(args: &[&str], what: &str) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{} failed", what);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => {
            println!("Building workspace...");
            cargo(&["build", "--workspace"], "Build")?;
        }
        Commands::Serve { panels } => {
            println!("Starting server...");
            let panels = panels.to_string();
            cargo(
                &["run", "-p", "deckbridge-server", "--", "--panels", &panels],
                "Serve",
            )?;
        }
        Commands::Watch => {
            println!("Starting client...");
            cargo(&["run", "-p", "deckbridge-cli", "--", "watch"], "Watch")?;
        }
    }

    Ok(())
}
