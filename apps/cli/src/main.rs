use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand, ValueEnum};
use deckbridge_core::{
    ButtonPos, ButtonState, ClientConfig, DeckClient, Dimensions, PanelIndex, PixelBuffer,
    PixelFormat, Rgb,
};
use tracing::{error, info};

const FRAME: Duration = Duration::from_millis(16);

#[derive(Parser, Debug)]
#[command(author, version, about = "Panel bridge client", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Server host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Server port
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Shared payload directory
    #[arg(long, global = true)]
    payload_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print button edges as they happen
    Watch {
        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Paint a button, or the whole panel, with a color
    Color {
        #[arg(long, default_value_t = 0)]
        panel: PanelIndex,
        /// Button as `column,row`; omit for the whole panel
        #[arg(long, value_parser = parse_pos)]
        button: Option<ButtonPos>,
        /// Color as RRGGBB
        #[arg(value_parser = parse_rgb)]
        color: Rgb,
    },
    /// Send an image to a button or the whole panel
    Image {
        #[arg(long, default_value_t = 0)]
        panel: PanelIndex,
        /// Button as `column,row`; omit for the whole panel
        #[arg(long, value_parser = parse_pos)]
        button: Option<ButtonPos>,
        /// Raw pixel file; a test gradient is sent when omitted
        #[arg(long, requires_all = ["width", "height"])]
        raw: Option<PathBuf>,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
        #[arg(long, value_enum, default_value_t = RawFormat::Argb32)]
        format: RawFormat,
    },
    /// Paint a panel black
    Clear {
        #[arg(long, default_value_t = 0)]
        panel: PanelIndex,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum RawFormat {
    Argb32,
    Rgba32,
    Bgra32,
    Rgb24,
}

impl From<RawFormat> for PixelFormat {
    fn from(format: RawFormat) -> Self {
        match format {
            RawFormat::Argb32 => PixelFormat::Argb32,
            RawFormat::Rgba32 => PixelFormat::Rgba32,
            RawFormat::Bgra32 => PixelFormat::Bgra32,
            RawFormat::Rgb24 => PixelFormat::Rgb24,
        }
    }
}

fn parse_pos(s: &str) -> Result<ButtonPos, String> {
    let (column, row) = s
        .split_once(',')
        .ok_or_else(|| format!("expected column,row, got '{}'", s))?;
    let column = column.trim().parse().map_err(|_| format!("bad column '{}'", column))?;
    let row = row.trim().parse().map_err(|_| format!("bad row '{}'", row))?;
    Ok(ButtonPos::new(column, row))
}

fn parse_rgb(s: &str) -> Result<Rgb, String> {
    let hex = s.trim_start_matches('#');
    if hex.len() != 6 {
        return Err(format!("expected RRGGBB, got '{}'", s));
    }
    let value = u32::from_str_radix(hex, 16).map_err(|_| format!("bad hex color '{}'", s))?;
    Ok(Rgb::new((value >> 16) as u8, (value >> 8) as u8, value as u8))
}

impl Args {
    fn client_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load_from_file(path)?,
            None => ClientConfig::default(),
        };
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dir) = &self.payload_dir {
            config.payload_dir = Some(dir.clone());
        }
        Ok(config)
    }
}

/// Tick until the server has announced `panel`.
fn wait_for_panel(client: &mut DeckClient, panel: PanelIndex) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        client.tick();
        if client.panel(panel).is_some() {
            return Ok(());
        }
        thread::sleep(FRAME);
    }
    bail!("Panel {} was not announced by the server", panel)
}

fn watch(client: &mut DeckClient, seconds: Option<u64>) {
    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));
    let mut seen_panels = false;
    loop {
        client.tick();
        let mut any = false;
        for panel in client.panels() {
            any = true;
            let geometry = panel.geometry();
            for row in 0..geometry.rows {
                for column in 0..geometry.columns {
                    let pos = ButtonPos::new(column, row);
                    match panel.state(pos) {
                        ButtonState::Down => println!("panel {} button {} down", panel.index(), pos),
                        ButtonState::Up => println!("panel {} button {} up", panel.index(), pos),
                        _ => {}
                    }
                }
            }
        }
        if any && !seen_panels {
            info!(panels = client.panels().count(), "Watching");
        }
        if seen_panels && !any {
            info!("All panels withdrawn");
            break;
        }
        seen_panels |= any;
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        thread::sleep(FRAME);
    }
}

fn load_image(
    raw: Option<&PathBuf>,
    width: Option<u32>,
    height: Option<u32>,
    format: RawFormat,
    target: Dimensions,
) -> Result<PixelBuffer> {
    match raw {
        Some(path) => {
            let data = std::fs::read(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let dims = Dimensions::new(
                width.ok_or_else(|| anyhow!("--width is required with --raw"))?,
                height.ok_or_else(|| anyhow!("--height is required with --raw"))?,
            );
            Ok(PixelBuffer::new(dims, format.into(), data)?)
        }
        None => Ok(PixelBuffer::from_fn(target, |x, y| {
            Rgb::new(
                (x * 255 / target.width.max(1)) as u8,
                (y * 255 / target.height.max(1)) as u8,
                0x80,
            )
        })),
    }
}

fn run(args: Args) -> Result<()> {
    let config = args.client_config()?;
    let mut client = DeckClient::connect(&config)?;

    match &args.command {
        Command::Watch { seconds } => watch(&mut client, *seconds),
        Command::Color {
            panel,
            button,
            color,
        } => {
            wait_for_panel(&mut client, *panel)?;
            let proxy = client
                .panel(*panel)
                .ok_or_else(|| anyhow!("panel {} gone", panel))?;
            match button {
                Some(pos) => proxy.set_button_color(*pos, *color)?,
                None => proxy.set_deck_color(*color)?,
            }
            info!(panel, %color, "Color sent");
        }
        Command::Image {
            panel,
            button,
            raw,
            width,
            height,
            format,
        } => {
            wait_for_panel(&mut client, *panel)?;
            let proxy = client
                .panel(*panel)
                .ok_or_else(|| anyhow!("panel {} gone", panel))?;
            let geometry = proxy.geometry();
            let target = match button {
                Some(_) => geometry.button_dimensions(),
                None => geometry.deck_dimensions(),
            };
            let image = load_image(raw.as_ref(), *width, *height, *format, target)?;
            match button {
                Some(pos) => proxy.set_button_image(*pos, &image)?,
                None => proxy.set_deck_image(&image)?,
            }
            info!(panel, dimensions = %image.dimensions(), "Image sent");
        }
        Command::Clear { panel } => {
            wait_for_panel(&mut client, *panel)?;
            client
                .panel(*panel)
                .ok_or_else(|| anyhow!("panel {} gone", panel))?
                .set_deck_color(Rgb::BLACK)?;
            info!(panel, "Panel cleared");
        }
    }

    client.close();
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
