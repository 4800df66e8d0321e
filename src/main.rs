mod canvas;
mod card;
mod clock;
mod config;
mod layout;
mod orchestrator;
mod surface;
mod time_utils;
mod wayland;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "flipclock", version, about = "Split-flap style flip clock for Wayland")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run in a single window instead of fullscreen
    #[arg(short, long, conflicts_with = "fullscreen")]
    windowed: bool,

    /// Run fullscreen with one clock per output
    #[arg(long)]
    fullscreen: bool,

    /// Use a 12-hour clock with an AM/PM label
    #[arg(long, conflicts_with = "twenty_four")]
    ampm: bool,

    /// Use a 24-hour clock
    #[arg(long = "24h")]
    twenty_four: bool,

    /// Show a seconds card
    #[arg(short, long)]
    second: bool,

    /// Path to a .ttf/.otf font
    #[arg(short, long)]
    font: Option<String>,

    /// Card size relative to the largest that fits, (0, 1]
    #[arg(long)]
    card_scale: Option<f32>,

    /// Digit size relative to the card height, (0, 2]
    #[arg(long)]
    text_scale: Option<f32>,

    /// Generate shell completions and exit
    #[arg(long, value_name = "SHELL")]
    completions: Option<Shell>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Some(shell) = args.completions {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "flipclock", &mut std::io::stdout());
        return Ok(());
    }

    let config_path = args.config.clone().unwrap_or_else(config::default_config_path);
    let mut config = config::load_config(&config_path)?;

    // Apply CLI overrides
    if args.windowed {
        config.clock.full = false;
    }
    if args.fullscreen {
        config.clock.full = true;
    }
    if args.ampm {
        config.clock.ampm = true;
    }
    if args.twenty_four {
        config.clock.ampm = false;
    }
    if args.second {
        config.clock.show_second = true;
    }
    if let Some(font) = args.font {
        config.clock.font = font;
    }
    if let Some(scale) = args.card_scale {
        config.clock.card_scale = scale;
    }
    if let Some(scale) = args.text_scale {
        config.clock.text_scale = scale;
    }
    config.validate();

    log::info!(
        "Starting flipclock: fullscreen={}, ampm={}, seconds={}",
        config.clock.full,
        config.clock.ampm,
        config.clock.show_second
    );
    log::debug!("Card scale {}, text scale {}", config.clock.card_scale, config.clock.text_scale);

    wayland::run(config)
}
