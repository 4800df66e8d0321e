use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use toml::{Table, Value};

use crate::surface::Color;

/// The validated settings handed to clocks and cards.
#[derive(Debug, Clone, Default)]
pub struct FlipClockConfig {
    pub clock: ClockSettings,
    pub theme: ThemeConfig,
}

#[derive(Debug, Clone)]
pub struct ClockSettings {
    pub ampm: bool,
    pub full: bool,
    pub show_second: bool,
    /// Path to a .ttf/.otf file; empty picks a system font.
    pub font: String,
    pub card_scale: f32,
    pub text_scale: f32,
}

#[derive(Debug, Clone)]
pub struct ThemeConfig {
    pub text_color: Color,
    pub box_color: Color,
    pub background_color: Color,
}

// Defaults

fn default_true() -> bool { true }
fn default_scale() -> f32 { 1.0 }

fn default_text_color() -> Color { [0xD0, 0xD0, 0xD0, 0xFF] }
fn default_box_color() -> Color { [0x20, 0x20, 0x20, 0xFF] }
fn default_background_color() -> Color { [0x00, 0x00, 0x00, 0xFF] }

pub fn parse_color(s: &str) -> Result<Color> {
    let s = s.trim_start_matches('#');
    anyhow::ensure!(s.is_ascii() && (s.len() == 6 || s.len() == 8), "Color must be RRGGBB or RRGGBBAA");
    let r = u8::from_str_radix(&s[0..2], 16)?;
    let g = u8::from_str_radix(&s[2..4], 16)?;
    let b = u8::from_str_radix(&s[4..6], 16)?;
    let a = if s.len() == 8 { u8::from_str_radix(&s[6..8], 16)? } else { 0xFF };
    Ok([r, g, b, a])
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            ampm: false,
            full: default_true(),
            show_second: false,
            font: String::new(),
            card_scale: default_scale(),
            text_scale: default_scale(),
        }
    }
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            text_color: default_text_color(),
            box_color: default_box_color(),
            background_color: default_background_color(),
        }
    }
}

impl FlipClockConfig {
    /// Reset out-of-range values to their defaults, logging each one.
    pub fn validate(&mut self) {
        let clock = &mut self.clock;
        if !(clock.card_scale > 0.0 && clock.card_scale <= 1.0) {
            log::warn!("card_scale {} out of range (0, 1], using {}", clock.card_scale, default_scale());
            clock.card_scale = default_scale();
        }
        if !(clock.text_scale > 0.0 && clock.text_scale <= 2.0) {
            log::warn!("text_scale {} out of range (0, 2], using {}", clock.text_scale, default_scale());
            clock.text_scale = default_scale();
        }
    }
}

pub fn default_config_path() -> PathBuf {
    dirs_path().join("config.toml")
}

fn dirs_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
            PathBuf::from(home).join(".config")
        });
    base.join("flipclock")
}

pub fn load_config(path: &Path) -> Result<FlipClockConfig> {
    if !path.exists() {
        log::info!("Config file not found at {}, generating default", path.display());
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match std::fs::write(path, generate_default_config()) {
            Ok(()) => log::info!("Created default config at {}", path.display()),
            Err(e) => log::warn!("Failed to write default config: {}", e),
        }
        return Ok(FlipClockConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    Ok(parse_config(&content))
}

/// Parse settings. Anything unusable (a malformed file, an unknown key, a
/// value of the wrong type or a bad colour) is logged and left at its
/// default; every other value is kept.
pub fn parse_config(content: &str) -> FlipClockConfig {
    let mut config = FlipClockConfig::default();
    let table = match content.parse::<Table>() {
        Ok(table) => table,
        Err(e) => {
            log::warn!("Failed to parse config, using defaults: {}", e);
            return config;
        }
    };
    for (name, value) in table {
        let Some(section) = as_section(&name, value) else { continue };
        match name.as_str() {
            "clock" => config.clock.apply(section),
            "theme" => config.theme.apply(section),
            _ => log::warn!("Ignoring unknown config section [{}]", name),
        }
    }
    config.validate();
    config
}

fn as_section(name: &str, value: Value) -> Option<Table> {
    match value {
        Value::Table(table) => Some(table),
        other => {
            log::warn!("Config entry `{}` should be a [{}] section, found {}", name, name, other.type_str());
            None
        }
    }
}

fn read_value<T: DeserializeOwned>(section: &str, key: &str, value: Value) -> Option<T> {
    value
        .try_into::<T>()
        .map_err(|e| log::warn!("Invalid {}.{}, keeping default: {}", section, key, e))
        .ok()
}

/// Store `value` into `slot`, or keep the current value when it has the
/// wrong type.
fn read_into<T: DeserializeOwned>(slot: &mut T, section: &str, key: &str, value: Value) {
    if let Some(parsed) = read_value(section, key, value) {
        *slot = parsed;
    }
}

fn read_color(slot: &mut Color, section: &str, key: &str, value: Value) {
    let Some(text) = read_value::<String>(section, key, value) else { return };
    match parse_color(&text) {
        Ok(color) => *slot = color,
        Err(e) => log::warn!("Invalid {}.{} `{}`, keeping default: {}", section, key, text, e),
    }
}

impl ClockSettings {
    fn apply(&mut self, table: Table) {
        for (key, value) in table {
            match key.as_str() {
                "ampm" => read_into(&mut self.ampm, "clock", &key, value),
                "full" => read_into(&mut self.full, "clock", &key, value),
                "show_second" => read_into(&mut self.show_second, "clock", &key, value),
                "font" => read_into(&mut self.font, "clock", &key, value),
                "card_scale" => read_into(&mut self.card_scale, "clock", &key, value),
                "text_scale" => read_into(&mut self.text_scale, "clock", &key, value),
                _ => log::warn!("Ignoring unknown key `{}` in [clock]", key),
            }
        }
    }
}

impl ThemeConfig {
    fn apply(&mut self, table: Table) {
        for (key, value) in table {
            match key.as_str() {
                "text_color" => read_color(&mut self.text_color, "theme", &key, value),
                "box_color" => read_color(&mut self.box_color, "theme", &key, value),
                "background_color" => read_color(&mut self.background_color, "theme", &key, value),
                _ => log::warn!("Ignoring unknown key `{}` in [theme]", key),
            }
        }
    }
}

fn generate_default_config() -> String {
    r#"# flipclock configuration
# Generated automatically on first run. Defaults are shown.

[clock]
# 12-hour clock with an AM/PM label on the hour card
ampm = false
# Start fullscreen, one clock per display
full = true
# Show a third card for seconds
show_second = false
# Path to a .ttf/.otf font (empty = find a system monospace font)
font = ""
# Card size relative to the largest that fits, (0, 1]
card_scale = 1.0
# Digit size relative to the card height, (0, 2]
text_scale = 1.0

[theme]
# Colours in RRGGBB or RRGGBBAA hex (# prefix optional)
text_color       = "D0D0D0FF"
box_color        = "202020FF"
background_color = "000000FF"
"#
    .to_string()
}
