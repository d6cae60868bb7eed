use anyhow::{Context, Result};
use tg_core::Settings;

/// Print the effective settings as TOML
pub fn cmd_config_show(settings: &Settings) -> Result<()> {
  let rendered = toml::to_string_pretty(settings).context("Failed to render settings")?;
  println!("{}", rendered);
  Ok(())
}
