pub mod config;

use clap::{Parser, Subcommand};

use lb_domain::config::Config;

/// linkbridge: keeps one linked messaging session alive and exposes it
/// over HTTP.
#[derive(Debug, Parser)]
#[command(name = "linkbridge", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the bridge server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `LB_CONFIG` (or
/// `config.toml` by default).  Returns the parsed [`Config`] and the
/// path that was used.
///
/// A missing file is not an error: every section has defaults. `PORT`
/// overrides `server.port` so hosting platforms can assign the port.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("LB_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let mut config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        parse_config(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        Config::default()
    };

    if let Ok(port) = std::env::var("PORT") {
        apply_port_override(&mut config, &port)?;
    }

    Ok((config, config_path))
}

pub fn parse_config(raw: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(raw)
}

fn apply_port_override(config: &mut Config, port: &str) -> anyhow::Result<()> {
    config.server.port = port
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid PORT {port:?}: {e}"))?;
    Ok(())
}
