//! Command line
//!
//! Flags override the loaded [`AutopatchConfig`]; the merged config then
//! yields the session options.

use std::path::PathBuf;

use autopatch_conf::AutopatchConfig;
use clap::Parser;

use crate::listing::ListOptions;
use crate::session::SessionOptions;

/// Connect audio and MIDI ports automatically by name pattern.
///
/// Patterns come in pairs: every output port matching OUTPUT is connected to
/// every input port matching INPUT. Named groups captured by OUTPUT can be
/// used in INPUT as {name}.
#[derive(Parser, Debug, Default)]
#[command(name = "autopatch", version, about, long_about = None)]
pub struct Cli {
    /// Pattern pairs: OUTPUT INPUT [OUTPUT INPUT ...]
    #[arg(value_name = "PATTERN")]
    pub patterns: Vec<String>,

    /// Read pattern pairs from FILE, re-read on SIGHUP
    #[arg(short = 'p', long, value_name = "FILE")]
    pub pattern_file: Option<PathBuf>,

    /// Match names literally unless a pattern is written as /regex/
    #[arg(short = 'e', long)]
    pub exact_matching: bool,

    /// Client name to register with the graph server
    #[arg(short = 'N', long, value_name = "NAME")]
    pub client_name: Option<String>,

    /// Seconds to wait between connection attempts
    #[arg(short = 'I', long, value_name = "SECONDS", value_parser = parse_interval)]
    pub connect_interval: Option<f64>,

    /// Connection attempts before giving up, 0 retries forever
    #[arg(short = 'm', long, value_name = "NUM")]
    pub max_attempts: Option<u32>,

    /// Include aliases when listing ports
    #[arg(short = 'a', long)]
    pub aliases: bool,

    /// Include pretty names when listing ports
    #[arg(short = 'n', long)]
    pub pretty_names: bool,

    /// List input ports and exit
    #[arg(short = 'i', long)]
    pub list_inputs: bool,

    /// List output ports and exit
    #[arg(short = 'o', long)]
    pub list_outputs: bool,

    /// List connections and exit
    #[arg(short = 'c', long)]
    pub list_connections: bool,

    /// Print listings as JSON
    #[arg(long)]
    pub json: bool,

    /// Log level
    #[arg(
        short = 'v',
        long,
        value_name = "LEVEL",
        value_parser = ["error", "warn", "info", "debug", "trace"]
    )]
    pub verbosity: Option<String>,

    /// Config file, replacing ./autopatch.toml
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    pub print_config: bool,
}

fn parse_interval(s: &str) -> Result<f64, String> {
    let secs: f64 = s.parse().map_err(|_| format!("'{s}' is not a number"))?;
    if secs.is_finite() && secs >= 0.0 {
        Ok(secs)
    } else {
        Err(format!("'{s}' must be a non-negative number of seconds"))
    }
}

impl Cli {
    /// Overlay explicitly given flags onto `config`.
    pub fn apply_to(&self, config: &mut AutopatchConfig) {
        if let Some(ref name) = self.client_name {
            config.session.client_name = name.clone();
        }
        if let Some(interval) = self.connect_interval {
            config.session.connect_interval = interval;
        }
        if let Some(max) = self.max_attempts {
            config.session.max_attempts = max;
        }
        if let Some(ref path) = self.pattern_file {
            config.matching.pattern_file = Some(path.clone());
        }
        if self.exact_matching {
            config.matching.exact = true;
        }
        if let Some(ref level) = self.verbosity {
            config.logging.level = level.clone();
        }
    }

    pub fn list_options(&self) -> ListOptions {
        ListOptions {
            inputs: self.list_inputs,
            outputs: self.list_outputs,
            connections: self.list_connections,
            aliases: self.aliases,
            pretty_names: self.pretty_names,
        }
    }
}

/// Session options for a merged config. Listing runs get a single attempt
/// and no reconnect.
pub fn session_options(config: &AutopatchConfig, one_shot: bool) -> SessionOptions {
    SessionOptions {
        client_name: config.session.client_name.clone(),
        connect_interval: config.session.connect_interval(),
        max_attempts: if one_shot { 1 } else { config.session.max_attempts },
        poll_interval: config.session.poll_interval(),
        reconnect: !one_shot,
    }
}
