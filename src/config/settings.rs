use clap::Parser;
use std::path::{Path, PathBuf};

/// Config file name under the home directory
const CONFIG_FILE: &str = ".trzsz.conf";

/// Command line arguments
#[derive(Parser, Debug)]
#[command(
    name = "trzsz",
    version,
    about = "Wrapping command line to support trzsz ( trz / tsz )",
    disable_version_flag = true,
    arg_required_else_help = true
)]
pub struct Config {
    /// Show version number and exit
    #[arg(short = 'v', long, action = clap::ArgAction::Version)]
    version: Option<bool>,

    /// Enable trace log for debugging
    #[arg(short = 't', long)]
    pub tracelog: bool,

    /// Enable drag file(s) to upload
    #[arg(short = 'd', long)]
    pub dragfile: bool,

    /// The original command line
    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        required = true,
        value_name = "COMMAND LINE"
    )]
    pub command: Vec<String>,
}

impl Config {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Program and arguments of the wrapped command
    pub fn command_and_args(&self) -> Option<(String, Vec<String>)> {
        let (command, args) = self.command.split_first()?;
        Some((command.clone(), args.to_vec()))
    }
}

/// Settings from `~/.trzsz.conf`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    /// Save directory used instead of asking
    pub default_download_path: Option<PathBuf>,

    /// Starting folder of the upload dialog
    pub default_upload_path: Option<PathBuf>,
}

impl Settings {
    /// Load settings from the home directory, or defaults if unavailable
    pub fn load() -> Self {
        match dirs::home_dir() {
            Some(home) => Self::load_from(&home.join(CONFIG_FILE)),
            None => Self::default(),
        }
    }

    /// Load settings from `path`; a missing or unreadable file yields defaults
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(e) => {
                tracing::debug!("No config at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Parse newline-delimited `key=value` content
    pub fn parse(content: &str) -> Self {
        Self {
            default_download_path: lookup(content, "DefaultDownloadPath").map(PathBuf::from),
            default_upload_path: lookup(content, "DefaultUploadPath").map(PathBuf::from),
        }
    }
}

/// First line whose trimmed key equals `name`; a blank value means absent
fn lookup<'a>(content: &'a str, name: &str) -> Option<&'a str> {
    content
        .lines()
        .filter_map(|line| line.split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}
