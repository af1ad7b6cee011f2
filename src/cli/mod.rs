use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::screen::ScreenProfile;

#[derive(Parser)]
#[command(name = "mayhem-remote")]
#[command(about = "📡 Remote control for PortaPack radios running Mayhem", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Serial port to use instead of USB enumeration
    #[arg(long, global = true)]
    pub port: Option<String>,

    /// Screen profile (overrides the config file)
    #[arg(long, global = true, value_enum)]
    pub profile: Option<ScreenProfile>,

    /// TOML config file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Do not reconnect automatically after the link drops
    #[arg(long, global = true)]
    pub no_reconnect: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List USB serial devices
    Devices,

    /// Open the radio, print its screen size and link capabilities
    Probe {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Save one screen frame as PNG
    Capture {
        /// Output file
        #[arg(short, long, default_value = "mayhem-screen.png")]
        out: PathBuf,
    },

    /// Interactive remote control
    Remote {
        /// Drive the built-in firmware emulator instead of real hardware
        #[arg(long)]
        demo: bool,

        /// Image protocol for the screen (kitty, sixel, iterm2, halfblocks)
        #[arg(short, long)]
        graphics: Option<String>,

        /// Log file (the terminal belongs to the UI)
        #[arg(long, default_value = "mayhem-remote.log")]
        log_file: String,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
