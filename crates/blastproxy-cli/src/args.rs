//! CLI argument definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Default configuration file name used across all CLI commands.
pub const DEFAULT_CONFIG_FILE: &str = "blastproxy.json";

#[derive(Parser)]
#[command(name = "blastproxy")]
#[command(about = "BlastProxy - GDB remote protocol proxy for the BlastEm emulator")]
#[command(
    long_about = r#"BlastProxy - GDB remote protocol proxy for the BlastEm emulator

Each configured port serves one ROM image. Every debugger that connects gets
its own BlastEm, started as `<backend> <image> -D`, which is killed again when
the debugger detaches or disconnects.

USAGE:
  blastproxy set-backend <path>      # Configure the BlastEm executable
  blastproxy add <port> <image>      # Serve an image on a port
  blastproxy list                    # Show configured servers
  blastproxy serve                   # Start serving"#
)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (JSON, or TOML with a .toml extension)
    #[arg(long, short, global = true, env = "BLASTPROXY_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start a listener for every configured server and relay until Ctrl-C
    Serve {
        /// Apply changes to the configuration file while running
        #[arg(long, short)]
        watch: bool,
    },

    /// Add a server
    Add {
        /// TCP port the debugger connects to
        port: u16,
        /// ROM image to debug
        image: PathBuf,
    },

    /// Change the port and/or image of a server
    Edit {
        /// Port of the server to change
        port: u16,
        /// New port
        #[arg(long)]
        new_port: Option<u16>,
        /// New ROM image
        #[arg(long)]
        image: Option<PathBuf>,
    },

    /// Remove a server
    Remove {
        /// Port of the server to remove
        port: u16,
    },

    /// List configured servers
    List,

    /// Set the BlastEm executable
    SetBackend {
        /// Path to the BlastEm executable
        path: PathBuf,
    },
}
