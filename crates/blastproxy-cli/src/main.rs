//! BlastProxy CLI application
//!
//! Serves one GDB remote port per configured ROM image and launches a fresh
//! BlastEm for every debugger that connects.
//!
//! # Usage
//!
//! ```bash
//! blastproxy set-backend /opt/blastem/blastem
//! blastproxy add 2345 roms/sonic.bin
//! blastproxy serve --watch
//! ```
//!
//! Then point GDB at it with `target remote localhost:2345`.

mod args;
mod commands;
mod console;
mod logging;
mod router;
mod signal_handler;
mod store;
mod watcher;

use clap::Parser;

use args::Cli;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    router::route(cli).await
}
