//! Command routing logic for CLI

use anyhow::Result;
use blastproxy_core::LoggingConfig;
use blastproxy_core::config::load_from_file;
use tracing::warn;

use crate::args::{Cli, Commands};
use crate::{commands, logging};

/// Route CLI commands to their respective handlers
pub async fn route(cli: Cli) -> Result<()> {
    // An invalid file must not lock out the commands that repair it
    match load_from_file(&cli.config) {
        Ok(config) => logging::init(&config.logging, cli.verbose),
        Err(e) => {
            logging::init(&LoggingConfig::default(), cli.verbose);
            warn!("Using default logging, {} is invalid: {}", cli.config.display(), e);
        }
    }

    match cli.command {
        Commands::Serve { watch } => commands::serve::serve(&cli.config, watch).await,
        Commands::Add { port, image } => commands::servers::add(&cli.config, port, image),
        Commands::Edit {
            port,
            new_port,
            image,
        } => commands::servers::edit(&cli.config, port, new_port, image),
        Commands::Remove { port } => commands::servers::remove(&cli.config, port),
        Commands::List => commands::servers::list(&cli.config, cli.verbose),
        Commands::SetBackend { path } => commands::servers::set_backend(&cli.config, path),
    }
}
