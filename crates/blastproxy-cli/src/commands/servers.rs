//! Server list management commands

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::console::CliConsole;
use crate::store::ConfigStore;

fn open(config_file: &Path) -> Result<ConfigStore> {
    ConfigStore::load(config_file)
        .with_context(|| format!("failed to load {}", config_file.display()))
}

fn save(store: &ConfigStore) -> Result<()> {
    store
        .save()
        .with_context(|| format!("failed to write {}", store.path().display()))
}

/// Add a server
pub fn add(config_file: &Path, port: u16, image: PathBuf) -> Result<()> {
    let console = CliConsole::new(true);
    let mut store = open(config_file)?;

    if !image.exists() {
        console.warn(&format!("Image {} does not exist yet", image.display()));
    }
    store.add_server(port, &image)?;
    save(&store)?;

    console.success(&format!("Serving {} on port {}", image.display(), port));
    Ok(())
}

/// Change a server's port and/or image
pub fn edit(
    config_file: &Path,
    port: u16,
    new_port: Option<u16>,
    image: Option<PathBuf>,
) -> Result<()> {
    let console = CliConsole::new(true);
    if new_port.is_none() && image.is_none() {
        console.warn("Nothing to change; pass --new-port and/or --image");
        return Ok(());
    }

    let mut store = open(config_file)?;
    let updated = store.edit_server(port, new_port, image)?;
    save(&store)?;

    console.success(&format!(
        "Port {} now serves {} on port {}",
        port,
        updated.image.display(),
        updated.port
    ));
    Ok(())
}

/// Remove a server
pub fn remove(config_file: &Path, port: u16) -> Result<()> {
    let console = CliConsole::new(true);
    let mut store = open(config_file)?;
    let removed = store.remove_server(port)?;
    save(&store)?;

    console.success(&format!(
        "Removed port {} ({})",
        removed.port,
        removed.image.display()
    ));
    Ok(())
}

/// Show configured servers
pub fn list(config_file: &Path, verbose: bool) -> Result<()> {
    let console = CliConsole::new(verbose);
    let store = open(config_file)?;
    let config = store.config();

    console.print_header("Servers");
    if store.servers().is_empty() {
        console.warn("No servers configured; add one with `blastproxy add <port> <image>`");
    }
    for server in store.servers() {
        console.print_server(server.port, &server.image.display().to_string());
    }

    println!();
    if config.backend_executable.as_os_str().is_empty() {
        console.warn("Backend executable not set; use `blastproxy set-backend <path>`");
    } else {
        println!("Backend: {}", config.backend_executable.display());
    }
    console.info(&format!("Bind address: {}", config.bind_address));
    console.info(&format!("Transport: {:?}", config.transport));
    console.info(&format!("Config file: {}", store.path().display()));
    Ok(())
}

/// Set the emulator executable
pub fn set_backend(config_file: &Path, path: PathBuf) -> Result<()> {
    let console = CliConsole::new(true);
    let mut store = open(config_file)?;

    if !path.is_file() {
        console.warn(&format!("{} is not a file", path.display()));
    }
    store.set_backend(&path);
    save(&store)?;

    console.success(&format!("Backend set to {}", path.display()));
    Ok(())
}
