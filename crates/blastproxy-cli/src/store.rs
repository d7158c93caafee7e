//! Persisted server list
//!
//! Wraps the configuration file with the edits the CLI offers: add, edit and
//! remove servers, and set the backend executable. Every edit is validated
//! before it is written back.

use std::path::{Path, PathBuf};

use blastproxy_core::config::{read_from_file, save_to_file};
use blastproxy_core::{PortConfig, ProxyConfig, ProxyError, ProxyResult};

/// Configuration file plus its loaded contents
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    config: ProxyConfig,
}

impl ConfigStore {
    /// Load the store; a missing file starts from defaults
    ///
    /// The file is not validated here, so an invalid one can still be
    /// repaired. `save` refuses to write anything invalid.
    pub fn load(path: impl Into<PathBuf>) -> ProxyResult<Self> {
        let path = path.into();
        let config = read_from_file(&path)?;
        Ok(Self { path, config })
    }

    /// File backing this store
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current configuration
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Configured servers in display order
    pub fn servers(&self) -> &[PortConfig] {
        &self.config.servers
    }

    /// Write the configuration back
    pub fn save(&self) -> ProxyResult<()> {
        save_to_file(&self.path, &self.config)
    }

    /// Append a server; the port must not be configured yet
    pub fn add_server(&mut self, port: u16, image: impl Into<PathBuf>) -> ProxyResult<()> {
        if self.config.server(port).is_some() {
            return Err(ProxyError::config(format!(
                "port {} is already configured",
                port
            )));
        }
        self.config.servers.push(PortConfig::new(port, image));
        if let Err(e) = self.config.validate() {
            self.config.servers.pop();
            return Err(e);
        }
        Ok(())
    }

    /// Change the port and/or image of an existing server, keeping its position
    pub fn edit_server(
        &mut self,
        port: u16,
        new_port: Option<u16>,
        new_image: Option<PathBuf>,
    ) -> ProxyResult<PortConfig> {
        let index = self.index_of(port)?;
        let target_port = new_port.unwrap_or(port);
        if target_port == 0 {
            return Err(ProxyError::config("port 0 cannot be served"));
        }
        if target_port != port && self.config.server(target_port).is_some() {
            return Err(ProxyError::config(format!(
                "port {} is already configured",
                target_port
            )));
        }

        let entry = &mut self.config.servers[index];
        entry.port = target_port;
        if let Some(image) = new_image {
            entry.image = image;
        }
        Ok(entry.clone())
    }

    /// Remove a server
    pub fn remove_server(&mut self, port: u16) -> ProxyResult<PortConfig> {
        let index = self.index_of(port)?;
        Ok(self.config.servers.remove(index))
    }

    /// Set the emulator executable
    pub fn set_backend(&mut self, path: impl Into<PathBuf>) {
        self.config.backend_executable = path.into();
    }

    fn index_of(&self, port: u16) -> ProxyResult<usize> {
        self.config
            .servers
            .iter()
            .position(|s| s.port == port)
            .ok_or_else(|| ProxyError::config(format!("no server configured on port {}", port)))
    }
}
