use parking_lot::RwLock;
use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
};
use tracing::{error, info};

use super::{cli::CliConfig, clients::ClientsConfig, limits::Limits, types::LogLevel};

// -----------------------------------------------------------------------------
// ----- ConfigHandle ----------------------------------------------------------

/// Shared, read-mostly handle to the current [`Limits`].
///
/// Readers get an `Arc` to an immutable snapshot; writers publish a whole new
/// snapshot. A reader therefore never observes half of an update.
#[derive(Clone, Debug)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<Limits>>>,
}

impl ConfigHandle {
    pub fn new(limits: Limits) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(limits))),
        }
    }

    pub fn snapshot(&self) -> Arc<Limits> {
        self.inner.read().clone()
    }

    pub fn publish(&self, limits: Limits) {
        *self.inner.write() = Arc::new(limits);
    }

    /// Copy-modify-publish helper for runtime tweaks.
    pub fn update(&self, f: impl FnOnce(&mut Limits)) {
        let mut guard = self.inner.write();
        let mut next = Limits::clone(&guard);
        f(&mut next);
        *guard = Arc::new(next);
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(Limits::default())
    }
}

// -----------------------------------------------------------------------------
// ----- Config ----------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: LogLevel,
    pub config_file: PathBuf,
    pub clients_file: PathBuf,
    pub limits: ConfigHandle,
    pub clients: ClientsConfig,
}

// -----------------------------------------------------------------------------
// ----- Config: Static --------------------------------------------------------

impl Config {
    /// Boot-time load. Panics on any error: do not start with a bad state.
    pub async fn init() -> Config {
        let cli = CliConfig::from_env();

        let limits = Limits::from_file(&cli.config_file_location)
            .await
            .unwrap_or_else(|e| {
                panic!(
                    "failed to load gateway config from {:?}: {e}",
                    cli.config_file_location
                )
            });

        let clients = ClientsConfig::from_file(&cli.clients_file_location)
            .await
            .unwrap_or_else(|e| {
                panic!(
                    "failed to load clients config from {:?}: {e}",
                    cli.clients_file_location
                )
            });

        Config {
            listen_addr: cli.listen_addr,
            log_level: cli.log_level,
            config_file: cli.config_file_location,
            clients_file: cli.clients_file_location,
            limits: ConfigHandle::new(limits),
            clients,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Config: Public --------------------------------------------------------

impl Config {
    /// Re-read both files. On error the previous snapshot stays in place.
    pub async fn reload(&self) {
        match Limits::from_file(&self.config_file).await {
            Ok(next) => {
                self.limits.publish(next);
                info!("gateway config reloaded from {:?}", self.config_file);
            }
            Err(e) => {
                error!(
                    "reload failed; keeping previous gateway config. path={:?} error={}",
                    self.config_file, e
                );
            }
        }

        self.clients.reload(&self.clients_file).await;
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
