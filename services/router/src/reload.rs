//! Route reloads on SIGHUP.
//!
//! A reload reads the routes file again and swaps in a new snapshot. When the
//! file is gone or has no valid route, the configured [`ReloadPolicy`]
//! decides between stopping the process and keeping the current table.

use clap::ValueEnum;
use tokio::signal::unix::Signal;
use tracing::{error, info};

use crate::error::{ConfigError, RouterError};
use crate::proxy::{RouteError, SharedRouteTable};
use crate::routes::{log_routes, RouteSource};

/// Behaviour when a reload finds no usable routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ReloadPolicy {
    /// Stop the process (exit code 3).
    #[default]
    Exit,
    /// Keep serving the previous table and log the failure.
    Keep,
}

/// Rebuilds the shared route table from its source.
pub struct Reloader {
    source: RouteSource,
    route_table: SharedRouteTable,
    policy: ReloadPolicy,
}

impl Reloader {
    pub fn new(source: RouteSource, route_table: SharedRouteTable, policy: ReloadPolicy) -> Self {
        Self {
            source,
            route_table,
            policy,
        }
    }

    /// Read the source and publish a new table.
    ///
    /// Returns the number of active routes. The published table is left
    /// untouched on error.
    pub fn reload(&self) -> Result<usize, ConfigError> {
        let loaded = self.source.load()?;
        let route_count = self
            .route_table
            .reload(loaded.routes)
            .map_err(|_: RouteError| ConfigError::Empty {
                path: loaded.path.clone(),
            })?;

        log_routes(&self.route_table.load());
        info!(
            config_path = %loaded.path.display(),
            route_count = route_count,
            "Routes reloaded"
        );
        Ok(route_count)
    }

    /// Reload and apply the failure policy.
    pub fn reload_with_policy(&self) -> Result<(), RouterError> {
        match self.reload() {
            Ok(_) => Ok(()),
            Err(e) => match self.policy {
                ReloadPolicy::Exit => Err(RouterError::Reload(e)),
                ReloadPolicy::Keep => {
                    error!(
                        error = %e,
                        route_count = self.route_table.len(),
                        "Reload failed, keeping previous routes"
                    );
                    Ok(())
                }
            },
        }
    }

    /// Reload on every SIGHUP until the policy says stop.
    ///
    /// `hangup` must be registered before the process starts serving so an
    /// early SIGHUP is queued instead of terminating the process.
    pub async fn run(self, mut hangup: Signal) -> Result<(), RouterError> {
        while hangup.recv().await.is_some() {
            info!("SIGHUP received, reloading routes");
            self.reload_with_policy()?;
        }

        Ok(())
    }
}
