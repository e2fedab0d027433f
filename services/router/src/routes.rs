//! Routes file discovery and parsing.
//!
//! File format, one route per line:
//!
//! ```text
//! # comment
//! // comment
//! survival.example.com    25565
//! creative.example.com    25566
//! ```
//!
//! The hostname ends at the first space and the port starts after the last
//! one, so columns can be aligned freely. Lines that do not parse are
//! skipped.

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::proxy::{RawRoute, RoutingTable, MAX_HOSTNAME_LEN};

/// Routes file name.
pub const CONFIG_FILE_NAME: &str = "minetd.conf";

/// System-wide routes file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/minetd/minetd.conf";

/// Longest hostname, five port digits and two bytes for separators.
const MAX_LINE_LEN: usize = MAX_HOSTNAME_LEN + 5 + 2;

/// Routes read from a file.
#[derive(Debug, Clone)]
pub struct LoadedRoutes {
    /// File the routes came from.
    pub path: PathBuf,
    /// Candidate routes in file order, not yet validated.
    pub routes: Vec<RawRoute>,
}

/// Where routes are read from.
#[derive(Debug, Clone, Default)]
pub struct RouteSource {
    explicit: Option<PathBuf>,
}

impl RouteSource {
    /// Use `path` when given, otherwise search the default locations.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { explicit: path }
    }

    /// Candidate files in the order they are tried.
    ///
    /// `./minetd.conf`, then the user config directory
    /// (`$XDG_CONFIG_HOME/minetd` or `~/.config/minetd`), then `/etc/minetd`.
    pub fn search_paths(&self) -> Vec<PathBuf> {
        if let Some(path) = &self.explicit {
            return vec![path.clone()];
        }

        let mut paths = vec![PathBuf::from(".").join(CONFIG_FILE_NAME)];
        if let Some(dirs) = ProjectDirs::from("", "", "minetd") {
            paths.push(dirs.config_dir().join(CONFIG_FILE_NAME));
        }
        paths.push(PathBuf::from(SYSTEM_CONFIG_PATH));
        paths
    }

    /// Read raw routes from the first readable candidate.
    pub fn load(&self) -> Result<LoadedRoutes, ConfigError> {
        if let Some(path) = &self.explicit {
            return read_routes(path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            });
        }

        let candidates = self.search_paths();
        for path in &candidates {
            match read_routes(path) {
                Ok(loaded) => return Ok(loaded),
                Err(e) => debug!(path = %path.display(), error = %e, "Config candidate skipped"),
            }
        }

        Err(ConfigError::NotFound {
            searched: candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    /// Read and validate routes into a table. Fails if none are valid.
    pub fn load_table(&self) -> Result<(PathBuf, RoutingTable), ConfigError> {
        let loaded = self.load()?;
        let table = RoutingTable::build(loaded.routes);
        if table.is_empty() {
            return Err(ConfigError::Empty { path: loaded.path });
        }

        log_routes(&table);
        Ok((loaded.path, table))
    }
}

fn read_routes(path: &Path) -> std::io::Result<LoadedRoutes> {
    let bytes = fs::read(path)?;
    let contents = String::from_utf8_lossy(&bytes);
    Ok(LoadedRoutes {
        path: path.to_path_buf(),
        routes: parse_routes(&contents),
    })
}

/// Emit one log line per active route.
pub fn log_routes(table: &RoutingTable) {
    for entry in table.entries() {
        info!(hostname = %entry.hostname, backend_port = entry.backend_port, "Route loaded");
    }
}

/// Parse every line of a routes file.
pub fn parse_routes(contents: &str) -> Vec<RawRoute> {
    contents
        .lines()
        .enumerate()
        .filter_map(|(i, line)| parse_line(i + 1, line))
        .collect()
}

/// Split one line into hostname and port text.
///
/// Returns `None` for blank lines, comments, over-long lines and lines
/// without a space. Port and hostname validity are checked later.
pub fn parse_line(line_no: usize, line: &str) -> Option<RawRoute> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
        return None;
    }
    if line.len() > MAX_LINE_LEN {
        debug!(line = line_no, len = line.len(), "Skipping over-long config line");
        return None;
    }

    let (hostname, _) = line.split_once(' ')?;
    let (_, port) = line.rsplit_once(' ')?;
    Some(RawRoute::new(line_no, hostname, port))
}
