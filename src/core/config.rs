//! Environment-driven runtime configuration.
//!
//! Resolved once at process startup, centralized here since this crate has
//! one long-running server entry point rather than many CLI subcommands.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_AGENT: &str = "default-agent";
const DEFAULT_CLAIM_TTL_SECS: u64 = 60;
const DEFAULT_UI_PORT: u16 = 4747;

#[derive(Debug, Clone)]
pub struct Config {
    pub agent: String,
    pub db_path: PathBuf,
    pub claim_ttl: Duration,
    pub ui_port: u16,
}

impl Config {
    /// Resolve configuration from environment variables, falling back to
    /// the documented defaults.
    pub fn from_env() -> Self {
        let agent = env::var("GRAPH_AGENT")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_AGENT.to_string());

        let db_path = env::var("GRAPH_DB")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_db_path);

        let claim_ttl = env::var("GRAPH_CLAIM_TTL")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(DEFAULT_CLAIM_TTL_SECS));

        let ui_port = env::var("GRAPH_UI_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(DEFAULT_UI_PORT);

        Self {
            agent,
            db_path,
            claim_ttl,
            ui_port,
        }
    }
}

/// Default DB path: `~/.graph/db/<hash-of-cwd>/graph.db`, so distinct
/// working directories get isolated, stable databases without any explicit
/// configuration.
fn default_db_path() -> PathBuf {
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let hash = hash_path(&cwd);
    let home = env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."));
    home.join(".graph")
        .join("db")
        .join(hash)
        .join("graph.db")
}

fn hash_path(path: &std::path::Path) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    path.to_string_lossy().hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_path_is_stable() {
        let p = PathBuf::from("/some/dir");
        assert_eq!(hash_path(&p), hash_path(&p));
    }

    #[test]
    fn hash_path_differs_per_dir() {
        assert_ne!(
            hash_path(&PathBuf::from("/a")),
            hash_path(&PathBuf::from("/b"))
        );
    }
}
