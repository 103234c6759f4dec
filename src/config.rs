use std::{path::PathBuf, str::FromStr, time::Duration};

pub const DEFAULT_USER_AGENT: &str = "YARC-Launcher (contact@yarg.in)";

/// Public key every release archive is signed with.
pub const EMBEDDED_PUBLIC_KEY: &str = "untrusted comment: minisign public key C26EBBBEC4C1DB81
RWSB28HEvrtuwvPn3pweVBodgVi/d+UH22xDsL3K8VBgeRqaIrDdTvps
";

const ENV_BASE_DIR: &str = "SETLIST_LAUNCHER_BASE_DIR";
const ENV_USER_AGENT: &str = "SETLIST_LAUNCHER_USER_AGENT";
const ENV_REQUIRE_SIGNATURES: &str = "SETLIST_LAUNCHER_REQUIRE_SIGNATURES";
const ENV_CACHE_TTL_SECS: &str = "SETLIST_LAUNCHER_CACHE_TTL_SECS";
const ENV_LOG: &str = "SETLIST_LAUNCHER_LOG";

#[derive(Debug, Clone)]
pub struct LauncherConfig {
    /// Replaces the platform data directory as the base of every launcher path.
    pub base_dir_override: Option<PathBuf>,
    pub user_agent: String,
    /// Refuse release files that ship without a signature.
    pub require_signatures: bool,
    /// How long a cached query result stays usable.
    pub cache_ttl: Duration,
    pub log_level: tracing::Level,
    pub progress_throttle: Duration,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            base_dir_override: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            require_signatures: true,
            cache_ttl: Duration::from_secs(60 * 60),
            log_level: tracing::Level::INFO,
            progress_throttle: Duration::from_millis(100),
        }
    }
}

impl LauncherConfig {
    /// Defaults overridden by `SETLIST_LAUNCHER_*` environment variables.
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(base) = lookup(ENV_BASE_DIR).filter(|v| !v.trim().is_empty()) {
            config.base_dir_override = Some(PathBuf::from(base));
        }
        if let Some(agent) = lookup(ENV_USER_AGENT).filter(|v| !v.trim().is_empty()) {
            config.user_agent = agent;
        }
        if let Some(require) = parse_var::<bool>(&lookup, ENV_REQUIRE_SIGNATURES) {
            config.require_signatures = require;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_CACHE_TTL_SECS) {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(level) = parse_var::<tracing::Level>(&lookup, ENV_LOG) {
            config.log_level = level;
        }

        config
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable configuration value");
            None
        }
    }
}
