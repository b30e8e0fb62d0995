//! Settings and credentials for talking to the API
//!
//! Both are plain values constructed once and handed to an `ApiContext`;
//! nothing here is memoized at module level.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use directories::ProjectDirs;

/// Name of the session cookie the API authenticates with
pub const SESSION_COOKIE: &str = "_ncfa";

/// Environment variable holding the session token by default
pub const DEFAULT_CREDENTIAL_VAR: &str = "NCFA_COOKIE";

const DEFAULT_BASE_URL: &str = "https://www.geoguessr.com/";

/// Default timeout for every transport call
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum of simultaneous uncached requests
const DEFAULT_MAX_CONNECTIONS: usize = 1;

/// Runtime settings for dispatchers
#[derive(Debug, Clone)]
pub struct Settings {
    /// Origin that path targets are resolved against
    pub base_url: String,
    pub timeout: Duration,
    /// Maximum simultaneous uncached requests; `None` is unbounded
    pub max_connections: Option<usize>,
    /// Expiry for cached responses without a custom one; `None` never expires
    pub default_expiry: Option<chrono::Duration>,
    pub user_agent: String,
    /// Environment variable the session token is read from
    pub credential_var: String,
    /// Cache root for blocking dispatchers
    pub sync_cache_dir: PathBuf,
    /// Cache root for async dispatchers
    pub async_cache_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        let cache_root = ProjectDirs::from("", "", "geoguessr")
            .map(|dirs| dirs.cache_dir().to_path_buf())
            .unwrap_or_else(|| std::env::temp_dir().join("geoguessr"));

        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            max_connections: Some(DEFAULT_MAX_CONNECTIONS),
            default_expiry: None,
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
            credential_var: DEFAULT_CREDENTIAL_VAR.to_string(),
            sync_cache_dir: cache_root.join("api"),
            async_cache_dir: cache_root.join("api-async"),
        }
    }
}

impl Settings {
    /// Defaults overlaid with `GEOGUESSR_*` environment variables
    ///
    /// - `GEOGUESSR_MAX_CONNECTIONS`: a number, or `0` / `unbounded` to disable the gate
    /// - `GEOGUESSR_TIMEOUT_SECS`: transport timeout in seconds
    /// - `GEOGUESSR_CACHE_DIR`: parent directory of both cache roots
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Ok(value) = std::env::var("GEOGUESSR_MAX_CONNECTIONS") {
            match parse_max_connections(&value) {
                Some(max) => settings.max_connections = max,
                None => tracing::warn!(%value, "ignoring invalid GEOGUESSR_MAX_CONNECTIONS"),
            }
        }

        if let Ok(value) = std::env::var("GEOGUESSR_TIMEOUT_SECS") {
            match value.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => settings.timeout = Duration::from_secs(secs),
                _ => tracing::warn!(%value, "ignoring invalid GEOGUESSR_TIMEOUT_SECS"),
            }
        }

        if let Ok(value) = std::env::var("GEOGUESSR_CACHE_DIR") {
            settings = settings.with_cache_root(PathBuf::from(value));
        }

        settings
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `None` or `Some(0)` disables the gate
    pub fn with_max_connections(mut self, max_connections: Option<usize>) -> Self {
        self.max_connections = max_connections.filter(|&max| max > 0);
        self
    }

    pub fn with_default_expiry(mut self, expiry: Option<chrono::Duration>) -> Self {
        self.default_expiry = expiry;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_credential_var(mut self, var: impl Into<String>) -> Self {
        self.credential_var = var.into();
        self
    }

    /// Places both cache roots under `root`
    pub fn with_cache_root(mut self, root: PathBuf) -> Self {
        self.sync_cache_dir = root.join("api");
        self.async_cache_dir = root.join("api-async");
        self
    }
}

/// `Some(None)` is unbounded, `None` is unparsable
fn parse_max_connections(value: &str) -> Option<Option<usize>> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("unbounded") {
        return Some(None);
    }
    match value.parse::<usize>().ok()? {
        0 => Some(None),
        n => Some(Some(n)),
    }
}

/// The session token, read from the environment on first use
///
/// A missing variable is not an error: requests simply go out
/// unauthenticated and the API decides whether to reject them.
#[derive(Debug)]
pub struct Credential {
    var: String,
    token: OnceLock<String>,
}

impl Credential {
    pub fn from_env(var: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            token: OnceLock::new(),
        }
    }

    /// A credential with a known token, never consulting the environment
    pub fn fixed(token: impl Into<String>) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(token.into());
        Self {
            var: String::new(),
            token: cell,
        }
    }

    pub fn token(&self) -> &str {
        self.token
            .get_or_init(|| std::env::var(&self.var).unwrap_or_default())
    }

    /// Cookie name and value to attach to authenticated requests
    pub fn cookie(&self) -> (String, String) {
        (SESSION_COOKIE.to_string(), self.token().to_string())
    }
}
