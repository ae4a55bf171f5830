use vmforge_common::ConfigError;
use vmforge_providers::truenas::{TrueNasClient, DEFAULT_API_PATH};

use crate::session::Credentials;

/// Connection settings read from the environment (and `.env`).
#[derive(Clone)]
pub struct Settings {
    pub host: String,
    pub api_path: String,
    pub use_tls: bool,
    pub credentials: Credentials,
    pub vnc_password: String,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("host", &self.host)
            .field("api_path", &self.api_path)
            .field("use_tls", &self.use_tls)
            .field("credentials", &self.credentials)
            .field("vnc_password", &"<redacted>")
            .finish()
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// All required variables are checked; the error lists every missing one.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let host = get("TRUENAS_HOST");
        let username = get("API_USERNAME");
        let password = get("API_PASSWORD");
        let vnc_password = get("VNC_PASSWORD");

        let missing: Vec<String> = [
            ("TRUENAS_HOST", host.is_none()),
            ("API_USERNAME", username.is_none()),
            ("API_PASSWORD", password.is_none()),
            ("VNC_PASSWORD", vnc_password.is_none()),
        ]
        .into_iter()
        .filter(|(_, absent)| *absent)
        .map(|(key, _)| key.to_string())
        .collect();

        let (Some(host), Some(username), Some(password), Some(vnc_password)) =
            (host, username, password, vnc_password)
        else {
            return Err(ConfigError::MissingEnv(missing));
        };

        let use_tls = get("TRUENAS_USE_TLS")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            host,
            api_path: get("TRUENAS_API_PATH").unwrap_or_else(|| DEFAULT_API_PATH.to_string()),
            use_tls,
            credentials: Credentials { username, password },
            vnc_password,
        })
    }

    pub fn endpoint(&self) -> String {
        TrueNasClient::endpoint(&self.host, &self.api_path, self.use_tls)
    }
}
