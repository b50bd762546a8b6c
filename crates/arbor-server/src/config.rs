//! Server configuration.

/// Runtime configuration, read from the environment with sane defaults.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port. `0` picks an ephemeral port.
    pub port: u16,
    /// Default log level when `RUST_LOG` is unset.
    pub log_level: String,
    /// Maximum accepted request body size in bytes.
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 3000,
            log_level: "info".to_owned(),
            // Leave headroom over the inline-file cap for base64 overhead
            // and the surrounding conversation payload.
            body_limit_bytes: 32 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Read configuration from `ARBOR_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("ARBOR_HOST").unwrap_or(defaults.host),
            port: std::env::var("ARBOR_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: std::env::var("ARBOR_LOG_LEVEL").unwrap_or(defaults.log_level),
            body_limit_bytes: std::env::var("ARBOR_BODY_LIMIT_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.body_limit_bytes),
        }
    }

    /// The socket address string to bind.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
