//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the hub.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the chat hub.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HubConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Visitor session expiry.
    pub presence: PresenceConfig,

    /// WebSocket ping/pong liveness checks.
    pub heartbeat: HeartbeatConfig,

    /// Chat history persistence.
    pub persistence: PersistenceConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Security hardening.
    pub security: SecurityConfig,

    /// Agent accounts allowed to open consoles.
    pub agents: Vec<AgentConfig>,

    /// Visitor arrival notifications.
    pub notification: NotificationConfig,

    /// Raw TCP listener for legacy clients.
    pub legacy_tcp: LegacyTcpConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl HubConfig {
    /// Look up the agent owning `token`.
    pub fn agent_for_token(&self, token: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.token == token)
    }

    /// Whether an agent with this name is configured.
    pub fn has_agent(&self, name: &str) -> bool {
        self.agents.iter().any(|a| a.name == name)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8081").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8081".to_string(),
            tls: None,
            max_connections: 10_000,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Visitor session expiry.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Idle time after which a visitor session is evicted, in seconds.
    pub visitor_ttl_secs: u64,

    /// Time between sweeper passes, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            visitor_ttl_secs: 600,
            sweep_interval_secs: 60,
        }
    }
}

/// WebSocket liveness checks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Interval between server pings, in seconds.
    pub ping_interval_secs: u64,

    /// Time to wait for a pong before closing, in seconds.
    pub pong_timeout_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
        }
    }
}

/// Chat history persistence.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Maximum storage writes in flight at once.
    pub max_in_flight: usize,

    /// Messages kept per visitor by the in-memory store.
    pub history_limit: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 64,
            history_limit: 500,
        }
    }
}

/// Timeout configuration for HTTP requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Maximum requests per second per IP.
    pub requests_per_second: u32,

    /// Burst capacity.
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 10,
            burst_size: 20,
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// IPs refused on visitor endpoints at startup.
    pub ip_blacklist: Vec<String>,

    /// Maximum inbound WebSocket frame size in bytes.
    pub max_frame_size: usize,

    /// Maximum HTTP body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            ip_blacklist: Vec::new(),
            max_frame_size: 64 * 1024,
            max_body_size: 64 * 1024,
        }
    }
}

/// One agent account.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    /// Agent name; visitors are routed by it.
    pub name: String,

    /// Bearer token presented by the agent console.
    pub token: String,

    /// Display name shown to visitors.
    #[serde(default)]
    pub nickname: String,

    /// Greeting returned by `/notice`.
    #[serde(default)]
    pub welcome: String,
}

/// Visitor arrival notifications.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Enable notifications.
    pub enabled: bool,

    /// Webhook receiving a JSON POST per arrival. Log-only when unset.
    pub webhook_url: Option<String>,

    /// Webhook request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            webhook_url: None,
            timeout_secs: 5,
        }
    }
}

/// Raw TCP listener for legacy clients.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LegacyTcpConfig {
    /// Enable the raw listener.
    pub enabled: bool,

    /// Bind address.
    pub bind_address: String,

    /// Maximum concurrent raw clients.
    pub max_connections: usize,
}

impl Default for LegacyTcpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "0.0.0.0:8083".to_string(),
            max_connections: 1_000,
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin endpoints.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
