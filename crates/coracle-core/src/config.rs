//! Configuration for the coracle client
//!
//! Explicit defaults, validation, reasonable limits.

use crate::constants::*;
use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

/// Preferred address family for local endpoint selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    #[default]
    V4,
    V6,
}

/// Configuration of one pluggable provider
///
/// Providers form a static registry populated from configuration at build
/// time; there is no dynamic loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider instance name
    pub name: String,
    /// Provider kind, e.g. "statistics"
    pub kind: String,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

/// Client configuration, immutable after construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Gateway endpoints in host:port form
    #[serde(default)]
    pub gateways: Vec<String>,

    /// Response timeout for outbound requests (milliseconds)
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Resend budget per message; 0 disables resends
    #[serde(default)]
    pub message_resend_count_max: u32,

    /// Whether expired messages are dropped at the defined phases
    #[serde(default = "default_true")]
    pub drop_expired_messages: bool,

    /// Selects the validating standard serializer over the raw one
    #[serde(default = "default_true")]
    pub use_standard_serializer: bool,

    /// Preferred address family for the local endpoint
    #[serde(default)]
    pub preferred_family: AddressFamily,

    /// Optional interface name constraining local address selection
    #[serde(default)]
    pub net_interface: Option<String>,

    /// Host name recorded in telemetry rows and logs
    #[serde(default = "default_dns_host_name")]
    pub dns_host_name: String,

    /// Deployment id, the partition-key prefix of telemetry rows
    #[serde(default = "default_deployment_id")]
    pub deployment_id: String,

    /// Pluggable provider configurations (statistics providers among them)
    #[serde(default)]
    pub provider_configurations: Vec<ProviderConfig>,

    /// Chosen statistics provider; set post-init when one was selected
    #[serde(default)]
    pub statistics_provider_name: Option<String>,

    /// Interval between statistics flushes (milliseconds)
    #[serde(default = "default_stats_flush_interval_ms")]
    pub statistics_flush_interval_ms: u64,

    /// Secondary construction mode: suppresses global handler installation
    ///
    /// Used by test harnesses hosting more than one client per process.
    #[serde(default)]
    pub secondary: bool,
}

fn default_response_timeout_ms() -> u64 {
    RESPONSE_TIMEOUT_MS_DEFAULT
}

fn default_true() -> bool {
    true
}

fn default_dns_host_name() -> String {
    "localhost".to_string()
}

fn default_deployment_id() -> String {
    "dev".to_string()
}

fn default_stats_flush_interval_ms() -> u64 {
    STATS_FLUSH_INTERVAL_MS_DEFAULT
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            gateways: Vec::new(),
            response_timeout_ms: default_response_timeout_ms(),
            message_resend_count_max: 0,
            drop_expired_messages: true,
            use_standard_serializer: true,
            preferred_family: AddressFamily::default(),
            net_interface: None,
            dns_host_name: default_dns_host_name(),
            deployment_id: default_deployment_id(),
            provider_configurations: Vec::new(),
            statistics_provider_name: None,
            statistics_flush_interval_ms: default_stats_flush_interval_ms(),
            secondary: false,
        }
    }
}

impl ClientConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.response_timeout_ms == 0 {
            return Err(ClientError::config_invalid(
                "response_timeout_ms",
                "must be positive",
            ));
        }

        if self.message_resend_count_max > MESSAGE_RESEND_COUNT_MAX {
            return Err(ClientError::config_invalid(
                "message_resend_count_max",
                format!(
                    "{} exceeds limit {}",
                    self.message_resend_count_max, MESSAGE_RESEND_COUNT_MAX
                ),
            ));
        }

        if self.gateways.is_empty() {
            return Err(ClientError::config_invalid(
                "gateways",
                "at least one gateway endpoint is required",
            ));
        }
        self.parsed_gateways()?;

        if self.statistics_flush_interval_ms == 0 {
            return Err(ClientError::config_invalid(
                "statistics_flush_interval_ms",
                "must be positive",
            ));
        }

        if self.deployment_id.is_empty() {
            return Err(ClientError::config_invalid(
                "deployment_id",
                "must not be empty",
            ));
        }

        Ok(())
    }

    /// Parse the configured gateway endpoints
    pub fn parsed_gateways(&self) -> Result<Vec<SocketAddr>> {
        self.gateways
            .iter()
            .map(|g| {
                g.parse::<SocketAddr>().map_err(|e| {
                    ClientError::config_invalid("gateways", format!("{}: {}", g, e))
                })
            })
            .collect()
    }

    /// The response timeout in effect, honoring debugger attachment at init
    pub fn effective_response_timeout(&self, debugger_attached: bool) -> Duration {
        let ms = if debugger_attached {
            RESPONSE_TIMEOUT_MS_DEBUG.max(self.response_timeout_ms)
        } else {
            self.response_timeout_ms
        };
        Duration::from_millis(ms)
    }
}
