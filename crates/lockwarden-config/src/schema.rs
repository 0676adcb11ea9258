//! Raw configuration schema (as parsed from TOML)
//!
//! Numeric fields are signed so that out-of-range values reach validation
//! and get reported alongside every other problem, instead of failing the
//! TOML parse on the first one.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    #[serde(default)]
    pub service: RawServiceConfig,

    #[serde(default)]
    pub azure: RawAzureConfig,

    #[serde(default)]
    pub locks: RawLockConfig,

    #[serde(default)]
    pub schedule: RawScheduleConfig,

    #[serde(default)]
    pub tags: RawTagConfig,

    #[serde(default)]
    pub cleanup: RawCleanupConfig,

    #[serde(default)]
    pub limits: RawLimitsConfig,
}

impl RawConfig {
    /// A config with every section defaulted, for running from environment alone
    pub fn empty() -> Self {
        Self {
            config_version: crate::CURRENT_CONFIG_VERSION,
            service: Default::default(),
            azure: Default::default(),
            locks: Default::default(),
            schedule: Default::default(),
            tags: Default::default(),
            cleanup: Default::default(),
            limits: Default::default(),
        }
    }
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// HTTP listen address (default: 127.0.0.1:7071)
    pub bind_address: Option<String>,

    /// Data directory for the audit store
    pub data_dir: Option<PathBuf>,

    /// Seconds between schedule evaluations (default: 60)
    pub tick_interval_seconds: Option<i64>,
}

/// Cloud identity. Opaque to the core; handed to the resource-manager adapter.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawAzureConfig {
    pub subscription_id: Option<String>,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,

    /// Resource manager base URL (default: https://management.azure.com)
    pub management_endpoint: Option<String>,

    /// Identity provider base URL (default: https://login.microsoftonline.com)
    pub login_endpoint: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawLockConfig {
    /// Exemption marker lock/tag name (default: HoldLock)
    pub hold_lock_name: Option<String>,

    /// Lock removed by the lock check and re-applied as the budget guard
    pub budget_lock_name: Option<String>,

    pub guard_lock_notes: Option<String>,

    /// Resource groups exempt from the first run on
    #[serde(default)]
    pub allowed_resource_groups: Vec<String>,

    /// Age after which the lock cleanup considers a lock expired (default: 90)
    pub max_age_days: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawScheduleConfig {
    pub lock_check_day: Option<i64>,
    pub lock_check_hour: Option<i64>,
    pub shutdown_hour: Option<i64>,
    pub tag_check_hour: Option<i64>,
    pub tag_check_days: Option<RawDays>,
}

/// Days specification: a preset ("weekdays", "weekends", "all") or a list of names
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawDays {
    Preset(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawTagConfig {
    /// Tag keys every resource must carry, in reporting order
    pub required: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawCleanupConfig {
    /// Allow destructive deletion (orphaned resources, expired locks)
    pub auto_delete: Option<bool>,

    /// Days a VM must be deallocated before it counts as orphaned (default: 30)
    pub min_deallocated_days: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawLimitsConfig {
    /// Worker pool size for per-item remote calls (default: 8)
    pub concurrency: Option<i64>,

    /// Timeout of each remote call (default: 30)
    pub call_timeout_seconds: Option<i64>,

    /// Deadline of a whole run (default: 300)
    pub run_timeout_seconds: Option<i64>,
}
