//! Validated configuration
//!
//! `GovernanceConfig` is built once at startup and passed by reference into
//! every component.

use crate::schema::RawConfig;
use crate::validation::parse_days;
use lockwarden_util::{DaysOfWeek, ResourceGroupName, ScheduleWindow};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LOCK_CHECK_DAY: u8 = 2;
pub const DEFAULT_LOCK_CHECK_HOUR: u8 = 8;
pub const DEFAULT_SHUTDOWN_HOUR: u8 = 19;
pub const DEFAULT_TAG_CHECK_HOUR: u8 = 19;
pub const DEFAULT_REQUIRED_TAGS: [&str; 3] = ["Environment", "Owner", "Project"];
pub const DEFAULT_HOLD_LOCK_NAME: &str = "HoldLock";
pub const DEFAULT_BUDGET_LOCK_NAME: &str = "Prevent-Spending-BudgetControl";
pub const DEFAULT_GUARD_LOCK_NOTES: &str =
    "Temporary lock to prevent spending costs, the subscription's budget has been exceeded.";
pub const DEFAULT_LOCK_MAX_AGE_DAYS: u32 = 90;
pub const DEFAULT_MIN_DEALLOCATED_DAYS: u32 = 30;
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:7071";
pub const DEFAULT_MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";
pub const DEFAULT_LOGIN_ENDPOINT: &str = "https://login.microsoftonline.com";

/// Validated configuration
#[derive(Debug, Clone)]
pub struct GovernanceConfig {
    pub service: ServiceConfig,
    pub azure: AzureConfig,
    pub locks: LockPolicy,
    pub schedule: SchedulePolicy,
    pub tags: TagPolicy,
    pub cleanup: CleanupPolicy,
    pub limits: Limits,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_address: String,
    /// None means the binary picks the platform default
    pub data_dir: Option<PathBuf>,
    pub tick_interval: Duration,
}

/// Cloud identity handed to the resource-manager adapter
#[derive(Clone)]
pub struct AzureConfig {
    pub subscription_id: String,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub management_endpoint: String,
    pub login_endpoint: String,
}

impl AzureConfig {
    pub fn has_credentials(&self) -> bool {
        self.tenant_id.is_some() && self.client_id.is_some() && self.client_secret.is_some()
    }
}

impl fmt::Debug for AzureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureConfig")
            .field("subscription_id", &self.subscription_id)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("management_endpoint", &self.management_endpoint)
            .field("login_endpoint", &self.login_endpoint)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct LockPolicy {
    /// Exemption marker: a lock (or tag) with this name protects its resource group
    pub marker_name: String,
    /// Target of the lock check and name of the budget guard lock
    pub guard_lock_name: String,
    pub guard_lock_notes: String,
    /// Initial AllowedSet seed
    pub allowed_resource_groups: Vec<ResourceGroupName>,
    pub max_age_days: u32,
}

#[derive(Debug, Clone)]
pub struct SchedulePolicy {
    pub lock_check_day: u8,
    pub lock_check_hour: u8,
    /// Reported only; no workflow shuts VMs down
    pub shutdown_hour: u8,
    pub tag_check_hour: u8,
    pub tag_check_days: DaysOfWeek,
}

#[derive(Debug, Clone)]
pub struct TagPolicy {
    pub required: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CleanupPolicy {
    /// Single switch for every destructive deletion
    pub auto_delete: bool,
    pub min_deallocated_days: u32,
}

#[derive(Debug, Clone)]
pub struct Limits {
    pub concurrency: usize,
    pub call_timeout: Duration,
    pub run_timeout: Duration,
}

impl GovernanceConfig {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        let schedule = &raw.schedule;
        let tag_check_days = schedule
            .tag_check_days
            .as_ref()
            .and_then(|d| parse_days(d).ok())
            .unwrap_or(DaysOfWeek::WEEKDAYS);

        Self {
            service: ServiceConfig {
                bind_address: raw
                    .service
                    .bind_address
                    .clone()
                    .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
                data_dir: raw.service.data_dir.clone(),
                tick_interval: secs(raw.service.tick_interval_seconds, 60),
            },
            azure: AzureConfig {
                subscription_id: raw.azure.subscription_id.clone().unwrap_or_default(),
                tenant_id: raw.azure.tenant_id.clone(),
                client_id: raw.azure.client_id.clone(),
                client_secret: raw.azure.client_secret.clone(),
                management_endpoint: raw
                    .azure
                    .management_endpoint
                    .clone()
                    .unwrap_or_else(|| DEFAULT_MANAGEMENT_ENDPOINT.to_string()),
                login_endpoint: raw
                    .azure
                    .login_endpoint
                    .clone()
                    .unwrap_or_else(|| DEFAULT_LOGIN_ENDPOINT.to_string()),
            },
            locks: LockPolicy {
                marker_name: raw
                    .locks
                    .hold_lock_name
                    .clone()
                    .unwrap_or_else(|| DEFAULT_HOLD_LOCK_NAME.to_string()),
                guard_lock_name: raw
                    .locks
                    .budget_lock_name
                    .clone()
                    .unwrap_or_else(|| DEFAULT_BUDGET_LOCK_NAME.to_string()),
                guard_lock_notes: raw
                    .locks
                    .guard_lock_notes
                    .clone()
                    .unwrap_or_else(|| DEFAULT_GUARD_LOCK_NOTES.to_string()),
                allowed_resource_groups: raw
                    .locks
                    .allowed_resource_groups
                    .iter()
                    .map(|rg| ResourceGroupName::new(rg.trim()))
                    .collect(),
                max_age_days: small(raw.locks.max_age_days, DEFAULT_LOCK_MAX_AGE_DAYS),
            },
            schedule: SchedulePolicy {
                lock_check_day: small(schedule.lock_check_day, DEFAULT_LOCK_CHECK_DAY),
                lock_check_hour: small(schedule.lock_check_hour, DEFAULT_LOCK_CHECK_HOUR),
                shutdown_hour: small(schedule.shutdown_hour, DEFAULT_SHUTDOWN_HOUR),
                tag_check_hour: small(schedule.tag_check_hour, DEFAULT_TAG_CHECK_HOUR),
                tag_check_days,
            },
            tags: TagPolicy {
                required: raw.tags.required.clone().unwrap_or_else(|| {
                    DEFAULT_REQUIRED_TAGS.iter().map(|t| t.to_string()).collect()
                }),
            },
            cleanup: CleanupPolicy {
                auto_delete: raw.cleanup.auto_delete.unwrap_or(false),
                min_deallocated_days: small(
                    raw.cleanup.min_deallocated_days,
                    DEFAULT_MIN_DEALLOCATED_DAYS,
                ),
            },
            limits: Limits {
                concurrency: small(raw.limits.concurrency, 8usize),
                call_timeout: secs(raw.limits.call_timeout_seconds, 30),
                run_timeout: secs(raw.limits.run_timeout_seconds, 300),
            },
        }
    }

    /// Window of the scheduled lock check
    pub fn lock_check_window(&self) -> ScheduleWindow {
        ScheduleWindow::DayOfMonth {
            day: self.schedule.lock_check_day,
            hour: Some(self.schedule.lock_check_hour),
        }
    }

    /// Window of the scheduled tag cleanup
    pub fn tag_check_window(&self) -> ScheduleWindow {
        ScheduleWindow::Weekdays {
            days: self.schedule.tag_check_days,
            hour: self.schedule.tag_check_hour,
        }
    }

    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            config_version: crate::CURRENT_CONFIG_VERSION,
            subscription_id: self.azure.subscription_id.clone(),
            credentials_configured: self.azure.has_credentials(),
            lock_check_day: self.schedule.lock_check_day,
            lock_check_hour: self.schedule.lock_check_hour,
            lock_check_window: self.lock_check_window().describe(),
            shutdown_hour: self.schedule.shutdown_hour,
            tag_check_hour: self.schedule.tag_check_hour,
            tag_check_days: self
                .schedule
                .tag_check_days
                .names()
                .into_iter()
                .map(String::from)
                .collect(),
            tag_check_window: self.tag_check_window().describe(),
            required_tags: self.tags.required.clone(),
            hold_lock_name: self.locks.marker_name.clone(),
            budget_lock_name: self.locks.guard_lock_name.clone(),
            allowed_resource_groups: self.locks.allowed_resource_groups.clone(),
            lock_max_age_days: self.locks.max_age_days,
            auto_delete: self.cleanup.auto_delete,
            min_deallocated_days: self.cleanup.min_deallocated_days,
            concurrency: self.limits.concurrency,
            call_timeout_seconds: self.limits.call_timeout.as_secs(),
            run_timeout_seconds: self.limits.run_timeout.as_secs(),
        }
    }
}

/// Human-facing view of the effective configuration (no secrets)
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub config_version: u32,
    pub subscription_id: String,
    pub credentials_configured: bool,
    pub lock_check_day: u8,
    pub lock_check_hour: u8,
    pub lock_check_window: String,
    pub shutdown_hour: u8,
    pub tag_check_hour: u8,
    pub tag_check_days: Vec<String>,
    pub tag_check_window: String,
    pub required_tags: Vec<String>,
    pub hold_lock_name: String,
    pub budget_lock_name: String,
    pub allowed_resource_groups: Vec<ResourceGroupName>,
    pub lock_max_age_days: u32,
    pub auto_delete: bool,
    pub min_deallocated_days: u32,
    pub concurrency: usize,
    pub call_timeout_seconds: u64,
    pub run_timeout_seconds: u64,
}

/// Validated values are in range, so conversion failure only means "use the default"
fn small<T: TryFrom<i64>>(value: Option<i64>, default: T) -> T {
    value.and_then(|v| T::try_from(v).ok()).unwrap_or(default)
}

fn secs(value: Option<i64>, default: u64) -> Duration {
    Duration::from_secs(small(value, default))
}
