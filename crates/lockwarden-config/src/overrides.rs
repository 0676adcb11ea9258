//! Environment overrides
//!
//! The service binary reads the environment (through clap) and hands the
//! values over here; this crate never touches the process environment.

use crate::schema::RawConfig;

/// Values that take precedence over the config file
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub lock_check_day: Option<i64>,
    pub lock_check_hour: Option<i64>,
    pub shutdown_hour: Option<i64>,
    pub tag_check_hour: Option<i64>,
    /// Comma-separated tag keys
    pub required_tags: Option<String>,
    pub hold_lock_name: Option<String>,
    pub budget_lock_name: Option<String>,
    pub subscription_id: Option<String>,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub auto_delete: Option<bool>,
}

impl EnvOverrides {
    /// Apply every set override onto `raw`
    pub fn apply(&self, raw: &mut RawConfig) {
        fn set<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                target.clone_from(value);
            }
        }

        set(&mut raw.schedule.lock_check_day, &self.lock_check_day);
        set(&mut raw.schedule.lock_check_hour, &self.lock_check_hour);
        set(&mut raw.schedule.shutdown_hour, &self.shutdown_hour);
        set(&mut raw.schedule.tag_check_hour, &self.tag_check_hour);
        set(&mut raw.locks.hold_lock_name, &self.hold_lock_name);
        set(&mut raw.locks.budget_lock_name, &self.budget_lock_name);
        set(&mut raw.azure.subscription_id, &self.subscription_id);
        set(&mut raw.azure.tenant_id, &self.tenant_id);
        set(&mut raw.azure.client_id, &self.client_id);
        set(&mut raw.azure.client_secret, &self.client_secret);
        set(&mut raw.cleanup.auto_delete, &self.auto_delete);

        if let Some(tags) = &self.required_tags {
            raw.tags.required = Some(split_tag_list(tags));
        }
    }
}

/// Split a comma-separated tag list, trimming whitespace
pub fn split_tag_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}
