//! Configuration validation
//!
//! Every problem is collected; none is clamped or silently replaced.

use crate::policy::{DEFAULT_BUDGET_LOCK_NAME, DEFAULT_HOLD_LOCK_NAME};
use crate::schema::{RawConfig, RawDays};
use lockwarden_util::DaysOfWeek;
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} = {value} is out of range ({min}-{max})")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{field}: {message}")]
    Invalid { field: &'static str, message: String },

    #[error("Duplicate required tag: {0}")]
    DuplicateTag(String),

    #[error("Invalid day specification: {0}")]
    InvalidDaySpec(String),
}

/// Validate a raw configuration (after environment overrides are applied)
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let schedule = &config.schedule;
    check_range(&mut errors, "schedule.lock_check_day", schedule.lock_check_day, 1, 31);
    check_range(&mut errors, "schedule.lock_check_hour", schedule.lock_check_hour, 0, 23);
    check_range(&mut errors, "schedule.shutdown_hour", schedule.shutdown_hour, 0, 23);
    check_range(&mut errors, "schedule.tag_check_hour", schedule.tag_check_hour, 0, 23);

    if let Some(days) = &schedule.tag_check_days {
        match parse_days(days) {
            Ok(mask) if mask.is_empty() => {
                errors.push(ValidationError::InvalidDaySpec("no days selected".into()));
            }
            Ok(_) => {}
            Err(e) => errors.push(ValidationError::InvalidDaySpec(e)),
        }
    }

    if let Some(tags) = &config.tags.required {
        if tags.is_empty() {
            errors.push(ValidationError::Invalid {
                field: "tags.required",
                message: "at least one required tag must be listed".into(),
            });
        }
        let mut seen = HashSet::new();
        for tag in tags {
            if tag.trim().is_empty() {
                errors.push(ValidationError::Invalid {
                    field: "tags.required",
                    message: "tag keys cannot be empty".into(),
                });
            } else if !seen.insert(tag.to_ascii_lowercase()) {
                errors.push(ValidationError::DuplicateTag(tag.clone()));
            }
        }
    }

    let marker = config
        .locks
        .hold_lock_name
        .as_deref()
        .unwrap_or(DEFAULT_HOLD_LOCK_NAME);
    let guard = config
        .locks
        .budget_lock_name
        .as_deref()
        .unwrap_or(DEFAULT_BUDGET_LOCK_NAME);
    if marker.trim().is_empty() {
        errors.push(ValidationError::Invalid {
            field: "locks.hold_lock_name",
            message: "cannot be empty".into(),
        });
    }
    if guard.trim().is_empty() {
        errors.push(ValidationError::Invalid {
            field: "locks.budget_lock_name",
            message: "cannot be empty".into(),
        });
    }
    if !marker.trim().is_empty() && marker.eq_ignore_ascii_case(guard) {
        errors.push(ValidationError::Invalid {
            field: "locks.budget_lock_name",
            message: format!("must differ from the exemption marker '{}'", marker),
        });
    }
    check_range(&mut errors, "locks.max_age_days", config.locks.max_age_days, 1, 36_500);
    for rg in &config.locks.allowed_resource_groups {
        if rg.trim().is_empty() {
            errors.push(ValidationError::Invalid {
                field: "locks.allowed_resource_groups",
                message: "resource group names cannot be empty".into(),
            });
        }
    }

    check_range(
        &mut errors,
        "cleanup.min_deallocated_days",
        config.cleanup.min_deallocated_days,
        0,
        36_500,
    );

    let limits = &config.limits;
    check_range(&mut errors, "limits.concurrency", limits.concurrency, 1, 256);
    check_range(&mut errors, "limits.call_timeout_seconds", limits.call_timeout_seconds, 1, 3600);
    check_range(&mut errors, "limits.run_timeout_seconds", limits.run_timeout_seconds, 1, 86_400);
    check_range(
        &mut errors,
        "service.tick_interval_seconds",
        config.service.tick_interval_seconds,
        1,
        3600,
    );

    match config.azure.subscription_id.as_deref() {
        Some(id) if !id.trim().is_empty() => {
            if id.contains('/') {
                errors.push(ValidationError::Invalid {
                    field: "azure.subscription_id",
                    message: "must be a bare id, not a scope path".into(),
                });
            }
        }
        _ => errors.push(ValidationError::Missing("azure.subscription_id")),
    }

    errors
}

fn check_range(
    errors: &mut Vec<ValidationError>,
    field: &'static str,
    value: Option<i64>,
    min: i64,
    max: i64,
) {
    if let Some(value) = value
        && !(min..=max).contains(&value)
    {
        errors.push(ValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
}

/// Parse days specification
pub fn parse_days(days: &RawDays) -> Result<DaysOfWeek, String> {
    match days {
        RawDays::Preset(preset) => match preset.to_lowercase().as_str() {
            "all" | "every" | "daily" => Ok(DaysOfWeek::ALL_DAYS),
            "weekdays" => Ok(DaysOfWeek::WEEKDAYS),
            "weekends" => Ok(DaysOfWeek::WEEKENDS),
            other => Err(format!("Unknown day preset: {}", other)),
        },
        RawDays::List(list) => {
            let mut mask = 0u8;
            for day in list {
                let bit = match day.to_lowercase().as_str() {
                    "mon" | "monday" => DaysOfWeek::MONDAY,
                    "tue" | "tuesday" => DaysOfWeek::TUESDAY,
                    "wed" | "wednesday" => DaysOfWeek::WEDNESDAY,
                    "thu" | "thursday" => DaysOfWeek::THURSDAY,
                    "fri" | "friday" => DaysOfWeek::FRIDAY,
                    "sat" | "saturday" => DaysOfWeek::SATURDAY,
                    "sun" | "sunday" => DaysOfWeek::SUNDAY,
                    other => return Err(format!("Unknown day: {}", other)),
                };
                mask |= bit;
            }
            Ok(DaysOfWeek::new(mask))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> RawConfig {
        let mut raw = RawConfig::empty();
        raw.azure.subscription_id = Some("00000000-0000-0000-0000-000000000001".into());
        raw
    }

    #[test]
    fn defaults_with_subscription_are_valid() {
        assert!(validate_config(&valid()).is_empty());
    }

    #[test]
    fn missing_subscription_is_reported() {
        let errors = validate_config(&RawConfig::empty());
        assert_eq!(errors, vec![ValidationError::Missing("azure.subscription_id")]);
    }

    #[test]
    fn out_of_range_values_are_all_reported() {
        let mut raw = valid();
        raw.schedule.lock_check_day = Some(0);
        raw.schedule.shutdown_hour = Some(24);
        raw.schedule.tag_check_hour = Some(-1);
        raw.limits.concurrency = Some(0);
        raw.limits.call_timeout_seconds = Some(0);
        raw.locks.max_age_days = Some(0);
        raw.cleanup.min_deallocated_days = Some(-3);

        let errors = validate_config(&raw);
        let fields: Vec<&str> = errors
            .iter()
            .filter_map(|e| match e {
                ValidationError::OutOfRange { field, .. } => Some(*field),
                _ => None,
            })
            .collect();
        assert_eq!(
            fields,
            vec![
                "schedule.lock_check_day",
                "schedule.shutdown_hour",
                "schedule.tag_check_hour",
                "locks.max_age_days",
                "cleanup.min_deallocated_days",
                "limits.concurrency",
                "limits.call_timeout_seconds",
            ]
        );
    }

    #[test]
    fn boundary_values_are_accepted() {
        let mut raw = valid();
        raw.schedule.lock_check_day = Some(31);
        raw.schedule.lock_check_hour = Some(0);
        raw.schedule.shutdown_hour = Some(23);
        raw.cleanup.min_deallocated_days = Some(0);
        assert!(validate_config(&raw).is_empty());
    }

    #[test]
    fn required_tags_must_be_unique_and_non_empty() {
        let mut raw = valid();
        raw.tags.required = Some(vec![]);
        assert!(matches!(
            validate_config(&raw).as_slice(),
            [ValidationError::Invalid { field: "tags.required", .. }]
        ));

        raw.tags.required = Some(vec!["Owner".into(), "owner".into()]);
        assert_eq!(
            validate_config(&raw),
            vec![ValidationError::DuplicateTag("owner".into())]
        );
    }

    #[test]
    fn marker_and_guard_names_must_differ() {
        let mut raw = valid();
        raw.locks.hold_lock_name = Some("Guard".into());
        raw.locks.budget_lock_name = Some("guard".into());
        assert_eq!(validate_config(&raw).len(), 1);
    }

    #[test]
    fn test_parse_days() {
        assert_eq!(
            parse_days(&RawDays::Preset("weekdays".into())).unwrap(),
            DaysOfWeek::WEEKDAYS
        );
        assert_eq!(
            parse_days(&RawDays::Preset("weekends".into())).unwrap(),
            DaysOfWeek::WEEKENDS
        );
        assert_eq!(
            parse_days(&RawDays::List(vec!["mon".into(), "wed".into(), "fri".into()])).unwrap(),
            DaysOfWeek::new(DaysOfWeek::MONDAY | DaysOfWeek::WEDNESDAY | DaysOfWeek::FRIDAY)
        );
        assert!(parse_days(&RawDays::List(vec!["funday".into()])).is_err());
    }

    #[test]
    fn empty_day_list_is_rejected() {
        let mut raw = valid();
        raw.schedule.tag_check_days = Some(RawDays::List(vec![]));
        assert!(matches!(
            validate_config(&raw).as_slice(),
            [ValidationError::InvalidDaySpec(_)]
        ));
    }
}
