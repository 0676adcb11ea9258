//! Config validation CLI tool
//!
//! Validates a lockwarden configuration file and prints the effective
//! settings, or every validation error.

use lockwarden_config::{ConfigError, EnvOverrides, CURRENT_CONFIG_VERSION};
use lockwarden_util::default_config_path;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a lockwarden configuration file.");
            eprintln!("Environment overrides are not applied; the file is checked as written.");
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config {}", default_path.display());
            eprintln!("  validate-config config.example.toml");
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match lockwarden_config::load_config(&config_path, &EnvOverrides::default()) {
        Ok(config) => {
            let summary = config.summary();
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", CURRENT_CONFIG_VERSION);
            println!("  Subscription: {}", summary.subscription_id);
            println!(
                "  Credentials: {}",
                if summary.credentials_configured { "configured" } else { "not configured" }
            );
            println!("  Lock check: {}", summary.lock_check_window);
            println!("  Tag check: {}", summary.tag_check_window);
            println!("  Shutdown hour: {:02}:00 UTC", summary.shutdown_hour);
            println!("  Required tags: {}", summary.required_tags.join(", "));
            println!("  Exemption marker: {}", summary.hold_lock_name);
            println!("  Guard lock: {}", summary.budget_lock_name);
            println!("  Lock max age: {} days", summary.lock_max_age_days);
            println!(
                "  Destructive cleanup: {}",
                if summary.auto_delete { "ENABLED" } else { "disabled (report only)" }
            );
            if !summary.allowed_resource_groups.is_empty() {
                println!();
                println!("Allowed resource groups:");
                for rg in &summary.allowed_resource_groups {
                    println!("  - {}", rg);
                }
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver, CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
