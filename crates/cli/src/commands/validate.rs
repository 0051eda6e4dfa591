//! `validate` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use contracts::RelayConfig;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    outputs: Vec<String>,
    metrics_queue_capacity: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    outputs: config
                        .outputs
                        .enabled_destinations()
                        .iter()
                        .map(|d| d.to_string())
                        .collect(),
                    metrics_queue_capacity: config.metrics.queue_capacity,
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &RelayConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    let outputs = &config.outputs;

    if outputs.enabled_destinations().is_empty() {
        warnings.push("No outputs enabled - events will be discarded".to_string());
    }

    if let Some(es) = outputs.elasticsearch.as_ref().filter(|c| c.enabled) {
        if es.credentials().is_none() && half_configured(&es.username, &es.password) {
            warnings.push(
                "outputs.elasticsearch: only one of username/password is set - sending without authentication"
                    .to_string(),
            );
        }
        if !es.check_cert {
            warnings.push("outputs.elasticsearch: certificate verification is disabled".to_string());
        }
    }

    if let Some(mqtt) = outputs.mqtt.as_ref().filter(|c| c.enabled) {
        if mqtt.credentials().is_none() && half_configured(&mqtt.user, &mqtt.password) {
            warnings.push(
                "outputs.mqtt: only one of user/password is set - connecting anonymously".to_string(),
            );
        }
        if !mqtt.check_cert && mqtt.broker_address().is_ok_and(|a| a.tls) {
            warnings.push("outputs.mqtt: certificate verification is disabled".to_string());
        }
    }

    if let Some(webhook) = outputs.webhook.as_ref().filter(|c| c.enabled) {
        if !webhook.check_cert && webhook.address.starts_with("https") {
            warnings.push("outputs.webhook: certificate verification is disabled".to_string());
        }
    }

    warnings
}

fn half_configured(user: &Option<String>, password: &Option<String>) -> bool {
    let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
    set(user) || set(password)
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            if summary.outputs.is_empty() {
                println!("\n  Outputs: (none)");
            } else {
                println!("\n  Outputs: {}", summary.outputs.join(", "));
            }
            println!("  Metrics queue: {}", summary.metrics_queue_capacity);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
