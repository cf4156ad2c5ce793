//! Check command handlers
//!
//! Runs the consistency rules over the loaded directory.

use anyhow::{Context, Result, bail};
use berth_core::report::{Finding, Report, Severity};
use clap::ValueEnum;
use colored::*;

use crate::config::Config;

/// Report output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Handle the check command
///
/// Fails when the report carries at least one error so the exit status
/// can gate a pipeline.
pub fn handle_check_command(format: OutputFormat, config: &Config) -> Result<()> {
    let loaded = config.load()?;
    let report = berth_check::check_loaded(&loaded);

    match format {
        OutputFormat::Text => {
            for source in &loaded.sources {
                println!("{} {}", "Loaded".dimmed(), source.display());
            }
            print_report(&report);
        }
        OutputFormat::Json => {
            let json =
                serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
            println!("{}", json);
        }
    }

    let errors = report.errors().count();
    if errors > 0 {
        bail!("{} consistency error(s) in stack '{}'", errors, report.stack);
    }

    Ok(())
}

fn print_report(report: &Report) {
    if report.findings.is_empty() {
        println!(
            "{}",
            format!("✓ Stack '{}' is consistent", report.stack)
                .green()
                .bold()
        );
        return;
    }

    println!();
    for finding in &report.findings {
        println!("{}", format_finding(finding));
    }
    println!();
    println!(
        "{} error(s), {} warning(s)",
        report.errors().count().to_string().red().bold(),
        report.warnings().count().to_string().yellow().bold()
    );
}

fn format_finding(finding: &Finding) -> String {
    let severity = match finding.severity {
        Severity::Error => "error".red().bold(),
        Severity::Warning => "warning".yellow().bold(),
    };
    format!(
        "{}[{}] {}: {}",
        severity,
        finding.rule,
        finding.subject.cyan(),
        finding.message
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_core::report::RuleId;

    #[test]
    fn test_format_finding() {
        colored::control::set_override(false);
        let finding = Finding::error(
            RuleId::HostReference,
            "compose/dev/app:DB_HOST",
            "'database' is not a service",
        );
        assert_eq!(
            format_finding(&finding),
            "error[host-reference] compose/dev/app:DB_HOST: 'database' is not a service"
        );
    }

    #[test]
    fn test_preset_directory_passes() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("berth.yaml"), "preset: banking\n").unwrap();

        let config = Config {
            dir: dir.path().to_path_buf(),
            manifest: None,
        };
        handle_check_command(OutputFormat::Json, &config).unwrap();
    }
}
