//! Berth Check
//!
//! Cross-artifact consistency rules. Every rule reads a `Stack` (and, for
//! directory scans, the Makefiles found next to it) and yields findings;
//! no rule stops the others from running.

pub mod chart;
pub mod entrypoints;
pub mod ports;
pub mod topology;
pub mod values;

use berth_core::domain::stack::Stack;
use berth_core::report::Report;
use berth_render::LoadedDir;
use berth_render::chart::ChartTemplates;
use std::path::Path;
use tracing::{debug, info};

/// Runs every stack-level rule with the bundled chart templates
pub fn check_stack(stack: &Stack) -> Report {
    check_stack_with(stack, &ChartTemplates::default())
}

/// Runs every stack-level rule, rendering `templates` for the placeholder check
pub fn check_stack_with(stack: &Stack, templates: &ChartTemplates) -> Report {
    let mut report = Report::new(&stack.name);

    debug!("Checking stack '{}'", stack.name);

    report.extend(topology::check_host_references(&stack.compose));
    report.extend(topology::check_dependency_edges(&stack.compose));
    report.extend(ports::check_container_ports(stack));
    report.extend(chart::check_placeholders(stack, templates));
    report.extend(entrypoints::check_readiness(stack));
    report.extend(values::check_values(stack));

    report.sort();
    report
}

/// Checks a loaded directory, including the Makefile variant scan
pub fn check_loaded(loaded: &LoadedDir) -> Report {
    let templates = loaded.chart_templates.clone().unwrap_or_default();
    let mut report = check_stack_with(&loaded.stack, &templates);

    report.extend(entrypoints::check_makefile_conflicts(&loaded.makefiles));
    report.extend(entrypoints::check_makefile_sleeps(&loaded.makefiles));

    report.sort();
    info!(
        "Checked '{}': {} errors, {} warnings",
        report.stack,
        report.errors().count(),
        report.warnings().count()
    );
    report
}

/// Loads `path` and checks it
pub fn check_dir(path: impl AsRef<Path>) -> berth_render::Result<Report> {
    let loaded = berth_render::load_dir(path)?;
    Ok(check_loaded(&loaded))
}
