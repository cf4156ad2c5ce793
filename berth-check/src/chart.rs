//! `unresolved-placeholder`: the chart renders cleanly with the values record
//!
//! A template the engine cannot parse (e.g. one calling a named template
//! with `include`) is a warning: the chart may still be valid for Helm.

use berth_core::domain::stack::Stack;
use berth_core::report::{Finding, RuleId};
use berth_render::RenderError;
use berth_render::chart::{ChartTemplates, render_chart_with};

pub fn check_placeholders(stack: &Stack, templates: &ChartTemplates) -> Vec<Finding> {
    match render_chart_with(templates, &stack.values, &stack.name) {
        Ok(_) => Vec::new(),
        Err(RenderError::Unresolved {
            template,
            placeholders,
        }) => placeholders
            .into_iter()
            .map(|placeholder| {
                Finding::error(
                    RuleId::UnresolvedPlaceholder,
                    format!("chart/{}", template),
                    format!("'{}' is left in the rendered output", placeholder),
                )
            })
            .collect(),
        Err(RenderError::Undefined { template, message }) => vec![Finding::error(
            RuleId::UnresolvedPlaceholder,
            format!("chart/{}", template),
            message,
        )],
        Err(RenderError::Syntax { template, message }) => vec![Finding::warning(
            RuleId::UnresolvedPlaceholder,
            format!("chart/{}", template),
            format!("template was not checked: {}", message),
        )],
        Err(err) => vec![Finding::error(
            RuleId::UnresolvedPlaceholder,
            "chart",
            err.to_string(),
        )],
    }
}
