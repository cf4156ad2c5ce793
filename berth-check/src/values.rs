//! `values`: per-artifact validation

use berth_core::domain::stack::Stack;
use berth_core::report::{Finding, RuleId};

pub fn check_values(stack: &Stack) -> Vec<Finding> {
    let results = [
        ("values", stack.values.validate()),
        ("image", stack.image.validate()),
        ("pipeline", stack.pipeline.validate()),
        ("entrypoints", stack.entrypoints.validate()),
    ];

    results
        .into_iter()
        .filter_map(|(subject, result)| {
            result
                .err()
                .map(|err| Finding::error(RuleId::Values, subject, err.to_string()))
        })
        .collect()
}
