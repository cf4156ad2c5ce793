//! Stack aggregate
//!
//! The five deployment artifacts of one service, grouped so checks can
//! relate them by service name, port and environment key.

use serde::{Deserialize, Serialize};

use crate::domain::compose::ComposeTopology;
use crate::domain::deployment::ValuesRecord;
use crate::domain::entrypoint::EntryPoints;
use crate::domain::image::ImageBuildSpec;
use crate::domain::pipeline::{PipelineJob, Step, StepKind};

/// Deployment surface of one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stack {
    pub name: String,
    pub pipeline: PipelineJob,
    pub image: ImageBuildSpec,
    pub values: ValuesRecord,
    pub compose: ComposeTopology,
    pub entrypoints: EntryPoints,
    /// Compose services built from `image`
    pub app_services: Vec<String>,
}

/// Known stack presets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    #[default]
    Banking,
    Frontend,
}

impl Preset {
    pub fn stack(self) -> Stack {
        match self {
            Preset::Banking => Stack::banking(),
            Preset::Frontend => Stack::frontend(),
        }
    }
}

impl Stack {
    pub fn banking() -> Self {
        Self {
            name: "banking".to_string(),
            pipeline: PipelineJob::banking(),
            image: ImageBuildSpec::banking(),
            values: ValuesRecord::banking(),
            compose: ComposeTopology::banking(),
            entrypoints: EntryPoints::banking(),
            app_services: vec!["app".to_string(), "app_test".to_string()],
        }
    }

    pub fn frontend() -> Self {
        let mut pipeline = PipelineJob::banking();
        pipeline
            .steps
            .retain(|s| !matches!(s.kind, StepKind::SetupRuntime { .. }));
        pipeline.steps.insert(
            1,
            Step::new(
                "Set up Node",
                StepKind::SetupRuntime {
                    language: "node".to_string(),
                    version: "20".to_string(),
                },
            ),
        );

        Self {
            name: "frontend".to_string(),
            pipeline,
            image: ImageBuildSpec::frontend(),
            values: ValuesRecord::frontend(),
            compose: ComposeTopology::frontend(),
            entrypoints: EntryPoints::frontend(),
            app_services: vec!["frontend".to_string()],
        }
    }

    /// Compose services built from this stack's image, in name order
    ///
    /// Services named in `app_services` that are missing from the topology
    /// are skipped.
    pub fn app_compose_services(&self) -> Vec<&str> {
        self.compose
            .services
            .keys()
            .filter(|name| self.app_services.iter().any(|a| a == *name))
            .map(String::as_str)
            .collect()
    }
}
