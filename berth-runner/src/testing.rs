//! In-memory container engine for tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::engine::{ContainerEngine, ExecOutput};
use crate::error::Result;

/// Records every call; `exec` answers with the scripted exit code of the
/// service (0 by default)
#[derive(Default)]
pub struct FakeEngine {
    pub calls: Mutex<Vec<String>>,
    pub exit_codes: Mutex<HashMap<String, Vec<i32>>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues exit codes returned by successive `exec` calls on `service`
    pub fn script(self, service: &str, codes: &[i32]) -> Self {
        self.exit_codes
            .lock()
            .unwrap()
            .insert(service.to_string(), codes.to_vec());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn up(&self, profile: &str, services: &[String]) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("up {} {}", profile, services.join(" ")).trim_end().to_string());
        Ok(())
    }

    async fn down(&self, profile: &str) -> Result<()> {
        self.calls.lock().unwrap().push(format!("down {}", profile));
        Ok(())
    }

    async fn exec(&self, _profile: &str, service: &str, command: &[String]) -> Result<ExecOutput> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("exec {} {}", service, command.join(" ")));

        let exit_code = {
            let mut codes = self.exit_codes.lock().unwrap();
            match codes.get_mut(service) {
                Some(queue) if !queue.is_empty() => queue.remove(0),
                _ => 0,
            }
        };

        Ok(ExecOutput {
            stdout: String::new(),
            stderr: if exit_code == 0 { String::new() } else { "failed".to_string() },
            exit_code,
        })
    }

    async fn version(&self) -> Result<String> {
        Ok("fake 1.0".to_string())
    }
}
