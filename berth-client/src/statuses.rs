//! Commit status endpoints

use berth_core::dto::status::{CommitStatus, StatusRecord};
use tracing::{debug, info};

use crate::HostingClient;
use crate::error::{ClientError, Result};

impl HostingClient {
    /// Posts a status for a commit
    ///
    /// # Arguments
    /// * `repo` - Repository as `owner/name`
    /// * `sha` - Commit the status is attached to
    /// * `status` - State, context and description
    ///
    /// # Returns
    /// The status as stored by the platform
    pub async fn post_status(
        &self,
        repo: &str,
        sha: &str,
        status: &CommitStatus,
    ) -> Result<StatusRecord> {
        let url = self.statuses_url(repo, sha)?;
        debug!("POST {} ({})", url, status.state);

        let response = self
            .authorized(self.client.post(&url))
            .json(status)
            .send()
            .await?;

        let record: StatusRecord = self.handle_response(response).await?;
        info!(
            "Posted {} status '{}' for {}@{}",
            record.state, record.context, repo, sha
        );
        Ok(record)
    }

    /// Lists the statuses of a commit, newest first
    pub async fn list_statuses(&self, repo: &str, sha: &str) -> Result<Vec<StatusRecord>> {
        let url = self.statuses_url(repo, sha)?;
        let response = self.authorized(self.client.get(&url)).send().await?;
        self.handle_response(response).await
    }

    fn statuses_url(&self, repo: &str, sha: &str) -> Result<String> {
        let (owner, name) = split_repo(repo)?;
        if sha.trim().is_empty() {
            return Err(ClientError::InvalidRequest("commit sha cannot be empty".to_string()));
        }
        Ok(format!(
            "{}/repos/{}/{}/statuses/{}",
            self.base_url, owner, name, sha
        ))
    }
}

/// Splits `owner/name`
pub fn split_repo(repo: &str) -> Result<(&str, &str)> {
    match repo.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((owner, name))
        }
        _ => Err(ClientError::InvalidRequest(format!(
            "repository must be 'owner/name', got '{}'",
            repo
        ))),
    }
}
