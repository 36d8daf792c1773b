//! Profile lookup against the main application.
//!
//! Display names live in the platform's relational store; the gateway
//! reaches them through the internal profile API and treats the whole
//! thing as a narrow collaborator that either answers or fails typed.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use mentorlink_core::{DirectoryError, ProfileDirectory};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    display_name: String,
}

/// Profile directory backed by the main application's internal HTTP API.
pub struct HttpDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDirectory {
    /// Create a directory client for the given base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ProfileDirectory for HttpDirectory {
    async fn display_name(&self, identity: &str) -> Result<String, DirectoryError> {
        let url = format!(
            "{}/internal/profiles/{}",
            self.base_url.trim_end_matches('/'),
            identity
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| DirectoryError::Unavailable(err.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(DirectoryError::NotFound(identity.to_string()));
        }

        let response = response
            .error_for_status()
            .map_err(|err| DirectoryError::Unavailable(err.to_string()))?;

        let profile: ProfileResponse = response
            .json()
            .await
            .map_err(|err| DirectoryError::Unavailable(err.to_string()))?;

        Ok(profile.display_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_response_shape() {
        let profile: ProfileResponse =
            serde_json::from_str(r#"{"displayName": "Alice Chen"}"#).unwrap();
        assert_eq!(profile.display_name, "Alice Chen");
    }

    #[tokio::test]
    async fn test_unreachable_directory_is_typed_unavailable() {
        // Port 9 (discard) refuses connections on any sane machine.
        let directory = HttpDirectory::new("http://127.0.0.1:9");
        match directory.display_name("u1").await {
            Err(DirectoryError::Unavailable(_)) => {}
            other => panic!("Expected Unavailable, got {:?}", other),
        }
    }
}
