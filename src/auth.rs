//! OAuth token handling for the Google providers.
//!
//! Tokens are stored per account as `token_<email>.json` in the configured
//! token directory, in the same shape the provider's auth flow writes
//! them. An expired access token is refreshed against the token endpoint;
//! refresh failure is an [`Auth`](crate::error::PilotError::Auth) error
//! and is never retried automatically.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::MailConfig;
use crate::error::{PilotError, Result};

const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Stored OAuth token for one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    #[serde(alias = "token")]
    access_token: String,
    refresh_token: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    expiry: Option<DateTime<Utc>>,
}

impl StoredToken {
    fn is_expired(&self) -> bool {
        match self.expiry {
            // Refresh a minute early to avoid racing the deadline.
            Some(expiry) => Utc::now() + Duration::seconds(60) >= expiry,
            None => false,
        }
    }
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: Option<i64>,
}

pub struct TokenManager {
    path: PathBuf,
    client: reqwest::Client,
    cached: RwLock<Option<StoredToken>>,
}

impl TokenManager {
    pub fn for_account(config: &MailConfig, email: &str) -> Result<Self> {
        let path = config.token_dir.join(format!("token_{email}.json"));
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            path,
            client,
            cached: RwLock::new(None),
        })
    }

    /// Return a valid access token, refreshing it if expired.
    pub async fn access_token(&self) -> Result<String> {
        {
            let cached = self.cached.read().await;
            if let Some(token) = cached.as_ref() {
                if !token.is_expired() {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let mut cached = self.cached.write().await;
        // Re-check after acquiring the write lock
        if let Some(token) = cached.as_ref() {
            if !token.is_expired() {
                return Ok(token.access_token.clone());
            }
        }

        let mut token = match cached.take() {
            Some(t) => t,
            None => self.load_from_disk()?,
        };

        if token.is_expired() {
            token = self.refresh(token).await?;
            self.persist(&token)?;
        }

        let access = token.access_token.clone();
        *cached = Some(token);
        Ok(access)
    }

    fn load_from_disk(&self) -> Result<StoredToken> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            PilotError::Auth(format!(
                "no stored token at {} ({e}); run the authentication flow first",
                self.path.display()
            ))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| PilotError::Auth(format!("invalid token file: {e}")))
    }

    fn persist(&self, token: &StoredToken) -> Result<()> {
        let content = serde_json::to_string_pretty(token)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    async fn refresh(&self, token: StoredToken) -> Result<StoredToken> {
        let refresh_token = token.refresh_token.as_deref().ok_or_else(|| {
            PilotError::Auth("access token expired and no refresh token stored".to_string())
        })?;
        let client_id = token
            .client_id
            .as_deref()
            .ok_or_else(|| PilotError::Auth("token file missing client_id".to_string()))?;
        let client_secret = token
            .client_secret
            .as_deref()
            .ok_or_else(|| PilotError::Auth("token file missing client_secret".to_string()))?;

        debug!(path = %self.path.display(), "refreshing access token");

        let response = self
            .client
            .post(TOKEN_ENDPOINT)
            .form(&[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PilotError::Auth(format!(
                "token refresh failed ({status}): {body}"
            )));
        }

        let refreshed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| PilotError::Auth(format!("invalid token response: {e}")))?;

        Ok(StoredToken {
            access_token: refreshed.access_token,
            expiry: refreshed
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
            ..token
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_check_honours_margin() {
        let fresh = StoredToken {
            access_token: "a".into(),
            refresh_token: None,
            client_id: None,
            client_secret: None,
            expiry: Some(Utc::now() + Duration::hours(1)),
        };
        assert!(!fresh.is_expired());

        let nearly = StoredToken {
            expiry: Some(Utc::now() + Duration::seconds(30)),
            ..fresh.clone()
        };
        assert!(nearly.is_expired());

        let no_expiry = StoredToken {
            expiry: None,
            ..fresh
        };
        assert!(!no_expiry.is_expired());
    }

    #[tokio::test]
    async fn missing_token_file_is_an_auth_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = MailConfig {
            token_dir: tmp.path().to_path_buf(),
            ..MailConfig::default()
        };
        let manager = TokenManager::for_account(&config, "nobody@example.com").unwrap();
        let err = manager.access_token().await.unwrap_err();
        assert!(matches!(err, PilotError::Auth(_)));
    }

    #[tokio::test]
    async fn stored_token_is_read_from_disk() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = MailConfig {
            token_dir: tmp.path().to_path_buf(),
            ..MailConfig::default()
        };
        let token_path = tmp.path().join("token_me@example.com.json");
        std::fs::write(
            &token_path,
            r#"{"token": "abc123", "refresh_token": "r", "client_id": "c", "client_secret": "s"}"#,
        )
        .unwrap();

        let manager = TokenManager::for_account(&config, "me@example.com").unwrap();
        assert_eq!(manager.access_token().await.unwrap(), "abc123");
    }
}
