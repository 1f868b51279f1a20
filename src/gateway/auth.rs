//! Connection authentication seam.
//!
//! Credential verification belongs to the surrounding platform (token
//! issuance is out of scope here); the gateway only needs a yes/no per
//! hello frame. The static implementation backs tests and development.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::Result;

/// Verifies the credential a porter presents in its hello frame.
#[async_trait]
pub trait ConnectionAuthenticator: Send + Sync {
    async fn authenticate(&self, porter_id: Uuid, credential: &str) -> Result<bool>;
}

/// Fixed porter→credential table.
#[derive(Default)]
pub struct StaticCredentialAuthenticator {
    credentials: DashMap<Uuid, String>,
}

impl StaticCredentialAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, porter_id: Uuid, credential: impl Into<String>) {
        self.credentials.insert(porter_id, credential.into());
    }
}

#[async_trait]
impl ConnectionAuthenticator for StaticCredentialAuthenticator {
    async fn authenticate(&self, porter_id: Uuid, credential: &str) -> Result<bool> {
        Ok(self
            .credentials
            .get(&porter_id)
            .map(|expected| expected.as_str() == credential)
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_credentials_match_exactly() {
        let auth = StaticCredentialAuthenticator::new();
        let porter = Uuid::new_v4();
        auth.insert(porter, "tok-1");

        assert!(auth.authenticate(porter, "tok-1").await.unwrap());
        assert!(!auth.authenticate(porter, "tok-2").await.unwrap());
        assert!(!auth.authenticate(Uuid::new_v4(), "tok-1").await.unwrap());
    }
}
