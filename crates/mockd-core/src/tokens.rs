//! Issued-token store backing the OAuth mock type and RFC 7662
//! introspection

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// One issued bearer token
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl IssuedToken {
    pub fn active(&self) -> bool {
        !self.revoked && Utc::now() < self.expires_at
    }
}

/// Tokens issued by OAuth mocks, keyed by token value
#[derive(Debug, Default)]
pub struct TokenStore {
    tokens: RwLock<HashMap<String, IssuedToken>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token for a client
    pub async fn issue(
        &self,
        client_id: &str,
        scope: Option<String>,
        expires_in_secs: u64,
    ) -> IssuedToken {
        let now = Utc::now();
        let token = IssuedToken {
            token: uuid::Uuid::new_v4().simple().to_string(),
            client_id: client_id.to_string(),
            scope,
            issued_at: now,
            expires_at: now + Duration::seconds(expires_in_secs as i64),
            revoked: false,
        };
        self.tokens
            .write()
            .await
            .insert(token.token.clone(), token.clone());
        token
    }

    /// RFC 7662 lookup: `None` for unknown tokens
    pub async fn introspect(&self, token: &str) -> Option<IssuedToken> {
        self.tokens.read().await.get(token).cloned()
    }

    pub async fn revoke(&self, token: &str) -> bool {
        match self.tokens.write().await.get_mut(token) {
            Some(issued) => {
                issued.revoked = true;
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn issue_and_introspect() {
        let store = TokenStore::new();
        let issued = store.issue("client-1", Some("read".to_string()), 60).await;
        let found = store.introspect(&issued.token).await.expect("known");
        assert!(found.active());
        assert_eq!(found.client_id, "client-1");
        assert!(store.introspect("unknown").await.is_none());
    }

    #[tokio::test]
    async fn revoked_tokens_go_inactive() {
        let store = TokenStore::new();
        let issued = store.issue("client-1", None, 60).await;
        assert!(store.revoke(&issued.token).await);
        let found = store.introspect(&issued.token).await.expect("known");
        assert!(!found.active());
    }

    #[tokio::test]
    async fn expired_tokens_go_inactive() {
        let store = TokenStore::new();
        let issued = store.issue("client-1", None, 0).await;
        let found = store.introspect(&issued.token).await.expect("known");
        assert!(!found.active());
    }
}
