//! Broker payloads and request-scoped caller identity.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// One ingestion task, as carried on the ingest and dead-letter queues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionTask {
    pub document_id: i64,
    pub blob_key: String,
    pub user_id: i64,
    pub permission_group: String,
}

impl IngestionTask {
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// Authenticated caller for one request, passed explicitly down the call chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    user_id: Option<i64>,
    roles: Vec<String>,
}

impl RequestContext {
    /// Build a context; blank roles are dropped, order is kept.
    pub fn new(user_id: Option<i64>, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let roles = roles
            .into_iter()
            .map(Into::into)
            .map(|r: String| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        Self { user_id, roles }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user_id
    }

    /// Roles in the order they were granted.
    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    pub fn has_roles(&self) -> bool {
        !self.roles.is_empty()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Sorted, de-duplicated role set.
    pub fn role_set(&self) -> BTreeSet<&str> {
        self.roles.iter().map(String::as_str).collect()
    }

    /// Comma-separated roles parsed from CLI input.
    pub fn parse_roles(input: &str) -> Vec<String> {
        input
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}
