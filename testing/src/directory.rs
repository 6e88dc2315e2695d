//! Static client/cohort directory for tests.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only happens after a test already failed

use caresight_core::directory::{ClientDirectory, DirectoryError};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

#[derive(Clone, Debug, Default)]
struct ClientEntry {
    organization_key: Option<String>,
    cohorts: Vec<String>,
}

/// Fixed-content directory built up by tests.
///
/// # Example
///
/// ```
/// use caresight_testing::StaticDirectory;
///
/// let directory = StaticDirectory::new()
///     .with_client("client-1", Some("org-a"), &["high-risk"])
///     .with_client("client-2", Some("org-a"), &["high-risk", "new-intake"]);
/// ```
#[derive(Clone, Debug, Default)]
pub struct StaticDirectory {
    clients: Arc<RwLock<HashMap<String, ClientEntry>>>,
}

impl StaticDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client with its organization and cohort tags.
    #[must_use]
    pub fn with_client(
        self,
        client_id: &str,
        organization_key: Option<&str>,
        cohorts: &[&str],
    ) -> Self {
        self.clients.write().unwrap().insert(
            client_id.to_string(),
            ClientEntry {
                organization_key: organization_key.map(ToString::to_string),
                cohorts: cohorts.iter().map(ToString::to_string).collect(),
            },
        );
        self
    }
}

impl ClientDirectory for StaticDirectory {
    fn organization_of(
        &self,
        client_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, DirectoryError>> + Send + '_>> {
        let client_id = client_id.to_string();
        Box::pin(async move {
            Ok(self
                .clients
                .read()
                .unwrap()
                .get(&client_id)
                .and_then(|c| c.organization_key.clone()))
        })
    }

    fn cohorts_of(
        &self,
        client_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, DirectoryError>> + Send + '_>> {
        let client_id = client_id.to_string();
        Box::pin(async move {
            Ok(self
                .clients
                .read()
                .unwrap()
                .get(&client_id)
                .map(|c| c.cohorts.clone())
                .unwrap_or_default())
        })
    }

    fn members_of(
        &self,
        cohort_tag: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, DirectoryError>> + Send + '_>> {
        let cohort_tag = cohort_tag.to_string();
        Box::pin(async move {
            let clients = self.clients.read().unwrap();
            let mut members: Vec<String> = clients
                .iter()
                .filter(|(_, entry)| entry.cohorts.iter().any(|c| *c == cohort_tag))
                .map(|(id, _)| id.clone())
                .collect();
            members.sort();
            Ok(members)
        })
    }
}
