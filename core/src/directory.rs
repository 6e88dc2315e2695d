//! Client/cohort directory lookups.
//!
//! The surrounding CRUD domain owns clients, organizations, and cohort
//! membership. This pipeline only needs three read-only lookups, expressed
//! here as an external-collaborator trait: the cohort rollup needs
//! membership, and the read API's RBAC needs the client's canonical
//! organization key.

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Error from a directory lookup.
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// Backing lookup failed.
    #[error("Directory lookup failed: {0}")]
    Lookup(String),
}

/// Read-only view of clients, organizations, and cohort membership.
///
/// "Organization" here is the single canonical `organization_key`; there is
/// deliberately no alternate key to match against.
pub trait ClientDirectory: Send + Sync {
    /// The canonical organization key of a client, if the client exists.
    fn organization_of(
        &self,
        client_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, DirectoryError>> + Send + '_>>;

    /// Cohort tags the client belongs to.
    fn cohorts_of(
        &self,
        client_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, DirectoryError>> + Send + '_>>;

    /// Client ids belonging to a cohort.
    fn members_of(
        &self,
        cohort_tag: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, DirectoryError>> + Send + '_>>;
}
