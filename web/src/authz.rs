//! Role-based authorization for the read API.
//!
//! The API consumes a pre-validated [`Identity`] produced by the external
//! authentication collaborator; it never issues or verifies credentials.
//! "Same organization" is decided against the single canonical
//! `organization_key`; there is deliberately no alternate key to fall back
//! to.
//!
//! # Access matrix
//!
//! | Role                    | Client metrics         | Cohort metrics |
//! |-------------------------|------------------------|----------------|
//! | `SuperAdmin` / `Analyst`| any client             | yes            |
//! | `OrgAdmin`              | same organization only | yes            |
//! | `CaseManager`           | same organization only | no             |
//! | `Client`                | own id only            | no             |

use crate::error::ApiError;
use caresight_core::directory::ClientDirectory;
use serde::{Deserialize, Serialize};

/// Caller role, as assigned by the identity system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Platform operator; unrestricted reads.
    SuperAdmin,
    /// Cross-organization analyst; unrestricted reads.
    Analyst,
    /// Administrator of one organization.
    OrgAdmin,
    /// Care worker within one organization.
    CaseManager,
    /// An enrolled client reading their own data.
    Client,
}

/// Pre-validated identity tuple from the external authentication system.
#[derive(Clone, Debug, PartialEq)]
pub struct Identity {
    /// Stable user identifier. For the `Client` role this equals the
    /// client id the user owns.
    pub user_id: String,
    /// Assigned role.
    pub role: Role,
    /// Canonical organization key, absent for roles without one.
    pub organization_key: Option<String>,
}

impl Identity {
    /// Create a new identity.
    #[must_use]
    pub fn new(user_id: impl Into<String>, role: Role, organization_key: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            organization_key,
        }
    }
}

/// Check whether `identity` may read `client_id`'s metrics.
///
/// # Errors
///
/// Returns 403 [`ApiError::forbidden`] on a role/ownership mismatch and an
/// internal error when the directory lookup itself fails (fail closed).
pub async fn authorize_client_access(
    identity: &Identity,
    client_id: &str,
    directory: &dyn ClientDirectory,
) -> Result<(), ApiError> {
    match identity.role {
        Role::SuperAdmin | Role::Analyst => Ok(()),

        Role::OrgAdmin | Role::CaseManager => {
            let client_org = directory
                .organization_of(client_id)
                .await
                .map_err(|e| ApiError::internal("Authorization lookup failed").with_source(e.into()))?;

            match (&identity.organization_key, client_org) {
                (Some(own), Some(client_org)) if *own == client_org => Ok(()),
                _ => Err(ApiError::forbidden(
                    "Not authorized to view this client's metrics",
                )),
            }
        }

        Role::Client => {
            if identity.user_id == client_id {
                Ok(())
            } else {
                Err(ApiError::forbidden(
                    "Not authorized to view this client's metrics",
                ))
            }
        }
    }
}

/// Check whether `identity` may read cohort metrics.
///
/// # Errors
///
/// Returns 403 [`ApiError::forbidden`] for roles without cohort access.
pub fn authorize_cohort_access(identity: &Identity) -> Result<(), ApiError> {
    match identity.role {
        Role::SuperAdmin | Role::Analyst | Role::OrgAdmin => Ok(()),
        Role::CaseManager | Role::Client => {
            Err(ApiError::forbidden("Not authorized to view cohort metrics"))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use caresight_testing::StaticDirectory;

    fn directory() -> StaticDirectory {
        StaticDirectory::new()
            .with_client("client-1", Some("org-a"), &["high-risk"])
            .with_client("client-2", Some("org-b"), &[])
            .with_client("client-orphan", None, &[])
    }

    async fn allowed(identity: &Identity, client_id: &str) -> bool {
        authorize_client_access(identity, client_id, &directory())
            .await
            .is_ok()
    }

    #[tokio::test]
    async fn super_admin_and_analyst_read_any_client() {
        let admin = Identity::new("admin-1", Role::SuperAdmin, None);
        let analyst = Identity::new("analyst-1", Role::Analyst, None);

        assert!(allowed(&admin, "client-1").await);
        assert!(allowed(&admin, "client-2").await);
        assert!(allowed(&analyst, "client-1").await);
        assert!(allowed(&analyst, "client-2").await);
    }

    #[tokio::test]
    async fn org_roles_are_scoped_to_their_organization() {
        let org_admin = Identity::new("oa-1", Role::OrgAdmin, Some("org-a".to_string()));
        let case_manager = Identity::new("cm-1", Role::CaseManager, Some("org-a".to_string()));

        assert!(allowed(&org_admin, "client-1").await);
        assert!(!allowed(&org_admin, "client-2").await);
        assert!(allowed(&case_manager, "client-1").await);
        assert!(!allowed(&case_manager, "client-2").await);
    }

    #[tokio::test]
    async fn org_roles_fail_closed_without_a_canonical_key() {
        // Client with no organization key on record: nobody org-scoped
        // may read it, whatever key they carry.
        let org_admin = Identity::new("oa-1", Role::OrgAdmin, Some("org-a".to_string()));
        assert!(!allowed(&org_admin, "client-orphan").await);

        // Identity without a key is equally out.
        let keyless = Identity::new("oa-2", Role::OrgAdmin, None);
        assert!(!allowed(&keyless, "client-1").await);
    }

    #[tokio::test]
    async fn clients_read_only_their_own_metrics() {
        let own = Identity::new("client-1", Role::Client, None);
        assert!(allowed(&own, "client-1").await);

        let err = authorize_client_access(&own, "client-2", &directory())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn cohort_access_matrix() {
        let yes = [Role::SuperAdmin, Role::Analyst, Role::OrgAdmin];
        let no = [Role::CaseManager, Role::Client];

        for role in yes {
            let identity = Identity::new("u", role, Some("org-a".to_string()));
            assert!(authorize_cohort_access(&identity).is_ok(), "{role:?}");
        }
        for role in no {
            let identity = Identity::new("u", role, Some("org-a".to_string()));
            assert!(authorize_cohort_access(&identity).is_err(), "{role:?}");
        }
    }
}
