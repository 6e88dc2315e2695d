//! Custom Axum extractors.
//!
//! The identity extractor reads the pre-validated [`Identity`] that the
//! external authentication middleware stored in request extensions. The API
//! never sees credentials, only the resolved tuple.

use crate::authz::Identity;
use crate::error::ApiError;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Missing identity context"))
    }
}
