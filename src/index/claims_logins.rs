// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! The `<Users>/ClaimsAndLogins` view.
//!
//! Emits one row per user claim (type, value) and one per external login
//! (provider, key), each pointing back at the user document. Lets the user
//! store answer "who has this claim" and "who owns this login" without a
//! per-query index on every user document.

use crate::db::view::index_term;
use crate::db::{Conventions, DocumentClient, IndexDefinition, IndexProjection};
use crate::error::StoreResult;
use crate::models::{Claim, User};

pub const INDEX_SUFFIX: &str = "ClaimsAndLogins";
pub const CLAIMS_PROJECTION: &str = "Claims";
pub const LOGINS_PROJECTION: &str = "Logins";

/// Name of the view for the configured user collection.
pub fn index_name(conventions: &Conventions) -> String {
    format!(
        "{}{}{}",
        conventions.prefix_for::<User>(),
        conventions.identity_parts_separator(),
        INDEX_SUFFIX
    )
}

pub fn claims_and_logins_index(conventions: &Conventions) -> IndexDefinition {
    IndexDefinition {
        name: index_name(conventions),
        collection: conventions.prefix_for::<User>(),
        separator: conventions.identity_parts_separator(),
        projections: vec![
            IndexProjection {
                name: CLAIMS_PROJECTION.to_string(),
                path: "claims".to_string(),
                fields: vec!["claim_type".to_string(), "claim_value".to_string()],
                case_insensitive: true,
            },
            IndexProjection {
                name: LOGINS_PROJECTION.to_string(),
                path: "logins".to_string(),
                fields: vec!["login_provider".to_string(), "provider_key".to_string()],
                case_insensitive: false,
            },
        ],
    }
}

/// Register the view. Returns `false` if it already existed.
pub async fn create_claims_and_logins_index(
    client: &dyn DocumentClient,
    conventions: &Conventions,
) -> StoreResult<bool> {
    client
        .ensure_index(&claims_and_logins_index(conventions))
        .await
}

/// Claims match case-insensitively, so their terms are folded.
pub fn claim_term(claim: &Claim) -> String {
    index_term(
        CLAIMS_PROJECTION,
        &[
            &claim.claim_type.to_lowercase(),
            &claim.claim_value.to_lowercase(),
        ],
    )
}

pub fn login_term(login_provider: &str, provider_key: &str) -> String {
    index_term(LOGINS_PROJECTION, &[login_provider, provider_key])
}
