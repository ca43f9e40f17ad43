// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Role routes.

use crate::error::Result;
use crate::models::Role;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/roles", post(create_role))
        .route("/api/roles/{name}/users", get(get_role_users))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRoleRequest {
    #[validate(length(min = 1, max = 256))]
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct RoleResponse {
    pub id: String,
    pub name: String,
    pub user_count: usize,
}

/// Member summary; ids are partial.
#[derive(Debug, Serialize)]
pub struct RoleMember {
    pub id: String,
    pub user_name: String,
}

async fn create_role(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateRoleRequest>,
) -> Result<(StatusCode, Json<RoleResponse>)> {
    payload.validate()?;

    let session = state.open_session();
    let store = state.role_store(&session);

    let mut role = Role::new(payload.name);
    store.create(&mut role).await?;
    session.save_changes().await?;

    Ok((
        StatusCode::CREATED,
        Json(RoleResponse {
            id: state.conventions.partial_document_id(&role.id).to_string(),
            user_count: role.users.len(),
            name: role.name,
        }),
    ))
}

/// Members of a role. An unknown role has no members.
async fn get_role_users(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Vec<RoleMember>>> {
    let session = state.open_session();
    let users = state.user_store(&session).users_in_role(&name).await?;

    Ok(Json(
        users
            .into_iter()
            .map(|user| RoleMember {
                id: state.conventions.partial_document_id(&user.id).to_string(),
                user_name: user.user_name,
            })
            .collect(),
    ))
}
