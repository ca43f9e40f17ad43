// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User routes.

use crate::error::{AppError, Result};
use crate::models::{Claim, User, UserLoginInfo};
use crate::stores::UserStore;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/users", post(create_user))
        .route("/api/users/{id}", get(get_user))
        .route("/api/users/by-email/{email}", get(get_user_by_email))
        .route("/api/users/{id}/roles", post(add_user_to_role))
        .route("/api/users/{id}/roles/{role}", delete(remove_user_from_role))
        .route("/api/users/{id}/claims", post(add_user_claim))
        .route("/api/users/{id}/logins", post(add_user_login))
        .route("/api/claims/users", get(get_users_for_claim))
        .route("/api/logins/{provider}/{key}", get(get_user_by_login))
}

// ─── Request / Response Types ────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, max = 256))]
    pub user_name: String,
    #[validate(email)]
    pub email: Option<String>,
    pub password_hash: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddRoleRequest {
    #[validate(length(min = 1, max = 256))]
    pub role: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ClaimRequest {
    #[validate(length(min = 1))]
    pub claim_type: String,
    pub claim_value: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1))]
    pub login_provider: String,
    #[validate(length(min = 1))]
    pub provider_key: String,
    pub provider_display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClaimQuery {
    #[serde(rename = "type")]
    pub claim_type: String,
    pub value: String,
}

/// User as returned by the API. `id` is the partial id used in URLs.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub user_name: String,
    pub email: Option<String>,
    pub email_confirmed: bool,
    pub roles: Vec<String>,
    pub claims: Vec<Claim>,
    pub logins: Vec<UserLoginInfo>,
}

async fn user_response(state: &AppState, store: &UserStore, user: User) -> Result<UserResponse> {
    let roles = store.get_roles(&user).await?;
    Ok(UserResponse {
        id: state.conventions.partial_document_id(&user.id).to_string(),
        roles,
        user_name: user.user_name,
        email: user.email,
        email_confirmed: user.email_confirmed,
        claims: user.claims,
        logins: user.logins,
    })
}

async fn require_user(store: &UserStore, id: &str) -> Result<User> {
    store
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))
}

// ─── Handlers ────────────────────────────────────────────────

async fn create_user(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>)> {
    payload.validate()?;

    let session = state.open_session();
    let store = state.user_store(&session);

    let mut user = User::new(payload.user_name);
    user.email = payload.email;
    user.set_password_hash(payload.password_hash);

    store.create(&mut user).await?;
    session.save_changes().await?;

    let response = user_response(&state, &store, user).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>> {
    let session = state.open_session();
    let store = state.user_store(&session);

    let user = require_user(&store, &id).await?;
    Ok(Json(user_response(&state, &store, user).await?))
}

async fn get_user_by_email(
    State(state): State<Arc<AppState>>,
    Path(email): Path<String>,
) -> Result<Json<UserResponse>> {
    let session = state.open_session();
    let store = state.user_store(&session);

    let user = store
        .find_by_email(&email)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No user with email {}", email)))?;
    Ok(Json(user_response(&state, &store, user).await?))
}

async fn add_user_to_role(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<AddRoleRequest>,
) -> Result<Json<UserResponse>> {
    payload.validate()?;

    let session = state.open_session();
    let store = state.user_store(&session);

    let mut user = require_user(&store, &id).await?;
    store.add_to_role(&mut user, &payload.role).await?;
    store.update(&mut user).await?;
    session.save_changes().await?;

    Ok(Json(user_response(&state, &store, user).await?))
}

async fn remove_user_from_role(
    State(state): State<Arc<AppState>>,
    Path((id, role)): Path<(String, String)>,
) -> Result<Json<UserResponse>> {
    let session = state.open_session();
    let store = state.user_store(&session);

    let mut user = require_user(&store, &id).await?;
    store.remove_from_role(&mut user, &role).await?;
    store.update(&mut user).await?;
    session.save_changes().await?;

    Ok(Json(user_response(&state, &store, user).await?))
}

async fn add_user_claim(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<ClaimRequest>,
) -> Result<Json<UserResponse>> {
    payload.validate()?;

    let session = state.open_session();
    let store = state.user_store(&session);

    let mut user = require_user(&store, &id).await?;
    store.add_claims(
        &mut user,
        &[Claim::new(payload.claim_type, payload.claim_value)],
    );
    store.update(&mut user).await?;
    session.save_changes().await?;

    Ok(Json(user_response(&state, &store, user).await?))
}

async fn add_user_login(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<UserResponse>> {
    payload.validate()?;

    let session = state.open_session();
    let store = state.user_store(&session);

    if store
        .find_by_login(&payload.login_provider, &payload.provider_key)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict(format!(
            "Login {} is already linked to a user",
            payload.login_provider
        )));
    }

    let mut user = require_user(&store, &id).await?;
    store.add_login(
        &mut user,
        UserLoginInfo::new(
            payload.login_provider,
            payload.provider_key,
            payload.provider_display_name.as_deref(),
        ),
    )?;
    store.update(&mut user).await?;
    session.save_changes().await?;

    Ok(Json(user_response(&state, &store, user).await?))
}

async fn get_users_for_claim(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClaimQuery>,
) -> Result<Json<Vec<UserResponse>>> {
    let session = state.open_session();
    let store = state.user_store(&session);

    let users = store
        .users_for_claim(&Claim::new(query.claim_type, query.value))
        .await?;

    let mut responses = Vec::with_capacity(users.len());
    for user in users {
        responses.push(user_response(&state, &store, user).await?);
    }
    Ok(Json(responses))
}

async fn get_user_by_login(
    State(state): State<Arc<AppState>>,
    Path((provider, key)): Path<(String, String)>,
) -> Result<Json<UserResponse>> {
    let session = state.open_session();
    let store = state.user_store(&session);

    let user = store
        .find_by_login(&provider, &key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No user for {} login", provider)))?;
    Ok(Json(user_response(&state, &store, user).await?))
}
