use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use tracing::info;

use alumnet_db::{Filter, NewDocument, blocking};
use alumnet_types::api::{DirectoryQuery, UpdateProfileRequest};
use alumnet_types::models::User;

use crate::auth::{AppState, AppStateInner};
use crate::decode_all;
use crate::error::{ApiError, ApiResult};
use crate::session::{CurrentUser, USERS};

pub async fn load_user(state: &AppStateInner, user_id: &str) -> ApiResult<Option<User>> {
    if user_id.is_empty() || user_id.contains('/') {
        return Ok(None);
    }

    let id = user_id.to_string();
    let doc = blocking(&state.store, move |store| store.get(USERS, &id))
        .await
        .map_err(ApiError::store)?;

    doc.map(|d| d.decode::<User>())
        .transpose()
        .map_err(ApiError::store)
}

pub async fn get_me(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Json<User>> {
    load_user(&state, &user.id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("profile".into()))
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<Json<User>> {
    let changes = profile_changes(req)?;

    if !changes.fields.is_empty() {
        let id = user.id.clone();
        let updated = blocking(&state.store, move |store| store.update(USERS, &id, changes))
            .await
            .map_err(ApiError::store)?;
        if !updated {
            return Err(ApiError::NotFound("profile".into()));
        }
        info!("User {} updated their profile", user.id);
    }

    load_user(&state, &user.id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("profile".into()))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<User>> {
    load_user(&state, &user_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("user {}", user_id)))
}

/// GET /directory?q=: all alumni, optionally filtered.
pub async fn directory(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
) -> ApiResult<Json<Vec<User>>> {
    let docs = blocking(&state.store, |store| store.query(USERS, &Filter::all()))
        .await
        .map_err(ApiError::store)?;

    let users = decode_all::<User>(&docs)
        .into_iter()
        .filter(|u| matches_directory(u, &query.q))
        .collect();
    Ok(Json(users))
}

/// Case-insensitive match on name, graduation year or department.
pub fn matches_directory(user: &User, query: &str) -> bool {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return true;
    }
    [&user.full_name, &user.graduation_year, &user.department]
        .iter()
        .any(|field| field.to_lowercase().contains(&query))
}

/// Builds the merge document for a profile edit. Only editable fields are
/// accepted; a present but blank name is rejected.
pub fn profile_changes(req: UpdateProfileRequest) -> ApiResult<NewDocument> {
    if req.full_name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(ApiError::InvalidInput("full name cannot be empty".into()));
    }

    let fields = [
        ("full_name", req.full_name.map(|n| n.trim().to_string())),
        ("profile_photo_url", req.profile_photo_url),
        ("graduation_year", req.graduation_year),
        ("degree", req.degree),
        ("department", req.department),
        ("job_location", req.job_location),
        ("permanent_location", req.permanent_location),
        ("employment", req.employment),
        ("country", req.country),
    ];

    Ok(fields
        .into_iter()
        .fold(NewDocument::new(), |doc, (name, value)| match value {
            Some(value) => doc.field(name, value),
            None => doc,
        }))
}
