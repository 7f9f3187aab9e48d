use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::{info, warn};

use alumnet_db::{Direction, Filter, NewDocument, blocking};
use alumnet_types::api::CreatePostRequest;
use alumnet_types::models::Post;

use crate::auth::AppState;
use crate::decode_all;
use crate::error::{ApiError, ApiResult};
use crate::profiles::load_user;
use crate::session::CurrentUser;

pub const POSTS: &str = "posts";

const MAX_TITLE_LEN: usize = 200;

/// GET /posts: the whole feed, newest first.
pub async fn list_posts(State(state): State<AppState>) -> ApiResult<Json<Vec<Post>>> {
    let filter = Filter::all().order_by("timestamp", Direction::Descending);
    query_posts(&state, filter).await.map(Json)
}

/// GET /users/{id}/posts
pub async fn user_posts(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Vec<Post>>> {
    let filter = Filter::all()
        .eq("user_id", user_id.as_str())
        .order_by("timestamp", Direction::Descending);
    query_posts(&state, filter).await.map(Json)
}

/// POST /posts: stamped with the author's current name and photo.
pub async fn create_post(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<CreatePostRequest>,
) -> ApiResult<(StatusCode, Json<Post>)> {
    let title = req.title.trim().to_string();
    let description = req.description.trim().to_string();
    if title.is_empty() || description.is_empty() {
        warn!("Rejected post from {}: missing title or description", user.id);
        return Err(ApiError::InvalidInput("title and description are required".into()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(ApiError::InvalidInput(format!(
            "title must be at most {} characters",
            MAX_TITLE_LEN
        )));
    }

    let author = load_user(&state, &user.id)
        .await?
        .ok_or_else(|| ApiError::NotFound("profile".into()))?;

    let doc = NewDocument::new()
        .field("title", title)
        .field("description", description)
        .field("post_type", serde_json::to_value(req.post_type).map_err(|_| ApiError::Internal)?)
        .field("file_url", req.file_url.trim())
        .field("user_id", author.id.as_str())
        .field("full_name", author.display_name())
        .field("profile_photo_url", author.profile_photo_url.as_str())
        .server_timestamp("timestamp");

    let created = blocking(&state.store, move |store| {
        let id = store.create(POSTS, doc)?;
        store.get(POSTS, &id)
    })
    .await
    .map_err(ApiError::store)?
    .ok_or(ApiError::Internal)?;

    let post = created.decode::<Post>().map_err(ApiError::store)?;
    info!("User {} created post {}", user.id, post.id);
    Ok((StatusCode::CREATED, Json(post)))
}

async fn query_posts(state: &AppState, filter: Filter) -> ApiResult<Vec<Post>> {
    let docs = blocking(&state.store, move |store| store.query(POSTS, &filter))
        .await
        .map_err(ApiError::store)?;
    Ok(decode_all(&docs))
}
