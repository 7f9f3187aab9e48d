//! Read-only listings maintained by the alumni office: events, news,
//! sponsors and the media gallery.

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use alumnet_db::{Direction, Filter, blocking};
use alumnet_types::api::EventsResponse;
use alumnet_types::models::{Event, GalleryItem, NewsItem, Sponsor};

use crate::auth::AppState;
use crate::decode_all;
use crate::error::{ApiError, ApiResult};

pub const EVENTS: &str = "events";
pub const NEWS: &str = "news";
pub const SPONSORS: &str = "sponsors";
pub const GALLERY: &str = "gallery";

/// GET /events
pub async fn events(State(state): State<AppState>) -> ApiResult<Json<EventsResponse>> {
    let events: Vec<Event> = list(&state, EVENTS, Filter::all()).await?;
    Ok(Json(split_events(events, Utc::now())))
}

pub async fn news(State(state): State<AppState>) -> ApiResult<Json<Vec<NewsItem>>> {
    let filter = Filter::all().order_by("published_at", Direction::Descending);
    list(&state, NEWS, filter).await.map(Json)
}

pub async fn sponsors(State(state): State<AppState>) -> ApiResult<Json<Vec<Sponsor>>> {
    let filter = Filter::all().order_by("name", Direction::Ascending);
    list(&state, SPONSORS, filter).await.map(Json)
}

pub async fn gallery(State(state): State<AppState>) -> ApiResult<Json<Vec<GalleryItem>>> {
    list(&state, GALLERY, Filter::all()).await.map(Json)
}

/// Upcoming events (on or after `now`) soonest first; past events most
/// recent first.
pub fn split_events(events: Vec<Event>, now: DateTime<Utc>) -> EventsResponse {
    let (mut upcoming, mut past): (Vec<_>, Vec<_>) =
        events.into_iter().partition(|e| e.date >= now);
    upcoming.sort_by_key(|e| e.date);
    past.sort_by(|a, b| b.date.cmp(&a.date));
    EventsResponse { upcoming, past }
}

async fn list<T: DeserializeOwned>(
    state: &AppState,
    collection: &'static str,
    filter: Filter,
) -> ApiResult<Vec<T>> {
    let docs = blocking(&state.store, move |store| store.query(collection, &filter))
        .await
        .map_err(ApiError::store)?;
    Ok(decode_all(&docs))
}
