use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, Event, PostType, UserSummary};

// -- JWT Claims --

/// Session token claims shared by the REST middleware and the gateway
/// `Identify` handshake. `jti` identifies the session for sign-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub jti: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub full_name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub college_email: String,
    #[serde(default)]
    pub profile_photo_url: String,
    #[serde(default)]
    pub graduation_year: String,
    #[serde(default)]
    pub degree: String,
    #[serde(default)]
    pub qualification: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub job_location: String,
    #[serde(default)]
    pub permanent_location: String,
    #[serde(default)]
    pub employment: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub linkedin: String,
    #[serde(default)]
    pub country: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: String,
    pub email: String,
    pub token: String,
}

// -- Profiles --

/// Fields a user may change on their own profile. Absent fields are left alone.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    pub full_name: Option<String>,
    pub profile_photo_url: Option<String>,
    pub graduation_year: Option<String>,
    pub degree: Option<String>,
    pub department: Option<String>,
    pub job_location: Option<String>,
    pub permanent_location: Option<String>,
    pub employment: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DirectoryQuery {
    #[serde(default)]
    pub q: String,
}

// -- Posts --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePostRequest {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub post_type: PostType,
    #[serde(default)]
    pub file_url: String,
}

// -- Content --

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub upcoming: Vec<Event>,
    pub past: Vec<Event>,
}

// -- Files --

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub path: String,
    pub size: u64,
    pub sha256: String,
    pub url: String,
}

// -- Chat --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ThreadResponse {
    pub thread_id: String,
}

#[derive(Debug, Serialize)]
pub struct ThreadSummary {
    pub thread_id: String,
    pub participants: Vec<String>,
    /// The participant that is not the caller; `None` if their profile is gone.
    pub other_user: Option<UserSummary>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub thread_id: String,
    pub messages: Vec<ChatMessage>,
}

// -- Errors --

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}
