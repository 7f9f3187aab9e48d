use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};
use tracing::{info, warn};

use alumnet_db::{NewDocument, blocking};
use alumnet_types::models::ContactMessage;

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};

pub const CONTACT_MESSAGES: &str = "contactMessages";

const MAX_MESSAGE_LEN: usize = 5000;

/// POST /contact: public form; stored for the alumni office to read.
pub async fn submit(
    State(state): State<AppState>,
    Json(form): Json<ContactMessage>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    validate(&form).inspect_err(|e| warn!("Rejected contact form: {}", e))?;

    let doc = NewDocument::new()
        .field("name", form.name.trim())
        .field("email", form.email.trim())
        .field("subject", form.subject.trim())
        .field("message", form.message.trim())
        .server_timestamp("timestamp");

    let id = blocking(&state.store, move |store| store.create(CONTACT_MESSAGES, doc))
        .await
        .map_err(ApiError::store)?;

    info!("Contact message {} received", id);
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

fn validate(form: &ContactMessage) -> ApiResult<()> {
    if form.name.trim().is_empty() || form.message.trim().is_empty() {
        return Err(ApiError::InvalidInput("name and message are required".into()));
    }
    let email = form.email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
        _ => return Err(ApiError::InvalidInput("a valid email is required".into())),
    }
    if form.message.chars().count() > MAX_MESSAGE_LEN {
        return Err(ApiError::InvalidInput("message is too long".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use alumnet_db::Filter;

    fn form(email: &str, message: &str) -> ContactMessage {
        ContactMessage {
            name: "Grace".into(),
            email: email.into(),
            subject: "Reunion".into(),
            message: message.into(),
        }
    }

    #[test]
    fn validation() {
        assert!(validate(&form("grace@example.org", "Hello")).is_ok());
        assert!(validate(&form("grace", "Hello")).is_err());
        assert!(validate(&form("@example.org", "Hello")).is_err());
        assert!(validate(&form("grace@example.org", "   ")).is_err());
        assert!(validate(&form("grace@example.org", &"x".repeat(MAX_MESSAGE_LEN + 1))).is_err());
    }

    #[tokio::test]
    async fn stores_submissions() {
        let (state, _dir) = testing::state();
        let (status, Json(body)) = submit(
            State(state.clone()),
            Json(form(" grace@example.org ", "When is the next reunion?")),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);

        let docs = blocking(&state.store, |store| store.query(CONTACT_MESSAGES, &Filter::all()))
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(body["id"], docs[0].id);
        assert_eq!(docs[0].get_str("email"), Some("grace@example.org"));
        assert!(docs[0].get_timestamp("timestamp").is_some());
    }
}
