pub mod auth;
pub mod chat;
pub mod contact;
pub mod content;
pub mod error;
pub mod files;
pub mod middleware;
pub mod posts;
pub mod profiles;
pub mod session;
pub mod storage;

use serde::de::DeserializeOwned;
use tracing::warn;

use alumnet_db::Document;

/// Decodes query results, skipping (and logging) documents that do not fit.
pub(crate) fn decode_all<T: DeserializeOwned>(docs: &[Document]) -> Vec<T> {
    docs.iter()
        .filter_map(|doc| {
            doc.decode()
                .map_err(|e| warn!("Skipping corrupt document: {:#}", e))
                .ok()
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use alumnet_chat::ThreadStrategy;
    use alumnet_db::Database;
    use alumnet_types::api::RegisterRequest;
    use tempfile::TempDir;

    use crate::auth::{AppState, AppStateInner};
    use crate::session::CurrentUser;
    use crate::storage::ObjectStore;

    pub fn state() -> (AppState, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let objects = ObjectStore::new(dir.path(), "http://localhost:3000", 1024 * 1024);
        let state = AppStateInner::new(
            Arc::new(Database::open_in_memory().unwrap()),
            "test-secret",
            ThreadStrategy::Lazy,
            objects,
        );
        (Arc::new(state), dir)
    }

    pub async fn user(state: &AppState, full_name: &str, email: &str) -> CurrentUser {
        let session = state
            .auth
            .register(RegisterRequest {
                full_name: full_name.into(),
                email: email.into(),
                password: "password123".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        state.auth.current_user(&session.token).await.unwrap().unwrap()
    }
}
