use std::sync::Arc;

use axum::{Extension, Json, extract::State, http::StatusCode};

use alumnet_chat::{MessageChannel, ThreadResolver, ThreadStrategy};
use alumnet_db::SharedStore;
use alumnet_types::api::{LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

use crate::error::ApiResult;
use crate::session::{AuthProvider, CurrentUser};
use crate::storage::ObjectStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub store: SharedStore,
    pub auth: AuthProvider,
    pub threads: ThreadResolver,
    pub messages: MessageChannel,
    pub objects: ObjectStore,
}

impl AppStateInner {
    pub fn new(
        store: SharedStore,
        jwt_secret: &str,
        strategy: ThreadStrategy,
        objects: ObjectStore,
    ) -> Self {
        Self {
            auth: AuthProvider::new(store.clone(), jwt_secret),
            threads: ThreadResolver::new(store.clone(), strategy),
            messages: MessageChannel::new(store.clone()),
            objects,
            store,
        }
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    let session = state.auth.register(req).await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id: session.user_id,
            token: session.token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let session = state.auth.sign_in(&req.email, &req.password).await?;

    Ok(Json(LoginResponse {
        user_id: session.user_id,
        email: session.email,
        token: session.token,
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<StatusCode> {
    state.auth.sign_out(&user).await?;
    Ok(StatusCode::NO_CONTENT)
}
