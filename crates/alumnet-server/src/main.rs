mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use alumnet_api::auth::{self, AppState, AppStateInner};
use alumnet_api::middleware::require_auth;
use alumnet_api::storage::ObjectStore;
use alumnet_api::{chat, contact, content, files, posts, profiles};
use alumnet_db::Database;
use alumnet_gateway::connection;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "alumnet=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Database::open(&config.db_path)?;

    let objects = ObjectStore::new(
        &config.upload_dir,
        &config.public_url,
        config.max_upload_bytes,
    );
    let app_state: AppState = Arc::new(AppStateInner::new(
        Arc::new(db),
        &config.jwt_secret,
        config.thread_strategy,
        objects,
    ));
    info!(
        "Threads resolved with {:?} strategy, uploads in {}",
        config.thread_strategy,
        config.upload_dir.display()
    );

    let app = router(app_state, config.max_upload_bytes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Alumnet server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(app_state: AppState, max_upload_bytes: usize) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/events", get(content::events))
        .route("/news", get(content::news))
        .route("/sponsors", get(content::sponsors))
        .route("/gallery", get(content::gallery))
        .route("/contact", post(contact::submit))
        .route("/files/{*path}", get(files::download_file))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/me", get(profiles::get_me).patch(profiles::update_me))
        .route("/users/{user_id}", get(profiles::get_user))
        .route("/users/{user_id}/posts", get(posts::user_posts))
        .route("/directory", get(profiles::directory))
        .route("/posts", get(posts::list_posts).post(posts::create_post))
        .route(
            "/files/{*path}",
            post(files::upload_file).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/chats", get(chat::list_threads))
        // `{id}` is the other user's id here, the thread id below
        .route("/chats/{id}", post(chat::open_thread))
        .route(
            "/chats/{id}/messages",
            get(chat::get_messages).post(chat::send_message),
        )
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(app_state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
}

/// Authentication happens inside the socket with `Identify`.
async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state))
}
