use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tracing::{debug, info, warn};

use alumnet_api::auth::{AppState, AppStateInner};
use alumnet_api::chat::{authorize_thread, resolve_with};
use alumnet_api::error::ApiError;
use alumnet_api::session::{AuthEvent, AuthProvider, CurrentUser};
use alumnet_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a new socket has to send `Identify`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Drives one gateway connection: `Identify` handshake, `Ready`, then
/// commands in and events out until either side goes away.
pub async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let Some(user) = wait_for_identify(&mut receiver, &state.auth).await else {
        warn!("WebSocket client failed to identify, closing");
        let refused = GatewayEvent::Error {
            code: "unauthenticated".into(),
            message: "identify with a valid session token".into(),
            thread_id: None,
        };
        let _ = send_event(&mut sender, &refused).await;
        let _ = sender.send(Message::Close(None)).await;
        return;
    };

    // Subscribe before Ready so a sign-out right after cannot be missed
    let auth_events = state.auth.on_auth_change();

    info!("{} ({}) connected to gateway", user.email, user.id);

    let ready = GatewayEvent::Ready {
        user_id: user.id.clone(),
        email: user.email.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    run_connection_loop(sender, receiver, state, user, auth_events).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    state: AppState,
    user: CurrentUser,
    mut auth_events: tokio::sync::broadcast::Receiver<AuthEvent>,
) {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let dispatcher = Arc::new(Dispatcher::new(outbound_tx));

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward events -> client, with heartbeat and sign-out watch
    let session_id = user.session_id.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = outbound_rx.recv() => {
                    let Some(event) = event else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                auth = auth_events.recv() => match auth {
                    Ok(AuthEvent::SignedOut { session_id: ended, .. }) if ended == session_id => {
                        info!("Session {} signed out, closing gateway connection", ended);
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        warn!("Auth event receiver lagged by {} events", n);
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_state = state.clone();
    let recv_user = user.clone();
    let recv_dispatcher = dispatcher.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&recv_state, &recv_dispatcher, &recv_user, cmd).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            recv_user.id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        recv_dispatcher.emit(GatewayEvent::Error {
                            code: "invalid_input".into(),
                            message: format!("unrecognized command: {}", e),
                            thread_id: None,
                        });
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.shutdown().await;
    info!("{} ({}) disconnected from gateway", user.email, user.id);
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    auth: &AuthProvider,
) -> Option<CurrentUser> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    return match auth.current_user(&token).await {
                        Ok(user) => user,
                        Err(e) => {
                            warn!("Identify failed: {}", e);
                            None
                        }
                    };
                }
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify)
        .await
        .ok()
        .flatten()
}

/// Runs one client command. Results and failures come back to the client
/// as events through the dispatcher.
pub async fn handle_command(
    state: &AppStateInner,
    dispatcher: &Dispatcher,
    user: &CurrentUser,
    cmd: GatewayCommand,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {
            debug!("{} sent Identify twice, ignoring", user.id);
        }

        GatewayCommand::OpenThread { other_user_id } => {
            match resolve_with(state, &user.id, &other_user_id).await {
                Ok(thread_id) => dispatcher.emit(GatewayEvent::ThreadResolved {
                    other_user_id,
                    thread_id,
                }),
                Err(e) => dispatcher.emit(error_event(e, None)),
            }
        }

        GatewayCommand::Subscribe { thread_id } => {
            let result = match authorize_thread(state, &thread_id, &user.id).await {
                Ok(_) => dispatcher
                    .subscribe(&state.messages, &thread_id)
                    .await
                    .map_err(ApiError::from),
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => info!("{} subscribed to thread {}", user.id, thread_id),
                Err(e) => dispatcher.emit(error_event(e, Some(thread_id))),
            }
        }

        GatewayCommand::Unsubscribe { thread_id } => {
            if dispatcher.unsubscribe(&thread_id).await {
                debug!("{} unsubscribed from thread {}", user.id, thread_id);
            }
            dispatcher.emit(GatewayEvent::Unsubscribed { thread_id });
        }

        GatewayCommand::SendMessage { thread_id, text } => {
            if text.trim().is_empty() {
                return;
            }
            let result = match authorize_thread(state, &thread_id, &user.id).await {
                Ok(_) => state
                    .messages
                    .send(&thread_id, &user.id, &text)
                    .await
                    .map_err(ApiError::from),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                dispatcher.emit(error_event(e, Some(thread_id)));
            }
        }
    }
}

fn error_event(err: ApiError, thread_id: Option<String>) -> GatewayEvent {
    GatewayEvent::Error {
        code: err.code().to_string(),
        message: err.to_string(),
        thread_id,
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(text) => sender.send(Message::Text(text.into())).await,
        Err(e) => {
            warn!("Failed to encode gateway event: {}", e);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use alumnet_api::storage::ObjectStore;
    use alumnet_chat::ThreadStrategy;
    use alumnet_db::Database;
    use alumnet_types::api::RegisterRequest;
    use tokio::time::timeout;

    struct Harness {
        state: AppState,
        dispatcher: Dispatcher,
        rx: mpsc::UnboundedReceiver<GatewayEvent>,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let state = Arc::new(AppStateInner::new(
                Arc::new(Database::open_in_memory().unwrap()),
                "test-secret",
                ThreadStrategy::Lazy,
                ObjectStore::new(dir.path(), "http://localhost:3000", 1024),
            ));
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                state,
                dispatcher: Dispatcher::new(tx),
                rx,
                _dir: dir,
            }
        }

        async fn user(&self, name: &str, email: &str) -> CurrentUser {
            let session = self
                .state
                .auth
                .register(RegisterRequest {
                    full_name: name.into(),
                    email: email.into(),
                    password: "password123".into(),
                    ..Default::default()
                })
                .await
                .unwrap();
            self.state
                .auth
                .current_user(&session.token)
                .await
                .unwrap()
                .unwrap()
        }

        async fn run(&self, user: &CurrentUser, cmd: GatewayCommand) {
            handle_command(&self.state, &self.dispatcher, user, cmd).await;
        }

        async fn next(&mut self) -> GatewayEvent {
            timeout(Duration::from_secs(2), self.rx.recv())
                .await
                .expect("timed out waiting for event")
                .expect("outbound channel closed")
        }
    }

    #[tokio::test]
    async fn open_subscribe_and_send() {
        let mut h = Harness::new();
        let u1 = h.user("Ada", "ada@example.org").await;
        let u2 = h.user("Charles", "charles@example.org").await;

        h.run(&u1, GatewayCommand::OpenThread { other_user_id: u2.id.clone() }).await;
        let thread_id = match h.next().await {
            GatewayEvent::ThreadResolved { thread_id, other_user_id } => {
                assert_eq!(other_user_id, u2.id);
                thread_id
            }
            other => panic!("unexpected {:?}", other),
        };

        h.run(&u1, GatewayCommand::Subscribe { thread_id: thread_id.clone() }).await;
        assert!(matches!(
            h.next().await,
            GatewayEvent::ThreadSnapshot { ref messages, .. } if messages.is_empty()
        ));

        h.run(&u1, GatewayCommand::SendMessage { thread_id: thread_id.clone(), text: "  ".into() }).await;
        h.run(&u2, GatewayCommand::SendMessage { thread_id: thread_id.clone(), text: "hi".into() }).await;
        match h.next().await {
            GatewayEvent::ThreadSnapshot { messages, .. } => {
                assert_eq!(messages.len(), 1);
                assert_eq!(messages[0].sender_id, u2.id);
            }
            other => panic!("unexpected {:?}", other),
        }

        h.run(&u1, GatewayCommand::Unsubscribe { thread_id: thread_id.clone() }).await;
        assert!(matches!(h.next().await, GatewayEvent::Unsubscribed { .. }));
        assert!(h.dispatcher.subscribed().await.is_empty());
    }

    #[tokio::test]
    async fn failures_become_error_events() {
        let mut h = Harness::new();
        let u1 = h.user("Ada", "ada@example.org").await;
        let u2 = h.user("Charles", "charles@example.org").await;
        let u3 = h.user("Mallory", "mallory@example.org").await;

        h.run(&u1, GatewayCommand::OpenThread { other_user_id: u1.id.clone() }).await;
        assert!(matches!(
            h.next().await,
            GatewayEvent::Error { ref code, .. } if code == "invalid_input"
        ));

        h.run(&u1, GatewayCommand::OpenThread { other_user_id: u2.id.clone() }).await;
        let GatewayEvent::ThreadResolved { thread_id, .. } = h.next().await else {
            panic!("expected ThreadResolved");
        };

        h.run(&u3, GatewayCommand::Subscribe { thread_id: thread_id.clone() }).await;
        match h.next().await {
            GatewayEvent::Error { code, thread_id: Some(id), .. } => {
                assert_eq!(code, "forbidden");
                assert_eq!(id, thread_id);
            }
            other => panic!("unexpected {:?}", other),
        }

        h.run(&u3, GatewayCommand::SendMessage { thread_id, text: "hey".into() }).await;
        assert!(matches!(
            h.next().await,
            GatewayEvent::Error { ref code, .. } if code == "forbidden"
        ));

        h.run(&u1, GatewayCommand::Subscribe { thread_id: "missing_thread".into() }).await;
        assert!(matches!(
            h.next().await,
            GatewayEvent::Error { ref code, .. } if code == "not_found"
        ));
    }
}
