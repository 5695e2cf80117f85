//! HTTP surface: page routing, auth forms, and the live views streamed as
//! Server-Sent Events.

use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::{header, HeaderMap, StatusCode, Uri},
    middleware::{self, Next},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Redirect, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tokio::sync::{broadcast::error::RecvError, watch};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::AuthSession;
use crate::backend::Backend;
use crate::bus::Event as BusEvent;
use crate::chat::{ChatMessage, ChatSummary, ConversationKey};
use crate::entity::UserProfile;
use crate::error::ApiError;
use crate::navigation::{self, Resolution, Route};
use crate::session::{SessionProvider, SessionState};
use crate::views::auth::{LoginForm, SignUpForm};
use crate::views::composer::Composer;
use crate::views::conversation::ConversationView;
use crate::views::directory::DirectoryView;
use crate::views::profile::ProfileEditor;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<Backend>,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/signup", post(sign_up))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/session", get(session_state))
        .route("/users", get(directory_stream))
        .route("/notifications", get(notification_stream))
        .route("/profile", get(profile).put(update_profile))
        .route("/chats/:peer", get(chat_summary))
        .route(
            "/chats/:peer/messages",
            get(conversation_stream).post(send_message),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health))
        .route("/", get(page))
        .route("/login", get(page))
        .route("/signup", get(page))
        .route("/chat", get(page))
        .route("/profile", get(page))
        .nest("/api", api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// -----------------------------------------------------------------------------
// Request plumbing
// -----------------------------------------------------------------------------

async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let expected = state.backend.config().api_key.as_bytes();
    let valid = request
        .headers()
        .get(API_KEY_HEADER)
        .map(|key| bool::from(key.as_bytes().ct_eq(expected)))
        .unwrap_or(false);

    if !valid {
        warn!(path = %request.uri().path(), "Rejected request without a valid API key");
        return Err(ApiError::Forbidden("missing or invalid API key".to_string()));
    }

    Ok(next.run(request).await)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Mount a session provider for the request and require a signed-in user.
async fn signed_in(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(SessionProvider, UserProfile), ApiError> {
    let session = SessionProvider::mount(state.backend.clone(), bearer_token(headers)).await;
    let state = session.ready().await;
    match state.user {
        Some(user) => Ok((session, user)),
        None => Err(ApiError::Unauthorized),
    }
}

/// Look up the peer's profile. Chatting with yourself is not a conversation.
async fn select_peer(
    backend: &Backend,
    current: &UserProfile,
    peer_uid: &str,
) -> Result<UserProfile, ApiError> {
    if peer_uid == current.uid {
        return Err(ApiError::NotFound(format!("user {}", peer_uid)));
    }
    backend
        .get_profile(peer_uid)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("user {}", peer_uid)))
}

/// Resolves once the session has settled without a user.
async fn signed_out(rx: &mut watch::Receiver<SessionState>) {
    let _ = rx
        .wait_for(|state| !state.loading && state.user.is_none())
        .await
        .map(|_| ());
}

// -----------------------------------------------------------------------------
// Pages
// -----------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct PageResponse {
    view: Option<Route>,
    loading: bool,
    user: Option<UserProfile>,
}

async fn page(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let route =
        Route::parse(uri.path()).ok_or_else(|| ApiError::NotFound(uri.path().to_string()))?;
    let session = SessionProvider::mount(state.backend.clone(), bearer_token(&headers)).await;
    let current = session.ready().await;

    let response = match navigation::resolve(route, &current) {
        Resolution::Redirect(to) => Redirect::temporary(to.path()).into_response(),
        Resolution::Render(view) => Json(PageResponse {
            view: Some(view),
            loading: false,
            user: current.user,
        })
        .into_response(),
        Resolution::Loading => Json(PageResponse {
            view: None,
            loading: true,
            user: None,
        })
        .into_response(),
    };
    Ok(response)
}

// -----------------------------------------------------------------------------
// Auth
// -----------------------------------------------------------------------------

async fn sign_up(
    State(state): State<AppState>,
    Json(form): Json<SignUpForm>,
) -> Result<(StatusCode, Json<AuthSession>), ApiError> {
    let session = form.submit(&state.backend).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn login(
    State(state): State<AppState>,
    Json(form): Json<LoginForm>,
) -> Result<Json<AuthSession>, ApiError> {
    Ok(Json(form.submit(&state.backend).await?))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode, ApiError> {
    let token = bearer_token(&headers).ok_or(ApiError::Unauthorized)?;
    let session = SessionProvider::mount(state.backend.clone(), Some(token)).await;
    session.logout().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn session_state(State(state): State<AppState>, headers: HeaderMap) -> Json<SessionState> {
    let session = SessionProvider::mount(state.backend.clone(), bearer_token(&headers)).await;
    Json(session.ready().await)
}

// -----------------------------------------------------------------------------
// Live views
// -----------------------------------------------------------------------------

async fn directory_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, axum::Error>>>, ApiError> {
    let (session, user) = signed_in(&state, &headers).await?;
    let mut view = DirectoryView::mount(&state.backend, &user);
    let mut session_rx = session.subscribe();
    info!(uid = %user.uid, "Directory stream opened");

    let stream = async_stream::stream! {
        // Keep the provider mounted for as long as the stream lives.
        let _session = session;
        loop {
            let alive = tokio::select! {
                alive = view.next_snapshot() => alive,
                _ = signed_out(&mut session_rx) => false,
            };
            if !alive {
                break;
            }
            yield SseEvent::default().event("directory").json_data(view.render());
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn conversation_stream(
    State(state): State<AppState>,
    Path(peer_uid): Path<String>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, axum::Error>>>, ApiError> {
    let (session, user) = signed_in(&state, &headers).await?;
    let peer = select_peer(&state.backend, &user, &peer_uid).await?;
    let mut view = ConversationView::mount(&state.backend, &user, &peer);
    let mut session_rx = session.subscribe();
    info!(chat_id = %view.key(), "Conversation stream opened");

    let stream = async_stream::stream! {
        let _session = session;
        yield SseEvent::default().event("conversation").json_data(view.render(Utc::now()));
        loop {
            let alive = tokio::select! {
                alive = view.next_snapshot() => alive,
                _ = signed_out(&mut session_rx) => false,
            };
            if !alive {
                break;
            }
            yield SseEvent::default().event("conversation").json_data(view.render(Utc::now()));
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn notification_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, axum::Error>>>, ApiError> {
    let (session, user) = signed_in(&state, &headers).await?;
    let mut events = state.backend.bus().subscribe();

    let stream = async_stream::stream! {
        let _session = session;
        loop {
            match events.recv().await {
                Ok(BusEvent::SystemNotification { notification, target })
                    if target.as_deref().map_or(true, |uid| uid == user.uid) =>
                {
                    yield SseEvent::default().event("notification").json_data(notification);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(uid = %user.uid, skipped, "Notification stream lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// -----------------------------------------------------------------------------
// Writes and one-shot reads
// -----------------------------------------------------------------------------

#[derive(Deserialize)]
struct SendRequest {
    text: String,
}

async fn send_message(
    State(state): State<AppState>,
    Path(peer_uid): Path<String>,
    headers: HeaderMap,
    Json(request): Json<SendRequest>,
) -> Result<Response, ApiError> {
    let (_session, user) = signed_in(&state, &headers).await?;
    let peer = select_peer(&state.backend, &user, &peer_uid).await?;
    let chat_id = ConversationKey::between(&user.uid, &peer.uid);

    let mut composer = Composer::new();
    composer.set_draft(request.text);
    match composer.submit(&state.backend, &chat_id, &user, &peer).await {
        Ok(Some(message)) => Ok((StatusCode::CREATED, Json::<ChatMessage>(message)).into_response()),
        Ok(None) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(notification) => Err(ApiError::Notified(notification)),
    }
}

async fn chat_summary(
    State(state): State<AppState>,
    Path(peer_uid): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ChatSummary>, ApiError> {
    let (_session, user) = signed_in(&state, &headers).await?;
    let chat_id = ConversationKey::between(&user.uid, &peer_uid);
    state
        .backend
        .chat_summary(&chat_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("chat {}", chat_id)))
}

async fn profile(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<UserProfile>, ApiError> {
    let (_session, user) = signed_in(&state, &headers).await?;
    Ok(Json(user))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileUpdate {
    display_name: String,
}

async fn update_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<UserProfile>, ApiError> {
    let (_session, user) = signed_in(&state, &headers).await?;
    let mut editor = ProfileEditor::new(&user);
    editor.set_display_name(update.display_name);
    editor
        .save(&state.backend)
        .await
        .map(Json)
        .map_err(ApiError::Notified)
}
