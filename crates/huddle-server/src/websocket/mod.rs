//! WebSocket transport: upgrade, per-connection session, client frames.

pub mod inbound;
pub mod session;

use axum::Extension;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;

use crate::auth::AuthenticatedUser;
use crate::server::AppState;

/// `GET /ws`, behind [`crate::auth::require_user`].
pub async fn ws_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| session::run_session(socket, user, state))
}
