//! Presence & connection manager — identities, ghosts, manual tokens.
//!
//! DESIGN
//! ======
//! A connection has two identity layers: the ephemeral connection id and a
//! persistent id supplied at identification (falling back to the connection
//! id). Tokens live in the session keyed by connection id; on disconnect a
//! non-display, non-manual token becomes a ghost keyed by persistent id,
//! and an identify with the same persistent id later restores it exactly.
//! Matching is by primary persistent-id lookup only.

use rand::Rng;
use uuid::Uuid;

use crate::services::battlemap::GatewayError;
use crate::state::{AppState, Position, TokenSize, UserToken};

/// Palette fresh tokens draw their color from.
pub const COLOR_PALETTE: [&str; 10] = [
    "#ef4444", "#f97316", "#eab308", "#22c55e", "#14b8a6", "#3b82f6", "#8b5cf6", "#ec4899",
    "#f43f5e", "#64748b",
];

#[must_use]
pub fn random_color() -> String {
    let i = rand::rng().random_range(0..COLOR_PALETTE.len());
    COLOR_PALETTE[i].to_string()
}

/// Resolved identity of a live connection.
#[derive(Debug, Clone)]
pub struct ConnCtx {
    pub conn_id: Uuid,
    pub persistent_id: String,
    pub is_display: bool,
    pub suppress_presence: bool,
    /// Battlemap mutator capability: display consoles hold it by default,
    /// other connections only when requested at identification.
    pub can_mutate: bool,
}

impl ConnCtx {
    #[must_use]
    pub fn resolve(
        conn_id: Uuid,
        persistent_id: Option<String>,
        is_display: bool,
        suppress_presence: bool,
        allow_mutations: bool,
    ) -> Self {
        Self {
            conn_id,
            persistent_id: persistent_id.unwrap_or_else(|| conn_id.to_string()),
            is_display,
            suppress_presence,
            can_mutate: is_display || allow_mutations,
        }
    }
}

pub struct IdentifyOutcome {
    /// The connection's own token; `None` for display consoles and
    /// presence-suppressed connections.
    pub token: Option<UserToken>,
    /// A ghost with the same persistent identity was restored.
    pub reconnected: bool,
}

/// Register an identified connection's token, restoring a matching ghost
/// if one exists.
pub async fn identify(state: &AppState, ctx: &ConnCtx) -> IdentifyOutcome {
    if ctx.is_display || ctx.suppress_presence {
        return IdentifyOutcome { token: None, reconnected: false };
    }

    let mut session = state.session.write().await;
    if let Some(ghost) = session.ghosts.remove(&ctx.persistent_id) {
        session.users.insert(ctx.conn_id, ghost.clone());
        return IdentifyOutcome { token: Some(ghost), reconnected: true };
    }

    let token = UserToken {
        persistent_id: ctx.persistent_id.clone(),
        color: random_color(),
        position: Position::center(),
        avatar: None,
        size: TokenSize::default(),
        is_display: false,
        manual: false,
    };
    session.users.insert(ctx.conn_id, token.clone());
    IdentifyOutcome { token: Some(token), reconnected: false }
}

/// Handle a socket close for an identified connection. Returns the token
/// that became a ghost, with its last known state, for the disconnect
/// broadcast. Manual tokens and display consoles produce no ghost.
pub async fn disconnect(state: &AppState, ctx: &ConnCtx) -> Option<UserToken> {
    let mut session = state.session.write().await;
    let token = session.users.remove(&ctx.conn_id)?;
    if token.is_display || token.manual {
        return None;
    }
    session.ghosts.insert(token.persistent_id.clone(), token.clone());
    Some(token)
}

/// Move a token: the caller's own (no id) or a named one (manual tokens,
/// host dragging someone else's marker). Returns the moved token's
/// persistent id for the `user.moved` broadcast, or `None` if there was
/// nothing to move.
pub async fn move_token(
    state: &AppState,
    conn_id: Uuid,
    token_id: Option<&str>,
    position: Position,
) -> Option<String> {
    let mut session = state.session.write().await;
    let token = match token_id {
        Some(pid) => session.users.values_mut().find(|t| t.persistent_id == pid)?,
        None => session.users.get_mut(&conn_id)?,
    };
    token.position = position;
    Some(token.persistent_id.clone())
}

/// Create a manual token. It behaves like an active user from creation and
/// only leaves via explicit removal.
pub async fn add_token(
    state: &AppState,
    color: Option<String>,
    position: Option<Position>,
    size: Option<TokenSize>,
    avatar: Option<String>,
) -> UserToken {
    let token = UserToken {
        persistent_id: Uuid::new_v4().to_string(),
        color: color.unwrap_or_else(random_color),
        position: position.unwrap_or_else(Position::center),
        avatar,
        size: size.unwrap_or_default(),
        is_display: false,
        manual: true,
    };
    let mut session = state.session.write().await;
    // Manual tokens have no socket; they live under a synthetic key.
    session.users.insert(Uuid::new_v4(), token.clone());
    token
}

/// Remove an active or ghost entry matched by persistent identity. No
/// ghost survives removal.
///
/// # Errors
///
/// `Forbidden` without the mutator capability, `UserNotFound` if nothing
/// matches.
pub async fn remove_token(
    state: &AppState,
    can_mutate: bool,
    persistent_user_id: &str,
) -> Result<String, GatewayError> {
    if !can_mutate {
        return Err(GatewayError::Forbidden);
    }

    let mut session = state.session.write().await;
    if session.ghosts.remove(persistent_user_id).is_some() {
        return Ok(persistent_user_id.to_string());
    }
    let key = session
        .users
        .iter()
        .find(|(_, t)| t.persistent_id == persistent_user_id)
        .map(|(k, _)| *k);
    if let Some(key) = key {
        session.users.remove(&key);
        return Ok(persistent_user_id.to_string());
    }
    Err(GatewayError::UserNotFound(persistent_user_id.to_string()))
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
