//! Drag tracker — in-memory state for token drags in progress.
//!
//! DESIGN
//! ======
//! A drag is a gesture: `drag:start` claims a token for one client, every
//! `drag:move` updates the clamped position here and is relayed to peers,
//! and `drag:end` releases the claim and hands back the final position for
//! exactly one database write. Nothing in this module touches Postgres.
//!
//! Releasing a token that is not being dragged returns `None`, which makes
//! a duplicate `drag:end` a no-op. A disconnecting client's drags are
//! abandoned and never written.

use std::collections::HashMap;

use uuid::Uuid;

use crate::services::token::clamp_position;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DragError {
    #[error("token {0} is already being dragged by another client")]
    AlreadyDragging(Uuid),
    #[error("no drag in progress for token {0}")]
    NotDragging(Uuid),
}

impl crate::frame::ErrorCode for DragError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::AlreadyDragging(_) => "E_DRAG_CONFLICT",
            Self::NotDragging(_) => "E_DRAG_NOT_STARTED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ActiveDrag {
    client_id: Uuid,
    x: f64,
    y: f64,
}

/// Drags in progress for one table, keyed by token.
#[derive(Debug, Default)]
pub struct DragTracker {
    active: HashMap<Uuid, ActiveDrag>,
}

impl DragTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Claim `token_id` for `client_id` at the given start position.
    /// Restarting one's own drag resets its position.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyDragging` if another client holds the token.
    pub fn begin(&mut self, token_id: Uuid, client_id: Uuid, x: f64, y: f64) -> Result<(f64, f64), DragError> {
        if let Some(existing) = self.active.get(&token_id) {
            if existing.client_id != client_id {
                return Err(DragError::AlreadyDragging(token_id));
            }
        }
        let (x, y) = clamp_position(x, y);
        self.active.insert(token_id, ActiveDrag { client_id, x, y });
        Ok((x, y))
    }

    /// Record an intermediate position. Returns the clamped coordinates.
    ///
    /// # Errors
    ///
    /// Returns `NotDragging` if `client_id` does not hold a drag on the token.
    pub fn update(&mut self, token_id: Uuid, client_id: Uuid, x: f64, y: f64) -> Result<(f64, f64), DragError> {
        let drag = self
            .active
            .get_mut(&token_id)
            .filter(|d| d.client_id == client_id)
            .ok_or(DragError::NotDragging(token_id))?;
        let (x, y) = clamp_position(x, y);
        drag.x = x;
        drag.y = y;
        Ok((x, y))
    }

    /// End the drag and return the position to persist.
    ///
    /// An optional final position from the client overrides the last move.
    /// Returns `None` when `client_id` holds no drag on the token.
    pub fn release(&mut self, token_id: Uuid, client_id: Uuid, last: Option<(f64, f64)>) -> Option<(f64, f64)> {
        if self.active.get(&token_id)?.client_id != client_id {
            return None;
        }
        let drag = self.active.remove(&token_id)?;
        Some(last.map_or((drag.x, drag.y), |(x, y)| clamp_position(x, y)))
    }

    /// Drop every drag held by `client_id`. Returns how many were dropped.
    pub fn abandon_client(&mut self, client_id: Uuid) -> usize {
        let before = self.active.len();
        self.active.retain(|_, d| d.client_id != client_id);
        before - self.active.len()
    }

    /// Forget a token entirely, e.g. after it is removed from the map.
    pub fn forget_token(&mut self, token_id: Uuid) {
        self.active.remove(&token_id);
    }
}

#[cfg(test)]
#[path = "drag_test.rs"]
mod tests;
