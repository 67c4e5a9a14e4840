use std::sync::Arc;

use anyhow::anyhow;
use tracing::error;

use glimmer_db::Database;

use crate::error::ApiError;
use crate::session::SessionSettings;
use crate::uploads::Uploads;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub uploads: Uploads,
    pub sessions: SessionSettings,
}

/// Run blocking work (SQLite, Argon2, upload writes) off the async runtime.
pub(crate) async fn blocking<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&AppStateInner) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow!("Background task failed"))
        })?
}
