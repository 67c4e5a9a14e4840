use axum::{Json, extract::State};

use glimmer_types::models::Species;

use crate::error::ApiError;
use crate::state::{AppState, blocking};

/// GET /species: reference data, no session needed.
pub async fn list_species(State(state): State<AppState>) -> Result<Json<Vec<Species>>, ApiError> {
    let rows = blocking(&state, |s| Ok(s.db.list_species()?)).await?;
    Ok(Json(rows.into_iter().map(Species::from).collect()))
}
