use axum::{Json, extract::State};

use glimmer_types::models::{Sighting, UserProfile};

use crate::error::ApiError;
use crate::extract::ApiPath;
use crate::session::SessionUser;
use crate::state::{AppState, blocking};

/// GET /profile/{user_id}: another user's public page, for signed-in users.
pub async fn get_profile(
    State(state): State<AppState>,
    _session: SessionUser,
    ApiPath(user_id): ApiPath<i64>,
) -> Result<Json<UserProfile>, ApiError> {
    let (user, sightings) = blocking(&state, move |s| {
        let user = s
            .db
            .get_user_by_id(user_id)?
            .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
        let sightings = s.db.list_sightings_by_user(user_id)?;
        Ok((user, sightings))
    })
    .await?;

    Ok(Json(UserProfile {
        user: user.into(),
        sightings: sightings.into_iter().map(Sighting::from).collect(),
    }))
}
