use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use glimmer_db::is_constraint_violation;
use glimmer_types::api::{AddFriendRequest, AddFriendResponse, FriendSearchQuery};
use glimmer_types::models::{PublicUser, User};

use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::session::SessionUser;
use crate::state::{AppState, blocking};

/// GET /friend-search?username=
pub async fn search(
    State(state): State<AppState>,
    session: SessionUser,
    ApiQuery(query): ApiQuery<FriendSearchQuery>,
) -> Result<Json<Vec<PublicUser>>, ApiError> {
    let term = query
        .username
        .map(|t| t.trim().to_owned())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Validation("Please enter a username to search".into()))?;

    let rows = blocking(&state, move |s| Ok(s.db.search_users(&term, session.user_id)?)).await?;
    Ok(Json(rows.into_iter().map(PublicUser::from).collect()))
}

/// POST /add-friend: writes both directions of the edge together.
pub async fn add_friend(
    State(state): State<AppState>,
    session: SessionUser,
    ApiJson(req): ApiJson<AddFriendRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let friend_id = req.friend_id;

    let friend = blocking(&state, move |s| {
        let friend = s
            .db
            .get_user_by_id(friend_id)?
            .ok_or_else(|| ApiError::NotFound("Friend not found".into()))?;

        match s.db.add_friendship(session.user_id, friend_id) {
            Ok(true) => Ok(friend),
            Ok(false) => Err(ApiError::AlreadyFriends),
            Err(e) if is_constraint_violation(&e) => Err(ApiError::AlreadyFriends),
            Err(e) => Err(e.into()),
        }
    })
    .await?;

    info!("Users {} and {} are now friends", session.user_id, friend_id);
    Ok((
        StatusCode::CREATED,
        Json(AddFriendResponse {
            message: "Friend added successfully".into(),
            friend: friend.into(),
        }),
    ))
}

/// GET /friends
pub async fn list_friends(
    State(state): State<AppState>,
    session: SessionUser,
) -> Result<Json<Vec<User>>, ApiError> {
    let rows = blocking(&state, move |s| Ok(s.db.list_friends(session.user_id)?)).await?;
    Ok(Json(rows.into_iter().map(User::from).collect()))
}

/// DELETE /friends/{friend_id}: removes both directions.
pub async fn remove_friend(
    State(state): State<AppState>,
    session: SessionUser,
    ApiPath(friend_id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    let removed = blocking(&state, move |s| Ok(s.db.remove_friendship(session.user_id, friend_id)?)).await?;
    if removed == 0 {
        return Err(ApiError::NotFound("Friendship not found".into()));
    }

    info!("Users {} and {} are no longer friends", session.user_id, friend_id);
    Ok(StatusCode::NO_CONTENT)
}
