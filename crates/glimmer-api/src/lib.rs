pub mod account;
pub mod error;
pub mod extract;
pub mod friends;
pub mod password;
pub mod profile;
pub mod session;
pub mod sightings;
pub mod species;
pub mod state;
pub mod uploads;


use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::services::ServeDir;

use crate::state::AppState;
use crate::uploads::PUBLIC_PREFIX;

/// All resource routes plus static serving of uploaded pictures.
/// Cross-cutting layers (CORS, tracing, body limit) are added by the binary.
pub fn router(state: AppState) -> Router {
    let uploads = ServeDir::new(state.uploads.dir());

    Router::new()
        .route("/signup", post(account::signup))
        .route("/login", post(account::login))
        .route("/logout", delete(account::logout))
        .route("/check_session", get(account::check_session))
        .route(
            "/sightings",
            get(sightings::list_sightings).post(sightings::create_sighting),
        )
        .route(
            "/sightings/{id}",
            get(sightings::get_sighting)
                .patch(sightings::update_sighting)
                .delete(sightings::delete_sighting),
        )
        .route("/friend-search", get(friends::search))
        .route("/add-friend", post(friends::add_friend))
        .route("/friends", get(friends::list_friends))
        .route("/friends/{friend_id}", delete(friends::remove_friend))
        .route("/species", get(species::list_species))
        .route("/profile/{user_id}", get(profile::get_profile))
        .route("/health", get(health))
        .nest_service(PUBLIC_PREFIX, uploads)
        .with_state(state)
}

pub async fn health() -> &'static str {
    "ok"
}
