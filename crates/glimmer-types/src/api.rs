use serde::{Deserialize, Deserializer, Serialize};

use crate::models::PublicUser;

// -- Errors --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// -- Account --

/// Signup fields for JSON and urlencoded bodies. Multipart signups are read
/// field by field into the same shape. Fields are optional so that a missing
/// one yields a readable 400 rather than an extractor rejection.
#[derive(Debug, Default, Deserialize)]
pub struct SignupRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

// -- Sightings --

#[derive(Debug, Default, Deserialize)]
pub struct SightingQuery {
    pub lat: Option<String>,
    pub lng: Option<String>,
    pub radius: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSightingRequest {
    pub species_id: Option<i64>,
    pub place_guess: Option<String>,
    pub observed_on: Option<String>,
    pub description: Option<String>,
    pub photos: Option<String>,
    pub latitude: Option<CoordinateInput>,
    pub longitude: Option<CoordinateInput>,
}

/// Partial update of a sighting. Only the fields listed here can change;
/// anything else in the payload (`user_id`, `id`, nested objects) is dropped
/// during deserialization.
///
/// Nullable columns distinguish an absent key (`None`) from an explicit
/// `null` (`Some(None)`), which clears the column.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateSightingRequest {
    pub species_id: Option<i64>,
    #[serde(default, deserialize_with = "present")]
    pub place_guess: Option<Option<String>>,
    pub observed_on: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub photos: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub latitude: Option<Option<CoordinateInput>>,
    #[serde(default, deserialize_with = "present")]
    pub longitude: Option<Option<CoordinateInput>>,
}

/// Only called for keys that appear in the payload, so `null` becomes
/// `Some(None)`. Absent keys fall back to `Default`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Form inputs send coordinates either as numbers or as strings, and an
/// untouched field arrives as `""`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CoordinateInput {
    Number(f64),
    Text(String),
}

impl CoordinateInput {
    /// `Ok(None)` means the value was blank and should be ignored.
    pub fn resolve(&self) -> Result<Option<f64>, std::num::ParseFloatError> {
        match self {
            Self::Number(n) => Ok(Some(*n)),
            Self::Text(s) if s.trim().is_empty() => Ok(None),
            Self::Text(s) => s.trim().parse().map(Some),
        }
    }
}

// -- Friends --

#[derive(Debug, Default, Deserialize)]
pub struct FriendSearchQuery {
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddFriendRequest {
    pub friend_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddFriendResponse {
    pub message: String,
    pub friend: PublicUser,
}
