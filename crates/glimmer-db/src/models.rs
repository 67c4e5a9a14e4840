//! Database row types. These map directly to SQLite rows; the `From` impls
//! below turn them into the client-facing views from `glimmer-types`.

use chrono::NaiveDateTime;
use glimmer_types::models::{PublicUser, Sighting, Species, User};

/// Kilometres spanned by one degree, used for the bounding-box filter.
pub const KM_PER_DEGREE: f64 = 111.0;

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub email: Option<String>,
    pub profile_picture: Option<String>,
}

pub struct NewUser<'a> {
    pub username: &'a str,
    pub password_hash: &'a str,
    pub email: Option<&'a str>,
}

pub struct SpeciesRow {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub scientific_name: String,
}

/// A sighting joined with its owner and species.
pub struct SightingRow {
    pub id: i64,
    pub user_id: i64,
    pub species_id: i64,
    pub place_guess: Option<String>,
    pub observed_on: NaiveDateTime,
    pub description: Option<String>,
    pub photos: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub owner_username: String,
    pub owner_profile_picture: Option<String>,
    pub species: SpeciesRow,
}

impl SightingRow {
    pub fn fields(&self) -> SightingFields {
        SightingFields {
            species_id: self.species_id,
            place_guess: self.place_guess.clone(),
            observed_on: self.observed_on,
            description: self.description.clone(),
            photos: self.photos.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// The columns of a sighting a client may set. The owner is fixed at insert.
#[derive(Debug, Clone, PartialEq)]
pub struct SightingFields {
    pub species_id: i64,
    pub place_guess: Option<String>,
    pub observed_on: NaiveDateTime,
    pub description: Option<String>,
    pub photos: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// A partial sighting update. The outer `None` leaves a column alone; for the
/// nullable columns `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SightingPatch {
    pub species_id: Option<i64>,
    pub place_guess: Option<Option<String>>,
    pub observed_on: Option<NaiveDateTime>,
    pub description: Option<Option<String>>,
    pub photos: Option<Option<String>>,
    pub latitude: Option<Option<f64>>,
    pub longitude: Option<Option<f64>>,
}

impl SightingPatch {
    pub fn apply(self, fields: &mut SightingFields) {
        if let Some(v) = self.species_id {
            fields.species_id = v;
        }
        if let Some(v) = self.place_guess {
            fields.place_guess = v;
        }
        if let Some(v) = self.observed_on {
            fields.observed_on = v;
        }
        if let Some(v) = self.description {
            fields.description = v;
        }
        if let Some(v) = self.photos {
            fields.photos = v;
        }
        if let Some(v) = self.latitude {
            fields.latitude = v;
        }
        if let Some(v) = self.longitude {
            fields.longitude = v;
        }
    }
}

/// Result of a sighting write that checks ownership and species in the same
/// transaction as the write itself.
#[derive(Debug, PartialEq)]
pub enum SightingWrite<T> {
    Done(T),
    NotFound,
    NotOwner,
    UnknownSpecies,
}

/// Axis-aligned latitude/longitude box. Not a great-circle radius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl GeoBox {
    pub fn around(lat: f64, lng: f64, radius_km: f64) -> Self {
        let delta = radius_km / KM_PER_DEGREE;
        Self {
            min_lat: lat - delta,
            max_lat: lat + delta,
            min_lng: lng - delta,
            max_lng: lng + delta,
        }
    }
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            profile_picture: row.profile_picture,
        }
    }
}

impl From<UserRow> for PublicUser {
    fn from(row: UserRow) -> Self {
        User::from(row).into()
    }
}

impl From<SpeciesRow> for Species {
    fn from(row: SpeciesRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            kind: row.kind,
            scientific_name: row.scientific_name,
        }
    }
}

impl From<SightingRow> for Sighting {
    fn from(row: SightingRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            species_id: row.species_id,
            place_guess: row.place_guess,
            observed_on: row.observed_on,
            description: row.description,
            photos: row.photos,
            latitude: row.latitude,
            longitude: row.longitude,
            user: PublicUser {
                id: row.user_id,
                username: row.owner_username,
                profile_picture: row.owner_profile_picture,
            },
            species: row.species.into(),
        }
    }
}
