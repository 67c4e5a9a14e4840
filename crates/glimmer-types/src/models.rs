use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A user as returned to clients. The password hash never leaves the DB layer,
/// so there is no field for it here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub profile_picture: Option<String>,
}

/// Minimal shape used for search results and nested owners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: i64,
    pub username: String,
    pub profile_picture: Option<String>,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            profile_picture: user.profile_picture,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Species {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub scientific_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    pub id: i64,
    pub user_id: i64,
    pub species_id: i64,
    pub place_guess: Option<String>,
    #[serde(with = "observed_on")]
    pub observed_on: NaiveDateTime,
    pub description: Option<String>,
    pub photos: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub user: PublicUser,
    pub species: Species,
}

/// A user's public page: who they are plus everything they have logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: PublicUser,
    pub sightings: Vec<Sighting>,
}

/// Wire format for `observed_on`: `YYYY-MM-DDTHH:MM`, the value an HTML
/// `datetime-local` input produces.
pub mod observed_on {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%dT%H:%M";

    pub fn parse(value: &str) -> Result<NaiveDateTime, chrono::ParseError> {
        NaiveDateTime::parse_from_str(value.trim(), FORMAT)
    }

    pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&value.format(FORMAT))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }
}
