use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use glimmer_db::models::{GeoBox, SightingFields, SightingPatch, SightingWrite};
use glimmer_types::api::{CoordinateInput, CreateSightingRequest, SightingQuery, UpdateSightingRequest};
use glimmer_types::models::{Sighting, observed_on};

use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::session::SessionUser;
use crate::state::{AppState, blocking};

/// Search radius in km when `radius` is not given.
const DEFAULT_RADIUS_KM: f64 = 10.0;

/// GET /sightings[?lat=&lng=&radius=]
pub async fn list_sightings(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<SightingQuery>,
) -> Result<Json<Vec<Sighting>>, ApiError> {
    let bbox = bounding_box(&query)?;

    let rows = blocking(&state, move |s| Ok(s.db.list_sightings(bbox)?)).await?;
    Ok(Json(rows.into_iter().map(Sighting::from).collect()))
}

/// POST /sightings
pub async fn create_sighting(
    State(state): State<AppState>,
    session: SessionUser,
    ApiJson(req): ApiJson<CreateSightingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let species_id = req
        .species_id
        .ok_or_else(|| ApiError::Validation("species_id is required".into()))?;
    let observed = parse_observed_on(req.observed_on.as_deref().unwrap_or_default())?;

    let fields = SightingFields {
        species_id,
        place_guess: req.place_guess,
        observed_on: observed,
        description: req.description,
        photos: req.photos,
        latitude: resolve_coordinate(req.latitude.as_ref())?,
        longitude: resolve_coordinate(req.longitude.as_ref())?,
    };

    let written =
        blocking(&state, move |s| Ok(s.db.create_sighting(session.user_id, &fields)?)).await?;
    let row = accepted(written)?;

    info!("User {} logged sighting {}", session.user_id, row.id);
    Ok((StatusCode::CREATED, Json(Sighting::from(row))))
}

/// GET /sightings/{id}
pub async fn get_sighting(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Sighting>, ApiError> {
    let row = blocking(&state, move |s| {
        s.db.get_sighting(id)?.ok_or_else(sighting_not_found)
    })
    .await?;

    Ok(Json(row.into()))
}

/// PATCH /sightings/{id}: owner only, allow-listed fields.
pub async fn update_sighting(
    State(state): State<AppState>,
    session: SessionUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<UpdateSightingRequest>,
) -> Result<Json<Sighting>, ApiError> {
    let patch = patch_from(req)?;

    let written =
        blocking(&state, move |s| Ok(s.db.update_sighting(id, session.user_id, patch)?)).await?;
    Ok(Json(accepted(written)?.into()))
}

/// DELETE /sightings/{id}: owner only.
pub async fn delete_sighting(
    State(state): State<AppState>,
    session: SessionUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    let written = blocking(&state, move |s| Ok(s.db.delete_sighting(id, session.user_id)?)).await?;
    accepted(written)?;

    info!("User {} deleted sighting {}", session.user_id, id);
    Ok(StatusCode::NO_CONTENT)
}

fn accepted<T>(written: SightingWrite<T>) -> Result<T, ApiError> {
    match written {
        SightingWrite::Done(value) => Ok(value),
        SightingWrite::NotFound => Err(sighting_not_found()),
        SightingWrite::NotOwner => Err(ApiError::Forbidden(
            "You do not have permission to modify this sighting".into(),
        )),
        SightingWrite::UnknownSpecies => Err(ApiError::NotFound("Species not found".into())),
    }
}

fn sighting_not_found() -> ApiError {
    ApiError::NotFound("Sighting not found".into())
}

/// Box filter from the query, or `None` unless both `lat` and `lng` are set.
fn bounding_box(query: &SightingQuery) -> Result<Option<GeoBox>, ApiError> {
    let (Some(lat), Some(lng)) = (non_blank(&query.lat), non_blank(&query.lng)) else {
        return Ok(None);
    };

    let invalid = || ApiError::Validation("Invalid latitude, longitude, or radius parameters".into());
    let number = |v: &str| v.parse::<f64>().ok().filter(|n| n.is_finite());

    let lat = number(lat).ok_or_else(invalid)?;
    let lng = number(lng).ok_or_else(invalid)?;
    let radius = match non_blank(&query.radius) {
        Some(r) => number(r).ok_or_else(invalid)?,
        None => DEFAULT_RADIUS_KM,
    };

    Ok(Some(GeoBox::around(lat, lng, radius)))
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_observed_on(value: &str) -> Result<chrono::NaiveDateTime, ApiError> {
    observed_on::parse(value)
        .map_err(|_| ApiError::Validation("Invalid date format. Please use YYYY-MM-DDTHH:MM".into()))
}

fn resolve_coordinate(value: Option<&CoordinateInput>) -> Result<Option<f64>, ApiError> {
    match value {
        Some(v) => v
            .resolve()
            .map_err(|_| ApiError::Validation("Invalid latitude or longitude".into())),
        None => Ok(None),
    }
}

/// Turn a PATCH body into a patch. `null` clears a nullable column; blank
/// coordinate strings leave the stored value alone.
fn patch_from(req: UpdateSightingRequest) -> Result<SightingPatch, ApiError> {
    Ok(SightingPatch {
        species_id: req.species_id,
        place_guess: req.place_guess,
        observed_on: req.observed_on.as_deref().map(parse_observed_on).transpose()?,
        description: req.description,
        photos: req.photos,
        latitude: patch_coordinate(req.latitude)?,
        longitude: patch_coordinate(req.longitude)?,
    })
}

fn patch_coordinate(value: Option<Option<CoordinateInput>>) -> Result<Option<Option<f64>>, ApiError> {
    match value {
        None => Ok(None),
        Some(None) => Ok(Some(None)),
        Some(Some(input)) => Ok(resolve_coordinate(Some(&input))?.map(Some)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(lat: Option<&str>, lng: Option<&str>, radius: Option<&str>) -> SightingQuery {
        SightingQuery {
            lat: lat.map(Into::into),
            lng: lng.map(Into::into),
            radius: radius.map(Into::into),
        }
    }

    #[test]
    fn box_needs_both_coordinates() {
        assert_eq!(bounding_box(&query(None, None, None)).unwrap(), None);
        assert_eq!(bounding_box(&query(Some("40.7"), None, None)).unwrap(), None);
        assert_eq!(bounding_box(&query(Some(""), Some("-73.9"), None)).unwrap(), None);
    }

    #[test]
    fn box_uses_default_radius() {
        let bbox = bounding_box(&query(Some("0"), Some("0"), None)).unwrap().unwrap();
        assert_eq!(bbox, GeoBox::around(0.0, 0.0, DEFAULT_RADIUS_KM));
    }

    #[test]
    fn non_numeric_parameters_are_rejected() {
        for q in [
            query(Some("north"), Some("0"), None),
            query(Some("0"), Some("0"), Some("far")),
            query(Some("NaN"), Some("0"), None),
        ] {
            assert!(matches!(bounding_box(&q), Err(ApiError::Validation(_))));
        }
    }

    #[test]
    fn patch_skips_blank_coordinates_and_clears_nulls() {
        let req = UpdateSightingRequest {
            latitude: Some(Some(CoordinateInput::Text(String::new()))),
            longitude: Some(Some(CoordinateInput::Text("-74.0".into()))),
            description: Some(None),
            photos: Some(Some("https://example.com/b.jpg".into())),
            ..Default::default()
        };
        let patch = patch_from(req).unwrap();
        assert_eq!(patch.latitude, None);
        assert_eq!(patch.longitude, Some(Some(-74.0)));
        assert_eq!(patch.description, Some(None));
        assert_eq!(patch.photos, Some(Some("https://example.com/b.jpg".into())));
        assert_eq!(patch.place_guess, None);

        let cleared = UpdateSightingRequest {
            latitude: Some(None),
            ..Default::default()
        };
        assert_eq!(patch_from(cleared).unwrap().latitude, Some(None));
    }

    #[test]
    fn patch_reparses_observed_on() {
        let req = UpdateSightingRequest {
            observed_on: Some("2024-07-01T21:15".into()),
            ..Default::default()
        };
        let patch = patch_from(req).unwrap();
        assert_eq!(patch.observed_on, Some(observed_on::parse("2024-07-01T21:15").unwrap()));

        let bad = UpdateSightingRequest {
            observed_on: Some("July 1st".into()),
            ..Default::default()
        };
        assert!(matches!(patch_from(bad), Err(ApiError::Validation(_))));

        let junk = UpdateSightingRequest {
            latitude: Some(Some(CoordinateInput::Text("north".into()))),
            ..Default::default()
        };
        assert!(matches!(patch_from(junk), Err(ApiError::Validation(_))));
    }

    #[test]
    fn empty_body_is_an_empty_patch() {
        assert_eq!(patch_from(UpdateSightingRequest::default()).unwrap(), SightingPatch::default());
    }
}
