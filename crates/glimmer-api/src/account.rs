use axum::{
    Form, Json,
    extract::{FromRequest, Multipart, Request, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use axum_extra::extract::cookie::CookieJar;
use bytes::Bytes;
use tracing::{info, warn};

use glimmer_db::is_constraint_violation;
use glimmer_db::models::NewUser;
use glimmer_types::api::{LoginRequest, SignupRequest};
use glimmer_types::models::User;

use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::password::{hash_password, verify_password};
use crate::session::{SessionUser, end_session, start_session};
use crate::state::{AppState, blocking};
use crate::uploads::{ALLOWED_EXTENSIONS, allowed_extension, profile_filename};

/// Signup input after decoding, whatever the content type was.
#[derive(Debug, Default)]
struct SignupForm {
    username: Option<String>,
    password: Option<String>,
    email: Option<String>,
    picture: Option<PictureUpload>,
}

#[derive(Debug)]
struct PictureUpload {
    file_name: String,
    bytes: Bytes,
}

impl From<SignupRequest> for SignupForm {
    fn from(req: SignupRequest) -> Self {
        Self {
            username: req.username,
            password: req.password,
            email: req.email,
            picture: None,
        }
    }
}

/// POST /signup: multipart (with optional `profile_picture`), urlencoded, or JSON.
pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    req: Request,
) -> Result<impl IntoResponse, ApiError> {
    let form = read_signup(&state, req).await?;

    let (username, password) = match (form.username, form.password) {
        (Some(u), Some(p)) if !u.trim().is_empty() => (u, p),
        _ => return Err(ApiError::Validation("Username and password are required".into())),
    };
    if password.trim().is_empty() {
        return Err(ApiError::Validation("Password cannot be empty".into()));
    }
    let email = form.email.filter(|e| !e.trim().is_empty());

    let picture = match form.picture {
        Some(p) => {
            let ext = allowed_extension(&p.file_name).ok_or_else(|| {
                ApiError::Validation(format!(
                    "Profile picture must be one of: {}",
                    ALLOWED_EXTENSIONS.join(", ")
                ))
            })?;
            Some((ext, p.bytes))
        }
        None => None,
    };

    let user = blocking(&state, move |s| {
        if s.db.get_user_by_username(&username)?.is_some() {
            return Err(ApiError::Conflict("Username already exists".into()));
        }
        if let Some(email) = &email {
            if s.db.email_exists(email)? {
                return Err(ApiError::Conflict("Email already registered".into()));
            }
        }

        let password_hash = hash_password(&password)?;
        let new = NewUser {
            username: &username,
            password_hash: &password_hash,
            email: email.as_deref(),
        };

        let mut saved_file = None;
        let result = s.db.create_user(&new, |user_id| match &picture {
            Some((ext, bytes)) => {
                let filename = profile_filename(&username, user_id, ext);
                let public_path = s.uploads.save(&filename, bytes)?;
                saved_file = Some(filename);
                Ok(Some(public_path))
            }
            None => Ok(None),
        });

        match result {
            Ok(row) => Ok(row),
            Err(e) => {
                if let Some(filename) = &saved_file {
                    s.uploads.remove(filename);
                }
                if is_constraint_violation(&e) {
                    Err(ApiError::Conflict("Username or email already exists".into()))
                } else {
                    Err(e.into())
                }
            }
        }
    })
    .await?;

    info!("New user {} ({})", user.username, user.id);
    let jar = start_session(&state, jar, user.id).await?;
    Ok((StatusCode::CREATED, jar, Json(User::from(user))))
}

/// POST /login
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (Some(username), Some(password)) = (req.username, req.password) else {
        return Err(ApiError::Validation("Username and password are required".into()));
    };

    let user = blocking(&state, move |s| {
        let user = s
            .db
            .get_user_by_username(&username)?
            .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

        if !verify_password(&password, &user.password_hash)? {
            warn!("Failed login for {}", user.username);
            return Err(ApiError::Unauthorized("Invalid password".into()));
        }
        Ok(user)
    })
    .await?;

    let jar = start_session(&state, jar, user.id).await?;
    Ok((jar, Json(User::from(user))))
}

/// DELETE /logout: always succeeds, with or without a session.
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> Result<impl IntoResponse, ApiError> {
    let jar = end_session(&state, jar).await?;
    Ok((StatusCode::NO_CONTENT, jar))
}

/// GET /check_session
pub async fn check_session(
    State(state): State<AppState>,
    session: SessionUser,
) -> Result<Json<User>, ApiError> {
    let user = blocking(&state, move |s| {
        s.db.get_user_by_id(session.user_id)?
            .ok_or_else(|| ApiError::NotFound("User not found".into()))
    })
    .await?;

    Ok(Json(user.into()))
}

async fn read_signup(state: &AppState, req: Request) -> Result<SignupForm, ApiError> {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(req, state).await?;
        read_multipart(multipart).await
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        let Form(body) = Form::<SignupRequest>::from_request(req, state).await?;
        Ok(body.into())
    } else {
        let ApiJson(body) = ApiJson::<SignupRequest>::from_request(req, state).await?;
        Ok(body.into())
    }
}

async fn read_multipart(mut multipart: Multipart) -> Result<SignupForm, ApiError> {
    let mut form = SignupForm::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_owned();
        match name.as_str() {
            "username" => form.username = Some(field.text().await?),
            "password" => form.password = Some(field.text().await?),
            "email" => form.email = Some(field.text().await?),
            "profile_picture" => {
                let file_name = field.file_name().unwrap_or_default().to_owned();
                let bytes = field.bytes().await?;
                // Browsers send an empty part when no file was chosen.
                if !file_name.is_empty() {
                    form.picture = Some(PictureUpload { file_name, bytes });
                }
            }
            _ => {}
        }
    }

    Ok(form)
}
