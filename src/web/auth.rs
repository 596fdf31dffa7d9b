//! Authentication: Google social login and JWT session validation.
//!
//! Login exchanges a Google OAuth2 authorization code for tokens, fetches
//! the user's profile, upserts the local user row, and mints an HS256 JWT.
//! All other API routes validate the Bearer token through middleware, which
//! inserts an [`AuthenticatedUser`] into the request extensions.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
    Json,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::AppState;
use crate::config::AuthConfig;
use crate::errors::AppError;
use crate::models::User;

/// JWT claims carried by a session token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id).
    pub sub: String,
    pub email: String,
    /// Expiration time (Unix timestamp).
    pub exp: i64,
    /// Issued at (Unix timestamp).
    pub iat: i64,
}

/// Authenticated user extracted from a validated token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub email: String,
}

pub fn generate_jwt(user: &User, config: &AuthConfig) -> Result<String, AppError> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user.id.to_string(),
        email: user.email.clone(),
        exp: now + config.token_expiry_secs as i64,
        iat: now,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::internal(format!("Failed to sign session token: {e}")))
}

pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| AppError::invalid_auth(format!("Token validation failed: {e}")))
}

/// Middleware guarding the API routes: requires a valid Bearer token and
/// makes the authenticated user available to handlers.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let token = match auth_header {
        Some(header) if header.starts_with("Bearer ") => &header[7..],
        _ => {
            return Err(AppError::invalid_auth("Authorization header is required"));
        }
    };

    let claims = validate_jwt(token, &state.config.auth.jwt_secret)?;
    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| AppError::invalid_auth("Token subject is not a valid user id"))?;

    req.extensions_mut().insert(AuthenticatedUser {
        id: user_id,
        email: claims.email,
    });

    Ok(next.run(req).await)
}

#[derive(Debug, Deserialize)]
pub struct GoogleLoginRequest {
    /// Authorization code from the frontend's Google OAuth redirect.
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    sub: String,
    email: String,
    name: Option<String>,
}

/// Google login using the authorization code grant. The redirect URL must
/// match exactly what is configured in the Google Cloud Console.
pub async fn google_login(
    State(state): State<AppState>,
    Json(payload): Json<GoogleLoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let auth = &state.config.auth;
    if auth.google_client_id.is_empty() || auth.google_client_secret.is_empty() {
        return Err(AppError::configuration(
            "Google OAuth client credentials are not configured",
        ));
    }

    let token_response = state
        .http_client
        .post(&auth.google_token_endpoint)
        .form(&[
            ("code", payload.code.as_str()),
            ("client_id", auth.google_client_id.as_str()),
            ("client_secret", auth.google_client_secret.as_str()),
            ("redirect_uri", auth.google_redirect_url.as_str()),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await?;

    if !token_response.status().is_success() {
        let status = token_response.status();
        let body = token_response.text().await.unwrap_or_default();
        warn!("Google token exchange failed ({}): {}", status, body);
        return Err(AppError::external_service(
            "google",
            format!("token exchange failed with status {status}"),
        ));
    }

    let tokens: GoogleTokenResponse = token_response.json().await?;

    let userinfo_response = state
        .http_client
        .get(&auth.google_userinfo_endpoint)
        .bearer_auth(&tokens.access_token)
        .send()
        .await?;

    if !userinfo_response.status().is_success() {
        return Err(AppError::external_service(
            "google",
            format!(
                "userinfo request failed with status {}",
                userinfo_response.status()
            ),
        ));
    }

    let userinfo: GoogleUserInfo = userinfo_response.json().await?;

    let user = state
        .database
        .upsert_google_user(&userinfo.sub, &userinfo.email, userinfo.name.as_deref())
        .await?;

    info!("User {} logged in via Google", user.id);

    let token = generate_jwt(&user, auth)?;
    Ok(Json(LoginResponse { token, user }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_user() -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: "user@example.com".to_string(),
            display_name: None,
            google_sub: "google-sub".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    fn test_auth_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "test-secret".to_string(),
            token_expiry_secs: 3600,
            google_client_id: String::new(),
            google_client_secret: String::new(),
            google_redirect_url: String::new(),
            google_token_endpoint: String::new(),
            google_userinfo_endpoint: String::new(),
        }
    }

    #[test]
    fn jwt_round_trip() {
        let user = test_user();
        let config = test_auth_config();
        let token = generate_jwt(&user, &config).unwrap();
        let claims = validate_jwt(&token, &config.jwt_secret).unwrap();
        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.email, user.email);
    }

    #[test]
    fn jwt_rejects_wrong_secret() {
        let user = test_user();
        let config = test_auth_config();
        let token = generate_jwt(&user, &config).unwrap();
        assert!(validate_jwt(&token, "other-secret").is_err());
    }
}
