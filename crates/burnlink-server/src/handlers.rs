use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use zeroize::ZeroizeOnDrop;

use crate::{
    envelope,
    error::AppError,
    server::DecryptionMode,
    store::Secret,
    AppState,
};

/// Length of the anti-bot code sent to the verify endpoint.
const VERIFICATION_CODE_LEN: usize = 6;

const CREATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "unread": state.store.count(),
        "capacity": state.store.capacity(),
    }))
}

// ── Encryption key ────────────────────────────────────────────────────────────

/// Hand out a fresh key for clients that cannot generate one themselves.
pub async fn encryption_key() -> impl IntoResponse {
    let key = envelope::generate_key();
    Json(json!({ "key": key.to_base64() }))
}

// ── Create ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, ZeroizeOnDrop)]
pub struct CreateRequest {
    #[serde(default)]
    pub content: String,
    /// Minutes until expiry; missing or non-positive means the default.
    #[serde(default, alias = "lifetime")]
    #[zeroize(skip)]
    pub lifetime_minutes: Option<i64>,
    #[serde(default)]
    pub encryption_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateResponse {
    pub id: String,
}

pub async fn create_secret(
    State(state): State<AppState>,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> Result<Json<CreateResponse>, AppError> {
    let Json(body) = body.map_err(|_| AppError::InvalidJson)?;

    if body.content.is_empty() {
        return Err(AppError::BadRequest("content cannot be empty"));
    }
    envelope::check_encoded_len(&body.content, state.max_secret_length)?;

    let payload = match state.mode {
        DecryptionMode::ClientSide => body.content.as_bytes().to_vec(),
        DecryptionMode::ServerSide => {
            let key = body
                .encryption_key
                .as_deref()
                .filter(|k| !k.is_empty())
                .ok_or(AppError::BadRequest("encryption key is required"))?;
            let plaintext = envelope::decrypt(&body.content, key)?;
            envelope::check_decoded_len(&plaintext, state.max_secret_length)?;
            // Responses carry the plaintext as a JSON string.
            if std::str::from_utf8(&plaintext).is_err() {
                return Err(AppError::BadRequest("failed to decrypt"));
            }
            plaintext.to_vec()
        }
    };

    let lifetime = lifetime_from_minutes(body.lifetime_minutes);
    let id = state.store.put(payload, lifetime)?;

    info!(
        lifetime_minutes = ?body.lifetime_minutes,
        unread = state.store.count(),
        "audit: secret.create"
    );
    Ok(Json(CreateResponse { id }))
}

/// Zero stands for "use the store default".
fn lifetime_from_minutes(minutes: Option<i64>) -> Duration {
    minutes
        .filter(|m| *m > 0)
        .and_then(|m| u64::try_from(m).ok())
        .and_then(|m| m.checked_mul(60))
        .map(Duration::from_secs)
        .unwrap_or(Duration::ZERO)
}

// ── Get ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, ZeroizeOnDrop)]
pub struct SecretResponse {
    pub content: String,
    pub created_at: String,
}

impl From<Secret> for SecretResponse {
    fn from(secret: Secret) -> Self {
        Self {
            content: String::from_utf8_lossy(&secret.payload).into_owned(),
            created_at: secret.created_at.format(CREATED_AT_FORMAT).to_string(),
        }
    }
}

pub async fn get_secret(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SecretResponse>, AppError> {
    reveal(&state, &id)
}

// ── Verify ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    pub verification_code: String,
}

/// Same as [`get_secret`], gated on a 6-character code.
///
/// The code is friction against link-preview bots, not a credential: any
/// 6-character value is accepted. A rejected code never consumes the secret.
pub async fn verify_secret(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<SecretResponse>, AppError> {
    let Json(body) = body.map_err(|_| AppError::InvalidJson)?;

    if body.verification_code.chars().count() != VERIFICATION_CODE_LEN {
        return Err(AppError::BadRequest("invalid verification code"));
    }

    reveal(&state, &id)
}

fn reveal(state: &AppState, id: &str) -> Result<Json<SecretResponse>, AppError> {
    match state.store.get(id) {
        Some(secret) => {
            info!(unread = state.store.count(), "audit: secret.read");
            Ok(Json(SecretResponse::from(secret)))
        }
        None => {
            info!("audit: secret.read.not_found");
            Err(AppError::NotFound)
        }
    }
}
