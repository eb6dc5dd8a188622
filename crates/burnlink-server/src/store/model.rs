use chrono::{DateTime, Utc};
use zeroize::ZeroizeOnDrop;

/// A live entry owned by the store.
///
/// `payload` is either the client's base64 envelope (client-side mode) or the
/// decrypted plaintext (server-side mode). The store never looks inside it.
/// Dropping the record overwrites the payload buffer with zeros, so every
/// removal path (read, lazy expiry, sweep, store teardown) wipes it.
#[derive(ZeroizeOnDrop)]
pub struct SecretRecord {
    pub payload: Vec<u8>,
    #[zeroize(skip)]
    pub created_at: DateTime<Utc>,
    #[zeroize(skip)]
    pub expires_at: DateTime<Utc>,
}

impl SecretRecord {
    /// Returns true once `now` has reached the expiry instant.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Owned copy handed to a caller by a successful read.
///
/// Independent of the store's buffer, which is wiped before this is returned.
#[derive(Clone, ZeroizeOnDrop)]
pub struct Secret {
    pub payload: Vec<u8>,
    #[zeroize(skip)]
    pub created_at: DateTime<Utc>,
    #[zeroize(skip)]
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("payload", &format_args!("<{} bytes>", self.payload.len()))
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl From<&SecretRecord> for Secret {
    fn from(record: &SecretRecord) -> Self {
        Self {
            payload: record.payload.clone(),
            created_at: record.created_at,
            expires_at: record.expires_at,
        }
    }
}
