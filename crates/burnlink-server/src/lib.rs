pub mod dirs;
pub mod envelope;
pub mod error;
pub mod handlers;
pub mod server;
pub mod store;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: store::Store,
    /// Upper bound on wire-encoded content, and on decrypted content in
    /// server-side mode.
    pub max_secret_length: usize,
    pub mode: server::DecryptionMode,
}

pub use server::{router, run, DecryptionMode, ServerConfig};
