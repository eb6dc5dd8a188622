pub mod ephemeral;
pub mod model;

pub use ephemeral::{generate_id, Store, StoreError, SweepHandle, DEFAULT_LIFETIME};
pub use model::{Secret, SecretRecord};
