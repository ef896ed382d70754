pub mod loader;
pub mod runtime;

pub use loader::{load, load_signing_key};
pub use runtime::{AttestationConfig, RuntimeConfig, StoreConfig};
