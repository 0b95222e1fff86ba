//! Dispatcher configuration.
//!
//! Split into focused submodules:
//! - `types`: config structs, queue modes and serde defaults
//! - `loading`: TOML/file/env loading and `QUAY_*` overrides
//! - `validation`: sanity checks run after every load

mod loading;
mod types;
mod validation;
#[cfg(test)]
mod tests;

pub use loading::load_dotenv;
pub use types::{DispatchConfig, QueueConfig, QueueMode};
