pub mod config;
pub mod error;

pub use config::{load_dotenv, DispatchConfig, QueueConfig, QueueMode};
pub use error::*;
