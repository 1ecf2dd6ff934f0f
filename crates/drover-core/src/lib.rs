pub mod config;
pub mod error;
pub mod matcher;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{DroverError, Result};
pub use matcher::PatternMatcher;
pub use types::*;
