pub mod config;
pub mod error;
pub mod logging;

pub use config::{Language, MergeConfig};
pub use error::{ClassifiedError, ErrorCategory, MergeError, classify_error};
