use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for merge jobs.
///
/// Every variant is something the user can act on; the message is shown
/// inline next to the step that failed.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Invalid data file: {0}")]
    InvalidData(String),

    #[error("Placeholder '{field}' has no mapped column")]
    UnmappedPlaceholder { field: String },

    #[error("Value '{value}' for field '{field}' is not a number")]
    TypeMismatch { field: String, value: String },

    #[error("Template syntax error in '{expression}': {reason}")]
    TemplateSyntax { expression: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Classification of errors for logging and user display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Problem with an uploaded file (template or data).
    InputError,
    /// Template and data do not fit together (mapping, types).
    MappingError,
    /// Invalid or missing configuration.
    ConfigError,
    /// Disk or internal failure.
    SystemError,
}

impl MergeError {
    /// Returns the broad error category for routing and display purposes.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidTemplate(_) | Self::InvalidData(_) | Self::TemplateSyntax { .. } => {
                ErrorCategory::InputError
            }
            Self::UnmappedPlaceholder { .. } | Self::TypeMismatch { .. } => {
                ErrorCategory::MappingError
            }
            Self::Config(_) => ErrorCategory::ConfigError,
            Self::FileSystem(_) | Self::Internal(_) => ErrorCategory::SystemError,
        }
    }

    /// Returns a user-friendly message (hides internal details).
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidTemplate(msg) => {
                format!("The template could not be read: {msg}. Upload a valid .docx file.")
            }
            Self::InvalidData(msg) => {
                format!("The data file could not be read: {msg}. Use .xlsx, .xls, .ods or .csv.")
            }
            Self::UnmappedPlaceholder { field } => {
                format!("Choose a data column for the field '{field}'.")
            }
            Self::TypeMismatch { field, value } => {
                format!("'{value}' in field '{field}' is not a valid amount.")
            }
            Self::TemplateSyntax { expression, .. } => format!(
                "The placeholder '{{{{ {expression} }}}}' cannot be rendered. \
                 Replace spaces and special characters with underscores."
            ),
            Self::Config(msg) => format!("Configuration issue: {msg}"),
            Self::FileSystem(msg) => format!("File error: {msg}"),
            Self::Internal(_) => "An unexpected error occurred.".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Classification for anyhow::Error
// ---------------------------------------------------------------------------

/// Classified error with context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub message: String,
    pub user_message: String,
}

/// Classify an `anyhow::Error` for display.
///
/// A [`MergeError`] anywhere in the chain wins; otherwise the message is
/// inspected for known I/O patterns.
pub fn classify_error(error: &anyhow::Error) -> ClassifiedError {
    if let Some(merge) = error.chain().find_map(|e| e.downcast_ref::<MergeError>()) {
        return ClassifiedError {
            category: merge.category(),
            message: format!("{error:#}"),
            user_message: merge.user_message(),
        };
    }

    let msg = format!("{error:#}").to_lowercase();
    let (category, user_msg) = if msg.contains("no such file") || msg.contains("not found") {
        (ErrorCategory::SystemError, "File not found.")
    } else if msg.contains("permission denied") {
        (ErrorCategory::SystemError, "Permission denied.")
    } else if msg.contains("config") {
        (ErrorCategory::ConfigError, "Configuration error. Check settings.")
    } else {
        (ErrorCategory::SystemError, "An unexpected error occurred.")
    };

    ClassifiedError {
        category,
        message: format!("{error:#}"),
        user_message: user_msg.to_string(),
    }
}
