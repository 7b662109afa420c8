// MIT License - Copyright (c) 2026 Peter Wright
// Error taxonomy shared by the codec, the store and the registry

/// All errors that can occur in the sec-ctl library.
#[derive(Debug, thiserror::Error)]
pub enum SecCtlError {
    #[error("Framing error: {details}")]
    Framing { details: String },

    #[error("Invalid message code: {code:?}")]
    Code { code: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Authentication failed")]
    Auth,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid site id, invalid claim token, or already claimed")]
    Claim,

    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown message tag: {tag}")]
    UnknownTag { tag: u16 },

    #[error("Unexpected message from site: {kind}")]
    UnexpectedMessage { kind: &'static str },

    #[error("Invalid command: {details}")]
    InvalidCommand { details: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Relay error: {details}")]
    Relay { details: String },

    #[error("Credential error: {details}")]
    Credential { details: String },

    #[error("Configuration error: {details}")]
    Config { details: String },
}

impl SecCtlError {
    pub(crate) fn framing(details: impl Into<String>) -> Self {
        Self::Framing {
            details: details.into(),
        }
    }

    pub(crate) fn relay(details: impl std::fmt::Display) -> Self {
        Self::Relay {
            details: details.to_string(),
        }
    }

    /// Whether the error is the caller's fault (client-error class) rather
    /// than a failure of this process or its collaborators.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SecCtlError::Auth
                | SecCtlError::Unauthorized
                | SecCtlError::Claim
                | SecCtlError::InvalidCommand { .. }
                | SecCtlError::NotFound { .. }
        )
    }

    /// Whether the error ends the site connection it occurred on.
    ///
    /// Wire-level failures can't be recovered in place: the stream position
    /// is unknown, so the peer has to reconnect.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            SecCtlError::Framing { .. }
                | SecCtlError::Code { .. }
                | SecCtlError::Io(_)
                | SecCtlError::UnknownTag { .. }
                | SecCtlError::UnexpectedMessage { .. }
                | SecCtlError::Serialization(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SecCtlError>;
