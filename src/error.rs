//! Crate-wide error type and the hook-boundary reason-code mapping.
//!
//! Every pipeline step returns `Result<T, GatewayError>`. At a hook
//! boundary (§4.8 of the spec) a `GatewayError` collapses to one of four
//! reason codes the broker understands; internal parse/IO failures that
//! are not explicitly one of the first three kinds degrade to
//! `ImplSpecificError`.

use thiserror::Error;

/// Result type alias used throughout the hook pipeline.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// The four deny outcomes a broker hook can return (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ClientIdentifierNotValid,
    BadUsernameOrPassword,
    NotAuthorized,
    ImplSpecificError,
}

impl ErrorKind {
    /// The reason code string the broker surfaces to the peer.
    pub fn reason_code(&self) -> &'static str {
        match self {
            ErrorKind::ClientIdentifierNotValid => "client_identifier_not_valid",
            ErrorKind::BadUsernameOrPassword => "bad_username_or_password",
            ErrorKind::NotAuthorized => "not_authorized",
            ErrorKind::ImplSpecificError => "impl_specific_error",
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("bad client-id: {message}")]
    BadClientId { message: String },

    #[error("bad username or password: {message}")]
    BadCredentials { message: String },

    #[error("not authorized: {message}")]
    NotAuthorized { message: String },

    #[error("invalid property or envelope field: {message}")]
    Invalid { message: String },

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("broker error: {message}")]
    Broker { message: String },
}

impl GatewayError {
    pub fn bad_client_id<S: Into<String>>(message: S) -> Self {
        GatewayError::BadClientId { message: message.into() }
    }

    pub fn not_authorized<S: Into<String>>(message: S) -> Self {
        GatewayError::NotAuthorized { message: message.into() }
    }

    pub fn invalid<S: Into<String>>(message: S) -> Self {
        GatewayError::Invalid { message: message.into() }
    }

    /// Map this error to the reason code a hook boundary returns (§4.8, §7).
    ///
    /// Anything that isn't explicitly a client-id, credential, or
    /// authorization failure degrades to `impl_specific_error` — this is
    /// the "internal validation failures ... degrade to impl_specific_error"
    /// rule from §7, applied uniformly rather than re-derived per call site.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::BadClientId { .. } => ErrorKind::ClientIdentifierNotValid,
            GatewayError::BadCredentials { .. } | GatewayError::Jwt(_) => {
                ErrorKind::BadUsernameOrPassword
            }
            GatewayError::NotAuthorized { .. } => ErrorKind::NotAuthorized,
            GatewayError::Invalid { .. }
            | GatewayError::Json(_)
            | GatewayError::Toml(_)
            | GatewayError::Io(_)
            | GatewayError::Broker { .. } => ErrorKind::ImplSpecificError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_client_id_maps_to_client_identifier_not_valid() {
        let err = GatewayError::bad_client_id("missing mode prefix");
        assert_eq!(err.kind().reason_code(), "client_identifier_not_valid");
    }

    #[test]
    fn not_authorized_maps_through() {
        let err = GatewayError::not_authorized("account not trusted");
        assert_eq!(err.kind(), ErrorKind::NotAuthorized);
    }

    #[test]
    fn invalid_degrades_to_impl_specific_error() {
        let err = GatewayError::invalid("missing method field");
        assert_eq!(err.kind().reason_code(), "impl_specific_error");
    }

    #[test]
    fn json_error_degrades_to_impl_specific_error() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: GatewayError = parse_err.into();
        assert_eq!(err.kind(), ErrorKind::ImplSpecificError);
    }
}
