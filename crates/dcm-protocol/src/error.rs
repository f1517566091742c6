//! Error types for profile validation and name parsing

use thiserror::Error;

/// Errors produced when turning a name into one of the closed enums
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Not a known purpose name
    #[error("unknown purpose: {0}")]
    UnknownPurpose(String),

    /// Not a known radio technology name
    #[error("unknown radio technology: {0}")]
    UnknownTech(String),

    /// Not a known authentication method
    #[error("unknown auth type: {0}")]
    UnknownAuthType(String),

    /// Not a known PDP protocol family
    #[error("unknown protocol family: {0}")]
    UnknownPdpType(String),
}

/// Reasons an APN profile is rejected
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProfileError {
    /// The access point name is empty
    #[error("profile has no access point name")]
    MissingApn,

    /// None of the declared types is a purpose this manager knows about
    #[error("profile '{apn}' declares no known purpose")]
    NoKnownPurpose {
        /// Access point name of the rejected profile
        apn: String,
    },
}
