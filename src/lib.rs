//! Challenge-response integrated authentication (NTLM, Kerberos, Negotiate)
//! using the credentials of the currently logged-in user.
//!
//! The host application never touches raw credentials. It opens an
//! authentication context for a security package, exchanges opaque tokens
//! with the remote peer until the negotiation completes, and frees the
//! context. Many negotiations may be in flight at once, each addressed by an
//! opaque session id handed out by [`AuthContextRegistry`].
//!
//! The native security subsystem is reached through the [`SecurityProvider`]
//! trait. On Windows the [`Secur32`] implementation wraps the SSPI calls of
//! `secur32.dll`; on other platforms no native provider is available and
//! [`os_supported`] returns `false`.

pub mod channel_bindings;

mod auth_context;
mod identity;
mod provider;
mod registry;

#[cfg(windows)]
mod secur32;
#[cfg(test)]
pub(crate) mod test_utils;

use std::{error, fmt, result};

use bitflags::bitflags;
use num_derive::{FromPrimitive, ToPrimitive};

pub use crate::auth_context::{AuthContext, NegotiationState};
pub use crate::channel_bindings::ChannelBindings;
pub use crate::identity::{logon_user_name, os_supported};
pub use crate::provider::{
    CredentialsHandle, InitializeSecurityContextParams, InitializeSecurityContextResult, SecHandle,
    SecurityContextHandle, SecurityProvider,
};
pub use crate::registry::{AuthContextRegistry, SessionId};
#[cfg(windows)]
pub use crate::secur32::Secur32;

pub type Result<T> = result::Result<T, Error>;

/// The kind of a failure. Enables callers to react to an error based on
/// its type rather than its description.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The provider cannot describe the requested security package.
    PackageQuery,
    /// No usable identity for outbound authentication.
    CredentialAcquisition,
    /// A negotiation step returned neither `CONTINUE_NEEDED` nor `OK`.
    Negotiation,
    /// An operation was invoked in a state the negotiation machine does not
    /// allow, e.g. a continuation step before the first leg.
    OutOfSequence,
    /// The caller used an unknown or already-destroyed session id.
    SessionNotFound,
    /// The logged-on user name could not be retrieved.
    IdentityQuery,
    /// A best-effort operation (such as a handle release) failed.
    Internal,
}

/// Holds the [`ErrorKind`], a description of the error, and, for failures of
/// native calls, the raw security status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub error_type: ErrorKind,
    pub description: String,
    /// Raw status returned by the security provider, when the failure
    /// originates from a native call.
    pub status: Option<i32>,
}

impl Error {
    pub fn new(error_type: ErrorKind, description: impl Into<String>) -> Self {
        Self {
            error_type,
            description: description.into(),
            status: None,
        }
    }

    /// Builds an error out of a failed provider call, keeping the operation
    /// name and the raw status code so the failure stays diagnosable.
    pub fn from_status(error_type: ErrorKind, operation: &str, status: i32) -> Self {
        Self {
            error_type,
            description: format!("{operation} failed. Result: {status:#010x}"),
            status: Some(status),
        }
    }
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.error_type, self.description)
    }
}

/// Success statuses a provider may return from a negotiation step.
///
/// Everything outside this set is converted into an [`Error`] by the
/// provider implementation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum SecurityStatus {
    Ok = 0,
    ContinueNeeded = 0x0009_0312,
    CompleteNeeded = 0x0009_0313,
    CompleteAndContinue = 0x0009_0314,
}

/// A named authentication mechanism.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityPackageType {
    Ntlm,
    Kerberos,
    Negotiate,
    Other(String),
}

pub const PKG_NAME_NTLM: &str = "NTLM";
pub const PKG_NAME_KERBEROS: &str = "Kerberos";
pub const PKG_NAME_NEGOTIATE: &str = "Negotiate";

impl SecurityPackageType {
    /// Negotiation flags used when the caller does not override them.
    /// Negotiate and Kerberos require mutual authentication and sequence
    /// detection; NTLM and unknown packages request nothing.
    pub fn default_flags(&self) -> ClientRequestFlags {
        match self {
            SecurityPackageType::Kerberos | SecurityPackageType::Negotiate => {
                ClientRequestFlags::MUTUAL_AUTH | ClientRequestFlags::SEQUENCE_DETECT
            }
            SecurityPackageType::Ntlm | SecurityPackageType::Other(_) => ClientRequestFlags::empty(),
        }
    }
}

impl From<&str> for SecurityPackageType {
    fn from(s: &str) -> Self {
        match s {
            PKG_NAME_NTLM => SecurityPackageType::Ntlm,
            PKG_NAME_KERBEROS => SecurityPackageType::Kerberos,
            PKG_NAME_NEGOTIATE => SecurityPackageType::Negotiate,
            s => SecurityPackageType::Other(s.to_string()),
        }
    }
}

impl std::str::FromStr for SecurityPackageType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> result::Result<Self, Self::Err> {
        Ok(SecurityPackageType::from(s))
    }
}

impl fmt::Display for SecurityPackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityPackageType::Ntlm => write!(f, "{PKG_NAME_NTLM}"),
            SecurityPackageType::Kerberos => write!(f, "{PKG_NAME_KERBEROS}"),
            SecurityPackageType::Negotiate => write!(f, "{PKG_NAME_NEGOTIATE}"),
            SecurityPackageType::Other(name) => write!(f, "{name}"),
        }
    }
}

bitflags! {
    /// Requirements passed to the provider when a security context is
    /// established (`ISC_REQ_*`).
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct ClientRequestFlags: u32 {
        const DELEGATE = 0x1;
        const MUTUAL_AUTH = 0x2;
        const REPLAY_DETECT = 0x4;
        const SEQUENCE_DETECT = 0x8;
        const CONFIDENTIALITY = 0x10;
        const USE_SESSION_KEY = 0x20;
        const ALLOCATE_MEMORY = 0x100;
        const CONNECTION = 0x800;
        const EXTENDED_ERROR = 0x4000;
        const STREAM = 0x8000;
        const INTEGRITY = 0x1_0000;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_type_from_known_names() {
        assert_eq!(SecurityPackageType::from("NTLM"), SecurityPackageType::Ntlm);
        assert_eq!(SecurityPackageType::from("Kerberos"), SecurityPackageType::Kerberos);
        assert_eq!(SecurityPackageType::from("Negotiate"), SecurityPackageType::Negotiate);
        assert_eq!(
            SecurityPackageType::from("CredSSP"),
            SecurityPackageType::Other("CredSSP".to_string())
        );
    }

    #[test]
    fn package_type_display_round_trip() {
        for name in ["NTLM", "Kerberos", "Negotiate", "CredSSP"] {
            assert_eq!(SecurityPackageType::from(name).to_string(), name);
        }
    }

    #[test]
    fn default_flags_per_package() {
        let mutual = ClientRequestFlags::MUTUAL_AUTH | ClientRequestFlags::SEQUENCE_DETECT;

        assert_eq!(SecurityPackageType::Negotiate.default_flags(), mutual);
        assert_eq!(SecurityPackageType::Kerberos.default_flags(), mutual);
        assert_eq!(SecurityPackageType::Ntlm.default_flags(), ClientRequestFlags::empty());
        assert_eq!(
            SecurityPackageType::Other("CredSSP".to_string()).default_flags(),
            ClientRequestFlags::empty()
        );
    }

    #[test]
    fn error_from_status_keeps_raw_code() {
        let err = Error::from_status(ErrorKind::Negotiation, "Initialize security context", -2146893048);

        assert_eq!(err.error_type, ErrorKind::Negotiation);
        assert_eq!(err.status, Some(-2146893048));
        assert!(err.description.contains("Initialize security context"));
    }
}
