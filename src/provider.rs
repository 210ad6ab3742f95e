//! The seam between the negotiation engine and the native security
//! subsystem. [`AuthContext`](crate::AuthContext) drives a
//! [`SecurityProvider`] and never touches the native API directly, which
//! also makes the state machine testable with a scripted provider.

use crate::channel_bindings::ChannelBindings;
use crate::{ClientRequestFlags, Result, SecurityPackageType, SecurityStatus};

/// The native two-word handle layout (`SecHandle`). Opaque to everything
/// but the provider implementation that produced it.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SecHandle {
    pub dw_lower: usize,
    pub dw_upper: usize,
}

/// An opaque resource representing the current process's identity, usable
/// for outbound authentication with one security package.
///
/// Exclusively owned by one auth context, released exactly once and never
/// used after release. Liveness is tracked by the owning context, not here.
#[derive(Debug, Default)]
pub struct CredentialsHandle(pub SecHandle);

/// An opaque resource representing the evolving state of one negotiation
/// conversation. Does not exist until the first negotiation step succeeds
/// or requests continuation.
#[derive(Debug, Default)]
pub struct SecurityContextHandle(pub SecHandle);

/// Parameters of a single negotiation step.
#[derive(Debug)]
pub struct InitializeSecurityContextParams<'a> {
    /// Target service principal name, `"HTTP/" + host` when the target host
    /// is known.
    pub target_spn: Option<&'a str>,
    pub context_requirements: ClientRequestFlags,
    /// The peer's token; absent on the first leg.
    pub input_token: Option<&'a [u8]>,
    pub channel_bindings: Option<&'a ChannelBindings>,
    /// Size of the output token buffer, from
    /// [`SecurityProvider::query_max_token_len`].
    pub max_token_len: u32,
}

/// Outcome of a successful negotiation step.
#[derive(Debug)]
pub struct InitializeSecurityContextResult {
    /// `ContinueNeeded` when more rounds are required, `Ok` when the
    /// negotiation finished. Other statuses never reach the caller; the
    /// provider reports them as [`ErrorKind::Negotiation`](crate::ErrorKind)
    /// failures.
    pub status: SecurityStatus,
    /// The freshly created context handle; present only when the step was
    /// performed without an existing context.
    pub new_context: Option<SecurityContextHandle>,
    /// The output token to send to the peer. May be non-empty even on a
    /// completed negotiation.
    pub token: Vec<u8>,
}

/// A provider of credential and security-context operations.
///
/// Each operation is a single blocking call; any failing native status is
/// converted into a typed [`Error`](crate::Error) carrying the operation
/// name and the raw status code.
pub trait SecurityProvider: Send + Sync {
    /// Maximum token size the package may produce. Implementations cache
    /// the answer process-wide per package name.
    fn query_max_token_len(&self, package: &SecurityPackageType) -> Result<u32>;

    /// Acquires an outbound credential handle for the default principal of
    /// the current process.
    fn acquire_credentials_handle(&self, package: &SecurityPackageType) -> Result<CredentialsHandle>;

    /// Releases a credential handle. Must be called at most once per
    /// acquired handle; the owning auth context guarantees this with its
    /// liveness flag.
    fn free_credentials_handle(&self, credentials: &mut CredentialsHandle) -> Result<()>;

    /// Advances a security context by one negotiation step. `context` is
    /// `None` on the first leg; the new handle is then handed back in the
    /// result.
    fn initialize_security_context(
        &self,
        credentials: &mut CredentialsHandle,
        context: Option<&mut SecurityContextHandle>,
        params: InitializeSecurityContextParams<'_>,
    ) -> Result<InitializeSecurityContextResult>;

    /// Tears down a security context handle.
    fn delete_security_context(&self, context: &mut SecurityContextHandle) -> Result<()>;
}
