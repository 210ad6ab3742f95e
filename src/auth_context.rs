use std::sync::Arc;

use num_traits::ToPrimitive;
use tracing::{debug, instrument, warn};

use crate::channel_bindings::ChannelBindings;
use crate::provider::{
    CredentialsHandle, InitializeSecurityContextParams, SecurityContextHandle, SecurityProvider,
};
use crate::{ClientRequestFlags, Error, ErrorKind, Result, SecurityPackageType, SecurityStatus};

/// Negotiation progress of one [`AuthContext`]. There is no transition
/// back: a failed or completed context must be discarded and a new one
/// created if another negotiation is needed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NegotiationState {
    Uninitialized,
    CredentialAcquired,
    Negotiating,
    Complete,
    Failed,
}

/// The state machine for one negotiation.
///
/// Owns one credential handle and one security-context handle. Each handle
/// carries an explicit liveness flag so [`AuthContext::cleanup`] can be
/// invoked redundantly, from any failure branch and from `Drop`, without
/// ever releasing a handle twice.
pub struct AuthContext {
    provider: Arc<dyn SecurityProvider>,
    package: SecurityPackageType,
    target_host: Option<String>,
    flags: ClientRequestFlags,
    max_token_len: u32,
    channel_bindings: Option<ChannelBindings>,
    credentials: CredentialsHandle,
    context: SecurityContextHandle,
    credentials_live: bool,
    context_live: bool,
    out_token: Vec<u8>,
    state: NegotiationState,
    failure: Option<Error>,
}

impl AuthContext {
    pub fn new(provider: Arc<dyn SecurityProvider>) -> Self {
        Self {
            provider,
            package: SecurityPackageType::Ntlm,
            target_host: None,
            flags: ClientRequestFlags::empty(),
            max_token_len: 0,
            channel_bindings: None,
            credentials: CredentialsHandle::default(),
            context: SecurityContextHandle::default(),
            credentials_live: false,
            context_live: false,
            out_token: Vec::new(),
            state: NegotiationState::Uninitialized,
            failure: None,
        }
    }

    /// Selects the package, builds the channel bindings from the payload and
    /// acquires the outbound credential handle.
    ///
    /// On failure the context is cleaned up before the error is returned, so
    /// a half-acquired credential is never leaked, and the error is retained
    /// for later [`AuthContext::advance`] calls to surface.
    #[instrument(level = "debug", skip_all, fields(package = %package))]
    pub fn init(
        &mut self,
        package: SecurityPackageType,
        target_host: Option<&str>,
        application_data: &[u8],
        flags: Option<ClientRequestFlags>,
    ) -> Result<()> {
        if self.state != NegotiationState::Uninitialized {
            return Err(Error::new(
                ErrorKind::OutOfSequence,
                format!("Auth context already initialized (state: {:?})", self.state),
            ));
        }

        self.flags = flags.unwrap_or_else(|| package.default_flags());
        self.target_host = target_host.filter(|host| !host.is_empty()).map(str::to_string);
        self.channel_bindings = ChannelBindings::from_application_data(application_data);
        self.package = package;

        let acquired = self
            .provider
            .query_max_token_len(&self.package)
            .and_then(|max_token_len| {
                self.max_token_len = max_token_len;
                self.provider.acquire_credentials_handle(&self.package)
            });

        match acquired {
            Ok(credentials) => {
                self.credentials = credentials;
                self.credentials_live = true;
                self.state = NegotiationState::CredentialAcquired;
                debug!(max_token_len = self.max_token_len, "credentials acquired");
                Ok(())
            }
            Err(error) => {
                self.cleanup();
                Err(self.fail(error))
            }
        }
    }

    /// Performs one negotiation step.
    ///
    /// Without an input token this is the first leg, producing the initial
    /// outbound token. With an input token this is a continuation leg
    /// consuming the peer's challenge. Returns a copy of the produced token;
    /// any negotiation failure cleans the context up and is propagated, never
    /// silently reported as an empty token.
    #[instrument(level = "debug", skip_all, fields(package = %self.package, state = ?self.state))]
    pub fn advance(&mut self, input_token: Option<&[u8]>) -> Result<Vec<u8>> {
        let first = match (self.state, input_token) {
            (NegotiationState::CredentialAcquired, None) => true,
            (NegotiationState::Negotiating, Some(_)) => false,
            (NegotiationState::Failed, _) => {
                return Err(self.failure.clone().unwrap_or_else(|| {
                    Error::new(ErrorKind::Negotiation, "Auth context already failed")
                }));
            }
            (state, input_token) => {
                return Err(Error::new(
                    ErrorKind::OutOfSequence,
                    format!(
                        "Negotiation step not allowed in state {state:?} (input token: {})",
                        if input_token.is_some() { "present" } else { "absent" },
                    ),
                ));
            }
        };

        let spn = self.target_host.as_deref().map(|host| format!("HTTP/{host}"));

        let result = self.provider.initialize_security_context(
            &mut self.credentials,
            if first { None } else { Some(&mut self.context) },
            InitializeSecurityContextParams {
                target_spn: spn.as_deref(),
                context_requirements: self.flags,
                input_token,
                channel_bindings: self.channel_bindings.as_ref(),
                max_token_len: self.max_token_len,
            },
        );

        let result = match result {
            Ok(result) => result,
            Err(error) => {
                self.cleanup();
                return Err(self.fail(error));
            }
        };

        if let Some(context) = result.new_context {
            self.context = context;
            self.context_live = true;
        }

        self.state = match result.status {
            SecurityStatus::Ok => NegotiationState::Complete,
            SecurityStatus::ContinueNeeded => NegotiationState::Negotiating,
            status => {
                let error = Error {
                    error_type: ErrorKind::Negotiation,
                    description: format!(
                        "Initialize security context did not return CONTINUE_NEEDED or OK. Result: {status:?}"
                    ),
                    status: status.to_i32(),
                };
                self.cleanup();
                return Err(self.fail(error));
            }
        };

        debug!(token_len = result.token.len(), state = ?self.state, "negotiation step done");
        self.out_token = result.token;

        Ok(self.out_token.clone())
    }

    /// Releases whatever is still live: the context handle, then the
    /// credential handle, then the output token buffer.
    ///
    /// Idempotent. Release failures are logged and do not stop the remaining
    /// releases, so a failure to delete the security context never leaks the
    /// credential handle.
    pub fn cleanup(&mut self) {
        if self.context_live {
            if let Err(error) = self.provider.delete_security_context(&mut self.context) {
                warn!(%error, "failed to delete security context");
            }
            self.context_live = false;
        }
        if self.credentials_live {
            if let Err(error) = self.provider.free_credentials_handle(&mut self.credentials) {
                warn!(%error, "failed to free credentials handle");
            }
            self.credentials_live = false;
        }
        self.out_token = Vec::new();
    }

    /// A copy of the most recent output token; empty if no negotiation step
    /// has produced one yet.
    pub fn output_token(&self) -> Vec<u8> {
        self.out_token.clone()
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn package(&self) -> &SecurityPackageType {
        &self.package
    }

    fn fail(&mut self, error: Error) -> Error {
        self.state = NegotiationState::Failed;
        self.failure = Some(error.clone());
        error
    }

    #[cfg(test)]
    fn handles_live(&self) -> (bool, bool) {
        (self.credentials_live, self.context_live)
    }
}

impl Drop for AuthContext {
    fn drop(&mut self) {
        self.cleanup();
    }
}
