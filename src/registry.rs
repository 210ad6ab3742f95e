use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use base64::Engine as _;
use tracing::{debug, instrument, warn};

use crate::auth_context::{AuthContext, NegotiationState};
use crate::provider::SecurityProvider;
use crate::{ClientRequestFlags, Error, ErrorKind, Result, SecurityPackageType};

/// Opaque identifier of one registered negotiation. Strictly increasing and
/// never reused, even after the session is destroyed, so a stale id retried
/// by the caller is reported as unknown instead of touching another session.
pub type SessionId = u64;

/// Multiplexes any number of concurrent negotiations behind stable session
/// ids.
///
/// The id map is guarded by one lock; every context additionally sits behind
/// its own lock, so map operations never block on an in-flight negotiation
/// step and at most one step runs per session at a time.
pub struct AuthContextRegistry {
    provider: Arc<dyn SecurityProvider>,
    inner: Mutex<RegistryInner>,
}

struct RegistryInner {
    next_id: SessionId,
    sessions: HashMap<SessionId, Arc<Mutex<AuthContext>>>,
}

impl AuthContextRegistry {
    pub fn new(provider: Arc<dyn SecurityProvider>) -> Self {
        Self {
            provider,
            inner: Mutex::new(RegistryInner {
                next_id: 1,
                sessions: HashMap::new(),
            }),
        }
    }

    /// A registry backed by the native Windows security provider.
    #[cfg(windows)]
    pub fn native() -> Self {
        Self::new(Arc::new(crate::secur32::Secur32))
    }

    /// Opens a new auth context and returns its session id.
    ///
    /// The id is valid even when initialization failed: the context is
    /// registered in its failed state and later negotiation calls surface
    /// the original error instead of reporting the id as unknown.
    #[instrument(level = "debug", skip_all, fields(package = %package, target_host = %target_host))]
    pub fn create_auth_context(
        &self,
        package: &str,
        target_host: &str,
        application_data: &[u8],
        flags: Option<ClientRequestFlags>,
    ) -> SessionId {
        let package = SecurityPackageType::from(package);

        let mut context = AuthContext::new(Arc::clone(&self.provider));
        if let Err(error) = context.init(package, Some(target_host), application_data, flags) {
            warn!(%error, "auth context initialization failed");
        }

        let mut inner = self.lock_inner();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.sessions.insert(id, Arc::new(Mutex::new(context)));

        debug!(id, "auth context registered");
        id
    }

    /// Cleans up and removes a session. Returns the number of entries
    /// removed (0 or 1); an unknown id is not an error.
    pub fn free_auth_context(&self, id: SessionId) -> usize {
        let removed = self.lock_inner().sessions.remove(&id);

        match removed {
            Some(context) => {
                lock_context(&context).cleanup();
                debug!(id, "auth context freed");
                1
            }
            None => 0,
        }
    }

    /// Performs the first negotiation leg and returns the initial outbound
    /// token.
    pub fn create_auth_request(&self, id: SessionId) -> Result<Vec<u8>> {
        let context = self.get(id)?;
        let token = lock_context(&context).advance(None)?;
        Ok(token)
    }

    /// Consumes the peer's challenge and returns the next outbound token.
    pub fn create_auth_response(&self, id: SessionId, input_token: &[u8]) -> Result<Vec<u8>> {
        let context = self.get(id)?;
        let token = lock_context(&context).advance(Some(input_token))?;
        Ok(token)
    }

    /// The first-leg token rendered as an HTTP `Authorization` header value,
    /// `"<package> <base64 token>"`.
    pub fn create_auth_request_header(&self, id: SessionId) -> Result<String> {
        let context = self.get(id)?;
        let mut context = lock_context(&context);
        let token = context.advance(None)?;
        Ok(auth_header(context.package(), &token))
    }

    /// The continuation token rendered as an HTTP `Authorization` header
    /// value.
    pub fn create_auth_response_header(&self, id: SessionId, input_token: &[u8]) -> Result<String> {
        let context = self.get(id)?;
        let mut context = lock_context(&context);
        let token = context.advance(Some(input_token))?;
        Ok(auth_header(context.package(), &token))
    }

    /// A copy of the most recent output token of a session.
    pub fn output_token(&self, id: SessionId) -> Result<Vec<u8>> {
        Ok(lock_context(&self.get(id)?).output_token())
    }

    /// Negotiation progress of a session.
    pub fn negotiation_state(&self, id: SessionId) -> Result<NegotiationState> {
        Ok(lock_context(&self.get(id)?).state())
    }

    fn get(&self, id: SessionId) -> Result<Arc<Mutex<AuthContext>>> {
        self.lock_inner()
            .sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::SessionNotFound, format!("Unknown auth context id: {id}")))
    }

    fn lock_inner(&self) -> MutexGuard<'_, RegistryInner> {
        // a poisoned lock must not block teardown of the remaining sessions
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lock_context(context: &Arc<Mutex<AuthContext>>) -> MutexGuard<'_, AuthContext> {
    context.lock().unwrap_or_else(PoisonError::into_inner)
}

fn auth_header(package: &SecurityPackageType, token: &[u8]) -> String {
    format!(
        "{package} {}",
        base64::engine::general_purpose::STANDARD.encode(token)
    )
}
