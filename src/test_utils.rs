//! Scripted [`SecurityProvider`] used by the state-machine and registry
//! tests. Records every call so tests can assert on handle lifecycles and
//! on the parameters reaching the native layer.
//!
//! Negotiation steps are counted per provider, not per context, so tests
//! that advance a negotiation use one context per `MockProvider`.

use std::sync::Mutex;

use crate::provider::{
    CredentialsHandle, InitializeSecurityContextParams, InitializeSecurityContextResult, SecHandle,
    SecurityContextHandle, SecurityProvider,
};
use crate::{ClientRequestFlags, Error, ErrorKind, Result, SecurityPackageType, SecurityStatus};

/// Routes log output of the tested code into the test harness's captured
/// output. Safe to call from any number of tests; only the first install
/// wins.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

const SEC_E_NO_CREDENTIALS: i32 = 0x8009_030Eu32 as i32;
const SEC_E_LOGON_DENIED: i32 = 0x8009_030Cu32 as i32;
const SEC_E_INTERNAL_ERROR: i32 = 0x8009_0304u32 as i32;
const SEC_E_SECPKG_NOT_FOUND: i32 = 0x8009_0305u32 as i32;

#[derive(Debug, Default, Clone)]
pub(crate) struct MockCalls {
    pub acquired: u32,
    pub freed_credentials: u32,
    pub deleted_contexts: u32,
    pub advances: u32,
    pub spns: Vec<Option<String>>,
    pub input_tokens: Vec<Option<Vec<u8>>>,
    pub binding_lens: Vec<Option<usize>>,
    pub flags: Vec<ClientRequestFlags>,
}

pub(crate) struct MockProvider {
    max_token_len: u32,
    /// `ContinueNeeded` legs before the negotiation completes.
    rounds: u32,
    /// Status reported on the leg after the last `ContinueNeeded` one.
    final_status: SecurityStatus,
    fail_package_query: bool,
    fail_acquire: bool,
    fail_advance_at: Option<u32>,
    fail_releases: bool,
    calls: Mutex<MockCalls>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            max_token_len: 2888,
            rounds: 1,
            final_status: SecurityStatus::Ok,
            fail_package_query: false,
            fail_acquire: false,
            fail_advance_at: None,
            fail_releases: false,
            calls: Mutex::new(MockCalls::default()),
        }
    }

    pub fn rounds(mut self, rounds: u32) -> Self {
        self.rounds = rounds;
        self
    }

    pub fn final_status(mut self, status: SecurityStatus) -> Self {
        self.final_status = status;
        self
    }

    pub fn fail_package_query(mut self) -> Self {
        self.fail_package_query = true;
        self
    }

    pub fn fail_acquire(mut self) -> Self {
        self.fail_acquire = true;
        self
    }

    pub fn fail_advance_at(mut self, step: u32) -> Self {
        self.fail_advance_at = Some(step);
        self
    }

    pub fn fail_releases(mut self) -> Self {
        self.fail_releases = true;
        self
    }

    pub fn calls(&self) -> MockCalls {
        self.calls.lock().unwrap().clone()
    }
}

impl SecurityProvider for MockProvider {
    fn query_max_token_len(&self, package: &SecurityPackageType) -> Result<u32> {
        if self.fail_package_query {
            return Err(Error::from_status(
                ErrorKind::PackageQuery,
                &format!("Query security package info for {package}"),
                SEC_E_SECPKG_NOT_FOUND,
            ));
        }
        Ok(self.max_token_len)
    }

    fn acquire_credentials_handle(&self, _package: &SecurityPackageType) -> Result<CredentialsHandle> {
        if self.fail_acquire {
            return Err(Error::from_status(
                ErrorKind::CredentialAcquisition,
                "Acquire credentials handle",
                SEC_E_NO_CREDENTIALS,
            ));
        }

        let mut calls = self.calls.lock().unwrap();
        calls.acquired += 1;
        Ok(CredentialsHandle(SecHandle {
            dw_lower: 0xC0DE,
            dw_upper: calls.acquired as usize,
        }))
    }

    fn free_credentials_handle(&self, credentials: &mut CredentialsHandle) -> Result<()> {
        assert_ne!(credentials.0, SecHandle::default(), "freeing a never-acquired handle");
        self.calls.lock().unwrap().freed_credentials += 1;
        credentials.0 = SecHandle::default();

        if self.fail_releases {
            return Err(Error::from_status(
                ErrorKind::Internal,
                "Free credentials handle",
                SEC_E_INTERNAL_ERROR,
            ));
        }
        Ok(())
    }

    fn initialize_security_context(
        &self,
        _credentials: &mut CredentialsHandle,
        context: Option<&mut SecurityContextHandle>,
        params: InitializeSecurityContextParams<'_>,
    ) -> Result<InitializeSecurityContextResult> {
        let step = {
            let mut calls = self.calls.lock().unwrap();
            calls.advances += 1;
            calls.spns.push(params.target_spn.map(str::to_string));
            calls.input_tokens.push(params.input_token.map(<[u8]>::to_vec));
            calls
                .binding_lens
                .push(params.channel_bindings.map(|cb| cb.encode().len()));
            calls.flags.push(params.context_requirements);
            calls.advances
        };

        if self.fail_advance_at == Some(step) {
            return Err(Error::from_status(
                ErrorKind::Negotiation,
                "Initialize security context",
                SEC_E_LOGON_DENIED,
            ));
        }

        let status = if step > self.rounds {
            self.final_status
        } else {
            SecurityStatus::ContinueNeeded
        };

        Ok(InitializeSecurityContextResult {
            status,
            new_context: context.is_none().then(|| {
                SecurityContextHandle(SecHandle {
                    dw_lower: 0xFACE,
                    dw_upper: step as usize,
                })
            }),
            token: format!("token-{step}").into_bytes(),
        })
    }

    fn delete_security_context(&self, context: &mut SecurityContextHandle) -> Result<()> {
        assert_ne!(context.0, SecHandle::default(), "deleting a never-created context");
        self.calls.lock().unwrap().deleted_contexts += 1;
        context.0 = SecHandle::default();

        if self.fail_releases {
            return Err(Error::from_status(
                ErrorKind::Internal,
                "Delete security context",
                SEC_E_INTERNAL_ERROR,
            ));
        }
        Ok(())
    }
}
