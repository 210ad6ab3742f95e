//! Logged-on principal queries. A read-only OS lookup, separate from the
//! negotiation state machine.

use std::sync::Mutex;

use lazy_static::lazy_static;

use crate::Result;

lazy_static! {
    // read-only after the first successful query
    static ref LOGON_USER_NAME: Mutex<Option<String>> = Mutex::new(None);
}

/// Whether a native security provider exists on this platform. Only Windows
/// is supported; elsewhere every negotiation operation fails.
pub fn os_supported() -> bool {
    cfg!(windows)
}

/// The domain-qualified (`DOMAIN\user`) name of the user running the
/// process. Cached process-wide after the first successful query.
pub fn logon_user_name() -> Result<String> {
    let mut cached = LOGON_USER_NAME
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);

    if let Some(name) = cached.as_ref() {
        return Ok(name.clone());
    }

    let name = query_logon_user_name()?;
    *cached = Some(name.clone());

    Ok(name)
}

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        use crate::secur32;

        fn query_logon_user_name() -> Result<String> {
            secur32::query_logon_user_name()
        }
    } else {
        use crate::{Error, ErrorKind};

        // No SAM-compatible name outside Windows; the closest equivalent is
        // hostname-qualified, which keeps callers that split on '\' working.
        fn query_logon_user_name() -> Result<String> {
            let hostname = whoami::fallible::hostname().map_err(|err| {
                Error::new(
                    ErrorKind::IdentityQuery,
                    format!("Could not get user name of logged in user: {err}"),
                )
            })?;

            Ok(format!("{hostname}\\{}", whoami::username()))
        }
    }
}
