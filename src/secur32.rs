//! The native Windows security provider, wrapping the SSPI calls of
//! `secur32.dll` through `windows-sys`.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::Mutex;
use std::{io, ptr};

use lazy_static::lazy_static;
use num_traits::FromPrimitive;
use windows_sys::Win32::Security::Authentication::Identity::{
    AcquireCredentialsHandleW, DeleteSecurityContext, FreeContextBuffer, FreeCredentialsHandle,
    InitializeSecurityContextW, QuerySecurityPackageInfoW, SecBuffer, SecBufferDesc, SecPkgInfoW,
    SECBUFFER_CHANNEL_BINDINGS, SECBUFFER_TOKEN, SECBUFFER_VERSION, SECPKG_CRED_OUTBOUND,
    SECURITY_NATIVE_DREP,
};
use windows_sys::Win32::Security::Credentials::SecHandle as NativeSecHandle;
use windows_sys::Win32::System::WindowsProgramming::{GetUserNameExW, NameSamCompatible};

use crate::provider::{
    CredentialsHandle, InitializeSecurityContextParams, InitializeSecurityContextResult, SecHandle,
    SecurityContextHandle, SecurityProvider,
};
use crate::{Error, ErrorKind, Result, SecurityPackageType, SecurityStatus};

lazy_static! {
    // populated on first query, read-only afterwards, shared by all sessions
    static ref MAX_TOKEN_LEN: Mutex<HashMap<String, u32>> = Mutex::new(HashMap::new());
}

/// The Windows SSPI provider.
#[derive(Debug, Default)]
pub struct Secur32;

impl SecurityProvider for Secur32 {
    fn query_max_token_len(&self, package: &SecurityPackageType) -> Result<u32> {
        let package_name = package.to_string();

        let mut cache = MAX_TOKEN_LEN
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(max_token_len) = cache.get(&package_name) {
            return Ok(*max_token_len);
        }

        let name = str_to_win_wstring(&package_name);
        let mut package_info_ptr: *mut SecPkgInfoW = ptr::null_mut();

        let status = unsafe { QuerySecurityPackageInfoW(name.as_ptr(), &mut package_info_ptr) };
        if status != 0 {
            return Err(Error::from_status(
                ErrorKind::PackageQuery,
                "Query security package info",
                status,
            ));
        }

        let max_token_len = unsafe { (*package_info_ptr).cbMaxToken };

        let status = unsafe { FreeContextBuffer(package_info_ptr as *mut c_void) };
        if status != 0 {
            return Err(Error::from_status(
                ErrorKind::PackageQuery,
                "Free package info context buffer",
                status,
            ));
        }

        cache.insert(package_name, max_token_len);
        Ok(max_token_len)
    }

    fn acquire_credentials_handle(&self, package: &SecurityPackageType) -> Result<CredentialsHandle> {
        let package_name = str_to_win_wstring(&package.to_string());
        let mut credentials = NativeSecHandle { dwLower: 0, dwUpper: 0 };
        let mut expiry = 0i64;

        let status = unsafe {
            AcquireCredentialsHandleW(
                ptr::null(),
                package_name.as_ptr(),
                SECPKG_CRED_OUTBOUND,
                ptr::null(),
                ptr::null(),
                None,
                ptr::null(),
                &mut credentials,
                &mut expiry,
            )
        };
        if status < 0 {
            return Err(Error::from_status(
                ErrorKind::CredentialAcquisition,
                "Acquire credentials handle",
                status,
            ));
        }

        Ok(CredentialsHandle(from_native(credentials)))
    }

    fn free_credentials_handle(&self, credentials: &mut CredentialsHandle) -> Result<()> {
        let native = to_native(credentials.0);

        let status = unsafe { FreeCredentialsHandle(&native) };
        if status != 0 {
            return Err(Error::from_status(
                ErrorKind::Internal,
                "Free credentials handle",
                status,
            ));
        }

        credentials.0 = SecHandle::default();
        Ok(())
    }

    fn initialize_security_context(
        &self,
        credentials: &mut CredentialsHandle,
        context: Option<&mut SecurityContextHandle>,
        params: InitializeSecurityContextParams<'_>,
    ) -> Result<InitializeSecurityContextResult> {
        let mut out_token = vec![0u8; params.max_token_len as usize];
        let mut out_buffers = [SecBuffer {
            cbBuffer: params.max_token_len,
            BufferType: SECBUFFER_TOKEN,
            pvBuffer: out_token.as_mut_ptr() as *mut c_void,
        }];
        let mut out_buffer_desc = construct_buffer_desc(&mut out_buffers);

        // The provider only reads the input token, but SSPI buffers are
        // declared mutable; keep a local copy rather than casting away the
        // caller's const-ness.
        let mut in_token = params.input_token.map(<[u8]>::to_vec);
        let mut bindings = params.channel_bindings.map(|cb| cb.encode());

        let mut in_buffers = Vec::with_capacity(2);
        if let Some(in_token) = in_token.as_mut() {
            in_buffers.push(SecBuffer {
                cbBuffer: in_token.len() as u32,
                BufferType: SECBUFFER_TOKEN,
                pvBuffer: in_token.as_mut_ptr() as *mut c_void,
            });
        }
        if let Some(bindings) = bindings.as_mut() {
            in_buffers.push(SecBuffer {
                cbBuffer: bindings.len() as u32,
                BufferType: SECBUFFER_CHANNEL_BINDINGS,
                pvBuffer: bindings.as_mut_ptr() as *mut c_void,
            });
        }
        let in_buffer_desc = construct_buffer_desc(&mut in_buffers);
        let in_buffer_desc_ptr = if in_buffers.is_empty() {
            ptr::null()
        } else {
            &in_buffer_desc as *const SecBufferDesc
        };

        let target_name = params.target_spn.map(str_to_win_wstring);
        let target_name_ptr = target_name
            .as_ref()
            .map(|name| name.as_ptr())
            .unwrap_or(ptr::null());

        let credentials_native = to_native(credentials.0);
        let mut existing_context = NativeSecHandle { dwLower: 0, dwUpper: 0 };
        let mut new_context = NativeSecHandle { dwLower: 0, dwUpper: 0 };

        let first = context.is_none();
        let (context_ptr, new_context_ptr) = if let Some(handle) = &context {
            existing_context = to_native(handle.0);
            (
                &existing_context as *const NativeSecHandle,
                &mut existing_context as *mut NativeSecHandle,
            )
        } else {
            (ptr::null(), &mut new_context as *mut NativeSecHandle)
        };

        let mut context_attributes = 0u32;
        let mut expiry = 0i64;

        let status = unsafe {
            InitializeSecurityContextW(
                &credentials_native,
                context_ptr,
                target_name_ptr,
                params.context_requirements.bits(),
                0,
                SECURITY_NATIVE_DREP,
                in_buffer_desc_ptr,
                0,
                new_context_ptr,
                &mut out_buffer_desc,
                &mut context_attributes,
                &mut expiry,
            )
        };

        let status = match SecurityStatus::from_i32(status) {
            Some(status) => status,
            None => {
                return Err(Error::from_status(
                    ErrorKind::Negotiation,
                    "Initialize security context",
                    status,
                ));
            }
        };

        if let Some(handle) = context {
            handle.0 = from_native(existing_context);
        }

        out_token.truncate(out_buffers[0].cbBuffer as usize);

        Ok(InitializeSecurityContextResult {
            status,
            new_context: first.then(|| SecurityContextHandle(from_native(new_context))),
            token: out_token,
        })
    }

    fn delete_security_context(&self, context: &mut SecurityContextHandle) -> Result<()> {
        let native = to_native(context.0);

        let status = unsafe { DeleteSecurityContext(&native) };
        if status != 0 {
            return Err(Error::from_status(
                ErrorKind::Internal,
                "Delete security context",
                status,
            ));
        }

        context.0 = SecHandle::default();
        Ok(())
    }
}

/// The SAM-compatible (`DOMAIN\user`) name of the user running the process.
pub(crate) fn query_logon_user_name() -> Result<String> {
    let mut buffer = [0u16; 256];
    let mut len = buffer.len() as u32;

    let result = unsafe { GetUserNameExW(NameSamCompatible, buffer.as_mut_ptr(), &mut len) };
    if result == 0 {
        return Err(Error::new(
            ErrorKind::IdentityQuery,
            format!(
                "Could not get user name of logged in user: {}",
                io::Error::last_os_error()
            ),
        ));
    }

    String::from_utf16(&buffer[..len as usize]).map_err(|err| {
        Error::new(
            ErrorKind::IdentityQuery,
            format!("Logon user name is not valid UTF-16: {err}"),
        )
    })
}

fn construct_buffer_desc(buffers: &mut [SecBuffer]) -> SecBufferDesc {
    SecBufferDesc {
        ulVersion: SECBUFFER_VERSION,
        cBuffers: buffers.len() as u32,
        pBuffers: buffers.as_mut_ptr(),
    }
}

fn str_to_win_wstring(value: &str) -> Vec<u16> {
    value.encode_utf16().chain(std::iter::once(0)).collect()
}

fn from_native(handle: NativeSecHandle) -> SecHandle {
    SecHandle {
        dw_lower: handle.dwLower,
        dw_upper: handle.dwUpper,
    }
}

fn to_native(handle: SecHandle) -> NativeSecHandle {
    NativeSecHandle {
        dwLower: handle.dw_lower,
        dwUpper: handle.dw_upper,
    }
}
