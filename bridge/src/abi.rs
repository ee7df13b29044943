//! C ABI for embedders (libcades_bridge).
//!
//! Every entry point takes an opaque `cades_bridge` handle created by
//! `cades_bridge_new` and released by `cades_bridge_free`. Integer results
//! are `0` on success, `-6` for invalid arguments, a positive errno for
//! channel failures, or the engine's own code passed through unchanged.
//! String arguments and results are raw C strings in the engine's own
//! encoding; nothing here transcodes them. Strings returned to the caller
//! are heap copies that must be released with `cades_string_free`.
//!
//! No locking is done here. `open`, `close`, `main` and `free` must not run
//! concurrently with any other call on the same handle; the remaining
//! calls may run while another thread sits in `cades_bridge_run`.
#![allow(non_camel_case_types)]

use std::{
    ffi::{CStr, CString, OsStr},
    os::{
        raw::{c_char, c_int},
        unix::ffi::OsStrExt,
    },
    panic::{self, AssertUnwindSafe},
    path::Path,
    ptr, slice,
};

use cades_common::{error::to_status, BridgeError, STATUS_INTERNAL, STATUS_OK};

use crate::{
    engine::{EngineVtable, VtableEngine},
    session::SessionState,
    Bridge,
};

/// Engine function table as seen from C
pub type cades_engine_vtable = EngineVtable;

/// Opaque bridge handle
pub struct cades_bridge {
    inner: Bridge<VtableEngine>,
}

/// `cades_bridge_state` result for a closed session
pub const CADES_STATE_CLOSED: c_int = 0;
/// `cades_bridge_state` result when only `in` is held
pub const CADES_STATE_PARTIALLY_OPEN: c_int = 1;
/// `cades_bridge_state` result for an open session
pub const CADES_STATE_OPEN: c_int = 2;

/// Install a stderr log subscriber. Safe to call more than once.
#[no_mangle]
pub extern "C" fn cades_bridge_init_logging() -> c_int {
    guarded("init_logging", STATUS_INTERNAL, || {
        let _ = tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .try_init();
        STATUS_OK
    })
}

#[no_mangle]
pub extern "C" fn cades_bridge_new(
    vtable: *const cades_engine_vtable,
    out_bridge: *mut *mut cades_bridge,
) -> c_int {
    guarded("new", STATUS_INTERNAL, || {
        if out_bridge.is_null() {
            return BridgeError::InvalidArgument("out_bridge is null").status();
        }
        if vtable.is_null() {
            return BridgeError::InvalidArgument("vtable is null").status();
        }
        let engine = match VtableEngine::new(unsafe { &*vtable }) {
            Ok(engine) => engine,
            Err(e) => {
                tracing::error!("Rejecting engine: {}", e);
                return e.status();
            }
        };
        install(out_bridge, engine)
    })
}

/// Bridge over the engine linked in from the vendor SDK
#[cfg(feature = "native-engine")]
#[no_mangle]
pub extern "C" fn cades_bridge_new_native(out_bridge: *mut *mut cades_bridge) -> c_int {
    guarded("new_native", STATUS_INTERNAL, || {
        if out_bridge.is_null() {
            return BridgeError::InvalidArgument("out_bridge is null").status();
        }
        install(out_bridge, VtableEngine::native())
    })
}

fn install(out_bridge: *mut *mut cades_bridge, engine: VtableEngine) -> c_int {
    let handle = Box::new(cades_bridge {
        inner: Bridge::new(engine),
    });
    tracing::debug!("Created bridge for session {}", handle.inner.session().id());
    unsafe {
        *out_bridge = Box::into_raw(handle);
    }
    STATUS_OK
}

/// Close the session and release the handle. Null is ignored.
#[no_mangle]
pub extern "C" fn cades_bridge_free(bridge: *mut cades_bridge) {
    if bridge.is_null() {
        return;
    }
    guarded("free", (), || unsafe {
        let mut handle = Box::from_raw(bridge);
        handle.inner.close();
    })
}

#[no_mangle]
pub extern "C" fn cades_bridge_open(bridge: *mut cades_bridge, path: *const c_char) -> c_int {
    guarded("open", STATUS_INTERNAL, || {
        let bridge = match borrow_bridge_mut(bridge) {
            Ok(bridge) => bridge,
            Err(e) => return e.status(),
        };
        let path = match channel_dir(path) {
            Ok(path) => path,
            Err(e) => return e.status(),
        };
        to_status(bridge.inner.open(path))
    })
}

/// Open the channels and run the engine loop on them, as one call
#[no_mangle]
pub extern "C" fn cades_bridge_main(bridge: *mut cades_bridge, path: *const c_char) -> c_int {
    let status = cades_bridge_open(bridge, path);
    if status != STATUS_OK {
        return status;
    }
    cades_bridge_run(bridge)
}

#[no_mangle]
pub extern "C" fn cades_bridge_run(bridge: *const cades_bridge) -> c_int {
    guarded("run", STATUS_INTERNAL, || match borrow_bridge(bridge) {
        Ok(bridge) => bridge.inner.run(),
        Err(e) => e.status(),
    })
}

#[no_mangle]
pub extern "C" fn cades_bridge_close(bridge: *mut cades_bridge) -> c_int {
    guarded("close", STATUS_INTERNAL, || match borrow_bridge_mut(bridge) {
        Ok(bridge) => {
            bridge.inner.close();
            STATUS_OK
        }
        Err(e) => e.status(),
    })
}

/// One of the `CADES_STATE_*` values, or `-6` for a null handle
#[no_mangle]
pub extern "C" fn cades_bridge_state(bridge: *const cades_bridge) -> c_int {
    guarded("state", STATUS_INTERNAL, || match borrow_bridge(bridge) {
        Ok(bridge) => match bridge.inner.session().state() {
            SessionState::Closed => CADES_STATE_CLOSED,
            SessionState::PartiallyOpen => CADES_STATE_PARTIALLY_OPEN,
            SessionState::Open => CADES_STATE_OPEN,
        },
        Err(e) => e.status(),
    })
}

/// Next engine message, or null when there is none
#[no_mangle]
pub extern "C" fn cades_bridge_read(bridge: *const cades_bridge) -> *mut c_char {
    guarded("read", ptr::null_mut(), || match borrow_bridge(bridge) {
        Ok(bridge) => into_raw_string(bridge.inner.gateway().read_message()),
        Err(_) => ptr::null_mut(),
    })
}

/// Forward `len` bytes at `request`. A null `request` is forwarded as an
/// absent payload whatever `len` says.
#[no_mangle]
pub extern "C" fn cades_bridge_write(
    bridge: *const cades_bridge,
    request: *const u8,
    len: c_int,
) -> c_int {
    guarded("write", STATUS_INTERNAL, || {
        let bridge = match borrow_bridge(bridge) {
            Ok(bridge) => bridge,
            Err(e) => return e.status(),
        };
        if request.is_null() {
            return bridge.inner.gateway().write_message(None);
        }
        let Ok(len) = usize::try_from(len) else {
            return BridgeError::InvalidArgument("negative request length").status();
        };
        let bytes = unsafe { slice::from_raw_parts(request, len) };
        bridge.inner.gateway().write_message(Some(bytes))
    })
}

#[no_mangle]
pub extern "C" fn cades_bridge_activate_license(
    bridge: *const cades_bridge,
    ocsp_license: *const c_char,
    tsp_license: *const c_char,
) -> c_int {
    guarded("activate_license", STATUS_INTERNAL, || match borrow_bridge(bridge) {
        Ok(bridge) => unsafe {
            bridge
                .inner
                .gateway()
                .activate_license(opt_cstr(ocsp_license), opt_cstr(tsp_license))
        },
        Err(e) => e.status(),
    })
}

#[no_mangle]
pub extern "C" fn cades_bridge_activate_csp_license(
    bridge: *const cades_bridge,
    license: *const c_char,
    user: *const c_char,
    company: *const c_char,
) -> c_int {
    guarded("activate_csp_license", STATUS_INTERNAL, || match borrow_bridge(bridge) {
        Ok(bridge) => unsafe {
            bridge.inner.gateway().activate_csp_license(
                opt_cstr(license),
                opt_cstr(user),
                opt_cstr(company),
            )
        },
        Err(e) => e.status(),
    })
}

#[no_mangle]
pub extern "C" fn cades_bridge_import_pfx(
    bridge: *const cades_bridge,
    pfx: *const c_char,
    password: *const c_char,
) -> c_int {
    guarded("import_pfx", STATUS_INTERNAL, || match borrow_bridge(bridge) {
        Ok(bridge) => unsafe {
            bridge
                .inner
                .gateway()
                .import_pfx(opt_cstr(pfx), opt_cstr(password))
        },
        Err(e) => e.status(),
    })
}

#[no_mangle]
pub extern "C" fn cades_bridge_install_root_certificate(
    bridge: *const cades_bridge,
    certificate: *const c_char,
) -> c_int {
    guarded("install_root_certificate", STATUS_INTERNAL, || match borrow_bridge(bridge) {
        Ok(bridge) => unsafe {
            bridge
                .inner
                .gateway()
                .install_root_certificate(opt_cstr(certificate))
        },
        Err(e) => e.status(),
    })
}

/// Engine text for `code`, or null when the engine has none
#[no_mangle]
pub extern "C" fn cades_bridge_describe_error(bridge: *const cades_bridge, code: c_int) -> *mut c_char {
    guarded("describe_error", ptr::null_mut(), || match borrow_bridge(bridge) {
        Ok(bridge) => into_raw_string(bridge.inner.gateway().describe_error(code)),
        Err(_) => ptr::null_mut(),
    })
}

/// Release a string returned by this library. Null is ignored.
#[no_mangle]
pub extern "C" fn cades_string_free(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    unsafe {
        drop(CString::from_raw(s));
    }
}

fn guarded<T>(operation: &str, fallback: T, f: impl FnOnce() -> T) -> T {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            tracing::error!("Panic in cades_bridge_{}, returning fallback", operation);
            fallback
        }
    }
}

fn borrow_bridge<'a>(bridge: *const cades_bridge) -> Result<&'a cades_bridge, BridgeError> {
    if bridge.is_null() {
        return Err(BridgeError::InvalidArgument("bridge handle is null"));
    }
    Ok(unsafe { &*bridge })
}

fn borrow_bridge_mut<'a>(bridge: *mut cades_bridge) -> Result<&'a mut cades_bridge, BridgeError> {
    if bridge.is_null() {
        return Err(BridgeError::InvalidArgument("bridge handle is null"));
    }
    Ok(unsafe { &mut *bridge })
}

fn channel_dir<'a>(path: *const c_char) -> Result<&'a Path, BridgeError> {
    if path.is_null() {
        return Err(BridgeError::InvalidArgument("channel path is null"));
    }
    let bytes = unsafe { CStr::from_ptr(path) }.to_bytes();
    Ok(Path::new(OsStr::from_bytes(bytes)))
}

/// # Safety
/// `raw` is null or a NUL-terminated string valid for `'a`.
unsafe fn opt_cstr<'a>(raw: *const c_char) -> Option<&'a CStr> {
    if raw.is_null() {
        None
    } else {
        Some(CStr::from_ptr(raw))
    }
}

fn into_raw_string(value: Option<CString>) -> *mut c_char {
    value.map_or(ptr::null_mut(), CString::into_raw)
}
