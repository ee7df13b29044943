use std::{
    ffi::{CStr, CString},
    os::{
        fd::RawFd,
        raw::{c_char, c_int},
    },
    ptr,
};

use cades_common::{BridgeError, Result};

/// The signature engine behind the bridge.
///
/// Every method is a synchronous call into code the bridge does not
/// control. Integer results are engine-defined (`0` is success) and are
/// passed back to callers untouched. Strings are raw C strings in whatever
/// encoding the engine uses and are never transcoded. Absent string
/// arguments are passed on as `None`, never replaced with an empty string.
pub trait Engine: Send + Sync {
    /// Run the engine's message loop over the two channel descriptors.
    /// Usually does not return until the engine shuts down.
    fn run(&self, channel_in: RawFd, channel_out: RawFd) -> i32;

    /// Next outgoing message from the engine, if it has one
    fn read_message(&self) -> Option<CString>;

    /// Hand a request to the engine
    fn write_message(&self, message: Option<&[u8]>) -> i32;

    /// Install the OCSP and TSP licenses
    fn activate_license(&self, ocsp: Option<&CStr>, tsp: Option<&CStr>) -> i32;

    /// Install the CSP license for a user and company
    fn activate_csp_license(
        &self,
        license: Option<&CStr>,
        user: Option<&CStr>,
        company: Option<&CStr>,
    ) -> i32;

    /// Import a base64 PKCS#12 container
    fn import_pfx(&self, pfx: Option<&CStr>, password: Option<&CStr>) -> i32;

    /// Install a base64 root certificate into the trusted store
    fn install_root_certificate(&self, certificate: Option<&CStr>) -> i32;

    /// Human readable text for an engine result code
    fn describe_error(&self, code: i32) -> Option<CString>;
}

/// `int main_wrapper(int pipe_in, int pipe_out)`
pub type RunFn = unsafe extern "C" fn(c_int, c_int) -> c_int;
/// `const char* read_wrapper()`
pub type ReadFn = unsafe extern "C" fn() -> *const c_char;
/// `int write_wrapper(const char* request, int length)`
pub type WriteFn = unsafe extern "C" fn(*const c_char, c_int) -> c_int;
/// `int license_wrapper(const char* ocsp_lic, const char* tsp_lic)`
pub type LicenseFn = unsafe extern "C" fn(*const c_char, *const c_char) -> c_int;
/// `int license_csp_wrapper(const char* csp_lic, const char* user, const char* company)`
pub type LicenseCspFn = unsafe extern "C" fn(*const c_char, *const c_char, *const c_char) -> c_int;
/// `int install_pfx_wrapper(const char* pfx, const char* password)`
pub type InstallPfxFn = unsafe extern "C" fn(*const c_char, *const c_char) -> c_int;
/// `int install_root_cert_wrapper(const char* cert)`
pub type InstallRootCertFn = unsafe extern "C" fn(*const c_char) -> c_int;
/// `const char* error_message_wrapper(int code)`
pub type ErrorMessageFn = unsafe extern "C" fn(c_int) -> *const c_char;

/// C function table for an engine. Strings returned by `read` and
/// `error_message` stay owned by the engine; the bridge copies them before
/// the next call.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineVtable {
    pub run:               Option<RunFn>,
    pub read:              Option<ReadFn>,
    pub write:             Option<WriteFn>,
    pub license:           Option<LicenseFn>,
    pub license_csp:       Option<LicenseCspFn>,
    pub install_pfx:       Option<InstallPfxFn>,
    pub install_root_cert: Option<InstallRootCertFn>,
    pub error_message:     Option<ErrorMessageFn>,
}

/// An [`Engine`] backed by a complete [`EngineVtable`]
#[derive(Debug, Clone, Copy)]
pub struct VtableEngine {
    run:               RunFn,
    read:              ReadFn,
    write:             WriteFn,
    license:           LicenseFn,
    license_csp:       LicenseCspFn,
    install_pfx:       InstallPfxFn,
    install_root_cert: InstallRootCertFn,
    error_message:     ErrorMessageFn,
}

impl VtableEngine {
    /// Every entry must be present; a hole in the table is an invalid
    /// argument rather than a deferred crash.
    pub fn new(vtable: &EngineVtable) -> Result<Self> {
        Ok(Self {
            run:               require(vtable.run, "engine vtable has no `run`")?,
            read:              require(vtable.read, "engine vtable has no `read`")?,
            write:             require(vtable.write, "engine vtable has no `write`")?,
            license:           require(vtable.license, "engine vtable has no `license`")?,
            license_csp:       require(vtable.license_csp, "engine vtable has no `license_csp`")?,
            install_pfx:       require(vtable.install_pfx, "engine vtable has no `install_pfx`")?,
            install_root_cert: require(
                vtable.install_root_cert,
                "engine vtable has no `install_root_cert`",
            )?,
            error_message:     require(
                vtable.error_message,
                "engine vtable has no `error_message`",
            )?,
        })
    }

    /// The engine linked in from the vendor SDK
    #[cfg(feature = "native-engine")]
    pub fn native() -> Self {
        Self {
            run:               native::main_wrapper,
            read:              native::read_wrapper,
            write:             native::write_wrapper,
            license:           native::license_wrapper,
            license_csp:       native::license_csp_wrapper,
            install_pfx:       native::install_pfx_wrapper,
            install_root_cert: native::install_root_cert_wrapper,
            error_message:     native::error_message_wrapper,
        }
    }
}

fn require<T>(entry: Option<T>, missing: &'static str) -> Result<T> {
    entry.ok_or(BridgeError::InvalidArgument(missing))
}

fn opt_ptr(arg: Option<&CStr>) -> *const c_char {
    arg.map_or(ptr::null(), CStr::as_ptr)
}

/// Byte-for-byte copy of an engine-owned C string
///
/// # Safety
/// `raw` is null or points to a NUL-terminated string that stays valid for
/// the duration of this call.
unsafe fn copy_engine_string(raw: *const c_char) -> Option<CString> {
    if raw.is_null() {
        return None;
    }
    Some(CStr::from_ptr(raw).to_owned())
}

// SAFETY (all calls below): the function pointers come from a table the
// embedder vouched for. String arguments are either null or borrowed
// NUL-terminated buffers that outlive the call, and `write` receives the
// exact length of the buffer it is given.
impl Engine for VtableEngine {
    fn run(&self, channel_in: RawFd, channel_out: RawFd) -> i32 {
        unsafe { (self.run)(channel_in, channel_out) }
    }

    fn read_message(&self) -> Option<CString> {
        unsafe { copy_engine_string((self.read)()) }
    }

    fn write_message(&self, message: Option<&[u8]>) -> i32 {
        match message {
            // The gateway rejects buffers longer than c_int::MAX before we get here.
            Some(bytes) => unsafe { (self.write)(bytes.as_ptr().cast(), bytes.len() as c_int) },
            None => unsafe { (self.write)(ptr::null(), 0) },
        }
    }

    fn activate_license(&self, ocsp: Option<&CStr>, tsp: Option<&CStr>) -> i32 {
        unsafe { (self.license)(opt_ptr(ocsp), opt_ptr(tsp)) }
    }

    fn activate_csp_license(
        &self,
        license: Option<&CStr>,
        user: Option<&CStr>,
        company: Option<&CStr>,
    ) -> i32 {
        unsafe { (self.license_csp)(opt_ptr(license), opt_ptr(user), opt_ptr(company)) }
    }

    fn import_pfx(&self, pfx: Option<&CStr>, password: Option<&CStr>) -> i32 {
        unsafe { (self.install_pfx)(opt_ptr(pfx), opt_ptr(password)) }
    }

    fn install_root_certificate(&self, certificate: Option<&CStr>) -> i32 {
        unsafe { (self.install_root_cert)(opt_ptr(certificate)) }
    }

    fn describe_error(&self, code: i32) -> Option<CString> {
        unsafe { copy_engine_string((self.error_message)(code)) }
    }
}

#[cfg(feature = "native-engine")]
mod native {
    use std::os::raw::{c_char, c_int};

    extern "C" {
        pub fn main_wrapper(pipe_in: c_int, pipe_out: c_int) -> c_int;
        pub fn read_wrapper() -> *const c_char;
        pub fn write_wrapper(request: *const c_char, length: c_int) -> c_int;
        pub fn license_wrapper(ocsp_lic: *const c_char, tsp_lic: *const c_char) -> c_int;
        pub fn install_pfx_wrapper(pfx: *const c_char, password: *const c_char) -> c_int;
        pub fn install_root_cert_wrapper(cert: *const c_char) -> c_int;
        pub fn license_csp_wrapper(
            csp_lic: *const c_char,
            user: *const c_char,
            company: *const c_char,
        ) -> c_int;
        pub fn error_message_wrapper(code: c_int) -> *const c_char;
    }
}
