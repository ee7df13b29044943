use std::{
    ffi::{CStr, CString},
    sync::Arc,
};

use cades_common::BridgeError;
use sha2::{Digest, Sha256};

use crate::{engine::Engine, session::Session};

/// Engine result for a PFX import with a wrong or missing password
/// (`0x80070056`, ERROR_INVALID_PASSWORD).
pub const ERROR_INVALID_PASSWORD: i32 = 0x8007_0056_u32 as i32;

/// Whether an `import_pfx` result asks for the container password
pub fn needs_password(code: i32) -> bool {
    code == ERROR_INVALID_PASSWORD
}

/// User-facing summary of an operation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Text to show
    pub message:  String,
    /// Whether the code was a failure
    pub is_error: bool,
}

/// Forwards requests to the engine and hands results back verbatim.
///
/// Integer results are never interpreted. String arguments are borrowed C
/// strings handed to the engine as they are, whatever their encoding, and
/// engine strings come back as the exact bytes the engine produced.
pub struct Gateway<E> {
    engine: Arc<E>,
}

impl<E: Engine> Gateway<E> {
    /// Creates a gateway owning the engine
    pub fn new(engine: E) -> Self {
        Self::from_arc(Arc::new(engine))
    }

    /// Creates a gateway sharing an engine
    pub fn from_arc(engine: Arc<E>) -> Self {
        Self { engine }
    }

    /// The shared engine, e.g. for a [`crate::pump::MessagePump`]
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Run the engine loop over the session's descriptors. Returns `EBADF`
    /// without calling the engine unless the session is fully open.
    pub fn run_engine(&self, session: &Session) -> i32 {
        let Some((channel_in, channel_out)) = session.raw_handles() else {
            tracing::warn!(
                "Session {} is {:?}, not starting engine",
                session.id(),
                session.state()
            );
            return BridgeError::NotOpen.status();
        };

        tracing::info!(
            "Session {} starting engine (in fd {}, out fd {})",
            session.id(),
            channel_in,
            channel_out
        );
        let result = self.engine.run(channel_in, channel_out);
        if result != 0 {
            tracing::error!("Session {} engine loop ended with {}", session.id(), result);
        } else {
            tracing::info!("Session {} engine loop ended", session.id());
        }
        result
    }

    /// Next message from the engine, if any, exactly as the engine wrote it
    pub fn read_message(&self) -> Option<CString> {
        self.engine.read_message()
    }

    /// Hand a request to the engine. `None` is forwarded as an absent,
    /// zero-length payload.
    pub fn write_message(&self, message: Option<&[u8]>) -> i32 {
        if let Some(bytes) = message {
            if i32::try_from(bytes.len()).is_err() {
                tracing::warn!("Refusing {} byte request, too long for the engine", bytes.len());
                return BridgeError::InvalidArgument("request is too long").status();
            }
            tracing::debug!("Writing {} byte request to engine", bytes.len());
        } else {
            tracing::debug!("Writing absent request to engine");
        }
        self.engine.write_message(message)
    }

    /// Install the OCSP and TSP licenses
    pub fn activate_license(&self, ocsp: Option<&CStr>, tsp: Option<&CStr>) -> i32 {
        log_result("activate_license", self.engine.activate_license(ocsp, tsp))
    }

    /// Install the CSP license
    pub fn activate_csp_license(
        &self,
        license: Option<&CStr>,
        user: Option<&CStr>,
        company: Option<&CStr>,
    ) -> i32 {
        log_result(
            "activate_csp_license",
            self.engine.activate_csp_license(license, user, company),
        )
    }

    /// Import a base64 PKCS#12 container. See [`needs_password`].
    pub fn import_pfx(&self, pfx: Option<&CStr>, password: Option<&CStr>) -> i32 {
        if let Some(pfx) = pfx {
            tracing::info!("Importing PFX {}", fingerprint(pfx.to_bytes()));
        }
        log_result("import_pfx", self.engine.import_pfx(pfx, password))
    }

    /// Install a base64 root certificate
    pub fn install_root_certificate(&self, certificate: Option<&CStr>) -> i32 {
        if let Some(certificate) = certificate {
            tracing::info!("Installing root certificate {}", fingerprint(certificate.to_bytes()));
        }
        log_result(
            "install_root_certificate",
            self.engine.install_root_certificate(certificate),
        )
    }

    /// Engine text for `code`, or `None` when the engine has none
    pub fn describe_error(&self, code: i32) -> Option<CString> {
        self.engine.describe_error(code)
    }

    /// What to show the user after an operation returned `code`.
    ///
    /// The engine's description wins. A success without one falls back to
    /// `success_text`; anything left empty yields `None`. The message is
    /// for display, so bytes that are not UTF-8 become U+FFFD here; use
    /// [`Gateway::describe_error`] for the raw text.
    pub fn outcome(&self, code: i32, success_text: &str) -> Option<Outcome> {
        let mut message = self
            .describe_error(code)
            .map(|text| text.to_string_lossy().into_owned())
            .unwrap_or_default();
        if message.is_empty() && code == 0 {
            message = success_text.to_string();
        }
        if message.is_empty() {
            return None;
        }
        Some(Outcome {
            message,
            is_error: code != 0,
        })
    }
}

fn log_result(operation: &str, code: i32) -> i32 {
    if code == 0 {
        tracing::debug!("{} succeeded", operation);
    } else {
        tracing::warn!("{} returned {:#x}", operation, code);
    }
    code
}

/// Short SHA-256 prefix identifying a blob without logging its contents
fn fingerprint(blob: &[u8]) -> String {
    let digest = Sha256::digest(blob);
    format!("sha256:{}", hex::encode(&digest[..8]))
}

#[cfg(test)]
mod tests {
    use std::{os::fd::RawFd, sync::Mutex};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Run(RawFd, RawFd),
        Write(Option<Vec<u8>>),
        License(Option<CString>, Option<CString>),
        LicenseCsp(Option<CString>, Option<CString>, Option<CString>),
        Pfx(Option<CString>, Option<CString>),
        RootCert(Option<CString>),
    }

    #[derive(Default)]
    struct FakeEngine {
        calls:  Mutex<Vec<Call>>,
        result: i32,
    }

    fn owned(arg: Option<&CStr>) -> Option<CString> {
        arg.map(CStr::to_owned)
    }

    impl FakeEngine {
        fn returning(result: i32) -> Self {
            Self {
                result,
                ..Self::default()
            }
        }

        fn record(&self, call: Call) -> i32 {
            self.calls.lock().unwrap().push(call);
            self.result
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Engine for FakeEngine {
        fn run(&self, channel_in: RawFd, channel_out: RawFd) -> i32 {
            self.record(Call::Run(channel_in, channel_out))
        }

        fn read_message(&self) -> Option<CString> {
            // "Готов" in cp1251
            Some(c"\xc3\xee\xf2\xee\xe2".to_owned())
        }

        fn write_message(&self, message: Option<&[u8]>) -> i32 {
            self.record(Call::Write(message.map(<[u8]>::to_vec)))
        }

        fn activate_license(&self, ocsp: Option<&CStr>, tsp: Option<&CStr>) -> i32 {
            self.record(Call::License(owned(ocsp), owned(tsp)))
        }

        fn activate_csp_license(
            &self,
            license: Option<&CStr>,
            user: Option<&CStr>,
            company: Option<&CStr>,
        ) -> i32 {
            self.record(Call::LicenseCsp(owned(license), owned(user), owned(company)))
        }

        fn import_pfx(&self, pfx: Option<&CStr>, password: Option<&CStr>) -> i32 {
            self.record(Call::Pfx(owned(pfx), owned(password)))
        }

        fn install_root_certificate(&self, certificate: Option<&CStr>) -> i32 {
            self.record(Call::RootCert(owned(certificate)))
        }

        fn describe_error(&self, code: i32) -> Option<CString> {
            match code {
                0 => Some(CString::default()),
                ERROR_INVALID_PASSWORD => Some(c"The password is incorrect".to_owned()),
                _ => None,
            }
        }
    }

    #[test]
    fn results_pass_through_verbatim() {
        let gateway = Gateway::new(FakeEngine::returning(-2146893802));
        assert_eq!(gateway.activate_license(Some(c"A"), Some(c"B")), -2146893802);
        assert_eq!(gateway.install_root_certificate(Some(c"MIIC")), -2146893802);
        assert_eq!(gateway.write_message(Some(b"{}")), -2146893802);
    }

    #[test]
    fn absent_arguments_stay_absent() {
        let gateway = Gateway::new(FakeEngine::default());
        gateway.activate_license(None, Some(c"tsp"));
        gateway.activate_csp_license(Some(c"lic"), None, Some(c""));
        gateway.import_pfx(Some(c"MIIK"), None);
        gateway.install_root_certificate(None);
        gateway.write_message(None);

        assert_eq!(
            gateway.engine().calls(),
            vec![
                Call::License(None, Some(c"tsp".into())),
                Call::LicenseCsp(Some(c"lic".into()), None, Some(CString::default())),
                Call::Pfx(Some(c"MIIK".into()), None),
                Call::RootCert(None),
                Call::Write(None),
            ]
        );
    }

    #[test]
    fn non_utf8_arguments_reach_the_engine_unchanged() {
        let gateway = Gateway::new(FakeEngine::default());
        // "Пароль" and "Компания" in cp1251
        let password = c"\xcf\xe0\xf0\xee\xeb\xfc";
        let company = c"\xca\xee\xec\xef\xe0\xed\xe8\xff";

        assert_eq!(gateway.import_pfx(Some(c"MII"), Some(password)), 0);
        assert_eq!(gateway.activate_csp_license(Some(c"lic"), Some(c"u"), Some(company)), 0);

        assert_eq!(
            gateway.engine().calls(),
            vec![
                Call::Pfx(Some(c"MII".into()), Some(password.into())),
                Call::LicenseCsp(Some(c"lic".into()), Some(c"u".into()), Some(company.into())),
            ]
        );
    }

    #[test]
    fn run_engine_needs_an_open_session() {
        let gateway = Gateway::new(FakeEngine::default());
        let mut session = Session::new();

        assert_eq!(gateway.run_engine(&session), libc::EBADF);
        assert!(gateway.engine().calls().is_empty());

        let dir = tempfile::tempdir().unwrap();
        session.open(dir.path()).unwrap();
        let (channel_in, channel_out) = session.raw_handles().unwrap();

        assert_eq!(gateway.run_engine(&session), 0);
        assert_eq!(gateway.engine().calls(), vec![Call::Run(channel_in, channel_out)]);
    }

    #[test]
    fn unknown_code_has_no_description() {
        let gateway = Gateway::new(FakeEngine::default());
        assert_eq!(gateway.describe_error(12345), None);
        assert_eq!(
            gateway.read_message().map(CString::into_bytes),
            Some(b"\xc3\xee\xf2\xee\xe2".to_vec())
        );
    }

    #[test]
    fn outcome_prefers_engine_text() {
        let gateway = Gateway::new(FakeEngine::default());

        assert_eq!(
            gateway.outcome(0, "Certificate installed"),
            Some(Outcome {
                message:  "Certificate installed".into(),
                is_error: false,
            })
        );
        assert_eq!(
            gateway.outcome(ERROR_INVALID_PASSWORD, "PFX imported"),
            Some(Outcome {
                message:  "The password is incorrect".into(),
                is_error: true,
            })
        );
        assert_eq!(gateway.outcome(77, "ignored"), None);
        assert_eq!(gateway.outcome(0, ""), None);
    }

    #[test]
    fn password_detection() {
        assert!(needs_password(0x80070056u32 as i32));
        assert!(!needs_password(0));
    }

    #[test]
    fn fingerprint_hides_contents() {
        let print = fingerprint(b"MIIBsecret");
        assert!(print.starts_with("sha256:"));
        assert_eq!(print.len(), "sha256:".len() + 16);
        assert!(!print.contains("secret"));
    }
}
