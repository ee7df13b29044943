// End-to-end channel scenarios against a scratch directory and a loopback engine.
use std::{
    ffi::{CStr, CString},
    fs::File,
    mem::ManuallyDrop,
    os::{fd::{FromRawFd, RawFd}, unix::fs::FileTypeExt},
};

use cades_bridge::{Bridge, BridgeError, Engine, SessionState};
use cades_common::{ensure_channel, framing, ChannelKind, STATUS_INVALID_ARGUMENT};

/// Engine whose loop answers one framed request with its upper-cased payload
struct LoopbackEngine;

impl Engine for LoopbackEngine {
    fn run(&self, channel_in: RawFd, channel_out: RawFd) -> i32 {
        // SAFETY: the session keeps owning both descriptors; ManuallyDrop
        // stops these views from closing them.
        let mut input = ManuallyDrop::new(unsafe { File::from_raw_fd(channel_in) });
        let mut output = ManuallyDrop::new(unsafe { File::from_raw_fd(channel_out) });

        let request = match framing::read_frame(&mut *input, 1024) {
            Ok(request) => request,
            Err(_) => return -1,
        };
        match framing::write_frame(&mut *output, &request.to_ascii_uppercase()) {
            Ok(()) => 0,
            Err(_) => -2,
        }
    }

    fn read_message(&self) -> Option<CString> {
        None
    }

    fn write_message(&self, _: Option<&[u8]>) -> i32 {
        0
    }

    fn activate_license(&self, _: Option<&CStr>, _: Option<&CStr>) -> i32 {
        0
    }

    fn activate_csp_license(&self, _: Option<&CStr>, _: Option<&CStr>, _: Option<&CStr>) -> i32 {
        0
    }

    fn import_pfx(&self, _: Option<&CStr>, _: Option<&CStr>) -> i32 {
        0
    }

    fn install_root_certificate(&self, _: Option<&CStr>) -> i32 {
        0
    }

    fn describe_error(&self, _: i32) -> Option<CString> {
        None
    }
}

#[test]
fn missing_directory_is_an_os_error() {
    let scratch = tempfile::tempdir().unwrap();
    let dir = scratch.path().join("s1");
    let mut bridge = Bridge::new(LoopbackEngine);

    let err = bridge.open(&dir).unwrap_err();
    assert!(err.is_os_error());
    assert_eq!(err.status(), libc::ENOENT);
    assert_ne!(err.status(), STATUS_INVALID_ARGUMENT);
    assert_eq!(bridge.session().state(), SessionState::Closed);
    assert!(!dir.exists());
}

#[test]
fn empty_directory_gets_both_channels() {
    let scratch = tempfile::tempdir().unwrap();
    let dir = scratch.path().join("s2");
    std::fs::create_dir(&dir).unwrap();
    let mut bridge = Bridge::new(LoopbackEngine);

    bridge.open(&dir).unwrap();
    for name in ["in", "out"] {
        let meta = std::fs::metadata(dir.join(name)).unwrap();
        assert!(meta.file_type().is_fifo(), "{name} is not a FIFO");
    }
    assert_eq!(bridge.session().state(), SessionState::Open);

    bridge.close();
    assert_eq!(bridge.session().state(), SessionState::Closed);
    assert!(bridge.session().raw_handles().is_none());
}

#[test]
fn empty_path_never_touches_the_filesystem() {
    let mut bridge = Bridge::new(LoopbackEngine);
    let err = bridge.open("").unwrap_err();
    assert!(matches!(err, BridgeError::InvalidArgument(_)));
    assert_eq!(bridge.serve(""), STATUS_INVALID_ARGUMENT);
}

#[test]
fn serve_hands_channels_to_the_engine() {
    let dir = tempfile::tempdir().unwrap();

    // The FIFO buffers the request until the engine loop reads it.
    let mut requests = ensure_channel(ChannelKind::In, &dir.path().join("in"), 0o600).unwrap();
    framing::write_frame(&mut requests, b"{\"method\":\"ping\"}").unwrap();

    let mut bridge = Bridge::new(LoopbackEngine);
    assert_eq!(bridge.serve(dir.path()), 0);

    let mut responses = ensure_channel(ChannelKind::Out, &dir.path().join("out"), 0o600).unwrap();
    let reply = framing::read_frame(&mut responses, 1024).unwrap();
    assert_eq!(reply, b"{\"METHOD\":\"PING\"}");

    bridge.close();
}

#[test]
fn serve_reports_partial_open_and_skips_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("out")).unwrap();
    let mut bridge = Bridge::new(LoopbackEngine);

    assert_eq!(bridge.serve(dir.path()), libc::EISDIR);
    assert_eq!(bridge.session().state(), SessionState::PartiallyOpen);
    assert_eq!(bridge.run(), libc::EBADF);

    bridge.close();
    assert_eq!(bridge.session().state(), SessionState::Closed);
}
