use std::{
    ffi::CString,
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::engine::Engine;

const IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// Messages [`MessagePump::spawn`] buffers before the reader waits
pub const DEFAULT_PUMP_CAPACITY: usize = 64;

/// Background reader that drains [`Engine::read_message`] into a channel.
///
/// This is the only place the bridge starts a thread, and only when the
/// embedder asks for it. The channel is bounded: once `capacity` messages
/// are waiting, the thread blocks until the consumer takes one and stops
/// reading from the engine meanwhile, so an idle consumer leaves messages
/// with the engine instead of growing this queue.
///
/// `read_message` may block indefinitely, so [`MessagePump::stop`] takes
/// effect once the current read returns. The thread is never joined on
/// drop; dropping the pump also drops the receiver, which releases a
/// thread blocked on a full channel.
pub struct MessagePump {
    receiver: Receiver<CString>,
    running:  Arc<AtomicBool>,
    handle:   JoinHandle<()>,
}

impl MessagePump {
    /// Start the reader thread with [`DEFAULT_PUMP_CAPACITY`]
    pub fn spawn<E: Engine + 'static>(engine: Arc<E>) -> io::Result<Self> {
        Self::with_capacity(engine, DEFAULT_PUMP_CAPACITY)
    }

    /// Start the reader thread, buffering at most `capacity` messages
    pub fn with_capacity<E: Engine + 'static>(engine: Arc<E>, capacity: usize) -> io::Result<Self> {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("cades-message-pump".to_string())
            .spawn(move || {
                tracing::debug!("Message pump started");
                while flag.load(Ordering::SeqCst) {
                    match engine.read_message() {
                        Some(message) => {
                            tracing::trace!("Pumped {} byte message", message.as_bytes().len());
                            if sender.send(message).is_err() {
                                tracing::debug!("Message pump receiver dropped");
                                break;
                            }
                        }
                        None => thread::sleep(IDLE_BACKOFF),
                    }
                }
                tracing::debug!("Message pump stopped");
            })?;

        Ok(Self {
            receiver,
            running,
            handle,
        })
    }

    /// Messages in the order the engine produced them
    pub fn receiver(&self) -> &Receiver<CString> {
        &self.receiver
    }

    /// Wait up to `timeout` for the next message
    pub fn recv_timeout(&self, timeout: Duration) -> Option<CString> {
        match self.receiver.recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Ask the reader thread to exit after its current read
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether the reader thread has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for MessagePump {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        ffi::CStr,
        os::fd::RawFd,
        sync::Mutex,
        time::Instant,
    };

    use super::*;

    struct ScriptedEngine {
        queue: Mutex<VecDeque<CString>>,
    }

    impl ScriptedEngine {
        fn with(messages: &[&CStr]) -> Self {
            Self {
                queue: Mutex::new(messages.iter().map(|m| CString::from(*m)).collect()),
            }
        }

        fn remaining(&self) -> usize {
            self.queue.lock().unwrap().len()
        }
    }

    impl Engine for ScriptedEngine {
        fn run(&self, _: RawFd, _: RawFd) -> i32 {
            0
        }
        fn read_message(&self) -> Option<CString> {
            self.queue.lock().unwrap().pop_front()
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
    fn messages_arrive_in_order() {
        let engine = Arc::new(ScriptedEngine::with(&[c"one", c"\xe4\xe2\xe0", c"three"]));
        let pump = MessagePump::spawn(engine).unwrap();

        let timeout = Duration::from_secs(5);
        assert_eq!(pump.recv_timeout(timeout).as_deref(), Some(c"one"));
        assert_eq!(pump.recv_timeout(timeout).as_deref(), Some(c"\xe4\xe2\xe0"));
        assert_eq!(pump.recv_timeout(timeout).as_deref(), Some(c"three"));
        assert_eq!(pump.recv_timeout(Duration::from_millis(50)), None);
    }

    #[test]
    fn full_channel_leaves_messages_with_the_engine() {
        let script: Vec<CString> = (0..10)
            .map(|i| CString::new(format!("m{i}")).unwrap())
            .collect();
        let script: Vec<&CStr> = script.iter().map(CString::as_c_str).collect();
        let engine = Arc::new(ScriptedEngine::with(&script));
        let pump = MessagePump::with_capacity(Arc::clone(&engine), 2).unwrap();

        // Two messages buffered and a third held by the blocked reader.
        let deadline = Instant::now() + Duration::from_secs(5);
        while engine.remaining() > 7 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        thread::sleep(Duration::from_millis(50));
        assert_eq!(engine.remaining(), 7);
        assert_eq!(pump.receiver().len(), 2);

        for expected in &script {
            assert_eq!(pump.recv_timeout(Duration::from_secs(5)).as_deref(), Some(*expected));
        }
        assert_eq!(engine.remaining(), 0);
    }

    #[test]
    fn stop_ends_an_idle_pump() {
        let pump = MessagePump::spawn(Arc::new(ScriptedEngine::with(&[]))).unwrap();
        pump.stop();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !pump.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(pump.is_finished());
    }
}
