/// Catalog wrapper that counts session lifecycle events
use std::sync::{Arc, Mutex};

use rtenc::engine::{
    EncoderSettings, NativeFrame,
    backend::{BackendError, EncoderCatalog, EncoderInfo, EncoderSession, Received},
    simulate::SimulatedCatalog,
};

#[derive(Debug, Default, Clone)]
pub struct Events {
    pub allocated: usize,
    pub opened: Vec<EncoderSettings>,
    pub frames: usize,
    pub flushes: usize,
}

#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Events>>);

impl EventLog {
    pub fn snapshot(&self) -> Events {
        self.0.lock().unwrap().clone()
    }

    fn update(&self, f: impl FnOnce(&mut Events)) {
        f(&mut self.0.lock().unwrap());
    }
}

pub struct RecordingCatalog {
    inner: SimulatedCatalog,
    log: EventLog,
    error_after_packet: bool,
}

impl RecordingCatalog {
    pub fn new(inner: SimulatedCatalog) -> (Self, EventLog) {
        let log = EventLog::default();
        (
            Self {
                inner,
                log: log.clone(),
                error_after_packet: false,
            },
            log,
        )
    }

    /// Sessions fail the receive call that follows every packet
    pub fn with_receive_errors(mut self) -> Self {
        self.error_after_packet = true;
        self
    }
}

impl EncoderCatalog for RecordingCatalog {
    fn encoders(&self) -> Vec<EncoderInfo> {
        self.inner.encoders()
    }

    fn open_session(&self, info: &EncoderInfo) -> Result<Box<dyn EncoderSession>, BackendError> {
        let inner = self.inner.open_session(info)?;
        self.log.update(|e| e.allocated += 1);
        Ok(Box::new(RecordingSession {
            inner,
            log: self.log.clone(),
            error_after_packet: self.error_after_packet,
            last_was_packet: false,
        }))
    }
}

struct RecordingSession {
    inner: Box<dyn EncoderSession>,
    log: EventLog,
    error_after_packet: bool,
    last_was_packet: bool,
}

impl EncoderSession for RecordingSession {
    fn set_option(&mut self, key: &str, value: &str) -> Result<(), BackendError> {
        self.inner.set_option(key, value)
    }

    fn open(&mut self, settings: &EncoderSettings) -> Result<(), BackendError> {
        self.inner.open(settings)?;
        self.log.update(|e| e.opened.push(settings.clone()));
        Ok(())
    }

    fn send_frame(&mut self, frame: Option<&NativeFrame>) -> Result<(), BackendError> {
        self.log.update(|e| match frame {
            Some(_) => e.frames += 1,
            None => e.flushes += 1,
        });
        self.inner.send_frame(frame)
    }

    fn receive_packet(&mut self) -> Result<Received, BackendError> {
        if self.error_after_packet && self.last_was_packet {
            self.last_was_packet = false;
            return Err(BackendError::Encode("corrupt slice".into()));
        }
        let received = self.inner.receive_packet();
        self.last_was_packet = matches!(received, Ok(Received::Packet(_)));
        received
    }

    fn extradata(&self) -> &[u8] {
        self.inner.extradata()
    }

    fn codec_tag(&self) -> Option<[u8; 4]> {
        self.inner.codec_tag()
    }
}
