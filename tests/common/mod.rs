#![allow(dead_code)]

use conductor::midi::{MidiBackend, MidiSink};
use conductor::Error;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Everything written to a [`RecordingBackend`] output, in send order.
pub type SentLog = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

/// Backend whose outputs record every message. Ports listed in `failing`
/// return an error from every send.
#[derive(Default, Clone)]
pub struct RecordingBackend {
    sent: SentLog,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_port(&self, port_id: &str) {
        self.failing.lock().unwrap().insert(port_id.to_string());
    }

    pub fn sent(&self) -> Vec<(String, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, port_id: &str) -> Vec<Vec<u8>> {
        self.sent()
            .into_iter()
            .filter(|(port, _)| port == port_id)
            .map(|(_, bytes)| bytes)
            .collect()
    }

    /// Number of messages to `port_id` whose first byte is `status`.
    pub fn count(&self, port_id: &str, status: u8) -> usize {
        self.sent_to(port_id)
            .iter()
            .filter(|bytes| bytes.first() == Some(&status))
            .count()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl MidiBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    fn open_output(&self, port_id: &str, _name: &str) -> conductor::Result<Box<dyn MidiSink>> {
        Ok(Box::new(RecordingSink {
            port_id: port_id.to_string(),
            sent: Arc::clone(&self.sent),
            failing: Arc::clone(&self.failing),
        }))
    }
}

struct RecordingSink {
    port_id: String,
    sent: SentLog,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl MidiSink for RecordingSink {
    fn send(&mut self, bytes: &[u8]) -> conductor::Result<()> {
        if self.failing.lock().unwrap().contains(&self.port_id) {
            return Err(Error::Send {
                port: self.port_id.clone(),
                reason: "device unplugged".to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((self.port_id.clone(), bytes.to_vec()));
        Ok(())
    }
}
