//! Test doubles shared by the unit tests.

use crate::export::ExportSink;
use crate::recognition::{RecognitionError, RecognitionRequest, RecognitionResponse, Recognizer};
use crate::stagger::ReadinessSet;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Notify};

/// Readiness channel with `ids` already admitted.
pub fn readiness_with(ids: &[&str]) -> (watch::Sender<ReadinessSet>, watch::Receiver<ReadinessSet>) {
    let mut set = ReadinessSet::default();
    for id in ids {
        set.admit_now(id);
    }
    watch::channel(set)
}

/// Recognizer with a fixed answer, optionally held until a gate opens.
pub struct ScriptedRecognizer {
    reply: Result<String, String>,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
}

impl ScriptedRecognizer {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            ..Self::replying("")
        }
    }

    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn recognize(
        &self,
        request: RecognitionRequest,
    ) -> Result<RecognitionResponse, RecognitionError> {
        assert!(!request.image_base64.is_empty());
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match &self.reply {
            Ok(text) => Ok(RecognitionResponse { text: text.clone() }),
            Err(message) => Err(RecognitionError::Api {
                status: 503,
                message: message.clone(),
            }),
        }
    }
}

/// Sink that keeps every offered artifact in memory.
#[derive(Default)]
pub struct MemorySink {
    offers: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemorySink {
    pub fn offers(&self) -> Vec<(String, Vec<u8>)> {
        self.offers.lock().unwrap().clone()
    }
}

impl ExportSink for MemorySink {
    fn offer(&self, name: &str, bytes: Vec<u8>) {
        self.offers.lock().unwrap().push((name.to_string(), bytes));
    }
}
