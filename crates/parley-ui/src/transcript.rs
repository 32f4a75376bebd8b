//! Chat transcript and submit flow.
//!
//! Each submit is its own exchange: the user's message is appended right away,
//! the query goes out, and the reply is appended when it arrives. Exchanges
//! are independent, so replies land in the order they resolve. A failed
//! request appends nothing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use parley_core::types::{Message, Sender};

use crate::transport::ChatTransport;

/// Owns the ordered transcript and the current sender.
pub struct ChatController {
    transport: Arc<dyn ChatTransport>,
    transcript: Mutex<Vec<Message>>,
    sender: Mutex<Sender>,
    pending: AtomicUsize,
}

/// Counts an exchange as pending for as long as it lives.
struct PendingGuard<'a>(&'a AtomicUsize);

impl<'a> PendingGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ChatController {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            transport,
            transcript: Mutex::new(Vec::new()),
            sender: Mutex::new(Sender::default()),
            pending: AtomicUsize::new(0),
        }
    }

    /// Snapshot of the transcript, oldest first.
    pub fn messages(&self) -> Vec<Message> {
        self.transcript
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.transcript.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while at least one exchange awaits its reply.
    pub fn is_awaiting(&self) -> bool {
        self.pending() > 0
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn sender(&self) -> Sender {
        self.sender.lock().map(|s| *s).unwrap_or_default()
    }

    /// Who new messages are submitted as; replies come from the other side.
    pub fn set_sender(&self, sender: Sender) {
        if let Ok(mut current) = self.sender.lock() {
            *current = sender;
        }
    }

    /// Submit `input` and wait for the reply.
    ///
    /// Blank input is ignored. Returns the appended reply, or `None` when
    /// nothing was sent or the request failed.
    pub async fn submit(&self, input: &str) -> Option<Message> {
        if input.trim().is_empty() {
            return None;
        }

        let sender = self.sender();
        self.push(Message::new(input, sender));

        let result = {
            let _pending = PendingGuard::new(&self.pending);
            self.transport.send(input).await
        };

        match result {
            Ok(content) => {
                let reply = Message::new(content, sender.opposite());
                self.push(reply.clone());
                Some(reply)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Chat request failed; no reply appended");
                None
            }
        }
    }

    fn push(&self, message: Message) {
        if let Ok(mut transcript) = self.transcript.lock() {
            transcript.push(message);
        }
    }
}
