//! Worker mailbox: FIFO structural messages plus a single latest-search slot
use crate::cancel::CancellationToken;
use crate::host::{ProjectHierarchy, ProjectId};
use crossbeam_channel::{bounded, unbounded, Receiver, Select, Sender};
use log::debug;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub(crate) enum Message {
    ProjectLoaded {
        project: Arc<dyn ProjectHierarchy>,
        seq: u64,
    },
    ProjectUnloaded(ProjectId),
    ScanDocument,
    Stop,
    Search {
        text: String,
        cancel: CancellationToken,
    },
}

#[derive(Default)]
struct PendingSearch {
    text: Option<String>,
    running: Option<CancellationToken>,
}

/// Structural messages are always handed out before the pending search,
/// and only the newest search text is ever kept.
pub(crate) struct Mailbox {
    tx: Sender<Message>,
    rx: Receiver<Message>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    search: Mutex<PendingSearch>,
    next_seq: AtomicU64,
    purge_before: AtomicU64,
    active_load: Mutex<Option<CancellationToken>>,
}

impl Mailbox {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            tx,
            rx,
            wake_tx,
            wake_rx,
            search: Mutex::new(PendingSearch::default()),
            next_seq: AtomicU64::new(0),
            purge_before: AtomicU64::new(0),
            active_load: Mutex::new(None),
        }
    }

    fn post(&self, message: Message) {
        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.tx.send(message);
    }

    pub fn post_project_loaded(&self, project: Arc<dyn ProjectHierarchy>) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.post(Message::ProjectLoaded { project, seq });
    }

    pub fn post_project_unloaded(&self, id: ProjectId) {
        self.post(Message::ProjectUnloaded(id));
    }

    pub fn post_scan_document(&self) {
        self.post(Message::ScanDocument);
    }

    pub fn post_stop(&self) {
        self.post(Message::Stop);
    }

    /// Replace the pending search and interrupt the running one.
    pub fn set_search(&self, text: String) {
        {
            let mut search = self.search.lock();
            search.text = Some(text);
            if let Some(running) = &search.running {
                running.cancel();
            }
        }
        // A full wake channel already guarantees the worker wakes up.
        let _ = self.wake_tx.try_send(());
    }

    /// Drop the pending search and interrupt the running one.
    pub fn cancel_search(&self) {
        let mut search = self.search.lock();
        search.text = None;
        if let Some(running) = &search.running {
            running.cancel();
        }
    }

    /// Search that was running has ended.
    pub fn finish_search(&self) {
        self.search.lock().running = None;
    }

    /// Every `ProjectLoaded` posted so far is dropped unprocessed and a scan in
    /// progress is aborted.
    pub fn purge_loads(&self) {
        let seq = self.next_seq.load(Ordering::SeqCst);
        self.purge_before.store(seq, Ordering::SeqCst);
        if let Some(load) = self.active_load.lock().as_ref() {
            load.cancel();
        }
    }

    /// Token for processing load `seq`, or `None` when it was purged.
    pub fn begin_load(&self, seq: u64, parent: &CancellationToken) -> Option<CancellationToken> {
        let mut active = self.active_load.lock();
        if seq < self.purge_before.load(Ordering::SeqCst) {
            debug!("Dropping purged project load #{seq}");
            return None;
        }
        let token = parent.child();
        *active = Some(token.clone());
        Some(token)
    }

    pub fn end_load(&self) {
        *self.active_load.lock() = None;
    }

    /// Next message without blocking. The running search token is derived
    /// from `parent` under the slot lock, so a concurrent `set_search` either
    /// sees and cancels it or leaves its text for the next call.
    pub fn try_next(&self, parent: &CancellationToken) -> Option<Message> {
        // Consume a pending wake-up; the slot itself is checked below.
        let _ = self.wake_rx.try_recv();
        if let Ok(message) = self.rx.try_recv() {
            return Some(message);
        }

        let mut search = self.search.lock();
        let text = search.text.take()?;
        let cancel = parent.child();
        search.running = Some(cancel.clone());
        Some(Message::Search { text, cancel })
    }

    /// Block until a structural message or a search wake-up is available,
    /// without consuming anything.
    pub fn wait_ready(&self) {
        let mut select = Select::new();
        select.recv(&self.rx);
        select.recv(&self.wake_rx);
        // Only readiness matters; the message is taken by `try_next`.
        let _ = select.ready();
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty() && self.search.lock().text.is_none()
    }

    pub fn has_pending_search(&self) -> bool {
        self.search.lock().text.is_some()
    }
}
