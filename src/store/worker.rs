//! Background persistence of the registry.
//!
//! A dedicated worker thread owns all document writes. Its queue has a
//! single slot with overwrite semantics: a burst of changes coalesces into
//! one write of the last committed state. Write failures are logged and
//! never surfaced; the in-memory registry stays authoritative and the next
//! successful write catches up.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use tracing::error;

use crate::store::codec::StateCodec;
use crate::store::registry::OverlayMap;

struct Slot {
    pending: Option<OverlayMap>,
    shutdown: bool,
}

pub struct PersistWorker {
    slot: Arc<(Mutex<Slot>, Condvar)>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PersistWorker {
    pub fn spawn(codec: StateCodec) -> Self {
        let slot = Arc::new((
            Mutex::new(Slot {
                pending: None,
                shutdown: false,
            }),
            Condvar::new(),
        ));
        let worker_slot = Arc::clone(&slot);
        let thread = thread::Builder::new()
            .name("overlay-persist".to_string())
            .spawn(move || Self::run(codec, worker_slot))
            .expect("failed to spawn persistence worker");
        Self {
            slot,
            thread: Mutex::new(Some(thread)),
        }
    }

    /// Queue a snapshot for writing, replacing any snapshot still waiting
    /// in the slot. After shutdown the request is dropped.
    pub fn request(&self, snapshot: OverlayMap) {
        let (lock, cvar) = &*self.slot;
        let mut slot = lock.lock().expect("persist queue poisoned");
        if slot.shutdown {
            return;
        }
        slot.pending = Some(snapshot);
        cvar.notify_one();
    }

    /// Flush the pending write, if any, and stop the worker.
    pub fn shutdown(&self) {
        {
            let (lock, cvar) = &*self.slot;
            let mut slot = lock.lock().expect("persist queue poisoned");
            slot.shutdown = true;
            cvar.notify_one();
        }
        let thread = self.thread.lock().expect("persist worker poisoned").take();
        if let Some(thread) = thread {
            let _ = thread.join();
        }
    }

    fn run(codec: StateCodec, slot: Arc<(Mutex<Slot>, Condvar)>) {
        let (lock, cvar) = &*slot;
        loop {
            let pending = {
                let mut guard = lock.lock().expect("persist queue poisoned");
                while guard.pending.is_none() && !guard.shutdown {
                    guard = cvar.wait(guard).expect("persist queue poisoned");
                }
                if guard.pending.is_none() {
                    return;
                }
                guard.pending.take()
            };
            if let Some(snapshot) = pending {
                if let Err(err) = codec.save(&snapshot) {
                    error!(path = %codec.path().display(), %err, "failed to persist overlay state");
                }
            }
        }
    }
}

impl Drop for PersistWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
