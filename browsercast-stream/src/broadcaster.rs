//! Frame broadcaster - fans one frame producer out to many independent listeners
//!
//! Every listener owns a single-slot mailbox. Publishing overwrites whatever frame
//! the listener has not consumed yet, so a slow consumer only ever sees the most
//! recent frame and never holds back the producer or the other listeners.

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::types::ListenerId;

/// One compressed image as produced by the frame source
#[derive(Debug, Clone)]
pub struct Frame {
    data: Bytes,
    received_at: Instant,
}

impl Frame {
    #[must_use]
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            received_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    #[must_use]
    pub fn into_data(self) -> Bytes {
        self.data
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Time elapsed since the broadcaster accepted this frame
    #[must_use]
    pub fn age(&self) -> std::time::Duration {
        self.received_at.elapsed()
    }
}

/// Broadcaster statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BroadcasterStats {
    /// Currently registered listeners
    pub listeners: usize,
    /// Frames accepted from the producer
    pub frames_published: u64,
    /// Frames overwritten before their listener read them
    pub frames_dropped: u64,
}

/// Capacity-1 mailbox shared between the broadcaster and one listener
#[derive(Debug, Default)]
struct FrameSlot {
    frame: Mutex<Option<Frame>>,
    closed: AtomicBool,
    notify: Notify,
}

impl FrameSlot {
    /// Store `frame`, returning true when an unread frame was displaced.
    fn put(&self, frame: Frame) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let displaced = self.frame.lock().replace(frame).is_some();
        self.notify.notify_one();
        displaced
    }

    fn take(&self) -> Option<Frame> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.frame.lock().take()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.frame.lock().take();
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Frame broadcaster
pub struct Broadcaster {
    /// Registered listeners; the single lock for add/remove/snapshot
    listeners: Mutex<HashMap<ListenerId, Arc<FrameSlot>>>,
    next_id: AtomicU64,
    frames_published: AtomicU64,
    frames_dropped: AtomicU64,
}

impl Broadcaster {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            frames_published: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        })
    }

    /// Register a new listener.
    ///
    /// The returned [`Listener`] unregisters itself when dropped.
    #[must_use]
    pub fn register(self: &Arc<Self>) -> Listener {
        let id = ListenerId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let slot = Arc::new(FrameSlot::default());

        let total = {
            let mut listeners = self.listeners.lock();
            listeners.insert(id, Arc::clone(&slot));
            listeners.len()
        };

        debug!(listener_id = %id, total_listeners = total, "Listener registered");

        Listener {
            id,
            slot,
            broadcaster: Arc::downgrade(self),
        }
    }

    /// Remove a listener. Unknown or already removed ids are ignored.
    ///
    /// A read pending on the listener returns `None` right away.
    pub fn unregister(&self, id: ListenerId) {
        let removed = self.listeners.lock().remove(&id);
        if let Some(slot) = removed {
            slot.close();
            debug!(
                listener_id = %id,
                total_listeners = self.listener_count(),
                "Listener unregistered"
            );
        }
    }

    /// Hand a frame to every registered listener without waiting on any of them.
    ///
    /// Returns the number of listeners the frame was delivered to.
    pub fn publish(&self, data: Bytes) -> usize {
        let frame = Frame::new(data);
        let slots: Vec<Arc<FrameSlot>> = self.listeners.lock().values().cloned().collect();

        self.frames_published.fetch_add(1, Ordering::Relaxed);

        let mut dropped = 0u64;
        for slot in &slots {
            if slot.put(frame.clone()) {
                dropped += 1;
            }
        }
        if dropped > 0 {
            self.frames_dropped.fetch_add(dropped, Ordering::Relaxed);
        }

        trace!(
            frame_bytes = frame.len(),
            listeners = slots.len(),
            dropped,
            "Frame published"
        );

        slots.len()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    #[must_use]
    pub fn stats(&self) -> BroadcasterStats {
        BroadcasterStats {
            listeners: self.listener_count(),
            frames_published: self.frames_published.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Receiving end of one broadcaster registration
pub struct Listener {
    id: ListenerId,
    slot: Arc<FrameSlot>,
    broadcaster: Weak<Broadcaster>,
}

impl Listener {
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Wait for the next frame.
    ///
    /// Returns `None` once the listener has been unregistered.
    pub async fn recv(&self) -> Option<Frame> {
        loop {
            let notified = self.slot.notify.notified();
            if self.slot.is_closed() {
                return None;
            }
            if let Some(frame) = self.slot.take() {
                return Some(frame);
            }
            notified.await;
        }
    }

    /// Take the pending frame, if any, without waiting
    #[must_use]
    pub fn try_recv(&self) -> Option<Frame> {
        self.slot.take()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.slot.is_closed()
    }

    /// Remove this listener from its broadcaster. Safe to call repeatedly.
    pub fn unregister(&self) {
        match self.broadcaster.upgrade() {
            Some(broadcaster) => broadcaster.unregister(self.id),
            None => self.slot.close(),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.unregister();
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("closed", &self.slot.is_closed())
            .finish()
    }
}
