//! Registry of subscribed UI surfaces and best-effort push delivery.
//!
//! Each subscribed surface is represented by a [`SurfaceHandle`], the
//! sending half of a channel drained by that surface's connection task.
//! A send that fails means the connection is gone: the handle is dropped and
//! the failure is reported back as liveness evidence, never as an error.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Duration};

use crate::types::{PushEvent, SurfaceId};

use super::liveness::ProbeOutcome;

/// Message delivered to a surface connection task.
#[derive(Debug)]
pub enum SurfaceMessage {
    /// Forward an event to the surface
    Push(PushEvent),
    /// Heartbeat probe; completes the sender when the surface answers
    Ping(oneshot::Sender<()>),
}

/// Sending side of a surface's push stream.
#[derive(Debug, Clone)]
pub struct SurfaceHandle {
    id: SurfaceId,
    tx: mpsc::UnboundedSender<SurfaceMessage>,
}

impl SurfaceHandle {
    /// Creates a handle and the receiver its connection task drains.
    pub fn new(id: SurfaceId) -> (Self, mpsc::UnboundedReceiver<SurfaceMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id, tx }, rx)
    }

    /// Returns the surface identifier.
    pub fn id(&self) -> &SurfaceId {
        &self.id
    }

    /// Returns true if the connection task has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, message: SurfaceMessage) -> bool {
        self.tx.send(message).is_ok()
    }
}

/// Set of subscribed surfaces.
#[derive(Debug, Default)]
pub struct SurfaceRegistry {
    subscribers: HashMap<SurfaceId, SurfaceHandle>,
}

impl SurfaceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber, replacing an older stream for the same surface.
    pub fn register(&mut self, handle: SurfaceHandle) -> Option<SurfaceHandle> {
        self.subscribers.insert(handle.id.clone(), handle)
    }

    /// Removes a subscriber. Returns true if it was registered.
    pub fn unregister(&mut self, id: &SurfaceId) -> bool {
        self.subscribers.remove(id).is_some()
    }

    /// Removes `id` only if its registered stream is closed.
    ///
    /// A surface that re-subscribed keeps its new stream when the old
    /// connection's close event arrives late.
    pub fn unregister_closed(&mut self, id: &SurfaceId) -> bool {
        match self.subscribers.get(id) {
            Some(handle) if handle.is_closed() => self.unregister(id),
            _ => false,
        }
    }

    /// Returns true if `id` has a push stream.
    pub fn contains(&self, id: &SurfaceId) -> bool {
        self.subscribers.contains_key(id)
    }

    /// Number of subscribers.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Returns true if no surface is subscribed.
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Pushes `event` to every subscriber.
    ///
    /// Returns the surfaces whose delivery failed; they are removed.
    pub fn broadcast(&mut self, event: &PushEvent) -> Vec<SurfaceId> {
        let failed: Vec<SurfaceId> = self
            .subscribers
            .values()
            .filter(|handle| !handle.send(SurfaceMessage::Push(event.clone())))
            .map(|handle| handle.id.clone())
            .collect();

        for id in &failed {
            tracing::debug!(surface = %id, "push delivery failed; dropping subscriber");
            self.subscribers.remove(id);
        }
        failed
    }

    /// Pushes `event` to one surface. Returns false if delivery failed.
    pub fn send_to(&mut self, id: &SurfaceId, event: PushEvent) -> bool {
        let delivered = self
            .subscribers
            .get(id)
            .is_some_and(|handle| handle.send(SurfaceMessage::Push(event)));
        if !delivered {
            self.subscribers.remove(id);
        }
        delivered
    }

    /// Sends a heartbeat ping to `id`.
    ///
    /// On success returns the receiver completed by the surface's answer.
    pub fn probe(&mut self, id: &SurfaceId) -> Result<oneshot::Receiver<()>, ProbeOutcome> {
        let Some(handle) = self.subscribers.get(id) else {
            return Err(ProbeOutcome::NoListener);
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        if handle.send(SurfaceMessage::Ping(ack_tx)) {
            Ok(ack_rx)
        } else {
            self.subscribers.remove(id);
            Err(ProbeOutcome::Unanswered)
        }
    }
}

/// Waits for a probe answer until `deadline`.
pub async fn await_ack(ack: oneshot::Receiver<()>, deadline: Duration) -> ProbeOutcome {
    match timeout(deadline, ack).await {
        Ok(Ok(())) => ProbeOutcome::Acknowledged,
        Ok(Err(_)) | Err(_) => ProbeOutcome::Unanswered,
    }
}
