//! # Transport
//!
//! The abstract send/receive interface every agent uses to reach another.

use async_trait::async_trait;
use mesh_types::BusMessage;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Errors from transport operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Nobody is listening on the endpoint.
    #[error("No mailbox registered for endpoint {0}")]
    UnknownEndpoint(String),

    /// The endpoint's mailbox was dropped while sending.
    #[error("Mailbox for endpoint {0} is closed")]
    EndpointClosed(String),

    /// The endpoint already has a live mailbox.
    #[error("Endpoint {0} is already registered")]
    AlreadyRegistered(String),

    /// Delivery failed for another reason (networked transports).
    #[error("Delivery to {endpoint} failed: {reason}")]
    Delivery { endpoint: String, reason: String },
}

/// Trait for delivering messages between agent endpoints.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `message` to `endpoint`.
    ///
    /// Suspends while the endpoint's mailbox is full.
    async fn send(&self, endpoint: &str, message: BusMessage) -> Result<(), TransportError>;

    /// Open the mailbox for `endpoint`.
    fn register(&self, endpoint: &str) -> Result<Mailbox, TransportError>;

    /// Total messages accepted for delivery.
    fn messages_sent(&self) -> u64;
}

/// Live routes: endpoint -> (generation, sender).
pub(crate) type Routes = Arc<RwLock<HashMap<String, (u64, mpsc::Sender<BusMessage>)>>>;

/// Receiving side of an endpoint.
///
/// When dropped, the endpoint is unregistered.
pub struct Mailbox {
    endpoint: String,
    receiver: mpsc::Receiver<BusMessage>,
    routes: Routes,
    generation: u64,
}

impl Mailbox {
    pub(crate) fn new(
        endpoint: String,
        receiver: mpsc::Receiver<BusMessage>,
        routes: Routes,
        generation: u64,
    ) -> Self {
        Self {
            endpoint,
            receiver,
            routes,
            generation,
        }
    }

    /// Endpoint this mailbox serves.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Receive the next message.
    ///
    /// Returns `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }

    /// Receive a message if one is already queued.
    pub fn try_recv(&mut self) -> Option<BusMessage> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        let mut routes = self.routes.write();
        // A newer mailbox may have replaced this one.
        if routes
            .get(&self.endpoint)
            .is_some_and(|(generation, _)| *generation == self.generation)
        {
            routes.remove(&self.endpoint);
            debug!(endpoint = %self.endpoint, "Mailbox closed");
        }
    }
}
