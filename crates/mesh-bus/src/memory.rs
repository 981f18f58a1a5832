//! # In-Memory Transport
//!
//! Single-process transport backed by one bounded `tokio::sync::mpsc` channel
//! per endpoint. Distributed deployments would put a networked `Transport`
//! behind the same trait.

use crate::transport::{Mailbox, Routes, Transport, TransportError};
use crate::DEFAULT_MAILBOX_CAPACITY;
use async_trait::async_trait;
use mesh_types::BusMessage;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// In-memory implementation of the transport.
pub struct InMemoryTransport {
    /// Live endpoint routes.
    routes: Routes,

    /// Generation counter distinguishing re-registrations.
    next_generation: AtomicU64,

    /// Total messages delivered.
    messages_sent: AtomicU64,

    /// Mailbox capacity.
    capacity: usize,
}

impl InMemoryTransport {
    /// Create a transport with default mailbox capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAILBOX_CAPACITY)
    }

    /// Create a transport with the given mailbox capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            routes: Arc::new(RwLock::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
            messages_sent: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    /// Whether `endpoint` currently has a mailbox.
    #[must_use]
    pub fn is_registered(&self, endpoint: &str) -> bool {
        self.routes.read().contains_key(endpoint)
    }

    /// Number of registered endpoints.
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.routes.read().len()
    }

    /// Mailbox capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, endpoint: &str, message: BusMessage) -> Result<(), TransportError> {
        // Never hold the route lock across the await.
        let sender = self
            .routes
            .read()
            .get(endpoint)
            .map(|(_, sender)| sender.clone());

        let Some(sender) = sender else {
            warn!(endpoint = endpoint, kind = message.kind(), "Message dropped (no mailbox)");
            return Err(TransportError::UnknownEndpoint(endpoint.to_string()));
        };

        let kind = message.kind();
        sender
            .send(message)
            .await
            .map_err(|_| TransportError::EndpointClosed(endpoint.to_string()))?;

        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        debug!(endpoint = endpoint, kind = kind, "Message delivered");
        Ok(())
    }

    fn register(&self, endpoint: &str) -> Result<Mailbox, TransportError> {
        let mut routes = self.routes.write();
        if routes.contains_key(endpoint) {
            return Err(TransportError::AlreadyRegistered(endpoint.to_string()));
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        routes.insert(endpoint.to_string(), (generation, tx));

        debug!(endpoint = endpoint, "Mailbox registered");
        Ok(Mailbox::new(
            endpoint.to_string(),
            rx,
            self.routes.clone(),
            generation,
        ))
    }

    fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }
}
