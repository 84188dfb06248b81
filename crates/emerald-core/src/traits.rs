//! Transport abstraction for advisor sessions.
//!
//! This module provides the [`GattTransport`] trait that abstracts over the
//! real Bluetooth stack and the mock transport used in tests.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Result;

/// The GATT operations a session needs from a link to one advisor.
///
/// A transport is bound to a single device address. All operations are
/// invoked sequentially from the session task.
///
/// # Example
///
/// ```ignore
/// use emerald_core::{GattTransport, Result};
/// use emerald_types::uuid::SERIAL_NUMBER;
///
/// async fn serial<T: GattTransport>(transport: &T) -> Result<Vec<u8>> {
///     transport.connect().await?;
///     transport.read(SERIAL_NUMBER).await
/// }
/// ```
#[async_trait]
pub trait GattTransport: Send + Sync {
    /// The device address this transport talks to.
    fn address(&self) -> &str;

    /// Drop any stale connection to this address left over from a previous run.
    ///
    /// Called before [`connect`](Self::connect). Failures are not fatal.
    async fn reset(&self) -> Result<()>;

    /// Establish the connection and discover services.
    async fn connect(&self) -> Result<()>;

    /// Read a characteristic value.
    async fn read(&self, uuid: Uuid) -> Result<Vec<u8>>;

    /// Write a value to a characteristic, waiting for the device's acknowledgment.
    async fn write(&self, uuid: Uuid, data: &[u8]) -> Result<()>;

    /// Subscribe to notifications on a characteristic.
    ///
    /// Each notification payload is delivered, in order, on the returned
    /// channel, which holds at most `buffer` undelivered payloads. The channel
    /// closes when the link goes away.
    async fn subscribe(&self, uuid: Uuid, buffer: usize) -> Result<mpsc::Receiver<Vec<u8>>>;

    /// Stop notifications on a characteristic.
    async fn unsubscribe(&self, uuid: Uuid) -> Result<()>;

    /// Close the connection.
    async fn disconnect(&self) -> Result<()>;
}

#[async_trait]
impl<T: GattTransport + ?Sized> GattTransport for Arc<T> {
    fn address(&self) -> &str {
        (**self).address()
    }

    async fn reset(&self) -> Result<()> {
        (**self).reset().await
    }

    async fn connect(&self) -> Result<()> {
        (**self).connect().await
    }

    async fn read(&self, uuid: Uuid) -> Result<Vec<u8>> {
        (**self).read(uuid).await
    }

    async fn write(&self, uuid: Uuid, data: &[u8]) -> Result<()> {
        (**self).write(uuid, data).await
    }

    async fn subscribe(&self, uuid: Uuid, buffer: usize) -> Result<mpsc::Receiver<Vec<u8>>> {
        (**self).subscribe(uuid, buffer).await
    }

    async fn unsubscribe(&self, uuid: Uuid) -> Result<()> {
        (**self).unsubscribe(uuid).await
    }

    async fn disconnect(&self) -> Result<()> {
        (**self).disconnect().await
    }
}
