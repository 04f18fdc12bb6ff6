//! `btleplug` implementation of [`BleLink`].

use std::time::Duration;

use btleplug::api::{
    Central, Characteristic as GattCharacteristic, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Peripheral};
use bytes::Bytes;
use futures::StreamExt;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{BleLink, Characteristic, CharacteristicHandle, LinkEvent};
use crate::error::ConnectionError;

/// Interval between peripheral list polls while scanning.
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// [`BleLink`] over a `btleplug` peripheral.
///
/// Handles are indexes into the characteristic list from the last
/// discovery. Notifications are forwarded by a background task; when the
/// notification stream ends the link reports [`LinkEvent::Disconnected`].
pub struct BtleplugLink {
    peripheral: Peripheral,
    characteristics: Vec<GattCharacteristic>,
    events: Option<mpsc::Sender<LinkEvent>>,
    forwarder: Option<JoinHandle<()>>,
    connected: bool,
}

impl BtleplugLink {
    /// Wraps a peripheral found by scanning.
    #[must_use]
    pub const fn new(peripheral: Peripheral) -> Self {
        Self {
            peripheral,
            characteristics: Vec::new(),
            events: None,
            forwarder: None,
            connected: false,
        }
    }

    /// Returns the wrapped peripheral.
    #[must_use]
    pub const fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    fn characteristic(
        &self,
        handle: CharacteristicHandle,
    ) -> Result<&GattCharacteristic, ConnectionError> {
        if !self.connected {
            return Err(ConnectionError::NotConnected);
        }
        self.characteristics
            .get(usize::from(handle))
            .ok_or_else(|| ConnectionError::link(format!("unknown characteristic handle {handle}")))
    }

    fn stop_forwarder(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

impl BleLink for BtleplugLink {
    fn set_event_sender(&mut self, tx: mpsc::Sender<LinkEvent>) {
        self.events = Some(tx);
    }

    fn connect(&mut self) -> BoxFuture<'_, Result<(), ConnectionError>> {
        Box::pin(async move {
            tracing::debug!("connecting to {}", self.peripheral.address());
            self.peripheral
                .connect()
                .await
                .map_err(ConnectionError::link)?;
            self.connected = true;
            Ok(())
        })
    }

    fn discover(&mut self) -> BoxFuture<'_, Result<Vec<Characteristic>, ConnectionError>> {
        Box::pin(async move {
            self.peripheral
                .discover_services()
                .await
                .map_err(ConnectionError::link)?;
            self.characteristics = self.peripheral.characteristics().into_iter().collect();

            Ok((0..=CharacteristicHandle::MAX)
                .zip(&self.characteristics)
                .map(|(handle, c)| Characteristic {
                    service: c.service_uuid,
                    uuid: c.uuid,
                    handle,
                })
                .collect())
        })
    }

    fn write(
        &mut self,
        handle: CharacteristicHandle,
        data: Bytes,
    ) -> BoxFuture<'_, Result<(), ConnectionError>> {
        Box::pin(async move {
            let characteristic = self.characteristic(handle)?;
            self.peripheral
                .write(characteristic, &data, WriteType::WithResponse)
                .await
                .map_err(ConnectionError::link)
        })
    }

    fn subscribe(
        &mut self,
        handle: CharacteristicHandle,
    ) -> BoxFuture<'_, Result<(), ConnectionError>> {
        Box::pin(async move {
            let tx = self.events.clone().ok_or(ConnectionError::Closed)?;
            let characteristic = self.characteristic(handle)?.clone();

            let mut notifications = self
                .peripheral
                .notifications()
                .await
                .map_err(ConnectionError::link)?;
            self.peripheral
                .subscribe(&characteristic)
                .await
                .map_err(ConnectionError::link)?;

            self.stop_forwarder();
            let uuid = characteristic.uuid;
            self.forwarder = Some(tokio::spawn(async move {
                while let Some(notification) = notifications.next().await {
                    if notification.uuid != uuid {
                        continue;
                    }
                    let event = LinkEvent::Notification(Bytes::from(notification.value));
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                tracing::debug!("notification stream ended");
                let _ = tx.send(LinkEvent::Disconnected).await;
            }));
            Ok(())
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<(), ConnectionError>> {
        Box::pin(async move {
            self.stop_forwarder();
            self.connected = false;
            self.characteristics.clear();
            self.peripheral
                .disconnect()
                .await
                .map_err(ConnectionError::link)
        })
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

impl Drop for BtleplugLink {
    fn drop(&mut self) {
        self.stop_forwarder();
    }
}

/// Scans for a peripheral whose address or advertised name equals `target`.
///
/// Address comparison ignores case.
///
/// # Errors
///
/// Returns [`ConnectionError::Timeout`] if nothing matches in time, or
/// [`ConnectionError::Link`] if the adapter fails.
pub async fn find_peripheral(
    adapter: &Adapter,
    target: &str,
    timeout: Duration,
) -> Result<Peripheral, ConnectionError> {
    adapter
        .start_scan(ScanFilter::default())
        .await
        .map_err(ConnectionError::link)?;

    let found = tokio::time::timeout(timeout, poll_peripherals(adapter, target)).await;

    if let Err(e) = adapter.stop_scan().await {
        tracing::warn!("failed to stop scan: {}", e);
    }

    match found {
        Ok(result) => result,
        Err(_) => Err(ConnectionError::Timeout {
            operation: "scan",
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

async fn poll_peripherals(adapter: &Adapter, target: &str) -> Result<Peripheral, ConnectionError> {
    loop {
        for peripheral in adapter.peripherals().await.map_err(ConnectionError::link)? {
            if matches_target(&peripheral, target).await {
                tracing::info!("found {} at {}", target, peripheral.address());
                return Ok(peripheral);
            }
        }
        tokio::time::sleep(SCAN_POLL_INTERVAL).await;
    }
}

async fn matches_target(peripheral: &Peripheral, target: &str) -> bool {
    if peripheral.address().to_string().eq_ignore_ascii_case(target) {
        return true;
    }
    matches!(
        peripheral.properties().await,
        Ok(Some(properties)) if properties.local_name.as_deref() == Some(target)
    )
}
