//! Scripted in-memory link for driver and hub tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::ConnectionError;
use crate::protocol::{BM6_NOTIFY_CHARACTERISTIC, BM6_SERVICE, BM6_WRITE_CHARACTERISTIC};
use crate::transport::{BleLink, Characteristic, CharacteristicHandle, LinkEvent};

pub(crate) const WRITE_HANDLE: CharacteristicHandle = 0x0010;
pub(crate) const NOTIFY_HANDLE: CharacteristicHandle = 0x0011;

/// A call the driver made on the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Connect,
    Discover,
    Write(CharacteristicHandle, Bytes),
    Subscribe(CharacteristicHandle),
    Disconnect,
}

#[derive(Debug)]
pub(crate) struct Script {
    /// Results handed out by `connect`, front first; `Ok` once exhausted.
    pub connect_results: VecDeque<Result<(), ConnectionError>>,
    /// `connect` never resolves while set.
    pub hang_connect: bool,
    /// `connect` panics while set.
    pub panic_connect: bool,
    /// `discover` never resolves while set.
    pub hang_discover: bool,
    /// `subscribe` never resolves while set.
    pub hang_subscribe: bool,
    /// Characteristics returned by `discover`.
    pub characteristics: Vec<Characteristic>,
    pub calls: Vec<Call>,
    tx: Option<mpsc::Sender<LinkEvent>>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            connect_results: VecDeque::new(),
            hang_connect: false,
            panic_connect: false,
            hang_discover: false,
            hang_subscribe: false,
            characteristics: bm6_characteristics(),
            calls: Vec::new(),
            tx: None,
        }
    }
}

pub(crate) fn bm6_characteristics() -> Vec<Characteristic> {
    vec![
        Characteristic {
            service: BM6_SERVICE,
            uuid: BM6_WRITE_CHARACTERISTIC,
            handle: WRITE_HANDLE,
        },
        Characteristic {
            service: BM6_SERVICE,
            uuid: BM6_NOTIFY_CHARACTERISTIC,
            handle: NOTIFY_HANDLE,
        },
    ]
}

/// Test-side view of a [`FakeLink`].
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeLinkHandle {
    script: Arc<Mutex<Script>>,
}

impl FakeLinkHandle {
    pub fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script().calls.clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.script().calls.iter().filter(|c| *c == call).count()
    }

    /// Pushes an event as if it came from the BLE stack.
    pub async fn send(&self, event: LinkEvent) {
        let tx = self.script().tx.clone().expect("event sender not set");
        tx.send(event).await.unwrap();
    }
}

/// In-memory [`BleLink`] driven by a shared [`Script`].
#[derive(Debug)]
pub(crate) struct FakeLink {
    script: Arc<Mutex<Script>>,
    connected: bool,
}

impl FakeLink {
    pub fn new() -> (Self, FakeLinkHandle) {
        let handle = FakeLinkHandle::default();
        let link = Self {
            script: Arc::clone(&handle.script),
            connected: false,
        };
        (link, handle)
    }

    fn record(&self, call: Call) {
        self.script.lock().unwrap().calls.push(call);
    }
}

impl BleLink for FakeLink {
    fn set_event_sender(&mut self, tx: mpsc::Sender<LinkEvent>) {
        self.script.lock().unwrap().tx = Some(tx);
    }

    fn connect(&mut self) -> BoxFuture<'_, Result<(), ConnectionError>> {
        Box::pin(async move {
            self.record(Call::Connect);
            let (hang, panic, result) = {
                let mut script = self.script.lock().unwrap();
                (
                    script.hang_connect,
                    script.panic_connect,
                    script.connect_results.pop_front().unwrap_or(Ok(())),
                )
            };
            assert!(!panic, "scripted connect panic");
            if hang {
                futures::future::pending::<()>().await;
            }
            self.connected = result.is_ok();
            result
        })
    }

    fn discover(&mut self) -> BoxFuture<'_, Result<Vec<Characteristic>, ConnectionError>> {
        Box::pin(async move {
            self.record(Call::Discover);
            let (hang, characteristics) = {
                let script = self.script.lock().unwrap();
                (script.hang_discover, script.characteristics.clone())
            };
            if hang {
                futures::future::pending::<()>().await;
            }
            Ok(characteristics)
        })
    }

    fn write(
        &mut self,
        handle: CharacteristicHandle,
        data: Bytes,
    ) -> BoxFuture<'_, Result<(), ConnectionError>> {
        Box::pin(async move {
            self.record(Call::Write(handle, data));
            Ok(())
        })
    }

    fn subscribe(
        &mut self,
        handle: CharacteristicHandle,
    ) -> BoxFuture<'_, Result<(), ConnectionError>> {
        Box::pin(async move {
            self.record(Call::Subscribe(handle));
            let hang = self.script.lock().unwrap().hang_subscribe;
            if hang {
                futures::future::pending::<()>().await;
            }
            Ok(())
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<(), ConnectionError>> {
        Box::pin(async move {
            self.record(Call::Disconnect);
            self.connected = false;
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
