//! WinRT transport backend
//!
//! Wraps the Windows Bluetooth LE APIs behind [`BleTransport`]. Advertisement,
//! value-changed and connection-status callbacks arrive on WinRT worker
//! threads and are forwarded into tokio channels.

use crate::domain::models::{Advertisement, DeviceIdentity};
use crate::infrastructure::bluetooth::error::TransportError;
use crate::infrastructure::bluetooth::transport::{BleTransport, TransportEvent};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use windows::core::GUID;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattClientCharacteristicConfigurationDescriptorValue,
    GattCommunicationStatus, GattSession, GattValueChangedEventArgs, GattWriteOption,
};
use windows::Devices::Bluetooth::{
    BluetoothCacheMode, BluetoothConnectionStatus, BluetoothLEDevice,
};
use windows::Devices::Enumeration::DevicePairingResultStatus;
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter, IBuffer};

const SCAN_QUEUE_CAPACITY: usize = 64;

pub struct WinRtTransport {
    watcher: Option<BluetoothLEAdvertisementWatcher>,
    device: Option<BluetoothLEDevice>,
    gatt_session: Option<GattSession>,
    characteristics: HashMap<Uuid, GattCharacteristic>,
    value_tokens: HashMap<Uuid, i64>,
    status_token: Option<i64>,
    events_tx: mpsc::Sender<TransportEvent>,
    events_rx: Option<mpsc::Receiver<TransportEvent>>,
}

impl WinRtTransport {
    pub fn new(queue_capacity: usize) -> Self {
        let (events_tx, events_rx) = mpsc::channel(queue_capacity.max(1));
        Self {
            watcher: None,
            device: None,
            gatt_session: None,
            characteristics: HashMap::new(),
            value_tokens: HashMap::new(),
            status_token: None,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    fn characteristic(&self, uuid: Uuid) -> Result<GattCharacteristic, TransportError> {
        if self.device.is_none() {
            return Err(TransportError::NotConnected);
        }
        self.characteristics
            .get(&uuid)
            .cloned()
            .ok_or(TransportError::CharacteristicNotFound(uuid))
    }

    /// Index every characteristic of every primary service by UUID
    async fn discover_characteristics(
        device: &BluetoothLEDevice,
    ) -> Result<HashMap<Uuid, GattCharacteristic>, TransportError> {
        let services_result = device
            .GetGattServicesWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;
        if services_result.Status()? != GattCommunicationStatus::Success {
            return Err(TransportError::Rejected(format!(
                "GATT service discovery returned {:?}",
                services_result.Status()?
            )));
        }

        let services = services_result.Services()?;
        let mut found = HashMap::new();
        for i in 0..services.Size()? {
            let service = services.GetAt(i)?;
            let chars_result = service.GetCharacteristicsAsync()?.await?;
            if chars_result.Status()? != GattCommunicationStatus::Success {
                warn!(
                    "Characteristic discovery failed for service {:?}",
                    service.Uuid()?
                );
                continue;
            }
            let characteristics = chars_result.Characteristics()?;
            for j in 0..characteristics.Size()? {
                let characteristic = characteristics.GetAt(j)?;
                found.insert(to_uuid(characteristic.Uuid()?), characteristic);
            }
        }
        info!("Found {} characteristics", found.len());
        Ok(found)
    }

    async fn write_cccd(
        characteristic: &GattCharacteristic,
        value: GattClientCharacteristicConfigurationDescriptorValue,
    ) -> Result<(), TransportError> {
        let status = characteristic
            .WriteClientCharacteristicConfigurationDescriptorAsync(value)?
            .await?;
        if status != GattCommunicationStatus::Success {
            return Err(TransportError::Rejected(format!(
                "CCCD write returned {:?}",
                status
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl BleTransport for WinRtTransport {
    async fn start_scan(&mut self) -> Result<mpsc::Receiver<Advertisement>, TransportError> {
        self.stop_scan().await?;

        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        watcher.SetScanningMode(BluetoothLEScanningMode::Active)?;

        let (tx, rx) = mpsc::channel(SCAN_QUEUE_CAPACITY);
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let name = args.Advertisement()?.LocalName()?.to_string();
                    let _ = tx.try_send(Advertisement {
                        address: args.BluetoothAddress()?,
                        name: (!name.is_empty()).then_some(name),
                        signal_strength: args.RawSignalStrengthInDBm()?,
                    });
                }
                Ok(())
            },
        );

        watcher.Received(&handler)?;
        watcher.Start()?;
        self.watcher = Some(watcher);
        debug!("Advertisement watcher started");
        Ok(rx)
    }

    async fn stop_scan(&mut self) -> Result<(), TransportError> {
        if let Some(watcher) = self.watcher.take() {
            debug!("Stopping advertisement watcher");
            watcher.Stop()?;
        }
        Ok(())
    }

    async fn connect(
        &mut self,
        device: &DeviceIdentity,
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        let ble_device = BluetoothLEDevice::FromBluetoothAddressAsync(device.address)?.await?;
        info!("Device object acquired: {:?}", ble_device.Name()?);

        // Keep the link up while we hold the session
        let gatt_session =
            GattSession::FromDeviceIdAsync(&ble_device.BluetoothDeviceId()?)?.await?;
        gatt_session.SetMaintainConnection(true)?;

        let characteristics = Self::discover_characteristics(&ble_device).await?;

        let tx = self.events_tx.clone();
        let status_token = ble_device.ConnectionStatusChanged(&TypedEventHandler::new(
            move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
                if let Some(dev) = dev.as_ref() {
                    if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                        let _ = tx.blocking_send(TransportEvent::Disconnected);
                    }
                }
                Ok(())
            },
        ))?;

        self.status_token = Some(status_token);
        self.characteristics = characteristics;
        self.gatt_session = Some(gatt_session);
        self.device = Some(ble_device);
        Ok(())
    }

    async fn request_mtu(&mut self, mtu: u16) -> Result<u16, TransportError> {
        // Windows negotiates the MTU itself; report what it settled on
        let session = self
            .gatt_session
            .as_ref()
            .ok_or(TransportError::NotConnected)?;
        let negotiated = session.MaxPduSize()?;
        debug!("Requested MTU {}, link MTU {}", mtu, negotiated);
        Ok(negotiated)
    }

    async fn pair(&mut self) -> Result<(), TransportError> {
        let device = self.device.as_ref().ok_or(TransportError::NotConnected)?;
        let pairing = device.DeviceInformation()?.Pairing()?;

        if pairing.IsPaired()? {
            return Err(TransportError::AlreadyPaired);
        }
        if !pairing.CanPair()? {
            return Err(TransportError::Rejected(
                "device does not accept pairing".to_string(),
            ));
        }

        let result = pairing.PairAsync()?.await?;
        match result.Status()? {
            DevicePairingResultStatus::Paired => Ok(()),
            DevicePairingResultStatus::AlreadyPaired => Err(TransportError::AlreadyPaired),
            other => Err(TransportError::Rejected(format!(
                "pairing returned {:?}",
                other
            ))),
        }
    }

    async fn subscribe(&mut self, characteristic: Uuid) -> Result<(), TransportError> {
        let gatt_char = self.characteristic(characteristic)?;
        Self::write_cccd(
            &gatt_char,
            GattClientCharacteristicConfigurationDescriptorValue::Notify,
        )
        .await?;

        let tx = self.events_tx.clone();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<GattCharacteristic>,
                  args: windows::core::Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let value = read_buffer(&args.CharacteristicValue()?)?;
                    // WinRT worker thread: blocking keeps every frame, in order
                    let _ = tx.blocking_send(TransportEvent::Notification {
                        characteristic,
                        value,
                    });
                }
                Ok(())
            },
        );
        let token = gatt_char.ValueChanged(&handler)?;
        self.value_tokens.insert(characteristic, token);
        Ok(())
    }

    async fn unsubscribe(&mut self, characteristic: Uuid) -> Result<(), TransportError> {
        let gatt_char = self.characteristic(characteristic)?;
        if let Some(token) = self.value_tokens.remove(&characteristic) {
            gatt_char.RemoveValueChanged(token)?;
        }
        Self::write_cccd(
            &gatt_char,
            GattClientCharacteristicConfigurationDescriptorValue::None,
        )
        .await
    }

    async fn write(&mut self, characteristic: Uuid, value: &[u8]) -> Result<(), TransportError> {
        let gatt_char = self.characteristic(characteristic)?;
        let buffer = to_buffer(value)?;
        let status = gatt_char
            .WriteValueWithOptionAsync(&buffer, GattWriteOption::WriteWithResponse)?
            .await?;
        if status != GattCommunicationStatus::Success {
            return Err(TransportError::Rejected(format!(
                "write returned {:?}",
                status
            )));
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        for (uuid, token) in self.value_tokens.drain() {
            if let Some(gatt_char) = self.characteristics.get(&uuid) {
                let _ = gatt_char.RemoveValueChanged(token);
            }
        }
        self.characteristics.clear();

        if let (Some(device), Some(token)) = (self.device.as_ref(), self.status_token.take()) {
            let _ = device.RemoveConnectionStatusChanged(token);
        }
        if let Some(session) = self.gatt_session.take() {
            session.Close()?;
        }
        if let Some(device) = self.device.take() {
            device.Close()?;
        }
        info!("Disconnected from device");
        Ok(())
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events_rx.take()
    }

    fn is_connected(&self) -> bool {
        self.device
            .as_ref()
            .and_then(|d| d.ConnectionStatus().ok())
            .map(|s| s == BluetoothConnectionStatus::Connected)
            .unwrap_or(false)
    }
}

impl Drop for WinRtTransport {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            let _ = watcher.Stop();
        }
    }
}

fn to_uuid(guid: GUID) -> Uuid {
    Uuid::from_u128(guid.to_u128())
}

fn read_buffer(buffer: &IBuffer) -> windows::core::Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(buffer)?;
    let length = reader.UnconsumedBufferLength()? as usize;
    let mut bytes = vec![0u8; length];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}

fn to_buffer(value: &[u8]) -> windows::core::Result<IBuffer> {
    let writer = DataWriter::new()?;
    writer.WriteBytes(value)?;
    writer.DetachBuffer()
}
