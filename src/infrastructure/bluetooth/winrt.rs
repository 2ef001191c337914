//! WinRT BLE Transport
//!
//! Implements the transport traits on top of the Windows Bluetooth LE APIs.

use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::{
    BleTransport, DisconnectNotifier, DisconnectSignal, GattLink, NotificationHandler,
    ServiceTable,
};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info};
use uuid::Uuid;
use windows::core::GUID;
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattClientCharacteristicConfigurationDescriptorValue,
    GattCommunicationStatus, GattValueChangedEventArgs, GattWriteOption,
};
use windows::Devices::Bluetooth::{BluetoothCacheMode, BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter};

fn to_uuid(guid: GUID) -> Uuid {
    Uuid::from_u128(guid.to_u128())
}

/// Transport backed by the system Bluetooth radio
#[derive(Debug, Default)]
pub struct WinRtTransport;

impl WinRtTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BleTransport for WinRtTransport {
    async fn dial(&self, address: &str) -> Result<Arc<dyn GattLink>> {
        let raw_address = protocol::parse_bluetooth_address(address)?;
        info!("Connecting to Bluetooth device: {:#X}", raw_address);

        let device = BluetoothLEDevice::FromBluetoothAddressAsync(raw_address)?.await?;
        info!("Device connected: {:?}", device.Name()?);

        let notifier = Arc::new(DisconnectNotifier::new());
        let status_notifier = Arc::clone(&notifier);
        let status_handler =
            TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
                if let Some(dev) = dev.as_ref() {
                    if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                        status_notifier.notify();
                    }
                }
                Ok(())
            });
        device.ConnectionStatusChanged(&status_handler)?;

        Ok(Arc::new(WinRtLink {
            device,
            notifier,
            characteristics: Mutex::new(HashMap::new()),
        }))
    }
}

struct WinRtLink {
    device: BluetoothLEDevice,
    notifier: Arc<DisconnectNotifier>,
    characteristics: Mutex<HashMap<Uuid, GattCharacteristic>>,
}

impl WinRtLink {
    fn characteristic(&self, uuid: Uuid) -> Result<GattCharacteristic> {
        self.characteristics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&uuid)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Characteristic {} not discovered", uuid))
    }
}

#[async_trait]
impl GattLink for WinRtLink {
    async fn discover_services(&self) -> Result<ServiceTable> {
        let services_result = self
            .device
            .GetGattServicesWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;
        if services_result.Status()? != GattCommunicationStatus::Success {
            error!(
                "Failed to get GATT services: {:?}",
                services_result.Status()?
            );
            anyhow::bail!("Failed to get GATT services");
        }

        let mut found = HashMap::new();
        let services = services_result.Services()?;
        for i in 0..services.Size()? {
            let service = services.GetAt(i)?;
            let chars_result = service
                .GetCharacteristicsWithCacheModeAsync(BluetoothCacheMode::Uncached)?
                .await?;
            if chars_result.Status()? != GattCommunicationStatus::Success {
                debug!("Skipping service {:?}: {:?}", service.Uuid()?, chars_result.Status()?);
                continue;
            }

            let characteristics = chars_result.Characteristics()?;
            for j in 0..characteristics.Size()? {
                let c = characteristics.GetAt(j)?;
                found.insert(to_uuid(c.Uuid()?), c);
            }
        }
        info!("Found {} characteristics", found.len());

        let table = found.keys().copied().collect();
        *self
            .characteristics
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = found;
        Ok(table)
    }

    async fn write_characteristic(&self, characteristic: Uuid, value: &[u8]) -> Result<()> {
        let target = self.characteristic(characteristic)?;

        let writer = DataWriter::new()?;
        writer.WriteBytes(value)?;
        let buffer = writer.DetachBuffer()?;

        let status = target
            .WriteValueWithOptionAsync(&buffer, GattWriteOption::WriteWithoutResponse)?
            .await?;
        if status != GattCommunicationStatus::Success {
            anyhow::bail!("Write returned status: {:?}", status);
        }
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid, handler: NotificationHandler) -> Result<()> {
        let target = self.characteristic(characteristic)?;

        let status = target
            .WriteClientCharacteristicConfigurationDescriptorAsync(
                GattClientCharacteristicConfigurationDescriptorValue::Notify,
            )?
            .await?;
        if status != GattCommunicationStatus::Success {
            anyhow::bail!("Notification subscription returned status: {:?}", status);
        }

        let value_handler = TypedEventHandler::new(
            move |_: windows::core::Ref<GattCharacteristic>,
                  args: windows::core::Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let value = args.CharacteristicValue()?;
                    let reader = DataReader::FromBuffer(&value)?;
                    let mut bytes = vec![0u8; reader.UnconsumedBufferLength()? as usize];
                    reader.ReadBytes(&mut bytes)?;
                    handler(&bytes);
                }
                Ok(())
            },
        );
        target.ValueChanged(&value_handler)?;
        info!("Notifications enabled on {}", characteristic);
        Ok(())
    }

    async fn cancel_connection(&self) -> Result<()> {
        self.device.Close()?;
        // Closing the device does not raise ConnectionStatusChanged.
        self.notifier.notify();
        Ok(())
    }

    fn disconnected(&self) -> DisconnectSignal {
        self.notifier.signal()
    }
}
