use btleplug::api::{BDAddr, Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::device::transport::{Advertisement, GattCharacteristic, GattService, Transport};
use crate::error::TransportError;

/// [`Transport`] on top of the platform bluetooth stack (btleplug). Uses the first adapter.
pub struct BtleTransport {
    manager: Manager,
    adapter: Mutex<Option<Adapter>>,
}

fn adapter_error(err: btleplug::Error) -> TransportError {
    match err {
        btleplug::Error::PermissionDenied | btleplug::Error::NotSupported(_) => {
            warn!("Bluetooth adapter is not usable: {:?}", err);
            TransportError::AdapterUnavailable
        },
        err => TransportError::Btle { source: err },
    }
}

// macOS does not expose hardware addresses, fall back to the platform id there
fn peripheral_address(peripheral: &Peripheral) -> String {
    let address = peripheral.address();
    if address == BDAddr::from([0u8; 6]) {
        return format!("{:?}", peripheral.id());
    }
    address.to_string()
}

fn gatt_characteristic(characteristic: &Characteristic) -> GattCharacteristic {
    GattCharacteristic {
        uuid: characteristic.uuid,
        write: characteristic.properties.contains(CharPropFlags::WRITE),
        write_without_response: characteristic.properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
    }
}

async fn advertisement(adapter: &Adapter, event: CentralEvent) -> Option<Advertisement> {
    let id = match event {
        CentralEvent::DeviceDiscovered(id) => id,
        CentralEvent::DeviceUpdated(id) => id,
        CentralEvent::ServicesAdvertisement { id, .. } => id,
        _ => return None,
    };

    let peripheral = match adapter.peripheral(&id).await {
        Ok(peripheral) => peripheral,
        Err(err) => {
            debug!("Advertising peripheral went away: {:?}", err);
            return None;
        },
    };

    match peripheral.properties().await {
        Err(err) => {
            warn!("Could not query peripheral for properties: {:?}", err);
            None
        },
        Ok(None) => {
            debug!("Peripheral has no properties");
            None
        },
        Ok(Some(properties)) => Some(Advertisement {
            address: peripheral_address(&peripheral),
            name: properties.local_name,
            rssi: properties.rssi,
            services: properties.services,
        }),
    }
}

impl BtleTransport {
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await.map_err(adapter_error)?;
        Ok(BtleTransport { manager, adapter: Mutex::new(None) })
    }

    async fn adapter(&self) -> Result<Adapter, TransportError> {
        let mut cached = self.adapter.lock().await;
        if let Some(adapter) = cached.as_ref() {
            return Ok(adapter.clone());
        }

        let adapters = self.manager.adapters().await.map_err(adapter_error)?;
        let adapter = adapters.into_iter().next().ok_or(TransportError::AdapterUnavailable)?;
        info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));

        *cached = Some(adapter.clone());
        Ok(adapter)
    }

    async fn find_peripheral(&self, address: &str) -> Result<Peripheral, TransportError> {
        let adapter = self.adapter().await?;

        for peripheral in adapter.peripherals().await? {
            if peripheral_address(&peripheral).eq_ignore_ascii_case(address) {
                return Ok(peripheral);
            }
        }

        Err(TransportError::UnknownDevice { address: address.to_string() })
    }
}

impl Transport for BtleTransport {
    fn start_scan<'a>(&'a self, services: &'a [Uuid]) -> BoxFuture<'a, Result<(), TransportError>> {
        async move {
            let adapter = self.adapter().await?;
            let filter = ScanFilter { services: services.to_vec() };
            info!("Scanning for services {:?}...", services);
            adapter.start_scan(filter).await.map_err(adapter_error)
        }.boxed()
    }

    fn stop_scan(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        async move {
            let adapter = self.adapter().await?;
            adapter.stop_scan().await?;
            Ok(())
        }.boxed()
    }

    fn advertisements(&self) -> BoxFuture<'_, Result<BoxStream<'static, Advertisement>, TransportError>> {
        async move {
            let adapter = self.adapter().await?;
            let events = adapter.events().await?;

            let stream = events
                .filter_map(move |event| {
                    let adapter = adapter.clone();
                    async move { advertisement(&adapter, event).await }
                })
                .boxed();
            Ok(stream)
        }.boxed()
    }

    fn connect<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<Vec<GattService>, TransportError>> {
        async move {
            let peripheral = self.find_peripheral(address).await?;

            info!("Connecting to peripheral {}...", address);
            peripheral.connect().await?;

            info!("Connected; Discovering services...");
            peripheral.discover_services().await?;

            let services = peripheral.services()
                .into_iter()
                .map(|service| GattService {
                    uuid: service.uuid,
                    characteristics: service.characteristics.iter().map(gatt_characteristic).collect(),
                })
                .collect();
            Ok(services)
        }.boxed()
    }

    fn disconnect<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<(), TransportError>> {
        async move {
            let peripheral = self.find_peripheral(address).await?;
            if peripheral.is_connected().await? {
                peripheral.disconnect().await?;
            }
            Ok(())
        }.boxed()
    }

    fn is_connected<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<bool, TransportError>> {
        async move {
            match self.find_peripheral(address).await {
                Ok(peripheral) => Ok(peripheral.is_connected().await?),
                Err(TransportError::UnknownDevice { .. }) => Ok(false),
                Err(err) => Err(err),
            }
        }.boxed()
    }

    fn write<'a>(
        &'a self,
        address: &'a str,
        service: Uuid,
        characteristic: &'a GattCharacteristic,
        data: &'a [u8],
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        async move {
            let peripheral = self.find_peripheral(address).await?;

            let target = peripheral.characteristics()
                .into_iter()
                .find(|c| c.uuid == characteristic.uuid && c.service_uuid == service)
                .ok_or(TransportError::MissingCharacteristic { uuid: characteristic.uuid })?;

            let write_type = if characteristic.write_without_response {
                WriteType::WithoutResponse
            } else {
                WriteType::WithResponse
            };

            peripheral.write(&target, data, write_type).await?;
            Ok(())
        }.boxed()
    }
}
