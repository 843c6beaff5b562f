use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use tokio::time::sleep;
use uuid::Uuid;

use crate::device::service::normalize_uuid;
use crate::device::transport::{Advertisement, GattCharacteristic, GattService, Transport};
use crate::error::TransportError;

#[derive(Default)]
pub struct FakeState {
    pub adapter_missing: bool,
    pub advertisements: Vec<Advertisement>,
    pub devices: HashMap<String, Vec<GattService>>,
    pub discovered: HashSet<String>,
    pub scan_failures: u32,
    pub scans_started: u32,
    pub scans_stopped: u32,
    pub scan_filter: Vec<Uuid>,
    pub connects: u32,
    pub connect_failures: u32,
    pub connect_delay: Option<Duration>,
    pub connected: Option<String>,
    pub disconnects: u32,
    pub write_failures: u32,
    pub write_delay: Duration,
    pub writes: Vec<Vec<u8>>,
    pub in_flight: u32,
    pub max_in_flight: u32,
}

#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<FakeState>,
}

pub fn led_services() -> Vec<GattService> {
    vec![GattService {
        uuid: normalize_uuid("fff0").unwrap(),
        characteristics: vec![
            GattCharacteristic { uuid: normalize_uuid("fff4").unwrap(), write: false, write_without_response: false },
            GattCharacteristic { uuid: normalize_uuid("fff3").unwrap(), write: true, write_without_response: true },
        ],
    }]
}

pub fn advertisement(address: &str, rssi: i16, service: &str) -> Advertisement {
    Advertisement {
        address: address.to_string(),
        name: Some("BLK-BLEDOB".to_string()),
        rssi: Some(rssi),
        services: vec![normalize_uuid(service).unwrap()],
    }
}

impl FakeTransport {
    pub fn new() -> Self {
        FakeTransport::default()
    }

    pub fn with_device(address: &str, services: Vec<GattService>) -> Self {
        let transport = FakeTransport::new();
        {
            let mut state = transport.state();
            state.devices.insert(address.to_string(), services);
            state.discovered.insert(address.to_string());
        }
        transport
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn drop_link(&self) {
        self.state().connected = None;
    }
}

impl Transport for FakeTransport {
    fn start_scan<'a>(&'a self, services: &'a [Uuid]) -> BoxFuture<'a, Result<(), TransportError>> {
        async move {
            let mut state = self.state();
            if state.adapter_missing {
                return Err(TransportError::AdapterUnavailable);
            }
            if state.scan_failures > 0 {
                state.scan_failures -= 1;
                return Err(TransportError::Timeout);
            }
            state.scans_started += 1;
            state.scan_filter = services.to_vec();
            let addresses: Vec<String> = state.advertisements.iter().map(|a| a.address.clone()).collect();
            state.discovered.extend(addresses);
            Ok(())
        }.boxed()
    }

    fn stop_scan(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        async move {
            self.state().scans_stopped += 1;
            Ok(())
        }.boxed()
    }

    fn advertisements(&self) -> BoxFuture<'_, Result<BoxStream<'static, Advertisement>, TransportError>> {
        async move {
            let advertisements = self.state().advertisements.clone();
            Ok(stream::iter(advertisements).chain(stream::pending()).boxed())
        }.boxed()
    }

    fn connect<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<Vec<GattService>, TransportError>> {
        async move {
            let delay = {
                let mut state = self.state();
                if state.adapter_missing {
                    return Err(TransportError::AdapterUnavailable);
                }
                if !state.discovered.contains(address) {
                    return Err(TransportError::UnknownDevice { address: address.to_string() });
                }
                state.connects += 1;
                state.connect_delay
            };

            if let Some(delay) = delay {
                sleep(delay).await;
            }

            let mut state = self.state();
            if state.connect_failures > 0 {
                state.connect_failures -= 1;
                return Err(TransportError::Timeout);
            }
            state.connected = Some(address.to_string());
            Ok(state.devices.get(address).cloned().unwrap_or_default())
        }.boxed()
    }

    fn disconnect<'a>(&'a self, _address: &'a str) -> BoxFuture<'a, Result<(), TransportError>> {
        async move {
            let mut state = self.state();
            state.disconnects += 1;
            state.connected = None;
            Ok(())
        }.boxed()
    }

    fn is_connected<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<bool, TransportError>> {
        async move { Ok(self.state().connected.as_deref() == Some(address)) }.boxed()
    }

    fn write<'a>(
        &'a self,
        _address: &'a str,
        _service: Uuid,
        _characteristic: &'a GattCharacteristic,
        data: &'a [u8],
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        async move {
            let delay = {
                let mut state = self.state();
                state.in_flight += 1;
                state.max_in_flight = state.max_in_flight.max(state.in_flight);
                state.write_delay
            };

            sleep(delay).await;

            let mut state = self.state();
            state.in_flight -= 1;
            if state.write_failures > 0 {
                state.write_failures -= 1;
                return Err(TransportError::Timeout);
            }
            state.writes.push(data.to_vec());
            Ok(())
        }.boxed()
    }
}
