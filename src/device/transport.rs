use futures::future::BoxFuture;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::TransportError;

/// One advertisement as seen by the radio.
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub services: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub write: bool,
    pub write_without_response: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

/// The GATT/radio primitives the scanner and the connection manager are built on.
///
/// There is no read or notify operation, the controllers never report back.
pub trait Transport: Send + Sync + 'static {
    /// Starts a discovery session filtered on `services`. Fails with
    /// [`TransportError::AdapterUnavailable`] when there is no usable adapter.
    fn start_scan<'a>(&'a self, services: &'a [Uuid]) -> BoxFuture<'a, Result<(), TransportError>>;

    fn stop_scan(&self) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Advertisements received while a scan is active. The stream may include devices that do not
    /// match the scan filter, some platforms ignore it.
    fn advertisements(&self) -> BoxFuture<'_, Result<BoxStream<'static, Advertisement>, TransportError>>;

    /// Establishes the GATT link and runs service discovery.
    fn connect<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<Vec<GattService>, TransportError>>;

    fn disconnect<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<(), TransportError>>;

    fn is_connected<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<bool, TransportError>>;

    fn write<'a>(
        &'a self,
        address: &'a str,
        service: Uuid,
        characteristic: &'a GattCharacteristic,
        data: &'a [u8],
    ) -> BoxFuture<'a, Result<(), TransportError>>;
}
