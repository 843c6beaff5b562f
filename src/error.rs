use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use btleplug;
use serde_json;
use futures::channel::mpsc::SendError;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },

    #[error("Failed to send config over mpsc channel: {source}")]
    SendError { #[from] source: SendError },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to run (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to run (device): {source}")]
    DeviceError { #[from] source: DeviceError },

    #[error("No device address given and no last used device stored")]
    NoDeviceAddress,

    #[error("Failed to start async runtime: {source}")]
    Runtime { source: io::Error },
}

/// Raw faults of the radio/GATT layer. These never leave the device module; the
/// scanner and connection manager translate them into a [`DeviceError`].
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Bluetooth adapter is missing or disabled")]
    AdapterUnavailable,

    #[error("Device {address} has not been discovered")]
    UnknownDevice { address: String },

    #[error("Characteristic {uuid} is not available")]
    MissingCharacteristic { uuid: uuid::Uuid },

    #[error("Operation timed out")]
    Timeout,

    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ScanUnavailable,
    ScanFailed,
    NoCompatibleService,
    WriteFailed,
    ReconnectExhausted,
    UnexpectedDisconnect,
    InvalidCommand,
    NotConnected,
    Busy,
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Bluetooth adapter is missing or disabled")]
    ScanUnavailable { #[source] source: TransportError },

    #[error("Scanning failed: {source}")]
    ScanFailed { #[source] source: TransportError },

    #[error("Device does not offer a compatible service")]
    NoCompatibleService,

    #[error("Failed to write to the device: {source}")]
    WriteFailed { #[source] source: TransportError },

    #[error("Gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Connection to the device was lost")]
    UnexpectedDisconnect,

    #[error("Invalid command: {reason}")]
    InvalidCommand { reason: String },

    #[error("Not connected to a device")]
    NotConnected,

    #[error("A connection session is already active")]
    Busy,
}

impl DeviceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeviceError::ScanUnavailable { .. } => ErrorKind::ScanUnavailable,
            DeviceError::ScanFailed { .. } => ErrorKind::ScanFailed,
            DeviceError::NoCompatibleService => ErrorKind::NoCompatibleService,
            DeviceError::WriteFailed { .. } => ErrorKind::WriteFailed,
            DeviceError::ReconnectExhausted { .. } => ErrorKind::ReconnectExhausted,
            DeviceError::UnexpectedDisconnect => ErrorKind::UnexpectedDisconnect,
            DeviceError::InvalidCommand { .. } => ErrorKind::InvalidCommand,
            DeviceError::NotConnected => ErrorKind::NotConnected,
            DeviceError::Busy => ErrorKind::Busy,
        }
    }

    pub(crate) fn invalid_command<T: Into<String>>(reason: T) -> Self {
        DeviceError::InvalidCommand { reason: reason.into() }
    }
}
