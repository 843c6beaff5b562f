use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::error::ErrorKind;

/// A scan result. Later advertisements for the same address produce a new record instead of
/// changing this one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub services: Vec<Uuid>,
}

impl fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name.as_deref().unwrap_or("Unknown Device");
        match self.rssi {
            Some(rssi) => write!(f, "{} ({}) RSSI: {}", name, self.address, rssi),
            None => write!(f, "{} ({}) RSSI: N/A", name, self.address),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    ScanUnavailable,
    NoCompatibleService,
    ReconnectExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Scanning,
    Connecting {
        address: String,
    },
    Connected {
        address: String,
        service_uuid: Uuid,
        write_characteristic: Uuid,
    },
    Reconnecting {
        address: String,
        attempt: u32,
        next_delay: Duration,
    },
    Failed {
        reason: FailureReason,
    },
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Scanning => write!(f, "Scanning..."),
            ConnectionState::Connecting { address } => write!(f, "Connecting to {}...", address),
            ConnectionState::Connected { address, .. } => write!(f, "Connected: {}", address),
            ConnectionState::Reconnecting { attempt, next_delay, .. } => {
                write!(f, "Reconnecting (attempt {}, in {})", attempt, humantime::format_duration(*next_delay))
            },
            ConnectionState::Failed { reason } => write!(f, "Failed: {:?}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    StateChange(ConnectionState),
    Error(ErrorKind),
}
