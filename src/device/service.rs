use btleplug::api::bleuuid::{uuid_from_u16, uuid_from_u32};
use indexmap::IndexSet;
use uuid::Uuid;

use crate::device::constants::{SERVICE_UUIDS, WRITE_CHARACTERISTIC_UUIDS};
use crate::device::transport::{GattCharacteristic, GattService};

/// Expands 16-bit ("ffd0") and 32-bit short forms onto the Bluetooth base UUID so that both
/// forms compare equal to the 128-bit form. Parsing is case-insensitive.
pub fn normalize_uuid(value: &str) -> Option<Uuid> {
    let value = value.trim();

    let is_hex = !value.is_empty() && value.chars().all(|c| c.is_ascii_hexdigit());
    if is_hex && value.len() <= 4 {
        return u16::from_str_radix(value, 16).ok().map(uuid_from_u16);
    }
    if is_hex && value.len() <= 8 {
        return u32::from_str_radix(value, 16).ok().map(uuid_from_u32);
    }

    Uuid::parse_str(value).ok()
}

/// Ordered set of service UUIDs. The order is the connect priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceFilter {
    uuids: IndexSet<Uuid>,
}

impl ServiceFilter {
    pub fn uuids(&self) -> impl Iterator<Item = &Uuid> {
        self.uuids.iter()
    }

    pub fn to_vec(&self) -> Vec<Uuid> {
        self.uuids.iter().copied().collect()
    }

    pub fn matches_any<'a, I: IntoIterator<Item = &'a Uuid>>(&self, advertised: I) -> bool {
        advertised.into_iter().any(|uuid| self.uuids.contains(uuid))
    }

    /// The advertised UUIDs that are part of this filter, in advertised order.
    pub fn matching<'a, I: IntoIterator<Item = &'a Uuid>>(&self, advertised: I) -> Vec<Uuid> {
        advertised.into_iter().filter(|uuid| self.uuids.contains(*uuid)).copied().collect()
    }
}

impl Default for ServiceFilter {
    fn default() -> Self {
        ServiceFilter {
            uuids: SERVICE_UUIDS.iter().filter_map(|value| normalize_uuid(value)).collect(),
        }
    }
}

fn known_write_characteristics() -> IndexSet<Uuid> {
    WRITE_CHARACTERISTIC_UUIDS.iter().filter_map(|value| normalize_uuid(value)).collect()
}

fn is_writable(characteristic: &GattCharacteristic) -> bool {
    characteristic.write || characteristic.write_without_response
}

/// Picks the service/characteristic pair to send frames to: the first filter entry (in priority
/// order) that the device offers with a writable characteristic wins. Within a service, the known
/// command characteristics are preferred over any other writable one.
pub fn resolve_write_target(filter: &ServiceFilter, services: &[GattService]) -> Option<(Uuid, GattCharacteristic)> {
    let known = known_write_characteristics();

    for candidate in filter.uuids() {
        let Some(service) = services.iter().find(|service| service.uuid == *candidate) else {
            continue;
        };

        let preferred = service.characteristics
            .iter()
            .filter(|characteristic| is_writable(characteristic))
            .find(|characteristic| known.contains(&characteristic.uuid));

        let fallback = || service.characteristics.iter().find(|characteristic| is_writable(characteristic));

        if let Some(characteristic) = preferred.or_else(fallback) {
            return Some((service.uuid, characteristic.clone()));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn characteristic(uuid: &str, write: bool) -> GattCharacteristic {
        GattCharacteristic {
            uuid: normalize_uuid(uuid).unwrap(),
            write: false,
            write_without_response: write,
        }
    }

    #[test]
    fn short_and_long_forms_are_equivalent() {
        let short = normalize_uuid("FFD0").unwrap();
        let long = normalize_uuid("0000ffd0-0000-1000-8000-00805F9B34FB").unwrap();
        assert_eq!(short, long);
        assert_eq!(normalize_uuid("0000fff0").unwrap(), normalize_uuid("fff0").unwrap());
        assert!(normalize_uuid("not-a-uuid").is_none());
    }

    #[test]
    fn default_filter_keeps_priority_order() {
        let filter = ServiceFilter::default();
        assert_eq!(filter.to_vec(), vec![normalize_uuid("ffd0").unwrap(), normalize_uuid("fff0").unwrap()]);
        assert!(filter.matches_any(&[normalize_uuid("0000fff0-0000-1000-8000-00805f9b34fb").unwrap()]));
        assert!(!filter.matches_any(&[normalize_uuid("180f").unwrap()]));

        let advertised = [normalize_uuid("180f").unwrap(), normalize_uuid("FFF0").unwrap()];
        assert_eq!(filter.matching(&advertised), vec![normalize_uuid("fff0").unwrap()]);
    }

    #[test]
    fn first_service_in_priority_order_wins() {
        let services = vec![
            GattService { uuid: normalize_uuid("fff0").unwrap(), characteristics: vec![characteristic("fff3", true)] },
            GattService { uuid: normalize_uuid("ffd0").unwrap(), characteristics: vec![characteristic("ffd4", true)] },
        ];

        let (service, characteristic) = resolve_write_target(&ServiceFilter::default(), &services).unwrap();
        assert_eq!(service, normalize_uuid("ffd0").unwrap());
        assert_eq!(characteristic.uuid, normalize_uuid("ffd4").unwrap());
    }

    #[test]
    fn service_without_writable_characteristic_is_skipped() {
        let services = vec![
            GattService { uuid: normalize_uuid("ffd0").unwrap(), characteristics: vec![characteristic("ffd1", false)] },
            GattService {
                uuid: normalize_uuid("fff0").unwrap(),
                characteristics: vec![characteristic("fff1", true), characteristic("fff3", true)],
            },
        ];

        let (service, characteristic) = resolve_write_target(&ServiceFilter::default(), &services).unwrap();
        assert_eq!(service, normalize_uuid("fff0").unwrap());
        assert_eq!(characteristic.uuid, normalize_uuid("fff3").unwrap());
    }

    #[test]
    fn no_candidate_resolves() {
        let services = vec![
            GattService { uuid: normalize_uuid("180f").unwrap(), characteristics: vec![characteristic("2a19", true)] },
        ];
        assert!(resolve_write_target(&ServiceFilter::default(), &services).is_none());
    }
}
