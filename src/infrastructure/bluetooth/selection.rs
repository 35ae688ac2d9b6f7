//! Byte-sink selection for BLE printers.
//!
//! Printers expose vendor-specific services; which characteristic accepts
//! print data is a guess. The guess is configured, not hardcoded.

use crate::domain::settings::{SelectionStrategy, Settings};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::{GattCharacteristic, GattService};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicSelector {
    strategy: SelectionStrategy,
    service_uuids: Vec<String>,
    characteristic_uuids: Vec<String>,
}

impl Default for CharacteristicSelector {
    fn default() -> Self {
        Self::first_writable()
    }
}

impl CharacteristicSelector {
    pub fn first_writable() -> Self {
        Self {
            strategy: SelectionStrategy::FirstWritable,
            service_uuids: Vec::new(),
            characteristic_uuids: Vec::new(),
        }
    }

    /// Restrict selection to the given UUIDs. An empty list allows anything
    /// for that level.
    pub fn allow_list(service_uuids: &[String], characteristic_uuids: &[String]) -> Self {
        Self {
            strategy: SelectionStrategy::AllowList,
            service_uuids: service_uuids.iter().map(|u| protocol::normalize_uuid(u)).collect(),
            characteristic_uuids: characteristic_uuids
                .iter()
                .map(|u| protocol::normalize_uuid(u))
                .collect(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        match settings.gatt_selection {
            SelectionStrategy::FirstWritable => Self::first_writable(),
            SelectionStrategy::AllowList => Self::allow_list(
                &settings.gatt_service_uuids,
                &settings.gatt_characteristic_uuids,
            ),
        }
    }

    /// Whether characteristics of `service` should be considered at all.
    pub fn wants_service(&self, service: &GattService) -> bool {
        match self.strategy {
            SelectionStrategy::FirstWritable => true,
            SelectionStrategy::AllowList => {
                Self::listed(&self.service_uuids, &service.uuid)
            }
        }
    }

    /// Pick the sink among `candidates`, in discovery order. First match
    /// wins, there is no ranking.
    pub fn select<'a>(&self, candidates: &'a [GattCharacteristic]) -> Option<&'a GattCharacteristic> {
        candidates.iter().find(|c| {
            c.properties.write
                && match self.strategy {
                    SelectionStrategy::FirstWritable => true,
                    SelectionStrategy::AllowList => {
                        Self::listed(&self.service_uuids, &c.service_uuid)
                            && Self::listed(&self.characteristic_uuids, &c.uuid)
                    }
                }
        })
    }

    fn listed(list: &[String], uuid: &str) -> bool {
        list.is_empty() || list.iter().any(|u| *u == protocol::normalize_uuid(uuid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::transport::CharacteristicProperties;

    fn characteristic(service: &str, uuid: &str, write: bool) -> GattCharacteristic {
        GattCharacteristic {
            service_uuid: service.to_string(),
            uuid: uuid.to_string(),
            properties: CharacteristicProperties {
                write,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_first_writable_wins() {
        let chars = vec![
            characteristic("18f0", "2af1", false),
            characteristic("18f0", "2af2", true),
            characteristic("18f0", "2af3", true),
        ];
        let selected = CharacteristicSelector::first_writable().select(&chars).unwrap();
        assert_eq!(selected.uuid, "2af2");
    }

    #[test]
    fn test_write_without_response_alone_is_not_enough() {
        let mut only_wwr = characteristic("18f0", "2af1", false);
        only_wwr.properties.write_without_response = true;
        assert!(CharacteristicSelector::first_writable().select(&[only_wwr]).is_none());
    }

    #[test]
    fn test_allow_list_filters_by_uuid() {
        let selector = CharacteristicSelector::allow_list(
            &["000018F0-0000-1000-8000-00805F9B34FB".to_string()],
            &["2AF1".to_string()],
        );
        let other = GattService {
            uuid: "e7810a71-73ae-499d-8c15-faa9aef0c3f2".into(),
        };
        assert!(!selector.wants_service(&other));

        let chars = vec![
            characteristic("18f0", "2af0", true),
            characteristic("18f0", "2af1", true),
        ];
        assert_eq!(selector.select(&chars).unwrap().uuid, "2af1");
    }
}
