// MIT License - Copyright (c) 2026 Peter Wright
// Whole-site state snapshot and the deltas applied to it

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::devices::partition::Partition;
use crate::devices::zone::Zone;

bitflags! {
    /// System trouble flags, one bit per condition of the verbose trouble
    /// status byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct TroubleStatus: u8 {
        const SERVICE_REQUIRED       = 1 << 0;
        const AC_POWER_LOST          = 1 << 1;
        const TELEPHONE_LINE_FAULT   = 1 << 2;
        const FAILURE_TO_COMMUNICATE = 1 << 3;
        const ZONE_FAULT             = 1 << 4;
        const ZONE_TAMPER            = 1 << 5;
        const ZONE_LOW_BATTERY       = 1 << 6;
        const LOSS_OF_TIME           = 1 << 7;
    }
}

/// Kind of an active alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlarmKind {
    Partition,
    Duress,
    Fire,
    Aux,
    Panic,
    SmokeOrAux,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    pub kind: AlarmKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<u32>,
}

/// Latest known status of a whole site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemState {
    #[serde(default)]
    pub partitions: Vec<Partition>,
    #[serde(default)]
    pub zones: Vec<Zone>,
    #[serde(default)]
    pub alarms: Vec<Alarm>,
    #[serde(default)]
    pub trouble_status: TroubleStatus,
}

/// A partial update to a [`SystemState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StateChange {
    Partition(Partition),
    Zone(Zone),
    TroubleStatus(TroubleStatus),
}

impl SystemState {
    /// Apply a delta in place. Partitions and zones are upserted by id.
    pub fn apply(&mut self, change: StateChange) {
        match change {
            StateChange::Partition(part) => {
                match self.partitions.iter_mut().find(|p| p.id == part.id) {
                    Some(existing) => *existing = part,
                    None => self.partitions.push(part),
                }
            }
            StateChange::Zone(zone) => match self.zones.iter_mut().find(|z| z.id == zone.id) {
                Some(existing) => *existing = zone,
                None => self.zones.push(zone),
            },
            StateChange::TroubleStatus(status) => self.trouble_status = status,
        }
    }

    pub fn partition(&self, id: u32) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.id == id)
    }

    pub fn zone(&self, id: u32) -> Option<&Zone> {
        self.zones.iter().find(|z| z.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::partition::PartitionStatus;
    use crate::devices::zone::ZoneStatus;

    #[test]
    fn test_apply_upserts_partition() {
        let mut state = SystemState::default();
        state.apply(StateChange::Partition(Partition::new(1, PartitionStatus::Ready)));
        state.apply(StateChange::Partition(Partition::new(2, PartitionStatus::Ready)));
        state.apply(StateChange::Partition(Partition::new(1, PartitionStatus::Armed)));

        assert_eq!(state.partitions.len(), 2);
        assert_eq!(state.partition(1).unwrap().status, PartitionStatus::Armed);
        assert_eq!(state.partition(2).unwrap().status, PartitionStatus::Ready);
    }

    #[test]
    fn test_apply_upserts_zone() {
        let mut state = SystemState::default();
        state.apply(StateChange::Zone(Zone::new(7, ZoneStatus::Open)));
        state.apply(StateChange::Zone(Zone::new(7, ZoneStatus::Restore)));
        assert_eq!(state.zones.len(), 1);
        assert_eq!(state.zone(7).unwrap().status, ZoneStatus::Restore);
    }

    #[test]
    fn test_apply_replaces_trouble_status() {
        let mut state = SystemState {
            trouble_status: TroubleStatus::AC_POWER_LOST,
            ..Default::default()
        };
        state.apply(StateChange::TroubleStatus(TroubleStatus::LOSS_OF_TIME));
        assert_eq!(state.trouble_status, TroubleStatus::LOSS_OF_TIME);
    }

    #[test]
    fn test_state_change_json_shape() {
        let change = StateChange::Zone(Zone::new(4, ZoneStatus::Tamper));
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["type"], "Zone");
        assert_eq!(json["data"]["id"], 4);
        let back: StateChange = serde_json::from_value(json).unwrap();
        assert_eq!(back, change);
    }
}
