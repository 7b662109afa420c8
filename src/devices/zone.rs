// MIT License - Copyright (c) 2026 Peter Wright
// Zone state as reported by a site

use serde::{Deserialize, Serialize};

/// Zone status as last reported by the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoneStatus {
    Alarm,
    AlarmRestore,
    Tamper,
    TamperRestore,
    Fault,
    FaultRestore,
    Open,
    Restore,
}

/// A single alarm zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: u32,
    /// Fault/open/restore reports don't carry a partition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_id: Option<u32>,
    pub status: ZoneStatus,
}

impl Zone {
    pub fn new(id: u32, status: ZoneStatus) -> Self {
        Self {
            id,
            partition_id: None,
            status,
        }
    }
}
