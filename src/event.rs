// MIT License - Copyright (c) 2026 Peter Wright
// Events reported by a site

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a site event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventLevel {
    Info,
    Trouble,
    Alarm,
    Critical,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Info => "Info",
            EventLevel::Trouble => "Trouble",
            EventLevel::Alarm => "Alarm",
            EventLevel::Critical => "Critical",
        }
    }
}

impl std::fmt::Display for EventLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened at a site: an alarm, a trouble condition,
/// an arm/disarm by a user at the keypad.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub level: EventLevel,
    pub code: String,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Event {
    pub fn new(level: EventLevel, code: impl Into<String>) -> Self {
        Self {
            level,
            code: code.into(),
            time: Utc::now(),
            partition_id: None,
            zone_id: None,
            data: None,
        }
    }

    pub fn with_partition(mut self, partition_id: u32) -> Self {
        self.partition_id = Some(partition_id);
        self
    }

    pub fn with_zone(mut self, zone_id: u32) -> Self {
        self.zone_id = Some(zone_id);
        self
    }
}
