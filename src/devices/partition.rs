// MIT License - Copyright (c) 2026 Peter Wright
// Partition state as reported by a site

use serde::{Deserialize, Serialize};

/// Partition status as last reported by the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionStatus {
    Ready,
    NotReady,
    Armed,
    InAlarm,
    Disarmed,
    Busy,
}

/// A single alarm partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub id: u32,
    pub status: PartitionStatus,
    #[serde(default)]
    pub trouble_led: bool,
}

impl Partition {
    pub fn new(id: u32, status: PartitionStatus) -> Self {
        Self {
            id,
            status,
            trouble_led: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trouble_led_defaults_off() {
        let part: Partition = serde_json::from_str(r#"{"id":1,"status":"Ready"}"#).unwrap();
        assert_eq!(part.status, PartitionStatus::Ready);
        assert!(!part.trouble_led);
    }
}
