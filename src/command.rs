// MIT License - Copyright (c) 2026 Peter Wright
// User commands relayed from remote clients to a site

use serde::{Deserialize, Serialize};

use crate::error::{Result, SecCtlError};

/// What the user wants the panel to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserCommandCode {
    StatusReport,
    ArmAway,
    ArmStay,
    ArmWithPin,
    ArmWithZeroEntryDelay,
    Disarm,
    Panic,
}

impl UserCommandCode {
    /// Codes that act on a single partition.
    pub fn needs_partition(&self) -> bool {
        matches!(
            self,
            Self::ArmAway
                | Self::ArmStay
                | Self::ArmWithPin
                | Self::ArmWithZeroEntryDelay
                | Self::Disarm
        )
    }

    pub fn needs_pin(&self) -> bool {
        matches!(self, Self::ArmWithPin | Self::Disarm)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PanicTarget {
    Fire,
    Ambulance,
    Police,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCommand {
    pub code: UserCommandCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<PanicTarget>,
}

impl UserCommand {
    pub fn new(code: UserCommandCode) -> Self {
        Self {
            code,
            partition_id: None,
            pin: None,
            target: None,
        }
    }

    pub fn status_report() -> Self {
        Self::new(UserCommandCode::StatusReport)
    }

    pub fn arm_away(partition_id: u32) -> Self {
        Self::new(UserCommandCode::ArmAway).with_partition(partition_id)
    }

    pub fn disarm(partition_id: u32, pin: impl Into<String>) -> Self {
        Self::new(UserCommandCode::Disarm)
            .with_partition(partition_id)
            .with_pin(pin)
    }

    pub fn panic(target: PanicTarget) -> Self {
        Self {
            target: Some(target),
            ..Self::new(UserCommandCode::Panic)
        }
    }

    pub fn with_partition(mut self, partition_id: u32) -> Self {
        self.partition_id = Some(partition_id);
        self
    }

    pub fn with_pin(mut self, pin: impl Into<String>) -> Self {
        self.pin = Some(pin.into());
        self
    }

    /// Check that the command carries the fields its code needs.
    pub fn validate(&self) -> Result<()> {
        let invalid = |details: &str| SecCtlError::InvalidCommand {
            details: format!("{:?}: {}", self.code, details),
        };

        if self.code.needs_partition() && self.partition_id.is_none() {
            return Err(invalid("partition_id required"));
        }
        if self.code.needs_pin() {
            match self.pin.as_deref() {
                Some(pin) if !pin.is_empty() && pin.bytes().all(|b| b.is_ascii_digit()) => {}
                Some(_) => return Err(invalid("pin must be decimal digits")),
                None => return Err(invalid("pin required")),
            }
        }
        if self.code == UserCommandCode::Panic && self.target.is_none() {
            return Err(invalid("panic target required"));
        }
        Ok(())
    }
}
