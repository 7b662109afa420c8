// MIT License - Copyright (c) 2026 Peter Wright
// Site device model

pub mod partition;
pub mod system;
pub mod zone;

pub use partition::{Partition, PartitionStatus};
pub use system::{Alarm, AlarmKind, StateChange, SystemState, TroubleStatus};
pub use zone::{Zone, ZoneStatus};
