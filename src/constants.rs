// MIT License - Copyright (c) 2026 Peter Wright
// Wire and relay constants

use std::time::Duration;

use uuid::Uuid;

/// Frame delimiter. Every frame on the wire ends with CR LF.
pub const CRLF: &[u8; 2] = b"\r\n";

/// Length of the decimal code field.
pub const CODE_LEN: usize = 3;

/// Length of the hex checksum field.
pub const CHECKSUM_LEN: usize = 2;

/// Highest code representable in the 3-digit field.
pub const MAX_CODE: u16 = 999;

/// Smallest decodable frame: code + checksum, no data.
pub const MIN_FRAME_LEN: usize = CODE_LEN + CHECKSUM_LEN;

/// Frame codes used for site messages on the duplex transport.
pub mod tag {
    pub const CONTROL: u16 = 1;
    pub const SYSTEM_STATE: u16 = 2;
    pub const STATE_CHANGE: u16 = 3;
    pub const EVENT: u16 = 4;
    pub const USER_COMMAND: u16 = 5;
    /// Site login handshake. Only valid as the first frame of a connection.
    pub const LOGIN: u16 = 505;
}

/// Topic announcing that a site disconnected somewhere.
pub const TOPIC_SITE_REMOVED: &str = "sites.removed";

/// How long a published user command stays deliverable.
pub const COMMAND_TTL: Duration = Duration::from_secs(60);

/// Topic carrying user commands for one site.
pub fn site_commands_topic(site_id: &Uuid) -> String {
    format!("site:{}:commands", site_id.simple())
}

/// Topic carrying events reported by one site.
pub fn site_events_topic(site_id: &Uuid) -> String {
    format!("site:{}:events", site_id.simple())
}
