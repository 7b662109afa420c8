// MIT License - Copyright (c) 2026 Peter Wright
// Application messages exchanged with a site, carried as wire frames

use serde::{Deserialize, Serialize};

use crate::command::UserCommand;
use crate::constants::tag;
use crate::devices::{StateChange, SystemState};
use crate::error::{Result, SecCtlError};
use crate::event::Event;
use crate::protocol::Frame;

/// Requests the cloud sends to a site outside of user commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMessage {
    /// Ask the site for a full [`SystemState`].
    GetState,
}

/// Every message that can travel over a site connection.
///
/// Each message is one frame: the frame code is the tag and the data is
/// compact JSON. JSON string escaping guarantees the data never contains
/// CR LF.
#[derive(Debug, Clone, PartialEq)]
pub enum SiteMessage {
    Control(ControlMessage),
    SystemState(SystemState),
    StateChange(StateChange),
    Event(Event),
    UserCommand(UserCommand),
}

impl SiteMessage {
    pub fn tag(&self) -> u16 {
        match self {
            SiteMessage::Control(_) => tag::CONTROL,
            SiteMessage::SystemState(_) => tag::SYSTEM_STATE,
            SiteMessage::StateChange(_) => tag::STATE_CHANGE,
            SiteMessage::Event(_) => tag::EVENT,
            SiteMessage::UserCommand(_) => tag::USER_COMMAND,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SiteMessage::Control(_) => "Control",
            SiteMessage::SystemState(_) => "SystemState",
            SiteMessage::StateChange(_) => "StateChange",
            SiteMessage::Event(_) => "Event",
            SiteMessage::UserCommand(_) => "UserCommand",
        }
    }

    pub fn to_frame(&self) -> Result<Frame> {
        let data = match self {
            SiteMessage::Control(m) => serde_json::to_vec(m)?,
            SiteMessage::SystemState(m) => serde_json::to_vec(m)?,
            SiteMessage::StateChange(m) => serde_json::to_vec(m)?,
            SiteMessage::Event(m) => serde_json::to_vec(m)?,
            SiteMessage::UserCommand(m) => serde_json::to_vec(m)?,
        };
        Ok(Frame::new(self.tag(), data))
    }

    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let data = frame.data.as_slice();
        let msg = match frame.code {
            tag::CONTROL => SiteMessage::Control(serde_json::from_slice(data)?),
            tag::SYSTEM_STATE => SiteMessage::SystemState(serde_json::from_slice(data)?),
            tag::STATE_CHANGE => SiteMessage::StateChange(serde_json::from_slice(data)?),
            tag::EVENT => SiteMessage::Event(serde_json::from_slice(data)?),
            tag::USER_COMMAND => SiteMessage::UserCommand(serde_json::from_slice(data)?),
            other => return Err(SecCtlError::UnknownTag { tag: other }),
        };
        Ok(msg)
    }
}

impl From<UserCommand> for SiteMessage {
    fn from(cmd: UserCommand) -> Self {
        SiteMessage::UserCommand(cmd)
    }
}

impl From<Event> for SiteMessage {
    fn from(event: Event) -> Self {
        SiteMessage::Event(event)
    }
}

/// Build the handshake frame a site sends first, carrying its site token.
pub fn login_frame(token: &str) -> Frame {
    Frame::new(tag::LOGIN, token.as_bytes())
}

/// Extract the site token from a handshake frame.
pub fn parse_login(frame: &Frame) -> Result<String> {
    if frame.code != tag::LOGIN {
        return Err(SecCtlError::Auth);
    }
    let token = std::str::from_utf8(&frame.data).map_err(|_| SecCtlError::Auth)?;
    let token = token.trim();
    if token.is_empty() {
        return Err(SecCtlError::Auth);
    }
    Ok(token.to_string())
}
