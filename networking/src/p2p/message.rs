use std::fmt;

use async_trait::async_trait;
use containers::PeerId;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::WireError;

/// Protocol versions understood by this node.
pub struct Ver;

impl Ver {
    pub const V0: u16 = 0;
    pub const V1: u16 = 1;

    pub fn is_known(ver: u16) -> bool {
        matches!(ver, Ver::V0 | Ver::V1)
    }
}

/// Message families.
pub struct Ctrl;

impl Ctrl {
    /// Connection management, handled inside the transport.
    pub const NET: u8 = 0;
    /// Chain synchronisation, handled by registered handlers.
    pub const SYNC: u8 = 1;

    pub fn is_known(ctrl: u8) -> bool {
        matches!(ctrl, Ctrl::NET | Ctrl::SYNC)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MsgHeader {
    pub ver: u16,
    pub ctrl: u8,
    pub action: u8,
}

impl MsgHeader {
    pub const fn new(ver: u16, ctrl: u8, action: u8) -> Self {
        Self { ver, ctrl, action }
    }

    /// Key used to look up handlers.
    pub const fn route(&self) -> u32 {
        (self.ver as u32) << 16 | (self.ctrl as u32) << 8 | self.action as u32
    }
}

impl fmt::Display for MsgHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.ver, self.ctrl, self.action)
    }
}

/// A message with an encoded, uncompressed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msg {
    pub header: MsgHeader,
    pub body: Vec<u8>,
}

impl Msg {
    pub fn new(header: MsgHeader, body: Vec<u8>) -> Self {
        Self { header, body }
    }
}

/// A typed message with a fixed header.
pub trait WireMessage: Serialize + DeserializeOwned {
    const HEADER: MsgHeader;

    fn to_msg(&self) -> Result<Msg, WireError> {
        Ok(Msg::new(Self::HEADER, bincode::serialize(self)?))
    }

    fn from_body(body: &[u8]) -> Result<Self, WireError> {
        Ok(bincode::deserialize(body)?)
    }
}

/// Where the send worker delivers an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dest {
    Peer(PeerId),
    Outbound,
    Active,
}

#[derive(Debug)]
pub struct MsgOut {
    pub dest: Dest,
    pub display_id: String,
    pub msg: Msg,
}

#[derive(Debug)]
pub struct MsgIn {
    pub peer_id: PeerId,
    pub display_id: String,
    pub route: u32,
    pub body: Vec<u8>,
}

/// Consumer of one message route.
#[async_trait]
pub trait Handler: Send + Sync {
    fn header(&self) -> MsgHeader;

    async fn receive(&self, peer_id: PeerId, display_id: &str, body: &[u8]);

    fn shutdown(&self) {}
}
