//! Sync protocol messages.
use containers::{B256, BlockHeader, PeerStatus};
use serde::{Deserialize, Serialize};

use crate::p2p::{Ctrl, MsgHeader, Ver, WireMessage};

pub const REQ_STATUS: u8 = 0;
pub const RES_STATUS: u8 = 1;
pub const REQ_BLOCKS_HEADERS: u8 = 2;
pub const RES_BLOCKS_HEADERS: u8 = 3;
pub const REQ_BLOCKS_BODIES: u8 = 4;
pub const RES_BLOCKS_BODIES: u8 = 5;

const fn sync_header(action: u8) -> MsgHeader {
    MsgHeader::new(Ver::V1, Ctrl::SYNC, action)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReqStatus;

impl WireMessage for ReqStatus {
    const HEADER: MsgHeader = sync_header(REQ_STATUS);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResStatus(pub PeerStatus);

impl WireMessage for ResStatus {
    const HEADER: MsgHeader = sync_header(RES_STATUS);
}

/// Ask for up to `take` consecutive headers starting at `from`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReqBlocksHeaders {
    pub from: u64,
    pub take: u32,
}

impl WireMessage for ReqBlocksHeaders {
    const HEADER: MsgHeader = sync_header(REQ_BLOCKS_HEADERS);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResBlocksHeaders {
    pub headers: Vec<BlockHeader>,
}

impl WireMessage for ResBlocksHeaders {
    const HEADER: MsgHeader = sync_header(RES_BLOCKS_HEADERS);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReqBlocksBodies {
    pub hashes: Vec<B256>,
}

impl WireMessage for ReqBlocksBodies {
    const HEADER: MsgHeader = sync_header(REQ_BLOCKS_BODIES);
}

/// Encoded bodies, in the order of the requested hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResBlocksBodies {
    pub bodies: Vec<Vec<u8>>,
}

impl WireMessage for ResBlocksBodies {
    const HEADER: MsgHeader = sync_header(RES_BLOCKS_BODIES);
}
