//! Connection-management messages handled inside the transport.

use std::net::{IpAddr, SocketAddr};

use containers::NodeId;
use serde::{Deserialize, Serialize};

use super::codec::encode_frame;
use super::config::P2pConfig;
use super::message::{Ctrl, MsgHeader, Ver, WireMessage};
use crate::error::WireError;

pub mod action {
    pub const REQ_HANDSHAKE: u8 = 0;
    pub const RES_HANDSHAKE: u8 = 1;
    pub const REQ_ACTIVE_NODES: u8 = 2;
    pub const RES_ACTIVE_NODES: u8 = 3;
    pub const DISCONNECT: u8 = 4;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReqHandshake {
    pub node_id: NodeId,
    pub chain_id: u32,
    pub ip: IpAddr,
    pub port: u16,
    pub revision: String,
    pub versions: Vec<u16>,
}

impl WireMessage for ReqHandshake {
    const HEADER: MsgHeader = MsgHeader::new(Ver::V0, Ctrl::NET, action::REQ_HANDSHAKE);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResHandshake {
    pub success: bool,
    pub revision: String,
}

impl WireMessage for ResHandshake {
    const HEADER: MsgHeader = MsgHeader::new(Ver::V0, Ctrl::NET, action::RES_HANDSHAKE);
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReqActiveNodes;

impl WireMessage for ReqActiveNodes {
    const HEADER: MsgHeader = MsgHeader::new(Ver::V0, Ctrl::NET, action::REQ_ACTIVE_NODES);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddr {
    pub node_id: NodeId,
    pub addr: SocketAddr,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResActiveNodes {
    pub nodes: Vec<NodeAddr>,
}

impl WireMessage for ResActiveNodes {
    const HEADER: MsgHeader = MsgHeader::new(Ver::V0, Ctrl::NET, action::RES_ACTIVE_NODES);
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disconnect;

impl WireMessage for Disconnect {
    const HEADER: MsgHeader = MsgHeader::new(Ver::V0, Ctrl::NET, action::DISCONNECT);
}

/// Handshake frames shared by every connection.
///
/// Built once the supported version set is known and never mutated.
#[derive(Debug)]
pub struct Handshake {
    pub local_id: NodeId,
    pub chain_id: u32,
    pub revision: String,
    pub versions: Vec<u16>,
    request_frame: Vec<u8>,
    accept_frame: Vec<u8>,
    reject_frame: Vec<u8>,
}

impl Handshake {
    pub fn build(local_id: NodeId, config: &P2pConfig, mut versions: Vec<u16>) -> Result<Self, WireError> {
        versions.sort_unstable();
        versions.dedup();

        let request = ReqHandshake {
            node_id: local_id,
            chain_id: config.chain_id,
            ip: config.listen_address,
            port: config.port,
            revision: config.revision.clone(),
            versions: versions.clone(),
        };
        let response = |success| ResHandshake { success, revision: config.revision.clone() };

        Ok(Self {
            local_id,
            chain_id: config.chain_id,
            revision: config.revision.clone(),
            request_frame: encode_frame(&request.to_msg()?)?,
            accept_frame: encode_frame(&response(true).to_msg()?)?,
            reject_frame: encode_frame(&response(false).to_msg()?)?,
            versions,
        })
    }

    pub fn request_frame(&self) -> &[u8] {
        &self.request_frame
    }

    pub fn response_frame(&self, success: bool) -> &[u8] {
        if success { &self.accept_frame } else { &self.reject_frame }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p2p::codec::read_frame;

    #[tokio::test]
    async fn cached_request_carries_sorted_versions() {
        let config = P2pConfig { port: 4000, chain_id: 7, ..P2pConfig::default() };
        let id = NodeId([5; 32]);
        let handshake = Handshake::build(id, &config, vec![Ver::V1, Ver::V0, Ver::V1]).unwrap();

        let mut reader = handshake.request_frame();
        let msg = read_frame(&mut reader).await.unwrap();
        assert_eq!(msg.header, ReqHandshake::HEADER);

        let request = ReqHandshake::from_body(&msg.body).unwrap();
        assert_eq!(request.node_id, id);
        assert_eq!(request.chain_id, 7);
        assert_eq!(request.port, 4000);
        assert_eq!(request.versions, vec![Ver::V0, Ver::V1]);
    }

    #[tokio::test]
    async fn response_frames_differ_by_outcome() {
        let handshake = Handshake::build(NodeId([1; 32]), &P2pConfig::default(), vec![Ver::V0]).unwrap();

        let mut reader = handshake.response_frame(false);
        let msg = read_frame(&mut reader).await.unwrap();
        assert!(!ResHandshake::from_body(&msg.body).unwrap().success);
    }
}
