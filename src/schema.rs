//! Vendor message shapes, hand-authored against `prost`'s `Message` derive.
//!
//! Stands in for the code-generated schema crate the real client vendors:
//! only the fields the dispatcher actually inspects are modeled here, not
//! the full vendor `.proto` surface.

use prost::Message;

/// The protobuf header embedded in every `Proto`-variant frame.
#[derive(Clone, PartialEq, Message)]
pub struct CMsgProtoBufHeader {
    #[prost(fixed64, tag = "1")]
    pub steamid: u64,
    #[prost(int32, tag = "2")]
    pub client_sessionid: i32,
    #[prost(fixed64, tag = "4")]
    pub jobid_source: u64,
    #[prost(fixed64, tag = "5")]
    pub jobid_target: u64,
    #[prost(string, optional, tag = "6")]
    pub target_job_name: Option<String>,
}

impl Default for CMsgProtoBufHeader {
    fn default() -> Self {
        Self {
            steamid: 0,
            client_sessionid: 0,
            jobid_source: u64::MAX,
            jobid_target: u64::MAX,
            target_job_name: None,
        }
    }
}

/// A batch of sub-messages, optionally zlib-compressed.
#[derive(Clone, PartialEq, Message, Default)]
pub struct CMsgMulti {
    #[prost(int32, tag = "1")]
    pub size_unzipped: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub message_body: Vec<u8>,
}

/// Empty heartbeat body.
#[derive(Clone, PartialEq, Message, Default)]
pub struct CMsgClientHeartbeat {}

#[derive(Clone, PartialEq, Message, Default)]
pub struct CMsgClientLogOnResponse {
    #[prost(int32, tag = "1")]
    pub eresult: i32,
    #[prost(int32, tag = "2")]
    pub out_of_game_heartbeat_seconds: i32,
    #[prost(fixed64, tag = "3")]
    pub client_supplied_steamid: u64,
}

#[derive(Clone, PartialEq, Message, Default)]
pub struct CMsgClientLoggedOff {
    #[prost(int32, tag = "1")]
    pub eresult: i32,
}

#[derive(Clone, PartialEq, Message, Default)]
pub struct CMsgClientCMList {
    #[prost(fixed32, repeated, tag = "1")]
    pub cm_addresses: Vec<u32>,
    #[prost(uint32, repeated, tag = "2")]
    pub cm_ports: Vec<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proto_header_round_trips() {
        let header = CMsgProtoBufHeader {
            steamid: 76561198000000000,
            client_sessionid: 42,
            jobid_source: 7,
            jobid_target: u64::MAX,
            target_job_name: None,
        };
        let bytes = header.encode_to_vec();
        let decoded = CMsgProtoBufHeader::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn cm_list_round_trips() {
        let list = CMsgClientCMList {
            cm_addresses: vec![0x0100007f, 0x0200000a],
            cm_ports: vec![27017, 27018],
        };
        let bytes = list.encode_to_vec();
        let decoded = CMsgClientCMList::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, list);
    }
}
