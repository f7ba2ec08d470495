//! Protocol module containing the JSON envelope types and their codec.

pub mod codec;
pub mod messages;

pub use codec::{
    append_to_batch, decode_inbound, encode_event, encode_reply, format_timestamp, split_batch,
    ProtocolError, FRAME_DELIMITER,
};
pub use messages::*;
