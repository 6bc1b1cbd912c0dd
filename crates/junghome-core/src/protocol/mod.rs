//! Protocol module containing message types and the JSON codec.

pub mod codec;
pub mod messages;
pub mod sequence;

pub use codec::{decode_function_list, decode_message, encode_command, encode_message, DecodeError};
pub use messages::*;
pub use sequence::CorrelationCounter;
