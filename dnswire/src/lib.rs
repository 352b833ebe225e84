//! DNS message encoding and decoding (RFC 1035 wire format).
//!
//! Decoding accepts compressed names; encoding writes them uncompressed. Neither does any I/O.

mod error;
pub mod name;
mod parser;
mod types;
mod writer;

pub use error::{CodecError, Section};
pub use types::{
    Header, Message, Opcode, QueryClass, QueryType, Question, Record, RecordData, ResponseCode,
    Soa,
};

/// Largest message allowed over plain UDP without EDNS0.
pub const MAX_UDP_MESSAGE_SIZE: usize = 512;
