//! The dqlite wire protocol.
//!
//! A connection starts with an 8-byte little-endian protocol version sent by
//! the client. After that, client and server exchange frames:
//!
//! ```text
//! [u32 word count][u8 type][u8 flags][u16 extra][body: word count * 8 bytes]
//! ```
//!
//! All integers are little-endian and the body is always padded to a multiple
//! of the 8-byte word size.
//!
//! - [`constants`]: Protocol versions, request/response type codes, column tags
//! - [`value`]: Typed parameter and column values
//! - [`message`]: The frame buffer and its encode/decode primitives
//! - [`rows`]: Result-set and file-set decoding
//! - [`request`]: One encoder per request type
//! - [`response`]: One decoder per response type
//! - [`session`]: [`Protocol`], one connection serialised to a single call at a time

pub mod constants;
pub mod message;
pub mod request;
pub mod response;
pub mod rows;
pub mod session;
pub mod value;

pub use constants::{
    ClusterFormat, ColumnType, RequestType, ResponseType, VERSION_LEGACY, VERSION_ONE,
};
pub use message::{Message, WORD_SIZE};
pub use rows::{File, Rows, RowsStep};
pub use session::{handshake, read_message, write_message, Protocol};
pub use value::{NamedValue, Value};
