//! Wire messages exchanged with the pivot query engine.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and encode to named
//! `MsgPack` maps via [`codec`], so field names match the engine's JSON form.

pub mod chunk;
pub mod codec;
pub mod request;

pub use chunk::{HeaderAxis, MessageType, PivotChunk};
pub use codec::{decode_chunk, decode_request, encode_chunk, encode_request};
pub use request::{GrandTotals, QueryRequest};
