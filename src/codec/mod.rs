// ============================================================================
// Event Codec
// ============================================================================
//
// Order snapshot + event kind -> OrderEvent (encode), OrderEvent -> framed
// Avro bytes (serialize) and back (decode).
//
// Wire framing follows the schema-registry convention:
//   [0x00][schema id: u32 big-endian][Avro binary datum]
//
// ============================================================================

mod errors;
mod event;
mod schema;

pub use errors::{CodecError, DecodeError, DecodeFailure, RecordPosition};
pub use event::{encode, EventType, OrderEvent, WireStatus};
pub use schema::{
    decode, serialize, SchemaContext, ORDER_EVENT_SCHEMA_V1, ORDER_EVENT_SCHEMA_V2,
};
