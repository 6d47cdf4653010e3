use apache_avro::{from_avro_datum, from_value, to_avro_datum, to_value, Schema};
use std::collections::HashMap;

use super::errors::{CodecError, DecodeError, DecodeFailure, RecordPosition};
use super::event::OrderEvent;

// ============================================================================
// Avro Schemas and Framing
// ============================================================================
//
// Evolution rule: only new optional fields with a default. A payload
// written with any registered schema is resolved into the current reader
// schema; unknown enum symbols and missing required fields fail resolution
// instead of being defaulted.
//
// ============================================================================

const MAGIC_BYTE: u8 = 0;
const HEADER_LEN: usize = 5;

pub const ORDER_EVENT_SCHEMA_V1: &str = r#"
{
  "type": "record",
  "name": "OrderEvent",
  "namespace": "com.example.avro",
  "fields": [
    {"name": "orderId", "type": "string"},
    {"name": "customerId", "type": "string"},
    {"name": "customerEmail", "type": "string"},
    {"name": "productName", "type": "string"},
    {"name": "quantity", "type": "int"},
    {"name": "totalAmount", "type": "double"},
    {"name": "status", "type": {
      "type": "enum",
      "name": "OrderStatus",
      "symbols": ["CREATED", "CONFIRMED", "SHIPPED", "DELIVERED", "CANCELLED"]
    }},
    {"name": "eventTimestamp", "type": "long"},
    {"name": "eventType", "type": {
      "type": "enum",
      "name": "EventType",
      "symbols": ["ORDER_CREATED", "ORDER_UPDATED", "ORDER_CANCELLED"]
    }}
  ]
}
"#;

pub const ORDER_EVENT_SCHEMA_V2: &str = r#"
{
  "type": "record",
  "name": "OrderEvent",
  "namespace": "com.example.avro",
  "fields": [
    {"name": "orderId", "type": "string"},
    {"name": "customerId", "type": "string"},
    {"name": "customerEmail", "type": "string"},
    {"name": "productName", "type": "string"},
    {"name": "quantity", "type": "int"},
    {"name": "totalAmount", "type": "double"},
    {"name": "status", "type": {
      "type": "enum",
      "name": "OrderStatus",
      "symbols": ["CREATED", "CONFIRMED", "SHIPPED", "DELIVERED", "CANCELLED"]
    }},
    {"name": "eventTimestamp", "type": "long"},
    {"name": "eventType", "type": {
      "type": "enum",
      "name": "EventType",
      "symbols": ["ORDER_CREATED", "ORDER_UPDATED", "ORDER_CANCELLED"]
    }},
    {"name": "eventId", "type": ["null", "string"], "default": null}
  ]
}
"#;

/// Schemas the codec knows about, keyed by registry id.
///
/// Registry management is handled elsewhere; ids are configured.
#[derive(Debug, Clone)]
pub struct SchemaContext {
    writer_id: u32,
    reader: Schema,
    known: HashMap<u32, Schema>,
}

impl SchemaContext {
    /// Writes with `writer` under `writer_id` and reads into the same schema.
    pub fn new(writer_id: u32, writer: Schema) -> Self {
        let mut known = HashMap::new();
        known.insert(writer_id, writer.clone());
        Self {
            writer_id,
            reader: writer,
            known,
        }
    }

    /// Context for the order-events topic: current v2 schema under
    /// `current_id`, optionally the legacy v1 schema under `legacy_id`.
    pub fn order_events(current_id: u32, legacy_id: Option<u32>) -> Result<Self, CodecError> {
        let mut context = Self::new(current_id, Schema::parse_str(ORDER_EVENT_SCHEMA_V2)?);
        if let Some(legacy_id) = legacy_id {
            context = context.with_writer_schema(legacy_id, Schema::parse_str(ORDER_EVENT_SCHEMA_V1)?);
        }
        Ok(context)
    }

    /// Register an older writer schema that may still be found on the topic.
    pub fn with_writer_schema(mut self, id: u32, schema: Schema) -> Self {
        self.known.insert(id, schema);
        self
    }

    fn schema(&self, id: u32) -> Option<&Schema> {
        self.known.get(&id)
    }
}

/// Frame an event with the current writer schema.
pub fn serialize(event: &OrderEvent, context: &SchemaContext) -> Result<Vec<u8>, CodecError> {
    serialize_with(event, context, context.writer_id)
}

fn serialize_with(event: &OrderEvent, context: &SchemaContext, schema_id: u32) -> Result<Vec<u8>, CodecError> {
    let schema = context
        .schema(schema_id)
        .ok_or(CodecError::UnknownSchemaId(schema_id))?;

    let value = to_value(event)?.resolve(schema)?;
    let datum = to_avro_datum(schema, value)?;

    let mut framed = Vec::with_capacity(HEADER_LEN + datum.len());
    framed.push(MAGIC_BYTE);
    framed.extend_from_slice(&schema_id.to_be_bytes());
    framed.extend_from_slice(&datum);
    Ok(framed)
}

/// Decode a framed payload consumed from `position`.
pub fn decode(
    payload: &[u8],
    context: &SchemaContext,
    position: RecordPosition,
) -> Result<OrderEvent, DecodeError> {
    decode_frame(payload, context).map_err(|failure| DecodeError {
        position,
        payload_len: payload.len(),
        failure,
    })
}

fn decode_frame(payload: &[u8], context: &SchemaContext) -> Result<OrderEvent, DecodeFailure> {
    let (&magic, _) = payload.split_first().ok_or(DecodeFailure::Empty)?;
    if magic != MAGIC_BYTE {
        return Err(DecodeFailure::BadMagic(magic));
    }
    if payload.len() < HEADER_LEN {
        return Err(DecodeFailure::Truncated(HEADER_LEN));
    }

    let schema_id = u32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]]);
    let writer = context
        .schema(schema_id)
        .ok_or(DecodeFailure::UnknownSchema(schema_id))?;

    let mut body = &payload[HEADER_LEN..];
    let value = from_avro_datum(writer, &mut body, Some(&context.reader))
        .map_err(|e| DecodeFailure::Avro(e.to_string()))?;
    if !body.is_empty() {
        return Err(DecodeFailure::TrailingBytes(body.len()));
    }

    let event: OrderEvent = from_value(&value).map_err(|e| DecodeFailure::Avro(e.to_string()))?;
    event.validate()?;
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode, EventType, WireStatus};
    use crate::domain::order::{Order, OrderStatus};
    use chrono::Utc;

    fn context() -> SchemaContext {
        SchemaContext::order_events(2, Some(1)).unwrap()
    }

    fn position() -> RecordPosition {
        RecordPosition {
            topic: "order-events".to_string(),
            partition: 3,
            offset: 42,
        }
    }

    fn widget_event() -> OrderEvent {
        let order = Order::new("C1", "a@b.com", "Widget", 2, 19.98).with_id("O1");
        encode(&order, EventType::OrderCreated).unwrap()
    }

    #[test]
    fn test_frame_header_carries_schema_id() {
        let bytes = serialize(&widget_event(), &context()).unwrap();
        assert_eq!(bytes[0], MAGIC_BYTE);
        assert_eq!(&bytes[1..5], &2u32.to_be_bytes());
    }

    #[test]
    fn test_encode_then_decode_preserves_fields() {
        let before = Utc::now().timestamp_millis();
        let order = Order::new("C1", "a@b.com", "Widget", 2, 19.98)
            .with_id("O1")
            .with_status(OrderStatus::Shipped);
        let event = encode(&order, EventType::OrderUpdated).unwrap();

        let bytes = serialize(&event, &context()).unwrap();
        let decoded = decode(&bytes, &context(), position()).unwrap();

        assert_eq!(decoded, event);
        assert_eq!(decoded.status, WireStatus::Shipped);
        assert!(decoded.event_timestamp >= before);
    }

    #[test]
    fn test_legacy_payload_decodes_without_event_id() {
        let ctx = context();
        let mut event = widget_event();
        event.event_id = None;

        let v1 = serialize_with(&event, &ctx, 1).unwrap();
        assert_eq!(&v1[1..5], &1u32.to_be_bytes());

        let decoded = decode(&v1, &ctx, position()).unwrap();
        assert_eq!(decoded.order_id, "O1");
        assert_eq!(decoded.event_id, None);
    }

    #[test]
    fn test_unknown_schema_id_is_rejected() {
        let bytes = serialize(&widget_event(), &context()).unwrap();
        let reader_only_v2 = SchemaContext::order_events(7, None).unwrap();

        let err = decode(&bytes, &reader_only_v2, position()).unwrap_err();
        assert!(matches!(err.failure, DecodeFailure::UnknownSchema(2)));
    }

    #[test]
    fn test_decode_error_reports_position() {
        let err = decode(&[1, 2, 3], &context(), position()).unwrap_err();

        assert!(matches!(err.failure, DecodeFailure::BadMagic(1)));
        assert_eq!(err.position.partition, 3);
        assert_eq!(err.position.offset, 42);
        assert_eq!(err.payload_len, 3);
        assert!(err.to_string().contains("order-events[3]@42"));
    }

    #[test]
    fn test_truncated_and_empty_payloads() {
        let ctx = context();
        assert!(matches!(
            decode(&[], &ctx, position()).unwrap_err().failure,
            DecodeFailure::Empty
        ));
        assert!(matches!(
            decode(&[0, 0, 0], &ctx, position()).unwrap_err().failure,
            DecodeFailure::Truncated(_)
        ));

        let bytes = serialize(&widget_event(), &ctx).unwrap();
        let cut = &bytes[..bytes.len() - 4];
        assert!(matches!(
            decode(cut, &ctx, position()).unwrap_err().failure,
            DecodeFailure::Avro(_)
        ));
    }

    #[test]
    fn test_out_of_range_enum_is_rejected() {
        let ctx = context();
        let mut bytes = serialize(&widget_event(), &ctx).unwrap();

        // Layout after the header: 4 length-prefixed strings, int, double,
        // then the status enum index as a zig-zag varint.
        let mut cursor = HEADER_LEN;
        for _ in 0..4 {
            let len = (bytes[cursor] >> 1) as usize;
            cursor += 1 + len;
        }
        cursor += 1; // quantity = 2 fits in one byte
        cursor += 8; // double
        bytes[cursor] = 2 * 9; // index 9 does not exist

        let err = decode(&bytes, &ctx, position()).unwrap_err();
        assert!(matches!(err.failure, DecodeFailure::Avro(_)));
    }

    #[test]
    fn test_writer_with_unknown_symbol_is_rejected() {
        let widened = ORDER_EVENT_SCHEMA_V1.replace("\"CANCELLED\"]", "\"CANCELLED\", \"REFUNDED\"]");
        let writer = Schema::parse_str(&widened).unwrap();
        let ctx = context().with_writer_schema(9, writer.clone());

        let mut record = apache_avro::types::Record::new(&writer).unwrap();
        record.put("orderId", "O1");
        record.put("customerId", "C1");
        record.put("customerEmail", "a@b.com");
        record.put("productName", "Widget");
        record.put("quantity", 2);
        record.put("totalAmount", 19.98);
        record.put("status", apache_avro::types::Value::Enum(5, "REFUNDED".to_string()));
        record.put("eventTimestamp", 1_i64);
        record.put("eventType", apache_avro::types::Value::Enum(1, "ORDER_UPDATED".to_string()));
        let datum = to_avro_datum(&writer, record).unwrap();

        let mut bytes = vec![MAGIC_BYTE];
        bytes.extend_from_slice(&9u32.to_be_bytes());
        bytes.extend_from_slice(&datum);

        let err = decode(&bytes, &ctx, position()).unwrap_err();
        assert!(matches!(err.failure, DecodeFailure::Avro(_)));
    }

    #[test]
    fn test_inconsistent_payload_fails_validation() {
        let ctx = context();
        let mut event = widget_event();
        event.status = WireStatus::Cancelled;

        let bytes = serialize(&event, &ctx).unwrap();
        let err = decode(&bytes, &ctx, position()).unwrap_err();
        assert!(matches!(err.failure, DecodeFailure::Invalid(_)));
    }
}
