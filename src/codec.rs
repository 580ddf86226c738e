//! The schema-driven payload codec.
//!
//! [Codec::pack] walks a schema tree and a JSON value in parallel, appending
//! little-endian wire bytes to a [Message]; [Codec::unpack] mirrors the walk
//! over a received payload and rebuilds the JSON value. Presence vectors,
//! bit fields, scaled channels, value sets, strings, arrays, variants and
//! nested JAUS-in-JAUS payloads are all driven by schema attributes, see
//! [crate::schema].
//!
//! Two wire asymmetries are kept on purpose for compatibility with deployed
//! peers: variable-length strings emit their `maxLength` as length prefix,
//! and variant arrays emit no discriminator at all.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, warn};
use serde_json::{Map, Value};

use crate::error::JausBridgeError;
use crate::message::Message;
use crate::schema::{JausType, NodeType, SchemaNode, SchemaRegistry};

/// Raw value read from or written to the wire
#[derive(Debug, Clone, Copy, PartialEq)]
enum WireNumber {
    Int(i128),
    Float(f64),
}

impl WireNumber {
    fn as_f64(&self) -> f64 {
        match self {
            WireNumber::Int(v) => *v as f64,
            WireNumber::Float(v) => *v,
        }
    }

    fn as_int(&self) -> Result<i128, JausBridgeError> {
        match self {
            WireNumber::Int(v) => Ok(*v),
            WireNumber::Float(v) => Err(JausBridgeError::InvalidValue(format!(
                "expected an integer, got {v}"
            ))),
        }
    }
}

/// Clip an integer to the numeric range of the wire primitive and emit its
/// little-endian bytes. Out-of-range values saturate at the endpoint, they
/// never wrap.
pub(crate) fn safe_pack(jaus_type: JausType, value: i128) -> Result<Vec<u8>, JausBridgeError> {
    let bytes = match jaus_type {
        JausType::Byte => (value.clamp(i8::MIN as i128, i8::MAX as i128) as i8)
            .to_le_bytes()
            .to_vec(),
        JausType::UnsignedByte => (value.clamp(0, u8::MAX as i128) as u8)
            .to_le_bytes()
            .to_vec(),
        JausType::ShortInteger => (value.clamp(i16::MIN as i128, i16::MAX as i128) as i16)
            .to_le_bytes()
            .to_vec(),
        JausType::UnsignedShortInteger => (value.clamp(0, u16::MAX as i128) as u16)
            .to_le_bytes()
            .to_vec(),
        JausType::Integer => (value.clamp(i32::MIN as i128, i32::MAX as i128) as i32)
            .to_le_bytes()
            .to_vec(),
        JausType::UnsignedInteger => (value.clamp(0, u32::MAX as i128) as u32)
            .to_le_bytes()
            .to_vec(),
        JausType::LongInteger => (value.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
            .to_le_bytes()
            .to_vec(),
        JausType::UnsignedLongInteger => (value.clamp(0, u64::MAX as i128) as u64)
            .to_le_bytes()
            .to_vec(),
        JausType::Float => ((value as f64) as f32).to_le_bytes().to_vec(),
        JausType::LongFloat => (value as f64).to_le_bytes().to_vec(),
        JausType::String => {
            return Err(JausBridgeError::InvalidValue(
                "cannot pack an integer as a string primitive".to_string(),
            ));
        }
    };
    Ok(bytes)
}

/// Emit a floating point channel, or round-trip integers through [safe_pack]
fn pack_number(jaus_type: JausType, value: WireNumber) -> Result<Vec<u8>, JausBridgeError> {
    match (jaus_type, value) {
        (JausType::Float, v) => Ok((v.as_f64() as f32).to_le_bytes().to_vec()),
        (JausType::LongFloat, v) => Ok(v.as_f64().to_le_bytes().to_vec()),
        (ty, WireNumber::Int(v)) => safe_pack(ty, v),
        (ty, WireNumber::Float(v)) => {
            // integer primitives only take whole numbers
            if v.fract() == 0.0 {
                safe_pack(ty, v as i128)
            } else {
                Err(JausBridgeError::InvalidValue(format!(
                    "cannot pack {v} into {ty:?}"
                )))
            }
        }
    }
}

/// Read one wire primitive at `offset`
fn read_number(
    payload: &[u8],
    offset: usize,
    jaus_type: JausType,
) -> Result<WireNumber, JausBridgeError> {
    let size = jaus_type.size();
    if payload.len() < offset + size {
        return Err(JausBridgeError::ShortPayload {
            need: offset + size,
            have: payload.len(),
        });
    }
    let raw = &payload[offset..offset + size];
    let value = match jaus_type {
        JausType::Byte => WireNumber::Int(raw[0] as i8 as i128),
        JausType::UnsignedByte | JausType::String => WireNumber::Int(raw[0] as i128),
        JausType::ShortInteger => {
            WireNumber::Int(i16::from_le_bytes([raw[0], raw[1]]) as i128)
        }
        JausType::UnsignedShortInteger => {
            WireNumber::Int(u16::from_le_bytes([raw[0], raw[1]]) as i128)
        }
        JausType::Integer => {
            WireNumber::Int(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as i128)
        }
        JausType::UnsignedInteger => {
            WireNumber::Int(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as i128)
        }
        JausType::LongInteger => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(raw);
            WireNumber::Int(i64::from_le_bytes(bytes) as i128)
        }
        JausType::UnsignedLongInteger => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(raw);
            WireNumber::Int(u64::from_le_bytes(bytes) as i128)
        }
        JausType::Float => {
            WireNumber::Float(f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64)
        }
        JausType::LongFloat => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(raw);
            WireNumber::Float(f64::from_le_bytes(bytes))
        }
    };
    Ok(value)
}

/// Convert a JSON number into its wire form
fn number_from_json(value: &Value) -> Result<WireNumber, JausBridgeError> {
    if let Some(v) = value.as_i64() {
        Ok(WireNumber::Int(v as i128))
    } else if let Some(v) = value.as_u64() {
        Ok(WireNumber::Int(v as i128))
    } else if let Some(v) = value.as_f64() {
        Ok(WireNumber::Float(v))
    } else {
        Err(JausBridgeError::InvalidValue(format!(
            "expected a number, got {value}"
        )))
    }
}

fn number_to_json(value: WireNumber) -> Value {
    match value {
        WireNumber::Int(v) => {
            if let Ok(small) = i64::try_from(v) {
                Value::from(small)
            } else {
                Value::from(v as u64)
            }
        }
        WireNumber::Float(v) => Value::from(v),
    }
}

/// Schema-driven translator between JSON values and JAUS payload bytes
pub struct Codec {
    registry: Arc<SchemaRegistry>,
}

impl Codec {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Pack a bridge JSON frame into the message payload.
    ///
    /// The frame carries `messageId`, the source and destination addresses
    /// and a schema-shaped `data` object; `messageName` picks the schema when
    /// several share the id. Returns false after logging when the frame
    /// cannot be encoded, the caller drops it.
    pub fn pack(&self, json: &Value, message: &mut Message) -> bool {
        match self.try_pack(json, message) {
            Ok(packed) => packed,
            Err(error) => {
                log::error!("{error}");
                false
            }
        }
    }

    fn try_pack(&self, json: &Value, message: &mut Message) -> Result<bool, JausBridgeError> {
        let message_id = json
            .get("messageId")
            .and_then(Value::as_str)
            .ok_or_else(|| JausBridgeError::InvalidValue("frame has no messageId".to_string()))?;
        let schemas = self
            .registry
            .get(message_id)
            .ok_or_else(|| JausBridgeError::UnknownMessageId(message_id.to_string()))?;

        let src = json
            .get("jausIdSrc")
            .and_then(Value::as_str)
            .ok_or_else(|| JausBridgeError::InvalidValue("frame has no jausIdSrc".to_string()))?;
        let dst = json
            .get("jausIdDst")
            .and_then(Value::as_str)
            .ok_or_else(|| JausBridgeError::InvalidValue("frame has no jausIdDst".to_string()))?;
        message.src_id = src.parse()?;
        message.dst_id = dst.parse()?;

        let data = json
            .get("data")
            .ok_or_else(|| JausBridgeError::InvalidValue("frame has no data".to_string()))?;

        if schemas.len() == 1 {
            self.encode(data, &schemas[0], message)?;
            return Ok(true);
        }
        let message_name = json.get("messageName").and_then(Value::as_str);
        for schema in schemas {
            if schema.title.as_deref() == message_name {
                self.encode(data, schema, message)?;
                return Ok(true);
            }
        }
        warn!("No schema found for message {message_id}");
        Ok(false)
    }

    /// Unpack the message payload into a bridge JSON frame.
    ///
    /// Every registered schema for the id is attempted in order, the first
    /// that parses wins. When none does, or the id is unknown, the frame
    /// still carries the id and addresses so clients can at least see the
    /// traffic.
    pub fn unpack(&self, message: &Message) -> Value {
        let message_id = format!("{:04x}", message.msg_id);
        let mut result = Map::new();
        result.insert("messageId".to_string(), Value::from(message_id.clone()));
        result.insert(
            "jausIdDst".to_string(),
            Value::from(message.dst_id.to_string()),
        );
        result.insert(
            "jausIdSrc".to_string(),
            Value::from(message.src_id.to_string()),
        );

        let Some(schemas) = self.registry.get(&message_id) else {
            warn!("No JSON schema for message {message_id}");
            return Value::Object(result);
        };

        let mut last_error: Option<JausBridgeError> = None;
        for schema in schemas {
            debug!(
                "parse message {}({message_id})",
                schema.title.as_deref().unwrap_or("<untitled>")
            );
            let mut data = Map::new();
            match self.decode(&mut data, message.payload(), 0, schema) {
                Ok(_) => {
                    result.insert("messageName".to_string(), Value::from(schema.title.clone()));
                    result.insert("data".to_string(), Value::Object(data));
                    return Value::Object(result);
                }
                Err(error) => last_error = Some(error),
            }
        }
        if let Some(error) = last_error {
            warn!(
                "message {message_id} matched none of its {} schemas ({}): {error}",
                schemas.len(),
                hex::encode(message.payload())
            );
        }
        Value::Object(result)
    }

    /// Walk the schema properties in declaration order, emitting wire bytes.
    ///
    /// Returns the bit field accumulator; the caller of a `bitField` object
    /// emits it once after the sub-walk, everyone else ignores it.
    pub(crate) fn encode(
        &self,
        value: &Value,
        schema: &SchemaNode,
        message: &mut Message,
    ) -> Result<i64, JausBridgeError> {
        let mut bitfield_value: i64 = 0;
        let props = schema.properties.as_ref().ok_or_else(|| {
            JausBridgeError::SchemaMismatch("schema node has no properties".to_string())
        })?;
        let mut required_missing: HashSet<&str> =
            schema.required.iter().map(String::as_str).collect();

        for (name, prop) in props {
            if value.get(name).is_some() {
                required_missing.remove(name.as_str());
            }
            match prop.node_type {
                NodeType::Object => {
                    if prop.is_jaus_message() {
                        self.encode_nested_payload(value, name, prop, message)?;
                    } else if let Some(bit_field) = prop.bit_field {
                        // the sub-walk only accumulates, the underlying
                        // integer goes out here in one piece
                        let child = value.get(name).ok_or_else(|| {
                            JausBridgeError::MissingRequiredField(name.clone())
                        })?;
                        let folded = self.encode(child, prop, message)?;
                        message.append_payload(&safe_pack(bit_field, folded as i128)?);
                    } else if let Some(child) = value.get(name) {
                        self.encode(child, prop, message)?;
                    }
                }
                NodeType::Number => {
                    if name == "presenceVector" {
                        let presence = generate_presence_vector(value, schema);
                        let jaus_type = require_jaus_type(prop, name)?;
                        message.append_payload(&safe_pack(jaus_type, presence as i128)?);
                    } else {
                        self.encode_number(
                            value,
                            name,
                            prop,
                            schema.is_required(name),
                            message,
                            &mut bitfield_value,
                        )?;
                    }
                }
                NodeType::String => {
                    self.encode_string(value, name, prop, message, &mut bitfield_value)?;
                }
                NodeType::Array => {
                    if let Some(items) = value.get(name).and_then(Value::as_array) {
                        if !prop.is_variant {
                            let jaus_type = require_jaus_type(prop, name)?;
                            message.append_payload(&safe_pack(jaus_type, items.len() as i128)?);
                            let item_schema = first_alternative(prop, name)?;
                            for item in items {
                                self.encode(item, item_schema, message)?;
                            }
                        }
                        // variants emit only their elements, the discriminator
                        // is left to the sender of record
                    }
                }
            }
        }

        if !required_missing.is_empty() {
            let mut names: Vec<&str> = required_missing.into_iter().collect();
            names.sort_unstable();
            return Err(JausBridgeError::MissingRequiredField(names.join(", ")));
        }
        Ok(bitfield_value)
    }

    fn encode_number(
        &self,
        value: &Value,
        name: &str,
        prop: &SchemaNode,
        required: bool,
        message: &mut Message,
        bitfield_value: &mut i64,
    ) -> Result<(), JausBridgeError> {
        if let Some(bit_range) = &prop.bit_range {
            // folded into the enclosing bit field, nothing emitted here
            if let Some(raw) = value.get(name) {
                let v = number_from_json(raw)?.as_int()?;
                *bitfield_value += (v >> bit_range.from) as i64;
            }
            return Ok(());
        }

        let jaus_type = require_jaus_type(prop, name)?;
        // absent optional numbers emit nothing; absent required ones pack a
        // zero and are still flagged when the walk finishes
        let resolved = match value.get(name) {
            Some(raw) => Some(number_from_json(raw)?),
            None if required => Some(WireNumber::Int(0)),
            None => None,
        };
        if let Some(number) = resolved {
            let number = match &prop.scale_range {
                Some(scale) => {
                    let scaled =
                        ((number.as_f64() - scale.bias) / scale.scale_factor).round() as i128;
                    WireNumber::Int(scaled)
                }
                None => number,
            };
            message.append_payload(&pack_number(jaus_type, number)?);
        }
        Ok(())
    }

    fn encode_string(
        &self,
        value: &Value,
        name: &str,
        prop: &SchemaNode,
        message: &mut Message,
        bitfield_value: &mut i64,
    ) -> Result<(), JausBridgeError> {
        if name == "MessageID" {
            if let Some(constant) = &prop.constant {
                let id = i128::from_str_radix(constant, 16).map_err(|_| {
                    JausBridgeError::InvalidValue(format!("bad message id constant {constant}"))
                })?;
                let jaus_type = require_jaus_type(prop, name)?;
                message.append_payload(&safe_pack(jaus_type, id)?);
                return Ok(());
            }
        }

        if prop.is_value_set() {
            let mut index: i64 = 0;
            if let Some(raw) = value.get(name) {
                if let Some(v) = raw.as_i64() {
                    index = v;
                } else if let Some(wanted) = raw.as_str() {
                    if let Some(value_set) = &prop.value_set {
                        for entry in value_set {
                            if let Some(value_enum) = &entry.value_enum {
                                if value_enum.enum_const == wanted {
                                    index = value_enum.enum_index;
                                }
                            }
                        }
                    }
                }
            }
            if let Some(bit_range) = &prop.bit_range {
                *bitfield_value += index >> bit_range.from;
                return Ok(());
            }
            let jaus_type = require_jaus_type(prop, name)?;
            message.append_payload(&safe_pack(jaus_type, index as i128)?);
            return Ok(());
        }

        if let (Some(min_length), Some(max_length)) = (prop.min_length, prop.max_length) {
            let text = value.get(name).and_then(Value::as_str).unwrap_or("");
            let raw = text.as_bytes();
            if min_length == max_length {
                // fixed width, NUL padded
                let mut bytes = raw[..raw.len().min(max_length)].to_vec();
                bytes.resize(max_length, 0);
                message.append_payload(&bytes);
            } else {
                let jaus_type = require_jaus_type(prop, name)?;
                // TODO: emit the actual byte count once deployed peers accept
                // it; they currently expect maxLength here
                message.append_payload(&safe_pack(jaus_type, max_length as i128)?);
                let take = raw.len().min(max_length);
                if take > 0 {
                    message.append_payload(&raw[..take]);
                }
            }
        }
        Ok(())
    }

    fn encode_nested_payload(
        &self,
        value: &Value,
        name: &str,
        prop: &SchemaNode,
        message: &mut Message,
    ) -> Result<(), JausBridgeError> {
        let attr = value.get(name).ok_or_else(|| {
            JausBridgeError::InvalidValue("no payload message specified".to_string())
        })?;
        let payload_id = attr
            .get("payloadMessageId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                JausBridgeError::InvalidValue("payload message has no payloadMessageId".to_string())
            })?;
        let inner_value = attr.get("payload").ok_or_else(|| {
            JausBridgeError::InvalidValue("payload message has no payload data".to_string())
        })?;
        let schemas = self
            .registry
            .get(payload_id)
            .ok_or_else(|| JausBridgeError::UnknownMessageId(payload_id.to_string()))?;
        let jaus_type = require_jaus_type(prop, name)?;

        let mut failed: Vec<String> = Vec::new();
        for schema in schemas {
            let inner_id = schema
                .message_id
                .as_deref()
                .and_then(|id| u16::from_str_radix(id, 16).ok())
                .unwrap_or_default();
            let mut inner_message = Message::new(inner_id);
            match self.encode(inner_value, schema, &mut inner_message) {
                Ok(_) => {
                    let payload = inner_message.payload();
                    message.append_payload(&safe_pack(jaus_type, payload.len() as i128)?);
                    message.append_payload(payload);
                    return Ok(());
                }
                Err(error) => failed.push(format!(
                    "{} ({}): {error}",
                    schema.title.as_deref().unwrap_or("<untitled>"),
                    schema.message_id.as_deref().unwrap_or("????"),
                )),
            }
        }
        Err(JausBridgeError::PayloadEncodeFailed(failed))
    }

    /// Walk the schema properties over a received payload, filling `out`.
    /// Returns the offset just past the consumed bytes.
    pub(crate) fn decode(
        &self,
        out: &mut Map<String, Value>,
        payload: &[u8],
        offset: usize,
        schema: &SchemaNode,
    ) -> Result<usize, JausBridgeError> {
        let props = schema.properties.as_ref().ok_or_else(|| {
            JausBridgeError::SchemaMismatch("schema node has no properties".to_string())
        })?;
        let mut index = offset;
        let mut presence_vector: Option<u64> = None;
        let mut presence_bit: u64 = 0;

        for (name, prop) in props {
            if let Some(presence) = presence_vector {
                if !schema.is_required(name) {
                    let bit = presence_bit;
                    presence_bit <<= 1;
                    if presence & bit == 0 {
                        // not on the wire, skip it
                        continue;
                    }
                }
            }
            match prop.node_type {
                NodeType::Object => {
                    if prop.is_jaus_message() {
                        index = self.decode_nested_payload(out, payload, index, name, prop)?;
                        continue;
                    }
                    let mut child = Map::new();
                    index = self.decode(&mut child, payload, index, prop)?;
                    out.insert(name.clone(), Value::Object(child));
                    if let Some(bit_field) = prop.bit_field {
                        // the members peeked at the shared integer, step over
                        // it exactly once
                        index += bit_field.size();
                    }
                }
                NodeType::Number => {
                    let jaus_type = require_jaus_type(prop, name)?;
                    let raw = read_number(payload, index, jaus_type)?;
                    if let Some(bit_range) = &prop.bit_range {
                        let masked = (raw.as_int()? & bit_range.mask()) >> bit_range.from;
                        out.insert(name.clone(), number_to_json(WireNumber::Int(masked)));
                        // the enclosing bit field advances past the integer
                        continue;
                    }
                    let value = match &prop.scale_range {
                        Some(scale) => WireNumber::Float(
                            raw.as_f64() * scale.scale_factor + scale.bias,
                        ),
                        None => raw,
                    };
                    out.insert(name.clone(), number_to_json(value));
                    index += jaus_type.size();
                    if name == "presenceVector" {
                        presence_vector = Some(raw.as_int()? as u64);
                        presence_bit = 1;
                    }
                }
                NodeType::String => {
                    index = self.decode_string(out, payload, index, name, prop)?;
                }
                NodeType::Array => {
                    index = self.decode_array(out, payload, index, name, prop)?;
                }
            }
        }
        Ok(index)
    }

    fn decode_string(
        &self,
        out: &mut Map<String, Value>,
        payload: &[u8],
        mut index: usize,
        name: &str,
        prop: &SchemaNode,
    ) -> Result<usize, JausBridgeError> {
        if let (Some(min_length), Some(max_length)) = (prop.min_length, prop.max_length) {
            if min_length == max_length {
                // fixed width: read the declared span, drop NUL padding. A
                // truncated tail yields what is actually there.
                let end = (index + max_length).min(payload.len());
                let text = std::str::from_utf8(&payload[index.min(end)..end])?;
                out.insert(
                    name.to_string(),
                    Value::from(text.trim_end_matches('\0')),
                );
                return Ok(index + max_length);
            }
        }

        let jaus_type = require_jaus_type(prop, name)?;
        let length_raw = read_number(payload, index, jaus_type)?.as_int()?;
        index += jaus_type.size();

        if name == "MessageID" && prop.constant.is_some() {
            out.insert(name.to_string(), Value::from(format!("{length_raw:x}")));
            return Ok(index);
        }

        if prop.is_value_set() {
            let mut wanted = length_raw;
            if let Some(bit_range) = &prop.bit_range {
                // same underlying integer, reinterpreted bitwise
                index -= jaus_type.size();
                wanted = (length_raw & bit_range.mask()) >> bit_range.from;
            }
            if let Some(value_set) = &prop.value_set {
                for entry in value_set {
                    if let Some(value_enum) = &entry.value_enum {
                        if value_enum.enum_index as i128 == wanted {
                            out.insert(
                                name.to_string(),
                                Value::from(value_enum.enum_const.clone()),
                            );
                        }
                    }
                }
            }
            return Ok(index);
        }

        let length = usize::try_from(length_raw).map_err(|_| {
            JausBridgeError::InvalidValue(format!("negative string length {length_raw}"))
        })?;
        let end = (index + length).min(payload.len());
        let text = std::str::from_utf8(&payload[index.min(end)..end])?;
        out.insert(name.to_string(), Value::from(text));
        Ok(index + length)
    }

    fn decode_array(
        &self,
        out: &mut Map<String, Value>,
        payload: &[u8],
        mut index: usize,
        name: &str,
        prop: &SchemaNode,
    ) -> Result<usize, JausBridgeError> {
        if let Some(jaus_type) = prop.jaus_type {
            let length_raw = read_number(payload, index, jaus_type)?.as_int()?;
            index += jaus_type.size();
            let length = usize::try_from(length_raw).map_err(|_| {
                JausBridgeError::InvalidValue(format!("negative array length {length_raw}"))
            })?;
            if prop.is_variant {
                // the length field doubles as the discriminator; the chosen
                // alternative decodes straight into the enclosing object
                let alternative = alternative_at(prop, name, length)?;
                return self.decode(out, payload, index, alternative);
            }
            let item_schema = first_alternative(prop, name)?;
            let mut list = Vec::with_capacity(length);
            for _ in 0..length {
                let mut item = Map::new();
                index = self.decode(&mut item, payload, index, item_schema)?;
                list.push(Value::Object(item));
            }
            out.insert(name.to_string(), Value::Array(list));
            return Ok(index);
        }

        if prop.min_items.is_some() && prop.min_items == prop.max_items {
            // fixed element count, no length prefix on the wire
            let count = prop.max_items.unwrap_or_default();
            let item_schema = first_alternative(prop, name)?;
            let mut list = Vec::with_capacity(count);
            for _ in 0..count {
                let mut item = Map::new();
                index = self.decode(&mut item, payload, index, item_schema)?;
                list.push(Value::Object(item));
            }
            out.insert(name.to_string(), Value::Array(list));
        }
        Ok(index)
    }

    fn decode_nested_payload(
        &self,
        out: &mut Map<String, Value>,
        payload: &[u8],
        mut index: usize,
        name: &str,
        prop: &SchemaNode,
    ) -> Result<usize, JausBridgeError> {
        let jaus_type = require_jaus_type(prop, name)?;
        let size_raw = read_number(payload, index, jaus_type)?.as_int()?;
        index += jaus_type.size();
        let payload_size = usize::try_from(size_raw).map_err(|_| {
            JausBridgeError::InvalidValue(format!("negative payload size {size_raw}"))
        })?;
        if payload_size < 2 {
            return Ok(index);
        }

        // the discriminator is the nested message's own id field, so it is
        // peeked rather than consumed
        let inner_id = read_number(payload, index, JausType::UnsignedShortInteger)?.as_int()?;
        let inner_id_hex = format!("{inner_id:x}");
        let mut payload_obj = Map::new();
        payload_obj.insert(
            "payloadMessageId".to_string(),
            Value::from(inner_id_hex.clone()),
        );

        // an unknown or unparseable inner message still leaves its id in the
        // result and the outer walk keeps going
        match self.registry.get(&inner_id_hex) {
            Some(schemas) => {
                for schema in schemas {
                    debug!(
                        "parse payload message {}({inner_id_hex})",
                        schema.title.as_deref().unwrap_or("<untitled>")
                    );
                    let mut inner = Map::new();
                    if self.decode(&mut inner, payload, index, schema).is_ok() {
                        payload_obj.insert("payload".to_string(), Value::Object(inner));
                        break;
                    }
                }
            }
            None => warn!("No JSON schema for payload message {inner_id_hex}"),
        }
        out.insert(name.to_string(), Value::Object(payload_obj));
        Ok(index + payload_size)
    }
}

/// Presence vector bits: the first optional property after the vector gets
/// bit 0, required properties consume no bit.
fn generate_presence_vector(value: &Value, schema: &SchemaNode) -> u64 {
    let mut presence: u64 = 0;
    let mut bit: u64 = 0;
    if let Some(props) = &schema.properties {
        for (name, _prop) in props {
            if name == "presenceVector" {
                bit = 1;
            } else if !schema.is_required(name) {
                if value.get(name).is_some() {
                    presence |= bit;
                }
                bit <<= 1;
            }
        }
    }
    presence
}

fn require_jaus_type(prop: &SchemaNode, name: &str) -> Result<JausType, JausBridgeError> {
    prop.jaus_type.ok_or_else(|| {
        JausBridgeError::SchemaMismatch(format!("property {name} declares no jausType"))
    })
}

fn first_alternative<'s>(
    prop: &'s SchemaNode,
    name: &str,
) -> Result<&'s SchemaNode, JausBridgeError> {
    alternative_at(prop, name, 0)
}

fn alternative_at<'s>(
    prop: &'s SchemaNode,
    name: &str,
    index: usize,
) -> Result<&'s SchemaNode, JausBridgeError> {
    prop.items
        .as_ref()
        .and_then(|items| items.any_of.get(index))
        .ok_or_else(|| {
            JausBridgeError::SchemaMismatch(format!(
                "array {name} has no item schema at index {index}"
            ))
        })
}
