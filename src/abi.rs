//! ABI decoding
//!
//! `AbiDecoder` turns raw call data and raw logs into named, structured
//! arguments for a contract ABI loaded at runtime. Every type string in
//! the ABI is resolved when the decoder is built, so an ABI with an unknown
//! type is rejected up front instead of failing mid-scan.
//!
//! Decoded values are returned as `AbiValue`, a closed value model whose
//! JSON form renders byte strings as `0x` hex and addresses checksummed.

use crate::types::Log;
use alloy_dyn_abi::{DynSolType, DynSolValue, Specifier};
use alloy_json_abi::{JsonAbi, Param};
use alloy_primitives::{Address, B256, I256, U256};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while building a decoder.
#[derive(Debug, Error)]
pub enum AbiError {
    #[error("Invalid ABI JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Unsupported type '{ty}' in {item}: {source}")]
    UnknownType {
        item: String,
        ty: String,
        #[source]
        source: alloy_dyn_abi::Error,
    },
}

/// Errors raised while decoding a single call or log.
///
/// These are never fatal for a scan: the offending item is reported and skipped.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Input data too short to contain a function selector ({0} bytes)")]
    InputTooShort(usize),

    #[error("Function selector 0x{} not found in ABI", hex::encode(.0))]
    UnknownSelector([u8; 4]),

    #[error("Log has no topics, cannot identify event")]
    NoTopics,

    #[error("Event signature {0} not found in ABI")]
    UnknownTopic(B256),

    #[error("Event {event} expects {expected} topics, log has {actual}")]
    TopicCountMismatch {
        event: String,
        expected: usize,
        actual: usize,
    },

    #[error("Log is pending (missing block number, transaction hash or log index)")]
    PendingLog,

    #[error("Failed to decode data: {0}")]
    Malformed(#[from] alloy_dyn_abi::Error),
}

/// A call or log that could not be decoded, as reported to the error handler.
#[derive(Debug)]
pub struct DecodeFailure {
    pub block_number: Option<u64>,
    pub transaction_hash: Option<B256>,
    /// Set for logs only
    pub log_index: Option<u64>,
    pub error: DecodeError,
}

/// Callback invoked for every skipped call or log.
pub type DecodeErrorHandler = Arc<dyn Fn(&DecodeFailure) + Send + Sync>;

/// Handler that logs the failure and moves on.
pub fn warn_on_decode_failure() -> DecodeErrorHandler {
    Arc::new(|failure: &DecodeFailure| {
        tracing::warn!(
            block = ?failure.block_number,
            tx_hash = ?failure.transaction_hash,
            log_index = ?failure.log_index,
            error = %failure.error,
            "Skipping undecodable item"
        );
    })
}

/// Leaf values of a decoded argument tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scalar {
    Bool(bool),
    Address(Address),
    Uint(U256),
    Int(I256),
    String(String),
}

/// A decoded ABI value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    Scalar(Scalar),
    /// Dynamic and fixed-size byte strings, and hashed indexed topics
    Bytes(Vec<u8>),
    /// Arrays and unnamed tuples
    Sequence(Vec<AbiValue>),
    /// Tuples with named components, in declaration order
    Mapping(Vec<(String, AbiValue)>),
}

impl AbiValue {
    /// Serialization-safe JSON form.
    ///
    /// Integers that fit in 64 bits become JSON numbers, larger ones become
    /// decimal strings. Bytes become `0x`-prefixed hex.
    pub fn to_json(&self) -> Value {
        match self {
            AbiValue::Scalar(scalar) => scalar_to_json(scalar),
            AbiValue::Bytes(bytes) => Value::String(format!("0x{}", hex::encode(bytes))),
            AbiValue::Sequence(items) => Value::Array(items.iter().map(AbiValue::to_json).collect()),
            AbiValue::Mapping(fields) => Value::Object(fields_to_json(fields)),
        }
    }
}

fn scalar_to_json(scalar: &Scalar) -> Value {
    match scalar {
        Scalar::Bool(b) => Value::Bool(*b),
        Scalar::Address(a) => Value::String(a.to_checksum(None)),
        Scalar::Uint(u) => match u64::try_from(*u) {
            Ok(v) => Value::Number(Number::from(v)),
            Err(_) => Value::String(u.to_string()),
        },
        Scalar::Int(i) => match i.to_string().parse::<i64>() {
            Ok(v) => Value::Number(Number::from(v)),
            Err(_) => Value::String(i.to_string()),
        },
        Scalar::String(s) => Value::String(s.clone()),
    }
}

/// Render named arguments as a JSON object.
pub fn fields_to_json(fields: &[(String, AbiValue)]) -> Map<String, Value> {
    fields
        .iter()
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect()
}

/// Component layout of a parameter, used to name tuple fields.
#[derive(Debug, Clone)]
enum Shape {
    Leaf,
    Array(Box<Shape>),
    Tuple(Vec<(String, Shape)>),
}

impl Shape {
    fn of(ty: &str, components: &[Param]) -> Shape {
        if ty.ends_with(']') {
            if let Some(open) = ty.rfind('[') {
                return Shape::Array(Box::new(Shape::of(&ty[..open], components)));
            }
        }
        if ty.starts_with("tuple") || ty.starts_with('(') {
            return Shape::Tuple(
                components
                    .iter()
                    .enumerate()
                    .map(|(i, c)| (param_name(&c.name, i), Shape::of(&c.ty, &c.components)))
                    .collect(),
            );
        }
        Shape::Leaf
    }
}

fn param_name(name: &str, position: usize) -> String {
    if name.is_empty() {
        format!("arg{}", position)
    } else {
        name.to_string()
    }
}

/// Convert a decoded dynamic value, naming tuple components after `shape`.
fn convert(value: DynSolValue, shape: &Shape) -> AbiValue {
    match value {
        DynSolValue::Bool(b) => AbiValue::Scalar(Scalar::Bool(b)),
        DynSolValue::Address(a) => AbiValue::Scalar(Scalar::Address(a)),
        DynSolValue::Uint(u, _) => AbiValue::Scalar(Scalar::Uint(u)),
        DynSolValue::Int(i, _) => AbiValue::Scalar(Scalar::Int(i)),
        DynSolValue::String(s) => AbiValue::Scalar(Scalar::String(s)),
        DynSolValue::Bytes(b) => AbiValue::Bytes(b),
        DynSolValue::FixedBytes(word, size) => AbiValue::Bytes(word[..size.min(32)].to_vec()),
        DynSolValue::Function(f) => AbiValue::Bytes(f.as_slice().to_vec()),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => {
            let inner = match shape {
                Shape::Array(inner) => inner.as_ref(),
                _ => &Shape::Leaf,
            };
            AbiValue::Sequence(items.into_iter().map(|v| convert(v, inner)).collect())
        }
        DynSolValue::Tuple(items) => match shape {
            Shape::Tuple(fields) if fields.len() == items.len() => AbiValue::Mapping(
                fields
                    .iter()
                    .zip(items)
                    .map(|((name, field_shape), v)| (name.clone(), convert(v, field_shape)))
                    .collect(),
            ),
            _ => AbiValue::Sequence(items.into_iter().map(|v| convert(v, &Shape::Leaf)).collect()),
        },
        #[allow(unreachable_patterns)]
        other => AbiValue::Bytes(other.abi_encode()),
    }
}

/// A decoded function call.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedInput {
    pub name: String,
    pub args: Vec<(String, AbiValue)>,
}

impl DecodedInput {
    pub fn args_json(&self) -> Map<String, Value> {
        fields_to_json(&self.args)
    }
}

/// A decoded event log.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLog {
    pub name: String,
    /// Indexed and non-indexed fields, in declaration order
    pub args: Vec<(String, AbiValue)>,
}

impl DecodedLog {
    pub fn args_json(&self) -> Map<String, Value> {
        fields_to_json(&self.args)
    }
}

struct FunctionEntry {
    name: String,
    inputs: DynSolType,
    params: Vec<(String, Shape)>,
}

struct EventField {
    name: String,
    indexed: bool,
    ty: DynSolType,
    shape: Shape,
}

struct EventEntry {
    name: String,
    fields: Vec<EventField>,
    body: DynSolType,
    indexed_count: usize,
}

/// Decoder for the functions and events of one ABI.
pub struct AbiDecoder {
    functions: HashMap<[u8; 4], FunctionEntry>,
    events: HashMap<B256, EventEntry>,
}

impl AbiDecoder {
    /// Build a decoder, resolving every parameter type of the ABI.
    pub fn new(abi: &JsonAbi) -> Result<Self, AbiError> {
        if let Some(constructor) = &abi.constructor {
            for param in &constructor.inputs {
                resolve_param(param, "constructor")?;
            }
        }

        let mut functions = HashMap::new();
        for function in abi.functions() {
            let mut types = Vec::with_capacity(function.inputs.len());
            let mut params = Vec::with_capacity(function.inputs.len());
            for (i, param) in function.inputs.iter().enumerate() {
                types.push(resolve_param(param, &function.name)?);
                params.push((param_name(&param.name, i), Shape::of(&param.ty, &param.components)));
            }
            // Outputs are never decoded but must still name real types
            for param in &function.outputs {
                resolve_param(param, &function.name)?;
            }
            functions.insert(
                function.selector().0,
                FunctionEntry {
                    name: function.name.clone(),
                    inputs: DynSolType::Tuple(types),
                    params,
                },
            );
        }

        let mut events = HashMap::new();
        for event in abi.events() {
            let mut fields = Vec::with_capacity(event.inputs.len());
            for (i, param) in event.inputs.iter().enumerate() {
                let ty = param.resolve().map_err(|source| AbiError::UnknownType {
                    item: event.name.clone(),
                    ty: param.ty.clone(),
                    source,
                })?;
                fields.push(EventField {
                    name: param_name(&param.name, i),
                    indexed: param.indexed,
                    ty,
                    shape: Shape::of(&param.ty, &param.components),
                });
            }
            // Anonymous events carry no signature topic and cannot be matched
            if event.anonymous {
                continue;
            }
            let body = DynSolType::Tuple(
                fields
                    .iter()
                    .filter(|f| !f.indexed)
                    .map(|f| f.ty.clone())
                    .collect(),
            );
            let indexed_count = fields.iter().filter(|f| f.indexed).count();
            events.insert(
                event.selector(),
                EventEntry {
                    name: event.name.clone(),
                    fields,
                    body,
                    indexed_count,
                },
            );
        }

        tracing::debug!(
            functions = functions.len(),
            events = events.len(),
            "Built ABI decoder"
        );

        Ok(Self { functions, events })
    }

    /// Parse ABI JSON and build a decoder.
    pub fn from_json(json: &str) -> Result<Self, AbiError> {
        let abi: JsonAbi = serde_json::from_str(json)?;
        Self::new(&abi)
    }

    /// topic0 hashes of every non-anonymous event, sorted.
    pub fn event_signatures(&self) -> Vec<B256> {
        let mut signatures: Vec<B256> = self.events.keys().copied().collect();
        signatures.sort();
        signatures
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Decode call data into a function name and named arguments.
    pub fn decode_function_call(&self, input: &[u8]) -> Result<DecodedInput, DecodeError> {
        if input.len() < 4 {
            return Err(DecodeError::InputTooShort(input.len()));
        }
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&input[..4]);

        let function = self
            .functions
            .get(&selector)
            .ok_or(DecodeError::UnknownSelector(selector))?;

        let values = match function.inputs.abi_decode_params(&input[4..])? {
            DynSolValue::Tuple(values) => values,
            other => vec![other],
        };

        let args = function
            .params
            .iter()
            .zip(values)
            .map(|((name, shape), value)| (name.clone(), convert(value, shape)))
            .collect();

        Ok(DecodedInput {
            name: function.name.clone(),
            args,
        })
    }

    /// Decode a mined log into an event name and named fields.
    ///
    /// Indexed reference types (strings, bytes, arrays, tuples) are only
    /// present as their hash, so they decode to the raw topic bytes.
    pub fn decode_log(&self, log: &Log) -> Result<DecodedLog, DecodeError> {
        if log.block_number.is_none() || log.transaction_hash.is_none() || log.log_index.is_none() {
            return Err(DecodeError::PendingLog);
        }

        let signature = log.topics.first().ok_or(DecodeError::NoTopics)?;
        let event = self
            .events
            .get(signature)
            .ok_or(DecodeError::UnknownTopic(*signature))?;

        if log.topics.len() != event.indexed_count + 1 {
            return Err(DecodeError::TopicCountMismatch {
                event: event.name.clone(),
                expected: event.indexed_count + 1,
                actual: log.topics.len(),
            });
        }

        let body = match event.body.abi_decode_sequence(&log.data)? {
            DynSolValue::Tuple(values) => values,
            other => vec![other],
        };

        let mut topics = log.topics[1..].iter();
        let mut body = body.into_iter();
        let mut args = Vec::with_capacity(event.fields.len());
        for field in &event.fields {
            let value = if field.indexed {
                let Some(topic) = topics.next() else {
                    break;
                };
                if is_hashed_when_indexed(&field.ty) {
                    AbiValue::Bytes(topic.to_vec())
                } else {
                    convert(field.ty.abi_decode(topic.as_slice())?, &field.shape)
                }
            } else {
                let Some(value) = body.next() else {
                    break;
                };
                convert(value, &field.shape)
            };
            args.push((field.name.clone(), value));
        }

        Ok(DecodedLog {
            name: event.name.clone(),
            args,
        })
    }
}

fn resolve_param(param: &Param, item: &str) -> Result<DynSolType, AbiError> {
    param.resolve().map_err(|source| AbiError::UnknownType {
        item: item.to_string(),
        ty: param.ty.clone(),
        source,
    })
}

fn is_hashed_when_indexed(ty: &DynSolType) -> bool {
    matches!(
        ty,
        DynSolType::String
            | DynSolType::Bytes
            | DynSolType::Array(_)
            | DynSolType::FixedArray(_, _)
            | DynSolType::Tuple(_)
    )
}
