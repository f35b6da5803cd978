//! Canonical argument encoding and `task_id` derivation.
//!
//! A task's construction attributes (its "argument record") are normalised
//! into a [`CanonValue`] tree, serialised to framed bytes, and digested with
//! BLAKE2b-128 to produce a stable `task_id`. Framing is explicit per
//! variant so that a sequence can never collide with a mapping that happens
//! to serialize to the same bytes (the "tuple/list collision" the spec
//! calls out).

use std::collections::BTreeMap;

use blake2::{Blake2b, Digest, digest::consts::U16};
use thiserror::Error;

/// A canonicalised leaf or container value making up an argument record.
///
/// Mappings are stored in a [`BTreeMap`] so key order never affects the
/// encoded bytes; sequences preserve insertion order since it is meaningful.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(u64), // bits of an f64, so CanonValue can implement Eq/Hash-friendly comparisons
    Str(String),
    Bytes(Vec<u8>),
    Seq(Vec<CanonValue>),
    Map(BTreeMap<String, CanonValue>),
    /// A future leaf, replaced at encode time per spec #4.3: `Task` futures
    /// carry their `task_name`/`task_id`, `Const` futures carry their value
    /// directly, `MappedFuture` carries its base identity plus key.
    FutureRef {
        name_or_const: String,
        id_or_value: Vec<u8>,
    },
}

impl CanonValue {
    pub fn float(value: f64) -> Self {
        CanonValue::Float(value.to_bits())
    }
}

/// The argument record declared by a task at construction time: every
/// instance attribute reachable by the user's builder, excluding any
/// attribute whose name begins with `task_` (reserved for class-level
/// metadata per spec #4.3).
#[derive(Debug, Clone, Default)]
pub struct ArgRecord {
    fields: BTreeMap<String, CanonValue>,
}

impl ArgRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field of the argument record. Panics are not used here:
    /// a reserved name is an [`ArgumentError`], surfaced synchronously to
    /// the caller building the record, never deferred to run time.
    pub fn field(
        mut self,
        name: impl Into<String>,
        value: CanonValue,
    ) -> Result<Self, ArgumentError> {
        let name = name.into();
        if name.starts_with("task_") {
            return Err(ArgumentError::ReservedName { name });
        }
        self.fields.insert(name, value);
        Ok(self)
    }

    pub fn as_canon(&self) -> CanonValue {
        CanonValue::Map(self.fields.clone())
    }
}

#[derive(Debug, Error)]
pub enum ArgumentError {
    #[error("attribute name `{name}` is reserved (task_ prefix is reserved for task metadata)")]
    ReservedName { name: String },
    #[error("value for `{field}` is not representable in the canonical argument encoding")]
    Unrepresentable { field: String },
}

/// One byte of framing per [`CanonValue`] variant, written ahead of its
/// payload so that sequences and mappings can never collide in the encoded
/// byte stream regardless of their contents.
mod tag {
    pub const NULL: u8 = 0;
    pub const BOOL: u8 = 1;
    pub const INT: u8 = 2;
    pub const FLOAT: u8 = 3;
    pub const STR: u8 = 4;
    pub const BYTES: u8 = 5;
    pub const SEQ: u8 = 6;
    pub const MAP: u8 = 7;
    pub const FUTURE_REF: u8 = 8;
}

fn write_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    buf.extend_from_slice(bytes);
}

/// Serialise a [`CanonValue`] into framed canonical bytes.
pub fn encode_canonical(value: &CanonValue, buf: &mut Vec<u8>) {
    match value {
        CanonValue::Null => buf.push(tag::NULL),
        CanonValue::Bool(b) => {
            buf.push(tag::BOOL);
            buf.push(*b as u8);
        }
        CanonValue::Int(i) => {
            buf.push(tag::INT);
            buf.extend_from_slice(&i.to_le_bytes());
        }
        CanonValue::Float(bits) => {
            buf.push(tag::FLOAT);
            buf.extend_from_slice(&bits.to_le_bytes());
        }
        CanonValue::Str(s) => {
            buf.push(tag::STR);
            write_len_prefixed(buf, s.as_bytes());
        }
        CanonValue::Bytes(b) => {
            buf.push(tag::BYTES);
            write_len_prefixed(buf, b);
        }
        CanonValue::Seq(items) => {
            buf.push(tag::SEQ);
            buf.extend_from_slice(&(items.len() as u64).to_le_bytes());
            for item in items {
                encode_canonical(item, buf);
            }
        }
        CanonValue::Map(fields) => {
            buf.push(tag::MAP);
            buf.extend_from_slice(&(fields.len() as u64).to_le_bytes());
            // BTreeMap iterates in sorted key order already, which is the
            // canonicalisation rule #4.3 requires.
            for (key, val) in fields {
                write_len_prefixed(buf, key.as_bytes());
                encode_canonical(val, buf);
            }
        }
        CanonValue::FutureRef {
            name_or_const,
            id_or_value,
        } => {
            buf.push(tag::FUTURE_REF);
            write_len_prefixed(buf, name_or_const.as_bytes());
            write_len_prefixed(buf, id_or_value);
        }
    }
}

/// A fixed-width, hex-rendered digest of a task's canonical argument record.
pub type TaskId = String;

/// Derive the `task_id` for a task of the given `task_name` from its
/// canonicalised argument record.
pub fn task_id(task_name: &str, args: &ArgRecord) -> TaskId {
    let mut buf = Vec::new();
    // Mix in task_name so that two distinct task types with identical
    // argument records never collide in a shared cache.
    write_len_prefixed(&mut buf, task_name.as_bytes());
    encode_canonical(&args.as_canon(), &mut buf);

    let mut hasher = Blake2b::<U16>::new();
    hasher.update(&buf);
    hex::encode(hasher.finalize())
}

/// Render the canonical argument record as human-readable JSON for the
/// `task_args` external view (spec #6) and for the `args_json` field
/// persisted in each cache entry's `meta.json`. Distinct framing of
/// sequences vs. mappings is preserved via an explicit `"kind"` tag rather
/// than inferred from JSON structure, per the closing of the tuple/list
/// ambiguity. Not gated behind `json-codec`: the cache layer's metadata
/// side-file is always JSON regardless of which codec a task uses for its
/// own output value.
pub fn args_json(args: &ArgRecord) -> serde_json::Value {
    canon_to_json(&args.as_canon())
}

fn canon_to_json(value: &CanonValue) -> serde_json::Value {
    use serde_json::json;
    match value {
        CanonValue::Null => serde_json::Value::Null,
        CanonValue::Bool(b) => json!(b),
        CanonValue::Int(i) => json!(i),
        CanonValue::Float(bits) => json!(f64::from_bits(*bits)),
        CanonValue::Str(s) => json!(s),
        CanonValue::Bytes(b) => json!({"kind": "bytes", "hex": hex::encode(b)}),
        CanonValue::Seq(items) => {
            json!({"kind": "seq", "items": items.iter().map(canon_to_json).collect::<Vec<_>>()})
        }
        CanonValue::Map(fields) => {
            let obj: serde_json::Map<String, serde_json::Value> = fields
                .iter()
                .map(|(k, v)| (k.clone(), canon_to_json(v)))
                .collect();
            json!({"kind": "map", "fields": obj})
        }
        CanonValue::FutureRef {
            name_or_const,
            id_or_value,
        } => json!({
            "__future__": name_or_const,
            "__id__": hex::encode(id_or_value),
        }),
    }
}

/// Bridges a concrete value type into the canonical encoding used for
/// identity and argument-record purposes. Implemented for the primitive
/// types a `Const` future is expected to wrap; container types delegate to
/// their elements' implementations.
pub trait ToCanon {
    fn to_canon(&self) -> CanonValue;
}

impl ToCanon for CanonValue {
    fn to_canon(&self) -> CanonValue {
        self.clone()
    }
}

impl ToCanon for bool {
    fn to_canon(&self) -> CanonValue {
        CanonValue::Bool(*self)
    }
}

impl ToCanon for i64 {
    fn to_canon(&self) -> CanonValue {
        CanonValue::Int(*self)
    }
}

impl ToCanon for u64 {
    fn to_canon(&self) -> CanonValue {
        CanonValue::Int(*self as i64)
    }
}

impl ToCanon for f64 {
    fn to_canon(&self) -> CanonValue {
        CanonValue::float(*self)
    }
}

impl ToCanon for String {
    fn to_canon(&self) -> CanonValue {
        CanonValue::Str(self.clone())
    }
}

impl ToCanon for Vec<u8> {
    fn to_canon(&self) -> CanonValue {
        CanonValue::Bytes(self.clone())
    }
}

impl<T: ToCanon> ToCanon for Vec<T> {
    fn to_canon(&self) -> CanonValue {
        CanonValue::Seq(self.iter().map(ToCanon::to_canon).collect())
    }
}

impl<T: ToCanon> ToCanon for Option<T> {
    fn to_canon(&self) -> CanonValue {
        match self {
            Some(v) => v.to_canon(),
            None => CanonValue::Null,
        }
    }
}
