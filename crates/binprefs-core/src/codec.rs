//! Binary record codec for binprefs values
//!
//! Every record is a 1-byte type flag followed by a kind-specific payload:
//!
//! ```text
//! fixed kinds:    [flag][big-endian payload of fixed width]
//! string / bytes: [flag][len: u32 BE][bytes]
//! string set:     [flag][count: u32 BE] { [len: u32 BE][utf-8] } * count
//! persistable:    [flag][len: u32 BE][bytes from Persistable::encode]
//! ```
//!
//! The set of kinds is closed. A [`CodecRegistry`] maps each [`Kind`] to
//! exactly one flag byte and back; a table that assigns one flag twice is
//! rejected when the registry is built.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::{PrefsError, PrefsResult};

pub const FLAG_STRING_SET: u8 = 0xFF;
pub const FLAG_STRING: u8 = 0xFE;
pub const FLAG_INT: u8 = 0xFD;
pub const FLAG_LONG: u8 = 0xFC;
pub const FLAG_FLOAT: u8 = 0xFB;
pub const FLAG_DOUBLE: u8 = 0xFA;
pub const FLAG_BOOL: u8 = 0xF9;
pub const FLAG_CHAR: u8 = 0xF6;
pub const FLAG_BYTES: u8 = 0xF5;
pub const FLAG_PERSISTABLE: u8 = 0x01;

/// Size of the length/count prefix used by variable kinds
const LEN_PREFIX: usize = 4;

/// Value kinds understood by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Bool,
    Char,
    Int,
    Long,
    Float,
    Double,
    String,
    StringSet,
    Bytes,
    Persistable,
}

/// Flag assignment used unless the configuration overrides it.
pub const DEFAULT_FLAGS: [(Kind, u8); Kind::COUNT] = [
    (Kind::Bool, FLAG_BOOL),
    (Kind::Char, FLAG_CHAR),
    (Kind::Int, FLAG_INT),
    (Kind::Long, FLAG_LONG),
    (Kind::Float, FLAG_FLOAT),
    (Kind::Double, FLAG_DOUBLE),
    (Kind::String, FLAG_STRING),
    (Kind::StringSet, FLAG_STRING_SET),
    (Kind::Bytes, FLAG_BYTES),
    (Kind::Persistable, FLAG_PERSISTABLE),
];

const fn default_flags_unique() -> bool {
    let mut i = 0;
    while i < DEFAULT_FLAGS.len() {
        let mut j = i + 1;
        while j < DEFAULT_FLAGS.len() {
            if DEFAULT_FLAGS[i].1 == DEFAULT_FLAGS[j].1 {
                return false;
            }
            j += 1;
        }
        i += 1;
    }
    true
}

const _: () = assert!(default_flags_unique(), "default codec flags must be unique");

impl Kind {
    pub const COUNT: usize = 10;

    pub const ALL: [Kind; Kind::COUNT] = [
        Kind::Bool,
        Kind::Char,
        Kind::Int,
        Kind::Long,
        Kind::Float,
        Kind::Double,
        Kind::String,
        Kind::StringSet,
        Kind::Bytes,
        Kind::Persistable,
    ];

    /// Total record length (flag included) for fixed-size kinds.
    pub const fn fixed_len(self) -> Option<usize> {
        match self {
            Kind::Bool => Some(2),
            Kind::Char => Some(3),
            Kind::Int | Kind::Float => Some(5),
            Kind::Long | Kind::Double => Some(9),
            Kind::String | Kind::StringSet | Kind::Bytes | Kind::Persistable => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Kind::Bool => "bool",
            Kind::Char => "char",
            Kind::Int => "i32",
            Kind::Long => "i64",
            Kind::Float => "f32",
            Kind::Double => "f64",
            Kind::String => "string",
            Kind::StringSet => "string set",
            Kind::Bytes => "bytes",
            Kind::Persistable => "persistable",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded value of any supported kind.
///
/// `Persistable` holds the bytes produced by the object's own encoder; use
/// [`Value::persistable`] to build one and [`Persistable::decode`] to read it.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Char(char),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    StringSet(BTreeSet<String>),
    Bytes(Vec<u8>),
    Persistable(Vec<u8>),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Bool(_) => Kind::Bool,
            Value::Char(_) => Kind::Char,
            Value::Int(_) => Kind::Int,
            Value::Long(_) => Kind::Long,
            Value::Float(_) => Kind::Float,
            Value::Double(_) => Kind::Double,
            Value::String(_) => Kind::String,
            Value::StringSet(_) => Kind::StringSet,
            Value::Bytes(_) => Kind::Bytes,
            Value::Persistable(_) => Kind::Persistable,
        }
    }

    /// Encode an object through its own [`Persistable`] implementation.
    pub fn persistable<T: Persistable>(value: &T) -> Self {
        Value::Persistable(value.encode())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Value::Bool(v) }
}

impl From<char> for Value {
    fn from(v: char) -> Self { Value::Char(v) }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self { Value::Int(v) }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self { Value::Long(v) }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self { Value::Float(v) }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self { Value::Double(v) }
}

impl From<String> for Value {
    fn from(v: String) -> Self { Value::String(v) }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self { Value::String(v.to_owned()) }
}

impl From<BTreeSet<String>> for Value {
    fn from(v: BTreeSet<String>) -> Self { Value::StringSet(v) }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self { Value::Bytes(v) }
}

/// Object values that know their own binary encoding.
///
/// `decode` receives exactly the bytes `encode` produced. Returning an error
/// (typically [`PrefsError::malformed`] with [`Kind::Persistable`]) makes the
/// getter report it and fall back to the caller's default.
pub trait Persistable: Sized {
    fn encode(&self) -> Vec<u8>;

    fn decode(bytes: &[u8]) -> PrefsResult<Self>;
}

/// Fixed table between kinds and flag bytes.
#[derive(Debug, Clone)]
pub struct CodecRegistry {
    flags: [u8; Kind::COUNT],
    kinds: [Option<Kind>; 256],
}

impl CodecRegistry {
    /// Registry using [`DEFAULT_FLAGS`].
    pub fn standard() -> Self {
        let mut flags = [0u8; Kind::COUNT];
        let mut kinds = [None; 256];
        for (kind, flag) in DEFAULT_FLAGS {
            flags[kind.index()] = flag;
            kinds[flag as usize] = Some(kind);
        }
        Self { flags, kinds }
    }

    /// Build a registry from an explicit table.
    ///
    /// Every kind must appear exactly once and no flag may be shared.
    pub fn from_table(table: &[(Kind, u8)]) -> PrefsResult<Self> {
        let mut assigned: [Option<u8>; Kind::COUNT] = [None; Kind::COUNT];
        let mut kinds = [None; 256];

        for &(kind, flag) in table {
            if let Some(owner) = kinds[flag as usize] {
                return Err(PrefsError::Configuration(format!(
                    "flag 0x{:02x} registered for both {} and {}",
                    flag, owner, kind
                )));
            }
            if let Some(previous) = assigned[kind.index()] {
                return Err(PrefsError::Configuration(format!(
                    "{} registered twice (flags 0x{:02x} and 0x{:02x})",
                    kind, previous, flag
                )));
            }
            assigned[kind.index()] = Some(flag);
            kinds[flag as usize] = Some(kind);
        }

        let mut flags = [0u8; Kind::COUNT];
        for kind in Kind::ALL {
            flags[kind.index()] = assigned[kind.index()].ok_or_else(|| {
                PrefsError::Configuration(format!("no flag registered for {}", kind))
            })?;
        }

        Ok(Self { flags, kinds })
    }

    pub fn flag_for(&self, kind: Kind) -> u8 {
        self.flags[kind.index()]
    }

    pub fn kind_for_flag(&self, flag: u8) -> PrefsResult<Kind> {
        self.kinds[flag as usize].ok_or(PrefsError::UnknownFlag { flag })
    }

    /// Kind of an encoded record, read from its flag byte only.
    pub fn kind_of(&self, record: &[u8]) -> PrefsResult<Kind> {
        let flag = *record.first().ok_or(PrefsError::EmptyRecord)?;
        self.kind_for_flag(flag)
    }

    /// Serialize a value into its record.
    pub fn encode(&self, value: &Value) -> PrefsResult<Vec<u8>> {
        let kind = value.kind();
        let flag = self.flag_for(kind);

        let record = match value {
            Value::Bool(v) => vec![flag, u8::from(*v)],
            Value::Char(c) => {
                let unit = u16::try_from(u32::from(*c)).map_err(|_| PrefsError::Encode {
                    kind,
                    reason: format!("U+{:04X} does not fit in one UTF-16 code unit", u32::from(*c)),
                })?;
                fixed(flag, &unit.to_be_bytes())
            }
            Value::Int(v) => fixed(flag, &v.to_be_bytes()),
            Value::Long(v) => fixed(flag, &v.to_be_bytes()),
            Value::Float(v) => fixed(flag, &v.to_bits().to_be_bytes()),
            Value::Double(v) => fixed(flag, &v.to_bits().to_be_bytes()),
            Value::String(s) => {
                let mut buf = Vec::with_capacity(1 + LEN_PREFIX + s.len());
                buf.push(flag);
                put_chunk(&mut buf, kind, s.as_bytes())?;
                buf
            }
            Value::StringSet(set) => {
                let body: usize = set.iter().map(|s| LEN_PREFIX + s.len()).sum();
                let mut buf = Vec::with_capacity(1 + LEN_PREFIX + body);
                buf.push(flag);
                buf.extend_from_slice(&len_u32(kind, set.len())?.to_be_bytes());
                for member in set {
                    put_chunk(&mut buf, kind, member.as_bytes())?;
                }
                buf
            }
            Value::Bytes(bytes) | Value::Persistable(bytes) => {
                let mut buf = Vec::with_capacity(1 + LEN_PREFIX + bytes.len());
                buf.push(flag);
                put_chunk(&mut buf, kind, bytes)?;
                buf
            }
        };

        Ok(record)
    }

    /// Decode a record, dispatching on its flag byte.
    ///
    /// Bytes past the end of the declared payload are ignored.
    pub fn decode(&self, record: &[u8]) -> PrefsResult<Value> {
        let kind = self.kind_of(record)?;
        if let Some(needed) = kind.fixed_len() {
            if record.len() < needed {
                return Err(PrefsError::Truncated {
                    kind,
                    needed,
                    available: record.len(),
                });
            }
        }
        let mut reader = RecordReader::new(kind, record);

        let value = match kind {
            Kind::Bool => match reader.take(1)?[0] {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => {
                    return Err(PrefsError::malformed(kind, format!("boolean byte {}", other)))
                }
            },
            Kind::Char => {
                let unit = u16::from_be_bytes(reader.array()?);
                let c = char::from_u32(u32::from(unit)).ok_or_else(|| {
                    PrefsError::malformed(kind, format!("lone surrogate 0x{:04x}", unit))
                })?;
                Value::Char(c)
            }
            Kind::Int => Value::Int(i32::from_be_bytes(reader.array()?)),
            Kind::Long => Value::Long(i64::from_be_bytes(reader.array()?)),
            Kind::Float => Value::Float(f32::from_bits(u32::from_be_bytes(reader.array()?))),
            Kind::Double => Value::Double(f64::from_bits(u64::from_be_bytes(reader.array()?))),
            Kind::String => Value::String(reader.utf8_chunk()?),
            Kind::StringSet => {
                let count = reader.u32()? as usize;
                let mut set = BTreeSet::new();
                for _ in 0..count {
                    let member = reader.utf8_chunk()?;
                    if !set.insert(member) {
                        return Err(PrefsError::malformed(kind, "duplicate set member"));
                    }
                }
                Value::StringSet(set)
            }
            Kind::Bytes => Value::Bytes(reader.chunk()?.to_vec()),
            Kind::Persistable => Value::Persistable(reader.chunk()?.to_vec()),
        };

        Ok(value)
    }

    /// Decode a record the caller expects to be of `requested` kind.
    pub fn decode_as(&self, record: &[u8], requested: Kind) -> PrefsResult<Value> {
        let stored = self.kind_of(record)?;
        if stored != requested {
            return Err(PrefsError::KindMismatch { requested, stored });
        }
        self.decode(record)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self { Self::standard() }
}

fn fixed(flag: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + payload.len());
    buf.push(flag);
    buf.extend_from_slice(payload);
    buf
}

fn len_u32(kind: Kind, len: usize) -> PrefsResult<u32> {
    u32::try_from(len).map_err(|_| PrefsError::Encode {
        kind,
        reason: format!("length {} exceeds u32::MAX", len),
    })
}

fn put_chunk(buf: &mut Vec<u8>, kind: Kind, bytes: &[u8]) -> PrefsResult<()> {
    buf.extend_from_slice(&len_u32(kind, bytes.len())?.to_be_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Bounds-checked reader over a record, positioned after the flag byte.
struct RecordReader<'a> {
    kind: Kind,
    record: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    fn new(kind: Kind, record: &'a [u8]) -> Self {
        Self { kind, record, pos: 1 }
    }

    fn take(&mut self, n: usize) -> PrefsResult<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(PrefsError::Truncated {
            kind: self.kind,
            needed: usize::MAX,
            available: self.record.len(),
        })?;
        if end > self.record.len() {
            return Err(PrefsError::Truncated {
                kind: self.kind,
                needed: end,
                available: self.record.len(),
            });
        }
        let slice = &self.record[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> PrefsResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u32(&mut self) -> PrefsResult<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn chunk(&mut self) -> PrefsResult<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn utf8_chunk(&mut self) -> PrefsResult<String> {
        let bytes = self.chunk()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| PrefsError::malformed(self.kind, format!("invalid UTF-8: {}", e)))
    }
}
