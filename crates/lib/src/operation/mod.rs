//! The operation record and its text wire format.
//!
//! An operation is written on the wire as
//!
//! ```text
//! type$id#version@time|author.method:params
//! ```
//!
//! `version` and `time` are base-32 integers using the digits `0-9a-v`, and `params`
//! is JSON (or empty when the operation carries none). The six characters `$ # @ | . :`
//! are delimiters and may not appear in the type, id, author or method fields, which
//! the builder enforces so that every operation survives a round trip.
//!
//! Two operations are the same operation when their wire forms are equal; that is the
//! key used for de-duplication throughout the engine and the bundled sources.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

mod errors;

pub use errors::OperationError;

use crate::Result;

/// Characters that separate wire fields.
pub const DELIMITERS: [char; 6] = ['$', '#', '@', '|', '.', ':'];

/// Method name of the built-in state synchronization operation.
pub const SYNC: &str = "sync";

/// Method name of the built-in terminal delete operation.
pub const DELETE: &str = "delete";

/// Version of an entity that has not applied any operation yet.
pub const INIT_VERSION: i64 = -1;

/// One state transition of one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    kind: String,
    id: String,
    version: i64,
    time: u64,
    author: String,
    method: String,
    #[serde(default)]
    params: Value,
}

impl Operation {
    /// Start building an operation for entity `id` of variant `kind`.
    pub fn builder(kind: impl Into<String>, id: impl Into<String>) -> OperationBuilder {
        OperationBuilder {
            kind: kind.into(),
            id: id.into(),
            version: 0,
            time: 0,
            author: String::new(),
            method: String::new(),
            params: Value::Null,
        }
    }

    /// Parse wire text.
    ///
    /// Fields are split off left to right at the first occurrence of each delimiter in
    /// turn; whatever remains after the `:` is the params JSON. An empty remainder means
    /// the operation has no params.
    pub fn parse(text: &str) -> Result<Self> {
        let mut rest = text;
        let kind = shift(&mut rest, '$', text)?;
        let id = shift(&mut rest, '#', text)?;
        let version = shift(&mut rest, '@', text)?;
        let time = shift(&mut rest, '|', text)?;
        let author = shift(&mut rest, '.', text)?;
        let method = shift(&mut rest, ':', text)?;

        let version = i64::from_str_radix(version, 32).map_err(|e| OperationError::Malformed {
            reason: format!("bad version {version:?}: {e}"),
        })?;
        let time = u64::from_str_radix(time, 32).map_err(|e| OperationError::Malformed {
            reason: format!("bad time {time:?}: {e}"),
        })?;
        let params = if rest.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(rest).map_err(|e| OperationError::InvalidParams { source: e })?
        };

        Ok(Self {
            kind: kind.to_string(),
            id: id.to_string(),
            version,
            time,
            author: author.to_string(),
            method: method.to_string(),
            params,
        })
    }

    /// Variant name of the entity this operation belongs to.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// Producer wall clock, milliseconds since the Unix epoch.
    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Params, `Value::Null` when the operation carries none.
    pub fn params(&self) -> &Value {
        &self.params
    }

    pub fn has_params(&self) -> bool {
        !self.params.is_null()
    }

    /// A `sync` with no params: a request for state rather than a state change.
    pub fn is_sync_request(&self) -> bool {
        self.method == SYNC && !self.has_params()
    }

    /// Key that matches an operation with its acknowledgment.
    ///
    /// Type and id are left out because a continuation is always looked up on the
    /// entity that owns it.
    pub fn continuation_hash(&self) -> String {
        format!(
            "{}@{}|{}.{}",
            encode_i64(self.version),
            encode_u64(self.time),
            self.author,
            self.method
        )
    }

    /// Wire text for this operation.
    pub fn to_wire(&self) -> String {
        self.to_string()
    }

    /// Replace the params, keeping every other field.
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub(crate) fn set_params(&mut self, params: Value) {
        self.params = params;
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}${}#{}@{}|{}.{}:",
            self.kind,
            self.id,
            encode_i64(self.version),
            encode_u64(self.time),
            self.author,
            self.method
        )?;
        if !self.params.is_null() {
            write!(f, "{}", self.params)?;
        }
        Ok(())
    }
}

impl FromStr for Operation {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        Operation::parse(s)
    }
}

impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl Eq for Operation {}

/// Builder for [`Operation`], validating the name fields on [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct OperationBuilder {
    kind: String,
    id: String,
    version: i64,
    time: u64,
    author: String,
    method: String,
    params: Value,
}

impl OperationBuilder {
    pub fn version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    pub fn time(mut self, time: u64) -> Self {
        self.time = time;
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    /// Finish the operation.
    ///
    /// Fails when type, id, author or method contain a delimiter.
    pub fn build(self) -> Result<Operation> {
        check_field("type", &self.kind)?;
        check_field("id", &self.id)?;
        check_field("author", &self.author)?;
        check_field("method", &self.method)?;
        Ok(Operation {
            kind: self.kind,
            id: self.id,
            version: self.version,
            time: self.time,
            author: self.author,
            method: self.method,
            params: self.params,
        })
    }
}

/// Reject a name that would break the wire format.
pub fn check_field(field: &'static str, value: &str) -> Result<()> {
    if value.contains(DELIMITERS) {
        return Err(OperationError::ReservedDelimiter {
            field,
            value: value.to_string(),
        }
        .into());
    }
    Ok(())
}

/// Split `rest` at the first `delimiter`, returning the field before it.
fn shift<'a>(rest: &mut &'a str, delimiter: char, text: &str) -> Result<&'a str> {
    let (head, tail) = rest
        .split_once(delimiter)
        .ok_or_else(|| OperationError::Malformed {
            reason: format!("missing '{delimiter}' in {text:?}"),
        })?;
    *rest = tail;
    Ok(head)
}

const DIGITS: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

fn encode_u64(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::with_capacity(13);
    while value > 0 {
        out.push(DIGITS[(value % 32) as usize]);
        value /= 32;
    }
    out.reverse();
    // Only ASCII digits were pushed.
    String::from_utf8(out).unwrap_or_default()
}

fn encode_i64(value: i64) -> String {
    if value < 0 {
        format!("-{}", encode_u64(value.unsigned_abs()))
    } else {
        encode_u64(value as u64)
    }
}
