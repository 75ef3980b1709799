//! Validation of decoded messages against their expected shape.
use std::collections::BTreeMap;

use snafu::{OptionExt, Snafu};

use crate::bencode::Value;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum SchemaError {
    #[snafu(display("expected a dictionary"))]
    NotADict,

    #[snafu(display("missing field '{}'", field))]
    MissingField { field: String },

    #[snafu(display("field '{}' should be {}", field, expected))]
    WrongType {
        field: String,
        expected: &'static str,
    },

    #[snafu(display("unknown message type '{}'", tag))]
    UnknownTag { tag: String },

    #[snafu(display("field '{}' is out of range", field))]
    OutOfRange { field: String },
}

/// Something that travels as a bencoded value.
pub trait Payload: Sized {
    fn to_value(&self) -> Value;
    fn from_value(value: &Value) -> Result<Self, SchemaError>;
}

impl Payload for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }

    fn from_value(value: &Value) -> Result<Self, SchemaError> {
        Ok(value.clone())
    }
}

/// Typed access to the fields of a dictionary value.
#[derive(Debug, Clone, Copy)]
pub struct Fields<'a> {
    entries: &'a BTreeMap<String, Value>,
}

impl<'a> Fields<'a> {
    pub fn of(value: &'a Value) -> Result<Self, SchemaError> {
        let entries = value.as_dict().context(NotADictSnafu)?;
        Ok(Fields { entries })
    }

    /// The `type` field that discriminates tagged unions.
    pub fn tag(&self) -> Result<&'a str, SchemaError> {
        self.text("type")
    }

    pub fn get(&self, field: &str) -> Result<&'a Value, SchemaError> {
        self.entries
            .get(field)
            .context(MissingFieldSnafu { field })
    }

    /// The field's value, or `None` when it is absent.
    pub fn opt(&self, field: &str) -> Option<&'a Value> {
        self.entries.get(field)
    }

    pub fn text(&self, field: &str) -> Result<&'a str, SchemaError> {
        self.get(field)?.as_str().context(WrongTypeSnafu {
            field,
            expected: "text",
        })
    }

    pub fn opt_text(&self, field: &str) -> Result<Option<&'a str>, SchemaError> {
        match self.opt(field) {
            None => Ok(None),
            Some(value) => value.as_str().map(Some).context(WrongTypeSnafu {
                field,
                expected: "text",
            }),
        }
    }

    pub fn integer(&self, field: &str) -> Result<i64, SchemaError> {
        self.get(field)?.as_integer().context(WrongTypeSnafu {
            field,
            expected: "an integer",
        })
    }

    pub fn list(&self, field: &str) -> Result<&'a [Value], SchemaError> {
        self.get(field)?.as_list().context(WrongTypeSnafu {
            field,
            expected: "a list",
        })
    }

    pub fn dict(&self, field: &str) -> Result<Fields<'a>, SchemaError> {
        let entries = self.get(field)?.as_dict().context(WrongTypeSnafu {
            field,
            expected: "a dictionary",
        })?;
        Ok(Fields { entries })
    }

    pub fn entries(&self) -> &'a BTreeMap<String, Value> {
        self.entries
    }
}
