use std::fmt::{self, Display};

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Argument field type
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Bool,
    Int32,
    Int64,
    Double,
    String,
    Array,
    /// Nested document
    Table,
}

impl FieldType {
    pub fn matches(self, value: &Bson) -> bool {
        matches!(
            (self, value),
            (FieldType::Bool, Bson::Boolean(_))
                | (FieldType::Int32, Bson::Int32(_))
                | (FieldType::Int64, Bson::Int64(_))
                | (FieldType::Double, Bson::Double(_))
                | (FieldType::String, Bson::String(_))
                | (FieldType::Array, Bson::Array(_))
                | (FieldType::Table, Bson::Document(_))
        )
    }
}

impl Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
}

impl Field {
    pub fn optional(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_owned(),
            field_type,
            required: false,
        }
    }

    pub fn required(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_owned(),
            field_type,
            required: true,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ArgumentError {
    #[error("Required argument `{0}` is missing")]
    Missing(String),
    #[error("Argument `{field}` must be {expected}, got {found}")]
    WrongType {
        field: String,
        expected: FieldType,
        found: String,
    },
}

/// Method argument schema.
///
/// [Policy::parse] keeps only the fields the policy knows about. Anything else
/// the caller sent is dropped. `Null` values are treated as absent fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Policy {
    fields: Vec<Field>,
}

impl Policy {
    pub fn new(fields: impl IntoIterator<Item = Field>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Validate `args` against the policy. Returns a document holding only the policy fields
    pub fn parse(&self, args: &Document) -> Result<Document, ArgumentError> {
        let mut result = Document::new();

        for field in &self.fields {
            match args.get(&field.name) {
                None | Some(Bson::Null) => {
                    if field.required {
                        return Err(ArgumentError::Missing(field.name.clone()));
                    }
                }
                Some(value) if field.field_type.matches(value) => {
                    result.insert(field.name.clone(), value.clone());
                }
                Some(value) => {
                    return Err(ArgumentError::WrongType {
                        field: field.name.clone(),
                        expected: field.field_type,
                        found: format!("{:?}", value.element_type()),
                    })
                }
            }
        }

        Ok(result)
    }
}
