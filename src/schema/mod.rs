//! Table and index metadata consumed by the optimizer.
//!
//! A [`TableShare`] is the static description of one table: its columns and
//! its indexes in declaration order. Index ordinals ([`IndexId`]) are
//! positions in [`TableShare::keys`] and fix the enumeration order the
//! optimizer uses when costs tie.
#![forbid(unsafe_code)]

mod field;

pub use field::{
    datetime_from_seconds, temporal_seconds, Collation, Field, FieldType, StoreOutcome,
    TIMESTAMP_MAX,
};

use serde::{Deserialize, Serialize};

use crate::types::{FieldId, FieldSet, IndexId, RangeError, Result, Value, MAX_KEY};

/// Bytes of a row reference (rowid) appended to index entries.
pub const REF_LENGTH: u32 = 8;

/// One segment of an index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPart {
    /// Column this segment indexes.
    pub field: FieldId,
    /// Leading characters indexed for a partial (prefix) segment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_len: Option<u32>,
}

impl KeyPart {
    /// Full-column key part.
    pub fn new(field: FieldId) -> Self {
        Self {
            field,
            prefix_len: None,
        }
    }

    /// Key part covering only the first `len` characters.
    pub fn prefix(field: FieldId, len: u32) -> Self {
        Self {
            field,
            prefix_len: Some(len),
        }
    }

    /// True for partial segments, which cannot reproduce the column value.
    pub fn is_partial(&self) -> bool {
        self.prefix_len.is_some()
    }

    /// Key image of `value` as stored in this segment.
    pub fn image(&self, field: &Field, value: &Value) -> Value {
        match (self.prefix_len, field.key_image(value)) {
            (Some(len), Value::Str(s)) => Value::Str(s.chars().take(len as usize).collect()),
            (_, image) => image,
        }
    }
}

/// Index access method.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAlgorithm {
    /// Ordered tree; supports ranges and rowid-ordered point scans.
    #[default]
    Btree,
    /// Hash; point lookups return rows in no particular order.
    Hash,
}

/// Index definition plus statistics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyInfo {
    /// Index name, used in explain output.
    pub name: String,
    /// Segments in key order.
    pub parts: Vec<KeyPart>,
    /// Whether the index enforces uniqueness.
    #[serde(default)]
    pub unique: bool,
    /// Access method.
    #[serde(default)]
    pub algorithm: KeyAlgorithm,
    /// Engines may forbid rowid-ordered retrieval on an index.
    #[serde(default)]
    pub no_ror: bool,
    /// Average rows per distinct value of each key prefix; 0 when unknown.
    #[serde(default)]
    pub rec_per_key: Vec<u64>,
}

impl KeyInfo {
    /// Creates a non-unique B-tree index over `parts`.
    pub fn new(name: impl Into<String>, parts: Vec<KeyPart>) -> Self {
        Self {
            name: name.into(),
            parts,
            unique: false,
            algorithm: KeyAlgorithm::Btree,
            no_ror: false,
            rec_per_key: Vec::new(),
        }
    }

    /// Creates a B-tree index over whole columns.
    pub fn on(name: impl Into<String>, fields: &[FieldId]) -> Self {
        Self::new(name, fields.iter().copied().map(KeyPart::new).collect())
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn algorithm(mut self, algorithm: KeyAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn no_ror(mut self) -> Self {
        self.no_ror = true;
        self
    }

    pub fn rec_per_key(mut self, stats: Vec<u64>) -> Self {
        self.rec_per_key = stats;
        self
    }

    /// Statistic for the first `n_parts` parts; 0 when unknown.
    pub fn records_per_key(&self, n_parts: usize) -> u64 {
        n_parts
            .checked_sub(1)
            .and_then(|idx| self.rec_per_key.get(idx).copied())
            .unwrap_or(0)
    }

    /// Position of `field` among the key parts.
    pub fn part_of(&self, field: FieldId) -> Option<usize> {
        self.parts.iter().position(|p| p.field == field)
    }
}

/// Static description of one table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TableShare {
    /// Table name.
    pub name: String,
    /// Columns by ordinal.
    pub fields: Vec<Field>,
    /// Indexes in declaration order.
    pub keys: Vec<KeyInfo>,
    /// Ordinal of the primary key, if declared.
    #[serde(default)]
    pub primary_key: Option<IndexId>,
}

impl TableShare {
    /// Creates an empty table definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Appends a column; its ordinal is the current column count.
    pub fn with_field(mut self, name: impl Into<String>, ty: FieldType, nullable: bool) -> Self {
        let id = FieldId(self.fields.len() as u16);
        self.fields.push(Field::new(id, name, ty, nullable));
        self
    }

    /// Appends a secondary index.
    pub fn with_index(mut self, key: KeyInfo) -> Self {
        self.keys.push(key);
        self
    }

    /// Appends a unique index and marks it as the primary key.
    pub fn with_primary_key(mut self, key: KeyInfo) -> Self {
        self.primary_key = Some(IndexId(self.keys.len() as u16));
        self.keys.push(key.unique());
        self
    }

    pub fn field(&self, id: FieldId) -> &Field {
        &self.fields[id.0 as usize]
    }

    pub fn field_by_name(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn key(&self, id: IndexId) -> &KeyInfo {
        &self.keys[id.0 as usize]
    }

    /// Index ordinals in declaration order.
    pub fn key_ids(&self) -> impl Iterator<Item = IndexId> {
        (0..self.keys.len() as u16).map(IndexId)
    }

    /// Bytes one key part occupies in a key image, NULL indicator included.
    pub fn store_length(&self, part: &KeyPart) -> u32 {
        let field = self.field(part.field);
        let body = match (part.prefix_len, field.char_length()) {
            (Some(len), Some(_)) => len + 2,
            (Some(len), None) => len,
            (None, _) => field.pack_length(),
        };
        body + u32::from(field.nullable)
    }

    /// Total key image length of an index.
    pub fn key_length(&self, key: IndexId) -> u32 {
        self.key(key)
            .parts
            .iter()
            .map(|p| self.store_length(p))
            .sum()
    }

    /// Columns whose full value can be read from the index alone.
    pub fn key_fields(&self, key: IndexId) -> FieldSet {
        self.key(key)
            .parts
            .iter()
            .filter(|p| !p.is_partial())
            .map(|p| p.field)
            .collect()
    }

    /// Mean length of a stored row.
    pub fn mean_rec_length(&self) -> u32 {
        self.fields.iter().map(Field::pack_length).sum::<u32>().max(1)
    }

    /// Checks that every index references existing columns.
    pub fn validate(&self) -> Result<()> {
        if self.keys.len() > MAX_KEY {
            return Err(RangeError::InvalidArgument(format!(
                "table {} declares {} indexes, at most {MAX_KEY} are supported",
                self.name,
                self.keys.len()
            )));
        }
        for (idx, field) in self.fields.iter().enumerate() {
            if field.id.0 as usize != idx {
                return Err(RangeError::InvalidArgument(format!(
                    "field {} has ordinal {} but sits at position {idx}",
                    field.name, field.id.0
                )));
            }
        }
        for key in &self.keys {
            if key.parts.is_empty() {
                return Err(RangeError::InvalidArgument(format!(
                    "index {} has no key parts",
                    key.name
                )));
            }
            for part in &key.parts {
                if part.field.0 as usize >= self.fields.len() {
                    return Err(RangeError::UnknownField(format!(
                        "{} in index {}",
                        part.field, key.name
                    )));
                }
            }
        }
        if let Some(pk) = self.primary_key {
            if pk.0 as usize >= self.keys.len() {
                return Err(RangeError::UnknownIndex(pk.0));
            }
        }
        Ok(())
    }
}
