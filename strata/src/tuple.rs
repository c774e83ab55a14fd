//! Field values, schemas and their fixed-width binary encoding.

use std::fmt;
use std::hash::{Hash, Hasher};

use bytes::{Buf, BufMut};

use crate::page::PageId;

/// Payload bytes reserved for every string field.
pub const STRING_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Str,
}

impl Type {
    /// Width of an encoded field of this type.
    pub fn len(&self) -> usize {
        match self {
            Type::Int => 4,
            Type::Str => 4 + STRING_LEN,
        }
    }

    pub fn decode(&self, buf: &mut impl Buf) -> Field {
        match self {
            Type::Int => Field::Int(buf.get_i32()),
            Type::Str => {
                let len = (buf.get_u32() as usize).min(STRING_LEN);
                let mut payload = [0u8; STRING_LEN];
                buf.copy_to_slice(&mut payload);
                Field::Str(String::from_utf8_lossy(&payload[..len]).into_owned())
            }
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "INT"),
            Type::Str => write!(f, "STRING"),
        }
    }
}

/// A single typed value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Int(i32),
    Str(String),
}

impl Field {
    pub fn field_type(&self) -> Type {
        match self {
            Field::Int(_) => Type::Int,
            Field::Str(_) => Type::Str,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Field::Int(v) => Some(*v),
            Field::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Field::Int(_) => None,
            Field::Str(s) => Some(s),
        }
    }

    /// Writes exactly `self.field_type().len()` bytes. Strings longer than
    /// `STRING_LEN` bytes are cut at the last char boundary that fits.
    pub fn encode(&self, buf: &mut impl BufMut) {
        match self {
            Field::Int(v) => buf.put_i32(*v),
            Field::Str(s) => {
                let mut end = s.len().min(STRING_LEN);
                while !s.is_char_boundary(end) {
                    end -= 1;
                }
                buf.put_u32(end as u32);
                buf.put_slice(&s.as_bytes()[..end]);
                buf.put_bytes(0, STRING_LEN - end);
            }
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{v}"),
            Field::Str(s) => write!(f, "{s}"),
        }
    }
}

/// Location of a tuple: page plus slot number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: u32,
}

impl RecordId {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

#[derive(Debug, Clone)]
pub struct TdItem {
    pub field_type: Type,
    pub name: String,
}

/// Ordered list of typed, named columns. Equality ignores names.
#[derive(Debug, Clone, Default)]
pub struct TupleDesc {
    items: Vec<TdItem>,
}

impl TupleDesc {
    pub fn new(types: &[Type], names: &[&str]) -> Self {
        let items = types
            .iter()
            .enumerate()
            .map(|(i, t)| TdItem {
                field_type: *t,
                name: names.get(i).map(|n| n.to_string()).unwrap_or_default(),
            })
            .collect();
        Self { items }
    }

    /// Schema with unnamed columns.
    pub fn from_types(types: &[Type]) -> Self {
        Self::new(types, &[])
    }

    pub fn from_items(items: Vec<TdItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[TdItem] {
        &self.items
    }

    pub fn num_fields(&self) -> usize {
        self.items.len()
    }

    pub fn field_type(&self, i: usize) -> Option<Type> {
        self.items.get(i).map(|item| item.field_type)
    }

    pub fn field_name(&self, i: usize) -> Option<&str> {
        self.items.get(i).map(|item| item.name.as_str())
    }

    /// Index of the first column called `name`.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.items.iter().position(|item| item.name == name)
    }

    /// Encoded width of one tuple.
    pub fn byte_size(&self) -> usize {
        self.items.iter().map(|item| item.field_type.len()).sum()
    }

    /// Concatenation of two schemas, `left` columns first.
    pub fn merge(left: &TupleDesc, right: &TupleDesc) -> TupleDesc {
        let mut items = left.items.clone();
        items.extend(right.items.iter().cloned());
        TupleDesc { items }
    }

    /// Whether `tuple` has exactly this schema's field types.
    pub fn conforms(&self, tuple: &Tuple) -> bool {
        self.items.len() == tuple.fields.len()
            && self
                .items
                .iter()
                .zip(&tuple.fields)
                .all(|(item, field)| item.field_type == field.field_type())
    }

    pub fn encode(&self, tuple: &Tuple, buf: &mut impl BufMut) {
        for field in &tuple.fields {
            field.encode(buf);
        }
    }

    pub fn decode(&self, mut buf: &[u8]) -> Tuple {
        let fields = self
            .items
            .iter()
            .map(|item| item.field_type.decode(&mut buf))
            .collect();
        Tuple::new(fields)
    }
}

impl PartialEq for TupleDesc {
    fn eq(&self, other: &Self) -> bool {
        self.items.len() == other.items.len()
            && self
                .items
                .iter()
                .zip(&other.items)
                .all(|(a, b)| a.field_type == b.field_type)
    }
}

impl Eq for TupleDesc {}

impl Hash for TupleDesc {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for item in &self.items {
            item.field_type.hash(state);
        }
    }
}

impl fmt::Display for TupleDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cols: Vec<String> = self
            .items
            .iter()
            .map(|item| format!("{}({})", item.field_type, item.name))
            .collect();
        write!(f, "{}", cols.join(", "))
    }
}

/// A row of field values, plus its location once it lives on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    pub fields: Vec<Field>,
    pub record_id: Option<RecordId>,
}

impl Tuple {
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            fields,
            record_id: None,
        }
    }

    pub fn field(&self, i: usize) -> Option<&Field> {
        self.fields.get(i)
    }

    pub fn with_record_id(mut self, rid: RecordId) -> Self {
        self.record_id = Some(rid);
        self
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cols: Vec<String> = self.fields.iter().map(|v| v.to_string()).collect();
        write!(f, "{}", cols.join("\t"))
    }
}
