//! Row shape, rows and command outcomes.
//!
//! - [`FieldDescription`]
//! - [`RowShape`]
//! - [`Row`]
//! - [`CommandOutcome`]
use bytes::Bytes;
use std::{fmt, str::Utf8Error, sync::Arc};

use crate::{
    common::ByteStr,
    ext::BytesExt,
    postgres::{Oid, PgFormat, ProtocolError, backend},
};

/// One result column as described by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    /// The field name.
    pub name: ByteStr,
    /// If the field can be identified as a column of a specific table, the object ID of the
    /// table; otherwise zero.
    pub table_oid: Oid,
    /// If the field can be identified as a column of a specific table, the attribute number
    /// of the column; otherwise zero.
    pub column_id: i16,
    /// The object ID of the field's data type.
    pub type_oid: Oid,
    /// The data type size (see pg_type.typlen). Note that negative values denote variable-width types.
    pub type_size: i16,
    /// The type modifier (see pg_attribute.atttypmod). The meaning of the modifier is type-specific.
    pub type_modifier: i32,
    /// The format code being used for the field.
    pub format: PgFormat,
}

/// Shared, immutable list of result columns.
#[derive(Clone, PartialEq, Eq)]
pub struct RowShape {
    fields: Arc<[FieldDescription]>,
}

impl RowShape {
    /// Decode `RowDescription`.
    pub fn decode(desc: backend::RowDescription) -> Result<RowShape, ProtocolError> {
        let mut body = desc.body;
        let mut fields = Vec::with_capacity(desc.field_len as usize);
        for _ in 0..desc.field_len {
            let name = body.get_nul_bytestr()?;
            let table_oid = body.try_u32()?;
            let column_id = body.try_i16()?;
            let type_oid = body.try_u32()?;
            let type_size = body.try_i16()?;
            let type_modifier = body.try_i32()?;
            let Some(format) = PgFormat::from_code(body.try_u16()?) else {
                return Err(ProtocolError::malformed("unknown format code"));
            };
            fields.push(FieldDescription {
                name, table_oid, column_id, type_oid, type_size, type_modifier, format,
            });
        }
        Ok(Self { fields: fields.into() })
    }

    pub fn empty() -> RowShape {
        Self { fields: Arc::new([]) }
    }

    pub fn fields(&self) -> &[FieldDescription] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn oids(&self) -> impl ExactSizeIterator<Item = Oid> + '_ {
        self.fields.iter().map(|f| f.type_oid)
    }

    /// Same columns with the formats requested in `Bind`.
    ///
    /// `formats` follows the `Bind` rule: empty is all text, one entry applies to all.
    pub(crate) fn with_formats(&self, formats: &[PgFormat]) -> RowShape {
        let format_of = |i: usize| match formats {
            [] => PgFormat::Text,
            [one] => *one,
            many => many.get(i).copied().unwrap_or_default(),
        };
        if self.fields.iter().enumerate().all(|(i, f)| f.format == format_of(i)) {
            return self.clone();
        }
        let fields = self
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| FieldDescription { format: format_of(i), ..f.clone() })
            .collect();
        Self { fields }
    }
}

impl std::ops::Deref for RowShape {
    type Target = [FieldDescription];

    fn deref(&self) -> &Self::Target {
        &self.fields
    }
}

impl fmt::Debug for RowShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.fields.iter().map(|e| &e.name)).finish()
    }
}

/// Postgres row.
pub struct Row {
    shape: Option<RowShape>,
    values: Vec<Option<Bytes>>,
    byte_len: usize,
}

impl Row {
    /// Decode `DataRow` against the shape of its result set, if known.
    pub(crate) fn decode(row: backend::DataRow, shape: Option<&RowShape>) -> Result<Row, ProtocolError> {
        if let Some(shape) = shape {
            if shape.len() != row.column_len as usize {
                return Err(ProtocolError::malformed("DataRow length differ from RowDescription"));
            }
        }

        let byte_len = row.body.len();
        let mut body = row.body;
        let mut values = Vec::with_capacity(row.column_len as usize);
        for _ in 0..row.column_len {
            let value = match body.try_i32()? {
                -1 => None,
                len if len < 0 => return Err(ProtocolError::malformed("negative value length")),
                len => Some(body.try_split_to(len as usize)?),
            };
            values.push(value);
        }

        Ok(Self { shape: shape.cloned(), values, byte_len })
    }

    /// Returns `true` if row contains no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Size of the row on the wire.
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    pub fn shape(&self) -> Option<&RowShape> {
        self.shape.as_ref()
    }

    /// Raw column value, `None` for NULL or out of range index.
    pub fn get(&self, idx: usize) -> Option<&[u8]> {
        self.values.get(idx).and_then(|e| e.as_deref())
    }

    /// Raw column value as `Bytes`, `None` for NULL or out of range index.
    pub fn get_bytes(&self, idx: usize) -> Option<Bytes> {
        self.values.get(idx).and_then(Clone::clone)
    }

    /// Column value as str, only meaningful for text format column.
    pub fn get_str(&self, idx: usize) -> Result<Option<&str>, Utf8Error> {
        self.get(idx).map(std::str::from_utf8).transpose()
    }

    pub fn is_null(&self, idx: usize) -> bool {
        matches!(self.values.get(idx), Some(None))
    }

    /// Wire format of a column, text when the shape is unknown.
    pub fn format(&self, idx: usize) -> PgFormat {
        self.shape
            .as_ref()
            .and_then(|e| e.get(idx))
            .map(|e| e.format)
            .unwrap_or_default()
    }

    pub fn into_values(self) -> Vec<Option<Bytes>> {
        self.values
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use crate::ext::FmtExt;
        let mut list = f.debug_list();
        for value in &self.values {
            match value {
                Some(v) => list.entry(&v.lossy()),
                None => list.entry(&"NULL"),
            };
        }
        list.finish()
    }
}

/// Outcome of a completed command, parsed from its command tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Full command tag, e.g. `INSERT 0 1`.
    pub tag: ByteStr,
    /// Rows affected or retrieved, for commands reporting it.
    pub rows: Option<u64>,
    /// Inserted row oid, always zero on servers without table oids.
    pub insert_oid: Option<Oid>,
}

impl CommandOutcome {
    pub fn parse(tag: ByteStr) -> CommandOutcome {
        let mut words = tag.split_ascii_whitespace();
        let command = words.next().unwrap_or_default();
        let (rows, insert_oid) = match command {
            "INSERT" => {
                let oid = words.next().and_then(|e| e.parse().ok());
                (words.next().and_then(|e| e.parse().ok()), oid)
            },
            "SELECT" | "UPDATE" | "DELETE" | "MERGE" | "MOVE" | "FETCH" | "COPY" => {
                (words.next().and_then(|e| e.parse().ok()), None)
            },
            _ => (None, None),
        };
        Self { tag, rows, insert_oid }
    }

    /// Outcome of an empty query string.
    pub fn empty() -> CommandOutcome {
        Self { tag: ByteStr::from_static(""), rows: None, insert_oid: None }
    }

    /// First word of the tag.
    pub fn command(&self) -> &str {
        self.tag.split_ascii_whitespace().next().unwrap_or_default()
    }

    /// `DEALLOCATE ALL` or `DISCARD ALL` drop every prepared statement of the session.
    pub(crate) fn drops_statements(&self) -> bool {
        matches!(&*self.tag, "DEALLOCATE ALL" | "DISCARD ALL")
    }
}
