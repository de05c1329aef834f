//! Header-data units: variant dispatch, body model, construction, and
//! verification.
//!
//! An [`Hdu`] ties a variant tag to a card deck and a body. The variant is
//! decided from mandatory keywords when they are present and from the shape
//! of the data otherwise; keywords win when both are supplied. Construction
//! synthesizes the mandatory card prefix from the body geometry, reusing
//! any cards the caller already wrote; verification repairs geometry cards
//! against the actual data before a write.

use std::collections::HashMap;

use tracing::warn;

use crate::bits::BitVec;
use crate::card::{Card, CardDeck};
use crate::dataform::{DataFormat, ElemType};
use crate::error::{Error, Result};
use crate::field::{
    ascii_fields_from_keys, binary_fields_from_keys, AsciiField, AsciiForm, BinaryField,
    FieldType, PtrType, TformSpec,
};
use crate::options::Options;
use crate::value::Value;

/// Keyword-to-value map extracted from a card deck, keys uppercased.
pub type KeyMap = HashMap<String, Value>;

// ── Keyword classification ──

const MANDATORY_BARE: &[&str] = &[
    "END", "SIMPLE", "XTENSION", "BITPIX", "GROUPS", "PCOUNT", "GCOUNT", "THEAP", "TFIELDS",
    "ZIMAGE", "ZTABLE", "ZBITPIX", "ZCMPTYPE", "ZPCOUNT", "ZGCOUNT", "ZTHEAP", "ZTENSION",
];

const MANDATORY_INDEXED: &[&str] = &["NAXIS", "TFORM", "TBCOL", "ZNAXIS", "ZTILE", "ZVAL", "ZNAME"];

const RESERVED_BARE: &[&str] = &[
    "DATE", "ORIGIN", "AUTHOR", "OBSERVER", "TELESCOP", "BSCALE", "BZERO", "BUNIT", "BLANK",
    "DATAMAX", "DATAMIN", "ZSIMPLE", "ZEXTEND", "ZBLOCKED", "ZQUANTIZ", "ZDITHER0", "ZDATASUM",
    "ZCHECKSUM",
];

const RESERVED_INDEXED: &[&str] = &[
    "TSCAL", "TZERO", "TNULL", "TTYPE", "TUNIT", "TDISP", "TDIM", "TDMAX", "TDMIN", "TLMAX",
    "TLMIN",
];

fn matches_indexed(key: &str, stems: &[&str]) -> bool {
    stems.iter().any(|stem| {
        key.strip_prefix(stem)
            .is_some_and(|rest| rest.chars().all(|c| c.is_ascii_digit()))
    })
}

/// Returns `true` if `key` (uppercase) is a mandatory structural keyword.
pub fn is_mandatory_key(key: &str) -> bool {
    MANDATORY_BARE.contains(&key) || matches_indexed(key, MANDATORY_INDEXED)
}

/// Returns `true` if `key` (uppercase) is a reserved annotation keyword.
pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_BARE.contains(&key) || matches_indexed(key, RESERVED_INDEXED)
}

fn collect_keys(deck: &CardDeck, pred: fn(&str) -> bool) -> KeyMap {
    let mut map = KeyMap::new();
    for card in deck.iter() {
        let upper = card.key.to_ascii_uppercase();
        if pred(&upper) && !map.contains_key(&upper) {
            map.insert(upper, card.value.clone());
        }
    }
    map
}

/// Extract the mandatory keywords of a deck into a side map.
pub fn mandatory_keys(deck: &CardDeck) -> KeyMap {
    collect_keys(deck, is_mandatory_key)
}

/// Extract the reserved keywords of a deck into a side map.
pub fn reserved_keys(deck: &CardDeck) -> KeyMap {
    collect_keys(deck, is_reserved_key)
}

// ── Variant tag ──

/// The concrete HDU variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HduKind {
    /// First HDU of a stream, SIMPLE = T.
    Primary,
    /// Random-groups primary (GROUPS = T, NAXIS1 = 0).
    Random,
    /// IMAGE extension.
    Image,
    /// ASCII TABLE extension.
    Table,
    /// BINTABLE extension.
    Bintable,
    /// Conforming extension with an unrecognized XTENSION name.
    Conform,
    /// Historical IUEIMAGE extension, laid out like an image.
    IueImage,
    /// Historical A3DTABLE extension, laid out like a binary table.
    A3dTable,
    /// FOREIGN file encapsulation, raw bytes.
    Foreign,
    /// DUMP extension, raw bytes.
    Dump,
    /// Tile-compressed image carried in a binary table (ZIMAGE = T).
    ZImage,
    /// Compressed table carried in a binary table (ZTABLE = T).
    ZTable,
}

impl HduKind {
    /// Decide the variant from optional data and an optional mandatory-key
    /// map. Keys win over data; with neither, the dispatch fails.
    pub fn detect(data: Option<&Body>, keys: Option<&KeyMap>) -> Result<HduKind> {
        if let Some(keys) = keys.filter(|m| !m.is_empty()) {
            if let Some(Value::String(x)) = keys.get("XTENSION") {
                return Ok(HduKind::from_xtension(x.trim_end(), keys));
            }
            if keys.get("SIMPLE").and_then(Value::as_bool) == Some(true) {
                let groups = keys.get("GROUPS").and_then(Value::as_bool) == Some(true);
                let naxis1_zero = keys.get("NAXIS1").and_then(Value::as_int) == Some(0);
                return Ok(if groups && naxis1_zero {
                    HduKind::Random
                } else {
                    HduKind::Primary
                });
            }
        }
        match data {
            Some(body) => HduKind::from_body(body),
            None => Err(Error::UnknownHdu),
        }
    }

    /// Map an XTENSION value onto a variant.
    fn from_xtension(name: &str, keys: &KeyMap) -> HduKind {
        match name {
            "IMAGE" => HduKind::Image,
            "TABLE" => HduKind::Table,
            "BINTABLE" => {
                if keys.get("ZIMAGE").and_then(Value::as_bool) == Some(true) {
                    HduKind::ZImage
                } else if keys.get("ZTABLE").and_then(Value::as_bool) == Some(true) {
                    HduKind::ZTable
                } else {
                    HduKind::Bintable
                }
            }
            "IUEIMAGE" => HduKind::IueImage,
            "A3DTABLE" => HduKind::A3dTable,
            "FOREIGN" => HduKind::Foreign,
            "DUMP" => HduKind::Dump,
            _ => HduKind::Conform,
        }
    }

    /// Dispatch by data shape alone.
    fn from_body(body: &Body) -> Result<HduKind> {
        match body {
            Body::Array(_) => Ok(HduKind::Primary),
            Body::Groups(_) => Ok(HduKind::Random),
            Body::Columns(cols) => {
                if !cols.is_empty()
                    && cols
                        .iter()
                        .all(|(_, col)| matches!(col, ColumnData::Text(_)))
                {
                    Ok(HduKind::Table)
                } else {
                    Ok(HduKind::Bintable)
                }
            }
            Body::Records(recs) => match recs.first() {
                Some(rec)
                    if !rec.fields.is_empty()
                        && rec.fields.iter().all(|(_, c)| matches!(c, Cell::Text(_))) =>
                {
                    Ok(HduKind::Table)
                }
                Some(_) => Ok(HduKind::Bintable),
                None => Ok(HduKind::Bintable),
            },
            Body::None => Err(Error::UnknownHdu),
        }
    }

    /// The XTENSION string for extension variants.
    pub fn xtension(self) -> Option<&'static str> {
        match self {
            HduKind::Image => Some("IMAGE"),
            HduKind::Table => Some("TABLE"),
            HduKind::Bintable | HduKind::ZImage | HduKind::ZTable => Some("BINTABLE"),
            HduKind::IueImage => Some("IUEIMAGE"),
            HduKind::A3dTable => Some("A3DTABLE"),
            HduKind::Foreign => Some("FOREIGN"),
            HduKind::Dump => Some("DUMP"),
            HduKind::Primary | HduKind::Random | HduKind::Conform => None,
        }
    }

    /// Variants whose body is a plain numeric array.
    pub fn is_image_like(self) -> bool {
        matches!(self, HduKind::Primary | HduKind::Image | HduKind::IueImage)
    }

    /// Variants whose body is binary-table records plus a heap.
    pub fn is_bintable_like(self) -> bool {
        matches!(
            self,
            HduKind::Bintable | HduKind::A3dTable | HduKind::ZImage | HduKind::ZTable
        )
    }

    /// Variants whose body is carried as raw bytes.
    pub fn is_opaque(self) -> bool {
        matches!(self, HduKind::Conform | HduKind::Foreign | HduKind::Dump)
    }
}

// ── Body model ──

/// Typed flat storage for a numeric array body.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    /// BITPIX 8 elements.
    UInt8(Vec<u8>),
    /// BITPIX 16 elements.
    Int16(Vec<i16>),
    /// BITPIX 32 elements.
    Int32(Vec<i32>),
    /// BITPIX 64 elements.
    Int64(Vec<i64>),
    /// BITPIX -32 elements.
    Float32(Vec<f32>),
    /// BITPIX -64 elements.
    Float64(Vec<f64>),
}

impl ArrayData {
    /// The element type of this storage.
    pub fn elem(&self) -> ElemType {
        match self {
            ArrayData::UInt8(_) => ElemType::UInt8,
            ArrayData::Int16(_) => ElemType::Int16,
            ArrayData::Int32(_) => ElemType::Int32,
            ArrayData::Int64(_) => ElemType::Int64,
            ArrayData::Float32(_) => ElemType::Float32,
            ArrayData::Float64(_) => ElemType::Float64,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            ArrayData::UInt8(v) => v.len(),
            ArrayData::Int16(v) => v.len(),
            ArrayData::Int32(v) => v.len(),
            ArrayData::Int64(v) => v.len(),
            ArrayData::Float32(v) => v.len(),
            ArrayData::Float64(v) => v.len(),
        }
    }

    /// Returns `true` if there are no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Zero-initialized storage of `n` elements.
    pub fn zeros(elem: ElemType, n: usize) -> ArrayData {
        match elem {
            ElemType::UInt8 => ArrayData::UInt8(vec![0; n]),
            ElemType::Int16 => ArrayData::Int16(vec![0; n]),
            ElemType::Int32 => ArrayData::Int32(vec![0; n]),
            ElemType::Int64 => ArrayData::Int64(vec![0; n]),
            ElemType::Float32 => ArrayData::Float32(vec![0.0; n]),
            ElemType::Float64 => ArrayData::Float64(vec![0.0; n]),
        }
    }
}

/// A multidimensional numeric array, innermost dimension first.
#[derive(Debug, Clone, PartialEq)]
pub struct NumArray {
    /// Flat element storage in axis order.
    pub data: ArrayData,
    /// Dimension tuple (NAXIS1, NAXIS2, ...).
    pub shape: Vec<usize>,
}

impl NumArray {
    /// Build an array, checking that the storage matches the shape.
    pub fn new(data: ArrayData, shape: Vec<usize>) -> Result<NumArray> {
        let expected: usize = if shape.is_empty() {
            0
        } else {
            shape.iter().product()
        };
        if data.len() != expected {
            return Err(Error::ShapeMismatch {
                expected: vec![expected],
                actual: vec![data.len()],
            });
        }
        Ok(NumArray { data, shape })
    }

    /// Zero-filled array of the given shape.
    pub fn zeros(elem: ElemType, shape: Vec<usize>) -> NumArray {
        let n = if shape.is_empty() {
            0
        } else {
            shape.iter().product()
        };
        NumArray {
            data: ArrayData::zeros(elem, n),
            shape,
        }
    }
}

/// One random group: the per-group parameters followed by the group array.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    /// Leading parameter elements (PCOUNT of them).
    pub params: ArrayData,
    /// The group's array.
    pub array: NumArray,
}

/// One field value of one table row.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// Logical elements.
    Logical(Vec<bool>),
    /// A bit-packed vector.
    Bits(BitVec),
    /// Unsigned byte elements.
    Bytes(Vec<u8>),
    /// 16-bit integer elements.
    Shorts(Vec<i16>),
    /// 32-bit integer elements.
    Ints(Vec<i32>),
    /// 64-bit integer elements.
    Longs(Vec<i64>),
    /// 32-bit float elements.
    Floats(Vec<f32>),
    /// 64-bit float elements.
    Doubles(Vec<f64>),
    /// Complex float elements.
    Complexes(Vec<(f32, f32)>),
    /// Complex double elements.
    DComplexes(Vec<(f64, f64)>),
    /// A character string.
    Text(String),
}

impl Cell {
    /// Number of elements in this cell (characters for text, bits for bit
    /// vectors).
    pub fn count(&self) -> usize {
        match self {
            Cell::Logical(v) => v.len(),
            Cell::Bits(b) => b.len(),
            Cell::Bytes(v) => v.len(),
            Cell::Shorts(v) => v.len(),
            Cell::Ints(v) => v.len(),
            Cell::Longs(v) => v.len(),
            Cell::Floats(v) => v.len(),
            Cell::Doubles(v) => v.len(),
            Cell::Complexes(v) => v.len(),
            Cell::DComplexes(v) => v.len(),
            Cell::Text(s) => s.len(),
        }
    }

    /// Zero value for a field of the given type and repeat count.
    pub fn zero(kind: FieldType, repeat: usize) -> Cell {
        match kind {
            FieldType::Logical => Cell::Logical(vec![false; repeat]),
            FieldType::Bit => Cell::Bits(BitVec::new(repeat)),
            FieldType::Byte => Cell::Bytes(vec![0; repeat]),
            FieldType::Short => Cell::Shorts(vec![0; repeat]),
            FieldType::Int => Cell::Ints(vec![0; repeat]),
            FieldType::Long => Cell::Longs(vec![0; repeat]),
            FieldType::Float => Cell::Floats(vec![0.0; repeat]),
            FieldType::Double => Cell::Doubles(vec![0.0; repeat]),
            FieldType::Complex => Cell::Complexes(vec![(0.0, 0.0); repeat]),
            FieldType::DoubleComplex => Cell::DComplexes(vec![(0.0, 0.0); repeat]),
            FieldType::Ascii => Cell::Text(String::new()),
        }
    }

    /// The field element type this cell carries.
    pub fn field_type(&self) -> FieldType {
        match self {
            Cell::Logical(_) => FieldType::Logical,
            Cell::Bits(_) => FieldType::Bit,
            Cell::Bytes(_) => FieldType::Byte,
            Cell::Shorts(_) => FieldType::Short,
            Cell::Ints(_) => FieldType::Int,
            Cell::Longs(_) => FieldType::Long,
            Cell::Floats(_) => FieldType::Float,
            Cell::Doubles(_) => FieldType::Double,
            Cell::Complexes(_) => FieldType::Complex,
            Cell::DComplexes(_) => FieldType::DoubleComplex,
            Cell::Text(_) => FieldType::Ascii,
        }
    }
}

/// One table row with by-name field access.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Field name and value pairs in declaration order.
    pub fields: Vec<(String, Cell)>,
}

impl Record {
    /// The first field with the given name.
    pub fn get(&self, name: &str) -> Option<&Cell> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }
}

/// One table column across all rows.
///
/// Fixed-repeat numeric columns are flattened (`repeat * rows` elements);
/// text, bit, and variable-length columns keep one entry per row.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    /// Logical column, flattened.
    Logical(Vec<bool>),
    /// Bit-vector column, one vector per row.
    Bits(Vec<BitVec>),
    /// Byte column, flattened.
    Bytes(Vec<u8>),
    /// 16-bit integer column, flattened.
    Shorts(Vec<i16>),
    /// 32-bit integer column, flattened.
    Ints(Vec<i32>),
    /// 64-bit integer column, flattened.
    Longs(Vec<i64>),
    /// 32-bit float column, flattened.
    Floats(Vec<f32>),
    /// 64-bit float column, flattened.
    Doubles(Vec<f64>),
    /// Complex float column, flattened.
    Complexes(Vec<(f32, f32)>),
    /// Complex double column, flattened.
    DComplexes(Vec<(f64, f64)>),
    /// String column, one string per row.
    Text(Vec<String>),
    /// Variable-length column, one cell per row.
    Var(Vec<Cell>),
}

impl ColumnData {
    /// Total stored entries (flattened elements, or rows for per-row kinds).
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Logical(v) => v.len(),
            ColumnData::Bits(v) => v.len(),
            ColumnData::Bytes(v) => v.len(),
            ColumnData::Shorts(v) => v.len(),
            ColumnData::Ints(v) => v.len(),
            ColumnData::Longs(v) => v.len(),
            ColumnData::Floats(v) => v.len(),
            ColumnData::Doubles(v) => v.len(),
            ColumnData::Complexes(v) => v.len(),
            ColumnData::DComplexes(v) => v.len(),
            ColumnData::Text(v) => v.len(),
            ColumnData::Var(v) => v.len(),
        }
    }

    /// Returns `true` if the column holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-row columns determine the row count directly.
    fn rows_if_per_row(&self) -> Option<usize> {
        match self {
            ColumnData::Bits(v) => Some(v.len()),
            ColumnData::Text(v) => Some(v.len()),
            ColumnData::Var(v) => Some(v.len()),
            _ => None,
        }
    }
}

/// The body of an HDU.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// No data follows the header.
    None,
    /// A multidimensional numeric array (Primary/Image), or raw bytes for
    /// opaque conforming extensions.
    Array(NumArray),
    /// Random-groups data.
    Groups(Vec<Group>),
    /// Table rows (record mode).
    Records(Vec<Record>),
    /// Table columns keyed by name (column mode).
    Columns(Vec<(String, ColumnData)>),
}

/// Field layout of a tabular HDU, or nothing for the other variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Fields {
    /// Non-tabular body.
    None,
    /// Binary-table columns.
    Binary(Vec<BinaryField>),
    /// ASCII-table columns.
    Ascii(Vec<AsciiField>),
}

impl Fields {
    /// Record length in bytes implied by the layout.
    pub fn record_len(&self) -> usize {
        match self {
            Fields::None => 0,
            Fields::Binary(fields) => fields.iter().map(|f| f.width()).sum(),
            Fields::Ascii(fields) => fields
                .iter()
                .map(|f| f.span().end)
                .max()
                .unwrap_or(0),
        }
    }
}

// ── Layout computation ──

/// Number of table rows held in a tabular body.
fn body_rows(fields: &[BinaryField], body: &Body) -> usize {
    match body {
        Body::Records(recs) => recs.len(),
        Body::Columns(cols) => column_rows(fields, cols),
        _ => 0,
    }
}

/// Row count of a column set: per-row columns answer directly; flattened
/// columns divide by the field's repeat count.
fn column_rows(fields: &[BinaryField], cols: &[(String, ColumnData)]) -> usize {
    for (_, col) in cols {
        if let Some(rows) = col.rows_if_per_row() {
            return rows;
        }
    }
    match (fields.first(), cols.first()) {
        (Some(f), Some((_, col))) if f.repeat > 0 => col.len() / f.repeat,
        (_, Some((_, col))) => col.len(),
        _ => 0,
    }
}

/// Total heap bytes needed by the variable-length columns of a body.
pub(crate) fn var_heap_bytes(fields: &[BinaryField], body: &Body) -> usize {
    let mut total = 0usize;
    match body {
        Body::Columns(cols) => {
            for (f, (_, col)) in fields.iter().zip(cols.iter()) {
                if f.pntr.is_some() {
                    if let ColumnData::Var(cells) = col {
                        total += cells
                            .iter()
                            .map(|c| f.kind.byte_len(c.count()))
                            .sum::<usize>();
                    }
                }
            }
        }
        Body::Records(recs) => {
            for rec in recs {
                for (f, (_, cell)) in fields.iter().zip(rec.fields.iter()) {
                    if f.pntr.is_some() {
                        total += f.kind.byte_len(cell.count());
                    }
                }
            }
        }
        _ => {}
    }
    total
}

/// Infer a binary field descriptor from a column's data.
fn spec_from_column(col: &ColumnData, rows: usize) -> TformSpec {
    let flattened_repeat = |len: usize| if rows == 0 { 0 } else { len / rows };
    let (repeat, pntr, kind, supp) = match col {
        ColumnData::Logical(v) => (flattened_repeat(v.len()), None, FieldType::Logical, None),
        ColumnData::Bits(v) => (
            v.first().map(|b| b.len()).unwrap_or(0),
            None,
            FieldType::Bit,
            None,
        ),
        ColumnData::Bytes(v) => (flattened_repeat(v.len()), None, FieldType::Byte, None),
        ColumnData::Shorts(v) => (flattened_repeat(v.len()), None, FieldType::Short, None),
        ColumnData::Ints(v) => (flattened_repeat(v.len()), None, FieldType::Int, None),
        ColumnData::Longs(v) => (flattened_repeat(v.len()), None, FieldType::Long, None),
        ColumnData::Floats(v) => (flattened_repeat(v.len()), None, FieldType::Float, None),
        ColumnData::Doubles(v) => (flattened_repeat(v.len()), None, FieldType::Double, None),
        ColumnData::Complexes(v) => (flattened_repeat(v.len()), None, FieldType::Complex, None),
        ColumnData::DComplexes(v) => (
            flattened_repeat(v.len()),
            None,
            FieldType::DoubleComplex,
            None,
        ),
        ColumnData::Text(v) => (
            v.iter().map(|s| s.len()).max().unwrap_or(0),
            None,
            FieldType::Ascii,
            None,
        ),
        ColumnData::Var(cells) => {
            let kind = cells
                .first()
                .map(|c| c.field_type())
                .unwrap_or(FieldType::Float);
            let max = cells.iter().map(|c| c.count()).max().unwrap_or(0);
            (1, Some(PtrType::P), kind, Some(format!("{}", max)))
        }
    };
    TformSpec {
        repeat,
        pntr,
        kind,
        supp,
    }
}

/// Infer a binary field descriptor from one cell of the first record.
fn spec_from_cell(cell: &Cell) -> TformSpec {
    TformSpec {
        repeat: cell.count(),
        pntr: None,
        kind: cell.field_type(),
        supp: None,
    }
}

/// Build binary field descriptors from a column-mode body.
pub(crate) fn binary_fields_from_columns(cols: &[(String, ColumnData)]) -> Vec<BinaryField> {
    let rows = cols
        .iter()
        .find_map(|(_, col)| col.rows_if_per_row())
        .or_else(|| cols.first().map(|(_, col)| col.len()))
        .unwrap_or(0);

    let mut fields = Vec::with_capacity(cols.len());
    let mut offset = 0usize;
    for (name, col) in cols {
        let spec = spec_from_column(col, rows);
        let field = BinaryField::from_spec(name.clone(), spec, offset);
        offset = field.span.end;
        fields.push(field);
    }
    fields
}

/// Build binary field descriptors from a record-mode body.
pub(crate) fn binary_fields_from_records(recs: &[Record]) -> Vec<BinaryField> {
    let Some(first) = recs.first() else {
        return Vec::new();
    };
    let mut fields = Vec::with_capacity(first.fields.len());
    let mut offset = 0usize;
    for (j, (name, cell)) in first.fields.iter().enumerate() {
        let mut spec = spec_from_cell(cell);
        let max = recs
            .iter()
            .filter_map(|r| r.fields.get(j).map(|(_, c)| c.count()))
            .max()
            .unwrap_or(0);
        let varies = recs
            .iter()
            .any(|r| r.fields.get(j).map(|(_, c)| c.count()) != Some(cell.count()));
        match spec.kind {
            // Strings and bit vectors of uneven length widen to the maximum.
            FieldType::Ascii | FieldType::Bit => spec.repeat = max,
            // A numeric field whose length varies across rows is a
            // variable-length column, stored through the heap.
            _ if varies => {
                spec.repeat = 1;
                spec.pntr = Some(PtrType::P);
                spec.supp = Some(format!("{}", max));
            }
            _ => {}
        }
        let field = BinaryField::from_spec(name.clone(), spec, offset);
        offset = field.span.end;
        fields.push(field);
    }
    fields
}

/// Build ASCII field descriptors from an all-text body.
pub(crate) fn ascii_fields_from_body(body: &Body) -> Vec<AsciiField> {
    let column_widths: Vec<(String, usize)> = match body {
        Body::Columns(cols) => cols
            .iter()
            .map(|(name, col)| {
                let w = match col {
                    ColumnData::Text(v) => v.iter().map(|s| s.len()).max().unwrap_or(0),
                    _ => 0,
                };
                (name.clone(), w.max(1))
            })
            .collect(),
        Body::Records(recs) => match recs.first() {
            Some(first) => first
                .fields
                .iter()
                .enumerate()
                .map(|(j, (name, _))| {
                    let w = recs
                        .iter()
                        .filter_map(|r| r.fields.get(j))
                        .map(|(_, c)| c.count())
                        .max()
                        .unwrap_or(0);
                    (name.clone(), w.max(1))
                })
                .collect(),
            None => Vec::new(),
        },
        _ => Vec::new(),
    };

    let mut fields = Vec::with_capacity(column_widths.len());
    let mut start = 0usize;
    for (name, width) in column_widths {
        fields.push(AsciiField {
            name,
            form: AsciiForm::Char(width),
            start,
        });
        start += width;
    }
    fields
}

/// Compute the layout of a body, given the already-decided variant.
pub(crate) fn layout_from_body(kind: HduKind, body: &Body) -> Result<(DataFormat, Fields)> {
    match body {
        Body::None => Ok((DataFormat::empty(default_elem(kind)), Fields::None)),
        Body::Array(arr) => {
            let prod = arr.data.len();
            Ok((
                DataFormat {
                    elem: arr.data.elem(),
                    len: prod,
                    shape: arr.shape.clone(),
                    param: 0,
                    group: 1,
                    heap: prod * arr.data.elem().byte_size(),
                },
                Fields::None,
            ))
        }
        Body::Groups(groups) => {
            let first = groups.first().ok_or(Error::UnknownHdu)?;
            let elem = first.array.data.elem();
            let shape = first.array.shape.clone();
            let param = first.params.len();
            let group = groups.len();
            let prod = first.array.data.len();
            Ok((
                DataFormat {
                    elem,
                    len: group * (param + prod),
                    shape,
                    param,
                    group,
                    heap: 0,
                },
                Fields::None,
            ))
        }
        Body::Records(_) | Body::Columns(_) => {
            if kind == HduKind::Table {
                let fields = ascii_fields_from_body(body);
                let record_len = fields.iter().map(|f| f.span().end).max().unwrap_or(0);
                let rows = match body {
                    Body::Records(recs) => recs.len(),
                    Body::Columns(cols) => {
                        cols.first().map(|(_, col)| col.len()).unwrap_or(0)
                    }
                    _ => 0,
                };
                Ok((
                    table_format(record_len, rows, 0),
                    Fields::Ascii(fields),
                ))
            } else {
                let fields = match body {
                    Body::Records(recs) => binary_fields_from_records(recs),
                    Body::Columns(cols) => binary_fields_from_columns(cols),
                    _ => Vec::new(),
                };
                let record_len: usize = fields.iter().map(|f| f.width()).sum();
                let rows = body_rows(&fields, body);
                let heap_bytes = var_heap_bytes(&fields, body);
                Ok((
                    table_format(record_len, rows, heap_bytes),
                    Fields::Binary(fields),
                ))
            }
        }
    }
}

/// Geometry of an ASCII table laid out by keyed field descriptors.
fn ascii_format(fields: &[AsciiField], body: &Body) -> DataFormat {
    let record_len = fields.iter().map(|f| f.span().end).max().unwrap_or(0);
    let rows = match body {
        Body::Records(recs) => recs.len(),
        Body::Columns(cols) => cols.first().map(|(_, col)| col.len()).unwrap_or(0),
        _ => 0,
    };
    table_format(record_len, rows, 0)
}

/// Tabular DataFormat: UInt8 elements, shape (record length, rows).
fn table_format(record_len: usize, rows: usize, heap_bytes: usize) -> DataFormat {
    let prod = record_len * rows;
    DataFormat {
        elem: ElemType::UInt8,
        len: prod + heap_bytes,
        shape: vec![record_len, rows],
        param: heap_bytes,
        group: 1,
        heap: prod,
    }
}

fn default_elem(kind: HduKind) -> ElemType {
    if kind.is_image_like() || kind == HduKind::Random {
        ElemType::Int32
    } else {
        ElemType::UInt8
    }
}

/// Compute the layout of an HDU from its header keys.
pub(crate) fn layout_from_keys(
    kind: HduKind,
    mandatory: &KeyMap,
    reserved: &KeyMap,
    opts: &Options,
) -> Result<(DataFormat, Fields)> {
    let df = DataFormat::from_keys(kind, mandatory)?;
    let fields = if kind.is_bintable_like() {
        Fields::Binary(binary_fields_from_keys(mandatory, reserved, opts.record)?)
    } else if kind == HduKind::Table {
        Fields::Ascii(ascii_fields_from_keys(mandatory, reserved, opts.record)?)
    } else {
        Fields::None
    };
    Ok((df, fields))
}

// ── Body mode conversion ──

/// Convert a record-mode body to column mode, following the field layout.
pub(crate) fn records_to_columns(
    fields: &[BinaryField],
    recs: &[Record],
) -> Vec<(String, ColumnData)> {
    fields
        .iter()
        .enumerate()
        .map(|(j, f)| {
            let cells = recs
                .iter()
                .filter_map(|r| r.fields.get(j).map(|(_, c)| c.clone()));
            let col = if f.pntr.is_some() {
                ColumnData::Var(cells.collect())
            } else {
                collect_cells(f.kind, cells)
            };
            (f.name.clone(), col)
        })
        .collect()
}

/// Flatten same-typed cells into one column.
fn collect_cells(kind: FieldType, cells: impl Iterator<Item = Cell>) -> ColumnData {
    match kind {
        FieldType::Logical => ColumnData::Logical(
            cells
                .flat_map(|c| match c {
                    Cell::Logical(v) => v,
                    _ => Vec::new(),
                })
                .collect(),
        ),
        FieldType::Bit => ColumnData::Bits(
            cells
                .filter_map(|c| match c {
                    Cell::Bits(b) => Some(b),
                    _ => None,
                })
                .collect(),
        ),
        FieldType::Byte => ColumnData::Bytes(
            cells
                .flat_map(|c| match c {
                    Cell::Bytes(v) => v,
                    _ => Vec::new(),
                })
                .collect(),
        ),
        FieldType::Short => ColumnData::Shorts(
            cells
                .flat_map(|c| match c {
                    Cell::Shorts(v) => v,
                    _ => Vec::new(),
                })
                .collect(),
        ),
        FieldType::Int => ColumnData::Ints(
            cells
                .flat_map(|c| match c {
                    Cell::Ints(v) => v,
                    _ => Vec::new(),
                })
                .collect(),
        ),
        FieldType::Long => ColumnData::Longs(
            cells
                .flat_map(|c| match c {
                    Cell::Longs(v) => v,
                    _ => Vec::new(),
                })
                .collect(),
        ),
        FieldType::Float => ColumnData::Floats(
            cells
                .flat_map(|c| match c {
                    Cell::Floats(v) => v,
                    _ => Vec::new(),
                })
                .collect(),
        ),
        FieldType::Double => ColumnData::Doubles(
            cells
                .flat_map(|c| match c {
                    Cell::Doubles(v) => v,
                    _ => Vec::new(),
                })
                .collect(),
        ),
        FieldType::Complex => ColumnData::Complexes(
            cells
                .flat_map(|c| match c {
                    Cell::Complexes(v) => v,
                    _ => Vec::new(),
                })
                .collect(),
        ),
        FieldType::DoubleComplex => ColumnData::DComplexes(
            cells
                .flat_map(|c| match c {
                    Cell::DComplexes(v) => v,
                    _ => Vec::new(),
                })
                .collect(),
        ),
        FieldType::Ascii => ColumnData::Text(
            cells
                .map(|c| match c {
                    Cell::Text(s) => s,
                    _ => String::new(),
                })
                .collect(),
        ),
    }
}

/// Extract row `row` of a flattened (or per-row) column as a cell.
pub(crate) fn column_cell(f: &BinaryField, col: &ColumnData, row: usize) -> Cell {
    let r = f.repeat;
    let slice_range = row * r..(row + 1) * r;
    match col {
        ColumnData::Logical(v) => Cell::Logical(v[slice_range].to_vec()),
        ColumnData::Bits(v) => Cell::Bits(v[row].clone()),
        ColumnData::Bytes(v) => Cell::Bytes(v[slice_range].to_vec()),
        ColumnData::Shorts(v) => Cell::Shorts(v[slice_range].to_vec()),
        ColumnData::Ints(v) => Cell::Ints(v[slice_range].to_vec()),
        ColumnData::Longs(v) => Cell::Longs(v[slice_range].to_vec()),
        ColumnData::Floats(v) => Cell::Floats(v[slice_range].to_vec()),
        ColumnData::Doubles(v) => Cell::Doubles(v[slice_range].to_vec()),
        ColumnData::Complexes(v) => Cell::Complexes(v[slice_range].to_vec()),
        ColumnData::DComplexes(v) => Cell::DComplexes(v[slice_range].to_vec()),
        ColumnData::Text(v) => Cell::Text(v[row].clone()),
        ColumnData::Var(v) => v[row].clone(),
    }
}

/// Convert a column-mode body to record mode, following the field layout.
pub(crate) fn columns_to_records(
    fields: &[BinaryField],
    cols: &[(String, ColumnData)],
    rows: usize,
) -> Vec<Record> {
    (0..rows)
        .map(|row| Record {
            fields: fields
                .iter()
                .zip(cols.iter())
                .map(|(f, (name, col))| (name.clone(), column_cell(f, col, row)))
                .collect(),
        })
        .collect()
}

// ── Verifier ──

/// The NAXIS card values for a variant: random groups re-insert the zero
/// placeholder axis that DataFormat strips.
fn axis_values(kind: HduKind, df: &DataFormat) -> Vec<usize> {
    if kind == HduKind::Random {
        let mut axes = Vec::with_capacity(df.shape.len() + 1);
        axes.push(0);
        axes.extend_from_slice(&df.shape);
        axes
    } else {
        df.shape.clone()
    }
}

fn repair_int(deck: &mut CardDeck, key: &str, want: i64) {
    match deck.get_int(key) {
        Some(have) if have == want => {}
        Some(have) => {
            warn!(key, have, want, "header disagrees with data; repaired");
            let _ = deck.set(key, Value::Integer(want));
        }
        None => {
            warn!(key, want, "missing geometry card; inserted");
            deck.push(Card::new(key, Value::Integer(want)));
        }
    }
}

/// Reconcile the geometry cards of a deck with a freshly computed
/// [`DataFormat`]. Mismatches are overwritten and warned about; the
/// verifier never fails.
pub fn verify_cards(kind: HduKind, deck: &mut CardDeck, df: &DataFormat) {
    repair_int(deck, "BITPIX", df.elem.bitpix());

    let axes = axis_values(kind, df);
    repair_int(deck, "NAXIS", axes.len() as i64);
    for (i, &dim) in axes.iter().enumerate() {
        repair_int(deck, &format!("NAXIS{}", i + 1), dim as i64);
    }
    // Drop stale higher axes left over from an earlier geometry.
    let mut extra = axes.len() + 1;
    while let Some(card) = deck.pop(&format!("NAXIS{}", extra)) {
        warn!(key = card.key.as_str(), "stale axis card removed");
        extra += 1;
    }

    // Every variant but the plain primary carries PCOUNT/GCOUNT; on a
    // primary they are only repaired when the caller added them.
    if kind != HduKind::Primary || deck.has("PCOUNT") || deck.has("GCOUNT") {
        repair_int(deck, "PCOUNT", df.param as i64);
        repair_int(deck, "GCOUNT", df.group as i64);
    }
}

// ── Constructor ──

/// A field name counts as user-given only when it is not the synthesized
/// `column<j>` / `field<j>` placeholder.
fn has_user_names<'a>(names: impl Iterator<Item = &'a str>) -> bool {
    names.enumerate().any(|(j, name)| {
        !name.is_empty()
            && name != format!("column{}", j + 1)
            && name != format!("field{}", j + 1)
    })
}

/// Take the caller's card for `key` or create one, preserving the caller's
/// comment when the card exists. The caller's value is kept as well: the
/// verifier, not the constructor, repairs wrong values.
fn take_or_default(rest: &mut CardDeck, key: &str, default: Value, comment: &str) -> Card {
    match rest.pop(key) {
        Some(card) => card,
        None => {
            if comment.is_empty() {
                Card::new(key, default)
            } else {
                Card::with_comment(key, default, comment)
            }
        }
    }
}

/// Synthesize the mandatory card prefix for an HDU and append the remaining
/// caller cards (END removed).
pub(crate) fn build_cards(
    kind: HduKind,
    df: &DataFormat,
    fields: &Fields,
    user: CardDeck,
) -> CardDeck {
    let mut rest = user;
    rest.pop("END");

    let mut deck = CardDeck::new();

    match kind.xtension() {
        Some(name) => {
            deck.push(take_or_default(
                &mut rest,
                "XTENSION",
                Value::String(name.to_string()),
                "extension type",
            ));
        }
        None => {
            deck.push(take_or_default(
                &mut rest,
                "SIMPLE",
                Value::Logical(true),
                "conforms to FITS standard",
            ));
        }
    }

    deck.push(take_or_default(
        &mut rest,
        "BITPIX",
        Value::Integer(df.elem.bitpix()),
        "bits per data value",
    ));

    let axes = axis_values(kind, df);
    deck.push(take_or_default(
        &mut rest,
        "NAXIS",
        Value::Integer(axes.len() as i64),
        "number of axes",
    ));
    for (i, &dim) in axes.iter().enumerate() {
        deck.push(take_or_default(
            &mut rest,
            &format!("NAXIS{}", i + 1),
            Value::Integer(dim as i64),
            "",
        ));
    }

    if kind == HduKind::Random {
        deck.push(take_or_default(
            &mut rest,
            "GROUPS",
            Value::Logical(true),
            "random groups present",
        ));
    }

    if kind != HduKind::Primary {
        deck.push(take_or_default(
            &mut rest,
            "PCOUNT",
            Value::Integer(df.param as i64),
            "",
        ));
        deck.push(take_or_default(
            &mut rest,
            "GCOUNT",
            Value::Integer(df.group as i64),
            "",
        ));
    }

    match fields {
        Fields::None => {}
        Fields::Binary(fields) => {
            deck.push(take_or_default(
                &mut rest,
                "TFIELDS",
                Value::Integer(fields.len() as i64),
                "number of columns",
            ));
            let named = has_user_names(fields.iter().map(|f| f.name.as_str()));
            for (j, f) in fields.iter().enumerate() {
                deck.push(take_or_default(
                    &mut rest,
                    &format!("TFORM{}", j + 1),
                    Value::String(f.tform()),
                    "",
                ));
                if named {
                    deck.push(take_or_default(
                        &mut rest,
                        &format!("TTYPE{}", j + 1),
                        Value::String(f.name.clone()),
                        "",
                    ));
                }
            }
        }
        Fields::Ascii(fields) => {
            deck.push(take_or_default(
                &mut rest,
                "TFIELDS",
                Value::Integer(fields.len() as i64),
                "number of columns",
            ));
            let named = has_user_names(fields.iter().map(|f| f.name.as_str()));
            for (j, f) in fields.iter().enumerate() {
                deck.push(take_or_default(
                    &mut rest,
                    &format!("TBCOL{}", j + 1),
                    Value::Integer(f.start as i64 + 1),
                    "",
                ));
                deck.push(take_or_default(
                    &mut rest,
                    &format!("TFORM{}", j + 1),
                    Value::String(f.form.tform()),
                    "",
                ));
                if named {
                    deck.push(take_or_default(
                        &mut rest,
                        &format!("TTYPE{}", j + 1),
                        Value::String(f.name.clone()),
                        "",
                    ));
                }
            }
        }
    }

    for card in rest {
        deck.push(card);
    }
    deck
}

/// The zero-initialized default body for a freshly built HDU without data.
pub(crate) fn default_body(
    kind: HduKind,
    df: &DataFormat,
    fields: &Fields,
    opts: &Options,
) -> Body {
    if df.len == 0 {
        return Body::None;
    }
    if kind.is_image_like() {
        return Body::Array(NumArray::zeros(df.elem, df.shape.clone()));
    }
    if kind == HduKind::Random {
        let groups = (0..df.group)
            .map(|_| Group {
                params: ArrayData::zeros(df.elem, df.param),
                array: NumArray::zeros(df.elem, df.shape.clone()),
            })
            .collect();
        return Body::Groups(groups);
    }
    if kind.is_opaque() {
        let bytes = df.byte_len();
        return Body::Array(NumArray {
            data: ArrayData::zeros(ElemType::UInt8, bytes),
            shape: vec![bytes],
        });
    }

    let rows = df.shape.get(1).copied().unwrap_or(0);
    match fields {
        Fields::Binary(fields) => {
            if opts.record {
                let recs = (0..rows)
                    .map(|_| Record {
                        fields: fields
                            .iter()
                            .map(|f| {
                                let cell = if f.pntr.is_some() {
                                    Cell::zero(f.kind, 0)
                                } else {
                                    Cell::zero(f.kind, f.repeat)
                                };
                                (f.name.clone(), cell)
                            })
                            .collect(),
                    })
                    .collect();
                Body::Records(recs)
            } else {
                let cols = fields
                    .iter()
                    .map(|f| {
                        let col = if f.pntr.is_some() {
                            ColumnData::Var(vec![Cell::zero(f.kind, 0); rows])
                        } else {
                            zero_column(f.kind, f.repeat, rows)
                        };
                        (f.name.clone(), col)
                    })
                    .collect();
                Body::Columns(cols)
            }
        }
        Fields::Ascii(fields) => {
            if opts.record {
                let recs = (0..rows)
                    .map(|_| Record {
                        fields: fields
                            .iter()
                            .map(|f| (f.name.clone(), ascii_zero_cell(&f.form)))
                            .collect(),
                    })
                    .collect();
                Body::Records(recs)
            } else {
                let cols = fields
                    .iter()
                    .map(|f| (f.name.clone(), ascii_zero_column(&f.form, rows)))
                    .collect();
                Body::Columns(cols)
            }
        }
        Fields::None => Body::None,
    }
}

fn zero_column(kind: FieldType, repeat: usize, rows: usize) -> ColumnData {
    let n = repeat * rows;
    match kind {
        FieldType::Logical => ColumnData::Logical(vec![false; n]),
        FieldType::Bit => ColumnData::Bits(vec![BitVec::new(repeat); rows]),
        FieldType::Byte => ColumnData::Bytes(vec![0; n]),
        FieldType::Short => ColumnData::Shorts(vec![0; n]),
        FieldType::Int => ColumnData::Ints(vec![0; n]),
        FieldType::Long => ColumnData::Longs(vec![0; n]),
        FieldType::Float => ColumnData::Floats(vec![0.0; n]),
        FieldType::Double => ColumnData::Doubles(vec![0.0; n]),
        FieldType::Complex => ColumnData::Complexes(vec![(0.0, 0.0); n]),
        FieldType::DoubleComplex => ColumnData::DComplexes(vec![(0.0, 0.0); n]),
        FieldType::Ascii => ColumnData::Text(vec![String::new(); rows]),
    }
}

fn ascii_zero_cell(form: &AsciiForm) -> Cell {
    match form {
        AsciiForm::Char(_) => Cell::Text(String::new()),
        AsciiForm::Int(_) => Cell::Longs(vec![0]),
        _ => Cell::Doubles(vec![0.0]),
    }
}

fn ascii_zero_column(form: &AsciiForm, rows: usize) -> ColumnData {
    match form {
        AsciiForm::Char(_) => ColumnData::Text(vec![String::new(); rows]),
        AsciiForm::Int(_) => ColumnData::Longs(vec![0; rows]),
        _ => ColumnData::Doubles(vec![0.0; rows]),
    }
}

// ── The HDU ──

/// A header-data unit: variant tag, card deck, and body.
#[derive(Debug, Clone, PartialEq)]
pub struct Hdu {
    /// The concrete variant.
    pub kind: HduKind,
    /// The header cards (never containing END).
    pub cards: CardDeck,
    /// The body.
    pub body: Body,
}

impl Hdu {
    /// Build an HDU from data, cards, or both.
    ///
    /// The variant comes from the mandatory keywords when any are present
    /// and from the data shape otherwise. The mandatory card prefix is
    /// synthesized in canonical order, reusing caller cards in place; a
    /// missing body is allocated zero-initialized from the header geometry.
    pub fn new(data: Option<Body>, cards: Option<CardDeck>, opts: &Options) -> Result<Hdu> {
        let user = cards.unwrap_or_default();
        let man = mandatory_keys(&user);
        let res = reserved_keys(&user);
        let man_ref = if man.is_empty() { None } else { Some(&man) };

        let kind = HduKind::detect(data.as_ref(), man_ref)?;

        // Field layout: explicit TFORM keywords win over inference.
        let keyed_layout = man.contains_key("TFIELDS");
        let (df, fields) = match &data {
            Some(body) if !kind.is_opaque() => {
                if keyed_layout && (kind.is_bintable_like() || kind == HduKind::Table) {
                    let (_, fields) = layout_from_keys(kind, &man, &res, opts)?;
                    let df = match &fields {
                        Fields::Binary(bf) => {
                            let record_len: usize = bf.iter().map(|f| f.width()).sum();
                            let rows = body_rows(bf, body);
                            table_format(record_len, rows, var_heap_bytes(bf, body))
                        }
                        Fields::Ascii(af) => ascii_format(af, body),
                        Fields::None => layout_from_body(kind, body)?.0,
                    };
                    (df, fields)
                } else {
                    layout_from_body(kind, body)?
                }
            }
            Some(body) => {
                // Opaque extensions: the keys describe the body.
                if man_ref.is_some() {
                    let (df, fields) = layout_from_keys(kind, &man, &res, opts)?;
                    (df, fields)
                } else {
                    layout_from_body(kind, body)?
                }
            }
            None => layout_from_keys(kind, &man, &res, opts)?,
        };

        let body = match data {
            Some(body) => coerce_body(kind, body, &fields, opts),
            None => default_body(kind, &df, &fields, opts),
        };

        let cards = build_cards(kind, &df, &fields, user);

        Ok(Hdu { kind, cards, body })
    }

    /// Build an HDU from data alone.
    pub fn from_data(body: Body, opts: &Options) -> Result<Hdu> {
        Hdu::new(Some(body), None, opts)
    }

    /// Build an HDU from cards alone, allocating a zero body.
    pub fn from_cards(cards: CardDeck, opts: &Options) -> Result<Hdu> {
        Hdu::new(None, Some(cards), opts)
    }

    /// Recompute the layout of this HDU for a write.
    ///
    /// Field layout comes from the cards when they describe one (so that
    /// explicit TFORM intent survives); geometry comes from the body, which
    /// is the ground truth the verifier enforces.
    pub(crate) fn layout(&self, opts: &Options) -> Result<(DataFormat, Fields)> {
        let man = mandatory_keys(&self.cards);
        let res = reserved_keys(&self.cards);

        if self.kind.is_opaque() {
            return layout_from_keys(self.kind, &man, &res, opts);
        }

        if (self.kind.is_bintable_like() || self.kind == HduKind::Table)
            && man.contains_key("TFIELDS")
        {
            let (_, fields) = layout_from_keys(self.kind, &man, &res, opts)?;
            let df = match &fields {
                Fields::Binary(bf) => {
                    let record_len: usize = bf.iter().map(|f| f.width()).sum();
                    let rows = body_rows(bf, &self.body);
                    table_format(record_len, rows, var_heap_bytes(bf, &self.body))
                }
                Fields::Ascii(af) => ascii_format(af, &self.body),
                Fields::None => layout_from_body(self.kind, &self.body)?.0,
            };
            return Ok((df, fields));
        }

        match self.body {
            Body::None => layout_from_keys(self.kind, &man, &res, opts),
            _ => layout_from_body(self.kind, &self.body),
        }
    }
}

/// Bring a tabular body into the representation mode the options ask for.
fn coerce_body(kind: HduKind, body: Body, fields: &Fields, opts: &Options) -> Body {
    if !(kind.is_bintable_like() || kind == HduKind::Table) {
        return body;
    }
    let Fields::Binary(fields) = fields else {
        return body;
    };
    match (&body, opts.record) {
        (Body::Columns(cols), true) => {
            let rows = column_rows(fields, cols);
            Body::Records(columns_to_records(fields, cols, rows))
        }
        (Body::Records(recs), false) => Body::Columns(records_to_columns(fields, recs)),
        _ => body,
    }
}

#[cfg(test)]
mod dispatch_tests {
    use super::*;

    fn keymap(pairs: &[(&str, Value)]) -> KeyMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn xtension(name: &str) -> KeyMap {
        keymap(&[("XTENSION", Value::String(name.to_string()))])
    }

    #[test]
    fn xtension_map() {
        assert_eq!(
            HduKind::detect(None, Some(&xtension("IMAGE   "))).unwrap(),
            HduKind::Image
        );
        assert_eq!(
            HduKind::detect(None, Some(&xtension("TABLE   "))).unwrap(),
            HduKind::Table
        );
        assert_eq!(
            HduKind::detect(None, Some(&xtension("BINTABLE"))).unwrap(),
            HduKind::Bintable
        );
        assert_eq!(
            HduKind::detect(None, Some(&xtension("A3DTABLE"))).unwrap(),
            HduKind::A3dTable
        );
        assert_eq!(
            HduKind::detect(None, Some(&xtension("IUEIMAGE"))).unwrap(),
            HduKind::IueImage
        );
        assert_eq!(
            HduKind::detect(None, Some(&xtension("WAVELET "))).unwrap(),
            HduKind::Conform
        );
    }

    #[test]
    fn compressed_bintable_flags() {
        let mut keys = xtension("BINTABLE");
        keys.insert(String::from("ZIMAGE"), Value::Logical(true));
        assert_eq!(HduKind::detect(None, Some(&keys)).unwrap(), HduKind::ZImage);

        let mut keys = xtension("BINTABLE");
        keys.insert(String::from("ZTABLE"), Value::Logical(true));
        assert_eq!(HduKind::detect(None, Some(&keys)).unwrap(), HduKind::ZTable);
    }

    #[test]
    fn simple_dispatches_primary_or_random() {
        let keys = keymap(&[("SIMPLE", Value::Logical(true))]);
        assert_eq!(HduKind::detect(None, Some(&keys)).unwrap(), HduKind::Primary);

        let keys = keymap(&[
            ("SIMPLE", Value::Logical(true)),
            ("GROUPS", Value::Logical(true)),
            ("NAXIS1", Value::Integer(0)),
        ]);
        assert_eq!(HduKind::detect(None, Some(&keys)).unwrap(), HduKind::Random);

        // GROUPS=T without the zero axis stays primary.
        let keys = keymap(&[
            ("SIMPLE", Value::Logical(true)),
            ("GROUPS", Value::Logical(true)),
            ("NAXIS1", Value::Integer(8)),
        ]);
        assert_eq!(HduKind::detect(None, Some(&keys)).unwrap(), HduKind::Primary);
    }

    #[test]
    fn keys_win_over_data() {
        let body = Body::Array(NumArray::zeros(ElemType::Float32, vec![2, 2]));
        let keys = xtension("BINTABLE");
        assert_eq!(
            HduKind::detect(Some(&body), Some(&keys)).unwrap(),
            HduKind::Bintable
        );
    }

    #[test]
    fn data_shape_dispatch() {
        let arr = Body::Array(NumArray::zeros(ElemType::Int16, vec![4]));
        assert_eq!(HduKind::detect(Some(&arr), None).unwrap(), HduKind::Primary);

        let groups = Body::Groups(vec![Group {
            params: ArrayData::Float32(vec![0.0, 0.0]),
            array: NumArray::zeros(ElemType::Float32, vec![2, 2]),
        }]);
        assert_eq!(
            HduKind::detect(Some(&groups), None).unwrap(),
            HduKind::Random
        );

        let cols = Body::Columns(vec![(
            String::from("A"),
            ColumnData::Ints(vec![1, 2, 3]),
        )]);
        assert_eq!(
            HduKind::detect(Some(&cols), None).unwrap(),
            HduKind::Bintable
        );

        let text = Body::Columns(vec![(
            String::from("NAME"),
            ColumnData::Text(vec![String::from("a")]),
        )]);
        assert_eq!(HduKind::detect(Some(&text), None).unwrap(), HduKind::Table);
    }

    #[test]
    fn dispatch_is_total_or_unknown() {
        assert!(matches!(
            HduKind::detect(None, None),
            Err(Error::UnknownHdu)
        ));
        assert!(matches!(
            HduKind::detect(Some(&Body::None), None),
            Err(Error::UnknownHdu)
        ));
        let empty = KeyMap::new();
        assert!(matches!(
            HduKind::detect(None, Some(&empty)),
            Err(Error::UnknownHdu)
        ));
    }

    #[test]
    fn keyword_classification() {
        for key in ["SIMPLE", "NAXIS", "NAXIS1", "TFORM12", "THEAP", "ZIMAGE"] {
            assert!(is_mandatory_key(key), "{} should be mandatory", key);
        }
        for key in ["TTYPE3", "BSCALE", "TELESCOP", "TNULL1", "DATE"] {
            assert!(is_reserved_key(key), "{} should be reserved", key);
        }
        for key in ["EXTNAME", "MYKEY", "NAXISX", "TFORMAT"] {
            assert!(
                !is_mandatory_key(key) && !is_reserved_key(key),
                "{} should be unclassified",
                key
            );
        }
    }
}

#[cfg(test)]
mod construct_tests {
    use super::*;

    fn opts() -> Options {
        Options::default()
    }

    #[test]
    fn primary_from_array() {
        let arr = NumArray::new(
            ArrayData::Float32(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
            vec![3, 2],
        )
        .unwrap();
        let hdu = Hdu::from_data(Body::Array(arr), &opts()).unwrap();

        assert_eq!(hdu.kind, HduKind::Primary);
        assert_eq!(hdu.cards.get_bool("SIMPLE"), Some(true));
        assert_eq!(hdu.cards.get_int("BITPIX"), Some(-32));
        assert_eq!(hdu.cards.get_int("NAXIS"), Some(2));
        assert_eq!(hdu.cards.get_int("NAXIS1"), Some(3));
        assert_eq!(hdu.cards.get_int("NAXIS2"), Some(2));
        assert!(!hdu.cards.has("END"));
        assert!(!hdu.cards.has("PCOUNT"));
    }

    #[test]
    fn bintable_from_columns() {
        let cols = vec![
            (String::from("A"), ColumnData::Ints(vec![1, 2, 3])),
            (
                String::from("B"),
                ColumnData::Text(vec![
                    String::from("x"),
                    String::from("yy"),
                    String::from("zzz"),
                ]),
            ),
        ];
        let hdu = Hdu::from_data(Body::Columns(cols), &opts()).unwrap();

        assert_eq!(hdu.kind, HduKind::Bintable);
        assert_eq!(hdu.cards.get_str("XTENSION").as_deref(), Some("BINTABLE"));
        assert_eq!(hdu.cards.get_int("TFIELDS"), Some(2));
        assert_eq!(hdu.cards.get_str("TFORM1").as_deref(), Some("1J"));
        assert_eq!(hdu.cards.get_str("TFORM2").as_deref(), Some("3A"));
        assert_eq!(hdu.cards.get_str("TTYPE1").as_deref(), Some("A"));
        assert_eq!(hdu.cards.get_int("NAXIS1"), Some(7));
        assert_eq!(hdu.cards.get_int("NAXIS2"), Some(3));
        assert_eq!(hdu.cards.get_int("PCOUNT"), Some(0));
        assert_eq!(hdu.cards.get_int("GCOUNT"), Some(1));
    }

    #[test]
    fn record_mode_coerces_columns() {
        let cols = vec![
            (String::from("A"), ColumnData::Ints(vec![1, 2, 3])),
            (
                String::from("B"),
                ColumnData::Text(vec![
                    String::from("x"),
                    String::from("yy"),
                    String::from("zzz"),
                ]),
            ),
        ];
        let record_opts = Options {
            record: true,
            ..Options::default()
        };
        let hdu = Hdu::from_data(Body::Columns(cols), &record_opts).unwrap();

        match &hdu.body {
            Body::Records(recs) => {
                assert_eq!(recs.len(), 3);
                assert_eq!(recs[1].get("A"), Some(&Cell::Ints(vec![2])));
                assert_eq!(recs[2].get("B"), Some(&Cell::Text(String::from("zzz"))));
            }
            other => panic!("expected records, got {:?}", other),
        }
    }

    #[test]
    fn random_from_groups() {
        let groups: Vec<Group> = (0..5)
            .map(|_| Group {
                params: ArrayData::Float32(vec![0.5, 1.5]),
                array: NumArray::zeros(ElemType::Float32, vec![2, 2]),
            })
            .collect();
        let hdu = Hdu::from_data(Body::Groups(groups), &opts()).unwrap();

        assert_eq!(hdu.kind, HduKind::Random);
        assert_eq!(hdu.cards.get_bool("GROUPS"), Some(true));
        assert_eq!(hdu.cards.get_int("NAXIS"), Some(3));
        assert_eq!(hdu.cards.get_int("NAXIS1"), Some(0));
        assert_eq!(hdu.cards.get_int("NAXIS2"), Some(2));
        assert_eq!(hdu.cards.get_int("PCOUNT"), Some(2));
        assert_eq!(hdu.cards.get_int("GCOUNT"), Some(5));
    }

    #[test]
    fn from_cards_allocates_zero_body() {
        let mut deck = CardDeck::new();
        deck.push(Card::new("SIMPLE", Value::Logical(true)));
        deck.push(Card::new("BITPIX", Value::Integer(16)));
        deck.push(Card::new("NAXIS", Value::Integer(1)));
        deck.push(Card::new("NAXIS1", Value::Integer(4)));

        let hdu = Hdu::from_cards(deck, &opts()).unwrap();
        match &hdu.body {
            Body::Array(arr) => {
                assert_eq!(arr.data, ArrayData::Int16(vec![0; 4]));
                assert_eq!(arr.shape, vec![4]);
            }
            other => panic!("expected zero array, got {:?}", other),
        }
    }

    #[test]
    fn from_cards_naxis0_has_no_body() {
        let mut deck = CardDeck::new();
        deck.push(Card::new("SIMPLE", Value::Logical(true)));
        deck.push(Card::new("BITPIX", Value::Integer(8)));
        deck.push(Card::new("NAXIS", Value::Integer(0)));

        let hdu = Hdu::from_cards(deck, &opts()).unwrap();
        assert_eq!(hdu.body, Body::None);
    }

    #[test]
    fn end_card_is_never_stored() {
        let mut deck = CardDeck::new();
        deck.push(Card::new("SIMPLE", Value::Logical(true)));
        deck.push(Card::new("BITPIX", Value::Integer(8)));
        deck.push(Card::new("NAXIS", Value::Integer(0)));
        deck.push(Card::new("END", Value::Undefined));

        let hdu = Hdu::from_cards(deck, &opts()).unwrap();
        assert!(!hdu.cards.has("END"));
    }

    #[test]
    fn user_comment_survives_prefix_synthesis() {
        let mut deck = CardDeck::new();
        deck.push(Card::with_comment(
            "BITPIX",
            Value::Integer(-32),
            "my comment",
        ));
        let arr = NumArray::zeros(ElemType::Float32, vec![2]);
        let hdu = Hdu::new(Some(Body::Array(arr)), Some(deck), &opts()).unwrap();
        let card = hdu.cards.card("BITPIX").unwrap();
        assert_eq!(card.comment.as_deref(), Some("my comment"));
    }

    #[test]
    fn trailing_user_cards_appended() {
        let mut deck = CardDeck::new();
        deck.push(Card::new("EXTNAME", Value::String(String::from("SCI"))));
        let arr = NumArray::zeros(ElemType::Int32, vec![2]);
        let hdu = Hdu::new(Some(Body::Array(arr)), Some(deck), &opts()).unwrap();

        // The mandatory prefix comes first, EXTNAME after it.
        let keys: Vec<&str> = hdu.cards.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, ["SIMPLE", "BITPIX", "NAXIS", "NAXIS1", "EXTNAME"]);
    }

    #[test]
    fn tform_from_cards_wins_over_inference() {
        let mut deck = CardDeck::new();
        deck.push(Card::new(
            "XTENSION",
            Value::String(String::from("BINTABLE")),
        ));
        deck.push(Card::new("TFIELDS", Value::Integer(1)));
        deck.push(Card::new("TFORM1", Value::String(String::from("5A"))));
        let cols = vec![(
            String::from("TAG"),
            ColumnData::Text(vec![String::from("ab"), String::from("c")]),
        )];
        let hdu = Hdu::new(Some(Body::Columns(cols)), Some(deck), &opts()).unwrap();

        // The declared width 5 wins over the inferred maximum of 2.
        assert_eq!(hdu.cards.get_str("TFORM1").as_deref(), Some("5A"));
        assert_eq!(hdu.cards.get_int("NAXIS1"), Some(5));
    }

    #[test]
    fn zero_body_bintable_columns() {
        let mut deck = CardDeck::new();
        deck.push(Card::new(
            "XTENSION",
            Value::String(String::from("BINTABLE")),
        ));
        deck.push(Card::new("BITPIX", Value::Integer(8)));
        deck.push(Card::new("NAXIS", Value::Integer(2)));
        deck.push(Card::new("NAXIS1", Value::Integer(7)));
        deck.push(Card::new("NAXIS2", Value::Integer(2)));
        deck.push(Card::new("PCOUNT", Value::Integer(0)));
        deck.push(Card::new("GCOUNT", Value::Integer(1)));
        deck.push(Card::new("TFIELDS", Value::Integer(2)));
        deck.push(Card::new("TFORM1", Value::String(String::from("1J"))));
        deck.push(Card::new("TFORM2", Value::String(String::from("3A"))));

        let hdu = Hdu::from_cards(deck, &opts()).unwrap();
        match &hdu.body {
            Body::Columns(cols) => {
                assert_eq!(cols.len(), 2);
                assert_eq!(cols[0].1, ColumnData::Ints(vec![0, 0]));
                assert_eq!(
                    cols[1].1,
                    ColumnData::Text(vec![String::new(), String::new()])
                );
            }
            other => panic!("expected columns, got {:?}", other),
        }
    }
}

#[cfg(test)]
mod verify_tests {
    use super::*;

    #[test]
    fn verifier_repairs_naxis1() {
        let mut deck = CardDeck::new();
        deck.push(Card::new("SIMPLE", Value::Logical(true)));
        deck.push(Card::new("BITPIX", Value::Integer(-64)));
        deck.push(Card::new("NAXIS", Value::Integer(2)));
        deck.push(Card::new("NAXIS1", Value::Integer(4)));
        deck.push(Card::new("NAXIS2", Value::Integer(5)));

        let df = DataFormat {
            elem: ElemType::Float64,
            len: 35,
            shape: vec![7, 5],
            param: 0,
            group: 1,
            heap: 280,
        };
        verify_cards(HduKind::Primary, &mut deck, &df);
        assert_eq!(deck.get_int("NAXIS1"), Some(7));
        assert_eq!(deck.get_int("NAXIS2"), Some(5));
    }

    #[test]
    fn verifier_inserts_missing_cards() {
        let mut deck = CardDeck::new();
        deck.push(Card::new("SIMPLE", Value::Logical(true)));
        let df = DataFormat {
            elem: ElemType::Int16,
            len: 4,
            shape: vec![4],
            param: 0,
            group: 1,
            heap: 8,
        };
        verify_cards(HduKind::Primary, &mut deck, &df);
        assert_eq!(deck.get_int("BITPIX"), Some(16));
        assert_eq!(deck.get_int("NAXIS"), Some(1));
        assert_eq!(deck.get_int("NAXIS1"), Some(4));
    }

    #[test]
    fn verifier_removes_stale_axes() {
        let mut deck = CardDeck::new();
        deck.push(Card::new("SIMPLE", Value::Logical(true)));
        deck.push(Card::new("BITPIX", Value::Integer(8)));
        deck.push(Card::new("NAXIS", Value::Integer(3)));
        deck.push(Card::new("NAXIS1", Value::Integer(2)));
        deck.push(Card::new("NAXIS2", Value::Integer(2)));
        deck.push(Card::new("NAXIS3", Value::Integer(2)));

        let df = DataFormat {
            elem: ElemType::UInt8,
            len: 4,
            shape: vec![2, 2],
            param: 0,
            group: 1,
            heap: 4,
        };
        verify_cards(HduKind::Primary, &mut deck, &df);
        assert_eq!(deck.get_int("NAXIS"), Some(2));
        assert!(!deck.has("NAXIS3"));
    }

    #[test]
    fn verifier_repairs_random_groups_axes() {
        let mut deck = CardDeck::new();
        deck.push(Card::new("SIMPLE", Value::Logical(true)));
        deck.push(Card::new("GROUPS", Value::Logical(true)));

        let df = DataFormat {
            elem: ElemType::Float32,
            len: 2 * (2 + 4),
            shape: vec![2, 2],
            param: 2,
            group: 2,
            heap: 0,
        };
        verify_cards(HduKind::Random, &mut deck, &df);
        assert_eq!(deck.get_int("NAXIS"), Some(3));
        assert_eq!(deck.get_int("NAXIS1"), Some(0));
        assert_eq!(deck.get_int("NAXIS2"), Some(2));
        assert_eq!(deck.get_int("PCOUNT"), Some(2));
        assert_eq!(deck.get_int("GCOUNT"), Some(2));
    }
}
