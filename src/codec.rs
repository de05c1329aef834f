//! Stream codec: header block loop, per-variant body read/write, heap
//! assembly, and multi-HDU streams.
//!
//! Reading consumes whole 2880-byte blocks: the header loop parses 36
//! cards per block until END, routing mandatory and reserved keywords into
//! side maps; the body is then read in one padded extent and decoded from
//! the buffer. Writing is the mirror image, with the heap serialized
//! before the header so PCOUNT can carry the final heap size.

use std::io::{Read, Write};

use crate::bits::BitVec;
use crate::block::{
    pad_to_block, padded_byte_len, BLOCK_SIZE, CARDS_PER_BLOCK, CARD_SIZE, DATA_PAD_BYTE,
    HEADER_PAD_BYTE,
};
use crate::card::{Card, CardDeck};
use crate::dataform::{DataFormat, ElemType};
use crate::endian::{
    read_f32_be, read_f64_be, read_i16_be, read_i32_be, read_i64_be, read_u32_be, read_u64_be,
    write_f32_be, write_f64_be, write_i16_be, write_i32_be, write_i64_be, write_u32_be,
    write_u64_be,
};
use crate::error::{Error, Result};
use crate::field::{AsciiField, AsciiForm, BinaryField, FieldType, PtrType};
use crate::hdu::{
    column_cell, is_mandatory_key, is_reserved_key, layout_from_keys, verify_cards, ArrayData,
    Body, Cell, ColumnData, Fields, Group, Hdu, HduKind, KeyMap, NumArray, Record,
};
use crate::options::Options;

// ── Header reading ──

/// The parsed header of one HDU: the full deck plus the mandatory and
/// reserved keywords routed into side maps.
#[derive(Debug, Clone)]
pub struct HeaderScan {
    /// All non-END cards in order.
    pub cards: CardDeck,
    /// Mandatory structural keywords, first occurrence wins.
    pub mandatory: KeyMap,
    /// Reserved annotation keywords, first occurrence wins.
    pub reserved: KeyMap,
}

/// Read one 2880-byte block, or `None` on a clean end of stream.
///
/// A stream that ends partway through a block is a truncation error.
fn fill_block<R: Read>(r: &mut R) -> Result<Option<[u8; BLOCK_SIZE]>> {
    let mut buf = [0u8; BLOCK_SIZE];
    let mut filled = 0usize;
    while filled < BLOCK_SIZE {
        let n = r.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    match filled {
        0 => Ok(None),
        n if n < BLOCK_SIZE => Err(Error::HeaderTruncated),
        _ => Ok(Some(buf)),
    }
}

/// Read header blocks until the END card.
///
/// Returns `None` on a clean end of stream before the first block. Blank
/// spacer cards are dropped; the END card is consumed and never stored.
pub fn read_header<R: Read>(r: &mut R) -> Result<Option<HeaderScan>> {
    let mut cards = CardDeck::new();
    let mut mandatory = KeyMap::new();
    let mut reserved = KeyMap::new();
    let mut first = true;

    loop {
        let block = match fill_block(r)? {
            Some(block) => block,
            None if first => return Ok(None),
            None => return Err(Error::HeaderTruncated),
        };
        first = false;

        for i in 0..CARDS_PER_BLOCK {
            let image: &[u8; CARD_SIZE] = block[i * CARD_SIZE..(i + 1) * CARD_SIZE]
                .try_into()
                .map_err(|_| Error::HeaderTruncated)?;
            let card = Card::parse(image)?;

            if card.is_end() {
                return Ok(Some(HeaderScan {
                    cards,
                    mandatory,
                    reserved,
                }));
            }
            if card.is_blank() && card.comment.is_none() {
                continue;
            }

            let upper = card.key.to_ascii_uppercase();
            if is_mandatory_key(&upper) {
                mandatory.entry(upper).or_insert_with(|| card.value.clone());
            } else if is_reserved_key(&upper) {
                reserved.entry(upper).or_insert_with(|| card.value.clone());
            }
            cards.push(card);
        }
    }
}

// ── Body reading ──

fn read_exact_bytes<R: Read>(r: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Decode a flat run of `count` elements of a field's type, applying the
/// zero + scale transform when asked to.
fn read_elements(
    kind: FieldType,
    bytes: &[u8],
    count: usize,
    scaling: Option<(f64, f64)>,
) -> Cell {
    match kind {
        FieldType::Logical => Cell::Logical((0..count).map(|i| bytes[i] == b'T').collect()),
        FieldType::Bit => Cell::Bits(BitVec::from_bytes(bytes, count)),
        FieldType::Ascii => Cell::Text(
            String::from_utf8_lossy(&bytes[..count])
                .trim_end()
                .to_string(),
        ),
        FieldType::Byte => scaled_ints(
            (0..count).map(|i| bytes[i] as i64).collect(),
            scaling,
            Cell::Bytes((0..count).map(|i| bytes[i]).collect()),
        ),
        FieldType::Short => {
            let raw: Vec<i16> = (0..count).map(|i| read_i16_be(&bytes[i * 2..])).collect();
            scaled_ints(
                raw.iter().map(|&v| v as i64).collect(),
                scaling,
                Cell::Shorts(raw),
            )
        }
        FieldType::Int => {
            let raw: Vec<i32> = (0..count).map(|i| read_i32_be(&bytes[i * 4..])).collect();
            scaled_ints(
                raw.iter().map(|&v| v as i64).collect(),
                scaling,
                Cell::Ints(raw),
            )
        }
        FieldType::Long => {
            let raw: Vec<i64> = (0..count).map(|i| read_i64_be(&bytes[i * 8..])).collect();
            scaled_ints(raw.clone(), scaling, Cell::Longs(raw))
        }
        FieldType::Float => {
            let raw: Vec<f32> = (0..count).map(|i| read_f32_be(&bytes[i * 4..])).collect();
            match scaling {
                Some((s, z)) => Cell::Doubles(raw.iter().map(|&v| z + s * v as f64).collect()),
                None => Cell::Floats(raw),
            }
        }
        FieldType::Double => {
            let raw: Vec<f64> = (0..count).map(|i| read_f64_be(&bytes[i * 8..])).collect();
            match scaling {
                Some((s, z)) => Cell::Doubles(raw.iter().map(|&v| z + s * v).collect()),
                None => Cell::Doubles(raw),
            }
        }
        FieldType::Complex => Cell::Complexes(
            (0..count)
                .map(|i| {
                    (
                        read_f32_be(&bytes[i * 8..]),
                        read_f32_be(&bytes[i * 8 + 4..]),
                    )
                })
                .collect(),
        ),
        FieldType::DoubleComplex => Cell::DComplexes(
            (0..count)
                .map(|i| {
                    (
                        read_f64_be(&bytes[i * 16..]),
                        read_f64_be(&bytes[i * 16 + 8..]),
                    )
                })
                .collect(),
        ),
    }
}

fn scaled_ints(raw: Vec<i64>, scaling: Option<(f64, f64)>, unscaled: Cell) -> Cell {
    match scaling {
        Some((s, z)) => Cell::Doubles(raw.into_iter().map(|v| z + s * v as f64).collect()),
        None => unscaled,
    }
}

/// Read one field of one record, following variable-length pointers into
/// the heap.
fn read_cell(
    record: &[u8],
    field: &BinaryField,
    heap: &[u8],
    opts: &Options,
) -> Result<Cell> {
    let bytes = &record[field.span.clone()];
    let scaling = if opts.scale { field.scaling() } else { None };

    match field.pntr {
        Some(ptr) => {
            if field.repeat == 0 {
                return Ok(Cell::zero(field.kind, 0));
            }
            let (count, offset) = match ptr {
                PtrType::P => (
                    read_u32_be(bytes) as usize,
                    read_u32_be(&bytes[4..]) as usize,
                ),
                PtrType::Q => (
                    read_u64_be(bytes) as usize,
                    read_u64_be(&bytes[8..]) as usize,
                ),
            };
            let payload_len = field.kind.byte_len(count);
            let end = offset + payload_len;
            if end > heap.len() {
                return Err(Error::MalformedField {
                    column: 0,
                    reason: format!(
                        "variable-length pointer ({}, {}) exceeds heap of {} bytes",
                        count,
                        offset,
                        heap.len()
                    ),
                });
            }
            Ok(read_elements(field.kind, &heap[offset..end], count, scaling))
        }
        None => {
            let count = match field.kind {
                FieldType::Ascii => field.width(),
                _ => field.repeat,
            };
            Ok(read_elements(field.kind, bytes, count, scaling))
        }
    }
}

/// Collect per-row cells of one field into a column.
fn cells_to_column(field: &BinaryField, cells: Vec<Cell>, scaled: bool) -> ColumnData {
    if field.pntr.is_some() {
        return ColumnData::Var(cells);
    }
    if scaled {
        return ColumnData::Doubles(
            cells
                .into_iter()
                .flat_map(|c| match c {
                    Cell::Doubles(v) => v,
                    _ => Vec::new(),
                })
                .collect(),
        );
    }
    match field.kind {
        FieldType::Logical => ColumnData::Logical(
            cells
                .into_iter()
                .flat_map(|c| match c {
                    Cell::Logical(v) => v,
                    _ => Vec::new(),
                })
                .collect(),
        ),
        FieldType::Bit => ColumnData::Bits(
            cells
                .into_iter()
                .filter_map(|c| match c {
                    Cell::Bits(b) => Some(b),
                    _ => None,
                })
                .collect(),
        ),
        FieldType::Byte => ColumnData::Bytes(
            cells
                .into_iter()
                .flat_map(|c| match c {
                    Cell::Bytes(v) => v,
                    _ => Vec::new(),
                })
                .collect(),
        ),
        FieldType::Short => ColumnData::Shorts(
            cells
                .into_iter()
                .flat_map(|c| match c {
                    Cell::Shorts(v) => v,
                    _ => Vec::new(),
                })
                .collect(),
        ),
        FieldType::Int => ColumnData::Ints(
            cells
                .into_iter()
                .flat_map(|c| match c {
                    Cell::Ints(v) => v,
                    _ => Vec::new(),
                })
                .collect(),
        ),
        FieldType::Long => ColumnData::Longs(
            cells
                .into_iter()
                .flat_map(|c| match c {
                    Cell::Longs(v) => v,
                    _ => Vec::new(),
                })
                .collect(),
        ),
        FieldType::Float => ColumnData::Floats(
            cells
                .into_iter()
                .flat_map(|c| match c {
                    Cell::Floats(v) => v,
                    _ => Vec::new(),
                })
                .collect(),
        ),
        FieldType::Double => ColumnData::Doubles(
            cells
                .into_iter()
                .flat_map(|c| match c {
                    Cell::Doubles(v) => v,
                    _ => Vec::new(),
                })
                .collect(),
        ),
        FieldType::Complex => ColumnData::Complexes(
            cells
                .into_iter()
                .flat_map(|c| match c {
                    Cell::Complexes(v) => v,
                    _ => Vec::new(),
                })
                .collect(),
        ),
        FieldType::DoubleComplex => ColumnData::DComplexes(
            cells
                .into_iter()
                .flat_map(|c| match c {
                    Cell::DComplexes(v) => v,
                    _ => Vec::new(),
                })
                .collect(),
        ),
        FieldType::Ascii => ColumnData::Text(
            cells
                .into_iter()
                .map(|c| match c {
                    Cell::Text(s) => s,
                    _ => String::new(),
                })
                .collect(),
        ),
    }
}

/// Decode a binary-table body from its padded byte extent.
fn read_bintable_body(
    bytes: &[u8],
    df: &DataFormat,
    fields: &[BinaryField],
    opts: &Options,
) -> Result<Body> {
    let record_len = df.shape.first().copied().unwrap_or(0);
    let rows = df.shape.get(1).copied().unwrap_or(0);
    let heap_start = df.heap.min(bytes.len());
    let heap = &bytes[heap_start..];

    let mut per_field: Vec<Vec<Cell>> = vec![Vec::with_capacity(rows); fields.len()];
    for row in 0..rows {
        let record = &bytes[row * record_len..(row + 1) * record_len];
        for (j, field) in fields.iter().enumerate() {
            per_field[j].push(read_cell(record, field, heap, opts).map_err(|e| match e {
                Error::MalformedField { reason, .. } => Error::MalformedField {
                    column: j + 1,
                    reason,
                },
                other => other,
            })?);
        }
    }

    if opts.record {
        let mut records = Vec::with_capacity(rows);
        for row in 0..rows {
            records.push(Record {
                fields: fields
                    .iter()
                    .enumerate()
                    .map(|(j, f)| (f.name.clone(), per_field[j][row].clone()))
                    .collect(),
            });
        }
        Ok(Body::Records(records))
    } else {
        let cols = fields
            .iter()
            .zip(per_field)
            .map(|(f, cells)| {
                let scaled = opts.scale && f.scaling().is_some() && f.pntr.is_none();
                (f.name.clone(), cells_to_column(f, cells, scaled))
            })
            .collect();
        Ok(Body::Columns(cols))
    }
}

/// Decode an ASCII-table body from its byte extent.
fn read_ascii_body(
    bytes: &[u8],
    df: &DataFormat,
    fields: &[AsciiField],
    opts: &Options,
) -> Result<Body> {
    let record_len = df.shape.first().copied().unwrap_or(0);
    let rows = df.shape.get(1).copied().unwrap_or(0);

    let parse_field = |field: &AsciiField, row: usize| -> Result<Cell> {
        let record = &bytes[row * record_len..(row + 1) * record_len];
        let span = field.span();
        let end = span.end.min(record.len());
        let text = String::from_utf8_lossy(&record[span.start..end]);
        let trimmed = text.trim();
        Ok(match field.form {
            AsciiForm::Char(_) => Cell::Text(text.trim_end().to_string()),
            AsciiForm::Int(_) => {
                let v = if trimmed.is_empty() {
                    0
                } else {
                    trimmed.parse::<i64>().map_err(|_| Error::MalformedField {
                        column: 0,
                        reason: format!("unparseable integer field {:?}", trimmed),
                    })?
                };
                Cell::Longs(vec![v])
            }
            _ => {
                let v = if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed
                        .replace(['D', 'd'], "E")
                        .parse::<f64>()
                        .map_err(|_| Error::MalformedField {
                            column: 0,
                            reason: format!("unparseable float field {:?}", trimmed),
                        })?
                };
                Cell::Doubles(vec![v])
            }
        })
    };

    if opts.record {
        let mut records = Vec::with_capacity(rows);
        for row in 0..rows {
            let mut rec = Vec::with_capacity(fields.len());
            for field in fields {
                rec.push((field.name.clone(), parse_field(field, row)?));
            }
            records.push(Record { fields: rec });
        }
        Ok(Body::Records(records))
    } else {
        let mut cols = Vec::with_capacity(fields.len());
        for field in fields {
            let col = match field.form {
                AsciiForm::Char(_) => {
                    let mut v = Vec::with_capacity(rows);
                    for row in 0..rows {
                        let s = match parse_field(field, row)? {
                            Cell::Text(s) => s,
                            _ => String::new(),
                        };
                        v.push(s);
                    }
                    ColumnData::Text(v)
                }
                AsciiForm::Int(_) => {
                    let mut v = Vec::with_capacity(rows);
                    for row in 0..rows {
                        if let Cell::Longs(mut cell) = parse_field(field, row)? {
                            v.append(&mut cell);
                        }
                    }
                    ColumnData::Longs(v)
                }
                _ => {
                    let mut v = Vec::with_capacity(rows);
                    for row in 0..rows {
                        if let Cell::Doubles(mut cell) = parse_field(field, row)? {
                            v.append(&mut cell);
                        }
                    }
                    ColumnData::Doubles(v)
                }
            };
            cols.push((field.name.clone(), col));
        }
        Ok(Body::Columns(cols))
    }
}

/// Decode an image-like body: element-wise big-endian of the full shape.
fn read_array_body(bytes: &[u8], df: &DataFormat) -> Body {
    let data = read_array_data(bytes, df.elem, df.len);
    Body::Array(NumArray {
        data,
        shape: df.shape.clone(),
    })
}

fn read_array_data(bytes: &[u8], elem: ElemType, count: usize) -> ArrayData {
    match elem {
        ElemType::UInt8 => ArrayData::UInt8(bytes[..count].to_vec()),
        ElemType::Int16 => {
            ArrayData::Int16((0..count).map(|i| read_i16_be(&bytes[i * 2..])).collect())
        }
        ElemType::Int32 => {
            ArrayData::Int32((0..count).map(|i| read_i32_be(&bytes[i * 4..])).collect())
        }
        ElemType::Int64 => {
            ArrayData::Int64((0..count).map(|i| read_i64_be(&bytes[i * 8..])).collect())
        }
        ElemType::Float32 => {
            ArrayData::Float32((0..count).map(|i| read_f32_be(&bytes[i * 4..])).collect())
        }
        ElemType::Float64 => {
            ArrayData::Float64((0..count).map(|i| read_f64_be(&bytes[i * 8..])).collect())
        }
    }
}

/// Decode a random-groups body: PCOUNT parameters ahead of each group.
fn read_groups_body(bytes: &[u8], df: &DataFormat) -> Body {
    let elem_size = df.elem.byte_size();
    let prod: usize = if df.shape.is_empty() {
        0
    } else {
        df.shape.iter().product()
    };
    let group_elems = df.param + prod;

    let groups = (0..df.group)
        .map(|g| {
            let start = g * group_elems * elem_size;
            let params = read_array_data(&bytes[start..], df.elem, df.param);
            let array_start = start + df.param * elem_size;
            let data = read_array_data(&bytes[array_start..], df.elem, prod);
            Group {
                params,
                array: NumArray {
                    data,
                    shape: df.shape.clone(),
                },
            }
        })
        .collect();
    Body::Groups(groups)
}

/// Read one HDU from a stream, or `None` on a clean end of stream.
pub fn read_hdu<R: Read>(r: &mut R, opts: &Options) -> Result<Option<Hdu>> {
    let Some(scan) = read_header(r)? else {
        return Ok(None);
    };

    let kind = HduKind::detect(None, Some(&scan.mandatory))?;
    let (df, fields) = layout_from_keys(kind, &scan.mandatory, &scan.reserved, opts)?;

    let body_bytes = read_exact_bytes(r, padded_byte_len(df.byte_len()))?;

    let body = if df.len == 0 {
        Body::None
    } else if kind.is_bintable_like() {
        match &fields {
            Fields::Binary(bf) => read_bintable_body(&body_bytes, &df, bf, opts)?,
            _ => Body::None,
        }
    } else if kind == HduKind::Table {
        match &fields {
            Fields::Ascii(af) => read_ascii_body(&body_bytes, &df, af, opts)?,
            _ => Body::None,
        }
    } else if kind == HduKind::Random {
        read_groups_body(&body_bytes, &df)
    } else if kind.is_opaque() {
        let raw = body_bytes[..df.byte_len()].to_vec();
        let len = raw.len();
        Body::Array(NumArray {
            data: ArrayData::UInt8(raw),
            shape: vec![len],
        })
    } else {
        read_array_body(&body_bytes, &df)
    };

    Ok(Some(Hdu {
        kind,
        cards: scan.cards,
        body,
    }))
}

/// Read every HDU of a FITS stream, in order.
pub fn read_fits<R: Read>(r: &mut R, opts: &Options) -> Result<Vec<Hdu>> {
    let mut hdus = Vec::new();
    while let Some(hdu) = read_hdu(r, opts)? {
        hdus.push(hdu);
    }
    if hdus.is_empty() {
        return Err(Error::HeaderTruncated);
    }
    Ok(hdus)
}

// ── Body writing ──

fn cell_i64s(cell: &Cell) -> Vec<i64> {
    match cell {
        Cell::Bytes(v) => v.iter().map(|&x| x as i64).collect(),
        Cell::Shorts(v) => v.iter().map(|&x| x as i64).collect(),
        Cell::Ints(v) => v.iter().map(|&x| x as i64).collect(),
        Cell::Longs(v) => v.clone(),
        Cell::Floats(v) => v.iter().map(|&x| x as i64).collect(),
        Cell::Doubles(v) => v.iter().map(|&x| x as i64).collect(),
        Cell::Logical(v) => v.iter().map(|&b| b as i64).collect(),
        _ => Vec::new(),
    }
}

fn cell_f64s(cell: &Cell) -> Vec<f64> {
    match cell {
        Cell::Bytes(v) => v.iter().map(|&x| x as f64).collect(),
        Cell::Shorts(v) => v.iter().map(|&x| x as f64).collect(),
        Cell::Ints(v) => v.iter().map(|&x| x as f64).collect(),
        Cell::Longs(v) => v.iter().map(|&x| x as f64).collect(),
        Cell::Floats(v) => v.iter().map(|&x| x as f64).collect(),
        Cell::Doubles(v) => v.clone(),
        _ => Vec::new(),
    }
}

fn cell_f32s(cell: &Cell) -> Vec<f32> {
    match cell {
        Cell::Floats(v) => v.clone(),
        other => cell_f64s(other).into_iter().map(|x| x as f32).collect(),
    }
}

/// Encode `count` elements of a field's type into `out`, zero-padding when
/// the cell holds fewer elements than the field's repeat.
fn write_elements(kind: FieldType, cell: &Cell, count: usize, width: usize, out: &mut Vec<u8>) {
    let start = out.len();
    match kind {
        FieldType::Logical => {
            let v = match cell {
                Cell::Logical(v) => v.clone(),
                other => cell_i64s(other).iter().map(|&x| x != 0).collect(),
            };
            for i in 0..count {
                out.push(if v.get(i).copied().unwrap_or(false) {
                    b'T'
                } else {
                    b'F'
                });
            }
        }
        FieldType::Bit => {
            let bits = match cell {
                Cell::Bits(b) => b.clone(),
                other => BitVec::from_bits(
                    &cell_i64s(other).iter().map(|&x| x != 0).collect::<Vec<_>>(),
                ),
            };
            out.extend_from_slice(bits.as_bytes());
        }
        FieldType::Ascii => {
            let s = match cell {
                Cell::Text(s) => s.clone(),
                _ => String::new(),
            };
            let bytes = s.as_bytes();
            let take = bytes.len().min(width);
            out.extend_from_slice(&bytes[..take]);
            out.resize(start + width, b' ');
            return;
        }
        FieldType::Byte => {
            let v = cell_i64s(cell);
            for i in 0..count {
                out.push(v.get(i).copied().unwrap_or(0) as u8);
            }
        }
        FieldType::Short => {
            let v = cell_i64s(cell);
            for i in 0..count {
                let mut buf = [0u8; 2];
                write_i16_be(&mut buf, v.get(i).copied().unwrap_or(0) as i16);
                out.extend_from_slice(&buf);
            }
        }
        FieldType::Int => {
            let v = cell_i64s(cell);
            for i in 0..count {
                let mut buf = [0u8; 4];
                write_i32_be(&mut buf, v.get(i).copied().unwrap_or(0) as i32);
                out.extend_from_slice(&buf);
            }
        }
        FieldType::Long => {
            let v = cell_i64s(cell);
            for i in 0..count {
                let mut buf = [0u8; 8];
                write_i64_be(&mut buf, v.get(i).copied().unwrap_or(0));
                out.extend_from_slice(&buf);
            }
        }
        FieldType::Float => {
            let v = cell_f32s(cell);
            for i in 0..count {
                let mut buf = [0u8; 4];
                write_f32_be(&mut buf, v.get(i).copied().unwrap_or(0.0));
                out.extend_from_slice(&buf);
            }
        }
        FieldType::Double => {
            let v = cell_f64s(cell);
            for i in 0..count {
                let mut buf = [0u8; 8];
                write_f64_be(&mut buf, v.get(i).copied().unwrap_or(0.0));
                out.extend_from_slice(&buf);
            }
        }
        FieldType::Complex => {
            let v = match cell {
                Cell::Complexes(v) => v.clone(),
                _ => Vec::new(),
            };
            for i in 0..count {
                let (re, im) = v.get(i).copied().unwrap_or((0.0, 0.0));
                let mut buf = [0u8; 4];
                write_f32_be(&mut buf, re);
                out.extend_from_slice(&buf);
                write_f32_be(&mut buf, im);
                out.extend_from_slice(&buf);
            }
        }
        FieldType::DoubleComplex => {
            let v = match cell {
                Cell::DComplexes(v) => v.clone(),
                _ => Vec::new(),
            };
            for i in 0..count {
                let (re, im) = v.get(i).copied().unwrap_or((0.0, 0.0));
                let mut buf = [0u8; 8];
                write_f64_be(&mut buf, re);
                out.extend_from_slice(&buf);
                write_f64_be(&mut buf, im);
                out.extend_from_slice(&buf);
            }
        }
    }
    out.resize(start + width, 0);
}

/// Write one field of one record, spilling variable-length payloads into
/// the heap and emitting the (count, offset) pointer pair.
fn write_cell(out: &mut Vec<u8>, field: &BinaryField, cell: &Cell, heap: &mut Vec<u8>) {
    match field.pntr {
        Some(ptr) => {
            let count = cell.count();
            let offset = heap.len();
            let payload_len = field.kind.byte_len(count);
            write_elements(field.kind, cell, count, payload_len, heap);
            if field.repeat > 0 {
                match ptr {
                    PtrType::P => {
                        let mut buf = [0u8; 4];
                        write_u32_be(&mut buf, count as u32);
                        out.extend_from_slice(&buf);
                        write_u32_be(&mut buf, offset as u32);
                        out.extend_from_slice(&buf);
                    }
                    PtrType::Q => {
                        let mut buf = [0u8; 8];
                        write_u64_be(&mut buf, count as u64);
                        out.extend_from_slice(&buf);
                        write_u64_be(&mut buf, offset as u64);
                        out.extend_from_slice(&buf);
                    }
                }
            }
        }
        None => write_elements(field.kind, cell, field.repeat, field.width(), out),
    }
}

/// Serialize a binary-table body into its record stream and heap.
fn write_bintable_body(fields: &[BinaryField], body: &Body) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut records = Vec::new();
    let mut heap = Vec::new();

    match body {
        Body::Records(recs) => {
            for rec in recs {
                for (j, field) in fields.iter().enumerate() {
                    let cell = rec
                        .fields
                        .get(j)
                        .map(|(_, c)| c.clone())
                        .unwrap_or_else(|| Cell::zero(field.kind, field.repeat));
                    write_cell(&mut records, field, &cell, &mut heap);
                }
            }
        }
        Body::Columns(cols) => {
            let rows = cols
                .iter()
                .zip(fields.iter())
                .find_map(|((_, col), f)| match col {
                    ColumnData::Bits(v) => Some(v.len()),
                    ColumnData::Text(v) => Some(v.len()),
                    ColumnData::Var(v) => Some(v.len()),
                    other if f.repeat > 0 => Some(other.len() / f.repeat),
                    _ => None,
                })
                .unwrap_or(0);
            for row in 0..rows {
                for (field, (_, col)) in fields.iter().zip(cols.iter()) {
                    let cell = column_cell(field, col, row);
                    write_cell(&mut records, field, &cell, &mut heap);
                }
            }
        }
        Body::None => {}
        other => {
            return Err(Error::ShapeMismatch {
                expected: vec![],
                actual: vec![match other {
                    Body::Array(a) => a.data.len(),
                    Body::Groups(g) => g.len(),
                    _ => 0,
                }],
            })
        }
    }

    Ok((records, heap))
}

/// Format one ASCII-table field value.
fn format_ascii_cell(form: &AsciiForm, cell: &Cell) -> String {
    let w = form.width();
    match form {
        AsciiForm::Char(_) => {
            let s = match cell {
                Cell::Text(s) => s.clone(),
                _ => String::new(),
            };
            let mut out = String::with_capacity(w);
            out.push_str(&s[..s.len().min(w)]);
            while out.len() < w {
                out.push(' ');
            }
            out
        }
        AsciiForm::Int(_) => {
            let v = cell_i64s(cell).first().copied().unwrap_or(0);
            right_justify(&format!("{}", v), w)
        }
        AsciiForm::Fixed(_, d) => {
            let v = cell_f64s(cell).first().copied().unwrap_or(0.0);
            right_justify(&format!("{:.*}", *d, v), w)
        }
        AsciiForm::Exp(_, d) => {
            let v = cell_f64s(cell).first().copied().unwrap_or(0.0);
            right_justify(&format!("{:.*E}", *d, v), w)
        }
        AsciiForm::DExp(_, d) => {
            let v = cell_f64s(cell).first().copied().unwrap_or(0.0);
            right_justify(&format!("{:.*E}", *d, v).replace('E', "D"), w)
        }
    }
}

fn right_justify(s: &str, width: usize) -> String {
    if s.len() >= width {
        s[..width].to_string()
    } else {
        format!("{:>width$}", s, width = width)
    }
}

/// Serialize an ASCII-table body into its fixed-column text rows.
fn write_ascii_body(fields: &[AsciiField], df: &DataFormat, body: &Body) -> Result<Vec<u8>> {
    let record_len = df.shape.first().copied().unwrap_or(0);
    let rows = df.shape.get(1).copied().unwrap_or(0);
    let mut out = vec![b' '; record_len * rows];

    let cell_at = |j: usize, row: usize| -> Cell {
        match body {
            Body::Records(recs) => recs
                .get(row)
                .and_then(|r| r.fields.get(j))
                .map(|(_, c)| c.clone())
                .unwrap_or(Cell::Text(String::new())),
            Body::Columns(cols) => match cols.get(j) {
                Some((_, ColumnData::Text(v))) => {
                    Cell::Text(v.get(row).cloned().unwrap_or_default())
                }
                Some((_, ColumnData::Longs(v))) => {
                    Cell::Longs(vec![v.get(row).copied().unwrap_or(0)])
                }
                Some((_, ColumnData::Doubles(v))) => {
                    Cell::Doubles(vec![v.get(row).copied().unwrap_or(0.0)])
                }
                _ => Cell::Text(String::new()),
            },
            _ => Cell::Text(String::new()),
        }
    };

    for row in 0..rows {
        let base = row * record_len;
        for (j, field) in fields.iter().enumerate() {
            let text = format_ascii_cell(&field.form, &cell_at(j, row));
            let span = field.span();
            out[base + span.start..base + span.end].copy_from_slice(text.as_bytes());
        }
    }
    Ok(out)
}

/// Serialize an image-like or opaque body, element-wise big-endian.
fn write_array_data(data: &ArrayData, out: &mut Vec<u8>) {
    match data {
        ArrayData::UInt8(v) => out.extend_from_slice(v),
        ArrayData::Int16(v) => {
            for &x in v {
                let mut buf = [0u8; 2];
                write_i16_be(&mut buf, x);
                out.extend_from_slice(&buf);
            }
        }
        ArrayData::Int32(v) => {
            for &x in v {
                let mut buf = [0u8; 4];
                write_i32_be(&mut buf, x);
                out.extend_from_slice(&buf);
            }
        }
        ArrayData::Int64(v) => {
            for &x in v {
                let mut buf = [0u8; 8];
                write_i64_be(&mut buf, x);
                out.extend_from_slice(&buf);
            }
        }
        ArrayData::Float32(v) => {
            for &x in v {
                let mut buf = [0u8; 4];
                write_f32_be(&mut buf, x);
                out.extend_from_slice(&buf);
            }
        }
        ArrayData::Float64(v) => {
            for &x in v {
                let mut buf = [0u8; 8];
                write_f64_be(&mut buf, x);
                out.extend_from_slice(&buf);
            }
        }
    }
}

/// Serialize the body of an HDU (unpadded).
fn write_body(hdu: &Hdu, df: &DataFormat, fields: &Fields) -> Result<Vec<u8>> {
    match (&hdu.body, fields) {
        (Body::None, _) => Ok(Vec::new()),
        (_, Fields::Binary(bf)) => {
            let (mut records, heap) = write_bintable_body(bf, &hdu.body)?;
            // The heap begins right after the record area on write.
            records.extend_from_slice(&heap);
            Ok(records)
        }
        (_, Fields::Ascii(af)) => write_ascii_body(af, df, &hdu.body),
        (Body::Array(arr), Fields::None) => {
            let mut out = Vec::with_capacity(df.byte_len());
            write_array_data(&arr.data, &mut out);
            Ok(out)
        }
        (Body::Groups(groups), Fields::None) => {
            let mut out = Vec::with_capacity(df.byte_len());
            for group in groups {
                write_array_data(&group.params, &mut out);
                write_array_data(&group.array.data, &mut out);
            }
            Ok(out)
        }
        (body, _) => Err(Error::ShapeMismatch {
            expected: vec![df.len],
            actual: vec![match body {
                Body::Records(r) => r.len(),
                Body::Columns(c) => c.len(),
                _ => 0,
            }],
        }),
    }
}

// ── Header writing ──

fn end_card_image() -> [u8; CARD_SIZE] {
    let mut buf = [b' '; CARD_SIZE];
    buf[..3].copy_from_slice(b"END");
    buf
}

/// Serialize a deck into complete header blocks: cards in order, an END
/// card appended, blank-card padding to the block boundary.
pub fn write_header(deck: &CardDeck, opts: &Options) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(BLOCK_SIZE);
    for card in deck.iter() {
        for image in card.render(opts)? {
            out.extend_from_slice(&image);
        }
    }
    out.extend_from_slice(&end_card_image());
    pad_to_block(&mut out, HEADER_PAD_BYTE);
    Ok(out)
}

/// Write one HDU to a stream.
///
/// The deck is verified (and repaired in place) against the body geometry
/// first, so the emitted header always agrees with the emitted body.
pub fn write_hdu<W: Write>(w: &mut W, hdu: &mut Hdu, opts: &Options) -> Result<()> {
    let (df, fields) = hdu.layout(opts)?;
    verify_cards(hdu.kind, &mut hdu.cards, &df);

    let header = write_header(&hdu.cards, opts)?;
    w.write_all(&header)?;

    let mut body = write_body(hdu, &df, &fields)?;
    let pad = if hdu.kind == HduKind::Table {
        HEADER_PAD_BYTE
    } else {
        DATA_PAD_BYTE
    };
    pad_to_block(&mut body, pad);
    w.write_all(&body)?;
    Ok(())
}

/// Write a sequence of HDUs in call order.
pub fn write_fits<W: Write>(w: &mut W, hdus: &mut [Hdu], opts: &Options) -> Result<()> {
    for hdu in hdus {
        write_hdu(w, hdu, opts)?;
    }
    Ok(())
}
