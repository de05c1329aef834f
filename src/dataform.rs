//! Body geometry descriptors.
//!
//! A [`DataFormat`] summarizes what an HDU body looks like on disk: element
//! type, element count, shape, random-groups parameters, group replication,
//! and the heap offset for binary tables. It is recomputed whenever cards
//! or data change and never outlives the operation that built it.

use crate::error::{Error, Result};
use crate::hdu::{HduKind, KeyMap};
use crate::value::Value;

/// The on-disk primitive type of an HDU body, per the BITPIX encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemType {
    /// BITPIX 8.
    UInt8,
    /// BITPIX 16.
    Int16,
    /// BITPIX 32.
    Int32,
    /// BITPIX 64.
    Int64,
    /// BITPIX -32.
    Float32,
    /// BITPIX -64.
    Float64,
}

impl ElemType {
    /// Map a BITPIX value to its element type.
    pub fn from_bitpix(bitpix: i64) -> Result<ElemType> {
        match bitpix {
            8 => Ok(ElemType::UInt8),
            16 => Ok(ElemType::Int16),
            32 => Ok(ElemType::Int32),
            64 => Ok(ElemType::Int64),
            -32 => Ok(ElemType::Float32),
            -64 => Ok(ElemType::Float64),
            other => Err(Error::InvalidBitpix(other)),
        }
    }

    /// The BITPIX value encoding this type.
    pub fn bitpix(self) -> i64 {
        match self {
            ElemType::UInt8 => 8,
            ElemType::Int16 => 16,
            ElemType::Int32 => 32,
            ElemType::Int64 => 64,
            ElemType::Float32 => -32,
            ElemType::Float64 => -64,
        }
    }

    /// Size of one element in bytes.
    pub fn byte_size(self) -> usize {
        match self {
            ElemType::UInt8 => 1,
            ElemType::Int16 => 2,
            ElemType::Int32 | ElemType::Float32 => 4,
            ElemType::Int64 | ElemType::Float64 => 8,
        }
    }
}

/// Six-field descriptor of an HDU body's on-disk geometry.
///
/// Invariant: `len == group * (param + shape product)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFormat {
    /// On-disk primitive element type.
    pub elem: ElemType,
    /// Total element count, including per-group parameters and heap bytes.
    pub len: usize,
    /// Dimension tuple, innermost first. Random groups exclude the zero
    /// NAXIS1 axis.
    pub shape: Vec<usize>,
    /// PCOUNT: per-group parameter count (Random) or heap bytes (Bintable).
    pub param: usize,
    /// GCOUNT: outer replication.
    pub group: usize,
    /// Byte offset of the heap area from the body start.
    pub heap: usize,
}

/// Product of the shape dimensions; an empty shape holds no elements.
fn shape_product(shape: &[usize]) -> usize {
    if shape.is_empty() {
        0
    } else {
        shape.iter().product()
    }
}

fn key_int(keys: &KeyMap, key: &str) -> Option<i64> {
    match keys.get(key) {
        Some(Value::Integer(n)) => Some(*n),
        _ => None,
    }
}

/// Read NAXIS1..NAXISn from a key map.
fn axis_dims(keys: &KeyMap) -> Vec<usize> {
    let naxis = key_int(keys, "NAXIS").unwrap_or(0).max(0) as usize;
    (1..=naxis)
        .map(|i| key_int(keys, &format!("NAXIS{}", i)).unwrap_or(0).max(0) as usize)
        .collect()
}

impl DataFormat {
    /// Build the descriptor for a data-less HDU (NAXIS = 0).
    pub fn empty(elem: ElemType) -> DataFormat {
        DataFormat {
            elem,
            len: 0,
            shape: Vec::new(),
            param: 0,
            group: 1,
            heap: 0,
        }
    }

    /// Build the descriptor from an HDU's mandatory keywords.
    ///
    /// Missing BITPIX falls back to 8 for tables and conforming extensions
    /// and 32 for Primary/Image/Random; missing PCOUNT/GCOUNT fall back to
    /// 0/1; a missing THEAP places the heap right after the record area.
    pub fn from_keys(kind: HduKind, keys: &KeyMap) -> Result<DataFormat> {
        let fallback = match kind {
            HduKind::Primary | HduKind::Image | HduKind::IueImage | HduKind::Random => 32,
            _ => 8,
        };
        let elem = ElemType::from_bitpix(key_int(keys, "BITPIX").unwrap_or(fallback))?;

        let dims = axis_dims(keys);
        let param = key_int(keys, "PCOUNT").unwrap_or(0).max(0) as usize;
        let group = match key_int(keys, "GCOUNT").unwrap_or(1) {
            n if n <= 0 => 1,
            n => n as usize,
        };

        let (shape, param, group) = match kind {
            HduKind::Primary | HduKind::Image | HduKind::IueImage => (dims, 0, 1),
            // Random groups: NAXIS1 = 0 is a placeholder, not a dimension.
            HduKind::Random => (dims.into_iter().skip(1).collect(), param, group),
            _ => (dims, param, group),
        };

        let prod = shape_product(&shape);
        let heap = match key_int(keys, "THEAP") {
            Some(t) if t >= 0 => t as usize,
            _ => elem.byte_size() * prod,
        };

        Ok(DataFormat {
            elem,
            len: group * (param + prod),
            shape,
            param,
            group,
            heap,
        })
    }

    /// Total body bytes on disk (before block padding).
    pub fn byte_len(&self) -> usize {
        self.len * self.elem.byte_size()
    }
}
