//! Per-column field descriptors for tabular HDUs.
//!
//! Binary-table columns are described by the TFORM repeat/pointer/type-code
//! grammar plus the reserved per-column annotation keywords; ASCII-table
//! columns by the `Aw / Iw / Fw.d / Ew.d / Dw.d` forms with TBCOL offsets.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::error::{Error, Result};
use crate::hdu::KeyMap;
use crate::value::Value;

// ── Binary table fields ──

/// Element type of a binary-table column, from the TFORM type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// `L` -- logical, one byte per element.
    Logical,
    /// `X` -- bit-packed vector.
    Bit,
    /// `B` -- unsigned byte.
    Byte,
    /// `I` -- 16-bit signed integer.
    Short,
    /// `J` -- 32-bit signed integer.
    Int,
    /// `K` -- 64-bit signed integer.
    Long,
    /// `A` -- ASCII character string.
    Ascii,
    /// `E` -- 32-bit IEEE float.
    Float,
    /// `D` -- 64-bit IEEE float.
    Double,
    /// `C` -- complex, pair of 32-bit floats.
    Complex,
    /// `M` -- complex, pair of 64-bit floats.
    DoubleComplex,
}

impl FieldType {
    /// Map a TFORM type code to its element type.
    pub fn from_code(code: char) -> Option<FieldType> {
        match code {
            'L' => Some(FieldType::Logical),
            'X' => Some(FieldType::Bit),
            'B' => Some(FieldType::Byte),
            'I' => Some(FieldType::Short),
            'J' => Some(FieldType::Int),
            'K' => Some(FieldType::Long),
            'A' => Some(FieldType::Ascii),
            'E' => Some(FieldType::Float),
            'D' => Some(FieldType::Double),
            'C' => Some(FieldType::Complex),
            'M' => Some(FieldType::DoubleComplex),
            _ => None,
        }
    }

    /// The TFORM type code for this element type.
    pub fn code(self) -> char {
        match self {
            FieldType::Logical => 'L',
            FieldType::Bit => 'X',
            FieldType::Byte => 'B',
            FieldType::Short => 'I',
            FieldType::Int => 'J',
            FieldType::Long => 'K',
            FieldType::Ascii => 'A',
            FieldType::Float => 'E',
            FieldType::Double => 'D',
            FieldType::Complex => 'C',
            FieldType::DoubleComplex => 'M',
        }
    }

    /// Bytes per element. Bit columns pack eight elements per byte and
    /// return 0 here; use [`FieldType::byte_len`] for their storage size.
    pub fn byte_size(self) -> usize {
        match self {
            FieldType::Bit => 0,
            FieldType::Logical | FieldType::Byte | FieldType::Ascii => 1,
            FieldType::Short => 2,
            FieldType::Int | FieldType::Float => 4,
            FieldType::Long | FieldType::Double | FieldType::Complex => 8,
            FieldType::DoubleComplex => 16,
        }
    }

    /// Bytes occupied by `count` elements of this type on disk. Every
    /// width computation (fixed fields, heap payloads, PCOUNT) goes
    /// through here so bit packing is handled in one place.
    pub fn byte_len(self, count: usize) -> usize {
        match self {
            FieldType::Bit => count.div_ceil(8),
            kind => count * kind.byte_size(),
        }
    }

    /// Columns whose values participate in the zero + scale transform.
    pub fn is_scalable(self) -> bool {
        matches!(
            self,
            FieldType::Byte
                | FieldType::Short
                | FieldType::Int
                | FieldType::Long
                | FieldType::Float
                | FieldType::Double
        )
    }
}

/// Variable-length array pointer width: `P` descriptors hold 32-bit
/// count/offset pairs, `Q` descriptors 64-bit ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtrType {
    /// 32-bit descriptor pair.
    P,
    /// 64-bit descriptor pair.
    Q,
}

impl PtrType {
    /// Bytes per count or offset word.
    pub fn word_size(self) -> usize {
        match self {
            PtrType::P => 4,
            PtrType::Q => 8,
        }
    }

    /// The TFORM pointer code.
    pub fn code(self) -> char {
        match self {
            PtrType::P => 'P',
            PtrType::Q => 'Q',
        }
    }
}

/// A parsed TFORM descriptor, before layout assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TformSpec {
    /// Leading repeat count (default 1).
    pub repeat: usize,
    /// Variable-length pointer flag.
    pub pntr: Option<PtrType>,
    /// Element type code.
    pub kind: FieldType,
    /// Parenthesized array-descriptor payload, without the parentheses.
    pub supp: Option<String>,
}

/// TFORM grammar: repeat, optional pointer flag, type code, optional
/// parenthesized payload.
static TFORM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d*)([PQ]?)([LXBIJKAEDCM])(\([^)]*\))?$").unwrap());

/// Parse a binary-table TFORM value such as `1J`, `10E`, `13X`, `1PE(5)`.
///
/// `column` is the 1-based column number, used for error reporting.
pub fn parse_tform(s: &str, column: usize) -> Result<TformSpec> {
    let trimmed = s.trim();
    let caps = TFORM_RE
        .captures(trimmed)
        .ok_or_else(|| Error::MalformedField {
            column,
            reason: format!("TFORM {:?} does not match the descriptor grammar", trimmed),
        })?;

    let repeat_str = &caps[1];
    let mut repeat = if repeat_str.is_empty() {
        1
    } else {
        repeat_str
            .parse::<usize>()
            .map_err(|_| Error::MalformedField {
                column,
                reason: format!("repeat count {:?} out of range", repeat_str),
            })?
    };

    let pntr = match &caps[2] {
        "P" => Some(PtrType::P),
        "Q" => Some(PtrType::Q),
        _ => None,
    };

    // The type code is guaranteed one of the known letters by the grammar.
    let kind = FieldType::from_code(caps[3].chars().next().unwrap_or('?')).ok_or_else(|| {
        Error::MalformedField {
            column,
            reason: format!("unknown type code {:?}", &caps[3]),
        }
    })?;

    let supp = caps
        .get(4)
        .map(|m| m.as_str().trim_matches(['(', ')']).to_string());

    if pntr.is_some() && repeat > 1 {
        warn!(
            column,
            repeat, "variable-length column repeat clamped to 1"
        );
        repeat = 1;
    }

    Ok(TformSpec {
        repeat,
        pntr,
        kind,
        supp,
    })
}

/// On-disk width in bytes of one record's worth of this descriptor.
pub fn field_width(spec: &TformSpec) -> usize {
    match spec.pntr {
        Some(p) => spec.repeat * 2 * p.word_size(),
        None => spec.kind.byte_len(spec.repeat),
    }
}

/// Full per-column layout of a binary-table field.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryField {
    /// Column name, right-trimmed TTYPEn or synthesized.
    pub name: String,
    /// Variable-length pointer width, when this is a P/Q column.
    pub pntr: Option<PtrType>,
    /// Element type.
    pub kind: FieldType,
    /// Byte range this column occupies within one record.
    pub span: Range<usize>,
    /// Repeat count (element count per record; bit count for X columns).
    pub repeat: usize,
    /// Opaque array-descriptor hint from the TFORM parentheses.
    pub supp: Option<String>,
    /// TUNITn.
    pub unit: Option<String>,
    /// TDISPn display format.
    pub disp: Option<String>,
    /// TDIMn reshape dimensions.
    pub dims: Option<Vec<usize>>,
    /// TSCALn; `None` for logical/bit/string columns.
    pub scale: Option<f64>,
    /// TZEROn; `None` for logical/bit/string columns.
    pub zero: Option<f64>,
    /// TNULLn missing-integer sentinel.
    pub null: Option<i64>,
    /// TDMINn declared data minimum.
    pub dmin: Option<f64>,
    /// TDMAXn declared data maximum.
    pub dmax: Option<f64>,
    /// TLMINn physical minimum.
    pub lmin: Option<f64>,
    /// TLMAXn physical maximum.
    pub lmax: Option<f64>,
}

impl BinaryField {
    /// Build a field from a descriptor with default annotations.
    pub fn from_spec(name: String, spec: TformSpec, offset: usize) -> BinaryField {
        let width = field_width(&spec);
        let (scale, zero) = if spec.kind.is_scalable() {
            (Some(1.0), Some(0.0))
        } else {
            (None, None)
        };
        BinaryField {
            name,
            pntr: spec.pntr,
            kind: spec.kind,
            span: offset..offset + width,
            repeat: spec.repeat,
            supp: spec.supp,
            unit: None,
            disp: None,
            dims: None,
            scale,
            zero,
            null: None,
            dmin: None,
            dmax: None,
            lmin: None,
            lmax: None,
        }
    }

    /// Width in bytes within one record.
    pub fn width(&self) -> usize {
        self.span.len()
    }

    /// The scale/zero pair, when scaling is meaningful and not the identity.
    pub fn scaling(&self) -> Option<(f64, f64)> {
        match (self.scale, self.zero) {
            (Some(s), Some(z)) if s != 1.0 || z != 0.0 => Some((s, z)),
            _ => None,
        }
    }

    /// Render the TFORM value for this field.
    pub fn tform(&self) -> String {
        let mut out = format!("{}", self.repeat);
        if let Some(p) = self.pntr {
            out.push(p.code());
        }
        out.push(self.kind.code());
        if let Some(ref supp) = self.supp {
            out.push('(');
            out.push_str(supp);
            out.push(')');
        }
        out
    }
}

fn key_str(keys: &KeyMap, key: &str) -> Option<String> {
    match keys.get(key) {
        Some(Value::String(s)) => Some(s.trim_end().to_string()),
        _ => None,
    }
}

fn key_int(keys: &KeyMap, key: &str) -> Option<i64> {
    match keys.get(key) {
        Some(Value::Integer(n)) => Some(*n),
        _ => None,
    }
}

fn key_float(keys: &KeyMap, key: &str) -> Option<f64> {
    match keys.get(key) {
        Some(Value::Float(f)) => Some(*f),
        Some(Value::Integer(n)) => Some(*n as f64),
        _ => None,
    }
}

/// Parse a TDIM value such as `(3,4)` into a dimension list.
fn parse_tdim(s: &str) -> Option<Vec<usize>> {
    let inner = s.trim().strip_prefix('(')?.strip_suffix(')')?;
    inner
        .split(',')
        .map(|part| part.trim().parse::<usize>().ok())
        .collect()
}

/// The synthesized name for an unnamed column.
fn default_name(index: usize, record_mode: bool) -> String {
    if record_mode {
        format!("field{}", index)
    } else {
        format!("column{}", index)
    }
}

/// Build binary-table field descriptors from header keywords.
///
/// Iterates columns `1..=TFIELDS`, parsing `TFORMn` from the mandatory map
/// and the per-column annotations from the reserved map. Fields are placed
/// contiguously in declaration order.
pub fn binary_fields_from_keys(
    mandatory: &KeyMap,
    reserved: &KeyMap,
    record_mode: bool,
) -> Result<Vec<BinaryField>> {
    let tfields = key_int(mandatory, "TFIELDS")
        .ok_or_else(|| Error::KeyNotFound(String::from("TFIELDS")))?
        .max(0) as usize;

    let mut fields = Vec::with_capacity(tfields);
    let mut offset = 0usize;

    for j in 1..=tfields {
        let tform = key_str(mandatory, &format!("TFORM{}", j)).ok_or_else(|| {
            Error::KeyNotFound(format!("TFORM{}", j))
        })?;
        let spec = parse_tform(&tform, j)?;

        let name = key_str(reserved, &format!("TTYPE{}", j))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| default_name(j, record_mode));

        let mut field = BinaryField::from_spec(name, spec, offset);
        offset = field.span.end;

        field.unit = key_str(reserved, &format!("TUNIT{}", j));
        field.disp = key_str(reserved, &format!("TDISP{}", j));
        field.dims = key_str(reserved, &format!("TDIM{}", j)).and_then(|s| parse_tdim(&s));
        if field.kind.is_scalable() {
            if let Some(s) = key_float(reserved, &format!("TSCAL{}", j)) {
                field.scale = Some(s);
            }
            if let Some(z) = key_float(reserved, &format!("TZERO{}", j)) {
                field.zero = Some(z);
            }
        }
        field.null = key_int(reserved, &format!("TNULL{}", j));
        field.dmin = key_float(reserved, &format!("TDMIN{}", j));
        field.dmax = key_float(reserved, &format!("TDMAX{}", j));
        field.lmin = key_float(reserved, &format!("TLMIN{}", j));
        field.lmax = key_float(reserved, &format!("TLMAX{}", j));

        fields.push(field);
    }

    Ok(fields)
}

// ── ASCII table fields ──

/// Column format of an ASCII-table field, from TFORMn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsciiForm {
    /// `Aw` -- character string, `w` characters wide.
    Char(usize),
    /// `Iw` -- integer.
    Int(usize),
    /// `Fw.d` -- fixed-point decimal.
    Fixed(usize, usize),
    /// `Ew.d` -- single-precision exponential.
    Exp(usize, usize),
    /// `Dw.d` -- double-precision exponential.
    DExp(usize, usize),
}

impl AsciiForm {
    /// Total field width in characters.
    pub fn width(&self) -> usize {
        match *self {
            AsciiForm::Char(w)
            | AsciiForm::Int(w)
            | AsciiForm::Fixed(w, _)
            | AsciiForm::Exp(w, _)
            | AsciiForm::DExp(w, _) => w,
        }
    }

    /// Render the TFORM value for this form.
    pub fn tform(&self) -> String {
        match *self {
            AsciiForm::Char(w) => format!("A{}", w),
            AsciiForm::Int(w) => format!("I{}", w),
            AsciiForm::Fixed(w, d) => format!("F{}.{}", w, d),
            AsciiForm::Exp(w, d) => format!("E{}.{}", w, d),
            AsciiForm::DExp(w, d) => format!("D{}.{}", w, d),
        }
    }
}

/// Parse an ASCII-table TFORM value such as `A20`, `I10`, `F12.4`.
pub fn parse_ascii_tform(s: &str, column: usize) -> Result<AsciiForm> {
    let trimmed = s.trim();
    let malformed = |reason: String| Error::MalformedField { column, reason };
    if trimmed.is_empty() {
        return Err(malformed(String::from("empty TFORM")));
    }

    let code = trimmed.as_bytes()[0];
    let rest = &trimmed[1..];
    let width = |s: &str| {
        s.parse::<usize>()
            .map_err(|_| malformed(format!("bad field width {:?}", s)))
    };
    let width_decimal = |s: &str| -> Result<(usize, usize)> {
        let dot = s
            .find('.')
            .ok_or_else(|| malformed(format!("missing decimal count in {:?}", s)))?;
        Ok((width(&s[..dot])?, width(&s[dot + 1..])?))
    };

    match code {
        b'A' => Ok(AsciiForm::Char(width(rest)?)),
        b'I' => Ok(AsciiForm::Int(width(rest)?)),
        b'F' => width_decimal(rest).map(|(w, d)| AsciiForm::Fixed(w, d)),
        b'E' => width_decimal(rest).map(|(w, d)| AsciiForm::Exp(w, d)),
        b'D' => width_decimal(rest).map(|(w, d)| AsciiForm::DExp(w, d)),
        other => Err(malformed(format!("unknown type code {:?}", other as char))),
    }
}

/// One column of an ASCII table extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsciiField {
    /// Column name, right-trimmed TTYPEn or synthesized.
    pub name: String,
    /// Column format.
    pub form: AsciiForm,
    /// 0-based byte position within a row (from the 1-based TBCOLn).
    pub start: usize,
}

impl AsciiField {
    /// Byte range this field occupies within one row.
    pub fn span(&self) -> Range<usize> {
        self.start..self.start + self.form.width()
    }
}

/// Build ASCII-table field descriptors from header keywords.
pub fn ascii_fields_from_keys(
    mandatory: &KeyMap,
    reserved: &KeyMap,
    record_mode: bool,
) -> Result<Vec<AsciiField>> {
    let tfields = key_int(mandatory, "TFIELDS")
        .ok_or_else(|| Error::KeyNotFound(String::from("TFIELDS")))?
        .max(0) as usize;

    let mut fields = Vec::with_capacity(tfields);
    for j in 1..=tfields {
        let tform = key_str(mandatory, &format!("TFORM{}", j)).ok_or_else(|| {
            Error::KeyNotFound(format!("TFORM{}", j))
        })?;
        let form = parse_ascii_tform(&tform, j)?;

        let tbcol = key_int(mandatory, &format!("TBCOL{}", j)).ok_or_else(|| {
            Error::KeyNotFound(format!("TBCOL{}", j))
        })?;
        if tbcol < 1 {
            return Err(Error::MalformedField {
                column: j,
                reason: format!("TBCOL {} is not positive", tbcol),
            });
        }

        let name = key_str(reserved, &format!("TTYPE{}", j))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| default_name(j, record_mode));

        fields.push(AsciiField {
            name,
            form,
            start: (tbcol - 1) as usize,
        });
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn keymap(pairs: &[(&str, Value)]) -> KeyMap {
        let mut m = HashMap::new();
        for (k, v) in pairs {
            m.insert(k.to_string(), v.clone());
        }
        m
    }

    #[test]
    fn parse_tform_single_int() {
        let spec = parse_tform("1J", 1).unwrap();
        assert_eq!(spec.repeat, 1);
        assert_eq!(spec.kind, FieldType::Int);
        assert!(spec.pntr.is_none());
        assert!(spec.supp.is_none());
    }

    #[test]
    fn parse_tform_no_repeat_prefix() {
        let spec = parse_tform("E", 1).unwrap();
        assert_eq!(spec.repeat, 1);
        assert_eq!(spec.kind, FieldType::Float);
    }

    #[test]
    fn parse_tform_repeat_string() {
        let spec = parse_tform("20A", 1).unwrap();
        assert_eq!(spec.repeat, 20);
        assert_eq!(spec.kind, FieldType::Ascii);
        assert_eq!(field_width(&spec), 20);
    }

    #[test]
    fn parse_tform_bits() {
        let spec = parse_tform("13X", 1).unwrap();
        assert_eq!(spec.repeat, 13);
        assert_eq!(field_width(&spec), 2);
    }

    #[test]
    fn parse_tform_var_array() {
        let spec = parse_tform("1PE(5)", 2).unwrap();
        assert_eq!(spec.repeat, 1);
        assert_eq!(spec.pntr, Some(PtrType::P));
        assert_eq!(spec.kind, FieldType::Float);
        assert_eq!(spec.supp.as_deref(), Some("5"));
        assert_eq!(field_width(&spec), 8);
    }

    #[test]
    fn parse_tform_var_array_q() {
        let spec = parse_tform("QD", 1).unwrap();
        assert_eq!(spec.pntr, Some(PtrType::Q));
        assert_eq!(spec.kind, FieldType::Double);
        assert_eq!(field_width(&spec), 16);
    }

    #[test]
    fn parse_tform_pointer_repeat_clamped() {
        let spec = parse_tform("3PJ(9)", 4).unwrap();
        assert_eq!(spec.repeat, 1);
        assert_eq!(field_width(&spec), 8);
    }

    #[test]
    fn parse_tform_zero_repeat() {
        let spec = parse_tform("0E", 1).unwrap();
        assert_eq!(spec.repeat, 0);
        assert_eq!(field_width(&spec), 0);
    }

    #[test]
    fn parse_tform_rejects_garbage() {
        for bad in ["", "1Z", "J1", "PP", "1.5E", "E(", "one-J"] {
            let err = parse_tform(bad, 7);
            match err {
                Err(Error::MalformedField { column: 7, .. }) => {}
                other => panic!("expected MalformedField for {:?}, got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn byte_len_packs_bits() {
        assert_eq!(FieldType::Bit.byte_len(0), 0);
        assert_eq!(FieldType::Bit.byte_len(1), 1);
        assert_eq!(FieldType::Bit.byte_len(8), 1);
        assert_eq!(FieldType::Bit.byte_len(13), 2);
        assert_eq!(FieldType::Bit.byte_len(16), 2);
        assert_eq!(FieldType::Float.byte_len(3), 12);
        assert_eq!(FieldType::Ascii.byte_len(5), 5);
    }

    #[test]
    fn widths_per_type() {
        for (tform, width) in [
            ("1L", 1),
            ("1B", 1),
            ("1I", 2),
            ("1J", 4),
            ("1K", 8),
            ("1E", 4),
            ("1D", 8),
            ("1C", 8),
            ("1M", 16),
            ("9X", 2),
        ] {
            let spec = parse_tform(tform, 1).unwrap();
            assert_eq!(field_width(&spec), width, "width of {}", tform);
        }
    }

    #[test]
    fn tform_render_round_trip() {
        for tform in ["1J", "3A", "13X", "1PE(5)", "1QK(200)"] {
            let spec = parse_tform(tform, 1).unwrap();
            let field = BinaryField::from_spec(String::from("COL"), spec, 0);
            assert_eq!(field.tform(), tform);
        }
    }

    #[test]
    fn fields_from_keys_layout() {
        let mandatory = keymap(&[
            ("TFIELDS", Value::Integer(3)),
            ("TFORM1", Value::String(String::from("1J"))),
            ("TFORM2", Value::String(String::from("3A"))),
            ("TFORM3", Value::String(String::from("2E"))),
        ]);
        let reserved = keymap(&[
            ("TTYPE1", Value::String(String::from("ID  "))),
            ("TUNIT3", Value::String(String::from("adu"))),
        ]);

        let fields = binary_fields_from_keys(&mandatory, &reserved, false).unwrap();
        assert_eq!(fields.len(), 3);

        assert_eq!(fields[0].name, "ID");
        assert_eq!(fields[0].span, 0..4);
        assert_eq!(fields[1].name, "column2");
        assert_eq!(fields[1].span, 4..7);
        assert_eq!(fields[2].span, 7..15);
        assert_eq!(fields[2].unit.as_deref(), Some("adu"));

        // Record length is the sum of widths; spans tile it exactly.
        let total: usize = fields.iter().map(|f| f.width()).sum();
        assert_eq!(total, 15);
    }

    #[test]
    fn fields_from_keys_record_mode_names() {
        let mandatory = keymap(&[
            ("TFIELDS", Value::Integer(1)),
            ("TFORM1", Value::String(String::from("1E"))),
        ]);
        let fields = binary_fields_from_keys(&mandatory, &KeyMap::new(), true).unwrap();
        assert_eq!(fields[0].name, "field1");
    }

    #[test]
    fn scaling_defaults_and_annotations() {
        let mandatory = keymap(&[
            ("TFIELDS", Value::Integer(3)),
            ("TFORM1", Value::String(String::from("1I"))),
            ("TFORM2", Value::String(String::from("1L"))),
            ("TFORM3", Value::String(String::from("1J"))),
        ]);
        let reserved = keymap(&[
            ("TSCAL1", Value::Float(0.5)),
            ("TZERO1", Value::Integer(100)),
            ("TNULL3", Value::Integer(-999)),
        ]);

        let fields = binary_fields_from_keys(&mandatory, &reserved, false).unwrap();
        assert_eq!(fields[0].scaling(), Some((0.5, 100.0)));
        // Logical columns never scale.
        assert_eq!(fields[1].scale, None);
        assert_eq!(fields[1].zero, None);
        // Identity transform reports no scaling.
        assert_eq!(fields[2].scaling(), None);
        assert_eq!(fields[2].null, Some(-999));
    }

    #[test]
    fn tdim_parsing() {
        let mandatory = keymap(&[
            ("TFIELDS", Value::Integer(1)),
            ("TFORM1", Value::String(String::from("12E"))),
        ]);
        let reserved = keymap(&[("TDIM1", Value::String(String::from("(3,4)")))]);
        let fields = binary_fields_from_keys(&mandatory, &reserved, false).unwrap();
        assert_eq!(fields[0].dims, Some(vec![3, 4]));
    }

    #[test]
    fn missing_tform_is_key_not_found() {
        let mandatory = keymap(&[("TFIELDS", Value::Integer(2))]);
        assert!(matches!(
            binary_fields_from_keys(&mandatory, &KeyMap::new(), false),
            Err(Error::KeyNotFound(k)) if k == "TFORM1"
        ));
    }

    #[test]
    fn ascii_tform_forms() {
        assert_eq!(parse_ascii_tform("A20", 1).unwrap(), AsciiForm::Char(20));
        assert_eq!(parse_ascii_tform("I10", 1).unwrap(), AsciiForm::Int(10));
        assert_eq!(
            parse_ascii_tform("F12.4", 1).unwrap(),
            AsciiForm::Fixed(12, 4)
        );
        assert_eq!(
            parse_ascii_tform("E15.7", 1).unwrap(),
            AsciiForm::Exp(15, 7)
        );
        assert_eq!(
            parse_ascii_tform("D25.17", 1).unwrap(),
            AsciiForm::DExp(25, 17)
        );
        assert!(parse_ascii_tform("G10", 1).is_err());
        assert!(parse_ascii_tform("F12", 1).is_err());
    }

    #[test]
    fn ascii_fields_from_keys_layout() {
        let mandatory = keymap(&[
            ("TFIELDS", Value::Integer(2)),
            ("TFORM1", Value::String(String::from("I5"))),
            ("TBCOL1", Value::Integer(1)),
            ("TFORM2", Value::String(String::from("A8"))),
            ("TBCOL2", Value::Integer(7)),
        ]);
        let reserved = keymap(&[("TTYPE2", Value::String(String::from("NAME")))]);

        let fields = ascii_fields_from_keys(&mandatory, &reserved, false).unwrap();
        assert_eq!(fields[0].span(), 0..5);
        assert_eq!(fields[0].name, "column1");
        assert_eq!(fields[1].span(), 6..14);
        assert_eq!(fields[1].name, "NAME");
    }
}
