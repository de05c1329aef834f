//! Construction and serialization options.

/// Recognized configuration for HDU construction and card layout.
///
/// The card-layout fields (`fixed`, `slash`, `lpad`, `rpad`, `truncate`,
/// `append`) are passed through to the card serializer; the rest steer the
/// HDU layer itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// Render a binary-table body as a sequence of row records rather than
    /// a map of column arrays.
    pub record: bool,
    /// Apply the `zero + scale * value` transform when reading numeric
    /// columns that carry TSCALn/TZEROn.
    pub scale: bool,
    /// Emit CONTINUE cards for string values too long for one card.
    pub append: bool,
    /// Fixed-format card emission (value right-justified to column 30).
    pub fixed: bool,
    /// Column at which the comment separator is placed when the value is
    /// shorter.
    pub slash: usize,
    /// Spaces before the comment separator.
    pub lpad: usize,
    /// Spaces after the comment separator.
    pub rpad: usize,
    /// Truncate overlong string values to fit one card; when false (and
    /// `append` is also false), rendering an overlong value is an error.
    pub truncate: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            record: false,
            scale: true,
            append: false,
            fixed: true,
            slash: 32,
            lpad: 1,
            rpad: 1,
            truncate: true,
        }
    }
}
