use thiserror::Error;

/// All errors that can occur during FITS HDU operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A card-store lookup missed and no default was supplied.
    #[error("keyword not found: {0}")]
    KeyNotFound(String),
    /// Neither the supplied data nor the supplied keywords determine an HDU variant.
    #[error("cannot determine HDU variant from the given data and keywords")]
    UnknownHdu,
    /// The stream ended before an END card closed the header.
    #[error("end of stream before END card")]
    HeaderTruncated,
    /// A TFORM value did not match the descriptor grammar, or its type code is unknown.
    #[error("malformed field {column}: {reason}")]
    MalformedField {
        /// 1-based column number of the offending field.
        column: usize,
        /// What was wrong with the descriptor.
        reason: String,
    },
    /// Header geometry disagrees with the data (raised only where repair is impossible).
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Shape implied by the data.
        expected: Vec<usize>,
        /// Shape found in the header.
        actual: Vec<usize>,
    },
    /// Unrecognized BITPIX value.
    #[error("invalid BITPIX value: {0}")]
    InvalidBitpix(i64),
    /// A header card could not be parsed or rendered.
    #[error("invalid header card: {0}")]
    InvalidCard(String),
    /// An I/O error forwarded from the underlying stream.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_key_not_found() {
        let e = Error::KeyNotFound(String::from("EXTNAME"));
        assert_eq!(e.to_string(), "keyword not found: EXTNAME");
    }

    #[test]
    fn display_header_truncated() {
        assert_eq!(
            Error::HeaderTruncated.to_string(),
            "end of stream before END card"
        );
    }

    #[test]
    fn display_malformed_field() {
        let e = Error::MalformedField {
            column: 3,
            reason: String::from("unknown type code 'Z'"),
        };
        assert_eq!(e.to_string(), "malformed field 3: unknown type code 'Z'");
    }

    #[test]
    fn display_shape_mismatch() {
        let e = Error::ShapeMismatch {
            expected: vec![7, 5],
            actual: vec![4, 5],
        };
        assert_eq!(e.to_string(), "shape mismatch: expected [7, 5], got [4, 5]");
    }

    #[test]
    fn io_error_from_conversion() {
        let io_err = std::io::Error::other("oops");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
    }

    #[test]
    fn result_type_alias() {
        let ok: Result<u32> = Ok(42);
        assert!(ok.is_ok());
        let err: Result<u32> = Err(Error::UnknownHdu);
        assert!(err.is_err());
    }
}
