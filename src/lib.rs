//! FITS header-data-unit construction, verification, and serialization.
//!
//! Build HDUs from data, from cards, or both with [`hdu::Hdu::new`]; the
//! variant dispatcher, the geometry verifier, and the mandatory-card
//! constructor keep headers and bodies consistent. Read streams with
//! [`codec::read_fits`] and write them back byte-exact (2880-byte blocks,
//! big-endian bodies, binary-table heap) with [`codec::write_fits`].
//!
//! Warnings from self-healing verification go to the `tracing` `warn`
//! level; no subscriber is installed by the library.

#![warn(missing_docs)]

/// Bit-packed vectors for binary-table X columns.
pub mod bits;
/// FITS 2880-byte block utilities and constants.
pub mod block;
/// Header cards and the ordered keyword store.
pub mod card;
/// Stream codec: header loop, per-variant bodies, heap, multi-HDU files.
pub mod codec;
/// Body geometry descriptors and the BITPIX type map.
pub mod dataform;
/// Big-endian byte conversion helpers.
pub mod endian;
/// Error types used throughout the crate.
pub mod error;
/// Per-column field descriptors for binary and ASCII tables.
pub mod field;
/// HDU variants, body model, dispatch, construction, verification.
pub mod hdu;
/// Construction and serialization options.
pub mod options;
/// Header value representation, parsing, and formatting.
pub mod value;

pub use block::{BLOCK_SIZE, CARDS_PER_BLOCK, CARD_SIZE};
pub use card::{Card, CardDeck};
pub use codec::{read_fits, read_hdu, write_fits, write_hdu};
pub use error::{Error, Result};
pub use hdu::{Body, Hdu, HduKind};
pub use options::Options;
pub use value::Value;
