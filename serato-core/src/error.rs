//! Error types for serato-core

use thiserror::Error;

use crate::crate_tree::CrateId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Binary format error: {0}")]
    BinRw(String),

    /// Structurally invalid length or identifier inside a tag stream
    #[error("Malformed tag: {0}")]
    MalformedTag(String),

    /// A marker record whose literal name or beat count is unusable
    #[error("Marker format error: {0}")]
    MarkerFormat(String),

    #[error("String encoding error: {0}")]
    StringEncoding(String),

    #[error("Audio tag error: {0}")]
    AudioTag(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<binrw::Error> for Error {
    fn from(e: binrw::Error) -> Self {
        Error::BinRw(e.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Error::MarkerFormat(format!("invalid base64: {}", e))
    }
}

impl From<id3::Error> for Error {
    fn from(e: id3::Error) -> Self {
        Error::AudioTag(e.to_string())
    }
}

/// Violations of the crate tree's ownership contract.
///
/// These always indicate a caller bug. The asserting tree operations panic
/// with this error's message; the `try_*` forms hand it back instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkageError {
    #[error("LinkageError: crate {child:?} already has a parent")]
    AlreadyParented { child: CrateId },

    #[error("LinkageError: crate {child:?} is not a child of {parent:?}")]
    NotAChild { parent: CrateId, child: CrateId },

    #[error("LinkageError: adding {child:?} under {parent:?} would create a cycle")]
    Cycle { parent: CrateId, child: CrateId },

    #[error("LinkageError: '{name}' is not a valid crate name")]
    InvalidName { name: String },

    #[error("LinkageError: {parent:?} already has a crate named '{name}'")]
    DuplicateName { parent: CrateId, name: String },

    #[error("LinkageError: track entry '{path}' already belongs to a crate")]
    EntryAlreadyOwned { path: String },

    #[error("LinkageError: crate {owner:?} has no track entry {index} on volume {volume}")]
    EntryNotInCrate { owner: CrateId, volume: String, index: usize },
}
