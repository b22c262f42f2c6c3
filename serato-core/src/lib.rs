//! serato-core: Serato DJ library files with write support
//!
//! This crate reads and writes:
//! - `_Serato_/database V2` (tracks) - tag stream
//! - `_Serato_/Subcrates/*.crate` (crates) - tag stream
//! - `_Serato_/neworder.pref` (crate hierarchy) - UTF-16 text
//! - cue, loop and beat grid markers embedded in audio files
//!
//! Every file is regenerated byte-for-byte from what was read, and saving
//! only touches files whose contents changed.

pub mod config;
pub mod crate_file;
pub mod crate_tree;
pub mod database;
pub mod error;
pub mod layout;
pub mod marker;
pub mod order;
pub mod store;
pub mod string;
pub mod tag;
pub mod track;

pub use config::LibraryConfig;
pub use crate_tree::{CrateId, CrateTree, TrackEntry};
pub use database::{Database, DatabaseState, SaveSummary};
pub use error::{Error, LinkageError, Result};
pub use marker::{CueMarker, GridMarker, LoopMarker, Marker, Rgb, TrackMarkers};
pub use order::CrateOrderFile;
pub use store::{EmbeddedFields, Id3MarkerStore, LegacyLayout, MarkerFieldStore, MemoryMarkerStore};
pub use tag::{Tag, TagId, TagKind, TagObject, TagValue};
pub use track::Track;
