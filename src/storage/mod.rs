//! Local file storage for dumpvault
//!
//! The catalog and the schedule are small JSON documents that are always
//! rewritten in full. Writes go through a temp file and a rename so a crash
//! never leaves a half-written document behind.

pub mod file_io;

pub use file_io::{read_json, read_json_required, remove_file_if_exists, write_json_atomic};
