//! Dispatch state machines (spec §4.3–§4.5, §2 item 8): read, write/unmap/
//! flush, read-repair, and the background process pipeline.

pub mod process;
pub mod read;
pub mod repair;
pub mod write;
