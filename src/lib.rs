//! An emulated UNIX-like disk subsystem inside a single image file.
//!
//! A disk image holds an MBR with up to four partitions (plus logical
//! partitions chained through EBRs inside the extended one); partitions
//! are formatted with a simplified EXT2-style filesystem and mounted
//! under short identifiers. A line-oriented command language drives
//! partitioning, formatting, authentication and file operations.

pub mod cmd;
pub mod codec;
pub mod disk;
pub mod error;
pub mod ext2;
pub mod mount;
pub mod session;
pub mod users;
pub mod util;
