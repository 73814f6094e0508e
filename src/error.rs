//! Error taxonomy shared by every layer of the crate.

use std::io;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every way an operation can fail.
///
/// The dispatcher renders these as single-line `❌` messages; nothing is
/// recovered internally and partial writes are not rolled back.
#[derive(Debug, Error)]
pub enum Error {
    // Parse errors
    #[error("missing required parameter `{0}`")]
    MissingParameter(&'static str),
    #[error("duplicate parameter `{0}`")]
    DuplicateParameter(String),
    #[error("unknown parameter `{0}`")]
    UnknownParameter(String),
    #[error("invalid value for `{0}`: `{1}`")]
    InvalidValue(&'static str, String),

    // Domain errors
    #[error("disk image paths must end in `.mia`")]
    BadExtension,
    #[error("size must be a positive integer")]
    BadSize,
    #[error("a partition named `{0}` already exists")]
    DuplicateName(String),
    #[error("only one extended partition is allowed per disk")]
    ExtendedExists,
    #[error("a logical partition requires an extended partition")]
    NoExtended,
    #[error("no more than 4 primary and extended partitions are allowed")]
    PartitionLimit,
    #[error("partition `{0}` was not found")]
    PartitionNotFound(String),
    #[error("an extended partition cannot be mounted")]
    ExtendedNotMountable,
    #[error("filesystem `{0}` is not supported")]
    UnsupportedFilesystem(String),
    #[error("`{0}` is a directory")]
    IsADirectory(String),
    #[error("`{0}` already exists")]
    AlreadyExists(String),
    #[error("group `{0}` already exists")]
    GroupExists(String),
    #[error("user `{0}` already exists")]
    UserExists(String),
    #[error("unknown group `{0}`")]
    UnknownGroup(String),
    #[error("user `{0}` was not found")]
    UserNotFound(String),
    #[error("name `{0}` is too long")]
    NameTooLong(String),

    // Resource errors
    #[error("no contiguous free region is large enough")]
    NoSpace,
    #[error("no free inodes left")]
    NoFreeInodes,
    #[error("no free blocks left")]
    NoFreeBlocks,
    #[error("contents exceed the maximum file size")]
    FileTooLarge,
    #[error("no room to register more disks")]
    NoRoomDisks,
    #[error("no room to mount more partitions on this disk")]
    NoRoomPartitions,

    // State errors
    #[error("the partition is already mounted")]
    AlreadyMounted,
    #[error("no mounted partition matches id `{0}`")]
    NotMounted(String),
    #[error("no partitions are mounted")]
    NoMounts,
    #[error("this command requires an active session")]
    NotLogged,
    #[error("a session is already active; log out first")]
    AlreadyLogged,
    #[error("only root may run this command")]
    NotRoot,
    #[error("invalid credentials")]
    BadCredentials,

    // Path errors
    #[error("paths must be absolute")]
    InvalidPath,
    #[error("`{0}` was not found")]
    NotFound(String),
    #[error("`{0}` is not a directory")]
    NotADirectory(String),

    // IO and corruption
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("corrupted record at offset {0}")]
    Decode(u64),
}
