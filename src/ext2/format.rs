//! Partition formatting.

use super::{
    BLOCK_SIZE, DirBlock, DirEntry, FILE_PAYLOAD, FileBlock, Inode, SUPPORTED_FS, Superblock,
    TYPE_DIRECTORY, TYPE_REGULAR,
};
use crate::codec::{self, ImageFile, Record};
use crate::disk::PartitionSlot;
use crate::error::{Error, Result};
use crate::util;
use std::str::FromStr;

/// Content seeded into `users.txt` by a full format.
pub const USERS_SEED: &str = "1,G,root\n1,U,root,root,123\n";

/// Placeholder stored in `umtime` until the first unmount.
const UMTIME_EPOCH: &str = "1900-01-01 00:00";

/// Formatting mode.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FormatMode {
    /// Lay out the structures only.
    Fast,
    /// Lay out the structures and seed the root directory and
    /// `users.txt`.
    Full,
}

impl FromStr for FormatMode {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "full" => Ok(Self::Full),
            _ => Err(()),
        }
    }
}

/// Formats the partition `part` with the EXT2-style layout.
///
/// The inode count is `n = (size - sizeof(superblock)) / (4 + sizeof(inode)
/// + 3 * sizeof(block))` and the block count `3n`: each inode costs its
/// table entry, one bitmap byte, and three blocks with their bitmap bytes.
pub fn format(img: &mut ImageFile, part: &PartitionSlot, mode: FormatMode) -> Result<()> {
    let n = (part.size - Superblock::SIZE as i64)
        / (4 + Inode::SIZE as i64 + 3 * BLOCK_SIZE as i64);
    if n <= 0 {
        return Err(Error::BadSize);
    }
    let inodes = n;
    let blocks = 3 * n;

    let bm_inode_start = part.start + Superblock::SIZE as i64;
    let bm_block_start = bm_inode_start + inodes;
    let inode_start = bm_block_start + blocks;
    let block_start = inode_start + inodes * Inode::SIZE as i64;
    let mut sb = Superblock {
        filesystem_type: SUPPORTED_FS,
        inodes_count: inodes,
        blocks_count: blocks,
        free_inodes_count: inodes,
        free_blocks_count: blocks,
        mtime: util::timestamp_field(),
        umtime: codec::pad_str(UMTIME_EPOCH),
        mnt_count: 1,
        bm_inode_start,
        bm_block_start,
        inode_start,
        block_start,
        first_inode: 0,
        first_block: 0,
    };
    sb.write(img, part.start)?;

    img.write_at(sb.bm_inode_start as u64, &vec![b'0'; inodes as usize])?;
    img.write_at(sb.bm_block_start as u64, &vec![b'0'; blocks as usize])?;
    img.write_at(
        sb.inode_start as u64,
        &vec![0; inodes as usize * Inode::SIZE],
    )?;
    img.write_at(sb.block_start as u64, &vec![0; inodes as usize * BLOCK_SIZE])?;

    if mode == FormatMode::Full {
        seed(img, part.start, &mut sb)?;
    }
    img.sync()
}

/// Seeds inode 0 (the root directory) and inode 1 (`users.txt`).
fn seed(img: &mut ImageFile, part_start: i64, sb: &mut Superblock) -> Result<()> {
    sb.free_inodes_count -= 2;
    sb.free_blocks_count -= 2;
    sb.first_inode = 1;
    sb.first_block = 1;
    sb.write(img, part_start)?;
    img.write_at(sb.bm_inode_start as u64, b"11")?;
    img.write_at(sb.bm_block_start as u64, b"11")?;

    let mut root = Inode::new(TYPE_DIRECTORY, 0, 0);
    root.size = BLOCK_SIZE as i64;
    root.blocks[0] = 0;
    img.write_record(sb.inode_offset(0), &root)?;

    let mut users = Inode::new(TYPE_REGULAR, 0, 0);
    users.size = USERS_SEED.len() as i64;
    users.blocks[0] = 1;
    img.write_record(sb.inode_offset(1), &users)?;

    let mut block0 = DirBlock::seeded(0, 0);
    block0.entries[2] = DirEntry::new("users.txt", 1);
    img.write_record(sb.block_offset(0), &block0)?;

    let block1 = FileBlock::new(USERS_SEED.as_bytes());
    img.write_record(sb.block_offset(1), &block1)
}

// The seed must fit in the first file block.
const _: () = assert!(USERS_SEED.len() <= FILE_PAYLOAD);
