//! Inode and block index allocation.
//!
//! Both cursors only ever move forward; freed indices are never reused
//! (deletion paths do not reclaim bitmap bytes). The superblock is
//! persisted before the bitmap byte so a crash cannot leave a marked
//! bitmap bit without the matching cursor advance.

use super::Superblock;
use crate::codec::ImageFile;
use crate::error::{Error, Result};

/// Claims the next free inode index and marks it in the bitmap.
pub fn alloc_inode(img: &mut ImageFile, part_start: i64, sb: &mut Superblock) -> Result<i64> {
    let index = sb.first_inode + 1;
    if index >= sb.inodes_count {
        return Err(Error::NoFreeInodes);
    }
    sb.first_inode = index;
    sb.free_inodes_count -= 1;
    sb.write(img, part_start)?;
    img.write_at((sb.bm_inode_start + index) as u64, b"1")?;
    Ok(index)
}

/// Claims the next free block index and marks it in the bitmap.
pub fn alloc_block(img: &mut ImageFile, part_start: i64, sb: &mut Superblock) -> Result<i64> {
    let index = sb.first_block + 1;
    if index >= sb.blocks_count {
        return Err(Error::NoFreeBlocks);
    }
    sb.first_block = index;
    sb.free_blocks_count -= 1;
    sb.write(img, part_start)?;
    img.write_at((sb.bm_block_start + index) as u64, b"1")?;
    Ok(index)
}
