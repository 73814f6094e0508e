//! Directory entry insertion and directory creation.

use super::{
    BLOCK_SIZE, DIRECT_BLOCKS, DirBlock, DirEntry, FREE, Inode, NAME_LEN, RESERVED, Superblock,
    TYPE_DIRECTORY, alloc, path,
};
use crate::codec::{self, ImageFile};
use crate::error::{Error, Result};
use crate::session::Session;

/// A directory entry reserved while its target inode is built.
pub struct Reservation {
    /// Absolute offset of the directory block holding the entry.
    pub block_offset: u64,
    /// Index of the entry inside the block.
    pub entry: usize,
}

/// Reserves a vacant entry named `name` in the directory at inode index
/// `parent`.
///
/// The entry is persisted with the `-2` sentinel before any inode is
/// written, so a crash mid-creation cannot leave a valid entry pointing
/// at an uninitialized inode; [`commit_entry`] later binds it. A new
/// directory block is allocated onto the parent when every existing one
/// is full.
pub fn insert_entry(
    img: &mut ImageFile,
    part_start: i64,
    sb: &mut Superblock,
    parent: i64,
    name: &str,
) -> Result<Reservation> {
    if name.len() > NAME_LEN {
        return Err(Error::NameTooLong(name.to_owned()));
    }
    let parent_offset = sb.inode_offset(parent);
    let mut inode: Inode = img.read_record(parent_offset)?;
    for slot in 0..DIRECT_BLOCKS {
        if inode.blocks[slot] == FREE {
            let block = alloc::alloc_block(img, part_start, sb)?;
            img.write_record(sb.block_offset(block), &DirBlock::seeded(parent, parent))?;
            inode.blocks[slot] = block;
            img.write_record(parent_offset, &inode)?;
        }
        let block_offset = sb.block_offset(inode.blocks[slot]);
        let mut dir: DirBlock = img.read_record(block_offset)?;
        if let Some(entry) = dir.entries.iter().position(|e| e.inode == FREE) {
            dir.entries[entry] = DirEntry {
                name: codec::pad_str(name),
                inode: RESERVED,
            };
            img.write_record(block_offset, &dir)?;
            return Ok(Reservation {
                block_offset,
                entry,
            });
        }
    }
    Err(Error::NoSpace)
}

/// Binds a reserved entry to `child`, completing the insertion.
pub fn commit_entry(img: &mut ImageFile, reservation: &Reservation, child: i64) -> Result<()> {
    let mut dir: DirBlock = img.read_record(reservation.block_offset)?;
    dir.entries[reservation.entry].inode = child;
    img.write_record(reservation.block_offset, &dir)
}

/// Creates the directory at `path_str`.
///
/// Missing intermediate components require `create_parents`; the final
/// component already existing as a directory is not an error.
pub fn mkdir(
    img: &mut ImageFile,
    part_start: i64,
    sb: &mut Superblock,
    session: &Session,
    path_str: &str,
    create_parents: bool,
) -> Result<()> {
    let comps = path::components(path_str)?;
    let mut index = 0;
    let mut inode: Inode = img.read_record(sb.inode_offset(0))?;
    for (depth, comp) in comps.iter().enumerate() {
        if !inode.is_directory() {
            return Err(Error::NotADirectory((*comp).to_owned()));
        }
        match path::lookup(img, sb, &inode, comp)? {
            Some(child) => index = child,
            None => {
                if !create_parents && depth + 1 < comps.len() {
                    return Err(Error::NotFound((*comp).to_owned()));
                }
                index = create_directory(img, part_start, sb, session, index, comp)?;
            }
        }
        inode = img.read_record(sb.inode_offset(index))?;
    }
    if !inode.is_directory() {
        return Err(Error::NotADirectory(path_str.to_owned()));
    }
    Ok(())
}

/// Allocates one new directory named `name` and links it under `parent`.
fn create_directory(
    img: &mut ImageFile,
    part_start: i64,
    sb: &mut Superblock,
    session: &Session,
    parent: i64,
    name: &str,
) -> Result<i64> {
    let reservation = insert_entry(img, part_start, sb, parent, name)?;
    let child = alloc::alloc_inode(img, part_start, sb)?;
    let block = alloc::alloc_block(img, part_start, sb)?;

    let mut inode = Inode::new(TYPE_DIRECTORY, session.uid, session.gid);
    inode.size = BLOCK_SIZE as i64;
    inode.blocks[0] = block;
    img.write_record(sb.block_offset(block), &DirBlock::seeded(child, parent))?;
    img.write_record(sb.inode_offset(child), &inode)?;

    commit_entry(img, &reservation, child)?;
    Ok(child)
}
