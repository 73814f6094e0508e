//! Absolute path resolution.

use super::{DirBlock, FREE, Inode, Superblock};
use crate::codec::ImageFile;
use crate::error::{Error, Result};

/// Splits an absolute path into its components.
///
/// Relative paths are rejected; repeated separators are tolerated.
pub fn components(path: &str) -> Result<Vec<&str>> {
    let path = path.trim();
    if !path.starts_with('/') {
        return Err(Error::InvalidPath);
    }
    Ok(path.split('/').filter(|c| !c.is_empty()).collect())
}

/// Looks up `name` among the direct directory blocks of `inode`.
///
/// Names match case-sensitively. Reserved entries are treated as absent.
pub fn lookup(
    img: &mut ImageFile,
    sb: &Superblock,
    inode: &Inode,
    name: &str,
) -> Result<Option<i64>> {
    for &block in &inode.blocks {
        if block == FREE {
            continue;
        }
        let dir: DirBlock = img.read_record(sb.block_offset(block))?;
        for entry in &dir.entries {
            if entry.is_bound() && entry.name_str() == name {
                return Ok(Some(entry.inode));
            }
        }
    }
    Ok(None)
}

/// Walks `path` from the root inode and returns the terminal inode index
/// and record. `/` resolves to inode 0.
pub fn resolve(img: &mut ImageFile, sb: &Superblock, path: &str) -> Result<(i64, Inode)> {
    let mut index = 0;
    let mut inode: Inode = img.read_record(sb.inode_offset(0))?;
    for comp in components(path)? {
        if !inode.is_directory() {
            return Err(Error::NotADirectory(comp.to_owned()));
        }
        match lookup(img, sb, &inode, comp)? {
            Some(child) => {
                index = child;
                inode = img.read_record(sb.inode_offset(child))?;
            }
            None => return Err(Error::NotFound(comp.to_owned())),
        }
    }
    Ok((index, inode))
}
