//! On-disk records of the EXT2-style filesystem.
//!
//! A formatted partition starts with the superblock, followed by the
//! inode bitmap, the block bitmap, the inode table and the block area.
//! Directory and file blocks share the same 80-byte footprint, so block
//! `i` always lives at `block_start + i * 80`.

pub mod alloc;
pub mod dir;
pub mod file;
pub mod format;
pub mod path;

use crate::codec::{ImageFile, Reader, Record, Writer};
use crate::error::{Error, Result};
use crate::util::{self, TIMESTAMP_LEN};

/// Filesystem magic of the only supported revision.
pub const SUPPORTED_FS: i64 = 2;
/// Number of direct block pointers per inode.
pub const DIRECT_BLOCKS: usize = 16;
/// Entries per directory block.
pub const DIR_ENTRIES: usize = 4;
/// Maximum length of a directory entry name in bytes.
pub const NAME_LEN: usize = 12;
/// Bytes of payload carried by one file block.
pub const FILE_PAYLOAD: usize = 64;
/// On-disk footprint shared by directory and file blocks.
pub const BLOCK_SIZE: usize = DIR_ENTRIES * (NAME_LEN + 8);
/// A vacant directory entry or unused block pointer.
pub const FREE: i64 = -1;
/// Reservation sentinel of a directory entry whose inode is still being
/// built. Invisible to readers.
pub const RESERVED: i64 = -2;

/// Inode type byte: directory.
pub const TYPE_DIRECTORY: u8 = 0;
/// Inode type byte: regular file.
pub const TYPE_REGULAR: u8 = 1;
/// Permission bits set on everything this filesystem creates.
pub const DEFAULT_PERM: u16 = 0o664;

/// The first record of a formatted partition.
#[derive(Clone, Copy)]
pub struct Superblock {
    /// Filesystem magic, `2` for the supported revision.
    pub filesystem_type: i64,
    /// Total number of inodes.
    pub inodes_count: i64,
    /// Total number of blocks.
    pub blocks_count: i64,
    /// Number of unallocated inodes.
    pub free_inodes_count: i64,
    /// Number of unallocated blocks.
    pub free_blocks_count: i64,
    /// Date of the last mount.
    pub mtime: [u8; TIMESTAMP_LEN],
    /// Date of the last unmount.
    pub umtime: [u8; TIMESTAMP_LEN],
    /// Number of mounts since creation.
    pub mnt_count: i64,
    /// Absolute offset of the inode bitmap.
    pub bm_inode_start: i64,
    /// Absolute offset of the block bitmap.
    pub bm_block_start: i64,
    /// Absolute offset of the inode table.
    pub inode_start: i64,
    /// Absolute offset of the block area.
    pub block_start: i64,
    /// Index of the last allocated inode. Monotonic.
    pub first_inode: i64,
    /// Index of the last allocated block. Monotonic.
    pub first_block: i64,
}

impl Record for Superblock {
    const SIZE: usize = 12 * 8 + 2 * TIMESTAMP_LEN;

    fn decode(r: &mut Reader<'_>) -> Self {
        Self {
            filesystem_type: r.i64(),
            inodes_count: r.i64(),
            blocks_count: r.i64(),
            free_inodes_count: r.i64(),
            free_blocks_count: r.i64(),
            mtime: r.array(),
            umtime: r.array(),
            mnt_count: r.i64(),
            bm_inode_start: r.i64(),
            bm_block_start: r.i64(),
            inode_start: r.i64(),
            block_start: r.i64(),
            first_inode: r.i64(),
            first_block: r.i64(),
        }
    }

    fn encode(&self, w: &mut Writer<'_>) {
        w.i64(self.filesystem_type);
        w.i64(self.inodes_count);
        w.i64(self.blocks_count);
        w.i64(self.free_inodes_count);
        w.i64(self.free_blocks_count);
        w.bytes(&self.mtime);
        w.bytes(&self.umtime);
        w.i64(self.mnt_count);
        w.i64(self.bm_inode_start);
        w.i64(self.bm_block_start);
        w.i64(self.inode_start);
        w.i64(self.block_start);
        w.i64(self.first_inode);
        w.i64(self.first_block);
    }
}

impl Superblock {
    /// Reads the superblock of the partition starting at `part_start`,
    /// rejecting unknown filesystem revisions.
    pub fn read(img: &mut ImageFile, part_start: i64) -> Result<Self> {
        let sb: Self = img.read_record(part_start as u64)?;
        if sb.filesystem_type != SUPPORTED_FS {
            return Err(Error::Decode(part_start as u64));
        }
        Ok(sb)
    }

    /// Writes the superblock back at the head of its partition.
    pub fn write(&self, img: &mut ImageFile, part_start: i64) -> Result<()> {
        img.write_record(part_start as u64, self)
    }

    /// Absolute offset of inode `index`.
    pub fn inode_offset(&self, index: i64) -> u64 {
        (self.inode_start + index * Inode::SIZE as i64) as u64
    }

    /// Absolute offset of block `index`.
    pub fn block_offset(&self, index: i64) -> u64 {
        (self.block_start + index * BLOCK_SIZE as i64) as u64
    }
}

/// A filesystem object: one regular file or directory.
#[derive(Clone, Copy)]
pub struct Inode {
    /// Owner user id.
    pub uid: i64,
    /// Owner group id.
    pub gid: i64,
    /// Content size in bytes.
    pub size: i64,
    /// Date of the last access.
    pub atime: [u8; TIMESTAMP_LEN],
    /// Date of creation.
    pub ctime: [u8; TIMESTAMP_LEN],
    /// Date of the last modification.
    pub mtime: [u8; TIMESTAMP_LEN],
    /// Type byte, `0` directory or `1` regular file.
    pub typ: u8,
    /// POSIX-style permission bits.
    pub perm: u16,
    /// Direct block indices; unused entries hold `-1`.
    pub blocks: [i64; DIRECT_BLOCKS],
}

impl Inode {
    /// A fresh inode owned by `uid`/`gid`, dated now, without blocks.
    pub fn new(typ: u8, uid: i64, gid: i64) -> Self {
        let now = util::timestamp_field();
        Self {
            uid,
            gid,
            size: 0,
            atime: now,
            ctime: now,
            mtime: now,
            typ,
            perm: DEFAULT_PERM,
            blocks: [FREE; DIRECT_BLOCKS],
        }
    }

    pub fn is_directory(&self) -> bool {
        self.typ == TYPE_DIRECTORY
    }

    pub fn is_regular(&self) -> bool {
        self.typ == TYPE_REGULAR
    }
}

impl Record for Inode {
    const SIZE: usize = 3 * 8 + 3 * TIMESTAMP_LEN + 1 + 2 + DIRECT_BLOCKS * 8;

    fn decode(r: &mut Reader<'_>) -> Self {
        let uid = r.i64();
        let gid = r.i64();
        let size = r.i64();
        let atime = r.array();
        let ctime = r.array();
        let mtime = r.array();
        let typ = r.u8();
        let perm = r.u16();
        let mut blocks = [FREE; DIRECT_BLOCKS];
        for block in &mut blocks {
            *block = r.i64();
        }
        Self {
            uid,
            gid,
            size,
            atime,
            ctime,
            mtime,
            typ,
            perm,
            blocks,
        }
    }

    fn encode(&self, w: &mut Writer<'_>) {
        w.i64(self.uid);
        w.i64(self.gid);
        w.i64(self.size);
        w.bytes(&self.atime);
        w.bytes(&self.ctime);
        w.bytes(&self.mtime);
        w.u8(self.typ);
        w.u16(self.perm);
        for block in &self.blocks {
            w.i64(*block);
        }
    }
}

/// One `(name, inode)` pair of a directory block.
#[derive(Clone, Copy)]
pub struct DirEntry {
    /// Zero-padded entry name.
    pub name: [u8; NAME_LEN],
    /// Target inode index, or [`FREE`] / [`RESERVED`].
    pub inode: i64,
}

impl DirEntry {
    pub fn vacant() -> Self {
        Self {
            name: [0; NAME_LEN],
            inode: FREE,
        }
    }

    pub fn new(name: &str, inode: i64) -> Self {
        Self {
            name: crate::codec::pad_str(name),
            inode,
        }
    }

    /// Tells whether the entry points at a real inode. Vacant and
    /// reserved entries are both unbound.
    pub fn is_bound(&self) -> bool {
        self.inode >= 0
    }

    pub fn name_str(&self) -> String {
        crate::codec::field_str(&self.name)
    }
}

/// One block of a directory's contents.
#[derive(Clone, Copy)]
pub struct DirBlock {
    pub entries: [DirEntry; DIR_ENTRIES],
}

impl DirBlock {
    /// A block with four vacant entries.
    pub fn empty() -> Self {
        Self {
            entries: [DirEntry::vacant(); DIR_ENTRIES],
        }
    }

    /// A fresh directory block whose first entries are `.` and `..`.
    pub fn seeded(own: i64, parent: i64) -> Self {
        let mut block = Self::empty();
        block.entries[0] = DirEntry::new(".", own);
        block.entries[1] = DirEntry::new("..", parent);
        block
    }
}

impl Record for DirBlock {
    const SIZE: usize = BLOCK_SIZE;

    fn decode(r: &mut Reader<'_>) -> Self {
        let mut block = Self::empty();
        for entry in &mut block.entries {
            entry.name = r.array();
            entry.inode = r.i64();
        }
        block
    }

    fn encode(&self, w: &mut Writer<'_>) {
        for entry in &self.entries {
            w.bytes(&entry.name);
            w.i64(entry.inode);
        }
    }
}

/// One block of a regular file's contents. The record shares the
/// directory block's footprint; only the first 64 bytes carry payload.
#[derive(Clone, Copy)]
pub struct FileBlock {
    pub content: [u8; FILE_PAYLOAD],
}

impl FileBlock {
    /// A block holding `chunk`, zero-padded.
    pub fn new(chunk: &[u8]) -> Self {
        let mut content = [0; FILE_PAYLOAD];
        content[..chunk.len()].copy_from_slice(chunk);
        Self { content }
    }
}

impl Record for FileBlock {
    const SIZE: usize = BLOCK_SIZE;

    fn decode(r: &mut Reader<'_>) -> Self {
        Self { content: r.array() }
    }

    fn encode(&self, w: &mut Writer<'_>) {
        w.bytes(&self.content);
    }
}
