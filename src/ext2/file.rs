//! File content IO over the 16 direct block pointers.

use super::{
    DIRECT_BLOCKS, FILE_PAYLOAD, FREE, FileBlock, Inode, Superblock, TYPE_REGULAR, alloc, dir,
    path,
};
use crate::codec::ImageFile;
use crate::error::{Error, Result};
use crate::session::Session;
use std::fs;
use std::path::Path;

/// Largest content size a single inode can hold.
pub const MAX_FILE_SIZE: usize = DIRECT_BLOCKS * FILE_PAYLOAD;

/// Writes `bytes` as the whole content of the inode at `index`.
///
/// The content is split into 64-byte chunks, allocating a block for each
/// chunk whose pointer is still `-1`; pointers past the last chunk are
/// left at `-1`. The inode is persisted with its new size.
pub fn write_file(
    img: &mut ImageFile,
    part_start: i64,
    sb: &mut Superblock,
    index: i64,
    inode: &mut Inode,
    bytes: &[u8],
) -> Result<()> {
    let chunks: Vec<&[u8]> = bytes.chunks(FILE_PAYLOAD).collect();
    if chunks.len() > DIRECT_BLOCKS {
        return Err(Error::FileTooLarge);
    }
    for slot in 0..DIRECT_BLOCKS {
        match chunks.get(slot) {
            Some(chunk) => {
                if inode.blocks[slot] == FREE {
                    inode.blocks[slot] = alloc::alloc_block(img, part_start, sb)?;
                }
                img.write_record(sb.block_offset(inode.blocks[slot]), &FileBlock::new(chunk))?;
            }
            None => inode.blocks[slot] = FREE,
        }
    }
    inode.size = bytes.len() as i64;
    img.write_record(sb.inode_offset(index), inode)
}

/// Reads the content of `inode`, concatenating the non-zero bytes of
/// each block until the first unused pointer.
///
/// Embedded zero bytes are dropped: the filesystem is text only.
pub fn read_file(img: &mut ImageFile, sb: &Superblock, inode: &Inode) -> Result<Vec<u8>> {
    let mut content = Vec::new();
    for &block in &inode.blocks {
        if block == FREE {
            break;
        }
        let file: FileBlock = img.read_record(sb.block_offset(block))?;
        content.extend(file.content.iter().copied().filter(|b| *b != 0));
    }
    Ok(content)
}

/// Resolves `path_str` and returns its content as text.
pub fn read_path(img: &mut ImageFile, sb: &Superblock, path_str: &str) -> Result<String> {
    let (_, inode) = path::resolve(img, sb, path_str)?;
    if !inode.is_regular() {
        return Err(Error::IsADirectory(path_str.to_owned()));
    }
    let bytes = read_file(img, sb, &inode)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Creates a regular file at `path_str`.
///
/// The parent directory must exist unless `create_parents`; contents
/// come from the `source` host file, truncated or digit-padded to
/// `size` when `size > 0`, or from the repeating `0123456789` pattern.
pub fn mkfile(
    img: &mut ImageFile,
    part_start: i64,
    sb: &mut Superblock,
    session: &Session,
    path_str: &str,
    create_parents: bool,
    size: i64,
    source: Option<&Path>,
) -> Result<()> {
    let comps = path::components(path_str)?;
    let Some((name, parents)) = comps.split_last() else {
        return Err(Error::InvalidPath);
    };
    let parent_path = format!("/{}", parents.join("/"));
    if create_parents && !parents.is_empty() {
        dir::mkdir(img, part_start, sb, session, &parent_path, true)?;
    }
    let (parent, parent_inode) = path::resolve(img, sb, &parent_path)?;
    if !parent_inode.is_directory() {
        return Err(Error::NotADirectory(parent_path));
    }
    if path::lookup(img, sb, &parent_inode, name)?.is_some() {
        return Err(Error::AlreadyExists((*name).to_owned()));
    }

    let content = build_content(size, source)?;
    if content.len() > MAX_FILE_SIZE {
        return Err(Error::FileTooLarge);
    }

    let reservation = dir::insert_entry(img, part_start, sb, parent, name)?;
    let child = alloc::alloc_inode(img, part_start, sb)?;
    let mut inode = Inode::new(TYPE_REGULAR, session.uid, session.gid);
    img.write_record(sb.inode_offset(child), &inode)?;
    write_file(img, part_start, sb, child, &mut inode, &content)?;
    dir::commit_entry(img, &reservation, child)
}

/// Builds file contents from the host source or the digit pattern.
fn build_content(size: i64, source: Option<&Path>) -> Result<Vec<u8>> {
    let mut content = match source {
        Some(path) => fs::read(path)?,
        None => Vec::new(),
    };
    if size > 0 {
        let size = size as usize;
        content.truncate(size);
        while content.len() < size {
            content.push(b'0' + (content.len() % 10) as u8);
        }
    }
    Ok(content)
}

#[cfg(test)]
mod test {
    use super::super::format::{self, FormatMode};
    use super::*;
    use crate::disk::{self, Fit, PartKind};
    use std::path::PathBuf;

    fn session() -> Session {
        Session {
            user: "root".to_owned(),
            pass: "123".to_owned(),
            mount_id: "751A".to_owned(),
            uid: 1,
            gid: 1,
        }
    }

    fn formatted(name: &str) -> (PathBuf, i64) {
        let path = std::env::temp_dir().join(format!(
            "vdisk-file-{name}-{}.mia",
            std::process::id()
        ));
        let _ = fs::remove_file(&path);
        disk::create_image(&path, 4 * 1024 * 1024, Fit::First).unwrap();
        disk::create_partition(&path, 2 * 1024 * 1024, "p1", PartKind::Primary, Fit::First)
            .unwrap();
        let part = disk::find_partition(&path, "p1").unwrap();
        let mut img = ImageFile::open(&path).unwrap();
        format::format(&mut img, &part, FormatMode::Full).unwrap();
        (path, part.start)
    }

    #[test]
    fn write_then_read_round_trips() {
        let (path, part_start) = formatted("roundtrip");
        let mut img = ImageFile::open(&path).unwrap();
        let mut sb = Superblock::read(&mut img, part_start).unwrap();

        // Three blocks worth of text, no embedded zero bytes.
        let text: Vec<u8> = (0..150).map(|i| b'a' + (i % 26) as u8).collect();
        let index = alloc::alloc_inode(&mut img, part_start, &mut sb).unwrap();
        let mut inode = Inode::new(TYPE_REGULAR, 1, 1);
        write_file(&mut img, part_start, &mut sb, index, &mut inode, &text).unwrap();

        let stored: Inode = img.read_record(sb.inode_offset(index)).unwrap();
        assert_eq!(stored.size, 150);
        assert_ne!(stored.blocks[2], FREE);
        assert_eq!(stored.blocks[3], FREE);

        assert_eq!(read_file(&mut img, &sb, &stored).unwrap(), text);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn overwrite_reuses_blocks_and_shrinks() {
        let (path, part_start) = formatted("overwrite");
        let mut img = ImageFile::open(&path).unwrap();
        let mut sb = Superblock::read(&mut img, part_start).unwrap();

        let index = alloc::alloc_inode(&mut img, part_start, &mut sb).unwrap();
        let mut inode = Inode::new(TYPE_REGULAR, 1, 1);
        let long: Vec<u8> = vec![b'x'; 200];
        write_file(&mut img, part_start, &mut sb, index, &mut inode, &long).unwrap();
        let first_block = inode.blocks[0];

        let short = b"hello".to_vec();
        write_file(&mut img, part_start, &mut sb, index, &mut inode, &short).unwrap();
        assert_eq!(inode.blocks[0], first_block);
        assert_eq!(inode.blocks[1], FREE);
        assert_eq!(inode.size, 5);
        assert_eq!(read_file(&mut img, &sb, &inode).unwrap(), short);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn oversized_content_is_rejected() {
        let (path, part_start) = formatted("toolarge");
        let mut img = ImageFile::open(&path).unwrap();
        let mut sb = Superblock::read(&mut img, part_start).unwrap();

        let index = alloc::alloc_inode(&mut img, part_start, &mut sb).unwrap();
        let mut inode = Inode::new(TYPE_REGULAR, 1, 1);
        let huge = vec![b'x'; MAX_FILE_SIZE + 1];
        assert!(matches!(
            write_file(&mut img, part_start, &mut sb, index, &mut inode, &huge),
            Err(Error::FileTooLarge)
        ));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn mkfile_generates_the_digit_pattern() {
        let (path, part_start) = formatted("pattern");
        let mut img = ImageFile::open(&path).unwrap();
        let mut sb = Superblock::read(&mut img, part_start).unwrap();

        mkfile(
            &mut img,
            part_start,
            &mut sb,
            &session(),
            "/docs/a.txt",
            true,
            25,
            None,
        )
        .unwrap();

        let content = read_path(&mut img, &sb, "/docs/a.txt").unwrap();
        assert_eq!(content, "0123456789012345678901234");

        // The directory entry is committed, not left reserved.
        let (_, docs) = path::resolve(&mut img, &sb, "/docs").unwrap();
        assert!(path::lookup(&mut img, &sb, &docs, "a.txt").unwrap().is_some());

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn mkfile_reads_host_content() {
        let (path, part_start) = formatted("host");
        let host = std::env::temp_dir().join(format!(
            "vdisk-file-host-{}.txt",
            std::process::id()
        ));
        fs::write(&host, "line one\nline two\n").unwrap();

        let mut img = ImageFile::open(&path).unwrap();
        let mut sb = Superblock::read(&mut img, part_start).unwrap();
        mkfile(
            &mut img,
            part_start,
            &mut sb,
            &session(),
            "/copy.txt",
            false,
            0,
            Some(&host),
        )
        .unwrap();
        assert_eq!(
            read_path(&mut img, &sb, "/copy.txt").unwrap(),
            "line one\nline two\n"
        );

        // A positive size truncates host content.
        mkfile(
            &mut img,
            part_start,
            &mut sb,
            &session(),
            "/cut.txt",
            false,
            4,
            Some(&host),
        )
        .unwrap();
        assert_eq!(read_path(&mut img, &sb, "/cut.txt").unwrap(), "line");

        fs::remove_file(&host).unwrap();
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn mkfile_rejects_duplicates_and_missing_parents() {
        let (path, part_start) = formatted("dup");
        let mut img = ImageFile::open(&path).unwrap();
        let mut sb = Superblock::read(&mut img, part_start).unwrap();

        assert!(matches!(
            mkfile(&mut img, part_start, &mut sb, &session(), "/a/b.txt", false, 0, None),
            Err(Error::NotFound(_))
        ));
        mkfile(&mut img, part_start, &mut sb, &session(), "/b.txt", false, 0, None).unwrap();
        assert!(matches!(
            mkfile(&mut img, part_start, &mut sb, &session(), "/b.txt", false, 0, None),
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(
            mkfile(&mut img, part_start, &mut sb, &session(), "/users.txt/x", false, 0, None),
            Err(Error::NotADirectory(_))
        ));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn cat_of_a_directory_fails() {
        let (path, part_start) = formatted("catdir");
        let mut img = ImageFile::open(&path).unwrap();
        let sb = Superblock::read(&mut img, part_start).unwrap();
        assert!(matches!(
            read_path(&mut img, &sb, "/"),
            Err(Error::IsADirectory(_))
        ));
        fs::remove_file(&path).unwrap();
    }
}
