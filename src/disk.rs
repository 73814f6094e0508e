//! Disk images and the MBR/EBR partition layer.
//!
//! A disk image is a regular host file whose first record is the MBR:
//! total size, creation date, a random signature, the default fit policy
//! and four partition slots. Logical partitions live inside the single
//! extended partition as a chain of EBR records linked by `next` offsets.

use crate::codec::{self, ImageFile, Reader, Record, Writer};
use crate::error::{Error, Result};
use crate::util;
use rand_core::OsRng;
use rand_core::RngCore;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Required extension of disk image files.
const IMAGE_EXTENSION: &str = "mia";

/// Maximum length of a partition name in bytes.
pub const NAME_LEN: usize = 16;

/// Slot status byte: free.
const STATUS_FREE: u8 = b'0';
/// Slot status byte: active.
const STATUS_ACTIVE: u8 = b'1';

/// Placement policy for new partitions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Fit {
    First,
    Best,
    Worst,
}

impl Fit {
    /// The single-character code stored in partition slots.
    pub fn code(self) -> u8 {
        match self {
            Self::First => b'F',
            Self::Best => b'B',
            Self::Worst => b'W',
        }
    }

    /// The two-character code stored in the MBR header.
    pub fn pair(self) -> [u8; 2] {
        match self {
            Self::First => *b"FF",
            Self::Best => *b"BF",
            Self::Worst => *b"WF",
        }
    }
}

impl FromStr for Fit {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s.to_ascii_uppercase().as_str() {
            "FF" => Ok(Self::First),
            "BF" => Ok(Self::Best),
            "WF" => Ok(Self::Worst),
            _ => Err(()),
        }
    }
}

/// Kind of a partition.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PartKind {
    Primary,
    Extended,
    Logical,
}

impl PartKind {
    /// The type byte stored in partition slots.
    pub fn code(self) -> u8 {
        match self {
            Self::Primary => b'P',
            Self::Extended => b'E',
            Self::Logical => b'L',
        }
    }

    /// Decodes a type byte; lowercase codes are accepted equivalently.
    pub fn from_code(code: u8) -> Option<Self> {
        match code.to_ascii_uppercase() {
            b'P' => Some(Self::Primary),
            b'E' => Some(Self::Extended),
            b'L' => Some(Self::Logical),
            _ => None,
        }
    }

    /// The kind's name, as used in command results.
    pub fn label(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Extended => "extended",
            Self::Logical => "logical",
        }
    }
}

impl FromStr for PartKind {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s.as_bytes() {
            [code] => Self::from_code(*code).ok_or(()),
            _ => Err(()),
        }
    }
}

/// Size unit of command parameters.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Unit {
    Byte,
    Kilo,
    Mega,
}

impl Unit {
    /// Converts `n` units into bytes.
    pub fn bytes(self, n: i64) -> i64 {
        match self {
            Self::Byte => n,
            Self::Kilo => n * 1024,
            Self::Mega => n * 1024 * 1024,
        }
    }
}

impl FromStr for Unit {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s.to_ascii_uppercase().as_str() {
            "B" => Ok(Self::Byte),
            "K" => Ok(Self::Kilo),
            "M" => Ok(Self::Mega),
            _ => Err(()),
        }
    }
}

/// One of the four partition slots embedded in the MBR.
#[derive(Clone, Copy)]
pub struct PartitionSlot {
    /// Status byte, `'0'` free or `'1'` active.
    pub status: u8,
    /// Type byte, `P`, `E` or `L`.
    pub kind: u8,
    /// Fit byte, `F`, `B` or `W`.
    pub fit: u8,
    /// Start offset in the image in bytes.
    pub start: i64,
    /// Size in bytes.
    pub size: i64,
    /// Zero-padded partition name.
    pub name: [u8; NAME_LEN],
}

impl PartitionSlot {
    /// An unused slot.
    pub fn empty() -> Self {
        Self {
            status: STATUS_FREE,
            kind: 0,
            fit: 0,
            start: -1,
            size: -1,
            name: [0; NAME_LEN],
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }

    pub fn kind(&self) -> Option<PartKind> {
        PartKind::from_code(self.kind)
    }

    pub fn name_str(&self) -> String {
        codec::field_str(&self.name)
    }
}

impl Record for PartitionSlot {
    const SIZE: usize = 35;

    fn decode(r: &mut Reader<'_>) -> Self {
        Self {
            status: r.u8(),
            kind: r.u8(),
            fit: r.u8(),
            start: r.i64(),
            size: r.i64(),
            name: r.array(),
        }
    }

    fn encode(&self, w: &mut Writer<'_>) {
        w.u8(self.status);
        w.u8(self.kind);
        w.u8(self.fit);
        w.i64(self.start);
        w.i64(self.size);
        w.bytes(&self.name);
    }
}

/// The disk header at offset 0.
pub struct Mbr {
    /// Total size of the disk image in bytes.
    pub size: i64,
    /// Creation date, `YYYY-MM-DD HH:MM`.
    pub created: [u8; util::TIMESTAMP_LEN],
    /// Random disk signature.
    pub signature: i64,
    /// Default fit policy, `FF`, `BF` or `WF`.
    pub fit: [u8; 2],
    /// The four top-level partition slots.
    pub partitions: [PartitionSlot; 4],
}

impl Record for Mbr {
    const SIZE: usize = 8 + util::TIMESTAMP_LEN + 8 + 2 + 4 * PartitionSlot::SIZE;

    fn decode(r: &mut Reader<'_>) -> Self {
        Self {
            size: r.i64(),
            created: r.array(),
            signature: r.i64(),
            fit: r.array(),
            partitions: [
                PartitionSlot::decode(r),
                PartitionSlot::decode(r),
                PartitionSlot::decode(r),
                PartitionSlot::decode(r),
            ],
        }
    }

    fn encode(&self, w: &mut Writer<'_>) {
        w.i64(self.size);
        w.bytes(&self.created);
        w.i64(self.signature);
        w.bytes(&self.fit);
        for p in &self.partitions {
            p.encode(w);
        }
    }
}

impl Mbr {
    /// The extended partition slot, if one is active.
    pub fn extended(&self) -> Option<&PartitionSlot> {
        self.partitions
            .iter()
            .find(|p| p.is_active() && p.kind() == Some(PartKind::Extended))
    }
}

/// A node of the logical-partition chain inside the extended partition.
///
/// The record sits at the start offset of its logical partition;
/// `next == -1` terminates the chain.
#[derive(Clone, Copy)]
pub struct Ebr {
    pub status: u8,
    pub kind: u8,
    pub fit: u8,
    pub start: i64,
    pub size: i64,
    pub name: [u8; NAME_LEN],
    pub next: i64,
}

impl Ebr {
    /// The inactive chain head written when an extended partition is
    /// created.
    pub fn empty(start: i64) -> Self {
        Self {
            status: STATUS_FREE,
            kind: 0,
            fit: 0,
            start,
            size: -1,
            name: [0; NAME_LEN],
            next: -1,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }

    pub fn name_str(&self) -> String {
        codec::field_str(&self.name)
    }
}

impl Record for Ebr {
    const SIZE: usize = PartitionSlot::SIZE + 8;

    fn decode(r: &mut Reader<'_>) -> Self {
        Self {
            status: r.u8(),
            kind: r.u8(),
            fit: r.u8(),
            start: r.i64(),
            size: r.i64(),
            name: r.array(),
            next: r.i64(),
        }
    }

    fn encode(&self, w: &mut Writer<'_>) {
        w.u8(self.status);
        w.u8(self.kind);
        w.u8(self.fit);
        w.i64(self.start);
        w.i64(self.size);
        w.bytes(&self.name);
        w.i64(self.next);
    }
}

/// Checks the `.mia` extension rule.
fn check_extension(path: &Path) -> Result<()> {
    let ok = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(IMAGE_EXTENSION));
    if ok { Ok(()) } else { Err(Error::BadExtension) }
}

/// Creates a zero-filled disk image of `size` bytes at `path` and writes
/// its MBR. An existing image at the same path is replaced.
pub fn create_image(path: &Path, size: i64, fit: Fit) -> Result<()> {
    check_extension(path)?;
    if size <= 0 {
        return Err(Error::BadSize);
    }
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }
    let file = fs::File::create(path)?;
    file.set_len(size as u64)?;
    drop(file);

    let mbr = Mbr {
        size,
        created: util::timestamp_field(),
        signature: OsRng.next_u64() as i64,
        fit: fit.pair(),
        partitions: [PartitionSlot::empty(); 4],
    };
    let mut img = ImageFile::open(path)?;
    img.write_record(0, &mbr)?;
    img.sync()
}

/// Deletes the disk image at `path`. Destructive; there is no
/// confirmation step.
pub fn remove_image(path: &Path) -> Result<()> {
    check_extension(path)?;
    if !path.exists() {
        return Err(Error::NotFound(path.display().to_string()));
    }
    fs::remove_file(path)?;
    Ok(())
}

/// Reads the logical-partition chain of the extended partition `ext`.
///
/// Returns the active nodes in chain (address) order.
fn ebr_chain(img: &mut ImageFile, ext: &PartitionSlot) -> Result<Vec<Ebr>> {
    let mut chain = Vec::new();
    let mut off = ext.start;
    loop {
        let ebr: Ebr = img.read_record(off as u64)?;
        if ebr.is_active() {
            chain.push(ebr);
        }
        if ebr.next <= off {
            break;
        }
        off = ebr.next;
    }
    Ok(chain)
}

/// Looks up an active partition by name over the MBR slots and the EBR
/// chain. Names compare case-insensitively.
///
/// A logical partition resolves to its usable region, past the EBR
/// header at its start.
fn lookup(img: &mut ImageFile, mbr: &Mbr, name: &str) -> Result<Option<PartitionSlot>> {
    for p in &mbr.partitions {
        if p.is_active() && p.name_str().eq_ignore_ascii_case(name) {
            return Ok(Some(*p));
        }
    }
    if let Some(ext) = mbr.extended() {
        let ext = *ext;
        for ebr in ebr_chain(img, &ext)? {
            if ebr.name_str().eq_ignore_ascii_case(name) {
                return Ok(Some(PartitionSlot {
                    status: STATUS_ACTIVE,
                    kind: PartKind::Logical.code(),
                    fit: ebr.fit,
                    start: ebr.start + Ebr::SIZE as i64,
                    size: ebr.size - Ebr::SIZE as i64,
                    name: ebr.name,
                }));
            }
        }
    }
    Ok(None)
}

/// Locates an active partition of the image at `path` by name.
pub fn find_partition(path: &Path, name: &str) -> Result<PartitionSlot> {
    let mut img = ImageFile::open(path)?;
    let mbr: Mbr = img.read_record(0)?;
    lookup(&mut img, &mbr, name)?.ok_or_else(|| Error::PartitionNotFound(name.to_owned()))
}

/// Computes the free `[start, end)` gaps of `[base, limit)` left by the
/// `occupied` regions, sorted by start offset.
fn free_intervals(base: i64, limit: i64, mut occupied: Vec<(i64, i64)>) -> Vec<(i64, i64)> {
    occupied.sort_by_key(|r| r.0);
    let mut gaps = Vec::new();
    let mut last_end = base;
    for (start, end) in occupied {
        if start > last_end {
            gaps.push((last_end, start));
        }
        if end > last_end {
            last_end = end;
        }
    }
    if last_end < limit {
        gaps.push((last_end, limit));
    }
    gaps
}

/// Selects the start offset of a gap able to hold `size` bytes.
///
/// First fit stops at the first candidate; best fit keeps the smallest,
/// worst fit the largest. Ties go to the lower start offset.
fn select_interval(gaps: &[(i64, i64)], size: i64, fit: Fit) -> Option<i64> {
    let mut selected: Option<(i64, i64)> = None;
    for &(start, end) in gaps {
        let len = end - start;
        if len < size {
            continue;
        }
        match fit {
            Fit::First => return Some(start),
            Fit::Best => {
                if selected.is_none_or(|(_, best)| len < best) {
                    selected = Some((start, len));
                }
            }
            Fit::Worst => {
                if selected.is_none_or(|(_, best)| len > best) {
                    selected = Some((start, len));
                }
            }
        }
    }
    selected.map(|(start, _)| start)
}

/// Creates a partition of `size` bytes named `name` on the image at
/// `path`, placing it by the `fit` policy.
pub fn create_partition(
    path: &Path,
    size: i64,
    name: &str,
    kind: PartKind,
    fit: Fit,
) -> Result<()> {
    if size <= 0 {
        return Err(Error::BadSize);
    }
    if name.len() > NAME_LEN {
        return Err(Error::NameTooLong(name.to_owned()));
    }
    let mut img = ImageFile::open(path)?;
    let mut mbr: Mbr = img.read_record(0)?;
    if lookup(&mut img, &mbr, name)?.is_some() {
        return Err(Error::DuplicateName(name.to_owned()));
    }

    if kind == PartKind::Logical {
        let ext = *mbr.extended().ok_or(Error::NoExtended)?;
        create_logical(&mut img, &ext, size, name, fit)?;
        return img.sync();
    }

    if kind == PartKind::Extended && mbr.extended().is_some() {
        return Err(Error::ExtendedExists);
    }
    if mbr.partitions.iter().filter(|p| p.is_active()).count() >= 4 {
        return Err(Error::PartitionLimit);
    }

    let mut occupied = vec![(0, Mbr::SIZE as i64)];
    occupied.extend(
        mbr.partitions
            .iter()
            .filter(|p| p.is_active())
            .map(|p| (p.start, p.start + p.size)),
    );
    let gaps = free_intervals(0, mbr.size, occupied);
    let start = select_interval(&gaps, size, fit).ok_or(Error::NoSpace)?;

    let slot = PartitionSlot {
        status: STATUS_ACTIVE,
        kind: kind.code(),
        fit: fit.code(),
        start,
        size,
        name: codec::pad_str(name),
    };
    // Slot order is preserved: the partition takes the first free slot.
    let free = mbr
        .partitions
        .iter()
        .position(|p| !p.is_active())
        .ok_or(Error::PartitionLimit)?;
    mbr.partitions[free] = slot;
    img.write_record(0, &mbr)?;

    if kind == PartKind::Extended {
        img.write_record(start as u64, &Ebr::empty(start))?;
    }
    img.sync()
}

/// Places a logical partition inside the extended partition `ext` and
/// links it into the EBR chain in address order.
fn create_logical(
    img: &mut ImageFile,
    ext: &PartitionSlot,
    size: i64,
    name: &str,
    fit: Fit,
) -> Result<()> {
    let chain = ebr_chain(img, ext)?;
    let occupied = chain.iter().map(|e| (e.start, e.start + e.size)).collect();
    let gaps = free_intervals(ext.start, ext.start + ext.size, occupied);
    let start = select_interval(&gaps, size, fit).ok_or(Error::NoSpace)?;

    let next = chain
        .iter()
        .find(|e| e.start > start)
        .map(|e| e.start)
        .unwrap_or(-1);
    let ebr = Ebr {
        status: STATUS_ACTIVE,
        kind: PartKind::Logical.code(),
        fit: fit.code(),
        start,
        size,
        name: codec::pad_str(name),
        next,
    };
    if let Some(prev) = chain.iter().rev().find(|e| e.start < start) {
        let mut prev = *prev;
        prev.next = start;
        img.write_record(prev.start as u64, &prev)?;
    }
    img.write_record(start as u64, &ebr)
}
