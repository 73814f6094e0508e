//! The in-memory registry binding mount identifiers to partitions.
//!
//! The registry is a process-lifetime singleton owned by the dispatcher
//! context: rows are never freed and there is no unmount.

use crate::disk::{self, PartKind, PartitionSlot};
use crate::error::{Error, Result};
use std::array;
use std::path::{Path, PathBuf};

/// Maximum number of disk images in the registry.
pub const MAX_DISKS: usize = 99;
/// Maximum number of mounted partitions per disk image.
pub const MAX_PARTITIONS: usize = 26;

/// Fixed two-character identifier suffix.
const CARNET: &str = "75";
/// Letters assigned to disk rows in mount order.
const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// A partition bound to a mount identifier.
pub struct MountedPartition {
    /// The partition name inside its disk image.
    pub name: String,
    /// The letter of the owning disk row.
    pub letter: char,
    /// The generated identifier, `"75" + N + letter`.
    pub id: String,
}

/// The mounted partitions of one disk image.
///
/// Rows are stable: a disk keeps its row and letter for the lifetime of
/// the process, and mounting another of its partitions reuses it.
struct DiskRow {
    path: PathBuf,
    slots: [Option<MountedPartition>; MAX_PARTITIONS],
}

/// The registry of mounted partitions.
#[derive(Default)]
pub struct MountRegistry {
    disks: Vec<DiskRow>,
}

impl MountRegistry {
    /// Mounts the partition `name` of the image at `path` and returns the
    /// generated identifier.
    pub fn mount(&mut self, path: &Path, name: &str) -> Result<String> {
        let part = disk::find_partition(path, name)?;
        if part.kind() == Some(PartKind::Extended) {
            return Err(Error::ExtendedNotMountable);
        }
        if self.is_mounted(path, name) {
            return Err(Error::AlreadyMounted);
        }

        let row_index = match self.disks.iter().position(|d| d.path.as_path() == path) {
            Some(i) => i,
            None => {
                if self.disks.len() >= MAX_DISKS {
                    return Err(Error::NoRoomDisks);
                }
                self.disks.push(DiskRow {
                    path: path.to_path_buf(),
                    slots: array::from_fn(|_| None),
                });
                self.disks.len() - 1
            }
        };
        let letter = *ALPHABET.get(row_index).ok_or(Error::NoRoomDisks)? as char;

        let row = &mut self.disks[row_index];
        let slot = row
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(Error::NoRoomPartitions)?;
        let number = row.slots.iter().flatten().count() + 1;
        let id = format!("{CARNET}{number}{letter}");
        row.slots[slot] = Some(MountedPartition {
            name: name.to_owned(),
            letter,
            id: id.clone(),
        });
        Ok(id)
    }

    /// Tells whether the `(path, name)` pair is already mounted.
    fn is_mounted(&self, path: &Path, name: &str) -> bool {
        self.disks
            .iter()
            .filter(|d| d.path.as_path() == path)
            .flat_map(|d| d.slots.iter().flatten())
            .any(|m| m.name == name)
    }

    /// Resolves a mount identifier, re-reading the MBR to locate the
    /// partition by name.
    pub fn resolve(&self, id: &str) -> Result<(PathBuf, PartitionSlot)> {
        for row in &self.disks {
            for mounted in row.slots.iter().flatten() {
                if mounted.id == id {
                    let part = disk::find_partition(&row.path, &mounted.name)?;
                    return Ok((row.path.clone(), part));
                }
            }
        }
        Err(Error::NotMounted(id.to_owned()))
    }

    /// The identifier of the first mounted partition, if any.
    pub fn first_id(&self) -> Option<&str> {
        self.entries().next().map(|(_, m)| m.id.as_str())
    }

    /// Iterates every mounted partition with its image path.
    pub fn entries(&self) -> impl Iterator<Item = (&Path, &MountedPartition)> {
        self.disks
            .iter()
            .flat_map(|d| d.slots.iter().flatten().map(|m| (d.path.as_path(), m)))
    }
}
