//! The `users.txt` credential store and the account commands.
//!
//! The file lives at inode 1 of every formatted partition and holds one
//! record per line:
//!
//! ```text
//! <id>,G,<group>
//! <id>,U,<group>,<user>,<password>
//! ```
//!
//! Deletion rewrites a record's id to `0`; such tombstones keep their
//! line but are invisible to lookups.

use crate::codec::ImageFile;
use crate::error::{Error, Result};
use crate::ext2::{Inode, Superblock, file};
use crate::mount::MountRegistry;
use crate::session::Session;

/// Inode index of `users.txt` on every formatted partition.
pub const USERS_INODE: i64 = 1;
/// Maximum length of user, group and password strings in bytes.
pub const NAME_LEN: usize = 10;

/// A group record.
pub struct GroupEntry {
    pub id: i64,
    pub name: String,
}

/// A user record.
pub struct UserEntry {
    pub id: i64,
    pub group: String,
    pub name: String,
    pub password: String,
}

/// One line of `users.txt`.
pub enum Line {
    Group(GroupEntry),
    User(UserEntry),
}

/// The parsed credential file, preserving record order.
pub struct UsersFile {
    pub lines: Vec<Line>,
}

impl UsersFile {
    /// Parses the file content. Unrecognized lines are dropped.
    pub fn parse(text: &str) -> Self {
        let mut lines = Vec::new();
        for line in text.lines() {
            let fields: Vec<&str> = line.trim().split(',').collect();
            let Some(Ok(id)) = fields.first().map(|f| f.parse::<i64>()) else {
                continue;
            };
            match fields.get(1).copied() {
                Some(kind) if kind.eq_ignore_ascii_case("G") && fields.len() >= 3 => {
                    lines.push(Line::Group(GroupEntry {
                        id,
                        name: fields[2].to_owned(),
                    }));
                }
                Some(kind) if kind.eq_ignore_ascii_case("U") && fields.len() >= 5 => {
                    lines.push(Line::User(UserEntry {
                        id,
                        group: fields[2].to_owned(),
                        name: fields[3].to_owned(),
                        password: fields[4].to_owned(),
                    }));
                }
                _ => {}
            }
        }
        Self { lines }
    }

    /// Serializes the records back to the line format.
    pub fn serialize(&self) -> String {
        let mut text = String::new();
        for line in &self.lines {
            match line {
                Line::Group(g) => text.push_str(&format!("{},G,{}\n", g.id, g.name)),
                Line::User(u) => text.push_str(&format!(
                    "{},U,{},{},{}\n",
                    u.id, u.group, u.name, u.password
                )),
            }
        }
        text
    }

    /// Reads and parses `users.txt` from inode 1.
    pub fn load(img: &mut ImageFile, sb: &Superblock) -> Result<Self> {
        let inode: Inode = img.read_record(sb.inode_offset(USERS_INODE))?;
        let bytes = file::read_file(img, sb, &inode)?;
        Ok(Self::parse(&String::from_utf8_lossy(&bytes)))
    }

    /// Writes the records back through the file writer.
    pub fn store(&self, img: &mut ImageFile, part_start: i64, sb: &mut Superblock) -> Result<()> {
        let mut inode: Inode = img.read_record(sb.inode_offset(USERS_INODE))?;
        file::write_file(
            img,
            part_start,
            sb,
            USERS_INODE,
            &mut inode,
            self.serialize().as_bytes(),
        )?;
        img.sync()
    }

    /// The live group named `name`, if any.
    pub fn group(&self, name: &str) -> Option<&GroupEntry> {
        self.lines.iter().find_map(|line| match line {
            Line::Group(g) if g.id != 0 && g.name == name => Some(g),
            _ => None,
        })
    }

    /// The live user named `name`, if any.
    pub fn user(&self, name: &str) -> Option<&UserEntry> {
        self.lines.iter().find_map(|line| match line {
            Line::User(u) if u.id != 0 && u.name == name => Some(u),
            _ => None,
        })
    }

    fn next_group_id(&self) -> i64 {
        self.lines
            .iter()
            .filter_map(|line| match line {
                Line::Group(g) => Some(g.id),
                _ => None,
            })
            .max()
            .unwrap_or(0)
            + 1
    }

    fn next_user_id(&self) -> i64 {
        self.lines
            .iter()
            .filter_map(|line| match line {
                Line::User(u) => Some(u.id),
                _ => None,
            })
            .max()
            .unwrap_or(0)
            + 1
    }
}

/// Opens the session's partition and loads the credential file.
fn open_users(
    mounts: &MountRegistry,
    session: &Session,
) -> Result<(ImageFile, i64, Superblock, UsersFile)> {
    let (path, part) = mounts.resolve(&session.mount_id)?;
    let mut img = ImageFile::open(&path)?;
    let sb = Superblock::read(&mut img, part.start)?;
    let users = UsersFile::load(&mut img, &sb)?;
    Ok((img, part.start, sb, users))
}

fn require_root(session: &Session) -> Result<()> {
    if session.is_root() {
        Ok(())
    } else {
        Err(Error::NotRoot)
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.len() > NAME_LEN {
        return Err(Error::NameTooLong(name.to_owned()));
    }
    Ok(())
}

/// Creates the group `name`.
pub fn mkgrp(mounts: &MountRegistry, session: &Session, name: &str) -> Result<()> {
    require_root(session)?;
    check_name(name)?;
    let (mut img, part_start, mut sb, mut users) = open_users(mounts, session)?;
    if users.group(name).is_some() {
        return Err(Error::GroupExists(name.to_owned()));
    }
    let id = users.next_group_id();
    users.lines.push(Line::Group(GroupEntry {
        id,
        name: name.to_owned(),
    }));
    users.store(&mut img, part_start, &mut sb)
}

/// Tombstones the group `name`.
pub fn rmgrp(mounts: &MountRegistry, session: &Session, name: &str) -> Result<()> {
    require_root(session)?;
    let (mut img, part_start, mut sb, mut users) = open_users(mounts, session)?;
    let group = users
        .lines
        .iter_mut()
        .find_map(|line| match line {
            Line::Group(g) if g.id != 0 && g.name == name => Some(g),
            _ => None,
        })
        .ok_or_else(|| Error::UnknownGroup(name.to_owned()))?;
    group.id = 0;
    users.store(&mut img, part_start, &mut sb)
}

/// Creates the user `name` with password `password` in group `group`.
pub fn mkusr(
    mounts: &MountRegistry,
    session: &Session,
    name: &str,
    password: &str,
    group: &str,
) -> Result<()> {
    require_root(session)?;
    check_name(name)?;
    check_name(password)?;
    check_name(group)?;
    let (mut img, part_start, mut sb, mut users) = open_users(mounts, session)?;
    if users.group(group).is_none() {
        return Err(Error::UnknownGroup(group.to_owned()));
    }
    if users.user(name).is_some() {
        return Err(Error::UserExists(name.to_owned()));
    }
    let id = users.next_user_id();
    users.lines.push(Line::User(UserEntry {
        id,
        group: group.to_owned(),
        name: name.to_owned(),
        password: password.to_owned(),
    }));
    users.store(&mut img, part_start, &mut sb)
}

/// Tombstones the user `name`.
pub fn rmusr(mounts: &MountRegistry, session: &Session, name: &str) -> Result<()> {
    require_root(session)?;
    let (mut img, part_start, mut sb, mut users) = open_users(mounts, session)?;
    let user = users
        .lines
        .iter_mut()
        .find_map(|line| match line {
            Line::User(u) if u.id != 0 && u.name == name => Some(u),
            _ => None,
        })
        .ok_or_else(|| Error::UserNotFound(name.to_owned()))?;
    user.id = 0;
    users.store(&mut img, part_start, &mut sb)
}

/// Moves the user `name` into the group `group`.
pub fn chgrp(mounts: &MountRegistry, session: &Session, name: &str, group: &str) -> Result<()> {
    require_root(session)?;
    let (mut img, part_start, mut sb, mut users) = open_users(mounts, session)?;
    if users.group(group).is_none() {
        return Err(Error::UnknownGroup(group.to_owned()));
    }
    let user = users
        .lines
        .iter_mut()
        .find_map(|line| match line {
            Line::User(u) if u.id != 0 && u.name == name => Some(u),
            _ => None,
        })
        .ok_or_else(|| Error::UserNotFound(name.to_owned()))?;
    user.group = group.to_owned();
    users.store(&mut img, part_start, &mut sb)
}
