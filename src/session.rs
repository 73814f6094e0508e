//! The login session.

use crate::codec::ImageFile;
use crate::error::{Error, Result};
use crate::ext2::Superblock;
use crate::mount::MountRegistry;
use crate::users::UsersFile;

/// The authenticated user bound to a mounted partition.
///
/// At most one session exists per process; every filesystem mutation
/// takes its mount and its owner ids from here.
pub struct Session {
    pub user: String,
    pub pass: String,
    pub mount_id: String,
    pub uid: i64,
    pub gid: i64,
}

impl Session {
    /// Tells whether the session belongs to the superuser.
    pub fn is_root(&self) -> bool {
        self.user == "root"
    }
}

/// Authenticates `user` against the `users.txt` of the partition mounted
/// under `id`.
///
/// Credentials compare byte for byte. The user's group must resolve to a
/// live group record, whose id becomes the session gid.
pub fn login(
    mounts: &MountRegistry,
    current: &Option<Session>,
    user: &str,
    pass: &str,
    id: &str,
) -> Result<Session> {
    if current.is_some() {
        return Err(Error::AlreadyLogged);
    }
    let (path, part) = mounts.resolve(id)?;
    let mut img = ImageFile::open(&path)?;
    let sb = Superblock::read(&mut img, part.start)?;
    let users = UsersFile::load(&mut img, &sb)?;

    let entry = users
        .user(user)
        .filter(|u| u.password == pass)
        .ok_or(Error::BadCredentials)?;
    let group = users
        .group(&entry.group)
        .ok_or_else(|| Error::UnknownGroup(entry.group.clone()))?;
    Ok(Session {
        user: user.to_owned(),
        pass: pass.to_owned(),
        mount_id: id.to_owned(),
        uid: entry.id,
        gid: group.id,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::disk::{self, Fit, PartKind};
    use crate::ext2::format::{self, FormatMode};
    use std::fs;
    use std::path::PathBuf;

    fn mounted(name: &str) -> (PathBuf, MountRegistry, String) {
        let path = std::env::temp_dir().join(format!(
            "vdisk-session-{name}-{}.mia",
            std::process::id()
        ));
        let _ = fs::remove_file(&path);
        disk::create_image(&path, 2 * 1024 * 1024, Fit::First).unwrap();
        disk::create_partition(&path, 1024 * 1024, "p1", PartKind::Primary, Fit::First).unwrap();
        let part = disk::find_partition(&path, "p1").unwrap();
        let mut img = ImageFile::open(&path).unwrap();
        format::format(&mut img, &part, FormatMode::Full).unwrap();
        let mut mounts = MountRegistry::default();
        let id = mounts.mount(&path, "p1").unwrap();
        (path, mounts, id)
    }

    #[test]
    fn root_login_succeeds() {
        let (path, mounts, id) = mounted("root");
        let session = login(&mounts, &None, "root", "123", &id).unwrap();
        assert!(session.is_root());
        assert_eq!(session.uid, 1);
        assert_eq!(session.gid, 1);
        assert_eq!(session.mount_id, id);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn bad_credentials_are_rejected() {
        let (path, mounts, id) = mounted("badpass");
        assert!(matches!(
            login(&mounts, &None, "root", "wrong", &id),
            Err(Error::BadCredentials)
        ));
        assert!(matches!(
            login(&mounts, &None, "nobody", "123", &id),
            Err(Error::BadCredentials)
        ));
        // Credentials are byte-equal, not case-insensitive.
        assert!(matches!(
            login(&mounts, &None, "Root", "123", &id),
            Err(Error::BadCredentials)
        ));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn second_login_is_rejected() {
        let (path, mounts, id) = mounted("second");
        let session = login(&mounts, &None, "root", "123", &id).unwrap();
        assert!(matches!(
            login(&mounts, &Some(session), "root", "123", &id),
            Err(Error::AlreadyLogged)
        ));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn unknown_mount_id_fails() {
        let (path, mounts, _) = mounted("badid");
        assert!(matches!(
            login(&mounts, &None, "root", "123", "759Z"),
            Err(Error::NotMounted(_))
        ));
        fs::remove_file(&path).unwrap();
    }
}
