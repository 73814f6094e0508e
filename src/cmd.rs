//! Command parsing and dispatch.
//!
//! Each verb declares its parameter schema in a table; the dispatcher
//! validates the `key=value` parameters, runs the handler, and frames
//! the outcome as exactly one `✅`/`❌` line. Errors never cross this
//! boundary as panics, and a failed command never stops a batch.

use crate::codec::ImageFile;
use crate::disk::{self, Fit, PartKind, Unit};
use crate::error::{Error, Result};
use crate::ext2::format::{self, FormatMode};
use crate::ext2::{Superblock, dir, file};
use crate::mount::MountRegistry;
use crate::session::{self, Session};
use crate::users;
use crate::util::ByteSize;
use std::path::PathBuf;
use std::str::FromStr;

/// Process-wide state threaded through every command: the mount registry
/// and the single login session.
#[derive(Default)]
pub struct Context {
    pub mounts: MountRegistry,
    pub session: Option<Session>,
}

/// Parsed parameters and bare flags of one command line.
#[derive(Default)]
struct Params {
    values: Vec<(String, String)>,
    flags: Vec<String>,
}

impl Params {
    fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn require(&self, key: &'static str) -> Result<&str> {
        self.get(key).ok_or(Error::MissingParameter(key))
    }

    fn flag(&self, name: &str) -> bool {
        self.flags.iter().any(|f| f == name)
    }
}

/// Splits a command line into tokens, honoring double-quoted values.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut token = String::new();
    let mut quoted = false;
    for c in line.chars() {
        match c {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !token.is_empty() {
                    tokens.push(std::mem::take(&mut token));
                }
            }
            c => token.push(c),
        }
    }
    if !token.is_empty() {
        tokens.push(token);
    }
    tokens
}

/// Parses the tokens following the verb.
///
/// Keys are case-insensitive; values keep their case. A flag glued to a
/// following parameter (`p-path=/a`) counts as the bare flag plus the
/// parameter.
fn parse_params(tokens: &[String]) -> Result<Params> {
    let mut params = Params::default();
    for token in tokens {
        let token = token.strip_prefix('-').unwrap_or(token);
        match token.split_once('=') {
            None => params.flags.push(token.to_ascii_lowercase()),
            Some((key, value)) => {
                let mut key = key.to_ascii_lowercase();
                while let Some((flag, rest)) = key.split_once('-') {
                    if flag != "p" && flag != "r" {
                        break;
                    }
                    let rest = rest.to_owned();
                    params.flags.push(flag.to_owned());
                    key = rest;
                }
                if params.get(&key).is_some() {
                    return Err(Error::DuplicateParameter(key));
                }
                params.values.push((key, value.to_owned()));
            }
        }
    }
    Ok(params)
}

/// One dispatchable verb and its parameter schema.
struct Verb {
    name: &'static str,
    required: &'static [&'static str],
    optional: &'static [&'static str],
    flags: &'static [&'static str],
    run: fn(&mut Context, &Params) -> Result<String>,
}

const VERBS: &[Verb] = &[
    Verb {
        name: "MKDISK",
        required: &["size", "path"],
        optional: &["fit", "unit"],
        flags: &[],
        run: mkdisk,
    },
    Verb {
        name: "RMDISK",
        required: &["path"],
        optional: &[],
        flags: &[],
        run: rmdisk,
    },
    Verb {
        name: "FDISK",
        required: &["size", "path", "name"],
        optional: &["type", "fit", "unit", "delete", "add"],
        flags: &[],
        run: fdisk,
    },
    Verb {
        name: "MOUNT",
        required: &["path", "name"],
        optional: &[],
        flags: &[],
        run: mount,
    },
    Verb {
        name: "MOUNTED",
        required: &[],
        optional: &[],
        flags: &[],
        run: mounted,
    },
    Verb {
        name: "MKFS",
        required: &["id"],
        optional: &["type", "fs"],
        flags: &[],
        run: mkfs,
    },
    Verb {
        name: "LOGIN",
        required: &["user", "pass", "id"],
        optional: &[],
        flags: &[],
        run: login,
    },
    Verb {
        name: "LOGOUT",
        required: &[],
        optional: &[],
        flags: &[],
        run: logout,
    },
    Verb {
        name: "MKGRP",
        required: &["name"],
        optional: &[],
        flags: &[],
        run: mkgrp,
    },
    Verb {
        name: "RMGRP",
        required: &["name"],
        optional: &[],
        flags: &[],
        run: rmgrp,
    },
    Verb {
        name: "MKUSR",
        required: &["user", "pass", "grp"],
        optional: &[],
        flags: &[],
        run: mkusr,
    },
    Verb {
        name: "RMUSR",
        required: &["user"],
        optional: &[],
        flags: &[],
        run: rmusr,
    },
    Verb {
        name: "CHGRP",
        required: &["user", "grp"],
        optional: &[],
        flags: &[],
        run: chgrp,
    },
    Verb {
        name: "MKDIR",
        required: &["path"],
        optional: &[],
        flags: &["p"],
        run: mkdir,
    },
    Verb {
        name: "MKFILE",
        required: &["path"],
        optional: &["size", "cont"],
        flags: &["r"],
        run: mkfile,
    },
    Verb {
        name: "CAT",
        required: &[],
        optional: &["id"],
        flags: &[],
        run: cat,
    },
];

/// Tells whether `key` is one of CAT's `file1..fileN` parameters.
fn is_file_param(key: &str) -> bool {
    key.strip_prefix("file")
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

fn validate(verb: &Verb, params: &Params) -> Result<()> {
    for (key, _) in &params.values {
        let known = verb.required.contains(&key.as_str())
            || verb.optional.contains(&key.as_str())
            || (verb.name == "CAT" && is_file_param(key));
        if !known {
            return Err(Error::UnknownParameter(key.clone()));
        }
    }
    for flag in &params.flags {
        if !verb.flags.contains(&flag.as_str()) {
            return Err(Error::UnknownParameter(flag.clone()));
        }
    }
    for required in verb.required {
        if params.get(required).is_none() {
            return Err(Error::MissingParameter(required));
        }
    }
    Ok(())
}

/// Executes one command line and returns its single-line result.
pub fn dispatch(ctx: &mut Context, line: &str) -> String {
    let tokens = tokenize(line);
    let Some(first) = tokens.first() else {
        return "❌ [?] ERROR: empty command".to_owned();
    };
    let name = first.to_ascii_uppercase();
    let Some(verb) = VERBS.iter().find(|v| v.name == name) else {
        return format!("❌ [{name}] ERROR: unknown command");
    };
    let result = parse_params(&tokens[1..]).and_then(|params| {
        validate(verb, &params)?;
        (verb.run)(ctx, &params)
    });
    match result {
        Ok(msg) => format!("✅ [{}] {msg}", verb.name),
        Err(e) => format!("❌ [{}] ERROR: {e}", verb.name),
    }
}

/// Parses an integer parameter.
fn int_param(params: &Params, key: &'static str) -> Result<i64> {
    let value = params.require(key)?;
    value
        .parse()
        .map_err(|_| Error::InvalidValue(key, value.to_owned()))
}

/// Parses an enumerated parameter, falling back to `default`.
fn enum_param<T: FromStr>(params: &Params, key: &'static str, default: &str) -> Result<T> {
    let value = params.get(key).unwrap_or(default);
    value
        .parse()
        .map_err(|_| Error::InvalidValue(key, value.to_owned()))
}

fn current_session(ctx: &Context) -> Result<&Session> {
    ctx.session.as_ref().ok_or(Error::NotLogged)
}

/// Opens the image and superblock of the session's mounted partition.
fn open_session_fs(ctx: &Context) -> Result<(ImageFile, i64, Superblock)> {
    let session = current_session(ctx)?;
    let (path, part) = ctx.mounts.resolve(&session.mount_id)?;
    let mut img = ImageFile::open(&path)?;
    let sb = Superblock::read(&mut img, part.start)?;
    Ok((img, part.start, sb))
}

fn mkdisk(_ctx: &mut Context, params: &Params) -> Result<String> {
    let size = int_param(params, "size")?;
    let unit: Unit = enum_param(params, "unit", "M")?;
    let fit: Fit = enum_param(params, "fit", "FF")?;
    let path = PathBuf::from(params.require("path")?);
    let bytes = unit.bytes(size);
    disk::create_image(&path, bytes, fit)?;
    Ok(format!(
        "disk `{}` created ({})",
        path.display(),
        ByteSize(bytes as u64)
    ))
}

fn rmdisk(_ctx: &mut Context, params: &Params) -> Result<String> {
    let path = PathBuf::from(params.require("path")?);
    disk::remove_image(&path)?;
    Ok(format!("disk `{}` removed", path.display()))
}

fn fdisk(_ctx: &mut Context, params: &Params) -> Result<String> {
    let path = PathBuf::from(params.require("path")?);
    let name = params.require("name")?;
    if params.get("delete").is_some() {
        return Ok("partition deletion is not implemented".to_owned());
    }
    if params.get("add").is_some() {
        return Ok("partition resizing is not implemented".to_owned());
    }
    let size = int_param(params, "size")?;
    let unit: Unit = enum_param(params, "unit", "K")?;
    let kind: PartKind = enum_param(params, "type", "P")?;
    let fit: Fit = enum_param(params, "fit", "WF")?;
    let bytes = unit.bytes(size);
    disk::create_partition(&path, bytes, name, kind, fit)?;
    Ok(format!(
        "{} partition `{name}` created ({})",
        kind.label(),
        ByteSize(bytes as u64)
    ))
}

fn mount(ctx: &mut Context, params: &Params) -> Result<String> {
    let path = PathBuf::from(params.require("path")?);
    let name = params.require("name")?;
    let id = ctx.mounts.mount(&path, name)?;
    Ok(format!("partition `{name}` mounted as `{id}`"))
}

fn mounted(ctx: &mut Context, _params: &Params) -> Result<String> {
    let mut lines = Vec::new();
    for (path, m) in ctx.mounts.entries() {
        lines.push(format!(
            "{}: `{}` on `{}` (disk {})",
            m.id,
            m.name,
            path.display(),
            m.letter
        ));
    }
    if lines.is_empty() {
        return Ok("no partitions are mounted".to_owned());
    }
    Ok(format!("mounted partitions:\n{}", lines.join("\n")))
}

fn mkfs(ctx: &mut Context, params: &Params) -> Result<String> {
    let id = params.require("id")?;
    let mode: FormatMode = enum_param(params, "type", "full")?;
    match params.get("fs").unwrap_or("2fs") {
        "2fs" => {}
        "3fs" => return Err(Error::UnsupportedFilesystem("3fs".to_owned())),
        other => return Err(Error::InvalidValue("fs", other.to_owned())),
    }
    let (path, part) = ctx.mounts.resolve(id)?;
    let mut img = ImageFile::open(&path)?;
    format::format(&mut img, &part, mode)?;
    Ok(format!(
        "partition `{}` formatted as ext2",
        part.name_str()
    ))
}

fn login(ctx: &mut Context, params: &Params) -> Result<String> {
    let user = params.require("user")?;
    let pass = params.require("pass")?;
    let id = params.require("id")?;
    let session = session::login(&ctx.mounts, &ctx.session, user, pass, id)?;
    ctx.session = Some(session);
    Ok(format!("welcome, {user}"))
}

fn logout(ctx: &mut Context, _params: &Params) -> Result<String> {
    let session = ctx.session.take().ok_or(Error::NotLogged)?;
    Ok(format!("goodbye, {}", session.user))
}

fn mkgrp(ctx: &mut Context, params: &Params) -> Result<String> {
    let name = params.require("name")?;
    users::mkgrp(&ctx.mounts, current_session(ctx)?, name)?;
    Ok(format!("group `{name}` created"))
}

fn rmgrp(ctx: &mut Context, params: &Params) -> Result<String> {
    let name = params.require("name")?;
    users::rmgrp(&ctx.mounts, current_session(ctx)?, name)?;
    Ok(format!("group `{name}` removed"))
}

fn mkusr(ctx: &mut Context, params: &Params) -> Result<String> {
    let user = params.require("user")?;
    let pass = params.require("pass")?;
    let grp = params.require("grp")?;
    users::mkusr(&ctx.mounts, current_session(ctx)?, user, pass, grp)?;
    Ok(format!("user `{user}` created"))
}

fn rmusr(ctx: &mut Context, params: &Params) -> Result<String> {
    let user = params.require("user")?;
    users::rmusr(&ctx.mounts, current_session(ctx)?, user)?;
    Ok(format!("user `{user}` removed"))
}

fn chgrp(ctx: &mut Context, params: &Params) -> Result<String> {
    let user = params.require("user")?;
    let grp = params.require("grp")?;
    users::chgrp(&ctx.mounts, current_session(ctx)?, user, grp)?;
    Ok(format!("user `{user}` moved to group `{grp}`"))
}

fn mkdir(ctx: &mut Context, params: &Params) -> Result<String> {
    let path = params.require("path")?;
    let (mut img, part_start, mut sb) = open_session_fs(ctx)?;
    let session = current_session(ctx)?;
    dir::mkdir(&mut img, part_start, &mut sb, session, path, params.flag("p"))?;
    img.sync()?;
    Ok(format!("directory `{path}` created"))
}

fn mkfile(ctx: &mut Context, params: &Params) -> Result<String> {
    let path = params.require("path")?;
    let size = match params.get("size") {
        Some(value) => value
            .parse::<i64>()
            .ok()
            .filter(|s| *s >= 0)
            .ok_or_else(|| Error::InvalidValue("size", value.to_owned()))?,
        None => 0,
    };
    let source = params.get("cont").map(PathBuf::from);
    let (mut img, part_start, mut sb) = open_session_fs(ctx)?;
    let session = current_session(ctx)?;
    file::mkfile(
        &mut img,
        part_start,
        &mut sb,
        session,
        path,
        params.flag("r"),
        size,
        source.as_deref(),
    )?;
    img.sync()?;
    Ok(format!("file `{path}` created"))
}

fn cat(ctx: &mut Context, params: &Params) -> Result<String> {
    let files: Vec<&str> = params
        .values
        .iter()
        .filter(|(k, _)| is_file_param(k))
        .map(|(_, v)| v.as_str())
        .collect();
    if files.is_empty() {
        return Err(Error::MissingParameter("file1"));
    }
    // Without an explicit id, fall back to the session's partition, then
    // to the first mounted one.
    let id = match params.get("id") {
        Some(id) => id.to_owned(),
        None => ctx
            .session
            .as_ref()
            .map(|s| s.mount_id.clone())
            .or_else(|| ctx.mounts.first_id().map(str::to_owned))
            .ok_or(Error::NoMounts)?,
    };
    let (path, part) = ctx.mounts.resolve(&id)?;
    let mut img = ImageFile::open(&path)?;
    let sb = Superblock::read(&mut img, part.start)?;
    let mut out = String::new();
    for (i, f) in files.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&file::read_path(&mut img, &sb, f)?);
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ext2::format::USERS_SEED;
    use std::fs;
    use std::path::PathBuf;

    fn tmp_image(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "vdisk-cmd-{name}-{}.mia",
            std::process::id()
        ));
        let _ = fs::remove_file(&path);
        path
    }

    fn ok(ctx: &mut Context, line: &str) -> String {
        let out = dispatch(ctx, line);
        assert!(out.starts_with('✅'), "expected success, got: {out}");
        out
    }

    fn err(ctx: &mut Context, line: &str) -> String {
        let out = dispatch(ctx, line);
        assert!(out.starts_with('❌'), "expected failure, got: {out}");
        out
    }

    #[test]
    fn parses_quotes_flags_and_glued_forms() {
        let params = parse_params(&tokenize(r#"-p -path="/a b/c" -size=10"#)).unwrap();
        assert!(params.flag("p"));
        assert_eq!(params.get("path"), Some("/a b/c"));
        assert_eq!(params.get("size"), Some("10"));

        let params = parse_params(&tokenize("p-path=/foo")).unwrap();
        assert!(params.flag("p"));
        assert_eq!(params.get("path"), Some("/foo"));

        assert!(matches!(
            parse_params(&tokenize("-size=1 -size=2")),
            Err(Error::DuplicateParameter(_))
        ));
    }

    #[test]
    fn rejects_unknown_input() {
        let mut ctx = Context::default();
        assert!(dispatch(&mut ctx, "FROBNICATE -x=1").contains("unknown command"));
        err(&mut ctx, "MKDISK -size=1 -path=/tmp/x.mia -bogus=1");
        err(&mut ctx, "MKDISK -path=/tmp/x.mia");
        err(&mut ctx, "MKDISK -size=ten -path=/tmp/x.mia");
    }

    #[test]
    fn create_format_and_login_flow() {
        let image = tmp_image("flow");
        let mut ctx = Context::default();

        ok(
            &mut ctx,
            &format!("MKDISK -size=5 -unit=M -path={}", image.display()),
        );
        assert_eq!(fs::metadata(&image).unwrap().len(), 5 * 1024 * 1024);

        ok(
            &mut ctx,
            &format!(
                "FDISK -size=1 -unit=M -path={} -name=p1 -type=P -fit=FF",
                image.display()
            ),
        );
        let out = ok(
            &mut ctx,
            &format!("MOUNT -path={} -name=p1", image.display()),
        );
        assert!(out.contains("751A"), "unexpected mount id: {out}");

        ok(&mut ctx, "MKFS -id=751A -type=full");
        err(&mut ctx, "MKFS -id=751A -fs=3fs");

        // Privileged commands are rejected while logged out.
        err(&mut ctx, "MKGRP -name=devs");
        err(&mut ctx, "MKDIR -path=/a");

        ok(&mut ctx, "LOGIN -user=root -pass=123 -id=751A");
        err(&mut ctx, "LOGIN -user=root -pass=123 -id=751A");

        ok(&mut ctx, "MKGRP -name=devs");
        ok(&mut ctx, "MKUSR -user=alice -pass=a -grp=devs");
        let out = ok(&mut ctx, "CAT -file1=/users.txt");
        assert!(out.contains(USERS_SEED.trim_end()));
        assert!(out.contains("2,G,devs"));
        assert!(out.contains("2,U,devs,alice,a"));

        ok(&mut ctx, "LOGOUT");
        err(&mut ctx, "LOGOUT");
        ok(&mut ctx, "LOGIN -user=alice -pass=a -id=751A");

        ok(&mut ctx, "MKDIR -p -path=/home/alice/docs");
        ok(&mut ctx, "MKFILE -path=/home/alice/docs/f.txt -size=12");
        let out = ok(&mut ctx, "CAT -file1=/home/alice/docs/f.txt");
        assert!(out.contains("012345678901"));

        // `..` walks back up the created chain.
        ok(&mut ctx, "MKDIR -path=/home/alice/docs/../inbox");
        ok(&mut ctx, "CAT -file1=/home/alice/docs/f.txt -file2=/users.txt");

        fs::remove_file(&image).unwrap();
    }

    #[test]
    fn fdisk_rules_and_stubs() {
        let image = tmp_image("fdisk");
        let mut ctx = Context::default();
        ok(
            &mut ctx,
            &format!("MKDISK -size=2 -unit=M -path={}", image.display()),
        );
        ok(
            &mut ctx,
            &format!(
                "FDISK -size=512 -path={} -name=ext -type=E",
                image.display()
            ),
        );
        let out = err(
            &mut ctx,
            &format!(
                "FDISK -size=128 -path={} -name=ext2 -type=E",
                image.display()
            ),
        );
        assert!(out.contains("extended"));
        ok(
            &mut ctx,
            &format!(
                "FDISK -size=128 -path={} -name=l1 -type=L",
                image.display()
            ),
        );
        let out = ok(
            &mut ctx,
            &format!(
                "FDISK -size=1 -path={} -name=ext -delete=full",
                image.display()
            ),
        );
        assert!(out.contains("not implemented"));

        // Logical partitions mount and format like primaries.
        let out = ok(
            &mut ctx,
            &format!("MOUNT -path={} -name=l1", image.display()),
        );
        assert!(out.contains("751A"));
        ok(&mut ctx, "MKFS -id=751A -type=full");
        err(
            &mut ctx,
            &format!("MOUNT -path={} -name=ext", image.display()),
        );

        fs::remove_file(&image).unwrap();
    }

    #[test]
    fn mounted_listing() {
        let image = tmp_image("mounted");
        let mut ctx = Context::default();
        let out = ok(&mut ctx, "MOUNTED");
        assert!(out.contains("no partitions are mounted"));

        ok(
            &mut ctx,
            &format!("MKDISK -size=2 -unit=M -path={}", image.display()),
        );
        ok(
            &mut ctx,
            &format!("FDISK -size=256 -path={} -name=p1", image.display()),
        );
        ok(
            &mut ctx,
            &format!("MOUNT -path={} -name=p1", image.display()),
        );
        let out = ok(&mut ctx, "MOUNTED");
        assert!(out.contains("751A"));
        assert!(out.contains("p1"));

        err(
            &mut ctx,
            &format!("MOUNT -path={} -name=p1", image.display()),
        );

        fs::remove_file(&image).unwrap();
    }

    #[test]
    fn rmdisk_removes_the_image() {
        let image = tmp_image("rmdisk");
        let mut ctx = Context::default();
        ok(
            &mut ctx,
            &format!("MKDISK -size=1 -unit=M -path={}", image.display()),
        );
        ok(&mut ctx, &format!("RMDISK -path={}", image.display()));
        assert!(!image.exists());
        err(&mut ctx, &format!("RMDISK -path={}", image.display()));
    }
}
