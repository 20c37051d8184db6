//! Persisted mount table (`/etc/fstab`).
//!
//! Entries are parsed into fields, never matched as substrings. A wanted
//! entry counts as present when an existing line names the same device
//! (with `/dev/mapper/<vg>-<lv>` folded into `/dev/<vg>/<lv>`) or the same
//! mountpoint. Before the first write, the table is copied to
//! `<fstab>.bak.YYYYMMDD` unless today's backup already exists.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use tracing::{debug, info};

use crate::error::{ProvisionError, Result};
use crate::topology::{LogicalVolumeSpec, MountSpec, Topology};

/// Mountpoint column value for entries that are not mounted (swap)
pub const NO_MOUNTPOINT: &str = "none";

/// One line of the mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FstabEntry {
    pub device: String,
    pub mountpoint: String,
    pub fstype: String,
    pub options: String,
    pub dump: u8,
    pub pass: u8,
}

impl FstabEntry {
    /// Entry for a topology mount and the volume it names
    pub fn for_volume(mount: &MountSpec, lv: &LogicalVolumeSpec) -> Self {
        Self {
            device: escape_octal(&lv.device_path().display().to_string()),
            mountpoint: mount.mountpoint.as_ref().map_or_else(
                || NO_MOUNTPOINT.to_string(),
                |p| escape_octal(&p.display().to_string()),
            ),
            fstype: lv.usage.fstype().to_string(),
            options: mount.options.clone(),
            dump: mount.dump,
            pass: mount.pass,
        }
    }

    /// Parse a table line. Comments, blank lines and lines with fewer than
    /// three fields yield `None`; missing dump/pass default to 0.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let mut fields = line.split_whitespace();
        let device = fields.next()?.to_string();
        let mountpoint = fields.next()?.to_string();
        let fstype = fields.next()?.to_string();
        let options = fields.next().unwrap_or("defaults").to_string();
        let dump = fields.next().and_then(|f| f.parse().ok()).unwrap_or(0);
        let pass = fields.next().and_then(|f| f.parse().ok()).unwrap_or(0);
        Some(Self {
            device,
            mountpoint,
            fstype,
            options,
            dump,
            pass,
        })
    }

    /// Whether this existing line already covers `wanted`
    pub fn covers(&self, wanted: &FstabEntry) -> bool {
        if normalize_device(&self.device) == normalize_device(&wanted.device) {
            return true;
        }
        wanted.mountpoint != NO_MOUNTPOINT
            && normalize_mountpoint(&self.mountpoint) == normalize_mountpoint(&wanted.mountpoint)
    }
}

impl fmt::Display for FstabEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.device, self.mountpoint, self.fstype, self.options, self.dump, self.pass
        )
    }
}

/// Entries the topology wants persisted, in mount order
pub fn entries_for(topology: &Topology) -> Vec<FstabEntry> {
    topology
        .mounts_with_volumes()
        .map(|(mount, lv)| FstabEntry::for_volume(mount, lv))
        .collect()
}

/// Fold device-mapper names into `/dev/<vg>/<lv>`.
///
/// Device-mapper joins VG and LV with a single `-` and doubles any `-`
/// inside either name.
pub fn normalize_device(device: &str) -> String {
    let Some(name) = device.strip_prefix("/dev/mapper/") else {
        return device.to_string();
    };
    let bytes = name.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'-' {
            if bytes.get(i + 1) == Some(&b'-') {
                i += 2;
                continue;
            }
            let vg = name[..i].replace("--", "-");
            let lv = name[i + 1..].replace("--", "-");
            return format!("/dev/{}/{}", vg, lv);
        }
        i += 1;
    }
    device.to_string()
}

/// Undo the `\NNN` octal escaping used for spaces, tabs, newlines and
/// backslashes in fstab and `/proc/self/mounts` fields.
pub fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits.iter().fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Escape the characters that would split or corrupt a table field
pub fn escape_octal(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            ' ' => out.push_str("\\040"),
            '\t' => out.push_str("\\011"),
            '\n' => out.push_str("\\012"),
            '\\' => out.push_str("\\134"),
            _ => out.push(c),
        }
    }
    out
}

/// Decode escapes and drop trailing slashes (`/work/` is `/work`)
pub fn normalize_mountpoint(mountpoint: &str) -> String {
    let decoded = unescape_octal(mountpoint);
    let trimmed = decoded.trim_end_matches('/');
    if trimmed.is_empty() && decoded.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Result of `ensure_persisted`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistReport {
    pub backup: Option<PathBuf>,
    pub appended: Vec<FstabEntry>,
    pub already_present: Vec<FstabEntry>,
}

/// The mount table file
#[derive(Debug, Clone)]
pub struct MountTable {
    path: PathBuf,
}

impl MountTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Backup file name for `date`
    pub fn backup_path(&self, date: NaiveDate) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".bak.{}", date.format("%Y%m%d")));
        PathBuf::from(name)
    }

    /// Raw contents; a missing table reads as empty
    fn contents(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(s) => Ok(s),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(table_error(
                anyhow::Error::new(e).context(format!("Failed to read {}", self.path.display())),
            )),
        }
    }

    pub fn entries(&self) -> Result<Vec<FstabEntry>> {
        Ok(self.contents()?.lines().filter_map(FstabEntry::parse).collect())
    }

    /// Copy the table to today's backup unless that backup exists.
    ///
    /// Returns the path written, if any.
    pub fn ensure_backup(&self, date: NaiveDate) -> Result<Option<PathBuf>> {
        let backup = self.backup_path(date);
        if backup.exists() {
            debug!("Backup {} already exists", backup.display());
            return Ok(None);
        }
        if !self.path.exists() {
            return Ok(None);
        }
        fs::copy(&self.path, &backup)
            .with_context(|| {
                format!("Failed to back up {} to {}", self.path.display(), backup.display())
            })
            .map_err(table_error)?;
        info!("Backed up {} to {}", self.path.display(), backup.display());
        Ok(Some(backup))
    }

    /// Append lines, adding a newline first if the file lacks a trailing one
    pub fn append(&self, entries: &[FstabEntry]) -> Result<()> {
        let needs_newline = {
            let contents = self.contents()?;
            !contents.is_empty() && !contents.ends_with('\n')
        };
        let mut text = String::new();
        if needs_newline {
            text.push('\n');
        }
        for entry in entries {
            text.push_str(&entry.to_string());
            text.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))
            .map_err(table_error)?;
        file.write_all(text.as_bytes())
            .and_then(|()| file.sync_all())
            .with_context(|| format!("Failed to write {}", self.path.display()))
            .map_err(table_error)?;
        Ok(())
    }
}

fn table_error(err: anyhow::Error) -> ProvisionError {
    ProvisionError::MountTable(format!("{:#}", err))
}

/// Wanted entries no existing line covers
pub fn missing_entries(table: &MountTable, wanted: &[FstabEntry]) -> Result<Vec<FstabEntry>> {
    let existing = table.entries()?;
    Ok(wanted
        .iter()
        .filter(|w| !existing.iter().any(|e| e.covers(w)))
        .cloned()
        .collect())
}

/// Append each wanted entry not already covered by an existing line.
///
/// Nothing is written, and no backup made, when every entry is present.
///
/// # Errors
///
/// `ProvisionError::MountTable` on read, backup or write failure.
pub fn ensure_persisted(
    table: &MountTable,
    wanted: &[FstabEntry],
    date: NaiveDate,
) -> Result<PersistReport> {
    let missing = missing_entries(table, wanted)?;
    let mut report = PersistReport::default();
    for entry in wanted {
        if missing.contains(entry) {
            report.appended.push(entry.clone());
        } else {
            debug!("fstab already has an entry for {}", entry.device);
            report.already_present.push(entry.clone());
        }
    }

    if report.appended.is_empty() {
        info!("{} already up to date", table.path().display());
        return Ok(report);
    }

    report.backup = table.ensure_backup(date)?;
    table.append(&report.appended)?;
    for entry in &report.appended {
        info!("Added to {}: {}", table.path().display(), entry);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const BASE: &str = "# /etc/fstab\nUUID=1234 / ext4 rw,relatime 0 1\n";

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 9).expect("valid date")
    }

    fn table_with(contents: &str) -> (TempDir, MountTable) {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("fstab");
        fs::write(&path, contents).expect("write fstab");
        (dir, MountTable::new(path))
    }

    #[test]
    fn test_default_entries_render_exact_lines() {
        let lines: Vec<String> = entries_for(&Topology::default())
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            lines,
            vec![
                "/dev/vg_datos/lv_docker /var/lib/docker ext4 defaults 0 2",
                "/dev/vg_datos/lv_workareas /work ext4 defaults 0 2",
                "/dev/vg_temp/lv_swap none swap sw 0 0",
            ]
        );
    }

    #[test]
    fn test_parse_skips_comments_and_short_lines() {
        assert_eq!(FstabEntry::parse("# comment"), None);
        assert_eq!(FstabEntry::parse("   "), None);
        assert_eq!(FstabEntry::parse("/dev/sda1 /boot"), None);
        let entry = FstabEntry::parse("/dev/sda1\t/boot  vfat").expect("three fields");
        assert_eq!(entry.options, "defaults");
        assert_eq!((entry.dump, entry.pass), (0, 0));
    }

    #[test]
    fn test_normalize_mapper_names() {
        assert_eq!(normalize_device("/dev/mapper/vg_datos-lv_docker"), "/dev/vg_datos/lv_docker");
        assert_eq!(normalize_device("/dev/mapper/my--vg-my--lv"), "/dev/my-vg/my-lv");
        assert_eq!(normalize_device("/dev/sdb"), "/dev/sdb");
        assert_eq!(normalize_device("/dev/mapper/cryptroot"), "/dev/mapper/cryptroot");
    }

    #[test]
    fn test_covers_by_device_alias_or_mountpoint() {
        let wanted = FstabEntry::parse("/dev/vg_datos/lv_docker /var/lib/docker ext4 defaults 0 2")
            .expect("parse");
        let alias = FstabEntry::parse("/dev/mapper/vg_datos-lv_docker /srv ext4 defaults 0 0")
            .expect("parse");
        let same_mp =
            FstabEntry::parse("UUID=abcd /var/lib/docker xfs defaults 0 0").expect("parse");
        let other =
            FstabEntry::parse("/dev/vg_datos/lv_docker_old /old ext4 defaults 0 0").expect("parse");
        assert!(alias.covers(&wanted));
        assert!(same_mp.covers(&wanted));
        assert!(!other.covers(&wanted));

        let trailing =
            FstabEntry::parse("LABEL=docker /var/lib/docker/ ext4 defaults 0 2").expect("parse");
        assert!(trailing.covers(&wanted));

        let swap = FstabEntry::parse("/dev/vg_temp/lv_swap none swap sw 0 0").expect("parse");
        let other_swap = FstabEntry::parse("/swapfile none swap sw 0 0").expect("parse");
        assert!(!other_swap.covers(&swap));
    }

    #[test]
    fn test_normalize_mountpoint() {
        assert_eq!(normalize_mountpoint("/work/"), "/work");
        assert_eq!(normalize_mountpoint("/work//"), "/work");
        assert_eq!(normalize_mountpoint("/"), "/");
        assert_eq!(normalize_mountpoint("/mnt/old\\040disk"), "/mnt/old disk");
        assert_eq!(normalize_mountpoint("/mnt/tab\\011x"), "/mnt/tab\tx");
        assert_eq!(normalize_mountpoint("none"), "none");
    }

    #[test]
    fn test_escape_octal_reverses_unescape() {
        assert_eq!(escape_octal("/srv/shared data"), "/srv/shared\\040data");
        assert_eq!(escape_octal("/work"), "/work");
        assert_eq!(unescape_octal(&escape_octal("a b\tc\\d")), "a b\tc\\d");
    }

    #[test]
    fn test_escaped_mountpoint_covers_wanted() {
        let wanted =
            FstabEntry::parse("/dev/vg_data/lv_shared /srv/shared\\040data ext4 defaults 0 2")
                .expect("parse");
        let existing =
            FstabEntry::parse("UUID=1234 /srv/shared\\040data/ ext4 defaults 0 2").expect("parse");
        assert!(existing.covers(&wanted));

        let mut raw_space = wanted.clone();
        raw_space.mountpoint = "/srv/shared data".to_string();
        assert!(existing.covers(&raw_space));
    }

    #[test]
    fn test_three_runs_append_once() {
        let (_dir, table) = table_with(BASE);
        let wanted = entries_for(&Topology::default());

        let first = ensure_persisted(&table, &wanted, date()).expect("first");
        assert_eq!(first.appended.len(), 3);
        assert_eq!(first.backup, Some(table.backup_path(date())));

        for _ in 0..2 {
            let again = ensure_persisted(&table, &wanted, date()).expect("again");
            assert!(again.appended.is_empty());
            assert_eq!(again.already_present.len(), 3);
            assert_eq!(again.backup, None);
        }

        let contents = fs::read_to_string(table.path()).expect("read");
        assert_eq!(contents.lines().count(), 2 + 3);
        assert_eq!(contents.matches("lv_swap").count(), 1);
        let backup = fs::read_to_string(table.backup_path(date())).expect("backup");
        assert_eq!(backup, BASE);
    }

    #[test]
    fn test_no_backup_when_nothing_to_write() {
        let wanted = entries_for(&Topology::default());
        let full: String = wanted.iter().map(|e| format!("{}\n", e)).collect();
        let (_dir, table) = table_with(&full);

        let report = ensure_persisted(&table, &wanted, date()).expect("persist");
        assert!(report.appended.is_empty());
        assert!(!table.backup_path(date()).exists());
    }

    #[test]
    fn test_existing_backup_for_today_is_kept() {
        let (_dir, table) = table_with(BASE);
        fs::write(table.backup_path(date()), "older\n").expect("write backup");

        let report =
            ensure_persisted(&table, &entries_for(&Topology::default()), date()).expect("persist");
        assert_eq!(report.backup, None);
        assert_eq!(fs::read_to_string(table.backup_path(date())).expect("read"), "older\n");
    }

    #[test]
    fn test_missing_trailing_newline_is_repaired() {
        let (_dir, table) = table_with("UUID=1234 / ext4 defaults 0 1");
        ensure_persisted(&table, &entries_for(&Topology::default()), date()).expect("persist");
        let contents = fs::read_to_string(table.path()).expect("read");
        assert!(contents.starts_with("UUID=1234 / ext4 defaults 0 1\n/dev/vg_datos/lv_docker "));
        assert!(contents.ends_with("sw 0 0\n"));
    }

    #[test]
    fn test_backup_name_uses_date() {
        let table = MountTable::new("/etc/fstab");
        assert_eq!(table.backup_path(date()), PathBuf::from("/etc/fstab.bak.20240309"));
    }
}
