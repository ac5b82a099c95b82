//! TOCTOU-safe load/save of small trust-sensitive files.
//!
//! The alias store decides who may authenticate as whom, so its files are
//! never read without a fresh ownership and permission check, and the check
//! is repeated through the open handle to close the race between check and
//! use. Writes go through a temp file created with the final mode, an
//! fsync, a backup of the previous version, and an atomic rename.
//!
//! # Load protocol
//!
//! 1. `lstat` the path; reject anything that is not a regular file and
//!    anything over [`MAX_STORE_FILE_SIZE`].
//! 2. Verify owner and mode against the expected values using the pre-open
//!    metadata.
//! 3. Open, re-fetch metadata through the handle, and compare size, mode,
//!    owner, and group against step 1. Any discrepancy aborts the read.
//! 4. Read exactly the previously observed size.
//!
//! # Save protocol
//!
//! Temp file with the target mode set at creation, write, fsync, move the
//! live file to `<path>.bak`, rename the temp into place, delete the
//! backup. On failure after the backup was taken the backup is restored.
//! Empty content deletes the live file instead of persisting an empty one.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use nix::unistd::{Gid, Uid, User};
use tracing::warn;

use crate::error::{ServiceError, ServiceResult};

/// Maximum size of any loaded store file (10 MiB).
///
/// Checked before the file is opened so an attacker-planted giant file is
/// rejected without allocation.
pub const MAX_STORE_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Suffix for the transient backup taken during a safe replace.
pub const BACKUP_SUFFIX: &str = "bak";

/// Pre-open metadata snapshot used for the check/use comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MetaSnapshot {
    size: u64,
    mode: u32,
    uid: u32,
    gid: u32,
}

impl MetaSnapshot {
    fn of(meta: &std::fs::Metadata) -> Self {
        Self {
            size: meta.size(),
            mode: meta.mode() & 0o7777,
            uid: meta.uid(),
            gid: meta.gid(),
        }
    }
}

/// Resolve a user name to its uid/gid.
///
/// # Errors
///
/// Returns [`ServiceError::NoSuchUser`] if the account does not exist, or
/// [`ServiceError::InternalFailure`] if the lookup itself failed.
pub fn resolve_user(name: &str) -> ServiceResult<(Uid, Gid)> {
    match User::from_name(name) {
        Ok(Some(user)) => Ok((user.uid, user.gid)),
        Ok(None) => Err(ServiceError::no_such_user(name)),
        Err(e) => Err(ServiceError::internal(format!(
            "user lookup for {name:?} failed: {e}"
        ))),
    }
}

/// Verify the owner and mode of pre-open metadata.
///
/// When the expected owner cannot be resolved (deleted account, directory
/// outage), the file's raw owner id is reverse-looked-up instead. If that
/// also fails the check proceeds: an unavailable account database must not
/// take the store down, but a *resolved* mismatch is always a violation.
fn verify_owner_and_mode(
    path: &Path,
    meta: &std::fs::Metadata,
    expected_owner: Option<&str>,
    expected_mode: u32,
) -> ServiceResult<()> {
    let actual_mode = meta.mode() & 0o7777;
    if actual_mode != expected_mode {
        return Err(ServiceError::security_violation(
            path.display().to_string(),
            format!("mode {actual_mode:04o} does not match expected {expected_mode:04o}"),
        ));
    }

    let Some(owner) = expected_owner else {
        return Ok(());
    };

    match User::from_name(owner) {
        Ok(Some(user)) => {
            if user.uid.as_raw() != meta.uid() {
                return Err(ServiceError::security_violation(
                    path.display().to_string(),
                    format!(
                        "owned by uid {} but expected {} ({owner})",
                        meta.uid(),
                        user.uid
                    ),
                ));
            }
        },
        Ok(None) | Err(_) => {
            // Forward lookup failed; fall back to a reverse lookup on the
            // file's raw owner id.
            match User::from_uid(Uid::from_raw(meta.uid())) {
                Ok(Some(file_owner)) => {
                    if file_owner.name != owner {
                        return Err(ServiceError::security_violation(
                            path.display().to_string(),
                            format!(
                                "owned by {} (uid {}) but expected {owner}",
                                file_owner.name,
                                meta.uid()
                            ),
                        ));
                    }
                },
                Ok(None) | Err(_) => {
                    // Both lookups failed: assume account deletion or a
                    // directory outage and proceed.
                    warn!(
                        target: "audit",
                        path = %path.display(),
                        owner,
                        uid = meta.uid(),
                        "owner unresolvable in both directions; proceeding without owner check"
                    );
                },
            }
        },
    }

    Ok(())
}

/// Load a trust-sensitive file with full owner/permission verification.
///
/// Returns `Ok(None)` if the file does not exist.
///
/// # Errors
///
/// - [`ServiceError::SecurityViolation`] on type, size, owner, mode, or
///   check/use metadata mismatches. Callers must audit these.
/// - [`ServiceError::InternalFailure`] on plain I/O failures.
pub fn load_verified(
    path: &Path,
    expected_owner: Option<&str>,
    expected_mode: u32,
) -> ServiceResult<Option<Vec<u8>>> {
    let pre = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ServiceError::internal(format!(
                "failed to stat {}: {e}",
                path.display()
            )))
        },
    };

    if !pre.file_type().is_file() {
        return Err(ServiceError::security_violation(
            path.display().to_string(),
            "not a regular file",
        ));
    }
    if pre.size() > MAX_STORE_FILE_SIZE {
        return Err(ServiceError::security_violation(
            path.display().to_string(),
            format!(
                "size {} exceeds maximum {MAX_STORE_FILE_SIZE}",
                pre.size()
            ),
        ));
    }

    verify_owner_and_mode(path, &pre, expected_owner, expected_mode)?;
    let pre_snapshot = MetaSnapshot::of(&pre);

    let mut file = File::open(path).map_err(|e| {
        ServiceError::internal(format!("failed to open {}: {e}", path.display()))
    })?;

    // Re-fetch through the open handle: the path may have been swapped
    // between the check and the open.
    let post = file.metadata().map_err(|e| {
        ServiceError::internal(format!("failed to fstat {}: {e}", path.display()))
    })?;
    if MetaSnapshot::of(&post) != pre_snapshot {
        return Err(ServiceError::security_violation(
            path.display().to_string(),
            "file changed between check and open",
        ));
    }

    let mut buf = vec![
        0u8;
        usize::try_from(pre_snapshot.size)
            .map_err(|_| ServiceError::internal("file size does not fit in memory"))?
    ];
    file.read_exact(&mut buf).map_err(|e| {
        ServiceError::internal(format!("short read on {}: {e}", path.display()))
    })?;

    Ok(Some(buf))
}

/// Path of the backup taken while replacing `path`.
#[must_use]
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Save a trust-sensitive file atomically.
///
/// Empty `bytes` deletes the live file (and any stale backup) instead of
/// writing an empty one. When `owner` is given and resolvable the file is
/// chowned to that account; an unresolvable owner inherits the previous
/// version's ownership by virtue of never being chowned.
///
/// # Errors
///
/// Returns [`ServiceError::InternalFailure`] on I/O failure. If a failure
/// occurs after the live file was moved aside, the backup is restored
/// before the error propagates.
pub fn save_verified(
    path: &Path,
    bytes: &[u8],
    owner: Option<&str>,
    mode: u32,
) -> ServiceResult<()> {
    let bak = backup_path(path);

    if bytes.is_empty() {
        for stale in [path, bak.as_path()] {
            if let Err(e) = std::fs::remove_file(stale) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(ServiceError::internal(format!(
                        "failed to remove {}: {e}",
                        stale.display()
                    )));
                }
            }
        }
        return Ok(());
    }

    let tmp = temp_path(path);
    // A stale temp from a crashed writer must not fail the create_new below.
    match std::fs::remove_file(&tmp) {
        Ok(()) => {},
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
        Err(e) => {
            return Err(ServiceError::internal(format!(
                "failed to remove stale temp {}: {e}",
                tmp.display()
            )))
        },
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(&tmp)
        .map_err(|e| {
            ServiceError::internal(format!("failed to create temp {}: {e}", tmp.display()))
        })?;

    let write_result = file
        .write_all(bytes)
        .and_then(|()| file.sync_all())
        .map_err(|e| {
            ServiceError::internal(format!("failed to write temp {}: {e}", tmp.display()))
        });
    if let Err(e) = write_result {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    drop(file);

    if let Some(owner) = owner {
        // Only resolvable owners are applied; otherwise ownership carries
        // over from the previous version untouched.
        if let Ok((uid, gid)) = resolve_user(owner) {
            if uid != nix::unistd::geteuid() {
                if let Err(e) = nix::unistd::chown(&tmp, Some(uid), Some(gid)) {
                    let _ = std::fs::remove_file(&tmp);
                    return Err(ServiceError::internal(format!(
                        "failed to chown {} to {owner}: {e}",
                        tmp.display()
                    )));
                }
            }
        }
    }

    // Safe replace: back up, rename, then drop the backup.
    let had_previous = match std::fs::rename(path, &bak) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            return Err(ServiceError::internal(format!(
                "failed to back up {}: {e}",
                path.display()
            )));
        },
    };

    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        if had_previous {
            if let Err(restore_err) = std::fs::rename(&bak, path) {
                warn!(
                    target: "audit",
                    path = %path.display(),
                    error = %restore_err,
                    "failed to restore backup after aborted replace"
                );
            }
        }
        return Err(ServiceError::internal(format!(
            "failed to replace {}: {e}",
            path.display()
        )));
    }

    if had_previous {
        if let Err(e) = std::fs::remove_file(&bak) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    path = %bak.display(),
                    error = %e,
                    "failed to remove backup after successful replace"
                );
            }
        }
    }

    Ok(())
}
