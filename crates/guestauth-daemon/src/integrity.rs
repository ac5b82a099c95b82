//! Startup integrity sweep over the alias store directory.
//!
//! Runs once before the daemon starts accepting connections. Every file in
//! the store directory is accounted for: live alias and mapping files get
//! the full verified-load treatment, backup files are held to the same
//! owner and mode rules as the file they back up, and anything else is
//! quarantined on sight. Quarantine renames the file to `<name>.bad` so the
//! store never serves tampered content; a rename that itself fails aborts
//! startup. Mapping entries whose (certificate, subject) pair no longer
//! appears in the owner's alias file are reported but left in place.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use guestauth_core::alias::store::{
    AliasStore, ALIAS_FILE_MODE, MAPPING_FILE_MODE, STORE_DIR_MODE,
};
use guestauth_core::alias::{user_from_alias_file_name, MAPPING_FILE_NAME};
use guestauth_core::certificate::cert_matches_der;
use guestauth_core::certificate::pem_to_der;
use guestauth_core::error::{ServiceError, ServiceResult};
use guestauth_core::securefile::{load_verified, BACKUP_SUFFIX};
use tracing::{info, warn};

/// Extension appended to quarantined store files.
const QUARANTINE_SUFFIX: &str = "bad";

/// Outcome of a sweep, for logging and tests.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Store files renamed aside because verification failed.
    pub quarantined: Vec<PathBuf>,
    /// Mapping entries whose certificate is missing from the owner's
    /// alias file.
    pub orphaned_mappings: usize,
}

fn quarantine_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(QUARANTINE_SUFFIX);
    path.with_file_name(name)
}

/// Rename a failed store file aside. Failure here is fatal: a file we can
/// neither trust nor remove must not stay live in the store.
fn quarantine(path: &Path, report: &mut SweepReport) -> ServiceResult<()> {
    let target = quarantine_path(path);
    fs::rename(path, &target).map_err(|e| {
        ServiceError::internal(format!(
            "cannot quarantine {} to {}: {e}",
            path.display(),
            target.display()
        ))
    })?;
    warn!(
        target: "audit",
        path = %path.display(),
        quarantined_as = %target.display(),
        "store file failed verification and was quarantined"
    );
    report.quarantined.push(target);
    Ok(())
}

/// Verify a store file that is not a live alias or mapping file.
///
/// Backup files written by the save protocol must carry the same owner and
/// mode as the file they back up. Anything else has no business in the
/// store directory and is quarantined.
fn verify_leftover(
    store: &AliasStore,
    path: &Path,
    name: &str,
    report: &mut SweepReport,
) -> ServiceResult<()> {
    let Some(base) = name.strip_suffix(&format!(".{BACKUP_SUFFIX}")) else {
        warn!(target: "audit", path = %path.display(), "unexpected file in store directory");
        return quarantine(path, report);
    };
    let (owner, mode) = if base == MAPPING_FILE_NAME {
        (store.superuser().to_string(), MAPPING_FILE_MODE)
    } else if let Some(user) = user_from_alias_file_name(base) {
        (user, ALIAS_FILE_MODE)
    } else {
        warn!(target: "audit", path = %path.display(), "unexpected file in store directory");
        return quarantine(path, report);
    };
    match load_verified(path, Some(&owner), mode) {
        Ok(_) => Ok(()),
        Err(e) if e.is_security_violation() => {
            warn!(owner, error = %e, "backup file failed verification");
            quarantine(path, report)
        },
        Err(e) => {
            warn!(owner, error = %e, "backup file skipped during sweep");
            Ok(())
        },
    }
}

fn ensure_store_dir(root: &Path) -> ServiceResult<()> {
    match fs::symlink_metadata(root) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(meta) if meta.file_type().is_symlink() => Err(ServiceError::security_violation(
            root.display().to_string(),
            "store directory is a symlink",
        )),
        Ok(_) => Err(ServiceError::internal(format!(
            "{} exists but is not a directory",
            root.display()
        ))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(root)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(root, fs::Permissions::from_mode(STORE_DIR_MODE))?;
            }
            info!(path = %root.display(), "created alias store directory");
            Ok(())
        },
        Err(e) => Err(e.into()),
    }
}

/// Verify every store file, quarantining failures, and report orphaned
/// mapping entries.
///
/// # Errors
///
/// Returns an error when the store directory is unusable or a quarantine
/// rename fails; both abort daemon startup.
pub fn sweep(store: &AliasStore) -> ServiceResult<SweepReport> {
    let mut report = SweepReport::default();
    ensure_store_dir(store.root())?;

    for entry in fs::read_dir(store.root())? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            warn!(path = %entry.path().display(), "ignoring non-UTF-8 store entry");
            continue;
        };
        if name == MAPPING_FILE_NAME || name.ends_with(&format!(".{QUARANTINE_SUFFIX}")) {
            continue;
        }
        let Some(user) = user_from_alias_file_name(name) else {
            verify_leftover(store, &entry.path(), name, &mut report)?;
            continue;
        };
        match store.load_user_aliases(&user) {
            Ok(aliases) => {
                info!(user, count = aliases.len(), "alias file verified");
            },
            Err(e) if e.is_security_violation() || matches!(e, ServiceError::InternalFailure { .. }) => {
                warn!(user, error = %e, "alias file failed verification");
                quarantine(&entry.path(), &mut report)?;
            },
            Err(e) => {
                // Owner account missing, transient I/O: leave the file for
                // the per-request path to reject.
                warn!(user, error = %e, "alias file skipped during sweep");
            },
        }
    }

    let mapping = match store.load_mapping() {
        Ok(mapping) => mapping,
        Err(e)
            if e.is_security_violation()
                || matches!(e, ServiceError::InternalFailure { .. }) =>
        {
            warn!(error = %e, "mapping file failed verification");
            quarantine(&store.mapping_file_path(), &mut report)?;
            Vec::new()
        },
        Err(e) => {
            warn!(error = %e, "mapping file skipped during sweep");
            Vec::new()
        },
    };

    for entry in &mapping {
        let Ok(der) = pem_to_der(&entry.pem_cert) else {
            report.orphaned_mappings += 1;
            continue;
        };
        // A mapping is covered only when every (certificate, subject)
        // pair it claims is still registered in the owner's alias file.
        let registered: Vec<_> = store
            .load_user_aliases(&entry.user_name)
            .map(|aliases| {
                aliases
                    .into_iter()
                    .filter(|a| cert_matches_der(&a.pem_cert, &der))
                    .flat_map(|a| a.infos)
                    .collect()
            })
            .unwrap_or_default();
        let covered = !entry.subjects.is_empty()
            && entry
                .subjects
                .iter()
                .all(|s| registered.iter().any(|i| i.subject.same(s)));
        if !covered {
            warn!(
                target: "audit",
                user = entry.user_name,
                "mapping entry has no matching alias registration"
            );
            report.orphaned_mappings += 1;
        }
    }

    info!(
        quarantined = report.quarantined.len(),
        orphaned = report.orphaned_mappings,
        "store integrity sweep complete"
    );
    Ok(report)
}
