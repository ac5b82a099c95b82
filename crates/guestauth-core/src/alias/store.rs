//! Alias store: pure add/remove decision logic plus verified file I/O.
//!
//! The decision functions (`plan_*`) take the current store contents and a
//! request and compute either the new contents or an error, without touching
//! the filesystem. The [`AliasStore`] methods wrap them with the verified
//! load/save protocol from [`crate::securefile`] so the decision logic stays
//! unit-testable without a disk.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{
    alias_file_name, parse_mapping, parse_user_aliases, write_mapping, write_user_aliases, Alias,
    AliasInfo, MappedAlias, Subject, MAPPING_FILE_NAME,
};
use crate::certificate::{compare_certs, validate_pem_cert};
use crate::error::{ServiceError, ServiceResult};
use crate::securefile::{load_verified, resolve_user, save_verified};

/// Mode of per-user alias files.
pub const ALIAS_FILE_MODE: u32 = 0o600;

/// Mode of the global mapping file.
pub const MAPPING_FILE_MODE: u32 = 0o644;

/// Mode of the store directory itself.
pub const STORE_DIR_MODE: u32 = 0o755;

// ============================================================================
// Pure decision functions
// ============================================================================

/// Compute the alias list after an add.
///
/// Returns `None` when the (certificate, subject) pair is already present:
/// repeated adds are no-ops, never duplicates.
#[must_use]
pub fn plan_add(aliases: &[Alias], pem_cert: &str, info: &AliasInfo) -> Option<Vec<Alias>> {
    let mut next = aliases.to_vec();
    if let Some(alias) = next.iter_mut().find(|a| compare_certs(&a.pem_cert, pem_cert)) {
        if alias.infos.iter().any(|i| i.subject.same(&info.subject)) {
            return None;
        }
        alias.infos.push(info.clone());
    } else {
        next.push(Alias {
            pem_cert: pem_cert.to_string(),
            infos: vec![info.clone()],
        });
    }
    Some(next)
}

/// Compute the mapping list after an add.
///
/// # Errors
///
/// Returns [`ServiceError::MultipleMappings`] if the same (certificate,
/// subject) pair already maps to a different user. Returns `Ok(None)` when
/// the identical mapping already exists.
pub fn plan_add_mapping(
    mappings: &[MappedAlias],
    user_name: &str,
    pem_cert: &str,
    subject: &Subject,
) -> ServiceResult<Option<Vec<MappedAlias>>> {
    for mapping in mappings {
        if !compare_certs(&mapping.pem_cert, pem_cert) {
            continue;
        }
        if mapping.subjects.iter().any(|s| s.same(subject)) {
            if mapping.user_name == user_name {
                return Ok(None);
            }
            return Err(ServiceError::MultipleMappings);
        }
    }

    let mut next = mappings.to_vec();
    if let Some(mapping) = next
        .iter_mut()
        .find(|m| m.user_name == user_name && compare_certs(&m.pem_cert, pem_cert))
    {
        mapping.subjects.push(subject.clone());
    } else {
        next.push(MappedAlias {
            pem_cert: pem_cert.to_string(),
            user_name: user_name.to_string(),
            subjects: vec![subject.clone()],
        });
    }
    Ok(Some(next))
}

/// Compute the alias list after a remove.
///
/// `subject = None` removes every subject for the certificate. An alias
/// whose subject list becomes empty is dropped entirely. Returns `None`
/// when nothing matched.
#[must_use]
pub fn plan_remove(
    aliases: &[Alias],
    pem_cert: &str,
    subject: Option<&Subject>,
) -> Option<Vec<Alias>> {
    let mut changed = false;
    let mut next = Vec::with_capacity(aliases.len());
    for alias in aliases {
        if !compare_certs(&alias.pem_cert, pem_cert) {
            next.push(alias.clone());
            continue;
        }
        let kept: Vec<AliasInfo> = match subject {
            None => Vec::new(),
            Some(subject) => alias
                .infos
                .iter()
                .filter(|i| !i.subject.same(subject))
                .cloned()
                .collect(),
        };
        if kept.len() != alias.infos.len() {
            changed = true;
        }
        if !kept.is_empty() {
            next.push(Alias {
                pem_cert: alias.pem_cert.clone(),
                infos: kept,
            });
        }
    }
    changed.then_some(next)
}

/// Compute the mapping list after a remove; same contract as
/// [`plan_remove`].
#[must_use]
pub fn plan_remove_mapping(
    mappings: &[MappedAlias],
    pem_cert: &str,
    subject: Option<&Subject>,
) -> Option<Vec<MappedAlias>> {
    let mut changed = false;
    let mut next = Vec::with_capacity(mappings.len());
    for mapping in mappings {
        if !compare_certs(&mapping.pem_cert, pem_cert) {
            next.push(mapping.clone());
            continue;
        }
        let kept: Vec<Subject> = match subject {
            None => Vec::new(),
            Some(subject) => mapping
                .subjects
                .iter()
                .filter(|s| !s.same(subject))
                .cloned()
                .collect(),
        };
        if kept.len() != mapping.subjects.len() {
            changed = true;
        }
        if !kept.is_empty() {
            next.push(MappedAlias {
                pem_cert: mapping.pem_cert.clone(),
                user_name: mapping.user_name.clone(),
                subjects: kept,
            });
        }
    }
    changed.then_some(next)
}

// ============================================================================
// Store
// ============================================================================

/// Per-user alias files plus the global mapping file, under one directory.
#[derive(Debug, Clone)]
pub struct AliasStore {
    root: PathBuf,
    superuser: String,
}

impl AliasStore {
    /// Create a store rooted at `root`; `superuser` owns the mapping file.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, superuser: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            superuser: superuser.into(),
        }
    }

    /// The store directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The configured superuser account name.
    #[must_use]
    pub fn superuser(&self) -> &str {
        &self.superuser
    }

    /// Path of a user's alias file.
    #[must_use]
    pub fn alias_file_path(&self, user: &str) -> PathBuf {
        self.root.join(alias_file_name(user))
    }

    /// Path of the global mapping file.
    #[must_use]
    pub fn mapping_file_path(&self) -> PathBuf {
        self.root.join(MAPPING_FILE_NAME)
    }

    /// Load a user's alias list; absent file means empty list.
    ///
    /// # Errors
    ///
    /// Propagates verification and parse failures from the file layer.
    pub fn load_user_aliases(&self, user: &str) -> ServiceResult<Vec<Alias>> {
        let path = self.alias_file_path(user);
        match load_verified(&path, Some(user), ALIAS_FILE_MODE)? {
            Some(bytes) => parse_user_aliases(&bytes),
            None => Ok(Vec::new()),
        }
    }

    /// Load the global mapping list; absent file means empty list.
    ///
    /// # Errors
    ///
    /// Propagates verification and parse failures from the file layer.
    pub fn load_mapping(&self) -> ServiceResult<Vec<MappedAlias>> {
        let path = self.mapping_file_path();
        match load_verified(&path, Some(&self.superuser), MAPPING_FILE_MODE)? {
            Some(bytes) => parse_mapping(&bytes),
            None => Ok(Vec::new()),
        }
    }

    fn save_user_aliases(&self, user: &str, aliases: &[Alias]) -> ServiceResult<()> {
        let path = self.alias_file_path(user);
        save_verified(&path, &write_user_aliases(aliases), Some(user), ALIAS_FILE_MODE)
    }

    fn save_mapping(&self, mappings: &[MappedAlias]) -> ServiceResult<()> {
        let path = self.mapping_file_path();
        save_verified(
            &path,
            &write_mapping(mappings),
            Some(&self.superuser),
            MAPPING_FILE_MODE,
        )
    }

    /// Add an alias (and optionally a mapping entry) for `owner`.
    ///
    /// On a two-file update the alias file is written first; if the mapping
    /// write then fails, the alias file is restored to its prior contents so
    /// neither file is left half-applied.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::NoSuchUser`] if `owner` does not resolve.
    /// - [`ServiceError::InvalidCertificate`] if `pem_cert` is not a
    ///   well-formed PEM certificate.
    /// - [`ServiceError::MultipleMappings`] if the mapping would become
    ///   ambiguous.
    pub fn add_alias(
        &self,
        owner: &str,
        add_to_mapping: bool,
        pem_cert: &str,
        info: &AliasInfo,
    ) -> ServiceResult<()> {
        resolve_user(owner)?;
        validate_pem_cert(pem_cert)?;

        let current = self.load_user_aliases(owner)?;
        let planned = plan_add(&current, pem_cert, info);

        let mapping_planned = if add_to_mapping {
            let mappings = self.load_mapping()?;
            plan_add_mapping(&mappings, owner, pem_cert, &info.subject)?
        } else {
            None
        };

        if let Some(next) = &planned {
            self.save_user_aliases(owner, next)?;
        }

        if let Some(next_mapping) = &mapping_planned {
            if let Err(e) = self.save_mapping(next_mapping) {
                // Roll the alias file back so the two files stay coherent.
                if planned.is_some() {
                    if let Err(restore) = self.save_user_aliases(owner, &current) {
                        warn!(
                            target: "audit",
                            owner,
                            error = %restore,
                            "failed to roll back alias file after mapping write failure"
                        );
                    }
                }
                return Err(e);
            }
        }

        debug!(
            owner,
            mapped = add_to_mapping,
            changed = planned.is_some(),
            "alias add processed"
        );
        Ok(())
    }

    /// Remove an alias subject (or, with `subject = None`, all subjects for
    /// the certificate) from `owner`'s store.
    ///
    /// The mapping file is scanned for the same pair independently of
    /// whether the per-user removal matched anything; orphaned mapping
    /// entries left behind by older versions are cleared without being
    /// treated as an error.
    ///
    /// # Errors
    ///
    /// Propagates store I/O and verification failures.
    pub fn remove_alias(
        &self,
        owner: &str,
        pem_cert: &str,
        subject: Option<&Subject>,
    ) -> ServiceResult<()> {
        let current = self.load_user_aliases(owner)?;
        if let Some(next) = plan_remove(&current, pem_cert, subject) {
            self.save_user_aliases(owner, &next)?;
        }

        let mappings = self.load_mapping()?;
        if let Some(next) = plan_remove_mapping(&mappings, pem_cert, subject) {
            self.save_mapping(&next)?;
        }

        debug!(owner, "alias remove processed");
        Ok(())
    }

    /// Query a user's aliases. Pure read; the user need not currently exist
    /// (stores of deleted accounts stay inspectable).
    ///
    /// # Errors
    ///
    /// Propagates store I/O and verification failures.
    pub fn query_aliases(&self, owner: &str) -> ServiceResult<Vec<Alias>> {
        self.load_user_aliases(owner)
    }

    /// Query the global mapping list. Pure read.
    ///
    /// # Errors
    ///
    /// Propagates store I/O and verification failures.
    pub fn query_mapped_aliases(&self) -> ServiceResult<Vec<MappedAlias>> {
        self.load_mapping()
    }
}
