//! The credential engine: convergence, credential operations and ACL
//! operations, each run as one atomic, audited transaction.

use std::sync::Arc;

use common::protocol::{
    CredentialView, CredentialsView, GenerateRequest, PermissionEntry, PermissionsRequest,
    PermissionsView, SetRequest,
};
use common::{Actor, CredentialType, CredentialValue, PermissionOperation, ServiceError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::AuditRecorder;
use crate::clock::Clock;
use crate::credential::{validate_name, CredentialVersion};
use crate::crypto::EncryptionProvider;
use crate::generator::{GenerationContext, GeneratorSet, SigningAuthority};
use crate::params::GenerationParameters;
use crate::permission;
use crate::store::{AuditLog, CredentialStore, Datastore, PermissionStore, StoreError, Transaction};

/// Additional attempts after a commit conflict, unless configured otherwise.
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;

/// Entry point for every credential and permission operation.
pub struct Engine {
    datastore: Arc<dyn Datastore>,
    encryptor: Arc<dyn EncryptionProvider>,
    generators: GeneratorSet,
    clock: Arc<dyn Clock>,
    max_conflict_retries: u32,
}

impl Engine {
    pub fn new(
        datastore: Arc<dyn Datastore>,
        encryptor: Arc<dyn EncryptionProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            datastore,
            encryptor,
            generators: GeneratorSet::new(),
            clock,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }

    pub fn with_generators(mut self, generators: GeneratorSet) -> Self {
        self.generators = generators;
        self
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    // -----------------------------------------------------------------------
    // Credential operations
    // -----------------------------------------------------------------------

    /// Generate a credential, or converge on the most recent version.
    ///
    /// Without `overwrite`, an existing version generated with equivalent
    /// parameters is returned unchanged. Otherwise a new version is generated,
    /// sealed and saved; a credential's first version also grants its creator
    /// every permission.
    ///
    /// # Errors
    ///
    /// `ValidationFailed` for malformed names, parameters or grant lists and
    /// for a type that differs from the existing credential's;
    /// `Unauthorized` without WRITE (and WRITE_ACL when granting) on an
    /// existing credential; `GenerationFailed`, `EncryptionUnavailable` and
    /// `ConflictRetryExhausted` as they arise.
    pub fn generate(
        &self,
        actor: &Actor,
        request: &GenerateRequest,
    ) -> Result<CredentialView, ServiceError> {
        let name = validate_name(&request.name)?;
        let mut parameters =
            GenerationParameters::parse(request.credential_type, request.parameters.clone())?;
        if let Some(username) = request.value.as_ref().and_then(|v| v.username.as_deref()) {
            parameters = username_parameter(parameters, username)?;
        }
        permission::validate_entries(actor, &request.additional_permissions)?;

        self.in_transaction(actor, |tx, audit| {
            let existing = tx.find_most_recent(&name)?;
            if let Some(existing) = &existing {
                self.check_existing(
                    tx,
                    existing,
                    request.credential_type,
                    actor,
                    &request.additional_permissions,
                )?;
            }
            let effective = parameters
                .clone()
                .with_default_username(existing.as_ref().and_then(CredentialVersion::username));

            if let (Some(existing), false) = (&existing, request.overwrite) {
                let converged = existing
                    .generation_parameters()
                    .is_some_and(|stored| stored.is_equivalent(&effective));
                if converged {
                    debug!(version_id = %existing.id, "parameters unchanged, reusing version");
                    audit.credential_access(&existing.name);
                    return existing.to_view(self.encryptor.as_ref());
                }
            }

            let value = self.generate_value(tx, actor, &effective)?;
            let name = existing.as_ref().map_or(name.as_str(), |v| v.name.as_str());
            let version = NewVersion {
                name,
                value,
                parameters: Some(effective),
                is_new: existing.is_none(),
                additional_permissions: &request.additional_permissions,
            };
            self.write_version(tx, audit, actor, version)
        })
    }

    /// Store a caller-supplied value.
    ///
    /// Without `overwrite`, an existing version holding the same value is
    /// returned unchanged.
    ///
    /// # Errors
    ///
    /// As [`Engine::generate`], minus generation failures.
    pub fn set(&self, actor: &Actor, request: &SetRequest) -> Result<CredentialView, ServiceError> {
        let name = validate_name(&request.name)?;
        let value = CredentialValue::from_json(request.credential_type, request.value.clone())?;
        permission::validate_entries(actor, &request.additional_permissions)?;

        self.in_transaction(actor, |tx, audit| {
            let existing = tx.find_most_recent(&name)?;
            if let Some(existing) = &existing {
                self.check_existing(
                    tx,
                    existing,
                    request.credential_type,
                    actor,
                    &request.additional_permissions,
                )?;
                if !request.overwrite && existing.value(self.encryptor.as_ref())? == value {
                    debug!(version_id = %existing.id, "value unchanged, reusing version");
                    audit.credential_access(&existing.name);
                    return existing.to_view(self.encryptor.as_ref());
                }
            }
            let name = existing.as_ref().map_or(name.as_str(), |v| v.name.as_str());
            let version = NewVersion {
                name,
                value: value.clone(),
                parameters: None,
                is_new: existing.is_none(),
                additional_permissions: &request.additional_permissions,
            };
            self.write_version(tx, audit, actor, version)
        })
    }

    /// The most recent version of `name`.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown names, `Unauthorized` without READ.
    pub fn get(&self, actor: &Actor, name: &str) -> Result<CredentialView, ServiceError> {
        let name = validate_name(name)?;
        self.in_transaction(actor, |tx, audit| {
            let version = tx.find_most_recent(&name)?.ok_or_else(|| not_found(&name))?;
            permission::authorize(tx, &version.name, actor, PermissionOperation::Read)?;
            audit.credential_access(&version.name);
            version.to_view(self.encryptor.as_ref())
        })
    }

    /// One specific version.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids, `Unauthorized` without READ on its name.
    pub fn get_by_id(&self, actor: &Actor, id: Uuid) -> Result<CredentialView, ServiceError> {
        self.in_transaction(actor, |tx, audit| {
            let version = tx
                .find_by_id(id)?
                .ok_or_else(|| ServiceError::NotFound(format!("credential version {id}")))?;
            permission::authorize(tx, &version.name, actor, PermissionOperation::Read)?;
            audit.credential_access(&version.name);
            version.to_view(self.encryptor.as_ref())
        })
    }

    /// Every version of `name`, newest first.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown names, `Unauthorized` without READ.
    pub fn versions(&self, actor: &Actor, name: &str) -> Result<CredentialsView, ServiceError> {
        let name = validate_name(name)?;
        self.in_transaction(actor, |tx, audit| {
            let versions = tx.find_all_by_name(&name)?;
            let newest = versions.first().ok_or_else(|| not_found(&name))?;
            permission::authorize(tx, &newest.name, actor, PermissionOperation::Read)?;
            audit.credential_access(&newest.name);
            let data = versions
                .iter()
                .map(|v| v.to_view(self.encryptor.as_ref()))
                .collect::<Result<_, _>>()?;
            Ok(CredentialsView { data })
        })
    }

    /// Generate a new version from the parameters stored on the most recent one.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Unauthorized` without WRITE, and `ValidationFailed` when
    /// the most recent version was set rather than generated.
    pub fn regenerate(&self, actor: &Actor, name: &str) -> Result<CredentialView, ServiceError> {
        let name = validate_name(name)?;
        self.in_transaction(actor, |tx, audit| {
            let existing = tx.find_most_recent(&name)?.ok_or_else(|| not_found(&name))?;
            permission::authorize(tx, &existing.name, actor, PermissionOperation::Write)?;
            let parameters = existing.generation_parameters().ok_or_else(|| {
                ServiceError::ValidationFailed(format!(
                    "{} was not generated and cannot be regenerated",
                    existing.name
                ))
            })?;
            let value = self.generate_value(tx, actor, &parameters)?;
            let version = NewVersion {
                name: &existing.name,
                value,
                parameters: Some(parameters),
                is_new: false,
                additional_permissions: &[],
            };
            self.write_version(tx, audit, actor, version)
        })
    }

    /// Remove every version of `name` together with its ACL.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown names, `Unauthorized` without DELETE.
    pub fn delete(&self, actor: &Actor, name: &str) -> Result<(), ServiceError> {
        let name = validate_name(name)?;
        self.in_transaction(actor, |tx, audit| {
            let existing = tx.find_most_recent(&name)?.ok_or_else(|| not_found(&name))?;
            permission::authorize(tx, &existing.name, actor, PermissionOperation::Delete)?;
            let removed = tx.delete_by_name(&existing.name)?;
            tx.delete_permissions(&existing.name)?;
            audit.credential_delete(&existing.name);
            info!(name = %existing.name, actor = %actor, versions = removed, "credential deleted");
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // ACL operations
    // -----------------------------------------------------------------------

    /// The ACL of `name`.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown names, `Unauthorized` without READ_ACL.
    pub fn permissions(&self, actor: &Actor, name: &str) -> Result<PermissionsView, ServiceError> {
        let name = validate_name(name)?;
        self.in_transaction(actor, |tx, audit| {
            let existing = tx.find_most_recent(&name)?.ok_or_else(|| not_found(&name))?;
            permission::authorize(tx, &existing.name, actor, PermissionOperation::ReadAcl)?;
            audit.acl_access(&existing.name);
            permission::view(tx, &existing.name)
        })
    }

    /// Merge the given operations into other actors' entries.
    ///
    /// # Errors
    ///
    /// `ValidationFailed` for empty operation lists or an entry naming the
    /// caller, `NotFound` for unknown names, `Unauthorized` without WRITE_ACL.
    pub fn add_permissions(
        &self,
        actor: &Actor,
        request: &PermissionsRequest,
    ) -> Result<PermissionsView, ServiceError> {
        let name = validate_name(&request.credential_name)?;
        permission::validate_entries(actor, &request.permissions)?;
        self.in_transaction(actor, |tx, audit| {
            let existing = tx.find_most_recent(&name)?.ok_or_else(|| not_found(&name))?;
            permission::authorize(tx, &existing.name, actor, PermissionOperation::WriteAcl)?;
            permission::grant_entries(tx, audit, &existing.name, &request.permissions)?;
            permission::view(tx, &existing.name)
        })
    }

    /// `target`'s entry on `name`.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown names or when `target` has no entry,
    /// `Unauthorized` without READ_ACL.
    pub fn permission(
        &self,
        actor: &Actor,
        name: &str,
        target: &Actor,
    ) -> Result<PermissionEntry, ServiceError> {
        let name = validate_name(name)?;
        self.in_transaction(actor, |tx, audit| {
            let existing = tx.find_most_recent(&name)?.ok_or_else(|| not_found(&name))?;
            permission::authorize(tx, &existing.name, actor, PermissionOperation::ReadAcl)?;
            audit.acl_access(&existing.name);
            permission::entry(tx, &existing.name, target)
        })
    }

    /// Replace `target`'s entry on `name` with exactly `operations`.
    ///
    /// # Errors
    ///
    /// `ValidationFailed` for an empty operation list or when `target` is the
    /// caller, `NotFound` for unknown names, `Unauthorized` without WRITE_ACL.
    pub fn set_permissions(
        &self,
        actor: &Actor,
        name: &str,
        target: &Actor,
        operations: &[PermissionOperation],
    ) -> Result<PermissionEntry, ServiceError> {
        let name = validate_name(name)?;
        let requested = PermissionEntry {
            actor: target.clone(),
            operations: operations.to_vec(),
        };
        permission::validate_entries(actor, std::slice::from_ref(&requested))?;
        self.in_transaction(actor, |tx, audit| {
            let existing = tx.find_most_recent(&name)?.ok_or_else(|| not_found(&name))?;
            permission::authorize(tx, &existing.name, actor, PermissionOperation::WriteAcl)?;
            permission::replace(tx, audit, &existing.name, target, operations)?;
            permission::entry(tx, &existing.name, target)
        })
    }

    /// Remove `target`'s entry on `name`.
    ///
    /// # Errors
    ///
    /// `ValidationFailed` when `target` is the caller, `NotFound` for unknown
    /// names or entries, `Unauthorized` without WRITE_ACL.
    pub fn delete_permissions(
        &self,
        actor: &Actor,
        name: &str,
        target: &Actor,
    ) -> Result<(), ServiceError> {
        let name = validate_name(name)?;
        if target == actor {
            return Err(ServiceError::ValidationFailed(
                "an actor cannot modify their own permissions".into(),
            ));
        }
        self.in_transaction(actor, |tx, audit| {
            let existing = tx.find_most_recent(&name)?.ok_or_else(|| not_found(&name))?;
            permission::authorize(tx, &existing.name, actor, PermissionOperation::WriteAcl)?;
            permission::revoke(tx, audit, &existing.name, target)
        })
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Re-seal every version not sealed under the active key. Returns how
    /// many versions were re-sealed.
    ///
    /// # Errors
    ///
    /// `EncryptionUnavailable` without an active key or when a version's key
    /// has left the ring.
    pub fn rotate_encryption_keys(&self, actor: &Actor) -> Result<usize, ServiceError> {
        let active = self.encryptor.active_key_id()?;
        let rotated = self.in_transaction(actor, |tx, _audit| {
            let stale = tx.find_sealed_with_other_key(&active)?;
            for mut version in stale.iter().cloned() {
                version.rotate(self.encryptor.as_ref())?;
                tx.update_sealed(&version)?;
            }
            Ok(stale.len())
        })?;
        info!(actor = %actor, key_id = %active, rotated, "encryption keys rotated");
        Ok(rotated)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Run `work` in a fresh transaction, appending its audit record and
    /// committing. A commit conflict reruns `work` from scratch.
    fn in_transaction<T>(
        &self,
        actor: &Actor,
        mut work: impl FnMut(&mut dyn Transaction, &mut AuditRecorder) -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        let mut attempt = 0;
        loop {
            let mut tx = self.datastore.begin();
            let mut audit = AuditRecorder::new();
            let result = work(&mut *tx, &mut audit)?;
            if !audit.is_empty() {
                tx.append(audit.into_record(Uuid::new_v4(), actor.clone(), self.clock.now()))?;
            }
            match tx.commit() {
                Ok(()) => return Ok(result),
                Err(StoreError::Conflict(name)) if attempt < self.max_conflict_retries => {
                    attempt += 1;
                    debug!(name = %name, attempt, "commit conflict, retrying");
                }
                Err(StoreError::Conflict(name)) => {
                    warn!(name = %name, attempts = attempt + 1, "commit conflict, giving up");
                    return Err(ServiceError::ConflictRetryExhausted(format!(
                        "{name} kept changing after {} attempts",
                        attempt + 1
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Checks shared by generate and set on a name that already exists.
    fn check_existing(
        &self,
        tx: &mut dyn Transaction,
        existing: &CredentialVersion,
        requested: CredentialType,
        actor: &Actor,
        additional_permissions: &[PermissionEntry],
    ) -> Result<(), ServiceError> {
        if existing.credential_type() != requested {
            return Err(ServiceError::ValidationFailed(format!(
                "{} is a {} credential and cannot be replaced by a {requested}",
                existing.name,
                existing.credential_type()
            )));
        }
        permission::authorize(tx, &existing.name, actor, PermissionOperation::Write)?;
        if !additional_permissions.is_empty() {
            permission::authorize(tx, &existing.name, actor, PermissionOperation::WriteAcl)?;
        }
        Ok(())
    }

    fn generate_value(
        &self,
        tx: &mut dyn Transaction,
        actor: &Actor,
        parameters: &GenerationParameters,
    ) -> Result<CredentialValue, ServiceError> {
        let mut ctx = GenerationContext::new(actor.clone(), self.clock.now());
        if let GenerationParameters::Certificate(p) = parameters {
            if let Some(ca) = &p.ca {
                ctx.ca = Some(self.signing_authority(tx, actor, ca)?);
            }
        }
        Ok(self.generators.generate(parameters, &ctx)?)
    }

    /// Resolve a named signing CA the actor may read. Absence and denial
    /// look the same to the caller.
    fn signing_authority(
        &self,
        tx: &mut dyn Transaction,
        actor: &Actor,
        ca_name: &str,
    ) -> Result<SigningAuthority, ServiceError> {
        let missing = || ServiceError::GenerationFailed(format!("signing CA {ca_name} not found"));
        let Some(version) = tx.find_most_recent(ca_name)? else {
            return Err(missing());
        };
        if !permission::is_allowed(tx, &version.name, actor, PermissionOperation::Read)? {
            warn!(name = %version.name, actor = %actor, "signing CA not readable by actor");
            return Err(missing());
        }
        match version.value(self.encryptor.as_ref())? {
            CredentialValue::Certificate(c) => Ok(SigningAuthority {
                name: version.name.clone(),
                certificate: c.certificate,
                private_key: c.private_key,
            }),
            _ => Err(missing()),
        }
    }

    /// Seal and save a new version, then apply creator and additional grants.
    fn write_version(
        &self,
        tx: &mut dyn Transaction,
        audit: &mut AuditRecorder,
        actor: &Actor,
        new: NewVersion<'_>,
    ) -> Result<CredentialView, ServiceError> {
        let NewVersion {
            name,
            value,
            parameters,
            is_new,
            additional_permissions,
        } = new;
        let version = CredentialVersion::new(
            name,
            &value,
            parameters,
            self.clock.now(),
            self.encryptor.as_ref(),
        )?;
        let view = CredentialView {
            id: version.id,
            name: version.name.clone(),
            credential_type: version.credential_type(),
            value,
            version_created_at: version.created_at,
        };
        info!(
            name = %name,
            actor = %actor,
            credential_type = %view.credential_type,
            version_id = %view.id,
            "credential version written"
        );
        tx.save(version)?;
        audit.credential_update(name);
        if is_new {
            permission::grant_creator(tx, audit, name, actor)?;
        }
        permission::grant_entries(tx, audit, name, additional_permissions)?;
        Ok(view)
    }
}

/// A version about to be written under `name`.
struct NewVersion<'a> {
    name: &'a str,
    value: CredentialValue,
    /// `None` for set values.
    parameters: Option<GenerationParameters>,
    /// Grants the writer every operation when the name did not exist.
    is_new: bool,
    additional_permissions: &'a [PermissionEntry],
}

fn not_found(name: &str) -> ServiceError {
    ServiceError::NotFound(format!("credential {name} does not exist"))
}

/// Apply the username carried in a user generate request's `value`.
fn username_parameter(
    parameters: GenerationParameters,
    username: &str,
) -> Result<GenerationParameters, ServiceError> {
    match parameters {
        GenerationParameters::User(mut p) => {
            if username.trim().is_empty() {
                return Err(ServiceError::ValidationFailed("username must not be empty".into()));
            }
            p.username.get_or_insert_with(|| username.to_owned());
            Ok(GenerationParameters::User(p))
        }
        other => Err(ServiceError::ValidationFailed(format!(
            "a username cannot be given for {} credentials",
            other.credential_type()
        ))),
    }
}
