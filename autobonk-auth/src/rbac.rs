// SPDX-License-Identifier: MIT OR Apache-2.0

use autobonk_core::{AclEntry, ContextInit, PublicKey, RoleDef};
use autobonk_store::{AclEntries, ContextInits, ReadView, RoleDefs, ViewError};
use tracing::debug;

use crate::error::{PermissionError, RbacError};

/// Evaluates roles and permissions against a view.
///
/// Works on the staged state while applying operations as well as on the flushed state observed
/// by readers.
#[derive(Debug)]
pub struct Rbac<'a, V> {
    view: &'a V,
}

impl<'a, V> Rbac<'a, V>
where
    V: ReadView,
{
    pub fn new(view: &'a V) -> Self {
        Self { view }
    }

    /// Returns `true` once the context's bootstrap record was applied.
    pub fn is_initialized(&self) -> Result<bool, ViewError> {
        Ok(self.context_init()?.is_some())
    }

    pub fn context_init(&self) -> Result<Option<ContextInit>, ViewError> {
        self.view.record::<ContextInits>(&())
    }

    pub fn role(&self, name: &str) -> Result<Option<RoleDef>, ViewError> {
        self.view.record::<RoleDefs>(&name.to_string())
    }

    /// All role definitions, ordered by name.
    pub fn roles(&self) -> Result<Vec<RoleDef>, ViewError> {
        self.view.records::<RoleDefs>()
    }

    pub fn acl_entry(&self, subject: &PublicKey) -> Result<Option<AclEntry>, ViewError> {
        self.view.record::<AclEntries>(subject)
    }

    /// Roles held by a subject, empty if it never held any.
    pub fn roles_of(&self, subject: &PublicKey) -> Result<Vec<String>, ViewError> {
        Ok(self
            .acl_entry(subject)?
            .map(|entry| entry.roles)
            .unwrap_or_default())
    }

    /// Returns `true` if any of the subject's roles grants the permission.
    pub fn has_permission(&self, subject: &PublicKey, permission: &str) -> Result<bool, ViewError> {
        for name in self.roles_of(subject)? {
            let granted = self
                .role(&name)?
                .is_some_and(|role| role.grants(permission));
            if granted {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn require_permission(
        &self,
        subject: &PublicKey,
        permission: &str,
    ) -> Result<(), RbacError> {
        if self.has_permission(subject, permission)? {
            return Ok(());
        }

        debug!(%subject, permission, "permission denied");
        Err(PermissionError {
            permission: permission.to_string(),
            subject: *subject,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use assert_matches::assert_matches;
    use autobonk_core::{ContextInit, Ordinal, PrivateKey};
    use autobonk_store::{AclEntries, ContextInits, MemoryView, RoleDefs};

    use crate::error::{PermissionError, RbacError};
    use crate::permission::{OWNER_ROLE, ROLE_CREATE, USER_INVITE};
    use crate::records::{next_acl_entry, next_role_def, owner_acl_entry, owner_role_def};

    use super::Rbac;

    #[test]
    fn permissions_through_roles() {
        let owner = PrivateKey::new().public_key();
        let user = PrivateKey::new().public_key();
        let mut view = MemoryView::new();

        assert!(!Rbac::new(&view).is_initialized().unwrap());

        view.insert::<ContextInits>(&ContextInit {
            creator_key: owner,
            index: 0,
            timestamp: 0,
        })
        .unwrap();
        view.insert::<RoleDefs>(&owner_role_def(Ordinal::new(0, 1)))
            .unwrap();
        view.insert::<AclEntries>(&owner_acl_entry(None, owner, Ordinal::new(0, 2)))
            .unwrap();

        let editor = next_role_def(
            None,
            "editor",
            BTreeSet::from(["post:create".to_string()]),
            1,
            Ordinal::new(1, 0),
        )
        .unwrap();
        view.insert::<RoleDefs>(&editor).unwrap();

        let entry = next_acl_entry(
            None,
            user,
            &["editor".to_string()],
            1,
            Ordinal::new(2, 0),
            |role| Rbac::new(&view).role(role).unwrap().is_some(),
        )
        .unwrap();
        view.insert::<AclEntries>(&entry).unwrap();

        let rbac = Rbac::new(&view);
        assert!(rbac.is_initialized().unwrap());
        assert!(rbac.has_permission(&owner, USER_INVITE).unwrap());
        assert!(rbac.has_permission(&user, "post:create").unwrap());
        assert!(!rbac.has_permission(&user, ROLE_CREATE).unwrap());
        assert_eq!(rbac.roles_of(&owner).unwrap(), vec![OWNER_ROLE.to_string()]);
        assert_eq!(rbac.roles().unwrap().len(), 2);

        assert_matches!(
            rbac.require_permission(&user, ROLE_CREATE),
            Err(RbacError::Permission(PermissionError { subject, .. })) if subject == user
        );
    }

    #[test]
    fn readers_observe_flushed_state() {
        let owner = PrivateKey::new().public_key();
        let mut view = MemoryView::new();
        let reader = view.reader();

        view.insert::<RoleDefs>(&owner_role_def(Ordinal::default()))
            .unwrap();
        view.insert::<AclEntries>(&owner_acl_entry(None, owner, Ordinal::default()))
            .unwrap();

        assert!(Rbac::new(&view).has_permission(&owner, USER_INVITE).unwrap());
        assert!(!Rbac::new(&reader).has_permission(&owner, USER_INVITE).unwrap());

        view.flush();
        assert!(Rbac::new(&reader).has_permission(&owner, USER_INVITE).unwrap());
    }

    #[test]
    fn unknown_subjects_hold_nothing() {
        let view = MemoryView::new();
        let stranger = PrivateKey::new().public_key();
        let rbac = Rbac::new(&view);

        assert!(rbac.roles_of(&stranger).unwrap().is_empty());
        assert!(!rbac.has_permission(&stranger, USER_INVITE).unwrap());
    }
}
