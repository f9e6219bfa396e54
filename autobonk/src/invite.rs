// SPDX-License-Identifier: MIT OR Apache-2.0

//! Creating, listing and revoking invites of a context.
use autobonk_auth::{ROLE_ASSIGN, USER_INVITE};
use autobonk_core::{CoreOperation, Invite, InviteId, RevokeInvite, now_ms};
use autobonk_store::Invites;

use crate::apply::Application;
use crate::context::{Context, ContextError};
use crate::pairing::{InviteToken, create_invite};

#[derive(Clone, Debug, Default)]
pub struct InviteOptions {
    /// Roles granted to the candidate redeeming the invite.
    pub roles: Vec<String>,

    /// Expiry as UNIX timestamp in milliseconds, defaults to the configured invite expiry.
    pub expires: Option<u64>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ListInvitesOptions {
    pub include_revoked: bool,
}

impl<A: Application> Context<A> {
    /// Create an invite, requires `user:invite` and, for invites carrying roles, `role:assign`.
    ///
    /// The returned token is shared with the candidate, its string form is what gets handed out.
    pub async fn create_invite(&self, options: InviteOptions) -> Result<InviteToken, ContextError> {
        self.require_local_permission(USER_INVITE)?;
        if !options.roles.is_empty() {
            self.require_local_permission(ROLE_ASSIGN)?;
        }

        let now = now_ms();
        let expires = options.expires.unwrap_or_else(|| {
            let expiry = u64::try_from(self.config().invite_expiry.as_millis()).unwrap_or(u64::MAX);
            now.saturating_add(expiry)
        });

        let created = create_invite(self.discovery_key(), expires)?;
        let token = InviteToken::from_bytes(&created.invite)?;

        self.append(CoreOperation::AddInvite(Invite {
            id: created.id,
            invite: created.invite,
            public_key: created.public_key,
            expires: created.expires,
            roles: options.roles,
            created_by: self.local_key(),
            created_at: now,
            revoked_at: None,
            redeemed_by: None,
        }))
        .await?;

        Ok(token)
    }

    /// Invites of the context, requires `user:invite`.
    pub fn list_invites(&self, options: ListInvitesOptions) -> Result<Vec<Invite>, ContextError> {
        self.require_local_permission(USER_INVITE)?;

        let invites = self.view().find::<Invites>()?;
        Ok(invites
            .into_iter()
            .filter(|invite| options.include_revoked || !invite.is_revoked())
            .collect())
    }

    /// Revoke an invite, requires `user:invite`.
    ///
    /// Returns `false` if the invite is unknown or was already revoked.
    pub async fn revoke_invite(&self, id: &InviteId) -> Result<bool, ContextError> {
        self.require_local_permission(USER_INVITE)?;

        let Some(invite) = self.find_invite(id)? else {
            return Ok(false);
        };

        if invite.is_revoked() {
            return Ok(false);
        }

        self.append(CoreOperation::RevokeInvite(RevokeInvite {
            id: *id,
            revoked_at: now_ms(),
        }))
        .await?;

        Ok(true)
    }
}
