// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashSet;

use autobonk_auth::USER_INVITE;
use autobonk_core::{InviteId, PublicKey, now_ms};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::apply::Application;
use crate::context::{Context, ContextError, WeakContext};
use crate::pairing::{
    ConfirmPayload, DenyStatus, InviteToken, PairingReply, PairingRequest, SealedConfirm,
};
use crate::swarm::PairingSession;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemberState {
    /// Waiting for pairing requests.
    Listening,

    /// Checking a request against the recorded invite.
    Evaluating(InviteId),

    /// Candidate was admitted.
    Confirmed(PublicKey),

    /// Candidate was refused.
    Denied(DenyStatus),
}

/// Admitting side of the pairing protocol, run by every peer of a context.
pub struct Member<A: Application> {
    context: WeakContext<A>,
    admitted: HashSet<(InviteId, PublicKey)>,
    state: MemberState,
}

impl<A: Application> Member<A> {
    pub(crate) fn new(context: WeakContext<A>) -> Self {
        Self {
            context,
            admitted: HashSet::new(),
            state: MemberState::Listening,
        }
    }

    pub fn state(&self) -> &MemberState {
        &self.state
    }

    /// Answer pairing sessions until the context is gone or the swarm hung up.
    pub(crate) async fn run(mut self, mut sessions: mpsc::Receiver<PairingSession>) {
        while let Some(session) = sessions.recv().await {
            let Some(context) = self.context.upgrade() else {
                break;
            };

            match self.evaluate(&context, &session.request).await {
                Ok(Some(reply)) => {
                    if session.reply.try_send(reply).is_err() {
                        trace!("candidate stopped listening for replies");
                    }
                }
                Ok(None) => (),
                Err(err) => {
                    warn!(
                        invite_id = %session.request.invite_id,
                        %err,
                        "could not admit candidate"
                    );
                    self.state = MemberState::Listening;
                }
            }
        }
    }

    /// Decide about a pairing request.
    ///
    /// Returns `None` if the request is not meant for this context or its proof is invalid,
    /// those requests are dropped without an answer. Admitting a candidate appends an
    /// `add-writer` operation and, if the invite carries roles, a `grant-roles` operation
    /// referencing the invite. Repeated requests of an admitted candidate are confirmed again
    /// without appending anything, invites whose roles went to another candidate are denied.
    pub(crate) async fn evaluate(
        &mut self,
        context: &Context<A>,
        request: &PairingRequest,
    ) -> Result<Option<PairingReply>, ContextError> {
        let Some(invite) = context.find_invite(&request.invite_id)? else {
            trace!(invite_id = %request.invite_id, "ignore request for unknown invite");
            return Ok(None);
        };

        self.state = MemberState::Evaluating(invite.id);

        if request.open(&invite.public_key).is_err() {
            debug!(invite_id = %invite.id, "drop request with invalid proof");
            self.state = MemberState::Listening;
            return Ok(None);
        }

        let token = InviteToken::from_bytes(&invite.invite)?;

        let denied = if invite.is_revoked() {
            Some(DenyStatus::Revoked)
        } else if invite.is_expired(now_ms()) {
            Some(DenyStatus::Expired)
        } else if invite
            .redeemed_by
            .is_some_and(|redeemer| redeemer != request.user_data)
        {
            Some(DenyStatus::Redeemed)
        } else if !context.has_permission(&context.local_key(), USER_INVITE)? {
            Some(DenyStatus::Unauthorized)
        } else {
            None
        };

        if let Some(status) = denied {
            debug!(invite_id = %invite.id, %status, "deny candidate");
            self.state = MemberState::Denied(status);
            return Ok(Some(PairingReply::Deny(status)));
        }

        let candidate = request.user_data;
        let redeemed = invite.redeemed_by == Some(candidate);
        if !redeemed && !self.admitted.contains(&(invite.id, candidate)) {
            context.add_writer(candidate, true).await?;
            if !invite.roles.is_empty() {
                context.grant_invited_roles(candidate, &invite).await?;
            }
            self.admitted.insert((invite.id, candidate));
            debug!(invite_id = %invite.id, %candidate, roles = ?invite.roles, "admit candidate");
        }

        let sealed = SealedConfirm::seal(
            &token,
            &ConfirmPayload {
                key: context.key(),
                encryption_key: context.encryption_key(),
            },
        )?;

        self.state = MemberState::Confirmed(candidate);
        Ok(Some(PairingReply::Confirm(sealed)))
    }
}
