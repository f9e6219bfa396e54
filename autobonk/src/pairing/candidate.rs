// SPDX-License-Identifier: MIT OR Apache-2.0

use autobonk_core::PublicKey;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, trace, warn};

use crate::config::ContextConfig;
use crate::pairing::{
    ConfirmPayload, DenyStatus, InviteToken, PairingError, PairingReply, PairingRequest,
};
use crate::swarm::Swarm;

/// Capacity of the channel members reply on.
const REPLY_CHANNEL_CAPACITY: usize = 16;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CandidateState {
    /// No request was sent yet.
    Connecting,

    /// Request was announced, waiting for a member to answer.
    AwaitingConfirm,

    /// A member admitted the candidate.
    Resolved(ConfirmPayload),

    /// A member refused to admit the candidate.
    Rejected(DenyStatus),
}

/// Joining side of the pairing protocol.
#[derive(Debug)]
pub struct Candidate {
    token: InviteToken,
    user_data: PublicKey,
    state: CandidateState,
}

impl Candidate {
    /// Candidate redeeming `token` for the writer key `user_data`.
    pub fn new(token: InviteToken, user_data: PublicKey) -> Self {
        Self {
            token,
            user_data,
            state: CandidateState::Connecting,
        }
    }

    pub fn state(&self) -> &CandidateState {
        &self.state
    }

    pub fn token(&self) -> &InviteToken {
        &self.token
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            CandidateState::Resolved(_) | CandidateState::Rejected(_)
        )
    }

    /// Request to announce to the members of the context.
    pub fn request(&mut self) -> Result<PairingRequest, PairingError> {
        if self.is_finished() {
            return Err(PairingError::Closed);
        }

        let request = PairingRequest::new(&self.token, self.user_data)?;
        self.state = CandidateState::AwaitingConfirm;
        Ok(request)
    }

    /// Process the answer of a member.
    ///
    /// Returns `None` if the answer was not addressed to this candidate and should be ignored.
    pub fn handle_reply(
        &mut self,
        reply: &PairingReply,
    ) -> Option<Result<ConfirmPayload, PairingError>> {
        if self.state != CandidateState::AwaitingConfirm {
            return None;
        }

        match reply {
            PairingReply::Confirm(sealed) => match sealed.open(&self.token) {
                Ok(payload) => {
                    self.state = CandidateState::Resolved(payload.clone());
                    Some(Ok(payload))
                }
                Err(err) => {
                    warn!(%err, "could not open pairing confirmation");
                    None
                }
            },
            PairingReply::Deny(status) => {
                self.state = CandidateState::Rejected(*status);
                Some(Err(PairingError::Denied(*status)))
            }
        }
    }
}

/// Announce the candidate's request until a member answers or the pairing timed out.
pub(crate) async fn pair(
    swarm: &Swarm,
    candidate: &mut Candidate,
    config: &ContextConfig,
) -> Result<ConfirmPayload, PairingError> {
    let deadline = Instant::now() + config.pairing_timeout;
    let topic = candidate.token().discovery_key;
    let request = candidate.request()?;
    let (reply_tx, mut reply_rx) = mpsc::channel(REPLY_CHANNEL_CAPACITY);

    debug!(%topic, invite_id = %request.invite_id, "start pairing");

    loop {
        let delivered = swarm.announce(topic, &request, &reply_tx);
        trace!(%topic, delivered, "announce pairing request");

        let next_announce = (Instant::now() + config.announce_interval).min(deadline);
        loop {
            match timeout_at(next_announce, reply_rx.recv()).await {
                Ok(Some(reply)) => {
                    if let Some(result) = candidate.handle_reply(&reply) {
                        return result;
                    }
                }
                // The candidate holds a sender itself.
                Ok(None) => return Err(PairingError::Closed),
                Err(_) => break,
            }
        }

        if Instant::now() >= deadline {
            debug!(%topic, "pairing timed out");
            return Err(PairingError::Timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use autobonk_core::{EncryptionKey, Hash, PrivateKey};
    use tokio::sync::mpsc;

    use crate::config::ContextConfig;
    use crate::log::LogStore;
    use crate::pairing::{
        ConfirmPayload, DenyStatus, InviteToken, PairingError, PairingReply, SealedConfirm,
        create_invite,
    };
    use crate::swarm::Swarm;

    use super::{Candidate, CandidateState, pair};

    fn token() -> InviteToken {
        let created = create_invite(Hash::new(b"context"), u64::MAX).unwrap();
        InviteToken::from_bytes(&created.invite).unwrap()
    }

    fn payload() -> ConfirmPayload {
        ConfirmPayload {
            key: PrivateKey::new().public_key(),
            encryption_key: EncryptionKey::random(),
        }
    }

    #[test]
    fn resolves_on_confirmation() {
        let token = token();
        let mut candidate = Candidate::new(token.clone(), PrivateKey::new().public_key());
        assert_eq!(candidate.state(), &CandidateState::Connecting);

        // Replies before the request was sent are ignored.
        let sealed = SealedConfirm::seal(&token, &payload()).unwrap();
        assert!(candidate.handle_reply(&PairingReply::Confirm(sealed.clone())).is_none());

        candidate.request().unwrap();
        assert_eq!(candidate.state(), &CandidateState::AwaitingConfirm);

        let result = candidate.handle_reply(&PairingReply::Confirm(sealed));
        assert_matches!(result, Some(Ok(_)));
        assert_matches!(candidate.state(), CandidateState::Resolved(_));
        assert_matches!(candidate.request(), Err(PairingError::Closed));
    }

    #[test]
    fn ignores_confirmation_for_other_invite() {
        let mut candidate = Candidate::new(token(), PrivateKey::new().public_key());
        candidate.request().unwrap();

        let sealed = SealedConfirm::seal(&token(), &payload()).unwrap();
        assert!(candidate.handle_reply(&PairingReply::Confirm(sealed)).is_none());
        assert_eq!(candidate.state(), &CandidateState::AwaitingConfirm);
    }

    #[test]
    fn rejected_on_denial() {
        let mut candidate = Candidate::new(token(), PrivateKey::new().public_key());
        candidate.request().unwrap();

        let result = candidate.handle_reply(&PairingReply::Deny(DenyStatus::Revoked));
        assert_matches!(
            result,
            Some(Err(PairingError::Denied(DenyStatus::Revoked)))
        );
        assert_eq!(
            candidate.state(),
            &CandidateState::Rejected(DenyStatus::Revoked)
        );
    }

    #[tokio::test]
    async fn times_out_without_members() {
        let swarm = Swarm::new();
        let mut candidate = Candidate::new(token(), PrivateKey::new().public_key());
        let config = ContextConfig {
            pairing_timeout: Duration::from_millis(50),
            announce_interval: Duration::from_millis(10),
            ..Default::default()
        };

        let result = pair(&swarm, &mut candidate, &config).await;
        assert_matches!(result, Err(PairingError::Timeout));
    }

    #[tokio::test]
    async fn receives_reply_of_member() {
        let swarm = Swarm::new();
        let token = token();
        let creator = PrivateKey::new();
        let log = LogStore::new(creator.public_key(), creator);
        let (pairing_tx, mut pairing_rx) = mpsc::channel(4);
        let _membership = swarm
            .join(token.discovery_key, log, pairing_tx)
            .unwrap();

        let expected = payload();
        let member_token = token.clone();
        let member_payload = expected.clone();
        tokio::spawn(async move {
            let session = pairing_rx.recv().await.unwrap();
            let sealed = SealedConfirm::seal(&member_token, &member_payload).unwrap();
            session
                .reply
                .send(PairingReply::Confirm(sealed))
                .await
                .unwrap();
        });

        let mut candidate = Candidate::new(token, PrivateKey::new().public_key());
        let confirm = pair(&swarm, &mut candidate, &ContextConfig::default())
            .await
            .unwrap();
        assert_eq!(confirm, expected);
    }
}
