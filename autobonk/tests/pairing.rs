// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

use assert_matches::assert_matches;
use autobonk::log::Storage;
use autobonk::test_utils::{Room, messages, send_message, setup_logging, wait_for};
use autobonk::{
    Context, ContextConfig, ContextError, ContextOptions, DenyStatus, InviteOptions, InviteToken,
    ListInvitesOptions, OWNER_ROLE, PairingError, Swarm, USER_INVITE,
};

fn config() -> ContextConfig {
    ContextConfig {
        pairing_timeout: Duration::from_secs(5),
        announce_interval: Duration::from_millis(20),
        ..Default::default()
    }
}

async fn owner(storage: &Storage, swarm: &Swarm) -> Context<Room> {
    Context::open(
        storage,
        swarm,
        Room,
        ContextOptions {
            config: config(),
            ..ContextOptions::new("alice")
        },
    )
    .await
    .unwrap()
}

async fn redeem(
    storage: &Storage,
    swarm: &Swarm,
    invite: &str,
    namespace: &str,
) -> Result<Context<Room>, ContextError> {
    let token: InviteToken = invite.parse().map_err(ContextError::from)?;
    Context::join(storage, swarm, Room, &token, namespace, config()).await
}

#[tokio::test]
async fn redeemed_invite_admits_writer_with_roles() {
    setup_logging();

    let storage = Storage::new();
    let swarm = Swarm::new();
    let alice = owner(&storage, &swarm).await;
    alice.define_role("editor", ["post:create"], 1).await.unwrap();

    let invite = alice
        .create_invite(InviteOptions {
            roles: vec!["editor".into()],
            expires: None,
        })
        .await
        .unwrap()
        .to_string();

    let bob = redeem(&storage, &swarm, &invite, "bob").await.unwrap();
    assert!(bob.writable());
    assert_eq!(bob.key(), alice.key());
    assert_eq!(bob.encryption_key(), alice.encryption_key());

    let bob_key = bob.local_key();
    assert!(
        alice
            .list_writers()
            .unwrap()
            .iter()
            .any(|writer| writer.key == bob_key)
    );
    assert!(
        wait_for(Duration::from_secs(5), || {
            bob.get_roles(&bob_key).unwrap() == vec!["editor".to_string()]
        })
        .await
    );
    assert_eq!(alice.get_roles(&bob_key).unwrap(), vec!["editor".to_string()]);
    assert!(bob.has_permission(&bob_key, "post:create").unwrap());

    send_message(&bob, "hi alice").await.unwrap();
    assert!(wait_for(Duration::from_secs(5), || messages(&alice).len() == 1).await);
}

#[tokio::test]
async fn invite_without_roles_only_admits_writer() {
    setup_logging();

    let storage = Storage::new();
    let swarm = Swarm::new();
    let alice = owner(&storage, &swarm).await;

    let invite = alice
        .create_invite(InviteOptions::default())
        .await
        .unwrap()
        .to_string();
    let bob = redeem(&storage, &swarm, &invite, "bob").await.unwrap();

    assert!(bob.writable());
    assert!(alice.acl_entry(&bob.local_key()).unwrap().is_none());
    assert!(!bob.has_permission(&bob.local_key(), USER_INVITE).unwrap());
}

#[tokio::test]
async fn invite_roles_are_granted_once() {
    setup_logging();

    let storage = Storage::new();
    let swarm = Swarm::new();
    let alice = owner(&storage, &swarm).await;
    alice.define_role("editor", ["post:create"], 1).await.unwrap();

    let token = alice
        .create_invite(InviteOptions {
            roles: vec!["editor".into()],
            expires: None,
        })
        .await
        .unwrap();
    let invite = token.to_string();

    let bob = redeem(&storage, &swarm, &invite, "bob").await.unwrap();
    assert!(
        wait_for(Duration::from_secs(5), || {
            bob.get_roles(&bob.local_key()).unwrap().len() == 1
        })
        .await
    );

    let invites = alice.list_invites(ListInvitesOptions::default()).unwrap();
    assert_eq!(invites[0].id, token.id());
    assert_eq!(invites[0].redeemed_by, Some(bob.local_key()));

    assert_matches!(
        redeem(&storage, &swarm, &invite, "carol").await,
        Err(ContextError::Pairing(PairingError::Denied(DenyStatus::Redeemed)))
    );
    assert_eq!(alice.list_writers().unwrap().len(), 2);
}

#[tokio::test]
async fn inviting_with_roles_requires_role_assignment() {
    setup_logging();

    let storage = Storage::new();
    let swarm = Swarm::new();
    let alice = owner(&storage, &swarm).await;
    alice.define_role("inviter", [USER_INVITE], 1).await.unwrap();

    let invite = alice
        .create_invite(InviteOptions::default())
        .await
        .unwrap()
        .to_string();
    let bob = redeem(&storage, &swarm, &invite, "bob").await.unwrap();
    alice.grant_roles(bob.local_key(), ["inviter"], 1).await.unwrap();
    assert!(
        wait_for(Duration::from_secs(5), || {
            bob.has_permission(&bob.local_key(), USER_INVITE).unwrap()
        })
        .await
    );

    assert_matches!(
        bob.create_invite(InviteOptions {
            roles: vec![OWNER_ROLE.into()],
            expires: None,
        })
        .await,
        Err(ContextError::Permission(_))
    );
    bob.create_invite(InviteOptions::default()).await.unwrap();
}

#[tokio::test]
async fn revoking_twice_keeps_first_timestamp() {
    setup_logging();

    let alice = owner(&Storage::new(), &Swarm::new()).await;
    let token = alice.create_invite(InviteOptions::default()).await.unwrap();

    assert!(alice.revoke_invite(&token.id()).await.unwrap());
    let revoked_at = alice
        .list_invites(ListInvitesOptions {
            include_revoked: true,
        })
        .unwrap()[0]
        .revoked_at;
    assert!(revoked_at.is_some());

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(!alice.revoke_invite(&token.id()).await.unwrap());

    let invites = alice
        .list_invites(ListInvitesOptions {
            include_revoked: true,
        })
        .unwrap();
    assert_eq!(invites[0].revoked_at, revoked_at);
}

#[tokio::test]
async fn revoked_invite_is_denied() {
    setup_logging();

    let storage = Storage::new();
    let swarm = Swarm::new();
    let alice = owner(&storage, &swarm).await;

    let token = alice.create_invite(InviteOptions::default()).await.unwrap();
    alice.revoke_invite(&token.id()).await.unwrap();

    let result = redeem(&storage, &swarm, &token.to_string(), "bob").await;
    assert_matches!(
        result,
        Err(ContextError::Pairing(PairingError::Denied(DenyStatus::Revoked)))
    );
    assert_eq!(alice.list_writers().unwrap().len(), 1);
}

#[tokio::test]
async fn expired_invite_is_denied() {
    setup_logging();

    let storage = Storage::new();
    let swarm = Swarm::new();
    let alice = owner(&storage, &swarm).await;

    let token = alice
        .create_invite(InviteOptions {
            roles: Vec::new(),
            expires: Some(autobonk_core::now_ms() - 1),
        })
        .await
        .unwrap();

    let result = redeem(&storage, &swarm, &token.to_string(), "bob").await;
    assert_matches!(
        result,
        Err(ContextError::Pairing(PairingError::Denied(DenyStatus::Expired)))
    );
}

#[tokio::test]
async fn member_without_invite_permission_denies() {
    setup_logging();

    let storage = Storage::new();
    let swarm = Swarm::new();
    let alice = owner(&storage, &swarm).await;
    let token = alice.create_invite(InviteOptions::default()).await.unwrap();

    // Only a replica of the owner who gave up all of their roles is reachable.
    alice.denounce_role("owner", 2).await.unwrap();

    let result = redeem(&storage, &swarm, &token.to_string(), "bob").await;
    assert_matches!(
        result,
        Err(ContextError::Pairing(PairingError::Denied(
            DenyStatus::Unauthorized
        )))
    );
}

#[tokio::test]
async fn unknown_invite_times_out() {
    setup_logging();

    let storage = Storage::new();
    let swarm = Swarm::new();
    let alice = owner(&storage, &swarm).await;
    let token = alice.create_invite(InviteOptions::default()).await.unwrap();

    // Another context on another network never learns about the invite.
    let other = Swarm::new();
    let config = ContextConfig {
        pairing_timeout: Duration::from_millis(100),
        announce_interval: Duration::from_millis(20),
        ..Default::default()
    };
    let result = Context::join(&storage, &other, Room, &token, "bob", config).await;
    assert_matches!(result, Err(ContextError::Pairing(PairingError::Timeout)));
}

#[tokio::test]
async fn invite_creation_requires_permission() {
    setup_logging();

    let storage = Storage::new();
    let swarm = Swarm::new();
    let alice = owner(&storage, &swarm).await;
    let invite = alice
        .create_invite(InviteOptions::default())
        .await
        .unwrap()
        .to_string();
    let bob = redeem(&storage, &swarm, &invite, "bob").await.unwrap();

    assert_matches!(
        bob.create_invite(InviteOptions::default()).await,
        Err(ContextError::Permission(_))
    );
    assert_matches!(
        bob.list_invites(ListInvitesOptions::default()),
        Err(ContextError::Permission(_))
    );
}
