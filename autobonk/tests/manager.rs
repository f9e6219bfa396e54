// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

use autobonk::log::Storage;
use autobonk::test_utils::{Room, messages, send_message, setup_logging, wait_for};
use autobonk::{
    ContextConfig, CreateContextOptions, IndexConfig, InviteOptions, JoinContextOptions,
    Manager, ManagerConfig, MemoryIndex, Swarm,
};

fn config() -> ContextConfig {
    ContextConfig {
        pairing_timeout: Duration::from_secs(5),
        announce_interval: Duration::from_millis(20),
        ..Default::default()
    }
}

#[tokio::test]
async fn create_list_get_and_remove() {
    setup_logging();

    let manager: Manager<MemoryIndex, Room> =
        Manager::new(MemoryIndex::new(), Swarm::new(), Room, config());

    let first = manager
        .create_context(CreateContextOptions {
            name: Some("Notes".into()),
        })
        .await
        .unwrap();
    assert!(first.writable());
    assert!(first.context_init().unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(2)).await;
    let second = manager
        .create_context(CreateContextOptions::default())
        .await
        .unwrap();

    let records = manager.list_contexts().await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].key, second.key().to_hex());
    assert_eq!(records[1].name, "Notes");
    assert!(records.iter().all(|record| record.is_creator));
    assert_eq!(
        records[1].namespace,
        format!("ctx-{}", &first.key().to_hex()[..16])
    );
    assert!(records[0].name.starts_with("Context "));

    let key = first.key().to_hex();
    let loaded = manager.get_context(&key).await.unwrap().unwrap();
    assert_eq!(loaded.key(), first.key());
    assert!(manager.get_context("unknown").await.unwrap().is_none());

    assert!(manager.remove_context(&key).await.unwrap());
    assert!(!manager.remove_context(&key).await.unwrap());
    assert!(manager.get_context(&key).await.unwrap().is_none());
    assert_eq!(manager.list_contexts().await.unwrap().len(), 1);

    manager.close().await;
}

#[tokio::test]
async fn contexts_survive_restart() {
    setup_logging();

    let storage = Storage::new();
    let index = MemoryIndex::new();
    let swarm = Swarm::new();

    let manager: Manager<MemoryIndex, Room> =
        Manager::with_storage(storage.clone(), index.clone(), swarm.clone(), Room, config());
    let context = manager
        .create_context(CreateContextOptions::default())
        .await
        .unwrap();
    context.define_role("editor", ["post:create"], 1).await.unwrap();
    send_message(&context, "persisted").await.unwrap();
    let key = context.key().to_hex();
    let digest = context.view().digest();
    manager.close().await;

    let restarted: Manager<MemoryIndex, Room> =
        Manager::with_storage(storage, index, swarm, Room, config());
    let context = restarted.get_context(&key).await.unwrap().unwrap();
    assert!(context.writable());
    assert_eq!(context.view().digest(), digest);
    assert!(context.get_role("editor").unwrap().is_some());

    let record = restarted
        .list_contexts()
        .await
        .unwrap()
        .into_iter()
        .find(|record| record.key == key)
        .unwrap();
    assert!(record.last_used.is_some());

    restarted.close().await;
}

#[tokio::test]
async fn join_through_invite() {
    setup_logging();

    let swarm = Swarm::new();
    let alice: Manager<MemoryIndex, Room> =
        Manager::new(MemoryIndex::new(), swarm.clone(), Room, config());
    let bob: Manager<MemoryIndex, Room> =
        Manager::new(MemoryIndex::new(), swarm.clone(), Room, config());

    let context = alice
        .create_context(CreateContextOptions::default())
        .await
        .unwrap();
    context.define_role("member", ["post:create"], 1).await.unwrap();
    let invite = context
        .create_invite(InviteOptions {
            roles: vec!["member".into()],
            expires: None,
        })
        .await
        .unwrap()
        .to_string();

    let joined = bob
        .join_context(
            &invite,
            JoinContextOptions {
                name: Some("Shared".into()),
            },
        )
        .await
        .unwrap();
    assert!(joined.writable());
    assert_eq!(joined.key(), context.key());
    assert_eq!(
        joined.get_roles(&joined.local_key()).unwrap(),
        vec!["member".to_string()]
    );

    let records = bob.list_contexts().await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(!records[0].is_creator);
    assert_eq!(records[0].name, "Shared");
    assert_eq!(records[0].encryption_key, context.encryption_key().to_hex());

    send_message(&joined, "hello from bob").await.unwrap();
    assert!(wait_for(Duration::from_secs(5), || messages(&context).len() == 1).await);

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn manager_from_config() {
    setup_logging();

    let config = ManagerConfig {
        context: config(),
        index: IndexConfig::Memory,
    };
    let manager = Manager::from_config(config, Swarm::new(), Room).await.unwrap();
    let context = manager
        .create_context(CreateContextOptions::default())
        .await
        .unwrap();
    assert_eq!(manager.list_contexts().await.unwrap()[0].key, context.key().to_hex());
    manager.close().await;
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn sqlite_index_keeps_records() {
    setup_logging();

    let url = format!(
        "sqlite://dbmem{}?mode=memory&cache=shared",
        rand::random::<u32>()
    );
    let config = ManagerConfig {
        context: config(),
        index: IndexConfig::Sqlite {
            url,
            max_connections: Some(1),
        },
    };

    let manager = Manager::from_config(config, Swarm::new(), Room).await.unwrap();
    let context = manager
        .create_context(CreateContextOptions {
            name: Some("Persisted".into()),
        })
        .await
        .unwrap();

    let records = manager.list_contexts().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key, context.key().to_hex());
    assert_eq!(records[0].name, "Persisted");

    manager.close().await;
}
