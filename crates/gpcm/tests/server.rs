//! Integration tests for the login server: accept orchestration, login
//! promotion, admin operations and the shutdown sequence.
//!
//! Streams come from an in-memory transport so every scenario is
//! deterministic; the clock is paused where timeouts matter.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockFactory, MockStream, MockTransport, eventually, test_config};
use gpcm::prelude::*;
use tokio::task::JoinHandle;

type Server = LoginServer<MockTransport, MockFactory<MockStream>, Arc<MemorySessionStore>>;

// =========================================================================
// Helpers
// =========================================================================

struct Harness {
    server: Server,
    transport: MockTransport,
    factory: MockFactory<MockStream>,
    store: Arc<MemorySessionStore>,
    accept_loop: JoinHandle<Result<(), GpcmError>>,
}

fn harness(config: ServerConfig) -> Harness {
    let transport = MockTransport::new();
    let factory = MockFactory::new();
    let store = Arc::new(MemorySessionStore::new());
    let server = LoginServer::new(
        transport.clone(),
        factory.clone(),
        Arc::clone(&store),
        config,
    );

    let runner = server.clone();
    let accept_loop = tokio::spawn(async move { runner.run().await });

    Harness {
        server,
        transport,
        factory,
        store,
        accept_loop,
    }
}

impl Harness {
    /// Connects a client and waits until its session is registered.
    async fn connect(&self, label: u32) {
        let before = self.factory.sessions().len();
        self.transport.connect(label);
        eventually("session constructed", || self.factory.sessions().len() > before).await;
    }

    async fn login(&self, id: u64, player: u64) {
        self.factory.session(id).complete_login(PlayerId(player));
        let server = &self.server;
        eventually("login promoted", || {
            server
                .registry()
                .get_active(PlayerId(player))
                .is_some_and(|s| s.connection_id() == ConnectionId::new(id))
        })
        .await;
    }
}

// =========================================================================
// Accept orchestration
// =========================================================================

#[tokio::test]
async fn test_accept_registers_and_starts_session() {
    let h = harness(test_config());

    h.connect(1).await;

    let session = h.factory.session(1);
    assert!(session.was_started());
    assert_eq!(h.server.num_processing(), 1);
    assert_eq!(h.server.num_active_clients(), 0);
    assert!(h.server.registry().is_processing(ConnectionId::new(1)));
}

#[tokio::test]
async fn test_accept_assigns_increasing_ids() {
    let h = harness(test_config());

    for label in 1..=3 {
        h.connect(label).await;
    }

    let ids: Vec<u64> = h
        .factory
        .sessions()
        .iter()
        .map(|s| s.connection_id().into_inner())
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_accept_construction_failure_releases_stream_and_burns_id() {
    let h = harness(test_config());
    h.factory.fail_next();

    h.transport.connect(1);
    let transport = h.transport.clone();
    eventually("stream released", || transport.released() == vec![1]).await;
    assert_eq!(h.server.num_processing(), 0);

    h.connect(2).await;
    assert_eq!(
        h.factory.sessions()[0].connection_id(),
        ConnectionId::new(2),
        "id 1 is never reused"
    );
}

#[tokio::test]
async fn test_accept_start_failure_disposes_session() {
    let h = harness(test_config());
    h.factory.fail_next_start();

    h.connect(1).await;

    let session = h.factory.session(1);
    assert!(session.is_disposed());
    assert!(!session.has_stream());
    assert_eq!(h.server.num_processing(), 0);
}

#[tokio::test]
async fn test_accept_stream_after_shutdown_is_released() {
    let h = harness(test_config());
    h.server.shutdown().await;

    let accepted = h.server.accept_stream(MockStream(9));

    assert!(accepted.is_none());
    assert_eq!(h.transport.released(), vec![9]);
    assert!(h.factory.sessions().is_empty());
}

// =========================================================================
// Login timeout
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_login_timeout_disconnects_silent_client() {
    let h = harness(test_config());
    h.connect(1).await;
    let session = h.factory.session(1);

    // Sweeps at ~15s and ~30s; the second one sees a 30s-old handshake.
    tokio::time::sleep(Duration::from_secs(31)).await;

    eventually("session disposed", || session.is_disposed()).await;
    assert_eq!(session.disconnect_reasons(), vec![DisconnectReason::LoginTimedOut]);
    assert_eq!(h.server.num_processing(), 0);
    assert_eq!(h.server.num_active_clients(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_login_before_timeout_is_never_timed_out() {
    let h = harness(test_config());
    h.connect(1).await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    h.login(1, 77).await;

    tokio::time::sleep(Duration::from_secs(60)).await;

    let session = h.factory.session(1);
    assert!(session.disconnect_reasons().is_empty());
    assert!(h.server.is_connected(PlayerId(77)));
    assert!(session.keep_alives_sent() >= 4, "pinged on every tick");
}

// =========================================================================
// Admin operations
// =========================================================================

#[tokio::test]
async fn test_list_active_clients_is_a_snapshot_of_sessions() {
    let h = harness(test_config());
    for (id, player) in [(1, 10), (2, 20)] {
        h.connect(id).await;
        h.login(id.into(), player).await;
    }

    let mut listed = h.server.list_active_clients();
    listed.sort_by_key(|s| s.connection_id());
    assert!(h.server.force_logout(PlayerId(10)).await);
    let server = h.server.clone();
    eventually("player 10 removed", || !server.is_connected(PlayerId(10))).await;

    assert_eq!(listed.len(), 2, "later changes do not touch the snapshot");
    assert_eq!(listed[0].connection_id(), ConnectionId::new(1));
    assert_eq!(listed[1].identity(), Some(PlayerId(20)));
    assert_eq!(h.server.list_active_clients().len(), 1);
}

#[tokio::test]
async fn test_force_logout_alice() {
    let alice = PlayerId(1001);
    let h = harness(test_config());
    h.connect(1).await;
    h.login(1, alice.0).await;

    assert!(h.server.is_connected(alice));
    assert_eq!(h.server.num_active_clients(), 1);
    assert_eq!(h.server.list_active_identities(), vec![alice]);
    let listed = h.server.list_active_clients();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].identity(), Some(alice));

    assert!(h.server.force_logout(alice).await);

    let server = h.server.clone();
    eventually("alice removed", || !server.is_connected(alice)).await;
    let session = h.factory.session(1);
    assert_eq!(session.disconnect_reasons(), vec![DisconnectReason::ForcedLogout]);
    assert!(session.is_disposed());
    assert_eq!(h.server.num_active_clients(), 0);
}

#[tokio::test]
async fn test_force_logout_unknown_player_returns_false() {
    let h = harness(test_config());
    assert!(!h.server.force_logout(PlayerId(5)).await);
    assert!(!h.server.is_connected(PlayerId(5)));
}

#[tokio::test]
async fn test_client_disconnect_removes_active_session() {
    let h = harness(test_config());
    h.connect(1).await;
    h.login(1, 50).await;

    h.factory.session(1).peer_closed();

    let server = h.server.clone();
    eventually("session removed", || server.num_active_clients() == 0).await;
    assert!(h.factory.session(1).is_disposed());
}

#[tokio::test]
async fn test_client_disconnect_during_handshake_removes_processing_session() {
    let h = harness(test_config());
    h.connect(1).await;

    h.factory.session(1).peer_closed();

    let server = h.server.clone();
    eventually("session removed", || server.num_processing() == 0).await;
    assert!(h.factory.session(1).is_disposed());
}

// =========================================================================
// Duplicate logins
// =========================================================================

#[tokio::test]
async fn test_duplicate_login_supersedes_bob() {
    let bob = PlayerId(2002);
    let h = harness(test_config());
    h.connect(1).await;
    h.login(1, bob.0).await;
    h.connect(2).await;

    h.login(2, bob.0).await;

    let original = h.factory.session(1);
    eventually("original superseded", || original.is_disposed()).await;
    assert_eq!(original.disconnect_reasons(), vec![DisconnectReason::Superseded]);
    let holder = h.server.registry().get_active(bob).expect("bob is active");
    assert_eq!(holder.connection_id(), ConnectionId::new(2));
    assert_eq!(h.server.num_active_clients(), 1);
    assert_eq!(h.server.num_processing(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_login_evict_only_leaves_newcomer_unpromoted() {
    let bob = PlayerId(2002);
    let h = harness(ServerConfig {
        duplicate_login_policy: DuplicateLoginPolicy::EvictOnly,
        ..test_config()
    });
    h.connect(1).await;
    h.login(1, bob.0).await;
    h.connect(2).await;

    h.factory.session(2).complete_login(bob);

    let original = h.factory.session(1);
    eventually("original superseded", || original.is_disposed()).await;
    assert_eq!(original.disconnect_reasons(), vec![DisconnectReason::Superseded]);
    assert!(!h.server.is_connected(bob));

    // The next sweep drops the completed newcomer from the processing map.
    tokio::time::sleep(Duration::from_secs(16)).await;
    assert_eq!(h.server.num_processing(), 0);
    assert_eq!(h.server.num_active_clients(), 0);
    let newcomer = h.factory.session(2);
    assert!(newcomer.disconnect_reasons().is_empty());
    assert!(!newcomer.is_disposed());
}

// =========================================================================
// Shutdown
// =========================================================================

#[tokio::test]
async fn test_shutdown_disconnects_everyone_and_closes_transport() {
    let h = harness(test_config());
    for id in 1..=5 {
        h.connect(id as u32).await;
    }
    for (id, player) in [(1, 11), (2, 22), (3, 33)] {
        h.login(id, player).await;
        h.store.set_marker(PlayerId(player), 1000 + player as u32).await;
    }
    assert_eq!(h.server.num_active_clients(), 3);
    assert_eq!(h.server.num_processing(), 2);

    h.server.shutdown().await;

    for session in h.factory.sessions() {
        assert_eq!(
            session.disconnect_reasons(),
            vec![DisconnectReason::ServerShutdown],
            "{}",
            session.connection_id()
        );
        assert!(session.is_disposed());
    }
    assert_eq!(h.server.num_active_clients(), 0);
    assert_eq!(h.server.num_processing(), 0);
    assert!(h.transport.is_closed());
    assert!(h.server.is_shut_down());
    for player in [11, 22, 33] {
        assert_eq!(h.store.marker(PlayerId(player)).await, 0);
    }

    let accept_result = h.accept_loop.await.expect("accept loop should not panic");
    assert!(accept_result.is_ok());
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let h = harness(test_config());
    h.connect(1).await;

    h.server.shutdown().await;
    h.server.shutdown().await;

    assert_eq!(
        h.factory.session(1).disconnect_reasons(),
        vec![DisconnectReason::ServerShutdown]
    );
}

#[tokio::test]
async fn test_shutdown_continues_when_store_is_offline() {
    let h = harness(test_config());
    h.connect(1).await;
    h.store.set_offline(true);

    h.server.shutdown().await;

    assert!(h.factory.session(1).is_disposed());
    assert!(h.transport.is_closed());
}

#[tokio::test]
async fn test_events_after_shutdown_are_ignored() {
    let h = harness(test_config());
    h.connect(1).await;
    let session = h.factory.session(1);
    h.server.shutdown().await;

    // A late handshake completion must not resurrect the session.
    session.complete_login(PlayerId(9));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(!h.server.is_connected(PlayerId(9)));
    assert_eq!(h.server.num_active_clients(), 0);
}

#[tokio::test]
async fn test_run_after_shutdown_returns_error() {
    let h = harness(test_config());
    h.server.shutdown().await;

    let result = h.server.run().await;

    assert!(matches!(result, Err(GpcmError::ShutDown)));
}
