//! End-to-end: boots a real service over TCP and drives it with the wire
//! protocol directly, spinning up the server in a background task and
//! exercising it with a plain socket client.

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use client::connection::Connection;
use codec::{
    crypto,
    message::{PacketType, SessionCreate, SessionCreated, SessionJoin, SessionJoined, SessionType},
};
use dss_server::config::{Config, Database, Identity, Interface, Log, RateLimits, Server};
use tokio::time::sleep;

fn now_s() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

async fn spawn_service(bind: SocketAddr, database_path: &str) {
    let config = Arc::new(Config {
        server: Server {
            interfaces: vec![Interface { listen: bind, idle_timeout: 60 }],
            ..Server::default()
        },
        rate_limits: RateLimits::default(),
        identity: Identity::default(),
        database: Some(Database { path: database_path.to_string() }),
        log: Log::default(),
    });

    tokio::spawn(async move {
        dss_server::startup(config).await.unwrap();
    });

    sleep(Duration::from_millis(200)).await;
}

/// S1 — two-party `DIRECT_TCP` happy path: a creates, b looks up then
/// joins, and the disclosed address matches what a advertised.
#[tokio::test]
async fn direct_tcp_create_then_join() {
    let bind = SocketAddr::from((Ipv4Addr::LOCALHOST, 27401));
    let db_path = std::env::temp_dir().join("dss_test_s1.sqlite3");
    spawn_service(bind, db_path.to_str().unwrap()).await;

    let mut a = Connection::connect(bind).await.unwrap();
    let (host_pub, host_secret) = crypto::generate_keypair().unwrap();
    let ts = now_s();
    let signature = crypto::sign_session_create(&host_secret, &host_pub, ts, 0x03, 8).unwrap();

    let create = SessionCreate {
        identity: host_pub,
        timestamp: ts,
        signature,
        capabilities: 0x03,
        max_participants: 8,
        session_type: SessionType::DirectTcp,
        password_hash: None,
        server_address: "127.0.0.1".into(),
        server_port: 27224,
        expose_ip_publicly: true,
        reserved_string: Some("ALFA-BRAVO".into()),
    };

    let mut buf = bytes::BytesMut::new();
    create.encode(&mut buf);
    a.send(PacketType::SessionCreate.into(), &buf).await.unwrap();

    let reply = a.recv().await.unwrap();
    assert_eq!(reply.packet_type, u16::from(PacketType::SessionCreated));
    let created = SessionCreated::decode(reply.payload).unwrap();
    assert_eq!(created.session_string, "ALFA-BRAVO");

    let mut b = Connection::connect(bind).await.unwrap();
    let (joiner_pub, joiner_secret) = crypto::generate_keypair().unwrap();
    let join_sig = crypto::sign_session_join(&joiner_secret, &joiner_pub, ts, "ALFA-BRAVO").unwrap();

    let join = SessionJoin {
        identity: joiner_pub,
        timestamp: ts,
        signature: join_sig,
        session_string: "ALFA-BRAVO".into(),
        password: None,
    };

    let mut buf = bytes::BytesMut::new();
    join.encode(&mut buf);
    b.send(PacketType::SessionJoin.into(), &buf).await.unwrap();

    let reply = b.recv().await.unwrap();
    assert_eq!(reply.packet_type, u16::from(PacketType::SessionJoined));
    let joined = SessionJoined::decode(reply.payload).unwrap();

    assert!(joined.success);
    assert_eq!(joined.server_address, "127.0.0.1");
    assert_eq!(joined.server_port, 27224);
}

/// `DISCOVERY_PING` always answers `PONG`, independent of session state.
#[tokio::test]
async fn discovery_ping_replies_pong() {
    let bind = SocketAddr::from((Ipv4Addr::LOCALHOST, 27402));
    let db_path = std::env::temp_dir().join("dss_test_ping.sqlite3");
    spawn_service(bind, db_path.to_str().unwrap()).await;

    let mut conn = Connection::connect(bind).await.unwrap();
    conn.send(PacketType::DiscoveryPing.into(), &[]).await.unwrap();

    let reply = conn.recv().await.unwrap();
    assert_eq!(reply.packet_type, u16::from(PacketType::DiscoveryPong));
}
