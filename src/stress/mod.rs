//! Internal stress tests for cluster routing over real sockets.
//!
//! Three in-process nodes speak RESP over TCP. Their `CLUSTER SLOTS` reply
//! is deliberately stale (node 0 claims every slot), so the client has to
//! learn the real layout from `MOVED` replies while under load.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};

use crate::cluster::endpoint::NodeEndpoint;
use crate::cluster::slot::key_slot;
use crate::core::builder::ClusterClientBuilder;
use crate::core::connection::Connection;
use crate::proto::frame::Frame;
use crate::testing::MockCluster;

type Store = Arc<Mutex<HashMap<Bytes, Bytes>>>;

const NODES: usize = 3;

fn owner_of(slot: u16) -> usize {
    usize::from(slot) / 5462
}

fn respond(me: usize, ports: &[u16], store: &Store, frame: Frame) -> Frame {
    let args: Vec<Bytes> = match frame {
        Frame::Array(items) => items
            .into_iter()
            .filter_map(|f| match f {
                Frame::Bulk(Some(b)) => Some(b),
                _ => None,
            })
            .collect(),
        _ => return Frame::Error("ERR format".into()),
    };
    let name = String::from_utf8_lossy(&args[0]).to_uppercase();
    match name.as_str() {
        "PING" => Frame::Simple("PONG".into()),
        "CLUSTER" => {
            let seed = NodeEndpoint::new("127.0.0.1", ports[0]);
            MockCluster::cluster_slots(&[(0, 16383, &seed)])
        }
        "GET" | "SET" => {
            let slot = key_slot(&args[1]);
            let owner = owner_of(slot);
            if owner != me {
                return Frame::Error(format!("MOVED {slot} 127.0.0.1:{}", ports[owner]));
            }
            let mut store = store.lock();
            if name == "SET" {
                store.insert(args[1].clone(), args[2].clone());
                Frame::Simple("OK".into())
            } else {
                Frame::Bulk(store.get(&args[1]).cloned())
            }
        }
        _ => Frame::Error("ERR unknown command".into()),
    }
}

async fn serve(stream: TcpStream, me: usize, ports: Arc<Vec<u16>>, store: Store) {
    let mut conn = Connection::new(stream);
    loop {
        let frame = match conn.read_frame().await {
            Ok(frame) => frame,
            Err(_) => return,
        };
        let reply = respond(me, &ports, &store, frame);
        if conn.write_frame(&reply).await.is_err() {
            return;
        }
    }
}

async fn start_cluster() -> Vec<u16> {
    let mut listeners = Vec::new();
    for _ in 0..NODES {
        listeners.push(TcpListener::bind("127.0.0.1:0").await.unwrap());
    }
    let ports: Arc<Vec<u16>> = Arc::new(
        listeners
            .iter()
            .map(|l| l.local_addr().unwrap().port())
            .collect(),
    );

    for (me, listener) in listeners.into_iter().enumerate() {
        let ports = Arc::clone(&ports);
        let store = Store::default();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, me, Arc::clone(&ports), Arc::clone(&store)));
            }
        });
    }
    ports.to_vec()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_routing_stress() {
    let ports = start_cluster().await;

    let client = ClusterClientBuilder::new()
        .node(NodeEndpoint::new("127.0.0.1", ports[0]))
        .max_connections_per_node(16)
        .build()
        .await
        .expect("Failed to connect");
    assert_eq!(client.node_count(), 1);

    let mut handles = Vec::new();
    for i in 0..1000 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let key = format!("key:{i}");
            client.set(key.clone(), format!("value:{i}")).await.unwrap();
            let value = client.get(key).await.unwrap();
            assert_eq!(value, Some(Bytes::from(format!("value:{i}"))));
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(client.node_count(), NODES);
    for i in 0..1000 {
        let slot = key_slot(format!("key:{i}"));
        let owner = client.slot_owner(slot).unwrap();
        assert_eq!(owner.port(), ports[owner_of(slot)]);
    }
    for pool in client.known_nodes().values() {
        assert!(pool.idle_count() <= 16);
    }
}
