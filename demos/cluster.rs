//! Example: Redis Cluster operations with automatic redirect handling.
//!
//! Requirements:
//! - Redis Cluster running on localhost (ports 7000-7005)
//! - Run with: cargo run --example cluster
//!
//! Quick setup with Docker:
//! ```bash
//! # Create a 6-node Redis Cluster
//! docker run -d --name redis-cluster -p 7000-7005:7000-7005 \
//!   grokzen/redis-cluster:latest
//! ```

use std::time::Duration;

use bytes::Bytes;
use slotmux::{key_slot, ClusterClientBuilder, Cmd, Error};

#[tokio::main]
async fn main() -> slotmux::Result<()> {
    println!("=== Slotmux Redis Cluster Example ===\n");

    println!("1. Connecting to Redis Cluster...");
    let client = ClusterClientBuilder::new()
        .addresses("127.0.0.1:7000,127.0.0.1:7001,127.0.0.1:7002")
        .client_name("slotmux-demo")
        .max_connections_per_node(4)
        .pool_wait_timeout(Duration::from_millis(500))
        .build()
        .await?;
    println!("   Connected, {} nodes known", client.node_count());
    if !client.is_fully_covered() {
        println!("   Warning: Cluster does not cover all 16384 slots!");
    }

    println!("\n2. Basic operations (automatic routing)...");
    let key = "user:1000:name";
    let slot = key_slot(key);
    println!(
        "   '{key}' hashes to slot {slot}, owned by {:?}",
        client.slot_owner(slot).map(|n| n.to_string())
    );
    client.set(key, Bytes::from("Alice")).await?;
    if let Some(value) = client.get(key).await? {
        println!("   Value: {}", String::from_utf8_lossy(&value));
    }
    println!("   Deleted: {} keys", client.del([key]).await?);

    println!("\n3. Hash tags for same-slot keys...");
    let tagged = ["profile:{user:1000}:name", "profile:{user:1000}:email"];
    let slot = client.validate_same_slot(&tagged)?;
    println!("   All keys map to slot: {slot}");
    client
        .mset([(tagged[0], "Alice"), (tagged[1], "alice@example.com")])
        .await?;
    for (key, value) in tagged.iter().zip(client.mget(tagged).await?) {
        println!(
            "   {key} = {}",
            value.map(|v| String::from_utf8_lossy(&v).into_owned()).unwrap_or_default()
        );
    }
    client.del(tagged).await?;

    println!("\n4. Cross-slot keys are rejected before any I/O...");
    match client.mget(["key1", "key2", "key3"]).await {
        Err(Error::CrossSlot { first, second }) => {
            println!("   Rejected: slots {first} and {second} differ");
        }
        other => println!("   Unexpected result: {other:?}"),
    }

    println!("\n5. Counters and expiry...");
    let counter = "demo:counter";
    println!("   INCRBY -> {}", client.incr_by(counter, 10).await?);
    client.expire(counter, 30).await?;
    println!("   TTL -> {}s", client.ttl(counter).await?);

    println!("\n6. Arbitrary commands...");
    let reply = client
        .execute(Cmd::new("STRLEN").key("profile:{user:1000}:name"))
        .await?;
    println!("   STRLEN -> {reply:?}");

    println!("\n7. Topology refresh...");
    client.refresh_topology().await?;
    println!("   Cluster nodes after refresh: {}", client.node_count());
    for (key, pool) in client.known_nodes() {
        println!("   {key}: {} idle connections", pool.idle_count());
    }

    client.close();
    println!("\n=== Example Complete ===");
    Ok(())
}
