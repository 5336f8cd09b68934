//! Wires up a small in-process cluster over `ChannelTransport` and runs it to a handful of
//! committed heights, logging every rule firing. Run with `RUST_LOG=debug cargo run --bin demo`.

use std::collections::HashMap;

use tendermint_core::collaborators::{AlwaysValid, FixedValue, RoundRobinByHeightAndRound};
use tendermint_core::config::{DurationConfig, ReplicaConfig};
use tendermint_core::transport::ChannelTransport;
use tendermint_core::types::Event;
use tendermint_core::Replica;

const N: u64 = 4;
const F: u64 = 1;

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut senders = HashMap::new();
    let mut receivers = Vec::new();
    for id in 0..N {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
        senders.insert(id, tx);
        receivers.push((id, rx));
    }

    let mut handles = Vec::new();
    for (id, rx) in receivers {
        let transport = ChannelTransport::new(id, senders.clone());
        let self_tx = senders.get(&id).unwrap().clone();

        let replica = Replica::new(
            ReplicaConfig::new(id, N, F).expect("valid replica config"),
            DurationConfig::default(),
            RoundRobinByHeightAndRound { n: N },
            AlwaysValid,
            FixedValue(bytes::Bytes::from_static(b"demo-value")),
            transport,
            self_tx,
        );

        handles.push(tokio::spawn(replica.process_events(rx)));
    }

    // Let the cluster run for a bit and then tear down; this is a demo harness, not a long-running
    // service, so there's no graceful shutdown signal beyond dropping the senders.
    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
    drop(senders);

    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!("replica exited with error: {}", e),
            Err(e) => log::error!("replica task panicked: {}", e),
        }
    }
}
