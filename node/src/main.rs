// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use cairn_kernel::state::Genesis;
use cairn_kernel::types::{Validator, ValidatorId, ValidatorSet};
use cairn_node::app::KvStoreApp;
use cairn_node::config::NodeConfig;
use cairn_node::events::{Event, EventKind};
use cairn_node::mempool::VecMempool;
use cairn_node::node::{Node, NodeParts};
use cairn_node::persistence::{FileBlockStore, FileStateStore};
use cairn_node::privval::MockPv;
use cairn_node::telemetry::{get_metrics, init_telemetry};
use cairn_node::wal_writer::FileWal;
use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry();

    let cfg = match std::env::args().nth(1) {
        Some(path) => NodeConfig::load(Path::new(&path))?,
        None => NodeConfig::default(),
    };
    tracing::info!("Initializing Cairn Node with config: {:?}", cfg);

    let genesis = Genesis::new(
        cfg.chain_id.clone(),
        ValidatorSet::new(vec![Validator {
            id: ValidatorId(0),
            voting_power: 10,
        }]),
    );

    let mut mempool = VecMempool::new();
    for i in 0..4 {
        mempool.push(format!("demo-{}=cairn", i).into_bytes());
    }

    let parts = NodeParts {
        genesis,
        app: Box::new(KvStoreApp::new()),
        mempool: Box::new(mempool),
        priv_val: Box::new(MockPv::new(ValidatorId(0))),
        block_store: Arc::new(FileBlockStore::open(cfg.blocks_file())?),
        state_store: Arc::new(FileStateStore::open(cfg.state_file())?),
        wal: Box::new(FileWal::open(cfg.wal_file(), cfg.wal.clone())?),
    };

    let mut node = Node::new(&cfg, parts)?;
    let outcome = node.handshake_outcome();
    let replay = node.replay_report();
    tracing::info!(
        "Recovered: store height {}, {} blocks handshaken, {} WAL messages replayed",
        outcome.store_height,
        outcome.blocks_replayed,
        replay.messages
    );

    let next_block = node.events().subscribe_once(EventKind::NewBlock);
    tokio::spawn(async move {
        if let Ok(Event::NewBlock { height, hash, .. }) = next_block.await {
            tracing::info!("First block of this session committed at {}: {}", height, hash);
        }
    });

    let stop = node.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, stopping");
            stop.stop();
        }
    });

    node.start()?;
    let height = tokio::task::spawn_blocking(move || node.wait()).await??;
    tracing::info!("Node stopped at height {}", height);
    tracing::debug!("Metrics:\n{}", get_metrics());
    Ok(())
}
