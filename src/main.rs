use stateflow::client::AsyncClient;
use stateflow::cluster::LocalCluster;
use stateflow::config::{ClientConfig, EngineConfig};
use stateflow::coordinator::router;
use stateflow::graph::{DataflowGraph, Operator};
use stateflow::state::{Key, partition_for};
use stateflow::worker::OperatorCatalog;
use stateflow::ycsb::ycsb_operator;

use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;

const STARTING_MONEY: i64 = 1_000_000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = EngineConfig::from_env()?;

    let args: Vec<String> = std::env::args().collect();
    let mut partitions: u32 = 4;
    let mut demo_keys: Option<i64> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" if i + 1 < args.len() => {
                config.http_bind = args[i + 1].parse::<SocketAddr>()?;
                i += 2;
            }
            "--workers" if i + 1 < args.len() => {
                config.workers = args[i + 1].parse()?;
                i += 2;
            }
            "--partitions" if i + 1 < args.len() => {
                partitions = args[i + 1].parse()?;
                i += 2;
            }
            "--demo" if i + 1 < args.len() => {
                demo_keys = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--help" | "-h" => {
                eprintln!(
                    "Usage: {} [--bind <addr:port>] [--workers <n>] [--partitions <n>] [--demo <keys>]",
                    args[0]
                );
                eprintln!("Example: {} --bind 127.0.0.1:8886 --workers 4", args[0]);
                std::process::exit(0);
            }
            _ => {
                i += 1;
            }
        }
    }

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();

    tracing::info!("Starting local cluster with {} workers", config.workers);

    // 1. Operators the workers can execute:
    let ycsb = ycsb_operator(partitions)?;
    let catalog = OperatorCatalog::from_operators([ycsb.clone()]);

    // 2. Coordinator + workers over the in-memory broker:
    let cluster = LocalCluster::start(config.clone(), catalog).await?;

    // 3. HTTP Router:
    let app = router(cluster.coordinator().clone());

    // 4. Spawn stats reporter:
    let stats_coordinator = cluster.coordinator().clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;
            let members = stats_coordinator.membership.members();
            let live = members.iter().filter(|m| m.is_live()).count();
            tracing::info!("Cluster stats: {} live workers", live);
            for member in members {
                tracing::info!(
                    "  - {} state={:?} heartbeats={}",
                    member.id,
                    member.state,
                    member.heartbeats
                );
            }
            for name in stats_coordinator.graph_names() {
                if let Some(status) = stats_coordinator.graph_status(&name) {
                    tracing::info!(
                        "  graph '{}' {:?} epoch={}",
                        name,
                        status.state,
                        status.assignment.map(|a| a.epoch).unwrap_or(0)
                    );
                }
            }
        }
    });

    // 5. Optional in-process workload:
    if let Some(keys) = demo_keys {
        let client = cluster.async_client(ClientConfig::default()).await?;
        tokio::spawn(async move {
            if let Err(e) = run_demo(&client, ycsb, keys).await {
                tracing::error!("Demo workload failed: {:#}", e);
            }
            client.close().await;
        });
    }

    // 6. Start HTTP server:
    tracing::info!("HTTP server listening on {}", config.http_bind);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(config.http_bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    cluster.shutdown().await;
    Ok(())
}

/// Loads `keys` accounts, then transfers between neighbouring keys and
/// checks that money is conserved.
async fn run_demo(client: &AsyncClient, ycsb: Operator, keys: i64) -> anyhow::Result<()> {
    let mut graph = DataflowGraph::new("ycsb-benchmark");
    graph.add_operator(ycsb.clone())?;
    client.submit_dataflow(&graph).await?;

    let partitions = ycsb.partitions();
    let mut batches = vec![Vec::new(); partitions as usize];
    for k in 0..keys {
        let key = Key::Int(k);
        batches[partition_for(&key, partitions) as usize].push((key, json!(STARTING_MONEY)));
    }
    for (partition, entries) in batches.into_iter().enumerate() {
        client
            .send_batch_insert(&ycsb, partition as u32, "insert_batch", entries)
            .await?;
    }

    let mut latencies = Vec::new();
    for k in 0..keys {
        let target = (k + 1) % keys;
        let reply = client
            .send_event(&ycsb, k, "transfer", vec![json!(target)])
            .await?
            .get()
            .await?;
        latencies.push(reply.engine_latency_ms());
    }

    let mut total = 0;
    for k in 0..keys {
        let reply = client.send_event(&ycsb, k, "read", vec![]).await?.get().await?;
        total += reply.value().and_then(|v| v.as_i64()).unwrap_or(0);
    }

    latencies.sort_unstable();
    let p50 = latencies.get(latencies.len() / 2).copied().unwrap_or(0);
    tracing::info!(
        "Demo finished: {} transfers, p50 engine latency {}ms, total balance {} (expected {})",
        keys,
        p50,
        total,
        keys * STARTING_MONEY
    );
    Ok(())
}
