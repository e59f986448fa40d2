//! Exchange entry point: matching engine, order server, market-data
//! publisher and snapshot synthesizer, one thread each, wired together by
//! SPSC rings.

use clap::Parser;
use common::logging::Logger;
use exchange::market_data::{
    MarketDataPublisher, MarketDataPublisherConfig, DEFAULT_INCREMENTAL_ADDR,
    DEFAULT_INCREMENTAL_PORT,
};
use exchange::matching_engine::MatchingEngine;
use exchange::order_server::{OrderServer, OrderServerConfig, DEFAULT_ORDER_SERVER_PORT};
use exchange::protocol::{
    ClientRequestQueue, ClientResponseQueue, MarketUpdateQueue, SequencedMarketUpdateQueue,
};
use exchange::snapshot::{
    SnapshotSynthesizer, SnapshotSynthesizerConfig, DEFAULT_SNAPSHOT_ADDR, DEFAULT_SNAPSHOT_PORT,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Electronic trading venue: matching engine, order entry and market data.
#[derive(Parser, Debug)]
#[command(name = "exchange")]
struct Args {
    /// TCP port for order entry
    #[arg(short, long, default_value_t = DEFAULT_ORDER_SERVER_PORT)]
    port: u16,

    /// Incremental market-data multicast group
    #[arg(long, default_value = DEFAULT_INCREMENTAL_ADDR)]
    incremental_addr: String,

    /// Incremental market-data multicast port
    #[arg(long, default_value_t = DEFAULT_INCREMENTAL_PORT)]
    incremental_port: u16,

    /// Snapshot multicast group
    #[arg(long, default_value = DEFAULT_SNAPSHOT_ADDR)]
    snapshot_addr: String,

    /// Snapshot multicast port
    #[arg(long, default_value_t = DEFAULT_SNAPSHOT_PORT)]
    snapshot_port: u16,

    /// Seconds between snapshot cycles
    #[arg(long, default_value_t = 60)]
    snapshot_interval_secs: u64,

    /// Comma-separated ticker ids to host
    #[arg(short, long, default_value = "0,1,2")]
    tickers: String,

    /// Local interface address
    #[arg(short, long, default_value = "0.0.0.0")]
    interface: String,

    /// Multicast TTL
    #[arg(long, default_value_t = 1)]
    ttl: u32,
}

fn parse_tickers(tickers: &str) -> Vec<u32> {
    tickers.split(',').filter_map(|s| s.trim().parse().ok()).collect()
}

fn main() {
    let args = Args::parse();

    let tickers = parse_tickers(&args.tickers);
    if tickers.is_empty() {
        eprintln!("error: no valid ticker ids in {:?}", args.tickers);
        std::process::exit(1);
    }

    println!("exchange starting");
    println!("  order entry : {}:{}", args.interface, args.port);
    println!("  incremental : {}:{}", args.incremental_addr, args.incremental_port);
    println!("  snapshot    : {}:{}", args.snapshot_addr, args.snapshot_port);
    println!("  tickers     : {:?}", tickers);

    let running = Arc::new(AtomicBool::new(true));

    // Rings connecting the pipeline stages.
    let engine_requests = Arc::new(ClientRequestQueue::new());
    let engine_responses = Arc::new(ClientResponseQueue::new());
    let market_updates = Arc::new(MarketUpdateQueue::new());
    let snapshot_tap = Arc::new(SequencedMarketUpdateQueue::new());

    let mut engine = MatchingEngine::new(
        Arc::clone(&engine_requests),
        Arc::clone(&engine_responses),
        Arc::clone(&market_updates),
        Logger::new(),
        Arc::clone(&running),
    );
    for &ticker_id in &tickers {
        engine.add_ticker(ticker_id);
    }

    let mut order_server = match OrderServer::new(
        OrderServerConfig::new(&args.interface, args.port),
        Arc::clone(&engine_requests),
        Arc::clone(&engine_responses),
        Logger::new(),
        Arc::clone(&running),
    ) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("failed to start order server: {}", e);
            std::process::exit(1);
        }
    };

    let publisher_config = MarketDataPublisherConfig {
        multicast_addr: args.incremental_addr.clone(),
        port: args.incremental_port,
        interface: args.interface.clone(),
        ttl: args.ttl,
    };
    let mut publisher = match MarketDataPublisher::new(
        publisher_config,
        Arc::clone(&market_updates),
        Arc::clone(&snapshot_tap),
        Logger::new(),
        Arc::clone(&running),
    ) {
        Ok(publisher) => publisher,
        Err(e) => {
            eprintln!("failed to start market data publisher: {}", e);
            std::process::exit(1);
        }
    };

    let synthesizer_config = SnapshotSynthesizerConfig {
        multicast_addr: args.snapshot_addr.clone(),
        port: args.snapshot_port,
        interface: args.interface.clone(),
        ttl: args.ttl,
        snapshot_interval: Duration::from_secs(args.snapshot_interval_secs),
    };
    let mut synthesizer = match SnapshotSynthesizer::new(
        synthesizer_config,
        Arc::clone(&snapshot_tap),
        Logger::new(),
        Arc::clone(&running),
    ) {
        Ok(synthesizer) => synthesizer,
        Err(e) => {
            eprintln!("failed to start snapshot synthesizer: {}", e);
            std::process::exit(1);
        }
    };

    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            println!("\nshutting down");
            running.store(false, Ordering::SeqCst);
        })
        .expect("failed to install signal handler");
    }

    let engine_thread = thread::Builder::new()
        .name("matching-engine".into())
        .spawn(move || engine.run())
        .expect("failed to spawn matching engine");
    let server_thread = thread::Builder::new()
        .name("order-server".into())
        .spawn(move || order_server.run())
        .expect("failed to spawn order server");
    let publisher_thread = thread::Builder::new()
        .name("md-publisher".into())
        .spawn(move || publisher.run())
        .expect("failed to spawn market data publisher");
    let synthesizer_thread = thread::Builder::new()
        .name("snapshot-synth".into())
        .spawn(move || synthesizer.run())
        .expect("failed to spawn snapshot synthesizer");

    println!("exchange running, ctrl-c to stop");

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    // Join in reverse construction order.
    let _ = synthesizer_thread.join();
    let _ = publisher_thread.join();
    let _ = server_thread.join();
    let _ = engine_thread.join();

    println!("exchange stopped");
}
