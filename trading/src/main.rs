//! Trading client entry point: market-data consumer, order gateway and the
//! trading runtime, one thread each, wired by SPSC rings.

use clap::{Parser, ValueEnum};
use common::logging::Logger;
use exchange::protocol::{ClientRequestQueue, ClientResponseQueue, MarketUpdateQueue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use trading::market_data::{MarketDataConsumer, MarketDataConsumerConfig};
use trading::order_gateway::{OrderGateway, OrderGatewayConfig};
use trading::risk::RiskCfg;
use trading::trade_engine::{AlgoType, TickerCfg, TradeEngine, TradeEngineConfig};
use trading::DEFAULT_ORDER_SERVER_PORT;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Algo {
    MarketMaker,
    LiquidityTaker,
    None,
}

impl From<Algo> for AlgoType {
    fn from(algo: Algo) -> Self {
        match algo {
            Algo::MarketMaker => AlgoType::MarketMaker,
            Algo::LiquidityTaker => AlgoType::LiquidityTaker,
            Algo::None => AlgoType::None,
        }
    }
}

/// Trading client: consumes market data, runs an algorithm, sends orders.
#[derive(Parser, Debug)]
#[command(name = "trading")]
struct Args {
    /// Client id registered with the venue
    #[arg(short, long)]
    client_id: u32,

    /// Algorithm to run
    #[arg(short, long, value_enum, default_value_t = Algo::MarketMaker)]
    algo: Algo,

    /// Order server address
    #[arg(long, default_value = "127.0.0.1")]
    server_addr: String,

    /// Order server port
    #[arg(long, default_value_t = DEFAULT_ORDER_SERVER_PORT)]
    server_port: u16,

    /// Incremental market-data multicast group
    #[arg(long, default_value = exchange::market_data::DEFAULT_INCREMENTAL_ADDR)]
    incremental_addr: String,

    /// Incremental market-data multicast port
    #[arg(long, default_value_t = exchange::market_data::DEFAULT_INCREMENTAL_PORT)]
    incremental_port: u16,

    /// Snapshot multicast group
    #[arg(long, default_value = exchange::snapshot::DEFAULT_SNAPSHOT_ADDR)]
    snapshot_addr: String,

    /// Snapshot multicast port
    #[arg(long, default_value_t = exchange::snapshot::DEFAULT_SNAPSHOT_PORT)]
    snapshot_port: u16,

    /// Local interface address
    #[arg(short, long, default_value = "0.0.0.0")]
    interface: String,

    /// Working order size per side
    #[arg(long, default_value_t = 10)]
    clip: u32,

    /// Algorithm signal threshold
    #[arg(long, default_value_t = 0.7)]
    threshold: f64,

    /// Maximum single-order size
    #[arg(long, default_value_t = 1000)]
    max_order_size: u32,

    /// Maximum absolute position
    #[arg(long, default_value_t = 10000)]
    max_position: i64,

    /// Maximum tolerated loss before new orders stop
    #[arg(long, default_value_t = 100000.0)]
    max_loss: f64,
}

fn main() {
    let args = Args::parse();

    println!("trading client {} starting ({:?})", args.client_id, args.algo);

    let running = Arc::new(AtomicBool::new(true));

    let md_updates = Arc::new(MarketUpdateQueue::new());
    let responses = Arc::new(ClientResponseQueue::new());
    let requests = Arc::new(ClientRequestQueue::new());

    let consumer_config = MarketDataConsumerConfig {
        incremental_addr: args.incremental_addr.clone(),
        incremental_port: args.incremental_port,
        snapshot_addr: args.snapshot_addr.clone(),
        snapshot_port: args.snapshot_port,
        interface: args.interface.clone(),
    };
    let mut consumer = MarketDataConsumer::new(
        consumer_config,
        Arc::clone(&md_updates),
        Logger::new(),
        Arc::clone(&running),
    );
    if let Err(e) = consumer.connect() {
        eprintln!("failed to join incremental group: {}", e);
        std::process::exit(1);
    }

    let gateway_config =
        OrderGatewayConfig { server_addr: args.server_addr.clone(), server_port: args.server_port };
    let mut gateway = match OrderGateway::connect(
        &gateway_config,
        args.client_id,
        Arc::clone(&requests),
        Arc::clone(&responses),
        Logger::new(),
        Arc::clone(&running),
    ) {
        Ok(gateway) => gateway,
        Err(e) => {
            eprintln!("failed to connect to order server: {}", e);
            std::process::exit(1);
        }
    };

    let ticker_cfg = TickerCfg {
        clip: args.clip,
        threshold: args.threshold,
        risk_cfg: RiskCfg {
            max_order_size: args.max_order_size,
            max_position: args.max_position,
            max_loss: args.max_loss,
        },
    };
    let engine_config = TradeEngineConfig {
        client_id: args.client_id,
        ticker_cfg: vec![ticker_cfg; common::MAX_TICKERS],
        ..TradeEngineConfig::default()
    };
    let mut engine = TradeEngine::new(
        engine_config,
        args.algo.into(),
        Arc::clone(&md_updates),
        Arc::clone(&responses),
        Arc::clone(&requests),
        Logger::new(),
        Arc::clone(&running),
    );

    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            println!("\nshutting down");
            running.store(false, Ordering::SeqCst);
        })
        .expect("failed to install signal handler");
    }

    let consumer_thread = thread::Builder::new()
        .name("md-consumer".into())
        .spawn(move || consumer.run())
        .expect("failed to spawn market data consumer");
    let gateway_thread = thread::Builder::new()
        .name("order-gateway".into())
        .spawn(move || gateway.run())
        .expect("failed to spawn order gateway");
    let engine_thread = thread::Builder::new()
        .name("trade-engine".into())
        .spawn(move || engine.run())
        .expect("failed to spawn trade engine");

    println!("trading client running, ctrl-c to stop");

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    let _ = engine_thread.join();
    let _ = gateway_thread.join();
    let _ = consumer_thread.join();

    println!("trading client stopped");
}
