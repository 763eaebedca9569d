//! Demonstration of slotring-dispatch features.
//!
//! Run with: `cargo run -p slotring-dispatch --bin demo`
//! (`RUST_LOG=slotring_dispatch=debug` shows every drain pass)

use rand::Rng;
use serde_json::{json, Value};
use slotring_dispatch::{
    Bridge, DispatchConfig, Downstream, ErrorCode, Event, RecordError, SessionStatus, StreamExt,
    Wake,
};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;

const SYMBOLS: [&str; 4] = ["AAPL", "MSFT", "GOOG", "AMZN"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    println!("=== slotring-dispatch Demo ===\n");

    demo_market_feed().await?;
    demo_response_and_errors().await?;
    demo_stream().await?;

    println!("\n=== All demos completed successfully! ===");
    Ok(())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

/// Projects records into the JSON objects a script-facing consumer would see.
#[derive(Default)]
struct JsonSink {
    received: Vec<Value>,
    batches: usize,
}

impl Downstream for JsonSink {
    type Item = Value;

    fn project(&mut self, event: Event) -> Value {
        let value = match &event {
            Event::SessionStatusChange { session, status } => {
                json!({ "session": format!("{:x}", session), "status": status.as_str() })
            }
            other => serde_json::to_value(other).unwrap_or(Value::Null),
        };
        json!({ "type": event.kind(), "value": value })
    }

    fn deliver(&mut self, batch: Vec<Value>) {
        self.batches += 1;
        self.received.extend(batch);
    }
}

/// Demo 1: streaming updates from several producer threads
async fn demo_market_feed() -> Result<(), Box<dyn std::error::Error>> {
    println!("--- Demo 1: Market Feed ---");

    let bridge = Bridge::new(DispatchConfig::default())?;
    let consumer = tokio::spawn(bridge.attach(JsonSink::default())?.run());

    bridge.post_priority(&Event::SessionStatusChange {
        session: 0x5eed,
        status: SessionStatus::Connected,
    })?;

    let producers: Vec<_> = SYMBOLS
        .iter()
        .map(|&symbol| {
            let bridge = bridge.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..2_500 {
                    let bid: f64 = rng.gen_range(100.0..200.0);
                    let event = Event::Quote {
                        request: 0,
                        symbol: symbol.to_string(),
                        bid,
                        ask: bid + 0.01,
                        bid_size: rng.gen_range(1..1_000),
                        ask_size: rng.gen_range(1..1_000),
                        time: now_millis(),
                        end: false,
                    };
                    if let Err(e) = bridge.post(&event, Wake::Lazy) {
                        eprintln!("  post failed: {}", e);
                    }
                }
                bridge.signal();
            })
        })
        .collect();

    for p in producers {
        p.join().map_err(|_| "producer panicked")?;
    }
    bridge.post(&Event::ServerTime { time: now_millis() }, Wake::Now)?;

    bridge.shutdown();
    let sink = consumer.await?;
    println!(
        "  Received {} records in {} batches",
        sink.received.len(),
        sink.batches
    );
    if let Some(first) = sink.received.first() {
        println!("  First record: {}", first);
    }

    let m = bridge.metrics();
    println!(
        "  Wakeups: {}, signals: {}, priority records: {}",
        m.wakeups, m.signals, m.priority_delivered
    );
    println!("  ✓ Market feed complete\n");
    Ok(())
}

/// Demo 2: multi-record response, bad record, request timeout
async fn demo_response_and_errors() -> Result<(), Box<dyn std::error::Error>> {
    println!("--- Demo 2: Responses and Errors ---");

    let bridge = Bridge::new(DispatchConfig::low_latency())?;
    let mut drain = bridge.attach(JsonSink::default())?;

    let history = (0..5).map(|i| Event::Trade {
        request: 17,
        symbol: "MSFT".to_string(),
        price: 410.0 + f64::from(i) / 4.0,
        size: 100 * (i + 1),
        time: now_millis(),
        end: false,
    });
    let posted = bridge.publish_response(17, history)?;
    println!("  Published response 17 with {} trades", posted);

    let rejected = bridge.post_with(32, Wake::Now, |_| {
        Err(RecordError::BadRecord("quote with empty symbol".to_string()))
    });
    println!("  Bad record rejected: {}", rejected.is_err());

    bridge.post(&Event::RequestTimeout { request: 18 }, Wake::Now)?;
    bridge.report_error(ErrorCode::Upstream(401), "session expired")?;

    let report = drain.drain_once();
    println!(
        "  Drained {} records ({} priority) in {} batch(es)",
        report.records, report.priority, report.batches
    );
    for value in &drain.downstream().received {
        println!("    {}", value);
    }
    println!("  ✓ Responses and errors complete\n");
    Ok(())
}

/// Demo 3: consuming batches as a Stream
async fn demo_stream() -> Result<(), Box<dyn std::error::Error>> {
    println!("--- Demo 3: Stream Consumer ---");

    let bridge = Bridge::new(DispatchConfig::default())?;
    let mut stream = bridge.stream()?;

    let producer = bridge.clone();
    tokio::spawn(async move {
        for i in 0..3 {
            let _ = producer.post(&Event::ServerTime { time: i }, Wake::Now);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        producer.shutdown();
    });

    let mut total = 0;
    while let Some(batch) = stream.next().await {
        total += batch.len();
        println!("  Batch of {}: {:?}", batch.len(), batch.iter().map(Event::kind).collect::<Vec<_>>());
    }
    println!("  Stream ended after {} records", total);
    println!("  ✓ Stream consumer complete");
    Ok(())
}
