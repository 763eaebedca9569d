//! Integration tests for slotring-dispatch.

use slotring_dispatch::{
    Bridge, DispatchConfig, DispatchError, Downstream, ErrorCode, Event, RecordError, StreamExt,
    Wake,
};
use slotring_rs::{Config, RetryPolicy};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn queue(size: usize) -> Config {
    Config::with_buffer_size(size).with_retry(RetryPolicy::no_retry())
}

fn config() -> DispatchConfig {
    DispatchConfig::default()
        .with_main(queue(64 * 1024))
        .with_priority(queue(4 * 1024))
}

fn trade(request: u64, n: u32) -> Event {
    Event::Trade {
        request,
        symbol: "AAPL".into(),
        price: 190.0 + f64::from(n),
        size: n,
        time: u64::from(n),
        end: false,
    }
}

fn collect() -> (impl FnMut(Vec<Event>) + Send + 'static, mpsc::UnboundedReceiver<Vec<Event>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (move |batch| {
        let _ = tx.send(batch);
    }, rx)
}

#[tokio::test]
async fn test_priority_precedes_main_in_same_wakeup() {
    let bridge = Bridge::new(config()).unwrap();
    let mut batches = Vec::new();
    let mut drain = bridge.attach(|b: Vec<Event>| batches.push(b)).unwrap();

    bridge.post(&trade(0, 1), Wake::Lazy).unwrap();
    bridge.post(&trade(0, 2), Wake::Lazy).unwrap();
    bridge.report_error(ErrorCode::Upstream(3), "late").unwrap();

    let report = drain.drain_once();
    assert_eq!(report.records, 3);
    assert_eq!(report.priority, 1);
    drop(drain);

    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0][0], Event::error(ErrorCode::Upstream(3), "late"));
    assert_eq!(batches[0][1], trade(0, 1));
    assert_eq!(batches[0][2], trade(0, 2));
}

#[tokio::test]
async fn test_batches_are_capped_and_continue_within_wakeup() {
    let bridge = Bridge::new(
        config()
            .with_max_batch(2)
            .with_max_batches_per_wakeup(2),
    )
    .unwrap();
    let mut sizes = Vec::new();
    let mut drain = bridge.attach(|b: Vec<Event>| sizes.push(b.len())).unwrap();

    for n in 0..5 {
        bridge.post(&trade(0, n), Wake::Lazy).unwrap();
    }

    let first = drain.drain_once();
    assert_eq!((first.batches, first.records), (2, 4));
    assert!(first.exhausted);

    let second = drain.drain_once();
    assert_eq!((second.batches, second.records), (1, 1));
    assert!(!second.exhausted);

    assert_eq!(drain.drain_once().records, 0);
    drop(drain);
    assert_eq!(sizes, vec![2, 2, 1]);
}

#[tokio::test]
async fn test_lazy_records_delivered_after_signal_via_rearm() {
    let bridge = Bridge::new(config().with_max_batch(2).with_max_batches_per_wakeup(1)).unwrap();
    let (downstream, mut rx) = collect();
    let consumer = tokio::spawn(bridge.attach(downstream).unwrap().run());

    // Below the threshold: nothing wakes the consumer yet.
    for n in 0..5 {
        bridge.post(&trade(0, n), Wake::Lazy).unwrap();
    }
    assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());

    // One signal; the rest is picked up by the consumer re-arming itself.
    bridge.signal();
    let mut received = Vec::new();
    while received.len() < 5 {
        let batch = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert!(batch.len() <= 2);
        received.extend(batch);
    }
    let expected: Vec<_> = (0..5).map(|n| trade(0, n)).collect();
    assert_eq!(received, expected);

    bridge.shutdown();
    consumer.await.unwrap();
}

#[tokio::test]
async fn test_threshold_wakes_consumer() {
    let bridge = Bridge::new(config().with_coalesce_threshold(3)).unwrap();
    let (downstream, mut rx) = collect();
    let consumer = tokio::spawn(bridge.attach(downstream).unwrap().run());

    for n in 0..3 {
        bridge.post(&trade(0, n), Wake::Lazy).unwrap();
    }
    let batch = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    assert_eq!(batch.len(), 3);

    bridge.shutdown();
    consumer.await.unwrap();
}

#[tokio::test]
async fn test_bad_record_is_abandoned_and_reported() {
    let bridge = Bridge::new(config()).unwrap();
    let mut batches = Vec::new();
    let mut drain = bridge.attach(|b: Vec<Event>| batches.extend(b)).unwrap();

    bridge.post(&trade(0, 1), Wake::Lazy).unwrap();
    let err = bridge
        .post_with(40, Wake::Now, |buf| {
            buf[0] = 0xFF;
            Err(RecordError::BadRecord("negative size".into()))
        })
        .unwrap_err();
    assert!(matches!(err, DispatchError::Record(RecordError::BadRecord(_))));
    bridge.post(&trade(0, 2), Wake::Now).unwrap();

    drain.drain_once();
    drop(drain);

    assert_eq!(
        batches,
        vec![
            Event::error(ErrorCode::BadRecord, "bad record: negative size"),
            trade(0, 1),
            trade(0, 2),
        ]
    );
    assert_eq!(bridge.metrics().bad_records, 1);
}

#[tokio::test]
async fn test_post_with_writes_in_place() {
    let bridge = Bridge::new(config()).unwrap();
    let mut batches = Vec::new();
    let mut drain = bridge.attach(|b: Vec<Event>| batches.extend(b)).unwrap();

    let event = Event::SessionStatusChange {
        session: 0xAB,
        status: slotring_dispatch::SessionStatus::Connected,
    };
    let len = slotring_dispatch::record::encoded_len(&event).unwrap();
    bridge
        .post_with(len, Wake::Now, |buf| slotring_dispatch::record::encode_into(&event, buf))
        .unwrap();

    drain.drain_once();
    drop(drain);
    assert_eq!(batches, vec![event]);
}

#[tokio::test]
async fn test_main_overflow_reported_on_priority() {
    let bridge = Bridge::new(config().with_main(queue(256))).unwrap();
    let mut batches = Vec::new();
    let mut drain = bridge.attach(|b: Vec<Event>| batches.extend(b)).unwrap();

    let mut posted = 0;
    let err = loop {
        match bridge.post(&trade(0, posted), Wake::Lazy) {
            Ok(()) => posted += 1,
            Err(e) => break e,
        }
    };
    assert!(err.is_recoverable());
    assert_eq!(bridge.metrics().overflows, 1);

    drain.drain_once();
    drop(drain);

    assert!(matches!(
        batches[0],
        Event::Error {
            code: ErrorCode::Overflow,
            ..
        }
    ));
    assert_eq!(batches.len(), 1 + posted as usize);
}

#[tokio::test]
async fn test_publish_response_marks_end_and_summarizes() {
    let bridge = Bridge::new(config()).unwrap();
    let mut batches = Vec::new();
    let mut drain = bridge.attach(|b: Vec<Event>| batches.extend(b)).unwrap();

    let posted = bridge
        .publish_response(9, (0..3).map(|n| trade(9, n)))
        .unwrap();
    assert_eq!(posted, 3);

    drain.drain_once();
    drop(drain);

    assert_eq!(batches[0], Event::Success { request: 9, records: 3 });
    let trades = &batches[1..];
    assert_eq!(trades.len(), 3);
    assert!(!trades[0].is_end());
    assert!(!trades[1].is_end());
    assert!(trades[2].is_end());
}

#[tokio::test]
async fn test_empty_response_still_summarized() {
    let bridge = Bridge::new(config()).unwrap();
    let mut batches = Vec::new();
    let mut drain = bridge.attach(|b: Vec<Event>| batches.extend(b)).unwrap();

    assert_eq!(bridge.publish_response(4, Vec::new()).unwrap(), 0);
    drain.drain_once();
    drop(drain);
    assert_eq!(batches, vec![Event::Success { request: 4, records: 0 }]);
}

#[tokio::test]
async fn test_failed_response_reports_error() {
    let bridge = Bridge::new(config().with_main(queue(256))).unwrap();
    let mut batches = Vec::new();
    let mut drain = bridge.attach(|b: Vec<Event>| batches.extend(b)).unwrap();

    let err = bridge
        .publish_response(5, (0..100).map(|n| trade(5, n)))
        .unwrap_err();
    assert!(err.is_recoverable());

    drain.drain_once();
    drop(drain);

    let errors: Vec<_> = batches
        .iter()
        .filter_map(|e| match e {
            Event::Error { code, .. } => Some(*code),
            _ => None,
        })
        .collect();
    // Reported once, with the request it belongs to
    assert_eq!(errors, vec![ErrorCode::ResponseFailed]);
    assert!(matches!(
        &batches[0],
        Event::Error { message, .. } if message.starts_with("request 5:")
    ));
    assert!(!batches.iter().any(|e| matches!(e, Event::Success { .. })));
}

#[tokio::test]
async fn test_shutdown_drains_everything_and_returns_downstream() {
    struct Counter {
        trades: usize,
        batches: usize,
    }

    impl Downstream for Counter {
        type Item = &'static str;

        fn project(&mut self, event: Event) -> &'static str {
            event.kind()
        }

        fn deliver(&mut self, batch: Vec<&'static str>) {
            self.batches += 1;
            self.trades += batch.iter().filter(|k| **k == "trade").count();
        }
    }

    let bridge = Bridge::new(config().with_max_batch(16)).unwrap();
    let drain = bridge.attach(Counter { trades: 0, batches: 0 }).unwrap();
    let signal = drain.shutdown_signal();
    let consumer = tokio::spawn(drain.run());

    for n in 0..100 {
        bridge.post(&trade(0, n), Wake::Lazy).unwrap();
    }
    signal.shutdown();

    let counter = timeout(Duration::from_secs(1), consumer).await.unwrap().unwrap();
    assert_eq!(counter.trades, 100);
    assert!(counter.batches >= 100 / 16);
    assert!(signal.is_drained());
    assert!(matches!(
        bridge.post(&trade(0, 0), Wake::Now),
        Err(DispatchError::ShutDown)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_posts_racing_shutdown_are_delivered_or_refused() {
    const THREADS: u64 = 4;

    for _ in 0..20 {
        let bridge = Bridge::new(
            DispatchConfig::default()
                .with_main(Config::with_buffer_size(1024 * 1024))
                .with_priority(queue(4 * 1024)),
        )
        .unwrap();
        let (downstream, mut rx) = collect();
        let consumer = tokio::spawn(bridge.attach(downstream).unwrap().run());

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let bridge = bridge.clone();
                std::thread::spawn(move || {
                    let mut accepted = 0u64;
                    for n in 0..10_000 {
                        let event = Event::RequestTimeout { request: t << 32 | n };
                        match bridge.post(&event, Wake::Lazy) {
                            Ok(()) => accepted += 1,
                            Err(DispatchError::ShutDown) => break,
                            Err(e) if e.is_recoverable() => std::thread::yield_now(),
                            Err(e) => panic!("unexpected error: {}", e),
                        }
                    }
                    accepted
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(2)).await;
        bridge.shutdown();
        timeout(Duration::from_secs(5), consumer).await.unwrap().unwrap();

        let accepted: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        let mut delivered = 0u64;
        while let Ok(batch) = rx.try_recv() {
            delivered += batch
                .iter()
                .filter(|e| matches!(e, Event::RequestTimeout { .. }))
                .count() as u64;
        }
        assert_eq!(delivered, accepted);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_many_producer_threads() {
    const THREADS: u32 = 4;
    const PER_THREAD: u32 = 2_000;

    let bridge = Bridge::new(
        DispatchConfig::default()
            .with_main(Config::with_buffer_size(1024 * 1024))
            .with_priority(queue(4 * 1024)),
    )
    .unwrap();
    let (downstream, mut rx) = collect();
    let consumer = tokio::spawn(bridge.attach(downstream).unwrap().run());

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let bridge = bridge.clone();
            std::thread::spawn(move || {
                for n in 0..PER_THREAD {
                    let event = trade(u64::from(t), n);
                    while let Err(e) = bridge.post(&event, Wake::Lazy) {
                        assert!(e.is_recoverable());
                        std::thread::yield_now();
                    }
                }
                bridge.signal();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    bridge.shutdown();
    consumer.await.unwrap();

    let mut next = vec![0u32; THREADS as usize];
    while let Ok(batch) = rx.try_recv() {
        for event in batch {
            if let Event::Trade { request, size, .. } = event {
                // Per-producer FIFO
                assert_eq!(size, next[request as usize]);
                next[request as usize] += 1;
            }
        }
    }
    assert!(next.iter().all(|&n| n == PER_THREAD));
}

#[tokio::test]
async fn test_stream_yields_batches_until_shutdown() {
    let bridge = Bridge::new(config()).unwrap();
    let mut stream = bridge.stream().unwrap();

    bridge.post(&Event::ServerTime { time: 1 }, Wake::Now).unwrap();
    let batch = timeout(Duration::from_secs(1), stream.next()).await.unwrap().unwrap();
    assert_eq!(batch, vec![Event::ServerTime { time: 1 }]);

    bridge.post(&Event::RequestTimeout { request: 3 }, Wake::Lazy).unwrap();
    bridge.shutdown();

    let mut rest = Vec::new();
    while let Some(batch) = timeout(Duration::from_secs(1), stream.next()).await.unwrap() {
        rest.extend(batch);
    }
    assert!(rest.contains(&Event::RequestTimeout { request: 3 }));
}
