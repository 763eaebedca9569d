use slotring_rs::{Config, Queue};
use std::thread;
use std::time::Instant;

/// Fixed-layout record written straight into its slot.
const RECORD_LEN: usize = 8 + 8 + 48;

fn main() {
    println!("slotring Zero-Copy Example");
    println!("==========================\n");

    let config = Config::with_buffer_size(1 << 20).with_metrics(true);
    let queue = Queue::new(config).unwrap();
    let mut consumer = queue.consumer().unwrap();

    const N_PRODUCERS: u64 = 4;
    const RECORDS: u64 = 250_000;

    println!("Configuration:");
    println!("  Buffer: {} bytes", config.capacity());
    println!("  Producers: {}", N_PRODUCERS);
    println!("  Records per producer: {}", RECORDS);
    println!("  Payload: {} bytes\n", RECORD_LEN);

    let start = Instant::now();
    let mut checksum = 0u64;

    thread::scope(|s| {
        for id in 0..N_PRODUCERS {
            let queue = &queue;
            s.spawn(move || {
                let mut seq = 0;
                while seq < RECORDS {
                    let Ok(mut claim) = queue.allocate(RECORD_LEN) else {
                        thread::yield_now();
                        continue;
                    };
                    // Write directly into the ring buffer
                    let buf = claim.payload_mut();
                    buf[..8].copy_from_slice(&id.to_le_bytes());
                    buf[8..16].copy_from_slice(&seq.to_le_bytes());
                    buf[16..].fill(id as u8);
                    claim.commit();
                    seq += 1;
                }
            });
        }

        let mut received = 0;
        while received < N_PRODUCERS * RECORDS {
            let n = consumer.consume_up_to(1024, |payload| {
                let mut seq = [0u8; 8];
                seq.copy_from_slice(&payload[8..16]);
                checksum = checksum.wrapping_add(u64::from_le_bytes(seq));
            });
            if n == 0 {
                thread::yield_now();
            }
            received += n as u64;
        }
    });

    let elapsed = start.elapsed();
    let total = N_PRODUCERS * RECORDS;
    let m = queue.metrics();

    println!("Results:");
    println!("  Records: {}", total);
    println!("  Checksum: {}", checksum);
    println!("  Time: {:.2?}", elapsed);
    println!("  Throughput: {:.2} M records/sec", total as f64 / elapsed.as_secs_f64() / 1e6);
    println!("  Fragments: {}, retries: {}, overflows: {}", m.fragments, m.retries, m.overflows);

    let expected = N_PRODUCERS * (RECORDS * (RECORDS - 1) / 2);
    assert_eq!(checksum, expected);
}
