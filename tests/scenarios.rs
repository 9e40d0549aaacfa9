use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use venom_driver::clock::MonotonicClock;
use venom_driver::log_buffer::TERM_MIN_LENGTH;
use venom_driver::mapped_file::page_size;
use venom_driver::mpsc_queue;
use venom_driver::{
    ConductorProxy, Driver, DriverCommand, DriverConductor, DriverConfig, MappedRegion, Resource,
    SystemCounters,
};

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

#[test]
fn created_regions_read_back_as_zero() {
    let dir = tempfile::tempdir().unwrap();
    let page = page_size();

    for (i, (offset_pages, length)) in [(0, 1), (0, page * 3), (1, page), (4, 100), (2, page + 1)]
        .into_iter()
        .enumerate()
    {
        let path = dir.path().join(format!("zero-{i}"));
        let offset = (offset_pages * page) as u64;

        let _writer = MappedRegion::create_new(&path, offset, length).unwrap();
        let reader = MappedRegion::map_existing(&path, offset, length, true).unwrap();
        assert_eq!(reader.memory_size(), length);

        let mut buf = vec![0xEEu8; length];
        reader.read_bytes(0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0), "case {i} not zero-filled");
    }
}

#[test]
fn write_visible_through_independent_read_only_mapping() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("buf-1");

    let writer = MappedRegion::create_new(&path, 0, 65536).unwrap();
    let reader = MappedRegion::map_existing_read_only(&path).unwrap();
    assert_eq!(reader.memory_size(), 65536);

    writer.write_bytes(100, &[0xAB]).unwrap();

    let mut byte = [0u8; 1];
    reader.read_bytes(100, &mut byte).unwrap();
    assert_eq!(byte[0], 0xAB);

    let pattern: Vec<u8> = (0..=255).collect();
    writer.write_bytes(4096, &pattern).unwrap();
    let mut copy = vec![0u8; pattern.len()];
    reader.read_bytes(4096, &mut copy).unwrap();
    assert_eq!(copy, pattern);
}

#[test]
fn contended_offers_are_counted_and_drained_once() {
    const PRODUCERS: i64 = 3;
    const PER_PRODUCER: i64 = 1000;

    let (producer, mut consumer) = mpsc_queue::channel::<DriverCommand>(64);
    let counters = Arc::new(SystemCounters::new());
    let proxy = ConductorProxy::new(producer, Arc::clone(&counters));
    let start = Arc::new(Barrier::new(PRODUCERS as usize + 1));
    let done = Arc::new(AtomicBool::new(false));

    let drainer = {
        let done = Arc::clone(&done);
        let start = Arc::clone(&start);
        thread::spawn(move || {
            let mut seen = Vec::new();
            start.wait();
            loop {
                let finished = done.load(Ordering::Acquire);
                consumer.drain(
                    |command| match command {
                        DriverCommand::RemovePublicationImage { correlation_id } => {
                            seen.push(correlation_id)
                        }
                        other => panic!("unexpected {other:?}"),
                    },
                    16,
                );
                assert!(consumer.len() <= consumer.capacity());
                if finished && consumer.is_empty() {
                    return seen;
                }
            }
        })
    };

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let proxy = proxy.clone();
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                (0..PER_PRODUCER)
                    .filter(|i| proxy.on_remove_publication_image(p * PER_PRODUCER + i))
                    .count() as i64
            })
        })
        .collect();

    let successes: i64 = producers.into_iter().map(|h| h.join().unwrap()).sum();
    done.store(true, Ordering::Release);
    let seen = drainer.join().unwrap();

    assert_eq!(successes + proxy.fail_count(), PRODUCERS * PER_PRODUCER);
    assert_eq!(seen.len() as i64, successes);

    let unique: HashSet<i64> = seen.iter().copied().collect();
    assert_eq!(unique.len(), seen.len(), "a record was drained twice");

    // Per-producer order survives the interleaving
    for p in 0..PRODUCERS {
        let own: Vec<i64> = seen
            .iter()
            .copied()
            .filter(|id| id / PER_PRODUCER == p)
            .collect();
        assert!(own.windows(2).all(|w| w[0] < w[1]));
    }
}

#[test]
fn lingering_region_survives_grace_period_then_unmaps() {
    let dir = tempfile::tempdir().unwrap();
    let config = DriverConfig::default()
        .with_dir(dir.path().join("driver"))
        .with_linger_timeout(Duration::from_millis(50));
    let mut conductor = DriverConductor::new(config, Arc::new(SystemCounters::new()))
        .unwrap()
        .with_clock(MonotonicClock::new());
    let endpoint = conductor.add_receive_endpoint("rcv", addr("127.0.0.1:4000"));
    let proxy = conductor.proxy();

    proxy.on_create_publication_image(
        1,
        1,
        0,
        0,
        0,
        TERM_MIN_LENGTH,
        1408,
        addr("127.0.0.1:4000"),
        addr("127.0.0.1:4001"),
        endpoint,
    );
    conductor.do_work();
    let log_buffer = conductor.images().next().unwrap().log_buffer();
    let log_path = conductor.log_buffer(log_buffer).unwrap().path().to_path_buf();

    let raw = MappedRegion::create_new(dir.path().join("raw"), 0, 4096).unwrap();
    proxy.on_delete_cmd(Resource::Region(raw)).unwrap();
    assert!(proxy.on_linger_buffer(log_buffer));

    let retired_at = Instant::now();
    conductor.do_work();
    assert_eq!(conductor.lingering_count(), 2);

    thread::sleep(Duration::from_millis(10));
    conductor.do_work();
    assert_eq!(conductor.lingering_count(), 2);
    assert!(log_path.exists());

    while retired_at.elapsed() < Duration::from_millis(200) {
        conductor.do_work();
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(conductor.lingering_count(), 0);
    assert!(!log_path.exists());
}

#[test]
fn dedicated_driver_serves_many_producer_threads() {
    const THREADS: i32 = 4;
    const IMAGES_PER_THREAD: i32 = 5;

    let dir = tempfile::tempdir().unwrap();
    let config = DriverConfig::default()
        .with_dir(dir.path())
        .with_linger_timeout(Duration::from_millis(20));
    let mut conductor = DriverConductor::new(config, Arc::new(SystemCounters::new())).unwrap();
    let endpoint = conductor.add_receive_endpoint("rcv", addr("127.0.0.1:4000"));

    let driver = Driver::start(conductor).unwrap();
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let proxy = driver.proxy();
            thread::spawn(move || {
                for i in 0..IMAGES_PER_THREAD {
                    while !proxy.on_create_publication_image(
                        t * 100 + i,
                        1,
                        0,
                        0,
                        0,
                        TERM_MIN_LENGTH,
                        1408,
                        addr("127.0.0.1:4000"),
                        addr("127.0.0.1:5000"),
                        endpoint,
                    ) {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let expected = (THREADS * IMAGES_PER_THREAD) as u64;
    let deadline = Instant::now() + Duration::from_secs(10);
    while driver.counters().snapshot().images_created < expected {
        assert!(Instant::now() < deadline, "images were not created in time");
        thread::sleep(Duration::from_millis(1));
    }

    let conductor = driver.close().unwrap();
    assert_eq!(conductor.images().count(), 0);
    assert_eq!(conductor.counters().snapshot().commands_rejected, 0);
}
