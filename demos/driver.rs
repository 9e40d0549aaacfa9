//! Example Driver
//!
//! Starts a conductor on its own thread, then plays a receiver thread that
//! discovers a few inbound streams, lets them run briefly and retires them.
//!
//! Run with `RUST_LOG=debug` to watch lingering and reclamation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use venom_driver::log_buffer::TERM_MIN_LENGTH;
use venom_driver::{Driver, DriverConductor, DriverConfig, SystemCounters};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let dir = std::env::args()
        .nth(1)
        .map(Into::into)
        .unwrap_or_else(|| std::env::temp_dir().join("venom-driver-demo"));

    let config = DriverConfig::default()
        .with_dir(dir)
        .with_linger_timeout(Duration::from_millis(200))
        .with_dir_delete_on_start(true)
        .with_dir_delete_on_shutdown(true);

    let control: SocketAddr = "127.0.0.1:40123".parse().expect("valid address");
    let mut conductor = match DriverConductor::new(config, Arc::new(SystemCounters::new())) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[Driver] Failed to start conductor: {}", e);
            std::process::exit(1);
        }
    };
    let endpoint = conductor.add_receive_endpoint("127.0.0.1:40123", control);

    let driver = match Driver::start(conductor) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("[Driver] Failed to start conductor thread: {}", e);
            std::process::exit(1);
        }
    };

    let proxy = driver.proxy();
    let receiver = thread::spawn(move || {
        for session_id in 1..=3 {
            let source: SocketAddr = format!("127.0.0.1:{}", 50000 + session_id)
                .parse()
                .expect("valid address");
            proxy.on_create_publication_image(
                session_id,
                1001,
                0,
                0,
                0,
                TERM_MIN_LENGTH,
                1408,
                control,
                source,
                endpoint,
            );
        }
        thread::sleep(Duration::from_millis(100));

        proxy.on_re_resolve_control("127.0.0.1:40123", endpoint, control);
        for correlation_id in 1..=3 {
            proxy.on_remove_publication_image(correlation_id);
        }
    });

    if receiver.join().is_err() {
        eprintln!("[Driver] Receiver thread panicked");
    }
    thread::sleep(Duration::from_millis(500));

    let stats = driver.counters().snapshot();
    match driver.close() {
        Ok(_) => println!("[Driver] Shut down cleanly"),
        Err(e) => eprintln!("[Driver] Shutdown failed: {}", e),
    }
    println!("[Driver] {:#?}", stats);
}
