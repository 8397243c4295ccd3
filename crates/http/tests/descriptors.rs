//! Runs alone in its own process so no other test opens descriptors meanwhile.

use std::fs;
use std::thread;
use std::time::{Duration, Instant};

use micro_http::client::{HttpClient, HttpClientConfig};
use micro_reactor::{Endpoint, EndpointConfig};

fn open_descriptors() -> usize {
    fs::read_dir("/proc/self/fd").unwrap().count()
}

#[test]
fn test_dropped_clients_release_their_descriptors() {
    let endpoint = Endpoint::new(EndpointConfig::new("client-fds").num_threads(2)).unwrap();
    endpoint.spinup_with_config().unwrap();
    let before = open_descriptors();

    for _ in 0..50 {
        let client = HttpClient::new(&endpoint.handle(), "http://127.0.0.1:9", HttpClientConfig::new().num_parallel(2)).unwrap();
        drop(client);
    }

    // sockets and queues close on the workers, timers go away with the client
    let deadline = Instant::now() + Duration::from_secs(10);
    while endpoint.num_connections() > 0 || open_descriptors() > before {
        assert!(Instant::now() < deadline, "{} transports, {} descriptors over {before}", endpoint.num_connections(), open_descriptors().saturating_sub(before));
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(open_descriptors(), before);

    endpoint.shutdown();
}
