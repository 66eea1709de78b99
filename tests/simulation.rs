//! Full-stack simulation tests: stations with complete protocol stacks
//! exchanging files over the shared hub.

use std::time::Duration;

use datalink_sim::config::Config;
use datalink_sim::medium::{Hub, Interference};
use datalink_sim::node::Node;

fn station_config(number: u8) -> Config {
    let mut config = Config::default();
    config.mac_address = [0x02, 0, 0, 0, 0, number];
    config.link_timeout_ms = 100;
    config.link_max_buffered_frames = 4;
    config.network_packet_size = 128;
    config
}

/// Deterministic file contents for one station.
fn file_bytes(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

async fn wait_for_files(nodes: &[Node], total: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    loop {
        let received: usize = nodes.iter().map(|n| n.received_file_count()).sum();
        if received >= total && nodes.iter().all(|n| n.sending_finished()) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "transfer did not complete: {received}/{total} file(s) received"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn two_stations_transfer_a_file() {
    let mut hub = Hub::new(64, Interference::None);
    let mut a = Node::new(&station_config(1), None);
    let mut b = Node::new(&station_config(2), None);
    a.start(&hub);
    b.start(&hub);
    hub.start();

    let contents = file_bytes(7, 4096);
    assert!(a.send_file(b.address(), "report.bin".into(), contents.clone()));

    let nodes = [a, b];
    wait_for_files(&nodes, 1).await;

    let [mut a, mut b] = nodes;
    let files = b.received_files();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "report.bin");
    assert_eq!(files[0].from, a.address());
    assert_eq!(files[0].data, contents, "file corrupted in transit");
    assert_eq!(a.received_file_count(), 0);

    a.stop().await;
    b.stop().await;
    hub.stop().await;
}

#[tokio::test]
async fn noisy_medium_recovers_with_crc() {
    // One payload in five is damaged; CRC-32 rejects them and the ARQ
    // retransmits until everything is across.
    let mut base = station_config(0);
    base.hub_noise = 1;
    base.hub_noise_frequency = 20;
    base.hub_noise_byte_error_frequency = 2;
    base.hub_noise_seed = 0xda7a;
    base.physical_coder = 2;

    let mut hub = Hub::new(64, Interference::from_config(&base));
    let mut config_a = base.clone();
    config_a.mac_address = [0x02, 0, 0, 0, 0, 1];
    let mut config_b = base;
    config_b.mac_address = [0x02, 0, 0, 0, 0, 2];

    let mut a = Node::new(&config_a, None);
    let mut b = Node::new(&config_b, None);
    a.start(&hub);
    b.start(&hub);
    hub.start();

    let contents = file_bytes(42, 2048);
    assert!(a.send_file(b.address(), "noisy.bin".into(), contents.clone()));

    let nodes = [a, b];
    wait_for_files(&nodes, 1).await;

    let [mut a, mut b] = nodes;
    let files = b.received_files();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].data, contents, "ARQ must mask medium corruption");

    a.stop().await;
    b.stop().await;
    hub.stop().await;
}

#[tokio::test]
async fn three_stations_round_robin() {
    // Every station hears every transmission on the hub; the address
    // filter must keep each file on its intended path.
    let mut hub = Hub::new(64, Interference::None);
    let mut nodes: Vec<Node> = (1..=3)
        .map(|i| Node::new(&station_config(i), None))
        .collect();
    for node in &mut nodes {
        node.start(&hub);
    }
    hub.start();

    let payloads: Vec<Vec<u8>> = (0..3).map(|i| file_bytes(i as u8, 1500)).collect();
    for i in 0..3 {
        let to = nodes[(i + 1) % 3].address();
        assert!(nodes[i].send_file(to, format!("ring{i}.bin"), payloads[i].clone()));
    }

    wait_for_files(&nodes, 3).await;

    for i in 0..3 {
        let receiver = &nodes[(i + 1) % 3];
        let files = receiver.received_files();
        assert_eq!(files.len(), 1, "station {} must receive exactly one file", i + 1);
        assert_eq!(files[0].name, format!("ring{i}.bin"));
        assert_eq!(files[0].from, nodes[i].address());
        assert_eq!(files[0].data, payloads[i]);
    }

    for node in &mut nodes {
        node.stop().await;
    }
    hub.stop().await;
}
