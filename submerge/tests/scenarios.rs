//! End-to-end scenario coverage, driven against real `Controller`s talking
//! over real TCP sockets on localhost — the same `NET_DELAY`/`CATCHUP_WINDOW`
//! timing a manual test run would see, not a sped-up simulation of it.

use std::collections::BTreeMap;
use std::fs;
use std::net::TcpListener;
use std::time::{Duration, Instant};

use submerge::{ConsoleReply, Handle};
use submerge_net::{NodeID, PeerConfig};

/// Binds an ephemeral port and immediately releases it so `PeerConfig` can
/// name it. Racy in the general case, but fine for a self-contained test
/// cluster that both binds and connects within the same process.
fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

fn write_peer_config(dir: &std::path::Path, ports: &[u16; 5]) -> PeerConfig {
    let mut toml = String::new();
    for (i, port) in ports.iter().enumerate() {
        toml.push_str(&format!(
            "[[peer]]\nid = {}\nhost = \"127.0.0.1\"\nport = {}\n\n",
            i + 1,
            port
        ));
    }
    let path = dir.join("peers.toml");
    fs::write(&path, toml).unwrap();
    PeerConfig::load(&path).unwrap()
}

struct Cluster {
    _root: tempfile::TempDir,
    handles: BTreeMap<NodeID, Handle>,
}

impl Cluster {
    fn spawn() -> Cluster {
        let root = tempfile::tempdir().unwrap();
        let ports = [free_port(), free_port(), free_port(), free_port(), free_port()];
        let peers = write_peer_config(root.path(), &ports);

        let mut handles = BTreeMap::new();
        for id in NodeID::all() {
            let data_dir = root.path().join(format!("node-{id}"));
            fs::create_dir_all(&data_dir).unwrap();
            let handle = submerge::spawn_node(id, peers.clone(), &data_dir).unwrap();
            handles.insert(id, handle);
        }
        Cluster { _root: root, handles }
    }

    fn handle(&self, id: i64) -> &Handle {
        self.handles.get(&NodeID(id)).unwrap()
    }

    fn balances_on(&self, id: i64) -> BTreeMap<NodeID, u64> {
        match self.handle(id).read_balances() {
            ConsoleReply::Balances(b) => b,
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    fn depth_on(&self, id: i64) -> usize {
        match self.handle(id).read_ledger() {
            ConsoleReply::Blockchain(chain) => chain.len(),
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}

fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(200));
    }
    predicate()
}

/// A single sequential transfer commits and every node's balances converge
/// to reflect it.
#[test]
fn sequential_transfer_converges_on_every_node() {
    let cluster = Cluster::spawn();
    let reply = cluster.handle(1).submit_transfer(NodeID(2), 30);
    assert_eq!(reply, ConsoleReply::Ok);

    let converged = wait_until(Duration::from_secs(30), || (1..=5).all(|id| cluster.depth_on(id) == 1));
    assert!(converged, "ledger did not converge to depth 1 on every node");

    for id in 1..=5 {
        let balances = cluster.balances_on(id);
        assert_eq!(balances[&NodeID(1)], 70, "node {id}");
        assert_eq!(balances[&NodeID(2)], 130, "node {id}");
        assert_eq!(balances[&NodeID(3)], 100, "node {id}");
        assert_eq!(balances[&NodeID(4)], 100, "node {id}");
        assert_eq!(balances[&NodeID(5)], 100, "node {id}");
    }
}

/// An over-large transfer is rejected locally before it ever reaches Paxos;
/// nothing about the ledger changes anywhere.
#[test]
fn insufficient_funds_is_rejected_without_touching_the_ledger() {
    let cluster = Cluster::spawn();
    let reply = cluster.handle(1).submit_transfer(NodeID(2), 150);
    assert_eq!(reply, ConsoleReply::Error("insufficient funds".to_owned()));

    std::thread::sleep(Duration::from_secs(4));
    for id in 1..=5 {
        assert_eq!(cluster.depth_on(id), 0, "node {id}");
        assert_eq!(cluster.balances_on(id)[&NodeID(1)], 100, "node {id}");
    }
}

/// `submitTransfer` while `FAILED` is rejected locally and never reaches
/// the Paxos engine. Purely local, so no NET_DELAY to wait out.
#[test]
fn submit_transfer_is_rejected_while_failed() {
    let cluster = Cluster::spawn();
    cluster.handle(3).fail();
    let reply = cluster.handle(3).submit_transfer(NodeID(4), 10);
    assert_eq!(reply, ConsoleReply::Error("node is in FAILED mode".to_owned()));
    assert_eq!(cluster.depth_on(3), 0);
}

/// A node that fails, misses a commit made while it was down, and then
/// recovers lands on the same chain as its peers within one `CATCHUP_WINDOW`.
#[test]
fn recovering_node_catches_up_to_a_commit_it_missed() {
    let cluster = Cluster::spawn();

    assert_eq!(cluster.handle(1).submit_transfer(NodeID(2), 30), ConsoleReply::Ok);
    assert!(wait_until(Duration::from_secs(30), || (1..=5).all(|id| cluster.depth_on(id) == 1)));

    cluster.handle(3).fail();

    assert_eq!(cluster.handle(2).submit_transfer(NodeID(4), 20), ConsoleReply::Ok);
    assert!(wait_until(Duration::from_secs(30), || [1, 2, 4, 5]
        .iter()
        .all(|&id| cluster.depth_on(id) == 2)));

    cluster.handle(3).recover();
    assert!(wait_until(submerge::CATCHUP_WINDOW + Duration::from_secs(10), || cluster.depth_on(3) == 2));

    for id in 1..=5 {
        let balances = cluster.balances_on(id);
        assert_eq!(balances[&NodeID(1)], 70, "node {id}");
        assert_eq!(balances[&NodeID(2)], 110, "node {id}");
        assert_eq!(balances[&NodeID(3)], 100, "node {id}");
        assert_eq!(balances[&NodeID(4)], 120, "node {id}");
        assert_eq!(balances[&NodeID(5)], 100, "node {id}");
    }
}

fn conservation_holds(balances: &BTreeMap<NodeID, u64>) -> bool {
    balances.values().sum::<u64>() == 100 * 5
}

/// Three nodes submit distinct transfers within the same `NET_DELAY` window.
/// Paxos serializes them into one order; every node converges on the exact
/// same order, and the ledger stays balanced throughout.
#[test]
fn concurrent_proposers_serialize_into_one_agreed_order() {
    let cluster = Cluster::spawn();

    assert_eq!(cluster.handle(1).submit_transfer(NodeID(2), 10), ConsoleReply::Ok);
    assert_eq!(cluster.handle(3).submit_transfer(NodeID(4), 15), ConsoleReply::Ok);
    assert_eq!(cluster.handle(5).submit_transfer(NodeID(1), 20), ConsoleReply::Ok);

    let converged = wait_until(Duration::from_secs(60), || (1..=5).all(|id| cluster.depth_on(id) == 3));
    assert!(converged, "cluster did not converge to depth 3");

    let reference_chain = match cluster.handle(1).read_ledger() {
        ConsoleReply::Blockchain(chain) => chain,
        other => panic!("unexpected reply: {other:?}"),
    };
    for id in 2..=5 {
        let chain = match cluster.handle(id).read_ledger() {
            ConsoleReply::Blockchain(chain) => chain,
            other => panic!("unexpected reply: {other:?}"),
        };
        assert_eq!(chain, reference_chain, "node {id} disagrees on block order");
    }

    for id in 1..=5 {
        let balances = cluster.balances_on(id);
        assert!(conservation_holds(&balances), "node {id} balances: {balances:?}");
    }
}

/// A leader fails immediately after submitting, before its round can reach
/// DECIDE anywhere. A surviving node can still submit and commit within one
/// `PROPOSAL_TIMEOUT`, and every `RUNNING` node agrees on the result —
/// whether or not the crashed leader's own transfer made it in.
#[test]
fn leader_crash_mid_consensus_does_not_stall_survivors() {
    let cluster = Cluster::spawn();

    assert_eq!(cluster.handle(1).submit_transfer(NodeID(2), 30), ConsoleReply::Ok);
    cluster.handle(1).fail();

    assert_eq!(cluster.handle(2).submit_transfer(NodeID(3), 25), ConsoleReply::Ok);

    let survivors = [2, 3, 4, 5];
    let converged = wait_until(Duration::from_secs(45), || {
        let depths: Vec<usize> = survivors.iter().map(|&id| cluster.depth_on(id)).collect();
        depths.iter().all(|d| *d == depths[0]) && depths[0] >= 1
    });
    assert!(converged, "surviving nodes never agreed on a common depth");

    let reference_chain = match cluster.handle(2).read_ledger() {
        ConsoleReply::Blockchain(chain) => chain,
        other => panic!("unexpected reply: {other:?}"),
    };
    for &id in &survivors[1..] {
        let chain = match cluster.handle(id).read_ledger() {
            ConsoleReply::Blockchain(chain) => chain,
            other => panic!("unexpected reply: {other:?}"),
        };
        assert_eq!(chain, reference_chain, "node {id} disagrees with node 2");
    }
    for &id in &survivors {
        assert!(conservation_holds(&cluster.balances_on(id)));
    }
}

/// Two nodes fail, leaving exactly a quorum of three. Both pending transfers
/// still commit; once the failed pair recovers, they catch up to the same
/// depth and balances as everyone else.
#[test]
fn two_node_failure_preserves_quorum_and_both_recover() {
    let cluster = Cluster::spawn();

    cluster.handle(4).fail();
    cluster.handle(5).fail();

    assert_eq!(cluster.handle(1).submit_transfer(NodeID(2), 30), ConsoleReply::Ok);
    assert!(wait_until(Duration::from_secs(30), || [1, 2, 3]
        .iter()
        .all(|&id| cluster.depth_on(id) == 1)));

    assert_eq!(cluster.handle(2).submit_transfer(NodeID(3), 20), ConsoleReply::Ok);
    assert!(wait_until(Duration::from_secs(30), || [1, 2, 3]
        .iter()
        .all(|&id| cluster.depth_on(id) == 2)));

    cluster.handle(4).recover();
    cluster.handle(5).recover();

    let recovered = wait_until(submerge::CATCHUP_WINDOW + Duration::from_secs(10), || {
        cluster.depth_on(4) == 2 && cluster.depth_on(5) == 2
    });
    assert!(recovered, "nodes 4 and 5 never caught up to depth 2");

    for id in 1..=5 {
        let balances = cluster.balances_on(id);
        assert_eq!(balances[&NodeID(1)], 70, "node {id}");
        assert_eq!(balances[&NodeID(2)], 110, "node {id}");
        assert_eq!(balances[&NodeID(3)], 120, "node {id}");
        assert_eq!(balances[&NodeID(4)], 100, "node {id}");
        assert_eq!(balances[&NodeID(5)], 100, "node {id}");
    }
}
