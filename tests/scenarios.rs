//! The six literal end-to-end scenarios from spec.md §8, each built on
//! [`common::World`] the way the teacher's own `src/test/tests.rs` builds
//! scenario tests on `test::simulator::Simulation`.
use std::net::Ipv4Addr;

use nat_traverse::peer::{Config, Event, Liveness, NatType};

mod common;
use common::World;

/// 1. Easy/Easy: both peers behind independently-keyed NATs. A single
/// `retryPing` from each side suffices; both end up `Active`.
#[test]
fn easy_easy_peers_become_active_after_intro() {
    let mut w = World::new(1);
    let nat_a = w.easy_nat(Ipv4Addr::new(5, 5, 5, 5));
    let host_a = w.host(nat_a, Ipv4Addr::new(10, 0, 0, 1));
    let nat_b = w.easy_nat(Ipv4Addr::new(5, 5, 6, 6));
    let host_b = w.host(nat_b, Ipv4Addr::new(10, 0, 1, 1));

    let cfg = common::leaf_config();
    let a = w.spawn(host_a, cfg.clone());
    let b = w.spawn(host_b, cfg);
    w.run_ms(200);

    assert_eq!(w.sim.peer(host_a).unwrap().nat(), NatType::Easy);
    assert_eq!(w.sim.peer(host_b).unwrap().nat(), NatType::Easy);

    w.sim.call_peer(host_a, |peer, _now| peer.intro(b, None));
    w.run_ms(200);

    let now = w.sim.elapsed_ms();
    assert_eq!(
        w.sim.peer(host_a).unwrap().peer(&b).unwrap().liveness(now),
        Liveness::Active
    );
    assert_eq!(
        w.sim.peer(host_b).unwrap().peer(&a).unwrap().liveness(now),
        Liveness::Active
    );
}

/// 2. Static↔Easy: the Easy side's single ping succeeds against a
/// directly-reachable Static peer, which replies without any traversal.
#[test]
fn static_and_easy_peer_connect_with_a_single_ping() {
    let mut w = World::new(2);
    let public = w.public;
    let host_a = w.host(public, Ipv4Addr::new(1, 0, 0, 3));
    let nat_b = w.easy_nat(Ipv4Addr::new(5, 5, 6, 6));
    let host_b = w.host(nat_b, Ipv4Addr::new(10, 0, 1, 1));

    let cfg = common::leaf_config();
    let a = w.spawn(host_a, cfg.clone());
    let b = w.spawn(host_b, cfg);
    w.run_ms(200);

    assert_eq!(w.sim.peer(host_a).unwrap().nat(), NatType::Static);
    assert_eq!(w.sim.peer(host_b).unwrap().nat(), NatType::Easy);

    w.sim.call_peer(host_a, |peer, _now| peer.intro(b, None));
    w.run_ms(200);

    let now = w.sim.elapsed_ms();
    assert_eq!(
        w.sim.peer(host_a).unwrap().peer(&b).unwrap().liveness(now),
        Liveness::Active
    );
    assert_eq!(
        w.sim.peer(host_b).unwrap().peer(&a).unwrap().liveness(now),
        Liveness::Active
    );
}

/// 3. Easy/Hard BDP: the Easy side scans random destination ports toward
/// the Hard side's public endpoint while the Hard side opens up to 256
/// fresh local ports toward the Easy side's known endpoint. With the
/// ephemeral search space narrowed to a few hundred ports (`leaf_config`),
/// the birthday-paradox overlap is large enough that this test is not
/// flaky: every candidate port in range gets tried well before the
/// simulated deadline, and the Hard side's 256 open ports are a strict
/// subset of that range.
#[test]
fn easy_hard_birthday_paradox_traversal_succeeds() {
    let mut w = World::new(3);
    let nat_a = w.easy_nat(Ipv4Addr::new(5, 5, 5, 5));
    let host_a = w.host(nat_a, Ipv4Addr::new(10, 0, 0, 1));
    let nat_b = w.hard_nat(Ipv4Addr::new(6, 6, 6, 6));
    let host_b = w.host(nat_b, Ipv4Addr::new(10, 0, 2, 1));

    let cfg = common::leaf_config();
    let a = w.spawn(host_a, cfg.clone());
    let b = w.spawn(host_b, cfg);
    w.run_ms(200);

    assert_eq!(w.sim.peer(host_a).unwrap().nat(), NatType::Easy);
    assert_eq!(w.sim.peer(host_b).unwrap().nat(), NatType::Hard);

    w.sim.call_peer(host_a, |peer, _now| peer.intro(b, None));
    // bdp_port_range has 401 candidates at a 10ms cadence: every candidate
    // is guaranteed to be tried within ~4.1s, well inside this budget.
    w.run_ms(6_000);

    let now = w.sim.elapsed_ms();
    assert_eq!(
        w.sim.peer(host_a).unwrap().peer(&b).unwrap().liveness(now),
        Liveness::Active
    );
    assert_eq!(
        w.sim.peer(host_b).unwrap().peer(&a).unwrap().liveness(now),
        Liveness::Active
    );
}

/// 4. Hard/Hard: traversal cannot succeed by hole-punching. Neither side
/// ever exchanges a packet with the other, and both mark the attempt
/// failed.
#[test]
fn hard_hard_pairing_fails_without_exchanging_traffic() {
    let mut w = World::new(4);
    let nat_a = w.hard_nat(Ipv4Addr::new(7, 7, 7, 7));
    let host_a = w.host(nat_a, Ipv4Addr::new(10, 0, 3, 1));
    let nat_b = w.hard_nat(Ipv4Addr::new(8, 8, 8, 8));
    let host_b = w.host(nat_b, Ipv4Addr::new(10, 0, 4, 1));

    let cfg = common::leaf_config();
    let a = w.spawn(host_a, cfg.clone());
    let b = w.spawn(host_b, cfg);
    w.run_ms(200);

    assert_eq!(w.sim.peer(host_a).unwrap().nat(), NatType::Hard);
    assert_eq!(w.sim.peer(host_b).unwrap().nat(), NatType::Hard);

    w.sim.call_peer(host_a, |peer, _now| peer.intro(b, None));
    w.run_ms(3_000);

    assert!(w.sim.peer(host_a).unwrap().peer(&b).unwrap().last_recv.is_none());
    assert!(w.sim.peer(host_b).unwrap().peer(&a).unwrap().last_recv.is_none());

    let a_events: Vec<_> = w.sim.events(host_a).collect();
    let b_events: Vec<_> = w.sim.events(host_b).collect();
    assert!(
        a_events.contains(&Event::TraversalFailed { target: b }),
        "expected a TraversalFailed event on A: {a_events:?}"
    );
    assert!(
        b_events.contains(&Event::TraversalFailed { target: a }),
        "expected a TraversalFailed event on B: {b_events:?}"
    );
}

/// 5. Same-NAT: two peers behind the same Easy NAT converge on each
/// other's local endpoints via a relayed `MsgLocal`, rather than hole
/// punching through their shared public address.
#[test]
fn same_nat_peers_converge_on_local_endpoints() {
    let mut w = World::new(5);
    let nat_ab = w.easy_nat(Ipv4Addr::new(5, 5, 5, 5));
    let host_a = w.host(nat_ab, Ipv4Addr::new(10, 0, 0, 1));
    let host_b = w.host(nat_ab, Ipv4Addr::new(10, 0, 0, 2));

    let cfg = common::leaf_config();
    let a = w.spawn(host_a, cfg.clone());
    let b = w.spawn(host_b, cfg);
    w.run_ms(200);

    assert_eq!(w.sim.peer(host_a).unwrap().nat(), NatType::Easy);
    assert_eq!(w.sim.peer(host_b).unwrap().nat(), NatType::Easy);
    assert_eq!(
        w.sim.peer(host_a).unwrap().public_endpoint(),
        w.sim.peer(host_b).unwrap().public_endpoint(),
        "both peers share the same NAT's public endpoint"
    );

    w.sim.call_peer(host_a, |peer, _now| peer.intro(b, None));
    w.run_ms(300);

    let record_b_on_a = w.sim.peer(host_a).unwrap().peer(&b).unwrap();
    assert_eq!(record_b_on_a.address, Ipv4Addr::new(10, 0, 0, 2));
    let record_a_on_b = w.sim.peer(host_b).unwrap().peer(&a).unwrap();
    assert_eq!(record_a_on_b.address, Ipv4Addr::new(10, 0, 0, 1));
}

/// 6. Sleep/wake catch-up: a peer that sleeps through several missed
/// keepalive ticks fires exactly one collapsed tick on waking, re-pings
/// every known peer, and reclassifies it back to `Active` once the pong
/// returns. Mid-sleep, the silent peer is classified `Missing` purely by
/// the elapsed-time formula (no tick needs to run for that to be true).
#[test]
fn sleeping_peer_collapses_missed_keepalives_into_one_tick() {
    let mut w = World::new(6);
    let public = w.public;
    let host_a = w.host(public, Ipv4Addr::new(1, 0, 0, 5));
    let host_b = w.host(public, Ipv4Addr::new(1, 0, 0, 6));

    let keep_alive = nat_traverse::peer::config::keep_alive_timeout();
    let cfg_a = Config {
        keep_alive: Some(keep_alive),
        ..common::leaf_config()
    };
    let cfg_b = common::leaf_config();

    let a = w.spawn(host_a, cfg_a);
    let b = w.spawn(host_b, cfg_b);
    w.run_ms(100);

    let b_addr = Ipv4Addr::new(1, 0, 0, 6);
    let b_port = nat_traverse::peer::config::LOCAL_PORT;
    w.sim.call_peer(host_a, |peer, now| peer.add_peer(b, b_addr, b_port, now));
    w.run_ms(100);

    let now = w.sim.elapsed_ms();
    assert_eq!(
        w.sim.peer(host_a).unwrap().peer(&b).unwrap().liveness(now),
        Liveness::Active
    );

    // Sleep through 3x the keepalive interval (spec.md §8 scenario 6).
    w.sim.sleep(host_a);
    w.run_ms(100_000);

    let now = w.sim.elapsed_ms();
    assert_eq!(
        w.sim.peer(host_a).unwrap().peer(&b).unwrap().liveness(now),
        Liveness::Missing,
        "B should look Missing to A purely from elapsed time, before any tick runs"
    );

    let wake_at = w.sim.now();
    w.sim.wake(host_a, wake_at);

    let events: Vec<_> = w.sim.events(host_a).collect();
    assert!(
        events.contains(&Event::Wakeup),
        "expected a single collapsed wakeup tick: {events:?}"
    );

    w.run_ms(100);
    let now = w.sim.elapsed_ms();
    assert_eq!(
        w.sim.peer(host_a).unwrap().peer(&b).unwrap().liveness(now),
        Liveness::Active,
        "the re-ping fired on wake should have brought B back to Active"
    );
}
