use crate::*;

use std::sync::Arc;
use std::time::Duration;

use meshlink_core::{Fault, FaultSubject};
use meshlink_services::{ApplyOutcome, Xlink};
use tokio::sync::Semaphore;

#[tokio::test(start_paused = true)]
async fn accepting_same_link_twice_changes_nothing() {
    let h = Harness::new(MockDialer::new(DialScript::Fail));
    let ctrl = MockCtrl::new("c1", "v1.0.0");
    h.add_ctrl(&ctrl);

    let link = MockLink::new("A", DEFAULT_KEY, DEST, false);
    assert!(matches!(h.registry.link_accepted(shared(&link)), ApplyOutcome::Registered));
    assert!(matches!(
        h.registry.link_accepted(shared(&link)),
        ApplyOutcome::AlreadyRegistered
    ));

    tokio::time::sleep(Duration::from_secs(120)).await;

    assert!(!link.is_closed());
    assert_eq!(link.close_calls(), 0);
    assert_eq!(h.registry.get_link(DEFAULT_KEY).unwrap().id(), "A");
    assert!(ctrl.faults().is_empty());
}

#[tokio::test(start_paused = true)]
async fn lower_id_keeps_the_key() {
    let h = Harness::new(MockDialer::new(DialScript::Fail));
    let ctrl = MockCtrl::new("c1", "v1.0.0");
    h.add_ctrl(&ctrl);

    let a = MockLink::new("A", DEFAULT_KEY, DEST, true);
    let b = MockLink::new("B", DEFAULT_KEY, DEST, false);
    h.registry.link_accepted(shared(&a));

    match h.registry.link_accepted(shared(&b)) {
        ApplyOutcome::Rejected { survivor } => assert_eq!(survivor.id(), "A"),
        _ => panic!("expected B to be rejected"),
    }
    assert_eq!(h.registry.get_link(DEFAULT_KEY).unwrap().id(), "A");
    assert!(h.registry.get_link_by_id("B").is_none());

    // loser lingers for the grace period
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(!b.is_closed());

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(b.is_closed());
    assert!(!a.is_closed());
    assert!(ctrl.faults().is_empty());
}

#[tokio::test(start_paused = true)]
async fn lower_id_replaces_higher_id_occupant() {
    let h = Harness::new(MockDialer::new(DialScript::Fail));
    let ctrl = MockCtrl::new("c1", "v1.0.0");
    h.add_ctrl(&ctrl);

    let b = MockLink::with_iteration("B", DEFAULT_KEY, DEST, true, 4);
    let a = MockLink::new("A", DEFAULT_KEY, DEST, false);
    h.registry.link_accepted(shared(&b));

    assert!(matches!(h.registry.link_accepted(shared(&a)), ApplyOutcome::Registered));
    assert_eq!(h.registry.get_link(DEFAULT_KEY).unwrap().id(), "A");
    settle().await;

    assert_eq!(
        ctrl.faults(),
        vec![Fault {
            subject: FaultSubject::LinkDuplicate,
            id: "B".to_string(),
            iteration: 4,
        }]
    );

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(!b.is_closed());

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(b.is_closed());
    assert!(!a.is_closed());
}

#[tokio::test(start_paused = true)]
async fn legacy_controller_gets_link_fault_for_superseded_link() {
    let h = Harness::new(MockDialer::new(DialScript::Fail));
    let ctrl = MockCtrl::new("c1", "v0.29.3");
    h.add_ctrl(&ctrl);

    let b = MockLink::new("B", DEFAULT_KEY, DEST, true);
    let a = MockLink::new("A", DEFAULT_KEY, DEST, false);
    h.registry.link_accepted(shared(&b));
    h.registry.link_accepted(shared(&a));
    settle().await;

    let faults = ctrl.faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].subject, FaultSubject::LinkFault);
    assert_eq!(faults[0].id, "B");
}

#[tokio::test(start_paused = true)]
async fn occupant_stops_winning_after_max_rejections() {
    let h = Harness::new(MockDialer::new(DialScript::Fail));
    let a = MockLink::new("A", DEFAULT_KEY, DEST, true);
    h.registry.link_accepted(shared(&a));

    for i in 1..=5 {
        let dup = MockLink::new(&format!("B{i}"), DEFAULT_KEY, DEST, false);
        assert!(
            matches!(h.registry.link_accepted(shared(&dup)), ApplyOutcome::Rejected { .. }),
            "duplicate {i} should lose"
        );
    }

    let last = MockLink::new("B6", DEFAULT_KEY, DEST, false);
    assert!(matches!(h.registry.link_accepted(shared(&last)), ApplyOutcome::Registered));
    assert_eq!(h.registry.get_link(DEFAULT_KEY).unwrap().id(), "B6");

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(a.is_closed());
    assert!(!last.is_closed());
}

#[tokio::test(start_paused = true)]
async fn closed_link_is_not_registered() {
    let h = Harness::new(MockDialer::new(DialScript::Fail));
    let link = MockLink::new("A", DEFAULT_KEY, DEST, false);
    link.close().unwrap();

    assert!(matches!(h.registry.link_accepted(shared(&link)), ApplyOutcome::Closed));
    assert!(h.registry.get_link(DEFAULT_KEY).is_none());
}

#[tokio::test(start_paused = true)]
async fn closing_rejected_duplicate_keeps_established_state() {
    let h = Harness::new(MockDialer::new(DialScript::Succeed));

    h.registry
        .update_link_destination(DEST, "v1.0", true, vec![tls_listener("1.2.3.4:999")]);
    settle().await;
    let dialed = h.dialer.last_link().unwrap();

    // uuid ids sort below any id starting with 'z'
    let dup = MockLink::new("zzzz", DEFAULT_KEY, DEST, false);
    assert!(matches!(h.registry.link_accepted(shared(&dup)), ApplyOutcome::Rejected { .. }));

    dup.close().unwrap();
    h.registry.link_closed(shared(&dup));
    settle().await;

    let state = h.state().await.unwrap();
    assert_eq!(state.status, "established");
    assert_eq!(state.id, dialed.id);
    assert_eq!(h.registry.get_link(DEFAULT_KEY).unwrap().id(), dialed.id);
}

#[tokio::test(start_paused = true)]
async fn inbound_link_during_dial_takes_over_state() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::new(MockDialer::new(DialScript::Succeed).gated(gate.clone()));

    h.registry
        .update_link_destination(DEST, "v1.0", true, vec![tls_listener("1.2.3.4:999")]);
    settle().await;
    assert_eq!(h.state().await.unwrap().status, "dialing");

    // peer dials us first with an id that wins the tie-break
    let inbound = MockLink::new("0000", DEFAULT_KEY, DEST, false);
    assert!(matches!(h.registry.link_accepted(shared(&inbound)), ApplyOutcome::Registered));
    settle().await;

    gate.add_permits(1);
    settle().await;

    let ours = h.dialer.last_link().unwrap();
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(ours.is_closed());

    let state = h.state().await.unwrap();
    assert_eq!(state.status, "established");
    assert_eq!(state.id, "0000");
    assert_eq!(h.registry.get_link(DEFAULT_KEY).unwrap().id(), "0000");
}

#[tokio::test(start_paused = true)]
async fn dial_in_flight_blocks_retry_after_inbound_link_drops() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::new(MockDialer::new(DialScript::Succeed).gated(gate.clone()));

    h.registry
        .update_link_destination(DEST, "v1.0", true, vec![tls_listener("1.2.3.4:999")]);
    settle().await;
    let first_dial = h.dialer.targets.lock()[0].link_id.clone();

    let inbound = MockLink::new("0000", DEFAULT_KEY, DEST, false);
    h.registry.link_accepted(shared(&inbound));
    settle().await;
    inbound.close().unwrap();
    h.registry.link_closed(shared(&inbound));

    // backoff has long expired, but the first dial never returned
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(h.dialer.dial_count(), 1);
    assert_eq!(h.state().await.unwrap().status, "linkFailed");

    gate.add_permits(1);
    settle().await;

    let state = h.state().await.unwrap();
    assert_eq!(state.status, "established");
    assert_eq!(state.id, first_dial);
    assert_eq!(state.connected_count, 2);
    assert_eq!(h.dialer.dial_count(), 1);
    assert_eq!(h.registry.get_link(DEFAULT_KEY).unwrap().id(), first_dial);
}

#[tokio::test(start_paused = true)]
async fn retry_resumes_when_late_dial_fails() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::new(MockDialer::scripted(&[DialScript::Fail], DialScript::Succeed).gated(gate.clone()));

    h.registry
        .update_link_destination(DEST, "v1.0", true, vec![tls_listener("1.2.3.4:999")]);
    settle().await;

    let inbound = MockLink::new("0000", DEFAULT_KEY, DEST, false);
    h.registry.link_accepted(shared(&inbound));
    settle().await;
    inbound.close().unwrap();
    h.registry.link_closed(shared(&inbound));
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(h.dialer.dial_count(), 1);

    // first dial fails late; the overdue retry starts right away
    gate.add_permits(2);
    settle().await;

    assert_eq!(h.dialer.dial_count(), 2);
    let state = h.state().await.unwrap();
    assert_eq!(state.status, "established");
    assert_eq!(state.id, h.dialer.targets.lock()[1].link_id);
}

#[tokio::test(start_paused = true)]
async fn superseded_link_closes_on_time_despite_slow_controller() {
    let h = Harness::new(MockDialer::new(DialScript::Fail));
    let ctrl = MockCtrl::new("c1", "v1.0.0");
    ctrl.set_stalled(true);
    h.add_ctrl(&ctrl);

    let b = MockLink::new("B", DEFAULT_KEY, DEST, true);
    let a = MockLink::new("A", DEFAULT_KEY, DEST, false);
    h.registry.link_accepted(shared(&b));
    h.registry.link_accepted(shared(&a));

    tokio::time::sleep(Duration::from_secs(59)).await;
    assert!(!b.is_closed());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(b.is_closed());
}
