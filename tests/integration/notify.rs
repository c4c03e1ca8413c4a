use crate::*;

use std::sync::Arc;
use std::time::Duration;

use meshlink_core::{Fault, FaultSubject};
use meshlink_services::{CtrlHandler, Xlink};
use tokio::sync::Semaphore;

async fn establish(h: &Harness) -> Arc<MockLink> {
    h.registry
        .update_link_destination(DEST, "v1.0", true, vec![tls_listener("1.2.3.4:999")]);
    settle().await;
    h.dialer.last_link().expect("dial should have produced a link")
}

#[tokio::test(start_paused = true)]
async fn established_link_is_announced_once() {
    let h = Harness::new(MockDialer::new(DialScript::Succeed));
    let ctrl = MockCtrl::new("c1", "v1.0.0");
    h.add_ctrl(&ctrl);

    let link = establish(&h).await;
    settle().await;

    let announced = ctrl.announced();
    assert_eq!(announced.len(), 1);
    assert_eq!(announced[0].id, link.id);
    assert_eq!(announced[0].dest_router_id, DEST);
    assert_eq!(announced[0].link_protocol, "tls");
    assert_eq!(announced[0].iteration, 1);

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(ctrl.announced().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_announcement_is_retried() {
    let h = Harness::new(MockDialer::new(DialScript::Succeed));
    let ctrl = MockCtrl::new("c1", "v1.0.0");
    ctrl.set_failing(true);
    h.add_ctrl(&ctrl);

    establish(&h).await;
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(ctrl.announced().is_empty());

    ctrl.set_failing(false);
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(ctrl.announced().len(), 1);

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(ctrl.announced().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn single_source_controller_skips_accepted_links() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::new(MockDialer::new(DialScript::Succeed).gated(gate));
    let normal = MockCtrl::new("c1", "v1.0.0");
    let single = MockCtrl::single_source("c2", "v1.0.0");
    h.add_ctrl(&normal);
    h.add_ctrl(&single);

    // hold the state in dialing so the inbound link has a state to land on
    h.registry
        .update_link_destination(DEST, "v1.0", true, vec![tls_listener("1.2.3.4:999")]);
    settle().await;

    let inbound = MockLink::new("A", DEFAULT_KEY, DEST, false);
    h.registry.link_accepted(shared(&inbound));
    settle().await;

    let ids: Vec<String> = normal.announced().into_iter().map(|l| l.id).collect();
    assert_eq!(ids, vec!["A".to_string()]);
    assert!(single.announced().is_empty());

    // the skipped controller doesn't hold up delivery
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(normal.announced().len(), 1);

    h.registry.notify_of_reconnect(as_ctrl(&single));
    settle().await;
    assert!(single.announced().is_empty());
}

#[tokio::test(start_paused = true)]
async fn closed_link_is_faulted_once() {
    let h = Harness::new(MockDialer::new(DialScript::Succeed));
    let ctrl = MockCtrl::new("c1", "v1.0.0");
    h.add_ctrl(&ctrl);

    let link = establish(&h).await;
    link.close().unwrap();
    h.registry.link_closed(shared(&link));
    settle().await;

    let expected = vec![Fault {
        subject: FaultSubject::LinkFault,
        id: link.id.clone(),
        iteration: 1,
    }];
    assert_eq!(ctrl.faults(), expected);

    // redial happens, but the old fault isn't repeated
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(h.dialer.dial_count(), 2);
    assert_eq!(ctrl.faults(), expected);
}

#[tokio::test(start_paused = true)]
async fn fault_stays_queued_until_delivered() {
    let h = Harness::new(MockDialer::new(DialScript::Fail));
    let ctrl = MockCtrl::new("c1", "v1.0.0");
    h.add_ctrl(&ctrl);

    let link = MockLink::new("A", DEFAULT_KEY, DEST, false);
    h.registry
        .update_link_destination(DEST, "v1.0", true, vec![tls_listener("1.2.3.4:999")]);
    h.registry.link_accepted(shared(&link));
    settle().await;
    assert_eq!(h.state().await.unwrap().status, "established");

    ctrl.set_failing(true);
    link.close().unwrap();
    h.registry.link_closed(shared(&link));
    settle().await;
    assert!(ctrl.faults().is_empty());

    ctrl.set_failing(false);
    tokio::time::sleep(Duration::from_secs(6)).await;
    let faults = ctrl.faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].id, "A");
}

#[tokio::test(start_paused = true)]
async fn reconnected_controller_gets_links_again() {
    let h = Harness::new(MockDialer::new(DialScript::Succeed));
    let ctrl = MockCtrl::new("c1", "v1.0.0");
    h.add_ctrl(&ctrl);

    let link = establish(&h).await;
    settle().await;
    assert_eq!(ctrl.announced().len(), 1);

    h.registry.notify_of_reconnect(as_ctrl(&ctrl));
    settle().await;

    let announced = ctrl.announced();
    assert_eq!(announced.len(), 2);
    assert_eq!(announced[1].id, link.id);
}

#[tokio::test(start_paused = true)]
async fn link_waits_for_first_controller() {
    let h = Harness::new(MockDialer::new(DialScript::Succeed));
    establish(&h).await;
    tokio::time::sleep(Duration::from_secs(6)).await;

    let ctrl = MockCtrl::new("c1", "v1.0.0");
    h.add_ctrl(&ctrl);
    assert!(ctrl.announced().is_empty());

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(ctrl.announced().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnected_controller_is_skipped() {
    let h = Harness::new(MockDialer::new(DialScript::Succeed));
    let up = MockCtrl::new("c1", "v1.0.0");
    let down = MockCtrl::new("c2", "v1.0.0");
    down.set_connected(false);
    h.add_ctrl(&up);
    h.add_ctrl(&down);

    establish(&h).await;
    settle().await;

    assert_eq!(up.announced().len(), 1);
    assert!(down.messages.lock().is_empty());
}
