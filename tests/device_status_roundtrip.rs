mod common;

use lorawan_ns::band::Eu868Band;
use lorawan_ns::clock::FixedClock;
use lorawan_ns::config::NetworkServerConfig;
use lorawan_ns::mac::{Cid, InMemoryMacCommandStore, MacCommand, MacCommandBlock, MacCommandStore};
use lorawan_ns::pipeline::DeviceLockRegistry;
use lorawan_ns::queue::InMemoryQueueStore;
use lorawan_ns::session::store::{InMemorySessionStore, SessionStore};
use lorawan_ns::session::types::DevAddr;
use lorawan_ns::transport::{MockTransports, RecordedCall};
use lorawan_ns::{PipelineOutcome, UplinkPipeline};

/// An externally enqueued `DevStatusReq` rides out on the next downlink
/// opportunity, and the device's `DevStatusAns` on a later uplink is
/// forwarded to the application server.
#[tokio::test]
async fn dev_status_req_goes_out_and_ans_comes_back() {
    let session_store = InMemorySessionStore::new();
    let queue_store = InMemoryQueueStore::new();
    let mac_store = InMemoryMacCommandStore::new();
    let band = Eu868Band;
    let config = NetworkServerConfig::default();
    let clock = FixedClock::new(1_700_000_000);
    let transports = MockTransports::new();
    let device_locks = DeviceLockRegistry::new();

    let dev_addr = DevAddr::from_bytes([4, 3, 2, 1]);
    let session = common::fresh_session(dev_addr, 10);
    let dev_eui = session.dev_eui;
    session_store.insert(session.clone());

    mac_store
        .enqueue(
            dev_eui,
            MacCommandBlock {
                cid: Cid::DevStatus,
                commands: vec![MacCommand::new(Cid::DevStatus, vec![])],
                external: true,
            },
        )
        .await
        .unwrap();

    let pipeline = UplinkPipeline {
        session_store: &session_store,
        queue_store: &queue_store,
        mac_store: &mac_store,
        band: &band,
        config: &config,
        clock: &clock,
        gateway: &transports,
        app_server: &transports,
        network_controller: &transports,
        device_locks: &device_locks,
    };

    let frame = common::build_uplink_frame(&session, 10, false, false, &[], Some((1, vec![0xaa])), -90, 5.0);
    let outcome = pipeline.process(frame).await;
    let PipelineOutcome::Continue(result) = outcome else {
        panic!("expected Continue, got {outcome:?}");
    };
    assert!(result.downlink_sent, "DevStatusReq should trigger a downlink");

    let calls = transports.calls();
    let downlink = calls
        .iter()
        .find_map(|c| match c {
            RecordedCall::Downlink(frame) => Some(frame.clone()),
            _ => None,
        })
        .expect("expected a downlink carrying DevStatusReq");
    // FHDR: MHDR(1) + DevAddr(4) + FCtrl(1) + FCnt(2) = 8 bytes before FOpts.
    let f_ctrl = downlink.phy_payload[5];
    assert_eq!(f_ctrl & 0x0f, 1, "FOpts should carry exactly one byte (the CID)");
    assert_eq!(downlink.phy_payload[8], Cid::DevStatus.wire_value(false));

    let updated = session_store.get_by_dev_eui(dev_eui).await.unwrap().unwrap();
    assert_eq!(updated.f_cnt_up, 11);

    // Device answers on its next uplink: DevStatusAns(battery=200, margin=-2).
    let mut answered_session = updated;
    answered_session.f_cnt_up = 11;
    let ans_frame = common::build_uplink_frame(
        &answered_session,
        11,
        false,
        false,
        &[Cid::DevStatus.wire_value(true), 200, 0b0011_1110],
        None,
        -90,
        5.0,
    );
    let outcome2 = pipeline.process(ans_frame).await;
    assert!(matches!(outcome2, PipelineOutcome::Continue(_)));

    let calls = transports.calls();
    let status = calls.iter().find_map(|c| match c {
        RecordedCall::DeviceStatus { dev_eui: d, battery, margin_db } if *d == dev_eui => {
            Some((*battery, *margin_db))
        }
        _ => None,
    });
    assert_eq!(status, Some((200, -2)));

    // The pending DevStatus entry was consumed, not left dangling.
    assert!(mac_store.get_pending(dev_eui, Cid::DevStatus).await.unwrap().is_none());
}
