mod common;

use lorawan_ns::band::Eu868Band;
use lorawan_ns::clock::FixedClock;
use lorawan_ns::config::NetworkServerConfig;
use lorawan_ns::mac::InMemoryMacCommandStore;
use lorawan_ns::pipeline::DeviceLockRegistry;
use lorawan_ns::queue::InMemoryQueueStore;
use lorawan_ns::session::store::{InMemorySessionStore, SessionStore};
use lorawan_ns::session::types::DevAddr;
use lorawan_ns::transport::MockTransports;
use lorawan_ns::{PipelineOutcome, UplinkPipeline};

#[allow(clippy::too_many_arguments)]
fn make_pipeline<'a>(
    session_store: &'a InMemorySessionStore,
    queue_store: &'a InMemoryQueueStore,
    mac_store: &'a InMemoryMacCommandStore,
    band: &'a Eu868Band,
    config: &'a NetworkServerConfig,
    clock: &'a FixedClock,
    transports: &'a MockTransports,
    device_locks: &'a DeviceLockRegistry,
) -> UplinkPipeline<'a> {
    UplinkPipeline {
        session_store,
        queue_store,
        mac_store,
        band,
        config,
        clock,
        gateway: transports,
        app_server: transports,
        network_controller: transports,
        device_locks,
    }
}

/// §8 invariant 1 / property 8: replaying the same uplink (same wire FCnt,
/// same MIC) a second time is dropped and does not advance FCntUp again.
#[tokio::test]
async fn replayed_uplink_is_silently_dropped() {
    let session_store = InMemorySessionStore::new();
    let queue_store = InMemoryQueueStore::new();
    let mac_store = InMemoryMacCommandStore::new();
    let band = Eu868Band;
    let config = NetworkServerConfig::default();
    let clock = FixedClock::new(1_700_000_000);
    let transports = MockTransports::new();
    let device_locks = DeviceLockRegistry::new();

    let dev_addr = DevAddr::from_bytes([4, 3, 2, 1]);
    let session = common::fresh_session(dev_addr, 5);
    let dev_eui = session.dev_eui;
    session_store.insert(session.clone());

    let pipeline = make_pipeline(&session_store, &queue_store, &mac_store, &band, &config, &clock, &transports, &device_locks);

    let frame1 = common::build_uplink_frame(&session, 5, false, false, &[], Some((1, vec![1, 2])), -80, 6.0);
    let outcome1 = pipeline.process(frame1).await;
    assert!(matches!(outcome1, PipelineOutcome::Continue(_)));
    let after_first = session_store.get_by_dev_eui(dev_eui).await.unwrap().unwrap();
    assert_eq!(after_first.f_cnt_up, 6);

    let frame2 = common::build_uplink_frame(&session, 5, false, false, &[], Some((1, vec![1, 2])), -80, 6.0);
    let outcome2 = pipeline.process(frame2).await;
    assert!(matches!(outcome2, PipelineOutcome::Dropped { .. }));
    let after_replay = session_store.get_by_dev_eui(dev_eui).await.unwrap().unwrap();
    assert_eq!(after_replay.f_cnt_up, 6, "replay must not re-advance FCntUp");
}

/// §8 S6: a frame whose MIC was computed for a different channel/DR than
/// the one it claims to have been received on must not resolve to any
/// session — identification is bound to cryptographic validity.
#[tokio::test]
async fn mic_bound_to_wrong_channel_is_dropped() {
    use lorawan_ns::crypto;
    use lorawan_ns::phy;
    use lorawan_ns::session::types::MacVersion;
    use lorawan_ns::transport::{GatewayRxMetadata, GatewayUplinkFrame, UplinkTxMetadata};

    let session_store = InMemorySessionStore::new();
    let queue_store = InMemoryQueueStore::new();
    let mac_store = InMemoryMacCommandStore::new();
    let band = Eu868Band;
    let config = NetworkServerConfig::default();
    let clock = FixedClock::new(1_700_000_000);
    let transports = MockTransports::new();
    let device_locks = DeviceLockRegistry::new();

    let dev_addr = DevAddr::from_bytes([4, 3, 2, 1]);
    let mut session = common::fresh_session(dev_addr, 5);
    session.mac_version = MacVersion::Lorawan1_1;
    session_store.insert(session.clone());

    let pipeline = make_pipeline(&session_store, &queue_store, &mac_store, &band, &config, &clock, &transports, &device_locks);

    let mut addr = *dev_addr.as_bytes();
    addr.reverse();
    let mut msg = vec![0b010 << 5];
    msg.extend_from_slice(&addr);
    msg.push(0x00);
    msg.extend_from_slice(&5u16.to_le_bytes());

    // MIC computed claiming DR=5, channel=1, but the uplink frame below
    // reports arriving on a different channel.
    let mic = crypto::compute_uplink_mic_1_1(
        &session.f_nwk_s_int_key,
        &session.s_nwk_s_int_key,
        dev_addr,
        5,
        0,
        5,
        1,
        &msg,
    );
    let phy_payload = phy::append_mic(msg, mic);

    let frame = GatewayUplinkFrame::new(
        phy_payload,
        UplinkTxMetadata {
            frequency_hz: 868_500_000, // channel index 2, not 1
            dr: 5,
        },
        vec![GatewayRxMetadata {
            gateway_id: [1; 8],
            rssi: -80,
            snr: 6.0,
            rx_timestamp_micros: 1_000_000,
        }],
    );

    let outcome = pipeline.process(frame).await;
    assert!(matches!(outcome, PipelineOutcome::Dropped { .. }));
}
