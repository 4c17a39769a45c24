//! End-to-end scenario from `SPEC_FULL.md` §8: a steady one-packet-per-
//! second TCP stream that outlives `active_timeout_ms` is split into
//! two emitted flows — the first closed for `Active`, the second
//! flagged as its continuation.

mod common;

use yaf_core::yaf::flow_value::tcp_flags::ACK;
use yaf_core::{EndReason, FlowAddr, FlowKey, FlowTable, YafConfig};

#[test]
fn long_lived_flow_splits_on_active_timeout() {
    common::init_tracing();
    let mut config = YafConfig::default();
    config.idle_timeout_ms = 60_000;
    config.active_timeout_ms = 10_000;

    let mut table = FlowTable::new(config.clone());
    let key = FlowKey {
        source_addr: FlowAddr::V4([10, 0, 0, 1]),
        dest_addr: FlowAddr::V4([10, 0, 0, 2]),
        source_port: 6000,
        dest_port: 443,
        protocol: common::TCP,
        ip_version: 4,
        vlan_id: 0,
        layer2_id: 0,
    };

    let seconds = config.active_timeout_ms / 1000 + 5;
    for t in 0..seconds {
        table.update(&common::tcp_pbuf(key, t * 1000 + 1, ACK, &[]));
    }

    let mut writer = common::VecWriter::default();
    table.flush(seconds * 1000 + 1, true, &mut writer).unwrap();

    assert_eq!(writer.flows.len(), 2);
    assert_eq!(writer.flows[0].end_reason, Some(EndReason::Active));
    assert!(!writer.flows[0].is_continuation);
    assert!(writer.flows[1].is_continuation);
    assert_eq!(writer.flows[1].key, key);
}
