//! The central data structure: the set of open flows, the per-packet
//! update logic, aging, and the flush/emit protocol. Grounded on
//! `yfFlow_t`/`yfFlowTab_t` in `examples/original_source/include/yaf/yafcore.h`
//! and the picklist operations in `examples/original_source/src/picq.c`
//! (`piqPick`/`piqEnQ`/`piqUnshift`/`piqShift`/`piqDeQ`), re-architected
//! per `SPEC_FULL.md` §9 as an indexed arena (`Vec<Option<Node>>` plus
//! `Option<FlowId>` prev/next) instead of the source's intrusive
//! pointers, so removal is O(1) without pointer surgery and the whole
//! structure stays plain data. The flush/age/emit sequencing mirrors
//! `examples/original_source/src/yaflush.c`'s `yfProcessPBufRing`.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::yaf::config::YafConfig;
use crate::yaf::error::PipelineError;
use crate::yaf::flow::{EndReason, Flow};
use crate::yaf::flow_key::FlowKey;
use crate::yaf::flow_value::{ATTR_FRAGMENTS, ATTR_MP_CAPABLE};
use crate::yaf::pbuf::PBuf;
use crate::yaf::pipeline::Writer;
use crate::yaf::plugin::{LabelPlugin, ScanInput, ScanResult};

/// Index into the flow slab. Stable for as long as the flow it names
/// stays open; never reused while that flow is open, freely reused
/// once it closes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
struct FlowId(usize);

struct Node {
    flow: Flow,
    prev: Option<FlowId>,
    next: Option<FlowId>,
}

/// Running counters, exposed for stats reporting (an external
/// collaborator per `SPEC_FULL.md` §1; the core only accumulates
/// them).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FlowTableStats {
    pub active_flows: usize,
    pub total_flows: u64,
    pub idle_closes: u64,
    pub active_closes: u64,
    pub closed_closes: u64,
    pub resource_closes: u64,
    pub udp_force_closes: u64,
    pub forced_closes: u64,
}

const IP_PROTO_TCP: u8 = 6;
const IP_PROTO_UDP: u8 = 17;

pub struct FlowTable {
    slab: Vec<Option<Node>>,
    free: Vec<usize>,
    index: HashMap<FlowKey, FlowId>,
    /// Most-recently-touched flow; `None` when the table is empty.
    pick_head: Option<FlowId>,
    /// Least-recently-touched flow; the first candidate for idle or
    /// resource eviction.
    pick_tail: Option<FlowId>,
    /// Flows that have been decided closed, in the order they closed.
    /// `flush` drains this by calling `Writer::write` in order.
    close_queue: VecDeque<Flow>,
    config: YafConfig,
    plugin: Option<Arc<dyn LabelPlugin>>,
    stats: FlowTableStats,
}

impl FlowTable {
    pub fn new(config: YafConfig) -> Self {
        FlowTable {
            slab: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            pick_head: None,
            pick_tail: None,
            close_queue: VecDeque::new(),
            config,
            plugin: None,
            stats: FlowTableStats::default(),
        }
    }

    pub fn with_plugin(config: YafConfig, plugin: Arc<dyn LabelPlugin>) -> Self {
        let mut table = FlowTable::new(config);
        table.plugin = Some(plugin);
        table
    }

    pub fn stats(&self) -> FlowTableStats {
        self.stats
    }

    /// Number of flows currently open (neither emitted nor awaiting
    /// emission in the close queue).
    pub fn open_flows(&self) -> usize {
        self.index.len()
    }

    /// Number of flows decided closed but not yet handed to the
    /// writer.
    pub fn pending_emit(&self) -> usize {
        self.close_queue.len()
    }

    /// Folds one decoded packet into the flow table: matches it to an
    /// existing flow (forward or reverse) or opens a new one, updates
    /// counters/attributes/flags, and applies the inline portions of
    /// the end-reason decision table (Active timeout, TCP Closed, UDP
    /// uniflow force). Idle expiry and the resource cap are handled
    /// separately by [`FlowTable::flush`], since detecting "no packet
    /// arrived" requires a periodic sweep rather than a per-packet
    /// check.
    pub fn update(&mut self, pbuf: &PBuf) {
        if !pbuf.is_valid() {
            return;
        }

        let (canonical_key, forward) = self.resolve_direction(&pbuf.key);
        let id = match self.index.get(&canonical_key) {
            Some(&id) => id,
            None => self.insert_new(canonical_key, pbuf.timestamp_ms),
        };
        let id = self.maybe_active_close(id, canonical_key, pbuf.timestamp_ms);

        self.apply_packet(id, forward, pbuf);
        self.push_front(id);
        self.maybe_close_after_packet(id, pbuf);
    }

    /// Decides which existing flow (if any) a packet's key belongs to.
    /// Returns the canonical key under which that flow is indexed and
    /// whether the packet is travelling in that flow's forward
    /// direction. For ICMP/ICMPv6 the reverse direction is never
    /// joined (see [`FlowKey::is_reverse_unjoinable`]); a new flow
    /// always opens forward.
    fn resolve_direction(&self, key: &FlowKey) -> (FlowKey, bool) {
        if self.index.contains_key(key) {
            return (*key, true);
        }
        if !key.is_reverse_unjoinable() {
            let reversed = key.reversed();
            if self.index.contains_key(&reversed) {
                return (reversed, false);
            }
        }
        (*key, true)
    }

    fn insert_new(&mut self, key: FlowKey, timestamp_ms: u64) -> FlowId {
        self.insert_flow(key, Flow::new(key, timestamp_ms))
    }

    fn insert_flow(&mut self, key: FlowKey, flow: Flow) -> FlowId {
        let idx = match self.free.pop() {
            Some(i) => i,
            None => {
                self.slab.push(None);
                self.slab.len() - 1
            }
        };
        self.slab[idx] = Some(Node {
            flow,
            prev: None,
            next: None,
        });
        let id = FlowId(idx);
        self.link_at_head(id);
        self.index.insert(key, id);
        self.stats.total_flows += 1;
        self.stats.active_flows = self.index.len();
        id
    }

    fn unlink(&mut self, id: FlowId) {
        let (prev, next) = {
            let node = self.slab[id.0].as_ref().expect("unlink: live node");
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.slab[p.0].as_mut().unwrap().next = next,
            None => self.pick_head = next,
        }
        match next {
            Some(n) => self.slab[n.0].as_mut().unwrap().prev = prev,
            None => self.pick_tail = prev,
        }
        if let Some(node) = self.slab[id.0].as_mut() {
            node.prev = None;
            node.next = None;
        }
    }

    /// Attaches a node that is not currently part of the picklist (a
    /// freshly inserted flow) at the head.
    fn link_at_head(&mut self, id: FlowId) {
        let old_head = self.pick_head;
        {
            let node = self.slab[id.0].as_mut().expect("link_at_head: live node");
            node.next = old_head;
            node.prev = None;
        }
        if let Some(head) = old_head {
            self.slab[head.0].as_mut().unwrap().prev = Some(id);
        }
        self.pick_head = Some(id);
        if self.pick_tail.is_none() {
            self.pick_tail = Some(id);
        }
    }

    /// Moves an already-linked flow to the head of the picklist: "most
    /// recently touched". Every packet does this for its flow (§4.4).
    fn push_front(&mut self, id: FlowId) {
        self.unlink(id);
        self.link_at_head(id);
    }

    /// If `id`'s flow has been open longer than `active_timeout_ms`
    /// as of `timestamp_ms`, closes it with reason
    /// [`EndReason::Active`] and opens a continuation flow under the
    /// same key, returning the continuation's id. Otherwise returns
    /// `id` unchanged.
    fn maybe_active_close(&mut self, id: FlowId, canonical_key: FlowKey, timestamp_ms: u64) -> FlowId {
        let age = self.slab[id.0].as_ref().unwrap().flow.age_ms(timestamp_ms);
        if age <= self.config.active_timeout_ms {
            return id;
        }
        let old = self.close_flow(id, EndReason::Active, timestamp_ms);
        let continuation = old.continuation(timestamp_ms);
        self.close_queue.push_back(old);
        self.insert_flow(canonical_key, continuation)
    }

    fn apply_packet(&mut self, id: FlowId, forward: bool, pbuf: &PBuf) {
        let plugin = self.plugin.clone();
        let max_payload = self.config.max_payload;
        let applabel_threshold = self.config.applabel_packet_count.max(1);

        let node = self.slab[id.0].as_mut().expect("apply_packet: live node");
        let flow = &mut node.flow;

        let adjusted_time = pbuf.timestamp_ms.max(flow.start_time_ms);
        if adjusted_time > flow.last_packet_time_ms {
            flow.last_packet_time_ms = adjusted_time;
        }

        if !forward && flow.rdtime_ms.is_none() {
            flow.rdtime_ms = Some(adjusted_time.saturating_sub(flow.start_time_ms));
        }

        let is_first_packet_this_direction = {
            let value = if forward { &flow.forward } else { &flow.reverse };
            value.packets == 0
        };

        {
            let value = flow.value_for(forward);
            value.record_packet(pbuf.packet_len, pbuf.payload_len, adjusted_time);
            if pbuf.key.protocol == IP_PROTO_TCP {
                value.check_out_of_sequence(pbuf.tcp_seq, pbuf.payload_len as u32);
            }
            if is_first_packet_this_direction {
                value.isn = pbuf.tcp_seq;
                value.initial_flags = pbuf.tcp_flags;
            }
            value.union_flags |= pbuf.tcp_flags;
            if pbuf.mp_capable {
                value.attributes |= ATTR_MP_CAPABLE;
            }
            if pbuf.frag.is_some() {
                value.attributes |= ATTR_FRAGMENTS;
            }
            value.vlan_id = pbuf.key.vlan_id;
            value.mac_addr = pbuf.mac_addr;
            value.push_payload(&pbuf.payload, max_payload);
        }

        if pbuf.mp_capable && flow.mptcp.is_none() {
            // The decoder only detects MP_CAPABLE option presence, not
            // the sender/receiver key exchange the original derives
            // idsn/token from (that hash isn't part of the retrieved
            // decode sources); record negotiation without those fields.
            flow.mptcp = Some(crate::yaf::flow::MptcpInfo::default());
        }

        if pbuf.key.protocol == IP_PROTO_TCP {
            flow.note_tcp_close_flag(forward, pbuf.tcp_flags);
            if pbuf.tcp_flags & crate::yaf::flow_value::tcp_flags::RST != 0 {
                // An RST tears down the whole connection regardless of
                // which side sent it; mirror it onto both directions
                // so `Flow::tcp_closed` (which requires both) reflects
                // that without waiting on a FIN that may never come.
                flow.note_tcp_close_flag(!forward, pbuf.tcp_flags);
            }
        }

        if flow.mpls_labels.is_empty() && !pbuf.mpls_labels.is_empty() {
            flow.mpls_labels = pbuf.mpls_labels.clone();
        }

        if let Some(plugin) = plugin.as_ref() {
            Self::maybe_label(flow, forward, plugin.as_ref(), applabel_threshold, &pbuf.payload);
        }
    }

    /// Invokes the application-label hook once the configured number
    /// of payload-bearing packets has been observed, and `process` on
    /// every payload packet thereafter once a plugin has matched.
    fn maybe_label(
        flow: &mut Flow,
        forward: bool,
        plugin: &dyn LabelPlugin,
        threshold: u32,
        payload: &[u8],
    ) {
        if payload.is_empty() {
            return;
        }
        if flow.app_label != 0 {
            // Already matched: keep handing payload packets to the
            // plugin so it can keep extracting fields, but this no
            // longer counts toward (or is gated by) the scan
            // threshold below.
            let input = ScanInput {
                payload,
                forward,
                is_first_payload_packet: false,
            };
            let mut ctx = flow.dpi_ctx.take();
            run_process(plugin, &*flow, &input, ctx.as_deref_mut());
            flow.dpi_ctx = ctx;
            return;
        }
        if flow.label_done {
            // Already declined by a prior scan; do not retry.
            return;
        }
        flow.payload_packet_count += 1;
        if flow.payload_packet_count < threshold {
            return;
        }
        let input = ScanInput {
            payload,
            forward,
            is_first_payload_packet: flow.payload_packet_count == threshold,
        };
        match run_scan(plugin, &input, flow.dpi_ctx.as_deref()) {
            ScanResult::Matched { label } => {
                flow.app_label = label;
                flow.label_done = true;
            }
            ScanResult::NoMatch => flow.label_done = true,
            ScanResult::NeedMoreData => {}
        }
    }

    fn maybe_close_after_packet(&mut self, id: FlowId, pbuf: &PBuf) {
        let tcp_closed = pbuf.key.protocol == IP_PROTO_TCP
            && self.slab[id.0].as_ref().unwrap().flow.tcp_closed();
        if tcp_closed {
            let flow = self.close_flow(id, EndReason::Closed, pbuf.timestamp_ms);
            self.close_queue.push_back(flow);
            return;
        }
        if self.config.udp_uniflow_mode && pbuf.key.protocol == IP_PROTO_UDP {
            let flow = self.close_flow(id, EndReason::UdpForce, pbuf.timestamp_ms);
            self.close_queue.push_back(flow);
        }
    }

    /// Removes a flow from the index and picklist, stamps its end
    /// reason, gives the label plugin a last chance to classify it if
    /// it never got labelled in-line, and returns it by value (the
    /// caller is responsible for queueing it for emission).
    fn close_flow(&mut self, id: FlowId, reason: EndReason, now_ms: u64) -> Flow {
        self.unlink(id);
        let node = self.slab[id.0].take().expect("close_flow: live node");
        self.free.push(id.0);
        self.index.remove(&node.flow.key);

        let mut flow = node.flow;
        if let Some(plugin) = self.plugin.as_ref() {
            Self::maybe_final_label(&mut flow, plugin.as_ref());
        }
        flow.end_reason = Some(reason);
        let _ = now_ms;

        match reason {
            EndReason::Idle => self.stats.idle_closes += 1,
            EndReason::Active => self.stats.active_closes += 1,
            EndReason::Closed => self.stats.closed_closes += 1,
            EndReason::Resource => self.stats.resource_closes += 1,
            EndReason::UdpForce => self.stats.udp_force_closes += 1,
            EndReason::Forced => self.stats.forced_closes += 1,
        }
        self.stats.active_flows = self.index.len();
        flow
    }

    fn maybe_final_label(flow: &mut Flow, plugin: &dyn LabelPlugin) {
        if flow.label_done || flow.app_label != 0 {
            return;
        }
        let payload: &[u8] = if !flow.forward.payload.is_empty() {
            &flow.forward.payload
        } else {
            &flow.reverse.payload
        };
        if payload.is_empty() {
            flow.label_done = true;
            return;
        }
        let input = ScanInput {
            payload,
            forward: true,
            is_first_payload_packet: false,
        };
        if let ScanResult::Matched { label } = run_scan(plugin, &input, flow.dpi_ctx.as_deref()) {
            flow.app_label = label;
        }
        flow.label_done = true;
    }

    /// Ages the tail of the picklist, moving every flow idle for
    /// longer than `idle_timeout_ms` (as of `now_ms`) to the close
    /// queue, oldest first.
    fn age_idle(&mut self, now_ms: u64) {
        while let Some(tail) = self.pick_tail {
            let idle = self.slab[tail.0].as_ref().unwrap().flow.idle_ms(now_ms);
            if idle <= self.config.idle_timeout_ms {
                break;
            }
            let flow = self.close_flow(tail, EndReason::Idle, now_ms);
            self.close_queue.push_back(flow);
        }
    }

    /// While more flows are open than `max_flows`, evicts the
    /// least-recently-touched flow with reason
    /// [`EndReason::Resource`].
    fn enforce_resource_cap(&mut self, now_ms: u64) {
        while self.index.len() > self.config.max_flows {
            let Some(tail) = self.pick_tail else { break };
            let flow = self.close_flow(tail, EndReason::Resource, now_ms);
            self.close_queue.push_back(flow);
        }
    }

    fn force_close_all(&mut self, now_ms: u64) {
        while let Some(head) = self.pick_head {
            let flow = self.close_flow(head, EndReason::Forced, now_ms);
            self.close_queue.push_back(flow);
        }
    }

    /// The flush protocol (§4.4): age the picklist tail, enforce the
    /// resource cap, optionally force-close every remaining flow, then
    /// emit the close queue in order. Stops and surfaces the first
    /// writer error; flows already popped off the close queue before
    /// the failing one are considered emitted, flows at and after it
    /// are lost, matching `SPEC_FULL.md` §7's `WriterError` contract.
    pub fn flush(&mut self, now_ms: u64, forced: bool, out: &mut dyn Writer) -> Result<(), PipelineError> {
        self.age_idle(now_ms);
        self.enforce_resource_cap(now_ms);
        if forced {
            self.force_close_all(now_ms);
        }
        while let Some(flow) = self.close_queue.pop_front() {
            out.write(&flow).map_err(PipelineError::Writer)?;
        }
        out.flush().map_err(PipelineError::Writer)?;
        Ok(())
    }
}

fn run_scan(plugin: &dyn LabelPlugin, input: &ScanInput<'_>, ctx: Option<&dyn crate::yaf::plugin::FlowContext>) -> ScanResult {
    match catch_unwind(AssertUnwindSafe(|| plugin.scan(input, ctx))) {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(plugin = plugin.name(), "label plugin panicked; treating as no match");
            ScanResult::NoMatch
        }
    }
}

/// Same panic-isolation as `run_scan`: a plugin's `process` hook runs on
/// every payload packet once it has matched, so a panic here must not be
/// allowed to unwind into the flow table and poison its bookkeeping.
fn run_process(plugin: &dyn LabelPlugin, flow: &Flow, input: &ScanInput<'_>, ctx: Option<&mut dyn crate::yaf::plugin::FlowContext>) {
    if catch_unwind(AssertUnwindSafe(|| plugin.process(flow, input, ctx))).is_err() {
        tracing::warn!(plugin = plugin.name(), "label plugin panicked in process(); ignoring");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::yaf::flow_key::FlowAddr;
    use crate::yaf::flow_value::tcp_flags::{ACK, FIN, RST, SYN};

    fn tcp_pbuf(src_port: u16, dst_port: u16, t: u64, flags: u8, payload: &[u8]) -> PBuf {
        let mut p = PBuf::invalid();
        p.key = FlowKey {
            source_addr: FlowAddr::V4([10, 0, 0, 1]),
            dest_addr: FlowAddr::V4([10, 0, 0, 2]),
            source_port: src_port,
            dest_port: dst_port,
            protocol: IP_PROTO_TCP,
            ip_version: 4,
            vlan_id: 0,
            layer2_id: 0,
        };
        p.timestamp_ms = t;
        p.packet_len = 40 + payload.len() as u32;
        p.payload_len = payload.len() as u16;
        p.payload = payload.to_vec();
        p.tcp_flags = flags;
        p
    }

    struct RecordingWriter {
        written: Vec<Flow>,
    }

    impl Writer for RecordingWriter {
        fn write(&mut self, flow: &Flow) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.written.push(clone_for_test(flow));
            Ok(())
        }
        fn flush(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Ok(())
        }
        fn close(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Ok(())
        }
    }

    // `Flow` intentionally carries a non-`Clone` plugin context box, so
    // tests copy only the fields they assert on.
    fn clone_for_test(flow: &Flow) -> Flow {
        let mut copy = Flow::new(flow.key, flow.start_time_ms);
        copy.forward = flow.forward.clone();
        copy.reverse = flow.reverse.clone();
        copy.last_packet_time_ms = flow.last_packet_time_ms;
        copy.rdtime_ms = flow.rdtime_ms;
        copy.is_continuation = flow.is_continuation;
        copy.end_reason = flow.end_reason;
        copy.app_label = flow.app_label;
        copy
    }

    fn default_config() -> YafConfig {
        let mut cfg = YafConfig::default();
        cfg.idle_timeout_ms = 1000;
        cfg.active_timeout_ms = 10_000;
        cfg
    }

    #[test]
    fn tcp_biflow_closes_on_both_fin() {
        // Packet 5 (the reverse FIN-ACK) already closes the biflow via
        // `maybe_close_after_packet`; packet 6 (the trailing forward
        // ACK) then opens a new one-packet flow under the same key
        // rather than extending the just-closed one. See the matching
        // end-to-end scenario in `tests/tcp_biflow.rs` for the full
        // rationale.
        let mut table = FlowTable::new(default_config());
        table.update(&tcp_pbuf(5000, 80, 1000, SYN, &[]));
        table.update(&tcp_pbuf(80, 5000, 1010, SYN | ACK, &[]));
        table.update(&tcp_pbuf(5000, 80, 1020, ACK, &[]));
        table.update(&tcp_pbuf(5000, 80, 2000, FIN | ACK, &[]));
        table.update(&tcp_pbuf(80, 5000, 2010, FIN | ACK, &[]));
        table.update(&tcp_pbuf(5000, 80, 2020, ACK, &[]));

        assert_eq!(table.open_flows(), 1);
        assert_eq!(table.pending_emit(), 1);

        let mut writer = RecordingWriter { written: Vec::new() };
        table.flush(2020, false, &mut writer).unwrap();
        let flow = &writer.written[0];
        assert_eq!(flow.start_time_ms, 1000);
        assert_eq!(flow.last_packet_time_ms, 2010);
        assert_eq!(flow.rdtime_ms, Some(10));
        assert_eq!(flow.end_reason, Some(EndReason::Closed));
        assert_eq!(flow.forward.packets, 3);
        assert_eq!(flow.reverse.packets, 2);
    }

    #[test]
    fn idle_udp_flow_emitted_on_flush() {
        let mut table = FlowTable::new(default_config());
        let mut p = PBuf::invalid();
        p.key = FlowKey {
            source_addr: FlowAddr::V4([10, 0, 0, 1]),
            dest_addr: FlowAddr::V4([10, 0, 0, 2]),
            source_port: 1111,
            dest_port: 2222,
            protocol: IP_PROTO_UDP,
            ip_version: 4,
            vlan_id: 0,
            layer2_id: 0,
        };
        p.timestamp_ms = 1;
        p.packet_len = 64;
        table.update(&p);

        let mut writer = RecordingWriter { written: Vec::new() };
        table.flush(1002, false, &mut writer).unwrap();
        assert_eq!(writer.written.len(), 1);
        assert_eq!(writer.written[0].end_reason, Some(EndReason::Idle));
        assert_eq!(writer.written[0].last_packet_time_ms, 1);
    }

    #[test]
    fn active_timeout_continues_flow() {
        let mut table = FlowTable::new(default_config());
        for t in 0..16u64 {
            table.update(&tcp_pbuf(5000, 80, t * 1000 + 1, ACK, &[]));
        }

        let mut writer = RecordingWriter { written: Vec::new() };
        table.flush(15_001, true, &mut writer).unwrap();
        assert_eq!(writer.written.len(), 2);
        assert_eq!(writer.written[0].end_reason, Some(EndReason::Active));
        assert!(!writer.written[0].is_continuation);
        assert!(writer.written[1].is_continuation);
    }

    #[test]
    fn rst_from_either_side_closes_immediately() {
        let mut table = FlowTable::new(default_config());
        table.update(&tcp_pbuf(5000, 80, 1000, SYN, &[]));
        table.update(&tcp_pbuf(80, 5000, 1010, SYN | ACK, &[]));
        table.update(&tcp_pbuf(80, 5000, 1020, RST, &[]));

        assert_eq!(table.open_flows(), 0);
        assert_eq!(table.pending_emit(), 1);
    }

    #[test]
    fn resource_cap_evicts_oldest_flow() {
        let mut cfg = default_config();
        cfg.max_flows = 2;
        let mut table = FlowTable::new(cfg);
        for port in [1000u16, 1001, 1002] {
            table.update(&tcp_pbuf(port, 80, 1, SYN, &[]));
        }
        assert_eq!(table.open_flows(), 3);

        let mut writer = RecordingWriter { written: Vec::new() };
        table.flush(1, false, &mut writer).unwrap();
        assert_eq!(table.open_flows(), 2);
        assert_eq!(writer.written.len(), 1);
        assert_eq!(writer.written[0].end_reason, Some(EndReason::Resource));
        assert_eq!(writer.written[0].key.source_port, 1000);
    }

    #[test]
    fn udp_uniflow_mode_closes_single_packet_immediately() {
        let mut cfg = default_config();
        cfg.udp_uniflow_mode = true;
        let mut table = FlowTable::new(cfg);
        let mut p = PBuf::invalid();
        p.key = FlowKey {
            source_addr: FlowAddr::V4([10, 0, 0, 1]),
            dest_addr: FlowAddr::V4([10, 0, 0, 2]),
            source_port: 1111,
            dest_port: 2222,
            protocol: IP_PROTO_UDP,
            ip_version: 4,
            vlan_id: 0,
            layer2_id: 0,
        };
        p.timestamp_ms = 5;
        table.update(&p);

        assert_eq!(table.open_flows(), 0);
        assert_eq!(table.pending_emit(), 1);
    }

    #[test]
    fn icmp_reverse_never_joins() {
        let mut table = FlowTable::new(default_config());
        let mut echo_request = PBuf::invalid();
        echo_request.key = FlowKey {
            source_addr: FlowAddr::V4([10, 0, 0, 1]),
            dest_addr: FlowAddr::V4([10, 0, 0, 2]),
            source_port: 0,
            dest_port: (8u16 << 8) | 0, // echo request type 8 code 0
            protocol: 1,
            ip_version: 4,
            vlan_id: 0,
            layer2_id: 0,
        };
        echo_request.timestamp_ms = 1;
        table.update(&echo_request);

        let mut echo_reply = PBuf::invalid();
        echo_reply.key = FlowKey {
            source_addr: FlowAddr::V4([10, 0, 0, 2]),
            dest_addr: FlowAddr::V4([10, 0, 0, 1]),
            source_port: 0,
            dest_port: (0u16 << 8) | 0, // echo reply type 0 code 0
            protocol: 1,
            ip_version: 4,
            vlan_id: 0,
            layer2_id: 0,
        };
        echo_reply.timestamp_ms = 2;
        table.update(&echo_reply);

        assert_eq!(table.open_flows(), 2, "request and reply open distinct flows");
    }
}
