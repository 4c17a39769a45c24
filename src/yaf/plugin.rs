//! The application-label/DPI hook contract. Only the contract lives
//! here: no concrete plugin (the original source ships ~25 protocol
//! plugins under `applabel/plugins/`) is implemented. Grounded on the
//! `ypLabelPlugin_t` interface in the original source's `applabel.h`:
//! that interface passes plugins a raw pointer and a free callback for
//! per-flow state; this crate replaces both with a boxed trait object,
//! per the redesign recorded in `SPEC_FULL.md` section 9.

use std::any::Any;

use crate::yaf::flow::Flow;

/// Opaque per-flow state a [`LabelPlugin`] attaches to a [`Flow`] so it
/// can resume classification across multiple calls (e.g. accumulating
/// bytes across packets before recognising a protocol).
///
/// A plugin downcasts its own context back from `&dyn FlowContext` via
/// [`Any`]; the flow table never inspects the contents, only stores
/// and forwards the box.
pub trait FlowContext: Any + Send {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A cursor into a plugin's scratch buffer, following the original
/// source's `pos`-overflow convention: once the buffer has been
/// consumed past its end, `pos` is pinned at `len + 1` rather than
/// wrapping or saturating at `len`, so a caller can tell "exactly
/// exhausted" (`pos == len`) apart from "ran past the end" (`pos == len
/// + 1`).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PackCursor {
    pos: usize,
    len: usize,
}

impl PackCursor {
    pub fn new(len: usize) -> Self {
        PackCursor { pos: 0, len }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// True if `pos` has run past `len` (the overflow sentinel).
    pub fn overflowed(&self) -> bool {
        self.pos > self.len
    }

    /// True if there is at least one more byte available.
    pub fn has_remaining(&self) -> bool {
        self.pos < self.len
    }

    /// Advances the cursor by `n` bytes. Once `pos` would pass `len`,
    /// it is pinned at `len + 1` instead of continuing to grow,
    /// matching the source's overflow sentinel.
    pub fn advance(&mut self, n: usize) {
        if self.overflowed() {
            return;
        }
        self.pos = (self.pos + n).min(self.len + 1);
    }
}

/// A single packet available to a plugin's `scan`, carrying the
/// fields plugins commonly key classification on.
pub struct ScanInput<'a> {
    pub payload: &'a [u8],
    pub forward: bool,
    pub is_first_payload_packet: bool,
}

/// Outcome of [`LabelPlugin::scan`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScanResult {
    /// The plugin recognised the protocol; `label` identifies it
    /// (a private enterprise PEN-scoped application label, as in the
    /// original source).
    Matched { label: u16 },
    /// The plugin wants more packets before it can decide.
    NeedMoreData,
    /// The plugin is certain this is not its protocol.
    NoMatch,
}

/// Implemented by an application-label/DPI plugin. The flow table
/// invokes `scan` once it has accumulated the configured number of
/// payload-bearing packets for a flow (see
/// [`crate::yaf::config::YafConfig::applabel_packet_count`]), and
/// calls `process` on every payload packet thereafter once a plugin
/// has matched so it can keep extracting protocol-specific fields.
///
/// A plugin that panics is treated as a `NoMatch` and is not called
/// again for that flow; the flow table logs this via `tracing::warn!`
/// rather than propagating the panic, since one misbehaving plugin
/// should not take down flow processing.
pub trait LabelPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn scan(&self, input: &ScanInput<'_>, context: Option<&dyn FlowContext>) -> ScanResult;

    /// Called on subsequent payload packets after a match. Plugins
    /// that only need a one-shot identification can leave this as a
    /// no-op.
    fn process(&self, _flow: &Flow, _input: &ScanInput<'_>, _context: Option<&mut dyn FlowContext>) {}
}
