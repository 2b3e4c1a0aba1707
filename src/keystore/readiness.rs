//! Buffers key additions that arrive before the store has any secret.

use std::collections::VecDeque;

use super::types::{ExternalKeyInput, InternalKeyInput};

#[derive(Debug, Default)]
pub struct ReadinessGate {
    ready: bool,
    internal: VecDeque<InternalKeyInput>,
    external: VecDeque<ExternalKeyInput>,
}

/// Requests held back until the first secret existed, in arrival order.
#[derive(Debug, Default)]
pub struct PendingKeys {
    pub internal: Vec<InternalKeyInput>,
    pub external: Vec<ExternalKeyInput>,
}

impl PendingKeys {
    pub fn is_empty(&self) -> bool {
        self.internal.is_empty() && self.external.is_empty()
    }
}

impl ReadinessGate {
    pub fn new(ready: bool) -> Self {
        Self { ready, ..Default::default() }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Queues `items` if not ready, otherwise hands them back.
    pub fn hold_internal(&mut self, items: Vec<InternalKeyInput>) -> Option<Vec<InternalKeyInput>> {
        if self.ready {
            return Some(items);
        }
        self.internal.extend(items);
        None
    }

    pub fn hold_external(&mut self, items: Vec<ExternalKeyInput>) -> Option<Vec<ExternalKeyInput>> {
        if self.ready {
            return Some(items);
        }
        self.external.extend(items);
        None
    }

    /// Puts requests that could not be stored back at the front of the queue.
    pub fn requeue_internal(&mut self, items: Vec<InternalKeyInput>) {
        for item in items.into_iter().rev() {
            self.internal.push_front(item);
        }
    }

    pub fn requeue_external(&mut self, items: Vec<ExternalKeyInput>) {
        for item in items.into_iter().rev() {
            self.external.push_front(item);
        }
    }

    /// Drains requests left over from a failed flush.
    pub fn take_internal(&mut self) -> Vec<InternalKeyInput> {
        self.internal.drain(..).collect()
    }

    pub fn take_external(&mut self) -> Vec<ExternalKeyInput> {
        self.external.drain(..).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.internal.len() + self.external.len()
    }

    /// Flips to ready. The buffered requests are returned only on the first call.
    pub fn mark_ready(&mut self) -> Option<PendingKeys> {
        if self.ready {
            return None;
        }
        self.ready = true;
        Some(PendingKeys {
            internal: self.internal.drain(..).collect(),
            external: self.external.drain(..).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::types::{KeyMeta, KeyType};

    fn external(addr: &str) -> ExternalKeyInput {
        ExternalKeyInput {
            addr: addr.to_string(),
            key_type: KeyType::Trezor,
            label: None,
            dedicated_to_one_account: false,
            meta: KeyMeta::default(),
        }
    }

    #[test]
    fn test_buffers_until_ready_then_flushes_once() {
        let mut gate = ReadinessGate::new(false);
        assert!(gate.hold_internal(vec![InternalKeyInput::new("aa")]).is_none());
        assert!(gate.hold_external(vec![external("0x01"), external("0x02")]).is_none());
        assert_eq!(gate.pending_len(), 3);

        let pending = gate.mark_ready().unwrap();
        assert_eq!(pending.internal.len(), 1);
        let addrs: Vec<_> = pending.external.iter().map(|k| k.addr.as_str()).collect();
        assert_eq!(addrs, vec!["0x01", "0x02"]);

        assert!(gate.mark_ready().is_none());
        assert_eq!(gate.pending_len(), 0);
    }

    #[test]
    fn test_ready_gate_passes_items_through() {
        let mut gate = ReadinessGate::new(true);
        let back = gate.hold_external(vec![external("0x03")]).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(gate.pending_len(), 0);
    }

    #[test]
    fn test_requeued_items_keep_their_order() {
        let mut gate = ReadinessGate::new(false);
        gate.hold_external(vec![external("0x01"), external("0x02")]);
        let pending = gate.mark_ready().unwrap();
        gate.requeue_external(pending.external);
        assert_eq!(gate.pending_len(), 2);

        assert_eq!(gate.hold_external(vec![external("0x03")]).unwrap().len(), 1);
        let addrs: Vec<_> = gate.take_external().into_iter().map(|k| k.addr).collect();
        assert_eq!(addrs, vec!["0x01", "0x02"]);
        assert_eq!(gate.pending_len(), 0);
    }
}
