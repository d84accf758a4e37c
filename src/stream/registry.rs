use std::collections::BTreeSet;

use super::wire::{Action, ControlMessage};

/// Accumulated subscription interest: a set of symbols and a set of
/// exchanges. The server applies cross-product semantics (every tracked
/// symbol on every tracked exchange).
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    symbols: BTreeSet<String>,
    exchanges: BTreeSet<String>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add symbols/exchanges to the tracked sets. Returns true if anything
    /// actually changed; re-subscribing to present entries is a no-op.
    pub fn subscribe(&mut self, symbols: &[String], exchanges: &[String]) -> bool {
        let mut changed = false;
        for s in symbols {
            changed |= self.symbols.insert(s.clone());
        }
        for e in exchanges {
            changed |= self.exchanges.insert(e.clone());
        }
        changed
    }

    /// Remove symbols/exchanges from the tracked sets. Returns true if
    /// anything was removed.
    pub fn unsubscribe(&mut self, symbols: &[String], exchanges: &[String]) -> bool {
        let mut changed = false;
        for s in symbols {
            changed |= self.symbols.remove(s);
        }
        for e in exchanges {
            changed |= self.exchanges.remove(e);
        }
        changed
    }

    pub fn symbols(&self) -> Vec<String> {
        self.symbols.iter().cloned().collect()
    }

    pub fn exchanges(&self) -> Vec<String> {
        self.exchanges.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty() && self.exchanges.is_empty()
    }

    /// Full-set subscribe message sent on every transition into Open. This is
    /// never a delta: retransmitting everything makes the server's view
    /// converge even after unsubscribes it missed during downtime.
    pub fn resync_message(&self) -> Option<ControlMessage> {
        if self.is_empty() {
            return None;
        }
        Some(ControlMessage {
            action: Action::Subscribe,
            symbols: self.symbols(),
            exchanges: self.exchanges(),
        })
    }
}
