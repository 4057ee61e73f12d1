//! Credit Based Flow Control
//!
//! Two independent directions per link:
//!
//! * **RX**: the peer sends `SERVER_ENABLED`; from then on every write command
//!   it sends costs one credit, and credits are handed back as the application
//!   drains the receive queue
//! * **TX**: the peer grants credits with `GIVE_CREDIT`; every notification
//!   on TX costs one

use crate::{
    constants::{CBFC_CREDIT_RETURN_THRESHOLD, CBFC_INITIAL_CREDIT},
    stack::WriteKind,
};

/// Credit counters of one link
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CreditLedger {
    rx_enabled: bool,
    tx_enabled: bool,
    /// Packets we may still send
    local_credit: u16,
    /// Credits owed to the peer, not yet granted
    peer_credit: u8,
}

impl CreditLedger {
    /// Ledger of a fresh link, flow control off in both directions
    #[must_use]
    pub const fn new() -> Self {
        Self {
            rx_enabled: false,
            tx_enabled: false,
            local_credit: 0,
            peer_credit: 0,
        }
    }

    /// Flow control of peer writes is on
    #[must_use]
    pub const fn rx_enabled(&self) -> bool {
        self.rx_enabled
    }

    /// Flow control of our notifications is on
    #[must_use]
    pub const fn tx_enabled(&self) -> bool {
        self.tx_enabled
    }

    /// Credits left for outgoing data
    #[must_use]
    pub const fn local_credit(&self) -> u16 {
        self.local_credit
    }

    /// Credits owed to the peer
    #[must_use]
    pub const fn peer_credit(&self) -> u8 {
        self.peer_credit
    }

    /// The peer switched on RX flow control; the full window is owed to it
    pub fn enable_rx(&mut self) {
        self.rx_enabled = true;
        self.peer_credit = CBFC_INITIAL_CREDIT;
    }

    /// The peer granted `credit` packets
    pub fn give(&mut self, credit: u8) {
        self.tx_enabled = true;
        let total = self.local_credit.saturating_add(u16::from(credit));
        if total == u16::MAX {
            warn!("[TRSPS] Local credit saturated");
        }
        self.local_credit = total;
    }

    /// Whether a notification may go out now
    #[must_use]
    pub const fn can_send(&self) -> bool {
        !self.tx_enabled || self.local_credit > 0
    }

    /// Account for one notification sent on TX
    pub fn consume(&mut self) {
        if self.tx_enabled {
            self.local_credit = self.local_credit.saturating_sub(1);
        }
    }

    /// Account for one packet drained from the receive queue.
    ///
    /// Returns whether enough credit is owed to hand it back.
    pub fn on_drained(&mut self, kind: WriteKind) -> bool {
        if self.rx_enabled && kind == WriteKind::Command {
            self.peer_credit = self.peer_credit.saturating_add(1);
        }
        self.return_due()
    }

    /// Whether owed credit has reached the return threshold
    #[must_use]
    pub const fn return_due(&self) -> bool {
        self.rx_enabled && self.peer_credit >= CBFC_CREDIT_RETURN_THRESHOLD
    }

    /// The owed credit was granted to the peer
    pub fn granted(&mut self) {
        self.peer_credit = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_ledger_never_blocks() {
        let mut ledger = CreditLedger::new();
        assert!(ledger.can_send());
        ledger.consume();
        assert_eq!(ledger.local_credit(), 0);
        assert!(!ledger.on_drained(WriteKind::Command));
        assert_eq!(ledger.peer_credit(), 0);
    }

    #[test]
    fn test_tx_credit_accounting() {
        let mut ledger = CreditLedger::new();
        ledger.give(2);
        assert!(ledger.tx_enabled());
        ledger.consume();
        assert!(ledger.can_send());
        ledger.consume();
        assert!(!ledger.can_send());
        ledger.give(1);
        assert_eq!(ledger.local_credit(), 1);
    }

    #[test]
    fn test_credit_return_threshold() {
        let mut ledger = CreditLedger::new();
        ledger.enable_rx();
        assert_eq!(ledger.peer_credit(), CBFC_INITIAL_CREDIT);
        ledger.granted();

        for _ in 1..CBFC_CREDIT_RETURN_THRESHOLD {
            assert!(!ledger.on_drained(WriteKind::Command));
        }
        // Requests are flow controlled by the ATT protocol itself.
        assert!(!ledger.on_drained(WriteKind::Request));
        assert!(ledger.on_drained(WriteKind::Command));
        assert_eq!(ledger.peer_credit(), CBFC_CREDIT_RETURN_THRESHOLD);

        ledger.granted();
        assert_eq!(ledger.peer_credit(), 0);
        assert!(!ledger.return_due());
    }

    #[test]
    fn test_give_saturates() {
        let mut ledger = CreditLedger::new();
        for _ in 0..=(u16::MAX / u16::from(u8::MAX)) {
            ledger.give(u8::MAX);
        }
        assert_eq!(ledger.local_credit(), u16::MAX);
    }
}
