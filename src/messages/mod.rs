//! Message types, their wire codecs, and their handlers.
//!
//! Every payload is the configured prefix, a 4-byte big-endian type id,
//! then the type's fixed fields (multi-byte integers big-endian). Each
//! handler module exposes `compose` (strict validation, returns the
//! payload or [`LedgerError::Compose`]) and `parse` (permissive: any
//! message-content problem becomes a persisted `invalid: ...` status,
//! never an error).
//!
//! [`LedgerError::Compose`]: crate::errors::LedgerError::Compose

pub mod bet;
pub mod broadcast;
pub mod btcpay;
pub mod burn;
pub mod callback;
pub mod cancel;
pub mod dividend;
pub mod issuance;
pub mod order;
pub mod send;

use anyhow::Result;
use tracing::debug;

use crate::config::Config;
use crate::store::{Ledger, TransactionRow};

/// The protocol's message types and their wire ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Asset transfer.
    Send,
    /// Open a decentralized-exchange order.
    Order,
    /// Prove the BTC leg of an order match was paid.
    BtcPay,
    /// Create, reissue, lock, or transfer an asset.
    Issuance,
    /// Call back a callable asset.
    Callback,
    /// Publish a feed value.
    Broadcast,
    /// Wager on a feed.
    Bet,
    /// Pay holders of an asset.
    Dividend,
    /// Destroy BTC for XCP.
    Burn,
    /// Cancel an open order or bet.
    Cancel,
}

impl MessageType {
    /// Wire id of this type.
    pub fn id(self) -> u32 {
        match self {
            MessageType::Send => 0,
            MessageType::Order => 10,
            MessageType::BtcPay => 11,
            MessageType::Issuance => 20,
            MessageType::Callback => 21,
            MessageType::Broadcast => 30,
            MessageType::Bet => 40,
            MessageType::Dividend => 50,
            MessageType::Burn => 60,
            MessageType::Cancel => 70,
        }
    }

    /// Type for a wire id, if known.
    pub fn from_id(id: u32) -> Option<Self> {
        Some(match id {
            0 => MessageType::Send,
            10 => MessageType::Order,
            11 => MessageType::BtcPay,
            20 => MessageType::Issuance,
            21 => MessageType::Callback,
            30 => MessageType::Broadcast,
            40 => MessageType::Bet,
            50 => MessageType::Dividend,
            60 => MessageType::Burn,
            70 => MessageType::Cancel,
            _ => return None,
        })
    }
}

/// Assemble a full payload: prefix, type id, body.
pub(crate) fn message_data(config: &Config, ty: MessageType, body: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(config.prefix.len() + 4 + body.len());
    data.extend_from_slice(&config.prefix);
    data.extend_from_slice(&ty.id().to_be_bytes());
    data.extend_from_slice(body);
    data
}

/// Dispatch a stored transaction to its handler.
///
/// A transaction paying the unspendable address is always a burn, data
/// or no data. Anything else routes on the type id; unknown ids mark
/// the transaction unsupported and are otherwise ignored.
pub fn handle(ledger: &Ledger, config: &Config, tx: &TransactionRow) -> Result<()> {
    if tx.destination.as_deref() == Some(config.unspendable.as_str()) {
        return burn::parse(ledger, config, tx);
    }
    if tx.data.len() < 4 {
        ledger.set_unsupported(tx.tx_index)?;
        debug!(tx_hash = %tx.tx_hash, "short payload, skipping");
        return Ok(());
    }
    let id = u32::from_be_bytes([tx.data[0], tx.data[1], tx.data[2], tx.data[3]]);
    let body = &tx.data[4..];
    match MessageType::from_id(id) {
        Some(MessageType::Send) => send::parse(ledger, config, tx, body),
        Some(MessageType::Order) => order::parse(ledger, config, tx, body),
        Some(MessageType::BtcPay) => btcpay::parse(ledger, config, tx, body),
        Some(MessageType::Issuance) => issuance::parse(ledger, config, tx, body),
        Some(MessageType::Callback) => callback::parse(ledger, config, tx, body),
        Some(MessageType::Broadcast) => broadcast::parse(ledger, config, tx, body),
        Some(MessageType::Bet) => bet::parse(ledger, config, tx, body),
        Some(MessageType::Dividend) => dividend::parse(ledger, config, tx, body),
        Some(MessageType::Burn) => burn::parse(ledger, config, tx),
        Some(MessageType::Cancel) => cancel::parse(ledger, config, tx, body),
        None => {
            ledger.set_unsupported(tx.tx_index)?;
            debug!(tx_hash = %tx.tx_hash, id, "unknown message type");
            Ok(())
        }
    }
}

/// Sequential big-endian reader over a payload body. Every accessor
/// returns `None` past the end, which handlers turn into an
/// `invalid: could not unpack` status.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.buf.len() < n {
            return None;
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Some(head)
    }

    pub(crate) fn u8(&mut self) -> Option<u8> {
        let b = self.take(1)?;
        Some(b[0])
    }

    pub(crate) fn u16(&mut self) -> Option<u16> {
        let b = self.take(2)?;
        Some(u16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> Option<u32> {
        let b = self.take(4)?;
        Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u64(&mut self) -> Option<u64> {
        let b = self.take(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Some(u64::from_be_bytes(a))
    }

    pub(crate) fn f32(&mut self) -> Option<f32> {
        let b = self.take(4)?;
        Some(f32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn f64(&mut self) -> Option<f64> {
        let b = self.take(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Some(f64::from_be_bytes(a))
    }

    pub(crate) fn hash32(&mut self) -> Option<[u8; 32]> {
        let b = self.take(32)?;
        let mut a = [0u8; 32];
        a.copy_from_slice(b);
        Some(a)
    }

    /// Remaining bytes, consuming the reader.
    pub(crate) fn rest(self) -> &'a [u8] {
        self.buf
    }

    /// True when the whole body was consumed.
    pub(crate) fn done(&self) -> bool {
        self.buf.is_empty()
    }
}

/// A wire quantity: u64 on the wire, i64 in the store. `None` means the
/// value does not fit, which handlers report as an overflow.
pub(crate) fn quantity(raw: u64) -> Option<i64> {
    i64::try_from(raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_ids_round_trip() {
        for ty in [
            MessageType::Send,
            MessageType::Order,
            MessageType::BtcPay,
            MessageType::Issuance,
            MessageType::Callback,
            MessageType::Broadcast,
            MessageType::Bet,
            MessageType::Dividend,
            MessageType::Burn,
            MessageType::Cancel,
        ] {
            assert_eq!(MessageType::from_id(ty.id()), Some(ty));
        }
        assert_eq!(MessageType::from_id(99), None);
    }

    #[test]
    fn reader_stops_at_end() {
        let mut r = Reader::new(&[0, 0, 0, 1, 0xff]);
        assert_eq!(r.u32(), Some(1));
        assert_eq!(r.u32(), None);
        assert_eq!(r.rest(), &[0xff]);
    }
}
