//! Row structs shared between SQL statements and message-log bindings.
//!
//! Field declaration order doubles as the serialized binding order and
//! as the column order of each `COLS` list, so the log is reproducible
//! byte for byte across implementations and reparses.
use rusqlite::Row;
use serde::Serialize;

/// A block header as stored.
#[derive(Debug, Clone, Serialize)]
pub struct BlockRow {
    /// Height.
    pub block_index: u32,
    /// Hex block hash.
    pub block_hash: String,
    /// Header timestamp.
    pub block_time: u32,
}

impl BlockRow {
    pub(crate) fn from_row(r: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            block_index: r.get(0)?,
            block_hash: r.get(1)?,
            block_time: r.get(2)?,
        })
    }
}

/// A stored protocol transaction (immutable apart from `supported`).
#[derive(Debug, Clone, Serialize)]
pub struct TransactionRow {
    /// Monotonic assignment order across the whole chain.
    pub tx_index: i64,
    /// Hex transaction hash.
    pub tx_hash: String,
    /// Containing block height.
    pub block_index: u32,
    /// Containing block hash.
    pub block_hash: String,
    /// Containing block timestamp.
    pub block_time: u32,
    /// Unanimous single-signature input address.
    pub source: String,
    /// First standard pay-to-pubkey-hash output, if any.
    pub destination: Option<String>,
    /// Satoshis paid to `destination`.
    pub btc_amount: i64,
    /// Miner fee in satoshis.
    pub fee: i64,
    /// Decoded payload with the protocol prefix stripped.
    pub data: Vec<u8>,
    /// False once dispatch failed to recognize the message type.
    pub supported: bool,
}

impl TransactionRow {
    pub(crate) fn from_row(r: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            tx_index: r.get(0)?,
            tx_hash: r.get(1)?,
            block_index: r.get(2)?,
            block_hash: r.get(3)?,
            block_time: r.get(4)?,
            source: r.get(5)?,
            destination: r.get(6)?,
            btc_amount: r.get(7)?,
            fee: r.get(8)?,
            data: r.get(9)?,
            supported: r.get(10)?,
        })
    }
}

/// Debit audit entry.
#[derive(Debug, Clone, Serialize)]
pub struct DebitRow {
    /// Block of the triggering event.
    pub block_index: u32,
    /// Debited address.
    pub address: String,
    /// Asset debited.
    pub asset: String,
    /// Quantity removed.
    pub quantity: i64,
    /// What kind of event caused the debit.
    pub action: String,
    /// Hash or id of the causing event.
    pub event: String,
}

/// Credit audit entry.
#[derive(Debug, Clone, Serialize)]
pub struct CreditRow {
    /// Block of the triggering event.
    pub block_index: u32,
    /// Credited address.
    pub address: String,
    /// Asset credited.
    pub asset: String,
    /// Quantity added.
    pub quantity: i64,
    /// What kind of event caused the credit.
    pub action: String,
    /// Hash or id of the causing event.
    pub event: String,
}

/// One location holding units of an asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Holder {
    /// Owning address.
    pub address: String,
    /// Units held there.
    pub quantity: i64,
    /// Escrow reference (order hash, match id, bet hash) or `None` for
    /// a free balance.
    pub escrow: Option<String>,
}

/// Send message row.
#[derive(Debug, Clone, Serialize)]
pub struct SendRow {
    /// Transaction index.
    pub tx_index: i64,
    /// Transaction hash.
    pub tx_hash: String,
    /// Block height.
    pub block_index: u32,
    /// Sender.
    pub source: String,
    /// Recipient.
    pub destination: Option<String>,
    /// Asset sent (absent when undecodable).
    pub asset: Option<String>,
    /// Quantity transferred after any oversend clamp.
    pub quantity: i64,
    /// "valid" or "invalid: ...".
    pub status: String,
}

/// Order message row.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRow {
    /// Transaction index.
    pub tx_index: i64,
    /// Transaction hash.
    pub tx_hash: String,
    /// Block height.
    pub block_index: u32,
    /// Offering address.
    pub source: String,
    /// Asset offered.
    pub give_asset: String,
    /// Original offered quantity.
    pub give_quantity: i64,
    /// Offered quantity still open.
    pub give_remaining: i64,
    /// Asset requested.
    pub get_asset: String,
    /// Original requested quantity.
    pub get_quantity: i64,
    /// Requested quantity still open.
    pub get_remaining: i64,
    /// Lifetime in blocks.
    pub expiration: u32,
    /// Height at which the order expires.
    pub expire_index: u32,
    /// BTC fee demanded from counterparties (BTC legs only).
    pub fee_required: i64,
    /// Unconsumed part of `fee_required`.
    pub fee_required_remaining: i64,
    /// BTC fee this order's transaction provided.
    pub fee_provided: i64,
    /// Unconsumed part of `fee_provided`.
    pub fee_provided_remaining: i64,
    /// open / filled / cancelled / expired / invalid: ...
    pub status: String,
}

impl OrderRow {
    pub(crate) const COLS: &'static str = "tx_index, tx_hash, block_index, source, give_asset, \
        give_quantity, give_remaining, get_asset, get_quantity, get_remaining, expiration, \
        expire_index, fee_required, fee_required_remaining, fee_provided, \
        fee_provided_remaining, status";

    pub(crate) fn from_row(r: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            tx_index: r.get(0)?,
            tx_hash: r.get(1)?,
            block_index: r.get(2)?,
            source: r.get(3)?,
            give_asset: r.get(4)?,
            give_quantity: r.get(5)?,
            give_remaining: r.get(6)?,
            get_asset: r.get(7)?,
            get_quantity: r.get(8)?,
            get_remaining: r.get(9)?,
            expiration: r.get(10)?,
            expire_index: r.get(11)?,
            fee_required: r.get(12)?,
            fee_required_remaining: r.get(13)?,
            fee_provided: r.get(14)?,
            fee_provided_remaining: r.get(15)?,
            status: r.get(16)?,
        })
    }
}

/// Order mutation payload (update log binding).
#[derive(Debug, Clone, Serialize)]
pub struct OrderUpdate {
    /// Order being updated.
    pub tx_hash: String,
    /// New give remaining.
    pub give_remaining: i64,
    /// New get remaining.
    pub get_remaining: i64,
    /// New required-fee remainder.
    pub fee_required_remaining: i64,
    /// New provided-fee remainder.
    pub fee_provided_remaining: i64,
    /// New status.
    pub status: String,
}

/// Order match row.
#[derive(Debug, Clone, Serialize)]
pub struct OrderMatchRow {
    /// Concatenated tx hashes of both orders.
    pub id: String,
    /// Earlier order's tx index.
    pub tx0_index: i64,
    /// Earlier order's tx hash.
    pub tx0_hash: String,
    /// Earlier order's source.
    pub tx0_address: String,
    /// Later order's tx index.
    pub tx1_index: i64,
    /// Later order's tx hash.
    pub tx1_hash: String,
    /// Later order's source.
    pub tx1_address: String,
    /// Asset flowing tx0 → tx1.
    pub forward_asset: String,
    /// Quantity flowing tx0 → tx1.
    pub forward_quantity: i64,
    /// Asset flowing tx1 → tx0.
    pub backward_asset: String,
    /// Quantity flowing tx1 → tx0.
    pub backward_quantity: i64,
    /// Block of the earlier order.
    pub tx0_block_index: u32,
    /// Block of the later order.
    pub tx1_block_index: u32,
    /// Block the match was made in.
    pub block_index: u32,
    /// Height at which a pending match expires.
    pub match_expire_index: u32,
    /// BTC fee consumed by this match.
    pub fee_paid: i64,
    /// pending / completed / expired / cancelled.
    pub status: String,
}

impl OrderMatchRow {
    pub(crate) const COLS: &'static str = "id, tx0_index, tx0_hash, tx0_address, tx1_index, \
        tx1_hash, tx1_address, forward_asset, forward_quantity, backward_asset, \
        backward_quantity, tx0_block_index, tx1_block_index, block_index, match_expire_index, \
        fee_paid, status";

    pub(crate) fn from_row(r: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            tx0_index: r.get(1)?,
            tx0_hash: r.get(2)?,
            tx0_address: r.get(3)?,
            tx1_index: r.get(4)?,
            tx1_hash: r.get(5)?,
            tx1_address: r.get(6)?,
            forward_asset: r.get(7)?,
            forward_quantity: r.get(8)?,
            backward_asset: r.get(9)?,
            backward_quantity: r.get(10)?,
            tx0_block_index: r.get(11)?,
            tx1_block_index: r.get(12)?,
            block_index: r.get(13)?,
            match_expire_index: r.get(14)?,
            fee_paid: r.get(15)?,
            status: r.get(16)?,
        })
    }
}

/// Generic status-only mutation (update log binding).
#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    /// Row id (match id).
    pub id: String,
    /// New status.
    pub status: String,
}

/// BTCPay settlement row.
#[derive(Debug, Clone, Serialize)]
pub struct BtcPayRow {
    /// Transaction index.
    pub tx_index: i64,
    /// Transaction hash.
    pub tx_hash: String,
    /// Block height.
    pub block_index: u32,
    /// Paying address.
    pub source: String,
    /// Paid address.
    pub destination: Option<String>,
    /// Satoshis paid on-chain.
    pub btc_amount: i64,
    /// Settled order match.
    pub order_match_id: Option<String>,
    /// "valid" or "invalid: ...".
    pub status: String,
}

/// Issuance event row.
#[derive(Debug, Clone, Serialize)]
pub struct IssuanceRow {
    /// Transaction index.
    pub tx_index: i64,
    /// Transaction hash.
    pub tx_hash: String,
    /// Block height.
    pub block_index: u32,
    /// Asset name.
    pub asset: String,
    /// Quantity issued by this event (0 for transfers/locks).
    pub quantity: i64,
    /// Subunit scale flag.
    pub divisible: bool,
    /// Message source.
    pub source: String,
    /// Issuer after this event.
    pub issuer: String,
    /// True for ownership transfers.
    pub transfer: bool,
    /// Whether the asset is callable.
    pub callable: bool,
    /// Unix time after which a callable asset may be called.
    pub call_date: u32,
    /// XCP paid per unit on callback.
    pub call_price: f64,
    /// Free-form description ("LOCK" freezes future issuance).
    pub description: String,
    /// XCP fee charged for this event.
    pub fee_paid: i64,
    /// True when this event locked the asset.
    pub locked: bool,
    /// "valid" or "invalid: ...".
    pub status: String,
}

impl IssuanceRow {
    pub(crate) const COLS: &'static str = "tx_index, tx_hash, block_index, asset, quantity, \
        divisible, source, issuer, transfer, callable, call_date, call_price, description, \
        fee_paid, locked, status";

    pub(crate) fn from_row(r: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            tx_index: r.get(0)?,
            tx_hash: r.get(1)?,
            block_index: r.get(2)?,
            asset: r.get(3)?,
            quantity: r.get(4)?,
            divisible: r.get(5)?,
            source: r.get(6)?,
            issuer: r.get(7)?,
            transfer: r.get(8)?,
            callable: r.get(9)?,
            call_date: r.get(10)?,
            call_price: r.get(11)?,
            description: r.get(12)?,
            fee_paid: r.get(13)?,
            locked: r.get(14)?,
            status: r.get(15)?,
        })
    }
}

/// Broadcast (feed update) row.
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastRow {
    /// Transaction index.
    pub tx_index: i64,
    /// Transaction hash.
    pub tx_hash: String,
    /// Block height.
    pub block_index: u32,
    /// Feed address.
    pub source: String,
    /// Feed-supplied unix timestamp, strictly increasing per source.
    pub timestamp: u32,
    /// Numeric value published.
    pub value: f64,
    /// Settlement fee fraction, scaled by 1e8.
    pub fee_fraction_int: i64,
    /// Free-form text ("LOCK" locks the feed).
    pub text: String,
    /// True when this broadcast locked the feed.
    pub locked: bool,
    /// "valid" or "invalid: ...".
    pub status: String,
}

impl BroadcastRow {
    pub(crate) const COLS: &'static str = "tx_index, tx_hash, block_index, source, timestamp, \
        value, fee_fraction_int, text, locked, status";

    pub(crate) fn from_row(r: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            tx_index: r.get(0)?,
            tx_hash: r.get(1)?,
            block_index: r.get(2)?,
            source: r.get(3)?,
            timestamp: r.get(4)?,
            value: r.get(5)?,
            fee_fraction_int: r.get(6)?,
            text: r.get(7)?,
            locked: r.get(8)?,
            status: r.get(9)?,
        })
    }
}

/// Bet message row.
#[derive(Debug, Clone, Serialize)]
pub struct BetRow {
    /// Transaction index.
    pub tx_index: i64,
    /// Transaction hash.
    pub tx_hash: String,
    /// Block height.
    pub block_index: u32,
    /// Wagering address.
    pub source: String,
    /// Oracle feed the bet references (the tx destination).
    pub feed_address: String,
    /// 0 BullCFD, 1 BearCFD, 2 Equal, 3 NotEqual.
    pub bet_type: u16,
    /// Unix-time deadline the oracle settles against.
    pub deadline: u32,
    /// XCP staked.
    pub wager_quantity: i64,
    /// Unmatched stake.
    pub wager_remaining: i64,
    /// XCP demanded from the counterparty.
    pub counterwager_quantity: i64,
    /// Unmatched counterwager.
    pub counterwager_remaining: i64,
    /// Target for Equal/NotEqual bets.
    pub target_value: f64,
    /// Leverage as a fraction of 5040.
    pub leverage: u32,
    /// Lifetime in blocks.
    pub expiration: u32,
    /// Height at which the bet expires.
    pub expire_index: u32,
    /// Feed fee fraction snapshot at bet time, scaled by 1e8.
    pub fee_fraction_int: i64,
    /// open / filled / cancelled / expired / invalid: ...
    pub status: String,
}

impl BetRow {
    pub(crate) const COLS: &'static str = "tx_index, tx_hash, block_index, source, feed_address, \
        bet_type, deadline, wager_quantity, wager_remaining, counterwager_quantity, \
        counterwager_remaining, target_value, leverage, expiration, expire_index, \
        fee_fraction_int, status";

    pub(crate) fn from_row(r: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            tx_index: r.get(0)?,
            tx_hash: r.get(1)?,
            block_index: r.get(2)?,
            source: r.get(3)?,
            feed_address: r.get(4)?,
            bet_type: r.get(5)?,
            deadline: r.get(6)?,
            wager_quantity: r.get(7)?,
            wager_remaining: r.get(8)?,
            counterwager_quantity: r.get(9)?,
            counterwager_remaining: r.get(10)?,
            target_value: r.get(11)?,
            leverage: r.get(12)?,
            expiration: r.get(13)?,
            expire_index: r.get(14)?,
            fee_fraction_int: r.get(15)?,
            status: r.get(16)?,
        })
    }
}

/// Bet mutation payload (update log binding).
#[derive(Debug, Clone, Serialize)]
pub struct BetUpdate {
    /// Bet being updated.
    pub tx_hash: String,
    /// New unmatched stake.
    pub wager_remaining: i64,
    /// New unmatched counterwager.
    pub counterwager_remaining: i64,
    /// New status.
    pub status: String,
}

/// Bet match row.
#[derive(Debug, Clone, Serialize)]
pub struct BetMatchRow {
    /// Concatenated tx hashes of both bets.
    pub id: String,
    /// Earlier bet's tx index.
    pub tx0_index: i64,
    /// Earlier bet's tx hash.
    pub tx0_hash: String,
    /// Earlier bet's source.
    pub tx0_address: String,
    /// Later bet's tx index.
    pub tx1_index: i64,
    /// Later bet's tx hash.
    pub tx1_hash: String,
    /// Later bet's source.
    pub tx1_address: String,
    /// Earlier bet's type.
    pub tx0_bet_type: u16,
    /// Later bet's type.
    pub tx1_bet_type: u16,
    /// Shared oracle feed.
    pub feed_address: String,
    /// Feed value at match time (CFD baseline).
    pub initial_value: f64,
    /// Shared deadline.
    pub deadline: u32,
    /// Shared target value.
    pub target_value: f64,
    /// Shared leverage.
    pub leverage: u32,
    /// tx0's escrowed stake.
    pub forward_quantity: i64,
    /// tx1's escrowed stake.
    pub backward_quantity: i64,
    /// Block of the earlier bet.
    pub tx0_block_index: u32,
    /// Block of the later bet.
    pub tx1_block_index: u32,
    /// Block the match was made in.
    pub block_index: u32,
    /// Height at which an unresolved match expires.
    pub match_expire_index: u32,
    /// Shared fee fraction, scaled by 1e8.
    pub fee_fraction_int: i64,
    /// pending / settled… / expired / cancelled / dropped.
    pub status: String,
}

impl BetMatchRow {
    pub(crate) const COLS: &'static str = "id, tx0_index, tx0_hash, tx0_address, tx1_index, \
        tx1_hash, tx1_address, tx0_bet_type, tx1_bet_type, feed_address, initial_value, \
        deadline, target_value, leverage, forward_quantity, backward_quantity, \
        tx0_block_index, tx1_block_index, block_index, match_expire_index, fee_fraction_int, \
        status";

    pub(crate) fn from_row(r: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            tx0_index: r.get(1)?,
            tx0_hash: r.get(2)?,
            tx0_address: r.get(3)?,
            tx1_index: r.get(4)?,
            tx1_hash: r.get(5)?,
            tx1_address: r.get(6)?,
            tx0_bet_type: r.get(7)?,
            tx1_bet_type: r.get(8)?,
            feed_address: r.get(9)?,
            initial_value: r.get(10)?,
            deadline: r.get(11)?,
            target_value: r.get(12)?,
            leverage: r.get(13)?,
            forward_quantity: r.get(14)?,
            backward_quantity: r.get(15)?,
            tx0_block_index: r.get(16)?,
            tx1_block_index: r.get(17)?,
            block_index: r.get(18)?,
            match_expire_index: r.get(19)?,
            fee_fraction_int: r.get(20)?,
            status: r.get(21)?,
        })
    }
}

/// Dividend event row.
#[derive(Debug, Clone, Serialize)]
pub struct DividendRow {
    /// Transaction index.
    pub tx_index: i64,
    /// Transaction hash.
    pub tx_hash: String,
    /// Block height.
    pub block_index: u32,
    /// Paying address.
    pub source: String,
    /// Asset whose holders are paid.
    pub asset: Option<String>,
    /// Asset the dividend is paid in.
    pub dividend_asset: Option<String>,
    /// Payout per whole unit held.
    pub quantity_per_unit: i64,
    /// "valid" or "invalid: ...".
    pub status: String,
}

/// Burn event row.
#[derive(Debug, Clone, Serialize)]
pub struct BurnRow {
    /// Transaction index.
    pub tx_index: i64,
    /// Transaction hash.
    pub tx_hash: String,
    /// Block height.
    pub block_index: u32,
    /// Burning address.
    pub source: String,
    /// Satoshis destroyed (after the lifetime cap).
    pub burned: i64,
    /// XCP satoshis minted in exchange.
    pub earned: i64,
    /// "valid" or "invalid: ...".
    pub status: String,
}

/// Cancel event row.
#[derive(Debug, Clone, Serialize)]
pub struct CancelRow {
    /// Transaction index.
    pub tx_index: i64,
    /// Transaction hash.
    pub tx_hash: String,
    /// Block height.
    pub block_index: u32,
    /// Cancelling address.
    pub source: String,
    /// Hash of the order or bet being cancelled.
    pub offer_hash: String,
    /// "valid" or "invalid: ...".
    pub status: String,
}

/// Callback event row.
#[derive(Debug, Clone, Serialize)]
pub struct CallbackRow {
    /// Transaction index.
    pub tx_index: i64,
    /// Transaction hash.
    pub tx_hash: String,
    /// Block height.
    pub block_index: u32,
    /// Calling issuer.
    pub source: String,
    /// Fraction of each holding called back.
    pub fraction: f64,
    /// Asset called back.
    pub asset: Option<String>,
    /// "valid" or "invalid: ...".
    pub status: String,
}

/// Order expiration audit row.
#[derive(Debug, Clone, Serialize)]
pub struct OrderExpirationRow {
    /// Expired order's tx index.
    pub order_index: i64,
    /// Expired order's tx hash.
    pub order_hash: String,
    /// Order source refunded.
    pub source: String,
    /// Height of expiration.
    pub block_index: u32,
}

/// Bet expiration audit row.
#[derive(Debug, Clone, Serialize)]
pub struct BetExpirationRow {
    /// Expired bet's tx index.
    pub bet_index: i64,
    /// Expired bet's tx hash.
    pub bet_hash: String,
    /// Bet source refunded.
    pub source: String,
    /// Height of expiration.
    pub block_index: u32,
}

/// Order-match expiration audit row.
#[derive(Debug, Clone, Serialize)]
pub struct OrderMatchExpirationRow {
    /// Expired match id.
    pub order_match_id: String,
    /// Earlier side.
    pub tx0_address: String,
    /// Later side.
    pub tx1_address: String,
    /// Height of expiration.
    pub block_index: u32,
}

/// Bet-match expiration audit row.
#[derive(Debug, Clone, Serialize)]
pub struct BetMatchExpirationRow {
    /// Expired match id.
    pub bet_match_id: String,
    /// Earlier side.
    pub tx0_address: String,
    /// Later side.
    pub tx1_address: String,
    /// Height of expiration.
    pub block_index: u32,
}

/// Message-log row as read back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    /// Strictly increasing log position.
    pub message_index: i64,
    /// Block the mutation belongs to.
    pub block_index: u32,
    /// "insert" or "update".
    pub command: String,
    /// Mutated table.
    pub category: String,
    /// Serialized bindings payload.
    pub bindings: String,
}
