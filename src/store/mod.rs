//! The ledger store: every table the state machine derives from block
//! history, the debit/credit substrate, the sequence generators, and
//! the append-only message log external consumers replicate from.
//!
//! Single-writer by design: one [`rusqlite::Connection`], all of a
//! block's mutations wrapped by the caller in one sqlite transaction so
//! readers never observe a partially applied block.

mod rows;

pub use rows::*;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::PathBuf;
use tracing::debug;

use crate::config::{BTC, MAX_INT, XCP};
use crate::errors::LedgerError;

/// Handle to the sqlite-backed ledger.
pub struct Ledger {
    conn: Connection,
}

const SCHEMA_IMMUTABLE: &str = r#"
CREATE TABLE IF NOT EXISTS blocks (
    block_index INTEGER PRIMARY KEY,
    block_hash  TEXT UNIQUE NOT NULL,
    block_time  INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS transactions (
    tx_index    INTEGER PRIMARY KEY,
    tx_hash     TEXT UNIQUE NOT NULL,
    block_index INTEGER NOT NULL,
    block_hash  TEXT NOT NULL,
    block_time  INTEGER NOT NULL,
    source      TEXT NOT NULL,
    destination TEXT,
    btc_amount  INTEGER NOT NULL,
    fee         INTEGER NOT NULL,
    data        BLOB NOT NULL,
    supported   INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS transactions_block_index_idx ON transactions (block_index);
CREATE TABLE IF NOT EXISTS sequences (
    name  TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
"#;

const SCHEMA_DERIVED: &str = r#"
CREATE TABLE IF NOT EXISTS balances (
    address  TEXT NOT NULL,
    asset    TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    PRIMARY KEY (address, asset)
);
CREATE TABLE IF NOT EXISTS debits (
    block_index INTEGER NOT NULL,
    address     TEXT NOT NULL,
    asset       TEXT NOT NULL,
    quantity    INTEGER NOT NULL,
    action      TEXT NOT NULL,
    event       TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS credits (
    block_index INTEGER NOT NULL,
    address     TEXT NOT NULL,
    asset       TEXT NOT NULL,
    quantity    INTEGER NOT NULL,
    action      TEXT NOT NULL,
    event       TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS sends (
    tx_index    INTEGER PRIMARY KEY,
    tx_hash     TEXT UNIQUE NOT NULL,
    block_index INTEGER NOT NULL,
    source      TEXT NOT NULL,
    destination TEXT,
    asset       TEXT,
    quantity    INTEGER NOT NULL,
    status      TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS orders (
    tx_index               INTEGER PRIMARY KEY,
    tx_hash                TEXT UNIQUE NOT NULL,
    block_index            INTEGER NOT NULL,
    source                 TEXT NOT NULL,
    give_asset             TEXT NOT NULL,
    give_quantity          INTEGER NOT NULL,
    give_remaining         INTEGER NOT NULL,
    get_asset              TEXT NOT NULL,
    get_quantity           INTEGER NOT NULL,
    get_remaining          INTEGER NOT NULL,
    expiration             INTEGER NOT NULL,
    expire_index           INTEGER NOT NULL,
    fee_required           INTEGER NOT NULL,
    fee_required_remaining INTEGER NOT NULL,
    fee_provided           INTEGER NOT NULL,
    fee_provided_remaining INTEGER NOT NULL,
    status                 TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS orders_pair_idx ON orders (give_asset, get_asset, status);
CREATE TABLE IF NOT EXISTS order_matches (
    id                 TEXT PRIMARY KEY,
    tx0_index          INTEGER NOT NULL,
    tx0_hash           TEXT NOT NULL,
    tx0_address        TEXT NOT NULL,
    tx1_index          INTEGER NOT NULL,
    tx1_hash           TEXT NOT NULL,
    tx1_address        TEXT NOT NULL,
    forward_asset      TEXT NOT NULL,
    forward_quantity   INTEGER NOT NULL,
    backward_asset     TEXT NOT NULL,
    backward_quantity  INTEGER NOT NULL,
    tx0_block_index    INTEGER NOT NULL,
    tx1_block_index    INTEGER NOT NULL,
    block_index        INTEGER NOT NULL,
    match_expire_index INTEGER NOT NULL,
    fee_paid           INTEGER NOT NULL,
    status             TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS btcpays (
    tx_index       INTEGER PRIMARY KEY,
    tx_hash        TEXT UNIQUE NOT NULL,
    block_index    INTEGER NOT NULL,
    source         TEXT NOT NULL,
    destination    TEXT,
    btc_amount     INTEGER NOT NULL,
    order_match_id TEXT,
    status         TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS issuances (
    tx_index    INTEGER PRIMARY KEY,
    tx_hash     TEXT UNIQUE NOT NULL,
    block_index INTEGER NOT NULL,
    asset       TEXT NOT NULL,
    quantity    INTEGER NOT NULL,
    divisible   INTEGER NOT NULL,
    source      TEXT NOT NULL,
    issuer      TEXT NOT NULL,
    transfer    INTEGER NOT NULL,
    callable    INTEGER NOT NULL,
    call_date   INTEGER NOT NULL,
    call_price  REAL NOT NULL,
    description TEXT NOT NULL,
    fee_paid    INTEGER NOT NULL,
    locked      INTEGER NOT NULL,
    status      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS issuances_asset_idx ON issuances (asset, status);
CREATE TABLE IF NOT EXISTS broadcasts (
    tx_index         INTEGER PRIMARY KEY,
    tx_hash          TEXT UNIQUE NOT NULL,
    block_index      INTEGER NOT NULL,
    source           TEXT NOT NULL,
    timestamp        INTEGER NOT NULL,
    value            REAL NOT NULL,
    fee_fraction_int INTEGER NOT NULL,
    text             TEXT NOT NULL,
    locked           INTEGER NOT NULL,
    status           TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS broadcasts_source_idx ON broadcasts (source, status);
CREATE TABLE IF NOT EXISTS bets (
    tx_index               INTEGER PRIMARY KEY,
    tx_hash                TEXT UNIQUE NOT NULL,
    block_index            INTEGER NOT NULL,
    source                 TEXT NOT NULL,
    feed_address           TEXT NOT NULL,
    bet_type               INTEGER NOT NULL,
    deadline               INTEGER NOT NULL,
    wager_quantity         INTEGER NOT NULL,
    wager_remaining        INTEGER NOT NULL,
    counterwager_quantity  INTEGER NOT NULL,
    counterwager_remaining INTEGER NOT NULL,
    target_value           REAL NOT NULL,
    leverage               INTEGER NOT NULL,
    expiration             INTEGER NOT NULL,
    expire_index           INTEGER NOT NULL,
    fee_fraction_int       INTEGER NOT NULL,
    status                 TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS bets_feed_idx ON bets (feed_address, status);
CREATE TABLE IF NOT EXISTS bet_matches (
    id                 TEXT PRIMARY KEY,
    tx0_index          INTEGER NOT NULL,
    tx0_hash           TEXT NOT NULL,
    tx0_address        TEXT NOT NULL,
    tx1_index          INTEGER NOT NULL,
    tx1_hash           TEXT NOT NULL,
    tx1_address        TEXT NOT NULL,
    tx0_bet_type       INTEGER NOT NULL,
    tx1_bet_type       INTEGER NOT NULL,
    feed_address       TEXT NOT NULL,
    initial_value      REAL NOT NULL,
    deadline           INTEGER NOT NULL,
    target_value       REAL NOT NULL,
    leverage           INTEGER NOT NULL,
    forward_quantity   INTEGER NOT NULL,
    backward_quantity  INTEGER NOT NULL,
    tx0_block_index    INTEGER NOT NULL,
    tx1_block_index    INTEGER NOT NULL,
    block_index        INTEGER NOT NULL,
    match_expire_index INTEGER NOT NULL,
    fee_fraction_int   INTEGER NOT NULL,
    status             TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS bet_matches_feed_idx ON bet_matches (feed_address, status);
CREATE TABLE IF NOT EXISTS dividends (
    tx_index          INTEGER PRIMARY KEY,
    tx_hash           TEXT UNIQUE NOT NULL,
    block_index       INTEGER NOT NULL,
    source            TEXT NOT NULL,
    asset             TEXT,
    dividend_asset    TEXT,
    quantity_per_unit INTEGER NOT NULL,
    status            TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS burns (
    tx_index    INTEGER PRIMARY KEY,
    tx_hash     TEXT UNIQUE NOT NULL,
    block_index INTEGER NOT NULL,
    source      TEXT NOT NULL,
    burned      INTEGER NOT NULL,
    earned      INTEGER NOT NULL,
    status      TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS cancels (
    tx_index    INTEGER PRIMARY KEY,
    tx_hash     TEXT UNIQUE NOT NULL,
    block_index INTEGER NOT NULL,
    source      TEXT NOT NULL,
    offer_hash  TEXT NOT NULL,
    status      TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS callbacks (
    tx_index    INTEGER PRIMARY KEY,
    tx_hash     TEXT UNIQUE NOT NULL,
    block_index INTEGER NOT NULL,
    source      TEXT NOT NULL,
    fraction    REAL NOT NULL,
    asset       TEXT,
    status      TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS order_expirations (
    order_index INTEGER NOT NULL,
    order_hash  TEXT NOT NULL,
    source      TEXT NOT NULL,
    block_index INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS bet_expirations (
    bet_index   INTEGER NOT NULL,
    bet_hash    TEXT NOT NULL,
    source      TEXT NOT NULL,
    block_index INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS order_match_expirations (
    order_match_id TEXT NOT NULL,
    tx0_address    TEXT NOT NULL,
    tx1_address    TEXT NOT NULL,
    block_index    INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS bet_match_expirations (
    bet_match_id TEXT NOT NULL,
    tx0_address  TEXT NOT NULL,
    tx1_address  TEXT NOT NULL,
    block_index  INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS messages (
    message_index INTEGER PRIMARY KEY,
    block_index   INTEGER NOT NULL,
    command       TEXT NOT NULL,
    category      TEXT NOT NULL,
    bindings      TEXT NOT NULL
);
"#;

const DERIVED_TABLES: &[&str] = &[
    "balances",
    "debits",
    "credits",
    "sends",
    "orders",
    "order_matches",
    "btcpays",
    "issuances",
    "broadcasts",
    "bets",
    "bet_matches",
    "dividends",
    "burns",
    "cancels",
    "callbacks",
    "order_expirations",
    "bet_expirations",
    "order_match_expirations",
    "bet_match_expirations",
    "messages",
];

impl Ledger {
    /// Open (and initialize) the ledger database at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let conn = Connection::open(&path)
            .with_context(|| format!("open sqlite at {}", path.display()))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            "#,
        )?;
        let ledger = Self { conn };
        ledger.init_schema()?;
        Ok(ledger)
    }

    /// In-memory ledger, useful for tests.
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let ledger = Self { conn };
        ledger.init_schema()?;
        Ok(ledger)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA_IMMUTABLE)?;
        self.conn.execute_batch(SCHEMA_DERIVED)?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Open a sqlite transaction covering one block's worth of
    /// mutations. Dropped without commit, it rolls back.
    pub fn begin(&self) -> Result<rusqlite::Transaction<'_>> {
        Ok(self.conn.unchecked_transaction()?)
    }

    // ---- sequences ------------------------------------------------

    fn next_sequence(&self, name: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO sequences (name, value) VALUES (?1, 0)
             ON CONFLICT(name) DO NOTHING",
            params![name],
        )?;
        self.conn.execute(
            "UPDATE sequences SET value = value + 1 WHERE name = ?1",
            params![name],
        )?;
        let v: i64 = self.conn.query_row(
            "SELECT value FROM sequences WHERE name = ?1",
            params![name],
            |r| r.get(0),
        )?;
        Ok(v - 1)
    }

    fn set_sequence(&self, name: &str, value: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sequences (name, value) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value",
            params![name, value],
        )?;
        Ok(())
    }

    /// Next transaction index (atomic, monotonic).
    pub fn next_tx_index(&self) -> Result<i64> {
        self.next_sequence("tx_index")
    }

    // ---- message log ----------------------------------------------

    /// Append to the message log. Bindings serialize with stable
    /// declaration-order fields, so replication is byte-deterministic.
    pub fn log<B: Serialize>(
        &self,
        block_index: u32,
        command: &str,
        category: &str,
        bindings: &B,
    ) -> Result<()> {
        let message_index = self.next_sequence("message_index")?;
        let bindings = serde_json::to_string(bindings)?;
        self.conn.execute(
            "INSERT INTO messages (message_index, block_index, command, category, bindings)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![message_index, block_index, command, category, bindings],
        )?;
        Ok(())
    }

    /// All message-log rows in order.
    pub fn messages(&self) -> Result<Vec<MessageRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT message_index, block_index, command, category, bindings
             FROM messages ORDER BY message_index",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(MessageRow {
                    message_index: r.get(0)?,
                    block_index: r.get(1)?,
                    command: r.get(2)?,
                    category: r.get(3)?,
                    bindings: r.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ---- blocks ----------------------------------------------------

    /// Insert a block header row.
    pub fn insert_block(&self, b: &BlockRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO blocks (block_index, block_hash, block_time) VALUES (?1, ?2, ?3)",
            params![b.block_index, b.block_hash, b.block_time],
        )?;
        Ok(())
    }

    /// Highest stored block, if any.
    pub fn last_block(&self) -> Result<Option<BlockRow>> {
        Ok(self
            .conn
            .query_row(
                "SELECT block_index, block_hash, block_time FROM blocks
                 ORDER BY block_index DESC LIMIT 1",
                [],
                BlockRow::from_row,
            )
            .optional()?)
    }

    /// Stored block at an exact height.
    pub fn block_at(&self, height: u32) -> Result<Option<BlockRow>> {
        Ok(self
            .conn
            .query_row(
                "SELECT block_index, block_hash, block_time FROM blocks WHERE block_index = ?1",
                params![height],
                BlockRow::from_row,
            )
            .optional()?)
    }

    /// All stored blocks in ascending order (the replay input).
    pub fn all_blocks(&self) -> Result<Vec<BlockRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT block_index, block_hash, block_time FROM blocks ORDER BY block_index",
        )?;
        let rows = stmt
            .query_map([], BlockRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Truncate block and transaction history strictly above `height`.
    pub fn delete_blocks_above(&self, height: u32) -> Result<()> {
        self.conn.execute(
            "DELETE FROM transactions WHERE block_index > ?1",
            params![height],
        )?;
        self.conn
            .execute("DELETE FROM blocks WHERE block_index > ?1", params![height])?;
        Ok(())
    }

    // ---- transactions ----------------------------------------------

    /// Insert a stored protocol transaction.
    pub fn insert_transaction(&self, t: &TransactionRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO transactions
             (tx_index, tx_hash, block_index, block_hash, block_time, source,
              destination, btc_amount, fee, data, supported)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                t.tx_index,
                t.tx_hash,
                t.block_index,
                t.block_hash,
                t.block_time,
                t.source,
                t.destination,
                t.btc_amount,
                t.fee,
                t.data,
                t.supported
            ],
        )?;
        Ok(())
    }

    /// Stored transactions of one block, in tx_index order.
    pub fn transactions_in_block(&self, block_index: u32) -> Result<Vec<TransactionRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT tx_index, tx_hash, block_index, block_hash, block_time, source,
                    destination, btc_amount, fee, data, supported
             FROM transactions WHERE block_index = ?1 ORDER BY tx_index",
        )?;
        let rows = stmt
            .query_map(params![block_index], TransactionRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Flip the `supported` flag off for an unknown message type.
    pub fn set_unsupported(&self, tx_index: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE transactions SET supported = 0 WHERE tx_index = ?1",
            params![tx_index],
        )?;
        Ok(())
    }

    /// Reset the tx_index sequence to continue after the stored maximum
    /// (used after a rollback truncates history).
    pub fn resync_tx_index(&self) -> Result<()> {
        let max: Option<i64> =
            self.conn
                .query_row("SELECT MAX(tx_index) FROM transactions", [], |r| r.get(0))?;
        self.set_sequence("tx_index", max.map_or(0, |m| m + 1))
    }

    // ---- balances, debits, credits ---------------------------------

    /// Current balance of `(address, asset)`; zero if no row exists.
    pub fn balance(&self, address: &str, asset: &str) -> Result<i64> {
        let q: Option<i64> = self
            .conn
            .query_row(
                "SELECT quantity FROM balances WHERE address = ?1 AND asset = ?2",
                params![address, asset],
                |r| r.get(0),
            )
            .optional()?;
        Ok(q.unwrap_or(0))
    }

    /// Remove `quantity` of `asset` from `address`.
    ///
    /// BTC is never tracked as a balance; negative quantities and
    /// overdrafts are rejected. Appends a debit audit row and a
    /// message-log entry.
    pub fn debit(
        &self,
        block_index: u32,
        address: &str,
        asset: &str,
        quantity: i64,
        action: &str,
        event: &str,
    ) -> Result<()> {
        if quantity < 0 {
            return Err(LedgerError::Balance("negative debit quantity".into()).into());
        }
        if asset == BTC {
            return Err(LedgerError::Balance("cannot debit BTC".into()).into());
        }
        let held = self.balance(address, asset)?;
        if held < quantity {
            return Err(LedgerError::Balance(format!(
                "insufficient funds: {address} holds {held} {asset}, debit of {quantity}"
            ))
            .into());
        }
        self.conn.execute(
            "UPDATE balances SET quantity = quantity - ?3 WHERE address = ?1 AND asset = ?2",
            params![address, asset, quantity],
        )?;
        let row = DebitRow {
            block_index,
            address: address.to_string(),
            asset: asset.to_string(),
            quantity,
            action: action.to_string(),
            event: event.to_string(),
        };
        self.conn.execute(
            "INSERT INTO debits (block_index, address, asset, quantity, action, event)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![row.block_index, row.address, row.asset, row.quantity, row.action, row.event],
        )?;
        self.log(block_index, "insert", "debits", &row)?;
        debug!(address, asset, quantity, action, "debit");
        Ok(())
    }

    /// Add `quantity` of `asset` to `address`, creating the balance row
    /// on first credit and saturating at the maximum representable
    /// quantity. Appends a credit audit row and a message-log entry.
    pub fn credit(
        &self,
        block_index: u32,
        address: &str,
        asset: &str,
        quantity: i64,
        action: &str,
        event: &str,
    ) -> Result<()> {
        if quantity < 0 {
            return Err(LedgerError::Balance("negative credit quantity".into()).into());
        }
        if asset == BTC {
            return Err(LedgerError::Balance("cannot credit BTC".into()).into());
        }
        let held = self.balance(address, asset)?;
        let new = held.saturating_add(quantity).min(MAX_INT);
        self.conn.execute(
            "INSERT INTO balances (address, asset, quantity) VALUES (?1, ?2, ?3)
             ON CONFLICT(address, asset) DO UPDATE SET quantity = excluded.quantity",
            params![address, asset, new],
        )?;
        let row = CreditRow {
            block_index,
            address: address.to_string(),
            asset: asset.to_string(),
            quantity,
            action: action.to_string(),
            event: event.to_string(),
        };
        self.conn.execute(
            "INSERT INTO credits (block_index, address, asset, quantity, action, event)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![row.block_index, row.address, row.asset, row.quantity, row.action, row.event],
        )?;
        self.log(block_index, "insert", "credits", &row)?;
        debug!(address, asset, quantity, action, "credit");
        Ok(())
    }

    // ---- holders & supply ------------------------------------------

    /// Every place an asset's units currently reside: free balances,
    /// open-order escrow, pending order-match escrow, and (XCP only)
    /// open-bet and pending bet-match escrow.
    pub fn holders(&self, asset: &str) -> Result<Vec<Holder>> {
        let mut holders = Vec::new();

        let mut stmt = self.conn.prepare(
            "SELECT address, quantity FROM balances WHERE asset = ?1 AND quantity != 0",
        )?;
        let rows = stmt.query_map(params![asset], |r| {
            Ok(Holder {
                address: r.get(0)?,
                quantity: r.get(1)?,
                escrow: None,
            })
        })?;
        for h in rows {
            holders.push(h?);
        }

        let mut stmt = self.conn.prepare(
            "SELECT source, give_remaining, tx_hash FROM orders
             WHERE give_asset = ?1 AND status = 'open' AND give_remaining > 0",
        )?;
        let rows = stmt.query_map(params![asset], |r| {
            Ok(Holder {
                address: r.get(0)?,
                quantity: r.get(1)?,
                escrow: Some(r.get(2)?),
            })
        })?;
        for h in rows {
            holders.push(h?);
        }

        let mut stmt = self.conn.prepare(
            "SELECT tx0_address, forward_quantity, id FROM order_matches
             WHERE forward_asset = ?1 AND status = 'pending'",
        )?;
        let rows = stmt.query_map(params![asset], |r| {
            Ok(Holder {
                address: r.get(0)?,
                quantity: r.get(1)?,
                escrow: Some(r.get(2)?),
            })
        })?;
        for h in rows {
            holders.push(h?);
        }

        let mut stmt = self.conn.prepare(
            "SELECT tx1_address, backward_quantity, id FROM order_matches
             WHERE backward_asset = ?1 AND status = 'pending'",
        )?;
        let rows = stmt.query_map(params![asset], |r| {
            Ok(Holder {
                address: r.get(0)?,
                quantity: r.get(1)?,
                escrow: Some(r.get(2)?),
            })
        })?;
        for h in rows {
            holders.push(h?);
        }

        if asset == XCP {
            let mut stmt = self.conn.prepare(
                "SELECT source, wager_remaining, tx_hash FROM bets
                 WHERE status = 'open' AND wager_remaining > 0",
            )?;
            let rows = stmt.query_map([], |r| {
                Ok(Holder {
                    address: r.get(0)?,
                    quantity: r.get(1)?,
                    escrow: Some(r.get(2)?),
                })
            })?;
            for h in rows {
                holders.push(h?);
            }

            let mut stmt = self.conn.prepare(
                "SELECT tx0_address, forward_quantity, tx1_address, backward_quantity, id
                 FROM bet_matches WHERE status = 'pending'",
            )?;
            let rows = stmt.query_map([], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, i64>(3)?,
                    r.get::<_, String>(4)?,
                ))
            })?;
            for row in rows {
                let (a0, q0, a1, q1, id) = row?;
                holders.push(Holder {
                    address: a0,
                    quantity: q0,
                    escrow: Some(id.clone()),
                });
                holders.push(Holder {
                    address: a1,
                    quantity: q1,
                    escrow: Some(id),
                });
            }
        }
        Ok(holders)
    }

    /// Total XCP in existence: burn proceeds minus issuance fees.
    pub fn xcp_supply(&self) -> Result<i64> {
        let earned: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(earned), 0) FROM burns WHERE status = 'valid'",
            [],
            |r| r.get(0),
        )?;
        let fees: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(fee_paid), 0) FROM issuances WHERE status = 'valid'",
            [],
            |r| r.get(0),
        )?;
        Ok(earned - fees)
    }

    /// Cumulative issued supply of a user asset.
    pub fn asset_issued(&self, asset: &str) -> Result<i64> {
        let q: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(quantity), 0) FROM issuances
             WHERE asset = ?1 AND status = 'valid'",
            params![asset],
            |r| r.get(0),
        )?;
        Ok(q)
    }

    /// Every asset with at least one valid issuance.
    pub fn issued_assets(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT asset FROM issuances WHERE status = 'valid' ORDER BY asset",
        )?;
        let rows = stmt
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
    }

    /// Latest valid issuance row for an asset (carries current issuer
    /// and the asset's immutable properties).
    pub fn last_issuance(&self, asset: &str) -> Result<Option<IssuanceRow>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM issuances WHERE asset = ?1 AND status = 'valid'
                     ORDER BY tx_index DESC LIMIT 1",
                    IssuanceRow::COLS
                ),
                params![asset],
                IssuanceRow::from_row,
            )
            .optional()?)
    }

    /// True once any valid issuance locked the asset.
    pub fn asset_locked(&self, asset: &str) -> Result<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM issuances WHERE asset = ?1 AND status = 'valid' AND locked = 1",
            params![asset],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    // ---- sends -----------------------------------------------------

    /// Insert a send row and log it.
    pub fn insert_send(&self, s: &SendRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sends (tx_index, tx_hash, block_index, source, destination,
                                asset, quantity, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                s.tx_index,
                s.tx_hash,
                s.block_index,
                s.source,
                s.destination,
                s.asset,
                s.quantity,
                s.status
            ],
        )?;
        self.log(s.block_index, "insert", "sends", s)
    }

    // ---- orders ----------------------------------------------------

    /// Insert an order row and log it.
    pub fn insert_order(&self, o: &OrderRow) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO orders ({}) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                OrderRow::COLS
            ),
            params![
                o.tx_index,
                o.tx_hash,
                o.block_index,
                o.source,
                o.give_asset,
                o.give_quantity,
                o.give_remaining,
                o.get_asset,
                o.get_quantity,
                o.get_remaining,
                o.expiration,
                o.expire_index,
                o.fee_required,
                o.fee_required_remaining,
                o.fee_provided,
                o.fee_provided_remaining,
                o.status
            ],
        )?;
        self.log(o.block_index, "insert", "orders", o)
    }

    /// An order by its transaction hash.
    pub fn order_by_hash(&self, tx_hash: &str) -> Result<Option<OrderRow>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} FROM orders WHERE tx_hash = ?1", OrderRow::COLS),
                params![tx_hash],
                OrderRow::from_row,
            )
            .optional()?)
    }

    /// Open orders offering `give_asset` for `get_asset`, in insertion
    /// order (matching sorts by price itself).
    pub fn open_orders_for_pair(&self, give_asset: &str, get_asset: &str) -> Result<Vec<OrderRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM orders
             WHERE give_asset = ?1 AND get_asset = ?2 AND status = 'open'
             ORDER BY tx_index",
            OrderRow::COLS
        ))?;
        let rows = stmt
            .query_map(params![give_asset, get_asset], OrderRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Open orders with `asset` on either side (callback cleanup).
    pub fn open_orders_for_asset(&self, asset: &str) -> Result<Vec<OrderRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM orders
             WHERE (give_asset = ?1 OR get_asset = ?1) AND status = 'open'
             ORDER BY tx_index",
            OrderRow::COLS
        ))?;
        let rows = stmt
            .query_map(params![asset], OrderRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Open orders whose expire_index has been reached.
    pub fn expired_orders(&self, block_index: u32) -> Result<Vec<OrderRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM orders
             WHERE status = 'open' AND expire_index <= ?1 ORDER BY tx_index",
            OrderRow::COLS
        ))?;
        let rows = stmt
            .query_map(params![block_index], OrderRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Apply an order mutation (remaining counters and status) and log
    /// the update.
    pub fn update_order(&self, block_index: u32, u: &OrderUpdate) -> Result<()> {
        self.conn.execute(
            "UPDATE orders SET give_remaining = ?2, get_remaining = ?3,
                    fee_required_remaining = ?4, fee_provided_remaining = ?5, status = ?6
             WHERE tx_hash = ?1",
            params![
                u.tx_hash,
                u.give_remaining,
                u.get_remaining,
                u.fee_required_remaining,
                u.fee_provided_remaining,
                u.status
            ],
        )?;
        self.log(block_index, "update", "orders", u)
    }

    // ---- order matches ---------------------------------------------

    /// Insert an order-match row and log it.
    pub fn insert_order_match(&self, m: &OrderMatchRow) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO order_matches ({}) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                OrderMatchRow::COLS
            ),
            params![
                m.id,
                m.tx0_index,
                m.tx0_hash,
                m.tx0_address,
                m.tx1_index,
                m.tx1_hash,
                m.tx1_address,
                m.forward_asset,
                m.forward_quantity,
                m.backward_asset,
                m.backward_quantity,
                m.tx0_block_index,
                m.tx1_block_index,
                m.block_index,
                m.match_expire_index,
                m.fee_paid,
                m.status
            ],
        )?;
        self.log(m.block_index, "insert", "order_matches", m)
    }

    /// An order match by id.
    pub fn order_match(&self, id: &str) -> Result<Option<OrderMatchRow>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM order_matches WHERE id = ?1",
                    OrderMatchRow::COLS
                ),
                params![id],
                OrderMatchRow::from_row,
            )
            .optional()?)
    }

    /// Pending order matches whose settlement window has closed.
    pub fn expired_order_matches(&self, block_index: u32) -> Result<Vec<OrderMatchRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM order_matches
             WHERE status = 'pending' AND match_expire_index <= ?1 ORDER BY rowid",
            OrderMatchRow::COLS
        ))?;
        let rows = stmt
            .query_map(params![block_index], OrderMatchRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Pending order matches with `asset` on either leg.
    pub fn pending_order_matches_for_asset(&self, asset: &str) -> Result<Vec<OrderMatchRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM order_matches
             WHERE (forward_asset = ?1 OR backward_asset = ?1) AND status = 'pending'
             ORDER BY rowid",
            OrderMatchRow::COLS
        ))?;
        let rows = stmt
            .query_map(params![asset], OrderMatchRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Set an order match's terminal status and log the update.
    pub fn update_order_match_status(
        &self,
        block_index: u32,
        id: &str,
        status: &str,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE order_matches SET status = ?2 WHERE id = ?1",
            params![id, status],
        )?;
        self.log(
            block_index,
            "update",
            "order_matches",
            &StatusUpdate {
                id: id.to_string(),
                status: status.to_string(),
            },
        )
    }

    // ---- btcpays ---------------------------------------------------

    /// Insert a btcpay row and log it.
    pub fn insert_btcpay(&self, p: &BtcPayRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO btcpays (tx_index, tx_hash, block_index, source, destination,
                                  btc_amount, order_match_id, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                p.tx_index,
                p.tx_hash,
                p.block_index,
                p.source,
                p.destination,
                p.btc_amount,
                p.order_match_id,
                p.status
            ],
        )?;
        self.log(p.block_index, "insert", "btcpays", p)
    }

    // ---- issuances -------------------------------------------------

    /// Insert an issuance row and log it.
    pub fn insert_issuance(&self, i: &IssuanceRow) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO issuances ({}) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                IssuanceRow::COLS
            ),
            params![
                i.tx_index,
                i.tx_hash,
                i.block_index,
                i.asset,
                i.quantity,
                i.divisible,
                i.source,
                i.issuer,
                i.transfer,
                i.callable,
                i.call_date,
                i.call_price,
                i.description,
                i.fee_paid,
                i.locked,
                i.status
            ],
        )?;
        self.log(i.block_index, "insert", "issuances", i)
    }

    // ---- broadcasts ------------------------------------------------

    /// Insert a broadcast row and log it.
    pub fn insert_broadcast(&self, b: &BroadcastRow) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO broadcasts ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                BroadcastRow::COLS
            ),
            params![
                b.tx_index,
                b.tx_hash,
                b.block_index,
                b.source,
                b.timestamp,
                b.value,
                b.fee_fraction_int,
                b.text,
                b.locked,
                b.status
            ],
        )?;
        self.log(b.block_index, "insert", "broadcasts", b)
    }

    /// Latest valid broadcast from a feed address.
    pub fn last_broadcast(&self, source: &str) -> Result<Option<BroadcastRow>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM broadcasts WHERE source = ?1 AND status = 'valid'
                     ORDER BY tx_index DESC LIMIT 1",
                    BroadcastRow::COLS
                ),
                params![source],
                BroadcastRow::from_row,
            )
            .optional()?)
    }

    /// True once the feed published a lock.
    pub fn feed_locked(&self, source: &str) -> Result<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM broadcasts
             WHERE source = ?1 AND status = 'valid' AND locked = 1",
            params![source],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    // ---- bets ------------------------------------------------------

    /// Insert a bet row and log it.
    pub fn insert_bet(&self, b: &BetRow) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO bets ({}) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                BetRow::COLS
            ),
            params![
                b.tx_index,
                b.tx_hash,
                b.block_index,
                b.source,
                b.feed_address,
                b.bet_type,
                b.deadline,
                b.wager_quantity,
                b.wager_remaining,
                b.counterwager_quantity,
                b.counterwager_remaining,
                b.target_value,
                b.leverage,
                b.expiration,
                b.expire_index,
                b.fee_fraction_int,
                b.status
            ],
        )?;
        self.log(b.block_index, "insert", "bets", b)
    }

    /// A bet by its transaction hash.
    pub fn bet_by_hash(&self, tx_hash: &str) -> Result<Option<BetRow>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} FROM bets WHERE tx_hash = ?1", BetRow::COLS),
                params![tx_hash],
                BetRow::from_row,
            )
            .optional()?)
    }

    /// Open bets of one type on one feed, in insertion order.
    pub fn open_bets(&self, feed_address: &str, bet_type: u16) -> Result<Vec<BetRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM bets
             WHERE feed_address = ?1 AND bet_type = ?2 AND status = 'open'
             ORDER BY tx_index",
            BetRow::COLS
        ))?;
        let rows = stmt
            .query_map(params![feed_address, bet_type], BetRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// All open bets on one feed (broadcast sentinel cleanup).
    pub fn open_bets_for_feed(&self, feed_address: &str) -> Result<Vec<BetRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM bets WHERE feed_address = ?1 AND status = 'open' ORDER BY tx_index",
            BetRow::COLS
        ))?;
        let rows = stmt
            .query_map(params![feed_address], BetRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Open bets whose expire_index has been reached.
    pub fn expired_bets(&self, block_index: u32) -> Result<Vec<BetRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM bets
             WHERE status = 'open' AND expire_index <= ?1 ORDER BY tx_index",
            BetRow::COLS
        ))?;
        let rows = stmt
            .query_map(params![block_index], BetRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Apply a bet mutation and log the update.
    pub fn update_bet(&self, block_index: u32, u: &BetUpdate) -> Result<()> {
        self.conn.execute(
            "UPDATE bets SET wager_remaining = ?2, counterwager_remaining = ?3, status = ?4
             WHERE tx_hash = ?1",
            params![u.tx_hash, u.wager_remaining, u.counterwager_remaining, u.status],
        )?;
        self.log(block_index, "update", "bets", u)
    }

    // ---- bet matches -----------------------------------------------

    /// Insert a bet-match row and log it.
    pub fn insert_bet_match(&self, m: &BetMatchRow) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO bet_matches ({}) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                  ?17, ?18, ?19, ?20, ?21, ?22)",
                BetMatchRow::COLS
            ),
            params![
                m.id,
                m.tx0_index,
                m.tx0_hash,
                m.tx0_address,
                m.tx1_index,
                m.tx1_hash,
                m.tx1_address,
                m.tx0_bet_type,
                m.tx1_bet_type,
                m.feed_address,
                m.initial_value,
                m.deadline,
                m.target_value,
                m.leverage,
                m.forward_quantity,
                m.backward_quantity,
                m.tx0_block_index,
                m.tx1_block_index,
                m.block_index,
                m.match_expire_index,
                m.fee_fraction_int,
                m.status
            ],
        )?;
        self.log(m.block_index, "insert", "bet_matches", m)
    }

    /// Pending bet matches on one feed, oldest first.
    pub fn pending_bet_matches(&self, feed_address: &str) -> Result<Vec<BetMatchRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM bet_matches
             WHERE feed_address = ?1 AND status = 'pending' ORDER BY rowid",
            BetMatchRow::COLS
        ))?;
        let rows = stmt
            .query_map(params![feed_address], BetMatchRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Pending bet matches past their expiry height, or whose deadline
    /// went unresolved longer than the grace period (by block time).
    pub fn expired_bet_matches(
        &self,
        block_index: u32,
        deadline_cutoff: i64,
    ) -> Result<Vec<BetMatchRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM bet_matches
             WHERE status = 'pending' AND (match_expire_index <= ?1 OR deadline < ?2)
             ORDER BY rowid",
            BetMatchRow::COLS
        ))?;
        let rows = stmt
            .query_map(params![block_index, deadline_cutoff], BetMatchRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Set a bet match's terminal status and log the update.
    pub fn update_bet_match_status(&self, block_index: u32, id: &str, status: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE bet_matches SET status = ?2 WHERE id = ?1",
            params![id, status],
        )?;
        self.log(
            block_index,
            "update",
            "bet_matches",
            &StatusUpdate {
                id: id.to_string(),
                status: status.to_string(),
            },
        )
    }

    // ---- single-event tables ---------------------------------------

    /// Insert a dividend row and log it.
    pub fn insert_dividend(&self, d: &DividendRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO dividends (tx_index, tx_hash, block_index, source, asset,
                                    dividend_asset, quantity_per_unit, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                d.tx_index,
                d.tx_hash,
                d.block_index,
                d.source,
                d.asset,
                d.dividend_asset,
                d.quantity_per_unit,
                d.status
            ],
        )?;
        self.log(d.block_index, "insert", "dividends", d)
    }

    /// Insert a burn row and log it.
    pub fn insert_burn(&self, b: &BurnRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO burns (tx_index, tx_hash, block_index, source, burned, earned, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![b.tx_index, b.tx_hash, b.block_index, b.source, b.burned, b.earned, b.status],
        )?;
        self.log(b.block_index, "insert", "burns", b)
    }

    /// Total BTC validly burned by an address so far.
    pub fn burned_by(&self, source: &str) -> Result<i64> {
        let q: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(burned), 0) FROM burns WHERE source = ?1 AND status = 'valid'",
            params![source],
            |r| r.get(0),
        )?;
        Ok(q)
    }

    /// Insert a cancel row and log it.
    pub fn insert_cancel(&self, c: &CancelRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO cancels (tx_index, tx_hash, block_index, source, offer_hash, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![c.tx_index, c.tx_hash, c.block_index, c.source, c.offer_hash, c.status],
        )?;
        self.log(c.block_index, "insert", "cancels", c)
    }

    /// Insert a callback row and log it.
    pub fn insert_callback(&self, c: &CallbackRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO callbacks (tx_index, tx_hash, block_index, source, fraction, asset, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![c.tx_index, c.tx_hash, c.block_index, c.source, c.fraction, c.asset, c.status],
        )?;
        self.log(c.block_index, "insert", "callbacks", c)
    }

    // ---- expiration audit rows -------------------------------------

    /// Record an order expiration.
    pub fn insert_order_expiration(&self, e: &OrderExpirationRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO order_expirations (order_index, order_hash, source, block_index)
             VALUES (?1, ?2, ?3, ?4)",
            params![e.order_index, e.order_hash, e.source, e.block_index],
        )?;
        self.log(e.block_index, "insert", "order_expirations", e)
    }

    /// Record a bet expiration.
    pub fn insert_bet_expiration(&self, e: &BetExpirationRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO bet_expirations (bet_index, bet_hash, source, block_index)
             VALUES (?1, ?2, ?3, ?4)",
            params![e.bet_index, e.bet_hash, e.source, e.block_index],
        )?;
        self.log(e.block_index, "insert", "bet_expirations", e)
    }

    /// Record an order-match expiration.
    pub fn insert_order_match_expiration(&self, e: &OrderMatchExpirationRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO order_match_expirations
             (order_match_id, tx0_address, tx1_address, block_index)
             VALUES (?1, ?2, ?3, ?4)",
            params![e.order_match_id, e.tx0_address, e.tx1_address, e.block_index],
        )?;
        self.log(e.block_index, "insert", "order_match_expirations", e)
    }

    /// Record a bet-match expiration.
    pub fn insert_bet_match_expiration(&self, e: &BetMatchExpirationRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO bet_match_expirations
             (bet_match_id, tx0_address, tx1_address, block_index)
             VALUES (?1, ?2, ?3, ?4)",
            params![e.bet_match_id, e.tx0_address, e.tx1_address, e.block_index],
        )?;
        self.log(e.block_index, "insert", "bet_match_expirations", e)
    }

    // ---- reparse support -------------------------------------------

    /// Drop and recreate every derived table. Block and transaction
    /// history stays; the message-index sequence restarts so a replay
    /// reproduces the log identically.
    pub fn drop_derived_state(&self) -> Result<()> {
        for table in DERIVED_TABLES {
            self.conn
                .execute_batch(&format!("DROP TABLE IF EXISTS {table};"))?;
        }
        self.conn.execute_batch(SCHEMA_DERIVED)?;
        self.set_sequence("message_index", 0)?;
        Ok(())
    }
}
