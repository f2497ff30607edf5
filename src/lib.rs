#![forbid(unsafe_code)]
#![deny(missing_docs)]
//! sobrecapa: an overlay asset protocol embedded in Bitcoin transactions.
//!
//! ## What you implement
//! - [`BitcoinNode`]: four calls against your base-chain node (tip
//!   height, block hash, block, raw transaction).
//!
//! ## What the crate does
//! - Recognizes protocol payloads hidden in transaction outputs
//!   (OP_RETURN, fake multisig, encrypted pay-to-pubkey-hash) and
//!   stores them as an immutable transaction history.
//! - Replays that history through a deterministic state machine:
//!   sends, orders and matching, BTC-leg settlement, issuances,
//!   broadcasts, bets and settlement, dividends, burns, cancels,
//!   callbacks.
//! - Follows the chain tip through reorgs, rolling derived state back
//!   by replay; a reparse of identical history reproduces the message
//!   log byte for byte.
//! - Checks supply conservation for every asset as it goes, halting on
//!   a violation.
//!
//! ## Minimal usage
//! ```rust,ignore
//! use sobrecapa::{Config, Ledger, Scanner};
//!
//! let ledger = Ledger::new("ledger.db")?;
//! let node = MyNode::connect("127.0.0.1:8332")?; // impl BitcoinNode
//! let scanner = Scanner::new(ledger, node, Config::mainnet());
//! scanner.follow().await?;
//! ```
//!
//! [`BitcoinNode`]: crate::node::BitcoinNode

pub mod config;
pub mod conservation;
pub mod errors;
pub mod messages;
pub mod node;
pub mod query;
pub mod scanner;
pub mod store;
pub mod util;

pub use config::Config;
pub use errors::{LedgerError, NodeError};
pub use node::{BitcoinNode, BlockInfo, RawTransaction, TxInput, TxOutput};
pub use scanner::Scanner;
pub use store::Ledger;
