//! Per-network configuration and height-gated protocol policies.
//!
//! Everything that varies by network or by block height lives here as
//! explicit data: prefix bytes, the burn window, fee schedules, and a
//! [`PolicyTable`] per historical rule change. Nothing in the crate
//! consults ambient globals; a [`Config`] is built once and threaded
//! through every component, so main and test networks can coexist
//! in-process and tests can vary thresholds freely.

/// Subunits per whole unit of a divisible asset.
pub const UNIT: i64 = 100_000_000;

/// Largest quantity representable in the store. Anything above is
/// clamped before insertion.
pub const MAX_INT: i64 = i64::MAX;

/// Name of the base chain's native currency. Never tracked as a balance.
pub const BTC: &str = "BTC";

/// Name of the overlay protocol's own native asset. Minted only by
/// burns, consumed only by issuance fees.
pub const XCP: &str = "XCP";

/// Decimal places accepted when converting display values to storage
/// integers for divisible assets.
pub const PRECISION: u32 = 8;

/// How the `price` function rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceRounding {
    /// Fixed-precision decimal division, rounding half-even.
    DecimalHalfEven,
    /// Exact rational fraction, no rounding.
    ExactRational,
}

/// Which holders qualify for a dividend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DividendPolicy {
    /// Free balances only; the issuer's own address is paid like anyone.
    FreeBalancesIncludeIssuer,
    /// Every holding location (balances plus escrows), excluding the
    /// paying source.
    AllHoldingsExcludeSource,
}

/// How a new bet's inverse odds are computed during matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InverseOdds {
    /// Recompute `price(counterwager, wager)` (subject to decimal
    /// rounding before the price upgrade).
    Recomputed,
    /// Exact reciprocal of `price(wager, counterwager)`.
    ExactReciprocal,
}

/// Wire-format generation for message types with two variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireVariant {
    /// Original layout.
    V0,
    /// Extended layout.
    V1,
}

/// Sorted `(effective_from_height, variant)` lookup for one historical
/// rule change. Keeps the full history of a behavior enumerable instead
/// of scattering magic-number comparisons through handlers.
#[derive(Debug, Clone)]
pub struct PolicyTable<T: Copy> {
    entries: Vec<(u32, T)>,
}

impl<T: Copy> PolicyTable<T> {
    /// Build a table from ascending `(height, variant)` entries. The
    /// first entry must cover height 0 conceptually (it applies to
    /// everything below the second entry's height).
    pub fn new(entries: Vec<(u32, T)>) -> Self {
        assert!(!entries.is_empty(), "policy table cannot be empty");
        assert!(
            entries.windows(2).all(|w| w[0].0 < w[1].0),
            "policy table heights must be strictly ascending"
        );
        Self { entries }
    }

    /// Variant in force at `height`. On a test network every gate
    /// resolves to the newest variant (the reference behaves this way;
    /// see DESIGN.md).
    pub fn at(&self, height: u32, testnet: bool) -> T {
        if testnet {
            return self.entries[self.entries.len() - 1].1;
        }
        let mut current = self.entries[0].1;
        for &(from, v) in &self.entries {
            if height >= from {
                current = v;
            } else {
                break;
            }
        }
        current
    }
}

/// Immutable per-network configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Network label ("mainnet", "testnet", ...). Informational.
    pub network: String,
    /// True on test networks: every height gate resolves to its newest
    /// variant, matching the reference implementation.
    pub testnet: bool,
    /// Magic bytes every protocol payload must begin with.
    pub prefix: Vec<u8>,
    /// Base58check version byte for pay-to-pubkey-hash addresses.
    pub address_version: u8,
    /// The designated unspendable burn address.
    pub unspendable: String,
    /// First block the protocol recognizes.
    pub block_first: u32,
    /// First block of the proof-of-burn window (inclusive).
    pub burn_start: u32,
    /// Last block of the proof-of-burn window (inclusive).
    pub burn_end: u32,
    /// Lifetime burn cap per address, in satoshis.
    pub max_burn: i64,
    /// Audit override: ignore the per-address burn cap.
    pub overburn: bool,
    /// Minimum economical output value in satoshis; dividend payouts in
    /// BTC below this are dropped.
    pub dust_size: i64,
    /// Maximum order/bet expiration, in blocks.
    pub max_expiration: u16,
    /// Blocks a BTC-leg order match stays pending awaiting its payment.
    pub order_match_expire: u32,
    /// Blocks a bet match stays pending awaiting oracle resolution.
    pub bet_match_expire: u32,
    /// Seconds past a bet deadline before an unresolved pending match
    /// expires (compared against block time).
    pub bet_match_grace: u32,
    /// Run the conservation checker every N parsed transactions.
    /// 0 disables the periodic gate.
    pub conservation_every: u32,
    /// Deployment policy flag for the Callback message type.
    pub callbacks_enabled: bool,

    /// Decimal-vs-rational price rounding change.
    pub price_rounding: PolicyTable<PriceRounding>,
    /// Issuance fee schedule in XCP satoshis (at least three tiers).
    pub issuance_fee: PolicyTable<i64>,
    /// Dividend holder-qualification change.
    pub dividend_policy: PolicyTable<DividendPolicy>,
    /// Bet-matching inverse-odds change.
    pub bet_inverse_odds: PolicyTable<InverseOdds>,
    /// Whether obfuscated pay-to-pubkey-hash data outputs are decoded.
    pub p2pkh_data: PolicyTable<bool>,
    /// Issuance wire-format generation.
    pub issuance_format: PolicyTable<WireVariant>,
    /// Dividend wire-format generation.
    pub dividend_format: PolicyTable<WireVariant>,
}

impl Config {
    /// Mainnet constants. Heights are the deployment's frozen protocol
    /// history; a deployment tracking a different network must supply
    /// its own.
    pub fn mainnet() -> Self {
        Self {
            network: "mainnet".into(),
            testnet: false,
            prefix: b"CNTRPRTY".to_vec(),
            address_version: 0x00,
            unspendable: "1CounterpartyXXXXXXXXXXXXXXXUWLpVr".into(),
            block_first: 278_270,
            burn_start: 278_310,
            burn_end: 283_810,
            max_burn: UNIT, // 1 BTC per address, lifetime
            overburn: false,
            dust_size: 5_430,
            max_expiration: 8_064, // two months
            order_match_expire: 20,
            bet_match_expire: 2_016,
            bet_match_grace: 1_209_600, // two weeks
            conservation_every: 500,
            callbacks_enabled: false,
            price_rounding: PolicyTable::new(vec![
                (0, PriceRounding::DecimalHalfEven),
                (294_500, PriceRounding::ExactRational),
            ]),
            issuance_fee: PolicyTable::new(vec![
                (0, 0),
                (281_236, UNIT / 2), // 0.5 XCP
                (291_700, 5 * UNIT), // 5 XCP
            ]),
            dividend_policy: PolicyTable::new(vec![
                (0, DividendPolicy::FreeBalancesIncludeIssuer),
                (310_000, DividendPolicy::AllHoldingsExcludeSource),
            ]),
            bet_inverse_odds: PolicyTable::new(vec![
                (0, InverseOdds::Recomputed),
                (310_500, InverseOdds::ExactReciprocal),
            ]),
            p2pkh_data: PolicyTable::new(vec![(0, false), (293_000, true)]),
            issuance_format: PolicyTable::new(vec![
                (0, WireVariant::V0),
                (283_271, WireVariant::V1),
            ]),
            dividend_format: PolicyTable::new(vec![
                (0, WireVariant::V0),
                (310_000, WireVariant::V1),
            ]),
        }
    }

    /// Testnet constants. Height gates are bypassed (newest variant
    /// everywhere) and callbacks are enabled.
    pub fn testnet() -> Self {
        Self {
            network: "testnet".into(),
            testnet: true,
            address_version: 0x6f,
            unspendable: "mvCounterpartyXXXXXXXXXXXXXXW24Hef".into(),
            block_first: 150_000,
            burn_start: 154_908,
            burn_end: 4_017_708,
            callbacks_enabled: true,
            ..Self::mainnet()
        }
    }
}
