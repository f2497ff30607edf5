//! Supply conservation checking.
//!
//! For every asset the books must balance: the sum of all holdings
//! (free balances plus every escrow) has to equal the issued supply.
//! For XCP the issued supply is burn proceeds minus issuance fees. A
//! mismatch is unrecoverable in-process and reported as the fatal
//! [`LedgerError::Conservation`].
use anyhow::Result;
use tracing::debug;

use crate::config::XCP;
use crate::errors::LedgerError;
use crate::store::Ledger;

fn check_asset(ledger: &Ledger, asset: &str, issued: i64) -> Result<()> {
    let held: i64 = ledger.holders(asset)?.iter().map(|h| h.quantity).sum();
    if held != issued {
        return Err(LedgerError::Conservation {
            asset: asset.to_string(),
            issued,
            held,
        }
        .into());
    }
    debug!(asset, issued, "supply conserved");
    Ok(())
}

/// Verify conservation for XCP and every issued asset.
pub fn check(ledger: &Ledger) -> Result<()> {
    check_asset(ledger, XCP, ledger.xcp_supply()?)?;
    for asset in ledger.issued_assets()? {
        check_asset(ledger, &asset, ledger.asset_issued(&asset)?)?;
    }
    Ok(())
}
