use crate::domain::money::Currency;
use crate::domain::wallet::Wallet;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct WalletRow<'a> {
    user: &'a str,
    balance: Decimal,
    pending_payouts: Decimal,
    available: Decimal,
    currency: Currency,
    frozen: bool,
}

/// Writes wallet balances as CSV, one row per wallet.
pub struct WalletWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> WalletWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Writes `(label, wallet)` pairs. Amounts are printed without trailing zeros.
    pub fn write_wallets<'a, I>(&mut self, wallets: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, &'a Wallet)>,
    {
        let mut wrote_any = false;
        for (user, wallet) in wallets {
            self.writer.serialize(WalletRow {
                user,
                balance: wallet.balance.normalize(),
                pending_payouts: wallet.pending_payouts.normalize(),
                available: wallet.available().normalize(),
                currency: wallet.currency,
                frozen: wallet.frozen,
            })?;
            wrote_any = true;
        }
        if !wrote_any {
            self.writer.write_record([
                "user",
                "balance",
                "pending_payouts",
                "available",
                "currency",
                "frozen",
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
