//! Per-user conversion credits.
//!
//! A conversion costs one credit. The credit is taken before the pipeline
//! starts, so concurrent runs cannot spend the same credit twice, and it is
//! given back if the run fails, finds no text, or is cancelled.

use crate::config::ConversionConfig;
use crate::convert::convert;
use crate::error::Img2XlsxError;
use crate::output::ConversionOutput;
use crate::sheet::write_workbook;
use async_trait::async_trait;
use futures::future::{AbortHandle, AbortRegistration, Abortable};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Credits granted to a user the ledger has not seen before.
pub const DEFAULT_INITIAL_CREDITS: u32 = 10;

/// Credit storage backend.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Current balance. Unknown users start with the ledger's initial grant.
    async fn balance(&self, user_id: &str) -> Result<u32, Img2XlsxError>;

    /// Remove `amount` credits and return the new balance.
    ///
    /// Fails with [`Img2XlsxError::InsufficientCredits`] if the balance is
    /// lower than `amount`; the balance is then left unchanged.
    async fn debit(&self, user_id: &str, amount: u32) -> Result<u32, Img2XlsxError>;

    /// Give back credits taken by an earlier [`debit`](Self::debit) and
    /// return the new balance.
    async fn refund(&self, user_id: &str, amount: u32) -> Result<u32, Img2XlsxError>;
}

/// Process-local ledger, handy for tests and single-user tools.
#[derive(Debug, Clone)]
pub struct InMemoryLedger {
    initial_credits: u32,
    balances: Arc<RwLock<HashMap<String, u32>>>,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::with_initial_credits(DEFAULT_INITIAL_CREDITS)
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_credits(initial_credits: u32) -> Self {
        Self {
            initial_credits,
            balances: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Overwrite a user's balance.
    pub async fn set_balance(&self, user_id: &str, credits: u32) {
        self.balances
            .write()
            .await
            .insert(user_id.to_string(), credits);
    }
}

#[async_trait]
impl CreditLedger for InMemoryLedger {
    async fn balance(&self, user_id: &str) -> Result<u32, Img2XlsxError> {
        Ok(self
            .balances
            .read()
            .await
            .get(user_id)
            .copied()
            .unwrap_or(self.initial_credits))
    }

    async fn debit(&self, user_id: &str, amount: u32) -> Result<u32, Img2XlsxError> {
        let mut balances = self.balances.write().await;
        let current = balances
            .entry(user_id.to_string())
            .or_insert(self.initial_credits);

        if *current < amount {
            return Err(Img2XlsxError::InsufficientCredits {
                user_id: user_id.to_string(),
            });
        }
        *current -= amount;
        debug!("Debited {} credit(s) from {}: {} left", amount, user_id, *current);
        Ok(*current)
    }

    async fn refund(&self, user_id: &str, amount: u32) -> Result<u32, Img2XlsxError> {
        let mut balances = self.balances.write().await;
        let current = balances.get_mut(user_id).ok_or_else(|| {
            Img2XlsxError::Ledger(format!("no credits were taken from '{user_id}'"))
        })?;
        *current = current.saturating_add(amount);
        debug!("Refunded {} credit(s) to {}: {} left", amount, user_id, *current);
        Ok(*current)
    }
}

/// A credit taken for one run.
///
/// Either [`keep`](Self::keep) it once the workbook exists or
/// [`release`](Self::release) it. A hold that is dropped unsettled, for
/// example because the caller dropped the conversion future, is refunded on
/// a spawned task.
struct CreditHold {
    ledger: Arc<dyn CreditLedger>,
    user_id: String,
    amount: u32,
    settled: bool,
}

impl CreditHold {
    async fn take(
        ledger: Arc<dyn CreditLedger>,
        user_id: &str,
        amount: u32,
    ) -> Result<(Self, u32), Img2XlsxError> {
        let remaining = ledger.debit(user_id, amount).await?;
        let hold = Self {
            ledger,
            user_id: user_id.to_string(),
            amount,
            settled: false,
        };
        Ok((hold, remaining))
    }

    fn keep(mut self) {
        self.settled = true;
    }

    async fn release(mut self) {
        self.settled = true;
        if let Err(e) = self.ledger.refund(&self.user_id, self.amount).await {
            warn!("Could not refund {}: {}", self.user_id, e);
        }
    }
}

impl Drop for CreditHold {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let ledger = Arc::clone(&self.ledger);
        let user_id = std::mem::take(&mut self.user_id);
        let amount = self.amount;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = ledger.refund(&user_id, amount).await {
                        warn!("Could not refund {}: {}", user_id, e);
                    }
                });
            }
            Err(_) => warn!(
                "No runtime to refund {} credit(s) to {}",
                amount, user_id
            ),
        }
    }
}

/// A paid conversion: the output, its workbook, and what the user has left.
#[derive(Debug, Clone)]
pub struct UserConversion {
    pub output: ConversionOutput,
    pub workbook: Vec<u8>,
    pub remaining_credits: u32,
}

/// Convert `input` on behalf of `user_id`, charging one credit on success.
///
/// Refuses to start with [`Img2XlsxError::InsufficientCredits`] when the
/// balance is zero. A run that extracts no text returns
/// [`Img2XlsxError::NoTextExtracted`] and costs nothing.
pub async fn convert_for_user(
    ledger: Arc<dyn CreditLedger>,
    user_id: &str,
    input: &str,
    config: &ConversionConfig,
) -> Result<UserConversion, Img2XlsxError> {
    run_charged(ledger, user_id, input, config, None).await
}

/// Like [`convert_for_user`], but abortable.
///
/// An aborted run resolves to [`Img2XlsxError::Cancelled`] after its credit
/// has been refunded.
pub fn convert_for_user_cancellable<'a>(
    ledger: Arc<dyn CreditLedger>,
    user_id: &'a str,
    input: &'a str,
    config: &'a ConversionConfig,
) -> (
    impl Future<Output = Result<UserConversion, Img2XlsxError>> + Send + 'a,
    AbortHandle,
) {
    let (handle, registration) = AbortHandle::new_pair();
    let fut = run_charged(ledger, user_id, input, config, Some(registration));
    (fut, handle)
}

async fn run_charged(
    ledger: Arc<dyn CreditLedger>,
    user_id: &str,
    input: &str,
    config: &ConversionConfig,
    abort: Option<AbortRegistration>,
) -> Result<UserConversion, Img2XlsxError> {
    let (hold, remaining_credits) = CreditHold::take(ledger, user_id, 1).await?;

    let work = produce_workbook(input, config);
    let result = match abort {
        Some(registration) => Abortable::new(work, registration)
            .await
            .unwrap_or_else(|_aborted| {
                info!("Conversion of {} for {} cancelled", input, user_id);
                Err(Img2XlsxError::Cancelled)
            }),
        None => work.await,
    };

    match result {
        Ok((output, workbook)) => {
            hold.keep();
            info!(
                "Converted '{}' for {} ({} credit(s) left)",
                input, user_id, remaining_credits
            );
            Ok(UserConversion {
                output,
                workbook,
                remaining_credits,
            })
        }
        Err(e) => {
            hold.release().await;
            Err(e)
        }
    }
}

async fn produce_workbook(
    input: &str,
    config: &ConversionConfig,
) -> Result<(ConversionOutput, Vec<u8>), Img2XlsxError> {
    let output = convert(input, config).await?.into_result()?;
    let workbook = write_workbook(&output.grid, &config.sheet_name, config.max_column_width)?;
    Ok((output, workbook))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UnreachableLedger;

    #[async_trait]
    impl CreditLedger for UnreachableLedger {
        async fn balance(&self, _user_id: &str) -> Result<u32, Img2XlsxError> {
            Err(Img2XlsxError::Ledger("connection refused".into()))
        }
        async fn debit(&self, _user_id: &str, _amount: u32) -> Result<u32, Img2XlsxError> {
            Err(Img2XlsxError::Ledger("connection refused".into()))
        }
        async fn refund(&self, _user_id: &str, _amount: u32) -> Result<u32, Img2XlsxError> {
            Err(Img2XlsxError::Ledger("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn new_users_get_initial_grant() {
        let ledger = InMemoryLedger::new();
        assert_eq!(ledger.balance("alice").await.unwrap(), DEFAULT_INITIAL_CREDITS);
    }

    #[tokio::test]
    async fn debit_decrements_and_floors_at_zero() {
        let ledger = InMemoryLedger::with_initial_credits(2);
        assert_eq!(tokio_test::assert_ok!(ledger.debit("bob", 1).await), 1);
        assert_eq!(tokio_test::assert_ok!(ledger.debit("bob", 1).await), 0);

        let err = tokio_test::assert_err!(ledger.debit("bob", 1).await);
        assert!(matches!(err, Img2XlsxError::InsufficientCredits { .. }));
        assert_eq!(ledger.balance("bob").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn refund_restores_debited_credits() {
        let ledger = InMemoryLedger::with_initial_credits(3);
        tokio_test::assert_ok!(ledger.debit("frank", 2).await);
        assert_eq!(tokio_test::assert_ok!(ledger.refund("frank", 2).await), 3);
    }

    #[tokio::test]
    async fn refund_without_debit_is_a_ledger_error() {
        let ledger = InMemoryLedger::new();
        let err = tokio_test::assert_err!(ledger.refund("grace", 1).await);
        assert!(matches!(err, Img2XlsxError::Ledger(_)));
    }

    #[tokio::test]
    async fn ledgers_share_state_across_clones() {
        let ledger = InMemoryLedger::new();
        let handle = ledger.clone();
        tokio_test::assert_ok!(handle.debit("erin", 3).await);
        assert_eq!(ledger.balance("erin").await.unwrap(), DEFAULT_INITIAL_CREDITS - 3);
    }

    #[tokio::test]
    async fn zero_balance_refuses_before_fetching() {
        let ledger = InMemoryLedger::new();
        ledger.set_balance("carol", 0).await;

        // The input does not exist; reaching the fetch would give FileNotFound.
        let err = convert_for_user(
            Arc::new(ledger),
            "carol",
            "/no/such/scan.png",
            &ConversionConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Img2XlsxError::InsufficientCredits { .. }));
    }

    #[tokio::test]
    async fn failed_run_is_not_charged() {
        let ledger = InMemoryLedger::new();
        let err = convert_for_user(
            Arc::new(ledger.clone()),
            "dave",
            "/no/such/scan.png",
            &ConversionConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Img2XlsxError::FileNotFound { .. }));
        assert_eq!(ledger.balance("dave").await.unwrap(), DEFAULT_INITIAL_CREDITS);
    }

    #[tokio::test]
    async fn backend_failure_stops_the_run() {
        let err = convert_for_user(
            Arc::new(UnreachableLedger),
            "heidi",
            "/no/such/scan.png",
            &ConversionConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Img2XlsxError::Ledger(_)));
    }

    #[tokio::test]
    async fn dropped_hold_is_refunded() {
        let ledger = InMemoryLedger::with_initial_credits(1);
        let (hold, remaining) = CreditHold::take(Arc::new(ledger.clone()), "ivan", 1)
            .await
            .unwrap();
        assert_eq!(remaining, 0);

        drop(hold);
        tokio::task::yield_now().await;
        assert_eq!(ledger.balance("ivan").await.unwrap(), 1);
    }
}
