//! # Transfer Classifier & Payment Processor
//!
//! The decision function over one observed operation. Classification is
//! pure: normalize, filter on recipient and settlement currency, then look
//! up an exact amount-plus-memo product match. Non-matches are the common
//! case on a public account stream and are silently ignored. Only a match
//! touches the ledger.

use serde::Deserialize;
use thiserror::Error;

use crate::chain::operations::{Amount, AmountError, RawOperation, TransferEvent};
use crate::ledger::{GrantOutcome, LedgerError, SubscriptionLedger};

/// One purchasable subscription product, as configured (amounts in the
/// chain's string form so `.env` files stay readable).
#[derive(Debug, Clone, Deserialize)]
pub struct Product {
    /// Label used in logs only.
    pub name: String,
    /// Exact price, e.g. `"3.000 HBD"`.
    pub amount: String,
    /// Window length granted per payment.
    pub days: u32,
    /// When set, the payment memo must equal `subscribe:<account>`
    /// (case-insensitive) to match.
    #[serde(default)]
    pub memo_account: Option<String>,
}

/// Raised when the product table itself is invalid at startup.
#[derive(Debug, Error)]
pub enum ProductConfigError {
    #[error("product '{name}': {source}")]
    BadAmount {
        name: String,
        #[source]
        source: AmountError,
    },
    #[error("product '{0}': days must be at least 1")]
    ZeroDays(String),
    #[error("no products configured")]
    Empty,
}

#[derive(Debug, Clone)]
struct CompiledProduct {
    name: String,
    amount: Amount,
    days: u32,
    /// Precomputed expected memo, already lower-cased.
    memo: Option<String>,
}

/// A qualifying payment: who gets how many days.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedPayment {
    /// The paying account; becomes the subscription username.
    pub username: String,
    /// Window length from the matched product.
    pub days: u32,
    /// Product label, for logs.
    pub product: String,
}

/// Stateless product matcher over normalized transfers.
#[derive(Debug, Clone)]
pub struct TransferClassifier {
    receiving_accounts: Vec<String>,
    currency: String,
    products: Vec<CompiledProduct>,
}

impl TransferClassifier {
    /// Compiles the configured product table. Amounts are parsed once here
    /// so a typo fails startup instead of silently matching nothing.
    pub fn new(
        receiving_accounts: Vec<String>,
        currency: &str,
        products: &[Product],
    ) -> Result<Self, ProductConfigError> {
        if products.is_empty() {
            return Err(ProductConfigError::Empty);
        }
        let compiled = products
            .iter()
            .map(|p| {
                if p.days == 0 {
                    return Err(ProductConfigError::ZeroDays(p.name.clone()));
                }
                let amount = Amount::parse(&p.amount).map_err(|source| {
                    ProductConfigError::BadAmount {
                        name: p.name.clone(),
                        source,
                    }
                })?;
                Ok(CompiledProduct {
                    name: p.name.clone(),
                    amount,
                    days: p.days,
                    memo: p
                        .memo_account
                        .as_ref()
                        .map(|a| format!("subscribe:{}", a.to_lowercase())),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            receiving_accounts,
            currency: currency.to_ascii_uppercase(),
            products: compiled,
        })
    }

    /// Decides whether `op` is a qualifying subscription payment.
    pub fn classify(&self, op: &RawOperation) -> Option<MatchedPayment> {
        let event = TransferEvent::from_operation(op)?;
        if !self.receiving_accounts.iter().any(|a| a == &event.recipient) {
            return None;
        }
        if event.amount.symbol != self.currency {
            return None;
        }
        let memo = event.memo.trim().to_lowercase();
        self.products
            .iter()
            .find(|p| {
                p.amount == event.amount
                    && p.memo.as_ref().is_none_or(|expected| *expected == memo)
            })
            .map(|p| MatchedPayment {
                username: event.sender.clone(),
                days: p.days,
                product: p.name.clone(),
            })
    }
}

/// What processing one operation amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// A window was created or renewed.
    Granted { username: String, product: String },
    /// A matching payment arrived while the window was already active;
    /// duplicate delivery or early renewal, persisted state unchanged.
    AlreadyActive { username: String, product: String },
    /// Not a qualifying payment; nothing happened.
    Ignored,
}

/// Couples the classifier to a ledger. The ledger handed in here is the
/// resilient decorator, so the persistence stage gets its retry budget
/// without this type knowing about it.
#[derive(Clone)]
pub struct PaymentProcessor<L> {
    classifier: TransferClassifier,
    ledger: L,
}

impl<L: SubscriptionLedger> PaymentProcessor<L> {
    pub fn new(classifier: TransferClassifier, ledger: L) -> Self {
        Self { classifier, ledger }
    }

    /// Classifies one operation and, on a match, grants the subscription.
    /// A `None` classification is success (`Ignored`), not an error.
    pub async fn process(&self, op: &RawOperation) -> Result<ProcessOutcome, LedgerError> {
        let Some(matched) = self.classifier.classify(op) else {
            return Ok(ProcessOutcome::Ignored);
        };
        tracing::info!(
            username = %matched.username,
            product = %matched.product,
            days = matched.days,
            "qualifying payment observed"
        );
        match self.ledger.grant(&matched.username, matched.days).await? {
            GrantOutcome::Granted { expires } => {
                tracing::info!(username = %matched.username, %expires, "subscription granted");
                Ok(ProcessOutcome::Granted {
                    username: matched.username,
                    product: matched.product,
                })
            }
            _ => Ok(ProcessOutcome::AlreadyActive {
                username: matched.username,
                product: matched.product,
            }),
        }
    }
}
