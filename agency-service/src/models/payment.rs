//! Payments and payment-driven status derivation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use super::invoice::InvoiceStatus;

/// Accepted payment modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    Upi,
    BankTransfer,
    Card,
    Cash,
    Cheque,
    Other,
}

impl PaymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Upi => "upi",
            PaymentMode::BankTransfer => "bank_transfer",
            PaymentMode::Card => "card",
            PaymentMode::Cash => "cash",
            PaymentMode::Cheque => "cheque",
            PaymentMode::Other => "other",
        }
    }

    /// Strict parse for caller-supplied modes.
    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "upi" => Some(PaymentMode::Upi),
            "bank_transfer" => Some(PaymentMode::BankTransfer),
            "card" => Some(PaymentMode::Card),
            "cash" => Some(PaymentMode::Cash),
            "cheque" => Some(PaymentMode::Cheque),
            "other" => Some(PaymentMode::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: i64,
    pub invoice_id: i64,
    pub amount: Decimal,
    pub mode: String,
    pub reference: Option<String>,
    pub paid_at: DateTime<Utc>,
    pub received_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Input for recording a payment against an invoice.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RecordPayment {
    pub amount: Decimal,
    pub mode: String,
    pub reference: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Status is a pure function of the paid aggregate against the total:
/// nothing paid, something paid, or fully covered.
pub fn derive_status(paid_total: Decimal, invoice_total: Decimal) -> InvoiceStatus {
    if paid_total <= Decimal::ZERO {
        InvoiceStatus::Unpaid
    } else if paid_total < invoice_total {
        InvoiceStatus::PartiallyPaid
    } else {
        InvoiceStatus::Paid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_paid_aggregate() {
        let total = Decimal::new(29500, 2);
        assert_eq!(derive_status(Decimal::ZERO, total), InvoiceStatus::Unpaid);
        assert_eq!(
            derive_status(Decimal::new(10000, 2), total),
            InvoiceStatus::PartiallyPaid
        );
        assert_eq!(derive_status(total, total), InvoiceStatus::Paid);
        assert_eq!(
            derive_status(Decimal::new(40000, 2), total),
            InvoiceStatus::Paid
        );
    }

    #[test]
    fn partial_then_final_payment_reaches_paid() {
        // 295.00 total: 100 paid, then 195 more.
        let total = Decimal::new(29500, 2);
        let first = Decimal::new(10000, 2);
        assert_eq!(derive_status(first, total), InvoiceStatus::PartiallyPaid);
        let second = first + Decimal::new(19500, 2);
        assert_eq!(derive_status(second, total), InvoiceStatus::Paid);
    }

    #[test]
    fn zero_total_invoice_is_unpaid_until_any_payment() {
        assert_eq!(
            derive_status(Decimal::ZERO, Decimal::ZERO),
            InvoiceStatus::Unpaid
        );
        assert_eq!(
            derive_status(Decimal::new(1, 2), Decimal::ZERO),
            InvoiceStatus::Paid
        );
    }

    #[test]
    fn unknown_payment_modes_are_rejected() {
        assert_eq!(PaymentMode::from_string("barter"), None);
        assert_eq!(PaymentMode::from_string("upi"), Some(PaymentMode::Upi));
    }
}
