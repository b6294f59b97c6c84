//! Invoice model and invoice-number generation.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Invoice status, derived exclusively from the payment aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Unpaid,
    PartiallyPaid,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Unpaid => "unpaid",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "partially_paid" => InvoiceStatus::PartiallyPaid,
            "paid" => InvoiceStatus::Paid,
            "cancelled" => InvoiceStatus::Cancelled,
            _ => InvoiceStatus::Unpaid,
        }
    }
}

/// Invoice row. The business_* and bank_* columns are the sender snapshot
/// copied from BusinessInfo at creation; together with client_id and
/// invoice_number they are immutable once persisted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub id: i64,
    pub invoice_number: Option<String>,
    pub client_id: i64,
    pub business_name: String,
    pub business_address: String,
    pub business_gstin: String,
    pub bank_account_name: String,
    pub bank_account_number: String,
    pub bank_ifsc: String,
    pub bank_branch: String,
    pub issue_date: NaiveDate,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub gst_percentage: Decimal,
    pub gst_amount: Decimal,
    pub total_amount: Decimal,
    pub status: String,
    pub payment_terms: Option<String>,
    pub notes: Option<String>,
    pub authorized_by: Option<i64>,
    pub pipeline_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    pub fn status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }

    /// Names of protected fields an update attempts to change. Supplying a
    /// protected field with its current value is tolerated; changing it is
    /// not.
    pub fn immutable_violations(&self, update: &UpdateInvoice) -> Vec<&'static str> {
        let mut violations = Vec::new();
        if update.client_id.is_some_and(|v| v != self.client_id) {
            violations.push("client_id");
        }
        if update
            .invoice_number
            .as_ref()
            .is_some_and(|v| Some(v) != self.invoice_number.as_ref())
        {
            violations.push("invoice_number");
        }
        let snapshot = [
            ("business_name", &self.business_name, &update.business_name),
            (
                "business_address",
                &self.business_address,
                &update.business_address,
            ),
            ("business_gstin", &self.business_gstin, &update.business_gstin),
            (
                "bank_account_name",
                &self.bank_account_name,
                &update.bank_account_name,
            ),
            (
                "bank_account_number",
                &self.bank_account_number,
                &update.bank_account_number,
            ),
            ("bank_ifsc", &self.bank_ifsc, &update.bank_ifsc),
            ("bank_branch", &self.bank_branch, &update.bank_branch),
        ];
        for (name, current, requested) in snapshot {
            if requested.as_ref().is_some_and(|v| v != current) {
                violations.push(name);
            }
        }
        violations
    }
}

/// One billing line.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceItem {
    pub id: i64,
    pub invoice_id: i64,
    pub service_id: Option<i64>,
    pub description: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
}

impl InvoiceItem {
    pub fn line_total(&self) -> Decimal {
        line_total(self.unit_price, self.quantity)
    }
}

/// Input for creating an invoice. Items may be empty and added later.
/// Decimal sign checks happen in the ledger service.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateInvoice {
    pub client_id: i64,
    pub business_info_id: Option<i64>,
    pub issue_date: Option<NaiveDate>,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub gst_percentage: Decimal,
    pub payment_terms: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub items: Vec<NewInvoiceItem>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewInvoiceItem {
    pub service_id: Option<i64>,
    #[validate(length(min = 1, message = "Description is required"))]
    pub description: String,
    pub unit_price: Decimal,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateInvoiceItem {
    pub service_id: Option<i64>,
    #[validate(length(min = 1, message = "Description cannot be empty"))]
    pub description: Option<String>,
    pub unit_price: Option<Decimal>,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: Option<i32>,
}

/// Input for updating an invoice. Mutable fields only; the protected fields
/// are present so attempts to change them can be rejected explicitly.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateInvoice {
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub payment_terms: Option<String>,
    pub notes: Option<String>,
    pub client_id: Option<i64>,
    pub invoice_number: Option<String>,
    pub business_name: Option<String>,
    pub business_address: Option<String>,
    pub business_gstin: Option<String>,
    pub bank_account_name: Option<String>,
    pub bank_account_number: Option<String>,
    pub bank_ifsc: Option<String>,
    pub bank_branch: Option<String>,
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListInvoicesFilter {
    pub client_id: Option<i64>,
    pub status: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

pub fn line_total(unit_price: Decimal, quantity: i32) -> Decimal {
    unit_price * Decimal::from(quantity)
}

/// GST amount and grand total for a given sum of line totals.
pub fn compute_totals(items_total: Decimal, gst_percentage: Decimal) -> (Decimal, Decimal) {
    let gst_amount = (items_total * gst_percentage / Decimal::from(100)).round_dp(2);
    let total_amount = (items_total + gst_amount).round_dp(2);
    (gst_amount, total_amount)
}

/// Invoice number: `{client_code}{pk}{3-letter month}{2-digit year}`,
/// uppercased. Assigned once, right after the row receives its primary key.
pub fn compose_invoice_number(client_code: &str, invoice_pk: i64, when: DateTime<Utc>) -> String {
    format!(
        "{}{}{}{}",
        client_code,
        invoice_pk,
        when.format("%b"),
        when.format("%y")
    )
    .to_uppercase()
}

/// Two-letter client-code candidates derived from a company name, in
/// preference order: first two letters, first letter paired with each later
/// letter, then every ordered pair. Non-alphabetic characters are ignored.
pub fn client_code_candidates(company_name: &str) -> Vec<String> {
    let letters: Vec<char> = company_name
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect();

    let mut candidates: Vec<String> = Vec::new();
    let mut push = |a: char, b: char, out: &mut Vec<String>| {
        let code: String = [a, b].iter().collect();
        if !out.contains(&code) {
            out.push(code);
        }
    };

    match letters.len() {
        0 => push('X', 'X', &mut candidates),
        1 => push(letters[0], 'X', &mut candidates),
        _ => {
            push(letters[0], letters[1], &mut candidates);
            for &later in &letters[2..] {
                push(letters[0], later, &mut candidates);
            }
            for (i, &a) in letters.iter().enumerate() {
                for (j, &b) in letters.iter().enumerate() {
                    if i != j {
                        push(a, b, &mut candidates);
                    }
                }
            }
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn totals_match_gst_formula() {
        // Two items: 100 x 2 and 50 x 1, 18% GST.
        let items_total = line_total(Decimal::new(10000, 2), 2) + line_total(Decimal::new(5000, 2), 1);
        assert_eq!(items_total, Decimal::new(25000, 2));
        let (gst_amount, total_amount) = compute_totals(items_total, Decimal::from(18));
        assert_eq!(gst_amount, Decimal::new(4500, 2));
        assert_eq!(total_amount, Decimal::new(29500, 2));
    }

    #[test]
    fn zero_gst_keeps_total_equal_to_items() {
        let (gst, total) = compute_totals(Decimal::from(250), Decimal::ZERO);
        assert_eq!(gst, Decimal::ZERO);
        assert_eq!(total, Decimal::from(250));
    }

    #[test]
    fn invoice_number_embeds_code_pk_month_year() {
        let when = Utc.with_ymd_and_hms(2025, 8, 14, 10, 0, 0).unwrap();
        assert_eq!(compose_invoice_number("ac", 12, when), "AC12AUG25");
        let december = Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap();
        assert_eq!(compose_invoice_number("ZZ", 7, december), "ZZ7DEC24");
    }

    #[test]
    fn candidate_order_prefers_leading_letters() {
        let candidates = client_code_candidates("Acme Studio");
        assert_eq!(candidates[0], "AC");
        assert_eq!(candidates[1], "AM");
        assert_eq!(candidates[2], "AE");
        // Ordered pairs follow once first-letter pairings are exhausted.
        assert!(candidates.contains(&"CA".to_string()));
        assert!(candidates.iter().all(|c| c.len() == 2));
        let unique: std::collections::HashSet<_> = candidates.iter().collect();
        assert_eq!(unique.len(), candidates.len());
    }

    #[test]
    fn short_or_empty_names_still_yield_a_candidate() {
        assert_eq!(client_code_candidates("7"), vec!["XX".to_string()]);
        assert_eq!(client_code_candidates("Q"), vec!["QX".to_string()]);
    }

    fn base_invoice() -> Invoice {
        Invoice {
            id: 1,
            invoice_number: Some("AC1AUG25".to_string()),
            client_id: 10,
            business_name: "Studio".to_string(),
            business_address: "1 Lane".to_string(),
            business_gstin: "GST123".to_string(),
            bank_account_name: "Studio LLP".to_string(),
            bank_account_number: "0012345".to_string(),
            bank_ifsc: "HDFC0001".to_string(),
            bank_branch: "Main".to_string(),
            issue_date: NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(),
            start_date: None,
            due_date: None,
            gst_percentage: Decimal::from(18),
            gst_amount: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            status: "unpaid".to_string(),
            payment_terms: None,
            notes: None,
            authorized_by: None,
            pipeline_started_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn changing_protected_fields_is_a_violation() {
        let invoice = base_invoice();
        let update = UpdateInvoice {
            client_id: Some(11),
            business_gstin: Some("OTHER".to_string()),
            notes: Some("fine to change".to_string()),
            ..Default::default()
        };
        let violations = invoice.immutable_violations(&update);
        assert_eq!(violations, vec!["client_id", "business_gstin"]);
    }

    #[test]
    fn restating_current_values_is_not_a_violation() {
        let invoice = base_invoice();
        let update = UpdateInvoice {
            client_id: Some(10),
            invoice_number: Some("AC1AUG25".to_string()),
            business_name: Some("Studio".to_string()),
            ..Default::default()
        };
        assert!(invoice.immutable_violations(&update).is_empty());
    }
}
