//! # SIIGO Wire Types
//!
//! The subset of SIIGO's JSON that Surtido reads or writes. Unknown fields
//! are ignored, and most fields are optional because SIIGO omits them
//! freely depending on the account configuration.
//!
//! Amounts are [`Decimal`]: SIIGO sends them as JSON numbers with up to
//! two (sometimes more) decimals. Request amounts must go back as numbers
//! too; SIIGO rejects quoted amounts.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Pagination
// =============================================================================

/// Envelope of every list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub pagination: Pagination,
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub total_results: u64,
}

impl<T> Paginated<T> {
    /// Whether another page should be requested after this one.
    pub fn has_more(&self) -> bool {
        let p = &self.pagination;
        let seen = u64::from(p.page) * u64::from(p.page_size);
        !self.results.is_empty()
            && self.results.len() >= p.page_size as usize
            && seen < p.total_results
    }
}

// =============================================================================
// Auth
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct AuthRequest<'a> {
    pub username: &'a str,
    pub access_key: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    /// Lifetime in seconds.
    pub expires_in: u64,
}

/// Error body: `{"Errors": [{"Code": "...", "Message": "..."}], "Status": 400}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(rename = "Errors", default)]
    pub errors: Vec<ErrorDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "Code", default)]
    pub code: Option<String>,
    #[serde(rename = "Message", default)]
    pub message: Option<String>,
}

impl ErrorBody {
    /// `"code: message; code: message"`, or `None` when nothing useful.
    pub fn summary(&self) -> Option<String> {
        let parts: Vec<String> = self
            .errors
            .iter()
            .filter_map(|e| match (&e.code, &e.message) {
                (Some(code), Some(msg)) => Some(format!("{code}: {msg}")),
                (None, Some(msg)) => Some(msg.clone()),
                (Some(code), None) => Some(code.clone()),
                (None, None) => None,
            })
            .collect();
        (!parts.is_empty()).then(|| parts.join("; "))
    }
}

// =============================================================================
// Products
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiigoProduct {
    pub id: String,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub account_group: Option<AccountGroup>,
    #[serde(default)]
    pub stock_control: bool,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub taxes: Vec<SiigoTax>,
    #[serde(default)]
    pub prices: Vec<SiigoPrice>,
    #[serde(default)]
    pub available_quantity: Option<Decimal>,
    #[serde(default)]
    pub warehouses: Vec<Warehouse>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountGroup {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiigoTax {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    /// "IVA", "Retefuente", "Impoconsumo", ...
    #[serde(rename = "type", default)]
    pub tax_type: Option<String>,
    #[serde(default)]
    pub percentage: Option<Decimal>,
}

/// One currency's price lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiigoPrice {
    #[serde(default)]
    pub currency_code: Option<String>,
    #[serde(default)]
    pub price_list: Vec<PriceListEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceListEntry {
    pub position: u32,
    #[serde(default)]
    pub name: Option<String>,
    pub value: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub quantity: Decimal,
}

// =============================================================================
// Customers
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiigoCustomer {
    pub id: String,
    pub identification: String,
    #[serde(default)]
    pub check_digit: Option<String>,
    /// Person: `["First", "Last"]`; company: `["Razón social"]`.
    #[serde(default)]
    pub name: Vec<String>,
    #[serde(default)]
    pub commercial_name: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub phones: Vec<SiigoPhone>,
    #[serde(default)]
    pub contacts: Vec<SiigoContact>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiigoPhone {
    #[serde(default)]
    pub indicative: Option<String>,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub extension: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiigoContact {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<SiigoPhone>,
}

// =============================================================================
// Invoices
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiigoInvoice {
    pub id: String,
    /// Full number as printed, e.g. `FV-1-1024`.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub number: Option<i64>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub customer: Option<InvoiceCustomerRef>,
    pub total: Decimal,
    #[serde(default)]
    pub balance: Option<Decimal>,
    #[serde(default)]
    pub stamp: Option<Stamp>,
    #[serde(default)]
    pub annulled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceCustomerRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub identification: String,
    #[serde(default)]
    pub branch_office: i64,
}

/// Electronic invoicing (DIAN) state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stamp {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub cufe: Option<String>,
}

/// Body of `POST /v1/invoices`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRequest {
    pub document: IdRef,
    /// `YYYY-MM-DD`.
    pub date: String,
    pub customer: InvoiceCustomerRef,
    pub seller: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observations: Option<String>,
    pub items: Vec<InvoiceItemRequest>,
    pub payments: Vec<InvoicePaymentRequest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRef {
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceItemRequest {
    pub code: String,
    pub description: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub quantity: Decimal,
    /// Unit price before tax.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taxes: Vec<IdRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoicePaymentRequest {
    pub id: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub value: Decimal,
    pub due_date: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_parses_siigo_json() {
        let json = r#"{
            "id": "6b5a7b8c-1111-4a2b-9c3d-000000000001",
            "code": "GAL-500",
            "name": "Galletas de avena 500g",
            "account_group": {"id": 1253, "name": "Galletería"},
            "type": "Product",
            "stock_control": true,
            "active": true,
            "taxes": [{"id": 13156, "name": "IVA 19%", "type": "IVA", "percentage": 19}],
            "prices": [{"currency_code": "COP", "price_list": [
                {"position": 1, "name": "Precio de venta 1", "value": 4599.5}
            ]}],
            "available_quantity": 120,
            "warehouses": [{"id": 1270, "name": "Bodega principal", "quantity": 120}],
            "metadata": {"created": "2024-03-01T10:00:00Z"}
        }"#;

        let product: SiigoProduct = serde_json::from_str(json).unwrap();
        assert_eq!(product.code, "GAL-500");
        assert!(product.stock_control);
        assert_eq!(product.taxes[0].tax_type.as_deref(), Some("IVA"));
        assert_eq!(product.prices[0].price_list[0].value, Decimal::new(45995, 1));
        assert_eq!(product.available_quantity, Some(Decimal::from(120)));
    }

    #[test]
    fn test_minimal_product_uses_defaults() {
        let product: SiigoProduct =
            serde_json::from_str(r#"{"id": "x", "code": "A", "name": "A"}"#).unwrap();
        assert!(product.active);
        assert!(!product.stock_control);
        assert!(product.prices.is_empty());
    }

    #[test]
    fn test_has_more() {
        let page = |page, page_size, total, len| Paginated {
            pagination: Pagination {
                page,
                page_size,
                total_results: total,
            },
            results: vec![(); len],
        };

        assert!(page(1, 2, 5, 2).has_more());
        assert!(!page(3, 2, 5, 1).has_more());
        assert!(!page(1, 2, 2, 2).has_more());
        assert!(!page(1, 2, 10, 0).has_more());
    }

    #[test]
    fn test_error_body_summary() {
        let body: ErrorBody = serde_json::from_str(
            r#"{"Errors": [{"Code": "invalid_reference", "Message": "The seller doesn't exist"}], "Status": 400}"#,
        )
        .unwrap();
        assert_eq!(
            body.summary().as_deref(),
            Some("invalid_reference: The seller doesn't exist")
        );

        let empty: ErrorBody = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.summary(), None);
    }

    #[test]
    fn test_invoice_request_skips_empty_taxes() {
        let item = InvoiceItemRequest {
            code: "A".into(),
            description: "A".into(),
            quantity: Decimal::from(2),
            price: Decimal::new(1050, 2),
            taxes: vec![],
        };
        let json = serde_json::to_value(&item).unwrap();
        assert!(json.get("taxes").is_none());
        assert_eq!(json["price"], serde_json::json!(10.5));
        assert_eq!(json["quantity"], serde_json::json!(2.0));
    }

    #[test]
    fn test_payment_value_is_a_json_number() {
        let payment = InvoicePaymentRequest {
            id: 5636,
            value: Decimal::new(35700050, 2),
            due_date: "2026-10-17".into(),
        };
        let json = serde_json::to_value(&payment).unwrap();
        assert!(json["value"].is_number());
        assert_eq!(json["value"].as_f64(), Some(357000.5));
    }
}
