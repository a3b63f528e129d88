use crate::{
    errors::{AppError, AppResult},
    guard::{PathGuard, Receipts},
    payments::{CardDetails, PaymentBrand, PaymentGateway},
    store::{Invoice, InvoiceRepository, Operator, StatusFilter},
};
use std::sync::Arc;

pub struct Invoices {
    receipts: PathGuard<Receipts>,
    repo: Arc<dyn InvoiceRepository>,
    payments: Arc<dyn PaymentGateway>,
}

impl Invoices {
    pub fn new(receipts: PathGuard<Receipts>, repo: Arc<dyn InvoiceRepository>, payments: Arc<dyn PaymentGateway>) -> Self {
        Self { receipts, repo, payments }
    }

    /// Lists the user's invoices. A status without an operator compares with
    /// `=`; an operator outside the allowed set fails before any query runs.
    pub async fn list(&self, user_id: &str, status: Option<&str>, operator: Option<&str>) -> AppResult<Vec<Invoice>> {
        let operator = match operator.filter(|o| !o.trim().is_empty()) {
            Some(raw) => Some(raw.parse::<Operator>().inspect_err(|_| {
                tracing::warn!(user_id, operator = raw, "rejected filter operator");
            })?),
            None => None,
        };
        let filter = status.map(|s| StatusFilter {
            operator: operator.unwrap_or(Operator::Eq),
            status: s.to_string(),
        });
        self.repo.list_invoices(user_id, filter.as_ref()).await
    }

    pub async fn get(&self, user_id: &str, invoice_id: &str) -> AppResult<Invoice> {
        self.owned(user_id, invoice_id).await
    }

    /// Charges the card through the provider for `brand`, then marks the
    /// invoice paid.
    pub async fn pay(&self, user_id: &str, invoice_id: &str, brand: &str, card: &CardDetails) -> AppResult<()> {
        let brand: PaymentBrand = brand.parse().inspect_err(|_| {
            tracing::warn!(user_id, brand, "rejected payment provider");
        })?;
        self.owned(user_id, invoice_id).await?;
        self.payments.charge(brand, card).await?;
        self.repo.mark_paid(invoice_id, user_id).await?;
        tracing::info!(user_id, invoice_id, brand = brand.as_str(), "invoice paid");
        Ok(())
    }

    /// Reads a receipt named by the caller from the receipts root.
    pub async fn receipt(&self, invoice_id: &str, pdf_name: &str) -> AppResult<String> {
        self.repo.find_invoice(invoice_id).await?.ok_or(AppError::NotFound)?;
        let path = self.receipts.resolve(pdf_name)?;
        tokio::fs::read_to_string(path.as_path()).await.map_err(|e| {
            tracing::error!(invoice_id, path = %path.as_path().display(), error = %e, "receipt not readable");
            AppError::NotFound
        })
    }

    async fn owned(&self, user_id: &str, invoice_id: &str) -> AppResult<Invoice> {
        match self.repo.find_invoice(invoice_id).await? {
            Some(invoice) if invoice.user_id == user_id => Ok(invoice),
            _ => Err(AppError::NotFound),
        }
    }
}
