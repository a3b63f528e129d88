//! Persistence for users and invoices.
//!
//! Filters carry the caller's value as a bound parameter next to an operator
//! drawn from a closed set, so no caller input is ever spliced into a query.

use crate::{
    errors::{AppError, AppResult},
    guard::StoredFile,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, collections::HashMap, str::FromStr, sync::Arc};
use tokio::sync::RwLock;

pub const STATUS_PAID: &str = "paid";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub picture: StoredFile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: String,
    pub user_id: String,
    pub amount: f64,
    pub due_date: NaiveDate,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl FromStr for Operator {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "=" => Ok(Operator::Eq),
            "!=" => Ok(Operator::Ne),
            ">" => Ok(Operator::Gt),
            "<" => Ok(Operator::Lt),
            ">=" => Ok(Operator::Ge),
            "<=" => Ok(Operator::Le),
            _ => Err(AppError::InvalidOperator),
        }
    }
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Ge => ">=",
            Operator::Le => "<=",
        }
    }

    fn holds(self, ord: Ordering) -> bool {
        match self {
            Operator::Eq => ord == Ordering::Equal,
            Operator::Ne => ord != Ordering::Equal,
            Operator::Gt => ord == Ordering::Greater,
            Operator::Lt => ord == Ordering::Less,
            Operator::Ge => ord != Ordering::Less,
            Operator::Le => ord != Ordering::Greater,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusFilter {
    pub operator: Operator,
    pub status: String,
}

impl StatusFilter {
    pub fn matches(&self, status: &str) -> bool {
        self.operator.holds(status.cmp(self.status.as_str()))
    }
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_user(&self, id: &str) -> AppResult<Option<User>>;
    async fn set_picture(&self, id: &str, picture: StoredFile) -> AppResult<()>;
}

#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    async fn find_invoice(&self, id: &str) -> AppResult<Option<Invoice>>;
    async fn list_invoices(&self, user_id: &str, filter: Option<&StatusFilter>) -> AppResult<Vec<Invoice>>;
    async fn mark_paid(&self, id: &str, user_id: &str) -> AppResult<()>;
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub invoices: Vec<Invoice>,
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    users: Arc<RwLock<HashMap<String, User>>>,
    invoices: Arc<RwLock<HashMap<String, Invoice>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(seed: &Seed) -> Self {
        let users = seed.users.iter().map(|u| (u.id.clone(), u.clone())).collect();
        let invoices = seed.invoices.iter().map(|i| (i.id.clone(), i.clone())).collect();
        Self {
            users: Arc::new(RwLock::new(users)),
            invoices: Arc::new(RwLock::new(invoices)),
        }
    }

    pub async fn insert_user(&self, user: User) {
        self.users.write().await.insert(user.id.clone(), user);
    }

    pub async fn insert_invoice(&self, invoice: Invoice) {
        self.invoices.write().await.insert(invoice.id.clone(), invoice);
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn find_user(&self, id: &str) -> AppResult<Option<User>> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn set_picture(&self, id: &str, picture: StoredFile) -> AppResult<()> {
        let mut users = self.users.write().await;
        let user = users.get_mut(id).ok_or(AppError::NotFound)?;
        user.picture = picture;
        Ok(())
    }
}

#[async_trait]
impl InvoiceRepository for InMemoryStore {
    async fn find_invoice(&self, id: &str) -> AppResult<Option<Invoice>> {
        Ok(self.invoices.read().await.get(id).cloned())
    }

    async fn list_invoices(&self, user_id: &str, filter: Option<&StatusFilter>) -> AppResult<Vec<Invoice>> {
        let invoices = self.invoices.read().await;
        let mut rows: Vec<Invoice> = invoices
            .values()
            .filter(|i| i.user_id == user_id)
            .filter(|i| filter.map_or(true, |f| f.matches(&i.status)))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rows)
    }

    async fn mark_paid(&self, id: &str, user_id: &str) -> AppResult<()> {
        let mut invoices = self.invoices.write().await;
        match invoices.get_mut(id) {
            Some(i) if i.user_id == user_id => {
                i.status = STATUS_PAID.to_string();
                Ok(())
            }
            _ => Err(AppError::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoice(id: &str, user: &str, status: &str) -> Invoice {
        Invoice {
            id: id.into(),
            user_id: user.into(),
            amount: 10.0,
            due_date: NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
            status: status.into(),
        }
    }

    #[test]
    fn operators_are_a_closed_set() {
        for op in ["=", "!=", ">", "<", ">=", "<="] {
            assert_eq!(op.parse::<Operator>().unwrap().as_str(), op);
        }
        for bad in ["; DROP TABLE invoices; --", "OR 1=1 --", "LIKE", "", "=="] {
            assert!(matches!(bad.parse::<Operator>(), Err(AppError::InvalidOperator)));
        }
    }

    #[test]
    fn filter_compares_status_text() {
        let f = StatusFilter { operator: Operator::Ne, status: "paid".into() };
        assert!(f.matches("unpaid"));
        assert!(!f.matches("paid"));
        let f = StatusFilter { operator: Operator::Ge, status: "paid".into() };
        assert!(f.matches("pending"));
        assert!(!f.matches("overdue"));
    }

    #[tokio::test]
    async fn listing_is_scoped_to_owner() {
        let store = InMemoryStore::new();
        store.insert_invoice(invoice("i1", "u1", "paid")).await;
        store.insert_invoice(invoice("i2", "u1", "unpaid")).await;
        store.insert_invoice(invoice("i3", "u2", "paid")).await;

        let all = store.list_invoices("u1", None).await.unwrap();
        assert_eq!(all.len(), 2);

        let f = StatusFilter { operator: Operator::Eq, status: "paid' OR '1'='1".into() };
        assert!(store.list_invoices("u1", Some(&f)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_paid_requires_owner() {
        let store = InMemoryStore::new();
        store.insert_invoice(invoice("i1", "u1", "unpaid")).await;
        assert!(matches!(store.mark_paid("i1", "u2").await, Err(AppError::NotFound)));
        store.mark_paid("i1", "u1").await.unwrap();
        assert_eq!(store.find_invoice("i1").await.unwrap().unwrap().status, STATUS_PAID);
    }
}
