use chrono::Utc;
use diesel::prelude::*;
use kidbiz_shared::domain::{LedgerTotals, TransactionKind};
use tracing::{info, trace};

use super::learning::{AwardOutcome, award_in_tx, insert_activity};
use super::models::{Company, CompanyTransaction, NewCompany, NewCompanyTransaction};
use super::{Store, StorageError, conflict_on_unique, schema};

/// Outcome of recording one ledger transaction.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub company: Company,
    pub transaction: CompanyTransaction,
    pub award: AwardOutcome,
}

impl Store {
    /// Opens the child's company. A child owns at most one.
    pub async fn create_company(&self, child: &str, name_: &str) -> Result<Company, StorageError> {
        let name_ = name_.trim().to_string();
        if name_.is_empty() {
            return Err(StorageError::InvalidInput("name is required".into()));
        }
        let child = child.to_string();
        self.with_conn(move |conn| {
            use schema::companies;
            conn.immediate_transaction(|conn| -> Result<Company, StorageError> {
                let company = diesel::insert_into(companies::table)
                    .values(&NewCompany {
                        child_id: &child,
                        name: &name_,
                    })
                    .returning(Company::as_returning())
                    .get_result::<Company>(conn)
                    .map_err(|e| conflict_on_unique(e, "company"))?;
                insert_activity(
                    conn,
                    &child,
                    "company_created",
                    &format!("Founded \"{}\"", company.name),
                    0,
                )?;
                info!(company_id = company.id, %child, "company created");
                Ok(company)
            })
        })
        .await
    }

    pub async fn company_for_child(&self, child: &str) -> Result<Option<Company>, StorageError> {
        let child = child.to_string();
        self.with_conn(move |conn| {
            use schema::companies::dsl::*;
            Ok(companies
                .filter(child_id.eq(&child))
                .select(Company::as_select())
                .first::<Company>(conn)
                .optional()?)
        })
        .await
    }

    /// Appends a transaction and updates the company totals in the same
    /// transaction, then re-evaluates revenue achievements.
    ///
    /// Expenses may take the balance below zero.
    pub async fn add_transaction(
        &self,
        child: &str,
        kind: TransactionKind,
        amount_cents: i64,
        description: &str,
        xp_per_level: i64,
    ) -> Result<LedgerEntry, StorageError> {
        if amount_cents <= 0 {
            return Err(StorageError::InvalidInput(
                "amount_cents must be positive".into(),
            ));
        }
        let child = child.to_string();
        let description = description.trim().to_string();
        trace!(%child, kind = kind.as_str(), amount_cents, "add_transaction");
        self.with_conn(move |conn| {
            use schema::{companies as c, company_transactions as ct};
            conn.immediate_transaction(|conn| -> Result<LedgerEntry, StorageError> {
                let company = c::table
                    .filter(c::child_id.eq(&child))
                    .select(Company::as_select())
                    .first::<Company>(conn)
                    .optional()?
                    .ok_or_else(|| StorageError::NotFound("company".into()))?;

                let totals = LedgerTotals {
                    balance_cents: company.balance_cents,
                    revenue_cents: company.total_revenue_cents,
                    expense_cents: company.total_expenses_cents,
                }
                .apply(kind, amount_cents)
                .ok_or_else(|| {
                    StorageError::InvalidInput("amount_cents exceeds the ledger range".into())
                })?;

                let transaction = diesel::insert_into(ct::table)
                    .values(&NewCompanyTransaction {
                        company_id: company.id,
                        kind: kind.as_str(),
                        amount_cents,
                        description: &description,
                    })
                    .returning(CompanyTransaction::as_returning())
                    .get_result::<CompanyTransaction>(conn)?;

                let company = diesel::update(c::table.filter(c::id.eq(company.id)))
                    .set((
                        c::balance_cents.eq(totals.balance_cents),
                        c::total_revenue_cents.eq(totals.revenue_cents),
                        c::total_expenses_cents.eq(totals.expense_cents),
                        c::updated_at.eq(Utc::now().naive_utc()),
                    ))
                    .returning(Company::as_returning())
                    .get_result::<Company>(conn)?;

                let award = award_in_tx(conn, &child, 0, xp_per_level)?;
                insert_activity(
                    conn,
                    &child,
                    kind.as_str(),
                    &format!("{} of {} cents", capitalize(kind.as_str()), amount_cents),
                    0,
                )?;
                Ok(LedgerEntry {
                    company,
                    transaction,
                    award,
                })
            })
        })
        .await
    }

    /// Newest first.
    pub async fn list_transactions(
        &self,
        child: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CompanyTransaction>, StorageError> {
        let child = child.to_string();
        self.with_conn(move |conn| {
            use schema::{companies as c, company_transactions as ct};
            let company_id: i32 = c::table
                .filter(c::child_id.eq(&child))
                .select(c::id)
                .first(conn)
                .optional()?
                .ok_or_else(|| StorageError::NotFound("company".into()))?;
            Ok(ct::table
                .filter(ct::company_id.eq(company_id))
                .order((ct::created_at.desc(), ct::id.desc()))
                .limit(limit.clamp(1, 200))
                .offset(offset.max(0))
                .select(CompanyTransaction::as_select())
                .load::<CompanyTransaction>(conn)?)
        })
        .await
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
