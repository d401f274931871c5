//! Post-load status reconciliation
//!
//! Walks the whole `customers` table in `cpf` order, one keyset page at a
//! time, and rewrites the placeholder status flags written during ingestion:
//!
//! - each customer's `status_cnpj_frequent_store` / `status_cnpj_last_store`
//!   become the CNPJ validator's verdict on the stored reference (a missing
//!   reference is `invalid`);
//! - each referenced store gets the same verdict in the flag for the role it
//!   was referenced in;
//! - optionally, `status_cpf` is recomputed with the CPF validator.
//!
//! Each page is applied in its own transaction. The first failure stops the
//! pass; pages already committed stay committed, and a rerun converges to the
//! same result.

use std::collections::BTreeMap;

use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, info};

use cadastro_common::document::{validate_cnpj, validate_cpf};
use cadastro_common::DocumentStatus;

use crate::config::ReconcileConfig;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Failed to scan customers after {}: {source}", after.as_deref().unwrap_or("<start>"))]
    Scan {
        after: Option<String>,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to update {table} on page {page}: {source}")]
    Update {
        page: u64,
        table: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

/// Counters for one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub customers_scanned: u64,
    pub pages: u64,
    /// Store references judged valid, counted per customer and role
    pub cnpj_valid: u64,
    pub cnpj_invalid: u64,
    pub cpf_recomputed: u64,
    pub stores_updated: u64,
}

/// One row of the customer scan
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CustomerRefs {
    pub cpf: String,
    pub most_frequent_store_cnpj: Option<String>,
    pub last_store_cnpj: Option<String>,
}

/// Statuses computed for one customer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub frequent_store: DocumentStatus,
    pub last_store: DocumentStatus,
    /// `None` leaves `status_cpf` untouched.
    pub cpf: Option<DocumentStatus>,
}

fn cnpj_status(reference: Option<&str>) -> DocumentStatus {
    DocumentStatus::from_validity(reference.is_some_and(validate_cnpj))
}

pub fn verdict(customer: &CustomerRefs, recompute_cpf_status: bool) -> Verdict {
    Verdict {
        frequent_store: cnpj_status(customer.most_frequent_store_cnpj.as_deref()),
        last_store: cnpj_status(customer.last_store_cnpj.as_deref()),
        cpf: recompute_cpf_status.then(|| DocumentStatus::from_validity(validate_cpf(&customer.cpf))),
    }
}

/// Column vectors for one page of updates
#[derive(Debug, Default)]
struct PageUpdate {
    cpf: Vec<String>,
    last_status: Vec<&'static str>,
    frequent_status: Vec<&'static str>,
    cpf_status: Vec<Option<&'static str>>,
    /// Store CNPJ to status, per role
    last_stores: BTreeMap<String, &'static str>,
    frequent_stores: BTreeMap<String, &'static str>,
}

impl PageUpdate {
    fn build(page: &[CustomerRefs], recompute_cpf_status: bool, stats: &mut ReconcileStats) -> Self {
        let mut update = PageUpdate::default();

        for customer in page {
            let verdict = verdict(customer, recompute_cpf_status);

            for status in [verdict.frequent_store, verdict.last_store] {
                if status.is_valid() {
                    stats.cnpj_valid += 1;
                } else {
                    stats.cnpj_invalid += 1;
                }
            }
            if verdict.cpf.is_some() {
                stats.cpf_recomputed += 1;
            }

            if let Some(cnpj) = &customer.last_store_cnpj {
                update
                    .last_stores
                    .insert(cnpj.clone(), verdict.last_store.as_str());
            }
            if let Some(cnpj) = &customer.most_frequent_store_cnpj {
                update
                    .frequent_stores
                    .insert(cnpj.clone(), verdict.frequent_store.as_str());
            }

            update.cpf.push(customer.cpf.clone());
            update.last_status.push(verdict.last_store.as_str());
            update.frequent_status.push(verdict.frequent_store.as_str());
            update.cpf_status.push(verdict.cpf.map(|s| s.as_str()));
        }

        update
    }
}

async fn fetch_page(
    pool: &PgPool,
    after: Option<&str>,
    page_size: i64,
) -> Result<Vec<CustomerRefs>, sqlx::Error> {
    sqlx::query_as::<_, CustomerRefs>(
        r#"
        SELECT cpf, most_frequent_store_cnpj, last_store_cnpj
        FROM customers
        WHERE ($1::text IS NULL OR cpf > $1)
        ORDER BY cpf
        LIMIT $2
        "#,
    )
    .bind(after)
    .bind(page_size)
    .fetch_all(pool)
    .await
}

async fn update_store_role(
    tx: &mut sqlx::PgConnection,
    column: &'static str,
    stores: &BTreeMap<String, &'static str>,
) -> Result<u64, sqlx::Error> {
    if stores.is_empty() {
        return Ok(0);
    }

    let cnpjs: Vec<&str> = stores.keys().map(String::as_str).collect();
    let statuses: Vec<&str> = stores.values().copied().collect();

    let sql = format!(
        r#"
        UPDATE stores AS s
        SET {column} = u.status
        FROM UNNEST($1::text[], $2::text[]) AS u(cnpj, status)
        WHERE s.cnpj = u.cnpj
        "#
    );

    let result = sqlx::query(&sql)
        .bind(&cnpjs)
        .bind(&statuses)
        .execute(tx)
        .await?;

    Ok(result.rows_affected())
}

async fn apply_page(
    pool: &PgPool,
    page_number: u64,
    update: &PageUpdate,
) -> Result<u64, ReconcileError> {
    let failed = |table: &'static str| {
        move |source| ReconcileError::Update {
            page: page_number,
            table,
            source,
        }
    };

    let mut tx = pool.begin().await.map_err(failed("customers"))?;

    sqlx::query(
        r#"
        UPDATE customers AS c
        SET status_cnpj_last_store = u.last_status,
            status_cnpj_frequent_store = u.frequent_status,
            status_cpf = COALESCE(u.cpf_status, c.status_cpf)
        FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[])
            AS u(cpf, last_status, frequent_status, cpf_status)
        WHERE c.cpf = u.cpf
        "#,
    )
    .bind(&update.cpf)
    .bind(&update.last_status)
    .bind(&update.frequent_status)
    .bind(&update.cpf_status)
    .execute(&mut *tx)
    .await
    .map_err(failed("customers"))?;

    let mut stores_updated = update_store_role(&mut tx, "status_for_last_store", &update.last_stores)
        .await
        .map_err(failed("stores"))?;
    stores_updated +=
        update_store_role(&mut tx, "status_for_frequent_store", &update.frequent_stores)
            .await
            .map_err(failed("stores"))?;

    tx.commit().await.map_err(failed("customers"))?;

    Ok(stores_updated)
}

/// Recompute every status flag from the stored identifiers.
pub async fn reconcile(pool: &PgPool, config: &ReconcileConfig) -> Result<ReconcileStats, ReconcileError> {
    info!(
        page_size = config.page_size,
        recompute_cpf_status = config.recompute_cpf_status,
        "Starting reconciliation"
    );
    if !config.recompute_cpf_status {
        info!("CPF statuses keep the value written at ingestion");
    }

    let mut stats = ReconcileStats::default();
    let mut after: Option<String> = None;

    loop {
        let page = fetch_page(pool, after.as_deref(), config.page_size)
            .await
            .map_err(|source| ReconcileError::Scan {
                after: after.clone(),
                source,
            })?;

        let Some(last) = page.last() else {
            break;
        };
        after = Some(last.cpf.clone());

        stats.pages += 1;
        stats.customers_scanned += page.len() as u64;

        let update = PageUpdate::build(&page, config.recompute_cpf_status, &mut stats);
        stats.stores_updated += apply_page(pool, stats.pages, &update).await?;

        debug!(
            page = stats.pages,
            customers = page.len(),
            scanned = stats.customers_scanned,
            "Reconciled page"
        );

        if (page.len() as i64) < config.page_size {
            break;
        }
    }

    info!(
        customers = stats.customers_scanned,
        pages = stats.pages,
        cnpj_valid = stats.cnpj_valid,
        cnpj_invalid = stats.cnpj_invalid,
        cpf_recomputed = stats.cpf_recomputed,
        stores_updated = stats.stores_updated,
        "Reconciliation complete"
    );

    Ok(stats)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn customer(cpf: &str, frequent: Option<&str>, last: Option<&str>) -> CustomerRefs {
        CustomerRefs {
            cpf: cpf.to_string(),
            most_frequent_store_cnpj: frequent.map(str::to_string),
            last_store_cnpj: last.map(str::to_string),
        }
    }

    #[test]
    fn test_verdict_per_role() {
        let refs = customer("529.982.247-25", Some("11.222.333/0001-81"), Some("11.222.333/0001-82"));
        let v = verdict(&refs, false);
        assert_eq!(v.frequent_store, DocumentStatus::Valid);
        assert_eq!(v.last_store, DocumentStatus::Invalid);
        assert_eq!(v.cpf, None);
    }

    #[test]
    fn test_missing_reference_is_invalid() {
        let v = verdict(&customer("1", None, None), false);
        assert_eq!(v.frequent_store, DocumentStatus::Invalid);
        assert_eq!(v.last_store, DocumentStatus::Invalid);
    }

    #[test]
    fn test_cpf_recompute_is_opt_in() {
        let valid = verdict(&customer("529.982.247-25", None, None), true);
        assert_eq!(valid.cpf, Some(DocumentStatus::Valid));

        let invalid = verdict(&customer("529.982.247-26", None, None), true);
        assert_eq!(invalid.cpf, Some(DocumentStatus::Invalid));
    }

    #[test]
    fn test_page_update_collects_store_roles() {
        let page = vec![
            customer("a", Some("11.222.333/0001-81"), Some("bogus")),
            customer("b", Some("bogus"), None),
        ];
        let mut stats = ReconcileStats::default();

        let update = PageUpdate::build(&page, false, &mut stats);

        assert_eq!(update.cpf, vec!["a", "b"]);
        assert_eq!(update.frequent_status, vec!["valid", "invalid"]);
        assert_eq!(update.last_status, vec!["invalid", "invalid"]);
        assert_eq!(update.cpf_status, vec![None, None]);
        assert_eq!(update.last_stores.len(), 1);
        assert_eq!(update.frequent_stores.get("bogus"), Some(&"invalid"));
        assert_eq!(update.frequent_stores.get("11.222.333/0001-81"), Some(&"valid"));

        assert_eq!(stats.cnpj_valid, 1);
        assert_eq!(stats.cnpj_invalid, 3);
        assert_eq!(stats.cpf_recomputed, 0);
    }

    #[test]
    fn test_scan_error_names_cursor() {
        let err = ReconcileError::Scan {
            after: None,
            source: sqlx::Error::PoolClosed,
        };
        assert!(err.to_string().contains("<start>"));
    }
}
