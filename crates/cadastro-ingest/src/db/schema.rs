//! Table definitions
//!
//! Statements are idempotent and run in dependency order: `transactions`
//! references `customers`.

use sqlx::PgPool;
use tracing::info;

use super::{DbError, DbResult};

const CREATE_STORES: &str = r#"
    CREATE TABLE IF NOT EXISTS stores (
        id SERIAL PRIMARY KEY,
        cnpj TEXT UNIQUE,
        status_for_last_store TEXT,
        status_for_frequent_store TEXT
    )
"#;

const CREATE_CUSTOMERS: &str = r#"
    CREATE TABLE IF NOT EXISTS customers (
        cpf TEXT PRIMARY KEY,
        private BOOLEAN,
        incomplete BOOLEAN,
        status_cpf TEXT,
        most_frequent_store_cnpj TEXT,
        last_store_cnpj TEXT,
        status_cnpj_last_store TEXT,
        status_cnpj_frequent_store TEXT
    )
"#;

const CREATE_TRANSACTIONS: &str = r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id SERIAL PRIMARY KEY,
        cpf TEXT REFERENCES customers(cpf),
        last_purchase_date DATE,
        average_ticket NUMERIC(10, 2),
        last_ticket NUMERIC(10, 2)
    )
"#;

/// Table name and DDL, in creation order
pub const TABLES: [(&str, &str); 3] = [
    ("stores", CREATE_STORES),
    ("customers", CREATE_CUSTOMERS),
    ("transactions", CREATE_TRANSACTIONS),
];

pub async fn create_tables(pool: &PgPool) -> DbResult<()> {
    for (table, ddl) in TABLES {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .map_err(|source| DbError::Schema { table, source })?;
    }

    info!(tables = TABLES.len(), "Schema ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_are_ordered_by_dependency() {
        let names: Vec<&str> = TABLES.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["stores", "customers", "transactions"]);
    }

    #[test]
    fn test_ddl_is_idempotent() {
        for (name, ddl) in TABLES {
            assert!(ddl.contains(&format!("CREATE TABLE IF NOT EXISTS {name}")));
        }
    }
}
