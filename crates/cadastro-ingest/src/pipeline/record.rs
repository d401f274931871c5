//! Row-to-record transformation
//!
//! One input row carries eight columns, in this order:
//!
//! ```text
//! cpf | private | incomplete | last_purchase_date | average_ticket | last_ticket | most_frequent_store | last_store
//! ```
//!
//! `NULL` and the empty string both mean "no value". Flags are true only for
//! the literal `1`. Decimals accept `,` as the decimal separator.

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

/// Number of columns every data row must carry.
pub const FIELD_COUNT: usize = 8;

const NULL_MARKER: &str = "NULL";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// A typed input row: one customer plus one transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerRecord {
    /// Passed through as read; validated only during reconciliation.
    pub cpf: String,
    pub private: bool,
    pub incomplete: bool,
    pub last_purchase_date: Option<NaiveDate>,
    pub average_ticket: Option<f64>,
    pub last_ticket: Option<f64>,
    pub most_frequent_store: Option<String>,
    pub last_store: Option<String>,
}

impl CustomerRecord {
    /// Store CNPJs referenced by this row, most-frequent first.
    pub fn store_references(&self) -> impl Iterator<Item = &str> {
        self.most_frequent_store
            .as_deref()
            .into_iter()
            .chain(self.last_store.as_deref())
    }
}

/// A row that cannot become a [`CustomerRecord`]. Aborts the batch it is in.
#[derive(Debug, Error)]
pub enum RowError {
    #[error("Line {line}: expected {expected} columns, found {found}: {fields:?}")]
    Shape {
        line: usize,
        expected: usize,
        found: usize,
        fields: Vec<String>,
    },

    #[error("Line {line}: invalid date '{value}' in column {column}: {source}")]
    Date {
        line: usize,
        column: &'static str,
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("Line {line}: invalid decimal '{value}' in column {column}")]
    Decimal {
        line: usize,
        column: &'static str,
        value: String,
    },
}

impl RowError {
    /// 1-based source line the error refers to
    pub fn line(&self) -> usize {
        match self {
            RowError::Shape { line, .. }
            | RowError::Date { line, .. }
            | RowError::Decimal { line, .. } => *line,
        }
    }
}

fn is_null(value: &str) -> bool {
    value.is_empty() || value == NULL_MARKER
}

fn parse_flag(value: &str) -> bool {
    value == "1"
}

fn parse_text(value: &str) -> Option<String> {
    (!is_null(value)).then(|| value.to_string())
}

fn parse_date(value: &str, line: usize, column: &'static str) -> Result<Option<NaiveDate>, RowError> {
    if is_null(value) {
        return Ok(None);
    }

    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map(Some)
        .map_err(|source| RowError::Date {
            line,
            column,
            value: value.to_string(),
            source,
        })
}

fn parse_decimal(value: &str, line: usize, column: &'static str) -> Result<Option<f64>, RowError> {
    if is_null(value) {
        return Ok(None);
    }

    let invalid = || RowError::Decimal {
        line,
        column,
        value: value.to_string(),
    };

    let parsed: f64 = value.replace(',', ".").parse().map_err(|_| invalid())?;
    if !parsed.is_finite() {
        return Err(invalid());
    }
    Ok(Some(parsed))
}

/// Transform one delimiter-split row.
///
/// `row_index` is 0-based; row 0 is the header and yields `Ok(None)`.
pub fn transform_row<S: AsRef<str>>(
    fields: &[S],
    row_index: usize,
) -> Result<Option<CustomerRecord>, RowError> {
    if row_index == 0 {
        return Ok(None);
    }

    let line = row_index + 1;

    if fields.len() != FIELD_COUNT {
        return Err(RowError::Shape {
            line,
            expected: FIELD_COUNT,
            found: fields.len(),
            fields: fields.iter().map(|f| f.as_ref().to_string()).collect(),
        });
    }

    let field = |i: usize| fields[i].as_ref();

    Ok(Some(CustomerRecord {
        cpf: field(0).to_string(),
        private: parse_flag(field(1)),
        incomplete: parse_flag(field(2)),
        last_purchase_date: parse_date(field(3), line, "last_purchase_date")?,
        average_ticket: parse_decimal(field(4), line, "average_ticket")?,
        last_ticket: parse_decimal(field(5), line, "last_ticket")?,
        most_frequent_store: parse_text(field(6)),
        last_store: parse_text(field(7)),
    }))
}
