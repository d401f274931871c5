//! Cadastro Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, identifier validation, and logging for the cadastro workspace.
//!
//! # Overview
//!
//! - **Documents**: CPF/CNPJ check-digit validation and canonical formatting
//! - **Types**: Document kind and persisted validity status
//! - **Error Handling**: Common error and result types
//! - **Logging**: Tracing subscriber bootstrap shared by every binary
//!
//! # Example
//!
//! ```
//! use cadastro_common::types::{DocumentKind, DocumentStatus};
//!
//! let status = DocumentKind::Cnpj.status("11.222.333/0001-81");
//! assert_eq!(status, DocumentStatus::Valid);
//! ```

pub mod document;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CadastroError, Result};
pub use types::{DocumentKind, DocumentStatus};
