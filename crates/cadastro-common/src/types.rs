//! Common types used across the cadastro crates

use serde::{Deserialize, Serialize};

use crate::document::{self, CNPJ_LEN, CPF_LEN};
use crate::error::CadastroError;

/// Validity flag persisted in the `status_*` columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Valid,
    Invalid,
}

impl DocumentStatus {
    pub fn from_validity(valid: bool) -> Self {
        if valid {
            DocumentStatus::Valid
        } else {
            DocumentStatus::Invalid
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Valid => "valid",
            DocumentStatus::Invalid => "invalid",
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, DocumentStatus::Valid)
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = CadastroError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "valid" => Ok(DocumentStatus::Valid),
            "invalid" => Ok(DocumentStatus::Invalid),
            other => Err(CadastroError::Parse(format!("Unknown document status: {}", other))),
        }
    }
}

/// Which taxpayer registry an identifier belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// Individual taxpayer (11 digits)
    Cpf,
    /// Business taxpayer (14 digits)
    Cnpj,
}

impl DocumentKind {
    /// Guess the kind from the digit count, ignoring punctuation.
    pub fn detect(raw: &str) -> Option<Self> {
        match document::digits(raw).len() {
            CPF_LEN => Some(DocumentKind::Cpf),
            CNPJ_LEN => Some(DocumentKind::Cnpj),
            _ => None,
        }
    }

    pub fn validate(&self, raw: &str) -> bool {
        match self {
            DocumentKind::Cpf => document::validate_cpf(raw),
            DocumentKind::Cnpj => document::validate_cnpj(raw),
        }
    }

    pub fn format(&self, raw: &str) -> Option<String> {
        match self {
            DocumentKind::Cpf => document::format_cpf(raw),
            DocumentKind::Cnpj => document::format_cnpj(raw),
        }
    }

    pub fn status(&self, raw: &str) -> DocumentStatus {
        DocumentStatus::from_validity(self.validate(raw))
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentKind::Cpf => write!(f, "cpf"),
            DocumentKind::Cnpj => write!(f, "cnpj"),
        }
    }
}

impl std::str::FromStr for DocumentKind {
    type Err = CadastroError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cpf" => Ok(DocumentKind::Cpf),
            "cnpj" => Ok(DocumentKind::Cnpj),
            other => Err(CadastroError::Parse(format!("Unknown document kind: {}", other))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(DocumentStatus::Valid.as_str(), "valid");
        assert_eq!(DocumentStatus::Invalid.to_string(), "invalid");
        assert_eq!("valid".parse::<DocumentStatus>().unwrap(), DocumentStatus::Valid);
        assert!("VALID".parse::<DocumentStatus>().is_err());
    }

    #[test]
    fn test_detect_kind() {
        assert_eq!(DocumentKind::detect("529.982.247-25"), Some(DocumentKind::Cpf));
        assert_eq!(DocumentKind::detect("11.222.333/0001-81"), Some(DocumentKind::Cnpj));
        assert_eq!(DocumentKind::detect("123"), None);
    }

    #[test]
    fn test_kind_status() {
        assert_eq!(DocumentKind::Cnpj.status("11222333000181"), DocumentStatus::Valid);
        assert_eq!(DocumentKind::Cpf.status("11222333000181"), DocumentStatus::Invalid);
        assert_eq!("CNPJ".parse::<DocumentKind>().unwrap(), DocumentKind::Cnpj);
    }
}
