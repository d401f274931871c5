//! CPF and CNPJ check-digit validation
//!
//! Both Brazilian taxpayer identifiers end in two check digits derived from a
//! modulus-11 weighted sum over the preceding digits:
//!
//! - **CPF** (individuals, 11 digits): weights descend `10..=2` for the first
//!   check digit and `11..=2` for the second; digit = `(sum * 10) % 11`, with
//!   `10` mapped to `0`.
//! - **CNPJ** (businesses, 14 digits): weights cycle `initial..=2` then restart
//!   at `9`, with initial weight `5` for the first digit and `6` for the
//!   second; digit = `11 - sum % 11`, with anything `>= 10` mapped to `0`.
//!
//! Input may carry any punctuation (`529.982.247-25`, `11.222.333/0001-81`):
//! every non-digit character is stripped first. Sequences made of a single
//! repeated digit (`00000000000`) are rejected even when their checksum works
//! out.
//!
//! # Example
//!
//! ```
//! use cadastro_common::document::{format_cnpj, validate_cpf};
//!
//! assert!(validate_cpf("529.982.247-25"));
//! assert_eq!(format_cnpj("11222333000181").as_deref(), Some("11.222.333/0001-81"));
//! ```

/// Number of digits in a CPF, check digits included.
pub const CPF_LEN: usize = 11;

/// Number of digits in a CNPJ, check digits included.
pub const CNPJ_LEN: usize = 14;

/// Strip every non-digit character, returning digit values (`0..=9`).
pub fn digits(raw: &str) -> Vec<u8> {
    raw.bytes()
        .filter(u8::is_ascii_digit)
        .map(|b| b - b'0')
        .collect()
}

/// True when every digit equals the first one.
fn all_digits_equal(digits: &[u8]) -> bool {
    digits.windows(2).all(|pair| pair[0] == pair[1])
}

/// Digits of `raw` when it has exactly `len` of them and they are not all
/// the same digit.
fn candidate(raw: &str, len: usize) -> Option<Vec<u8>> {
    let digits = digits(raw);
    if digits.len() != len || all_digits_equal(&digits) {
        return None;
    }
    Some(digits)
}

// ============================================================================
// CPF
// ============================================================================

fn cpf_digit(digits: &[u8]) -> u8 {
    // Weights run from len + 1 down to 2.
    let top = digits.len() as u32 + 1;
    let sum: u32 = digits
        .iter()
        .zip((2..=top).rev())
        .map(|(&digit, weight)| u32::from(digit) * weight)
        .sum();

    match (sum * 10) % 11 {
        10 => 0,
        digit => digit as u8,
    }
}

/// Compute both CPF check digits for the first nine digits.
pub fn cpf_check_digits(base: &[u8; 9]) -> (u8, u8) {
    let first = cpf_digit(base);

    let mut extended = [0u8; 10];
    extended[..9].copy_from_slice(base);
    extended[9] = first;

    (first, cpf_digit(&extended))
}

/// Validate a CPF, punctuated or raw.
pub fn validate_cpf(raw: &str) -> bool {
    let Some(digits) = candidate(raw, CPF_LEN) else {
        return false;
    };
    let Ok(base) = <[u8; 9]>::try_from(&digits[..9]) else {
        return false;
    };

    cpf_check_digits(&base) == (digits[9], digits[10])
}

/// Canonical `000.000.000-00` form of a valid CPF.
pub fn format_cpf(raw: &str) -> Option<String> {
    if !validate_cpf(raw) {
        return None;
    }
    let d = render(&digits(raw));
    Some(format!("{}.{}.{}-{}", &d[..3], &d[3..6], &d[6..9], &d[9..]))
}

// ============================================================================
// CNPJ
// ============================================================================

fn cnpj_digit(digits: &[u8], initial_weight: u32) -> u8 {
    let mut weight = initial_weight;
    let mut sum = 0u32;

    for &digit in digits {
        sum += u32::from(digit) * weight;
        weight = if weight == 2 { 9 } else { weight - 1 };
    }

    match 11 - sum % 11 {
        digit if digit >= 10 => 0,
        digit => digit as u8,
    }
}

/// Compute both CNPJ check digits for the first twelve digits.
pub fn cnpj_check_digits(base: &[u8; 12]) -> (u8, u8) {
    let first = cnpj_digit(base, 5);

    let mut extended = [0u8; 13];
    extended[..12].copy_from_slice(base);
    extended[12] = first;

    (first, cnpj_digit(&extended, 6))
}

/// Validate a CNPJ, punctuated or raw.
pub fn validate_cnpj(raw: &str) -> bool {
    let Some(digits) = candidate(raw, CNPJ_LEN) else {
        return false;
    };
    let Ok(base) = <[u8; 12]>::try_from(&digits[..12]) else {
        return false;
    };

    cnpj_check_digits(&base) == (digits[12], digits[13])
}

/// Canonical `00.000.000/0000-00` form of a valid CNPJ.
pub fn format_cnpj(raw: &str) -> Option<String> {
    if !validate_cnpj(raw) {
        return None;
    }
    let d = render(&digits(raw));
    Some(format!(
        "{}.{}.{}/{}-{}",
        &d[..2],
        &d[2..5],
        &d[5..8],
        &d[8..12],
        &d[12..]
    ))
}

fn render(digits: &[u8]) -> String {
    digits.iter().map(|d| char::from(b'0' + d)).collect()
}
