//! CNPJ normalization and check-digit validation.

const FIRST_WEIGHTS: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
const SECOND_WEIGHTS: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CnpjError {
    #[error("CNPJ must have 14 digits")]
    Length,

    #[error("invalid CNPJ")]
    Invalid,
}

/// Strip punctuation and verify both check digits. Returns the 14 digits.
pub fn normalize_cnpj(raw: &str) -> Result<String, CnpjError> {
    let digits: Vec<u32> = raw.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 14 {
        return Err(CnpjError::Length);
    }
    if digits.iter().all(|d| *d == digits[0]) {
        return Err(CnpjError::Invalid);
    }

    let first = check_digit(&digits[..12], &FIRST_WEIGHTS);
    let second = check_digit(&digits[..13], &SECOND_WEIGHTS);
    if digits[12] != first || digits[13] != second {
        return Err(CnpjError::Invalid);
    }

    Ok(digits.iter().map(|d| char::from_digit(*d, 10).unwrap_or('0')).collect())
}

fn check_digit(digits: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
    match sum % 11 {
        r if r < 2 => 0,
        r => 11 - r,
    }
}

/// Format 14 digits as `NN.NNN.NNN/NNNN-NN`.
pub fn mask_cnpj(digits: &str) -> String {
    let d: String = digits.chars().filter(char::is_ascii_digit).collect();
    if d.len() != 14 {
        return d;
    }
    format!(
        "{}.{}.{}/{}-{}",
        &d[0..2],
        &d[2..5],
        &d[5..8],
        &d[8..12],
        &d[12..14]
    )
}
