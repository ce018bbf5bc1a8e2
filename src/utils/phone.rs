// utils/phone.rs
//
// Phone numbers reach M-Pesa as 2547XXXXXXXX / 2541XXXXXXXX MSISDNs.
// Users type them in every local format imaginable, so normalize first
// and validate the normalized form.

/// Normalize a Kenyan mobile number to the 254XXXXXXXXX MSISDN format.
pub fn normalize_msisdn(input: &str) -> Option<String> {
    let digits: String = input
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();

    let msisdn = if digits.len() == 12 && digits.starts_with("254") {
        digits
    } else if digits.len() == 10 && digits.starts_with('0') {
        format!("254{}", &digits[1..])
    } else if digits.len() == 9 && (digits.starts_with('7') || digits.starts_with('1')) {
        format!("254{}", digits)
    } else {
        return None;
    };

    if is_valid_msisdn(&msisdn) {
        Some(msisdn)
    } else {
        None
    }
}

/// Check a normalized MSISDN against the Safaricom numbering plan
/// (2547XXXXXXXX and 2541XXXXXXXX ranges).
pub fn is_valid_msisdn(msisdn: &str) -> bool {
    msisdn.len() == 12
        && msisdn.starts_with("254")
        && (msisdn.as_bytes()[3] == b'7' || msisdn.as_bytes()[3] == b'1')
        && msisdn.chars().all(|c| c.is_ascii_digit())
}

/// Mask an MSISDN for logs and API responses, keeping only the last 3 digits.
pub fn mask_msisdn(msisdn: &str) -> String {
    if msisdn.len() < 4 {
        return "***".to_string();
    }
    format!("254*****{}", &msisdn[msisdn.len() - 3..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_accepts_local_formats() {
        assert_eq!(
            normalize_msisdn("0712345678"),
            Some("254712345678".to_string())
        );
        assert_eq!(
            normalize_msisdn("712345678"),
            Some("254712345678".to_string())
        );
        assert_eq!(
            normalize_msisdn("+254 712 345 678"),
            Some("254712345678".to_string())
        );
        assert_eq!(
            normalize_msisdn("254112345678"),
            Some("254112345678".to_string())
        );
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert_eq!(normalize_msisdn(""), None);
        assert_eq!(normalize_msisdn("12345"), None);
        assert_eq!(normalize_msisdn("254812345678"), None); // not a mobile range
        assert_eq!(normalize_msisdn("0812345678"), None);
        assert_eq!(normalize_msisdn("44712345678"), None);
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask_msisdn("254712345678"), "254*****678");
    }
}
