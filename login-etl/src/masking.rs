use sha2::{Digest, Sha256};

/// Hash a sensitive value into its storage-safe form.
///
/// SHA-256, rendered as lowercase hex. The digest is deterministic, so the
/// same raw value always maps to the same output and rows can still be
/// grouped or joined on it, but the raw value cannot be recovered.
pub fn mask(unmasked: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(unmasked.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_is_deterministic() {
        assert_eq!(mask("1.1.1.1"), mask("1.1.1.1"));
        assert_eq!(mask("device-17"), mask("device-17"));
        assert_ne!(mask("1.1.1.1"), mask("1.1.1.2"));
    }

    #[test]
    fn test_mask_produces_fixed_length_hex() {
        for input in ["", "x", "1.1.1.1", "a much longer input string than usual"] {
            let digest = mask(input);
            assert_eq!(digest.len(), 64);
            assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn test_mask_known_values() {
        assert_eq!(
            mask("1.1.1.1"),
            "f1412386aa8db2579aff2636cb9511cacc5fd9880ecab60c048508fbe26ee4d9"
        );
        assert_eq!(
            mask("1234"),
            "03ac674216f3e15c761ee1a5e255f067953623c8b388b4459e13f978d7c846f4"
        );
    }

    #[test]
    fn test_mask_empty_string_is_valid_input() {
        assert_eq!(
            mask(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
