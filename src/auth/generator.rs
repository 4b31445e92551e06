use rand::Rng;

/// Generate a secure random session token (32 bytes, hex encoded = 64
/// characters). Uniqueness rests on entropy; no server-side re-check.
pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token() {
        let token = generate_token();
        assert_eq!(token.len(), 64); // 32 bytes * 2 hex chars

        // Ensure randomness
        let token2 = generate_token();
        assert_ne!(token, token2);
    }
}
