//! Source TLS material as supplied by callers.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use federa_core::{FederaError, Result};

/// Decode base64 PEM. Raw PEM is accepted unchanged.
pub fn decode_pem(encoded: &str) -> Result<Vec<u8>> {
    let trimmed = encoded.trim();
    if trimmed.starts_with("-----BEGIN") {
        return Ok(trimmed.as_bytes().to_vec());
    }
    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| FederaError::Config(format!("TLS material is not valid base64: {}", e)))?;
    if !bytes.starts_with(b"-----BEGIN") {
        return Err(FederaError::Config(
            "TLS material does not decode to PEM".to_string(),
        ));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEM: &str = "-----BEGIN CERTIFICATE-----\nMIIBszCCAVmgAwIBAgIUQ\n-----END CERTIFICATE-----";

    #[test]
    fn accepts_base64_and_raw() {
        assert_eq!(decode_pem(PEM).unwrap(), PEM.as_bytes());
        let wrapped = STANDARD.encode(PEM);
        let folded = format!("{}\n{}", &wrapped[..20], &wrapped[20..]);
        assert_eq!(decode_pem(&folded).unwrap(), PEM.as_bytes());
        assert!(decode_pem("!!!").is_err());
        assert!(decode_pem(&STANDARD.encode("hello")).is_err());
    }
}
