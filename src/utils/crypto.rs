use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose};

/// Opaque encrypt/decrypt of stored tokens. The real cipher lives in the
/// credential-store collaborator; this seam keeps the rest of the crate
/// indifferent to it.
pub trait TokenCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> String;
    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

/// Reversible base64 encoding used where no real cipher is configured.
pub struct Base64Cipher;

impl TokenCipher for Base64Cipher {
    fn encrypt(&self, plaintext: &str) -> String {
        general_purpose::STANDARD.encode(plaintext.as_bytes())
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let bytes = general_purpose::STANDARD
            .decode(ciphertext)
            .context("stored token is not valid base64")?;
        String::from_utf8(bytes).context("stored token is not valid UTF-8")
    }
}
