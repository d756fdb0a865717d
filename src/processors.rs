//! Property value processors
//!
//! Processors run on every value written to a [`PropertyStore`](crate::properties::PropertyStore),
//! in registration order. Each one recognises `{...}` tokens inside string values and replaces
//! them; typed scalars pass through untouched.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose, Engine as _};
use rand::seq::SliceRandom;
use rand::Rng;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::OnceLock;

use crate::error::{ApiMethodError, Result};
use crate::properties::PropertyValue;

const NONCE_LEN: usize = 12;
const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const DIGITS: &[u8] = b"0123456789";

/// Identifies a processor so a method can opt out of it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessorKind {
    Crypto,
    Generate,
    Environment,
    Custom(String),
}

impl std::fmt::Display for ProcessorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessorKind::Crypto => write!(f, "crypto"),
            ProcessorKind::Generate => write!(f, "generate"),
            ProcessorKind::Environment => write!(f, "environment"),
            ProcessorKind::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Transformation applied to a property value at assignment time
pub trait PropertyProcessor: Send + Sync {
    fn kind(&self) -> ProcessorKind;

    fn transform(&self, key: &str, value: PropertyValue) -> Result<PropertyValue>;
}

/// Replace every match of `pattern` in `input`, stopping at the first failing replacement
fn replace_tokens<F>(pattern: &Regex, input: &str, mut replacement: F) -> Result<String>
where
    F: FnMut(&Captures<'_>) -> Result<String>,
{
    let mut output = String::with_capacity(input.len());
    let mut last = 0;
    for caps in pattern.captures_iter(input) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        output.push_str(&input[last..whole.start()]);
        output.push_str(&replacement(&caps)?);
        last = whole.end();
    }
    output.push_str(&input[last..]);
    Ok(output)
}

fn processing_error(kind: ProcessorKind, key: &str, message: impl std::fmt::Display) -> ApiMethodError {
    ApiMethodError::Configuration(format!(
        "Property '{}' can't be processed by {} processor: {}",
        key, kind, message
    ))
}

fn crypt_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{crypt:([^}]*)\}").expect("valid crypt pattern"))
}

fn generate_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\s*(generate_uuid|generate_date|generateAN|generateN|generate)\s*(?::\s*([^}]*?)\s*)?\}")
            .expect("valid generate pattern")
    })
}

fn env_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\s*env\s*:\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}").expect("valid env pattern"))
}

/// Environment variable read for the crypto key when nothing else is configured
pub const DEFAULT_CRYPTO_KEY_ENV: &str = "APIVERIFY_CRYPTO_KEY";

/// Decrypts `{crypt:<base64(nonce || ciphertext)>}` tokens with AES-256-GCM.
///
/// A processor without a key is still registered: values without tokens pass through,
/// and any `{crypt:...}` token fails the write instead of being stored as-is.
#[derive(Clone)]
pub struct CryptoProcessor {
    cipher: std::result::Result<Aes256Gcm, String>,
}

impl std::fmt::Debug for CryptoProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoProcessor")
            .field("has_key", &self.cipher.is_ok())
            .finish_non_exhaustive()
    }
}

impl CryptoProcessor {
    /// Create a processor from a raw 32-byte key
    pub fn new(key: &[u8]) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| {
            ApiMethodError::Configuration(format!("Crypto key must be 32 bytes, got {}", key.len()))
        })?;
        Ok(Self { cipher: Ok(cipher) })
    }

    /// Processor without a key; `reason` ends up in the error for every encrypted value
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            cipher: Err(reason.into()),
        }
    }

    pub fn from_base64_key(encoded: &str) -> Result<Self> {
        let key = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| ApiMethodError::Configuration(format!("Crypto key is not valid base64: {}", e)))?;
        Self::new(&key)
    }

    /// Build from the base64 key stored in `var`. An unset variable gives a keyless processor;
    /// a malformed key is an error.
    pub fn from_env(var: &str) -> Result<Self> {
        match std::env::var(var) {
            Ok(encoded) => Self::from_base64_key(&encoded).map_err(|e| {
                ApiMethodError::Configuration(format!("Crypto key in {} can't be used: {}", var, e))
            }),
            Err(_) => Ok(Self::unavailable(format!("no crypto key is set in {}", var))),
        }
    }

    pub fn has_key(&self) -> bool {
        self.cipher.is_ok()
    }

    fn cipher(&self) -> std::result::Result<&Aes256Gcm, String> {
        self.cipher.as_ref().map_err(Clone::clone)
    }

    /// Produce a `{crypt:...}` token for `plaintext`
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = self
            .cipher()
            .map_err(|reason| ApiMethodError::Configuration(format!("Can't encrypt: {}", reason)))?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| ApiMethodError::Configuration(format!("Encryption failed: {}", e)))?;

        let mut payload = nonce.to_vec();
        payload.extend_from_slice(&ciphertext);
        Ok(format!("{{crypt:{}}}", general_purpose::STANDARD.encode(payload)))
    }

    fn decrypt_payload(&self, encoded: &str) -> std::result::Result<String, String> {
        let cipher = self.cipher()?;
        let payload = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| format!("Failed to decode encrypted data: {}", e))?;
        if payload.len() <= NONCE_LEN {
            return Err("Encrypted payload is too short".to_string());
        }

        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| format!("Decryption failed: {}", e))?;

        String::from_utf8(plaintext).map_err(|e| format!("Invalid UTF-8 in decrypted data: {}", e))
    }
}

impl PropertyProcessor for CryptoProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Crypto
    }

    fn transform(&self, key: &str, value: PropertyValue) -> Result<PropertyValue> {
        let text = match value {
            PropertyValue::String(text) => text,
            other => return Ok(other),
        };
        let decrypted = replace_tokens(crypt_pattern(), &text, |caps| {
            self.decrypt_payload(&caps[1])
                .map_err(|e| processing_error(self.kind(), key, e))
        })?;
        Ok(PropertyValue::String(decrypted))
    }
}

/// Substitutes generated values: `{generate_uuid}`, `{generate:N}` (letters),
/// `{generateAN:N}` (alphanumeric), `{generateN:N}` (digits) and `{generate_date:<strftime>}`
#[derive(Debug, Default, Clone)]
pub struct GenerateProcessor;

impl GenerateProcessor {
    fn random_from(alphabet: &[u8], len: usize) -> String {
        let mut rng = rand::thread_rng();
        (0..len)
            .filter_map(|_| alphabet.choose(&mut rng).map(|b| *b as char))
            .collect()
    }

    fn random_digits(len: usize) -> String {
        let mut rng = rand::thread_rng();
        let mut digits = String::with_capacity(len);
        for i in 0..len {
            // no leading zero, so the value keeps its length when parsed as a number
            let digit = if i == 0 { rng.gen_range(1..10) } else { rng.gen_range(0..10) };
            digits.push(char::from(DIGITS[digit]));
        }
        digits
    }

    fn generate(&self, key: &str, name: &str, argument: Option<&str>) -> Result<String> {
        let length = || -> Result<usize> {
            argument
                .ok_or_else(|| processing_error(self.kind(), key, format!("'{}' requires a length", name)))?
                .parse::<usize>()
                .map_err(|e| processing_error(self.kind(), key, format!("invalid length for '{}': {}", name, e)))
        };

        match name {
            "generate_uuid" => Ok(uuid::Uuid::new_v4().to_string()),
            "generate_date" => {
                let format = argument.filter(|f| !f.is_empty()).unwrap_or("%Y-%m-%d");
                let mut date = String::new();
                write!(date, "{}", chrono::Local::now().format(format)).map_err(|_| {
                    processing_error(self.kind(), key, format!("invalid date format '{}'", format))
                })?;
                Ok(date)
            }
            "generate" => Ok(Self::random_from(LETTERS, length()?)),
            "generateAN" => Ok(Self::random_from(ALPHANUMERIC, length()?)),
            "generateN" => Ok(Self::random_digits(length()?)),
            other => Err(processing_error(self.kind(), key, format!("unknown generator '{}'", other))),
        }
    }
}

impl PropertyProcessor for GenerateProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Generate
    }

    fn transform(&self, key: &str, value: PropertyValue) -> Result<PropertyValue> {
        let text = match value {
            PropertyValue::String(text) => text,
            other => return Ok(other),
        };
        let generated = replace_tokens(generate_pattern(), &text, |caps| {
            self.generate(key, &caps[1], caps.get(2).map(|m| m.as_str()))
        })?;
        Ok(PropertyValue::String(generated))
    }
}

/// Substitutes `{env:NAME}` with the value of environment variable `NAME`
#[derive(Debug, Default, Clone)]
pub struct EnvProcessor;

impl PropertyProcessor for EnvProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Environment
    }

    fn transform(&self, key: &str, value: PropertyValue) -> Result<PropertyValue> {
        let text = match value {
            PropertyValue::String(text) => text,
            other => return Ok(other),
        };
        let resolved = replace_tokens(env_pattern(), &text, |caps| {
            std::env::var(&caps[1]).map_err(|_| {
                processing_error(self.kind(), key, format!("environment variable {} is not set", &caps[1]))
            })
        })?;
        Ok(PropertyValue::String(resolved))
    }
}
