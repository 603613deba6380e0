//! Shared fixtures for the integration tests

#![allow(dead_code)]

use sourcedecrypter::{DecrypterError, SecretDecrypter};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

const KEY: &[u8] = b"fixture-key";

/// Reversible fixture cipher: bytes XOR a repeating key, hex encoded.
pub fn encrypt(plaintext: &str) -> String {
    plaintext
        .bytes()
        .zip(KEY.iter().cycle())
        .map(|(b, k)| format!("{:02x}", b ^ k))
        .collect()
}

/// Decrypter for [`encrypt`] that records every ciphertext it sees.
#[derive(Default)]
pub struct FixtureDecrypter {
    seen: Mutex<Vec<String>>,
}

impl FixtureDecrypter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl SecretDecrypter for FixtureDecrypter {
    fn decrypt(&self, ciphertext: &str) -> Result<String, DecrypterError> {
        self.seen.lock().unwrap().push(ciphertext.to_string());

        if ciphertext.len() % 2 != 0 {
            return Err(format!("odd-length ciphertext ({} chars)", ciphertext.len()).into());
        }
        let bytes = (0..ciphertext.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&ciphertext[i..i + 2], 16))
            .collect::<Result<Vec<u8>, _>>()?;
        let plain: Vec<u8> = bytes
            .into_iter()
            .zip(KEY.iter().cycle())
            .map(|(b, k)| b ^ k)
            .collect();
        Ok(String::from_utf8(plain)?)
    }
}

/// Write `content` to `root/rel`, creating parent directories.
pub fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

pub fn read(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel)).unwrap()
}
