//! Host key lifecycle (spec §6): a single 2048-bit RSA key, PEM PKCS#1,
//! loaded from the configured path or generated and persisted if absent.

use crate::error::ConfigError;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use russh::keys::ssh_key::private::{PrivateKeyData, RsaKeypair};
use russh::keys::ssh_key::rand_core::OsRng;
use russh::keys::PrivateKey;
use std::path::Path;

const RSA_KEY_BITS: usize = 2048;

/// Loads the RSA host key from `path`, generating and writing a fresh one
/// if the file doesn't exist yet. Any other I/O or parse failure is fatal
/// at bootstrap (spec §7's "Fatal" class).
pub fn load_or_generate(path: &Path) -> Result<PrivateKey, ConfigError> {
    let rsa_key = match std::fs::read_to_string(path) {
        Ok(pem) => RsaPrivateKey::from_pkcs1_pem(&pem).map_err(ConfigError::Parse)?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => generate_and_persist(path)?,
        Err(source) => {
            return Err(ConfigError::ReadKey {
                path: path.display().to_string(),
                source,
            });
        }
    };

    let keypair = RsaKeypair::try_from(rsa_key).map_err(ConfigError::IntoSshKey)?;
    PrivateKey::new(PrivateKeyData::Rsa(keypair), "gossh-dispatcher")
        .map_err(ConfigError::IntoSshKey)
}

fn generate_and_persist(path: &Path) -> Result<RsaPrivateKey, ConfigError> {
    log::info!(
        "host key {} not found; generating a new {RSA_KEY_BITS}-bit RSA key",
        path.display()
    );
    let key = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS).map_err(ConfigError::KeyGen)?;
    let pem = key.to_pkcs1_pem(LineEnding::LF).map_err(ConfigError::Encode)?;

    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    std::fs::write(path, pem.as_bytes()).map_err(|source| ConfigError::WriteKey {
        path: path.display().to_string(),
        source,
    })?;

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_then_reloads_the_same_key() {
        let path = std::env::temp_dir().join(format!("gossh-hostkey-test-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let first = load_or_generate(&path).expect("generate on first call");
        let pem_after_generate = std::fs::read_to_string(&path).unwrap();
        assert!(pem_after_generate.contains("BEGIN RSA PRIVATE KEY"));

        let second = load_or_generate(&path).expect("reload on second call");
        let _ = std::fs::remove_file(&path);

        assert_eq!(first.algorithm(), second.algorithm());
    }
}
