//! Console transport key material
//!
//! Hands a starting console proxy the AES key/IV it encrypts console traffic
//! with. Corrupt stored material is regenerated once; if the regenerated
//! material is still unusable the bootstrap fails.

use consolegate_common::{crypto, AgentCommand, Database, Error, KeyIvPair, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Owner of the master console key and IV
pub trait KeyMaterialService: Send + Sync {
    /// URL-safe base64 key
    fn encryption_key(&self) -> Result<String>;

    /// URL-safe base64 IV
    fn encryption_iv(&self) -> Result<String>;

    /// Discard and regenerate both key and IV
    fn reset_encryption_key_iv(&self) -> Result<()>;
}

const KEY_ENTRY: &str = "console.encryption_key";
const IV_ENTRY: &str = "console.encryption_iv";

/// Key material kept in the database key-value store
#[derive(Clone)]
pub struct DbKeyMaterialService {
    db: Database,
}

impl DbKeyMaterialService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn get_or_create(&self, entry: &str) -> Result<String> {
        if let Some(value) = self.db.kv_get(entry)? {
            return Ok(value);
        }
        let value = crypto::encode_url_safe(&crypto::random_bytes(crypto::KEY_IV_LEN));
        self.db.kv_set(entry, &value)?;
        debug!("Generated console {}", entry);
        Ok(value)
    }
}

impl KeyMaterialService for DbKeyMaterialService {
    fn encryption_key(&self) -> Result<String> {
        self.get_or_create(KEY_ENTRY)
    }

    fn encryption_iv(&self) -> Result<String> {
        self.get_or_create(IV_ENTRY)
    }

    fn reset_encryption_key_iv(&self) -> Result<()> {
        let fresh = KeyIvPair::generate();
        self.db.kv_set(KEY_ENTRY, fresh.key())?;
        self.db.kv_set(IV_ENTRY, fresh.iv())?;
        info!("Console encryption key and IV regenerated");
        Ok(())
    }
}

/// Fetch + validate attempts before giving up
const MAX_ATTEMPTS: usize = 2;

/// Produces validated key material for console proxies
pub struct SessionKeyManager {
    keys: Arc<dyn KeyMaterialService>,
}

impl SessionKeyManager {
    pub fn new(keys: Arc<dyn KeyMaterialService>) -> Self {
        Self { keys }
    }

    /// Current key/IV pair, regenerating once if the stored one is corrupt
    pub fn key_iv_pair(&self) -> Result<KeyIvPair> {
        for attempt in 1..=MAX_ATTEMPTS {
            let pair = KeyIvPair::new(self.keys.encryption_key()?, self.keys.encryption_iv()?);
            if pair.is_valid() {
                return Ok(pair);
            }

            warn!(
                "Console access AES key/IV sanity check failed (attempt {}): {:?}",
                attempt, pair
            );
            if attempt < MAX_ATTEMPTS {
                self.keys.reset_encryption_key_iv()?;
            }
        }

        Err(Error::KeyMaterialCorrupt)
    }

    /// JSON key payload for a console proxy
    pub fn encryptor_password(&self) -> Result<String> {
        self.key_iv_pair()?.to_json()
    }

    /// Command that starts console handling in the starting proxy `proxy_id`
    pub fn bootstrap_handler(&self, proxy_id: &str) -> Result<AgentCommand> {
        let encryptor_password = self.encryptor_password()?;
        debug!("Prepared console handler startup for proxy {}", proxy_id);
        Ok(AgentCommand::StartConsoleHandler { encryptor_password })
    }
}
