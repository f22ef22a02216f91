use crate::error::{EngineError, Result};
use alloy::primitives::{Address, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::{Signature, Signer as AlloySigner};
use tracing::info;

/// Wallet for signing Polymarket orders and authentication messages.
#[derive(Clone)]
pub struct Wallet {
    inner: PrivateKeySigner,
    chain_id: u64,
    private_key_hex: String,
}

impl Wallet {
    /// Create a wallet from a private key hex string.
    pub fn from_private_key(private_key: &str, chain_id: u64) -> Result<Self> {
        let key_hex = private_key.trim_start_matches("0x");

        let mut signer = key_hex
            .parse::<PrivateKeySigner>()
            .map_err(|e| EngineError::Signing(format!("invalid private key: {}", e)))?;
        signer.set_chain_id(Some(chain_id));

        info!(address = %signer.address(), "wallet initialized");

        Ok(Self {
            inner: signer,
            chain_id,
            private_key_hex: format!("0x{}", key_hex),
        })
    }

    /// Create a wallet from environment variable.
    pub fn from_env(chain_id: u64) -> Result<Self> {
        let private_key = std::env::var("POLYMARKET_PRIVATE_KEY")
            .or_else(|_| std::env::var("PRIVATE_KEY"))
            .map_err(|_| {
                EngineError::Signing(
                    "POLYMARKET_PRIVATE_KEY or PRIVATE_KEY environment variable not set"
                        .to_string(),
                )
            })?;

        Self::from_private_key(&private_key, chain_id)
    }

    pub fn address(&self) -> Address {
        self.inner.address()
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// The private key as hex (with 0x prefix). Handled with the same care as
    /// any other secret — never logged, scrubbed from intermediate buffers by
    /// the callers that parse it out of raw env/CLI input.
    pub fn private_key_hex(&self) -> &str {
        &self.private_key_hex
    }

    /// Sign a 32-byte message hash directly (EIP-712 digests).
    pub async fn sign_hash(&self, hash: B256) -> Result<Signature> {
        self.inner
            .sign_hash(&hash)
            .await
            .map_err(|e| EngineError::Signing(format!("failed to sign hash: {}", e)))
    }

    /// Sign a message, prefixed per EIP-191 (`\x19Ethereum Signed Message:\n`).
    pub async fn sign_message<S: AsRef<[u8]> + Send + Sync>(&self, message: S) -> Result<Signature> {
        self.inner
            .sign_message(message.as_ref())
            .await
            .map_err(|e| EngineError::Signing(format!("failed to sign message: {}", e)))
    }

    /// The underlying alloy signer, for SDK calls that want to own/borrow it
    /// directly (e.g. the Polymarket CLOB client's per-call authentication).
    pub fn inner(&self) -> &PrivateKeySigner {
        &self.inner
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address())
            .field("chain_id", &self.chain_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wallet_creation_derives_expected_address() {
        // Well-known Anvil/Hardhat test key. Not used in production.
        let test_key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

        let wallet = Wallet::from_private_key(test_key, 137).unwrap();

        assert_eq!(wallet.chain_id(), 137);
        assert_eq!(
            format!("{:#x}", wallet.address()),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }
}
