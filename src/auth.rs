use anyhow::{Context, Result};
use async_trait::async_trait;
use google_gmail1::oauth2;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::path::Path;
use yup_oauth2::storage::{TokenInfo, TokenStorage};
use yup_oauth2::{
    ApplicationSecret, InstalledFlowAuthenticator, InstalledFlowReturnMethod,
    read_application_secret,
};

const APP_NAME: &str = "gmind";
const TOKEN_KEY: &str = "gmail_token";

/// Read, mark read and trash. Nothing is sent or permanently deleted.
pub const SCOPES: &[&str] = &["https://www.googleapis.com/auth/gmail.modify"];

pub type GmailAuthenticator = oauth2::authenticator::Authenticator<
    hyper_rustls::HttpsConnector<hyper::client::HttpConnector>,
>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenData {
    tokens: Vec<TokenInfo>,
}

/// Keeps the OAuth token in the OS keyring instead of a file next to the
/// database.
pub struct RingStorage;

fn entry() -> Result<Entry> {
    Entry::new(APP_NAME, TOKEN_KEY).map_err(|e| anyhow::anyhow!("Keyring error: {}", e))
}

#[async_trait]
impl TokenStorage for RingStorage {
    async fn set(&self, _scopes: &[&str], token: TokenInfo) -> Result<()> {
        let data = TokenData {
            tokens: vec![token],
        };
        let serialized = serde_json::to_string(&data).context("Failed to serialize tokens")?;
        entry()?
            .set_password(&serialized)
            .map_err(|e| anyhow::anyhow!("Keyring error: {}", e))?;
        Ok(())
    }

    async fn get(&self, _scopes: &[&str]) -> Option<TokenInfo> {
        self.get_all()
            .await
            .ok()
            .and_then(|data| data.tokens.into_iter().next())
    }
}

impl RingStorage {
    async fn get_all(&self) -> Result<TokenData> {
        match entry()?.get_password() {
            Ok(serialized) => {
                serde_json::from_str(&serialized).context("Failed to deserialize tokens")
            }
            Err(keyring::Error::NoEntry) => Ok(TokenData::default()),
            Err(e) => Err(anyhow::anyhow!("Keyring error: {}", e)),
        }
    }

    /// Forgets the stored token so the next start runs the consent flow
    /// again. Clearing an absent token is not an error.
    pub async fn clear_token(&self) -> Result<()> {
        match entry()?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(anyhow::anyhow!("Keyring error: {}", e)),
        }
    }
}

pub struct Authenticator;

impl Authenticator {
    pub async fn load_secret<P: AsRef<Path>>(path: P) -> Result<ApplicationSecret> {
        read_application_secret(path)
            .await
            .context("Failed to read application secret")
    }

    pub async fn authenticate(secret: ApplicationSecret) -> Result<GmailAuthenticator> {
        let auth =
            InstalledFlowAuthenticator::builder(secret, InstalledFlowReturnMethod::HTTPRedirect)
                .with_storage(Box::new(RingStorage))
                .build()
                .await
                .context("Failed to build authenticator")?;

        Ok(auth)
    }
}
