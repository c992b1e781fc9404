//! Phone number to contact identity resolution through a CRM search API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use relay_core::security::ApiKey;
use relay_settings::ContactDirectorySettings;

use crate::error::ClientError;
use crate::storage::ClientStorage;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub box_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
}

impl ContactInfo {
    /// Placeholder identity for numbers the directory does not know.
    pub fn unknown(phone: &str) -> Self {
        Self {
            name: phone.to_string(),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait ContactDirectory: Send + Sync {
    /// `Ok(None)` when the directory has no match.
    async fn search(&self, phone: &str) -> Result<Option<ContactInfo>, ClientError>;
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SearchResponse {
    results: SearchResults,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SearchResults {
    contacts: Vec<CrmContact>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct CrmContact {
    key: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
    email_addresses: Vec<String>,
}

impl CrmContact {
    fn into_info(self, phone: &str) -> ContactInfo {
        let full_name = [self.given_name.as_deref(), self.family_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let email = self.email_addresses.into_iter().next();
        let name = if !full_name.is_empty() {
            full_name
        } else {
            email.clone().unwrap_or_else(|| phone.to_string())
        };
        ContactInfo {
            name,
            box_key: self.key,
            email,
            given_name: self.given_name,
            family_name: self.family_name,
        }
    }
}

/// CRM search over HTTP with the API key as the basic-auth user.
pub struct CrmDirectory {
    client: Client,
    base_url: String,
    api_key: ApiKey,
}

impl CrmDirectory {
    pub fn new(base_url: &str, api_key: ApiKey, timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// `None` when no API key is configured.
    pub fn from_settings(
        settings: &ContactDirectorySettings,
        timeout: Duration,
    ) -> Result<Option<Self>, ClientError> {
        match settings.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => Self::new(&settings.base_url, ApiKey::new(key), timeout).map(Some),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ContactDirectory for CrmDirectory {
    async fn search(&self, phone: &str) -> Result<Option<ContactInfo>, ClientError> {
        let response = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[("query", phone)])
            .basic_auth(self.api_key.expose(), None::<&str>)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                message: "contact search failed".into(),
            });
        }
        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(body.results.contacts.into_iter().next().map(|c| c.into_info(phone)))
    }
}

/// Cache-first resolver. Only directory hits are cached, so a contact added
/// to the CRM later is picked up on the next lookup.
pub struct ContactResolver {
    directory: Arc<dyn ContactDirectory>,
    storage: Arc<ClientStorage>,
}

impl ContactResolver {
    pub fn new(directory: Arc<dyn ContactDirectory>, storage: Arc<ClientStorage>) -> Self {
        Self { directory, storage }
    }

    pub async fn resolve(&self, phone: &str) -> ContactInfo {
        if let Some(cached) = self.storage.cached_contact(phone) {
            return cached;
        }
        match self.directory.search(phone).await {
            Ok(Some(contact)) => {
                if let Err(e) = self.storage.cache_contact(phone, contact.clone()) {
                    warn!(error = %e, "failed to persist contact cache");
                }
                contact
            }
            Ok(None) => {
                debug!(phone, "no directory match");
                ContactInfo::unknown(phone)
            }
            Err(e) => {
                warn!(phone, error = %e, kind = e.error_kind(), "contact lookup failed");
                ContactInfo::unknown(phone)
            }
        }
    }

    pub async fn display_name(&self, phone: &str) -> String {
        self.resolve(phone).await.name
    }
}
