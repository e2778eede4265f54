//! Provider credential maps

use std::collections::BTreeMap;
use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::errors::PlaneError;

/// Opaque map of provider specific secret fields, e.g. `api_token` or
/// `access_key_id`. Values never show up in `Debug` output.
#[derive(Default, Deserialize)]
#[serde(from = "BTreeMap<String, String>")]
pub struct DnsCredentials {
    fields: BTreeMap<String, SecretString>,
}

impl DnsCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.fields
            .insert(key.to_string(), SecretString::from(value.to_string()));
    }

    /// Non-blank value for `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(|v| v.expose_secret().trim())
            .filter(|v| !v.is_empty())
    }

    /// Owned secret for `key`, if present and non-blank
    pub fn secret(&self, key: &str) -> Option<SecretString> {
        self.get(key).map(|v| SecretString::from(v.to_string()))
    }

    /// Like [`DnsCredentials::secret`] but missing values are a configuration error
    pub fn require(&self, provider: &str, key: &str) -> Result<SecretString, PlaneError> {
        self.secret(key).ok_or_else(|| PlaneError::MissingCredential {
            provider: provider.to_string(),
            field: key.to_string(),
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Clone for DnsCredentials {
    fn clone(&self) -> Self {
        let fields = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), SecretString::from(v.expose_secret().to_string())))
            .collect();
        Self { fields }
    }
}

impl fmt::Debug for DnsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsCredentials")
            .field("keys", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl From<BTreeMap<String, String>> for DnsCredentials {
    fn from(map: BTreeMap<String, String>) -> Self {
        let mut credentials = Self::new();
        for (k, v) in map {
            credentials.insert(&k, &v);
        }
        credentials
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for DnsCredentials {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut credentials = Self::new();
        for (k, v) in iter {
            credentials.insert(k.as_ref(), v.as_ref());
        }
        credentials
    }
}
