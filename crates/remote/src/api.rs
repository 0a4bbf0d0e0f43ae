//! Blocking client for token-authenticated JSON APIs (Proxmox VE style).
//!
//! Every response is wrapped as `{"data": ...}`; the client unwraps it.

use crate::connection::ApiConnection;
use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Value,
}

/// HTTP API client.
pub struct ApiClient {
    agent: ureq::Agent,
    base_url: String,
    authorization: String,
}

impl ApiClient {
    /// Create a client for `connection`.
    ///
    /// Certificate verification is disabled unless `verify_ssl` is set; lab
    /// hypervisors usually serve self-signed certificates.
    #[must_use]
    pub fn new(connection: &ApiConnection) -> Self {
        let tls = ureq::tls::TlsConfig::builder()
            .disable_verification(!connection.verify_ssl)
            .build();
        let config = ureq::Agent::config_builder().tls_config(tls).build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            base_url: connection.base_url(),
            authorization: connection.authorization(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// GET `path` and return the unwrapped `data` value.
    pub fn get(&self, path: &str) -> Result<Value> {
        log::debug!("GET {path}");
        let envelope: Envelope = self
            .agent
            .get(&self.url(path))
            .header("Authorization", &self.authorization)
            .call()?
            .body_mut()
            .read_json()?;
        Ok(envelope.data)
    }

    /// POST a form to `path` and return the unwrapped `data` value.
    pub fn post(&self, path: &str, form: &[(&str, String)]) -> Result<Value> {
        log::debug!("POST {path}");
        let request = self
            .agent
            .post(&self.url(path))
            .header("Authorization", &self.authorization);
        let mut response = if form.is_empty() {
            request.send_empty()?
        } else {
            request.send_form(form.iter().map(|(k, v)| (*k, v.as_str())))?
        };
        let envelope: Envelope = response.body_mut().read_json()?;
        Ok(envelope.data)
    }

    /// DELETE `path` and return the unwrapped `data` value.
    pub fn delete(&self, path: &str) -> Result<Value> {
        log::debug!("DELETE {path}");
        let envelope: Envelope = self
            .agent
            .delete(&self.url(path))
            .header("Authorization", &self.authorization)
            .call()?
            .body_mut()
            .read_json()?;
        Ok(envelope.data)
    }
}

/// Deserialize an API `data` value, reporting shape errors as malformed responses.
pub fn decode<T: serde::de::DeserializeOwned>(context: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::malformed(context, e.to_string()))
}
