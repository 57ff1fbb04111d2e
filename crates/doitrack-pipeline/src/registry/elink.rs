// ELink registry client (HTTP + basic auth)

use async_trait::async_trait;
use reqwest::{header, Client, Response};
use tracing::{debug, info, info_span, warn, Instrument, Span};
use url::Url;

use super::models::{parse_lookup, parse_submit_response, submission_body};
use super::{
    LookupKey, LookupOutcome, RegistryClient, RegistryError, SubmissionRecord, SubmitResponse,
};
use crate::config::RegistryConfig;

const BIBTEX_MEDIA_TYPE: &str = "application/x-bibtex";

pub struct ElinkClient {
    client: Client,
    config: RegistryConfig,
    citation_base: Url,
    span: Span,
}

impl ElinkClient {
    /// Create a client; fails if credentials or endpoints are unusable
    pub fn new(config: RegistryConfig) -> Result<Self, RegistryError> {
        config
            .validate()
            .map_err(|e| RegistryError::Config(e.to_string()))?;

        let citation_base = Url::parse(&config.citation_url)
            .map_err(|e| RegistryError::Config(format!("citation url: {}", e)))?;
        if citation_base.cannot_be_a_base() {
            return Err(RegistryError::Config(format!(
                "citation url cannot be a base: {}",
                config.citation_url
            )));
        }

        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("doitrack/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            config,
            citation_base,
            span: info_span!("registry", registry = "elink"),
        })
    }

    fn citation_url(&self, item_id: &str) -> Url {
        let mut url = self.citation_base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(item_id);
        }
        url
    }

    fn ensure_success(response: &Response) -> Result<(), RegistryError> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(RegistryError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            })
        }
    }

    async fn get_lookup(&self, key: &LookupKey) -> Result<LookupOutcome, RegistryError> {
        let (param, value) = key.query_param();
        debug!("GET {} with {}", self.config.lookup_url, key);

        let response = self
            .client
            .get(&self.config.lookup_url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .query(&[(param, value)])
            .send()
            .await?;
        Self::ensure_success(&response)?;

        let body = response.text().await?;
        Ok(match parse_lookup(&body)? {
            Some(hit) => {
                if hit.is_completed() {
                    debug!(key = %key, identifier = %hit.identifier, "Registration completed");
                } else {
                    warn!(
                        key = %key,
                        identifier = %hit.identifier,
                        status = hit.status.as_deref().unwrap_or("unknown"),
                        "Identifier found but registration not completed"
                    );
                }
                LookupOutcome::Found(hit.identifier)
            },
            None => LookupOutcome::NotFound,
        })
    }

    async fn get_citation(&self, item_id: &str) -> Result<Vec<u8>, RegistryError> {
        let url = self.citation_url(item_id);
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .header(header::ACCEPT, BIBTEX_MEDIA_TYPE)
            .send()
            .await?;
        Self::ensure_success(&response)?;

        let bytes = response.bytes().await?;
        debug!("Fetched citation for {}: {} bytes", item_id, bytes.len());
        Ok(bytes.to_vec())
    }

    async fn post_records(
        &self,
        records: &[SubmissionRecord],
    ) -> Result<SubmitResponse, RegistryError> {
        let body = submission_body(records)?;
        info!("POSTing {} records to {}", records.len(), self.config.lookup_url);

        let response = self
            .client
            .post(&self.config.lookup_url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .header(header::CONTENT_TYPE, "application/xml")
            .body(body)
            .send()
            .await?;
        Self::ensure_success(&response)?;

        let text = response.text().await?;
        let parsed = parse_submit_response(&text)?;
        info!("Registry acknowledged {} of {} records", parsed.records.len(), records.len());
        Ok(parsed)
    }
}

#[async_trait]
impl RegistryClient for ElinkClient {
    async fn lookup(&self, key: &LookupKey) -> Result<LookupOutcome, RegistryError> {
        self.get_lookup(key).instrument(self.span.clone()).await
    }

    async fn fetch_citation_text(&self, item_id: &str) -> Result<Vec<u8>, RegistryError> {
        self.get_citation(item_id).instrument(self.span.clone()).await
    }

    async fn submit(&self, records: &[SubmissionRecord]) -> Result<SubmitResponse, RegistryError> {
        self.post_records(records).instrument(self.span.clone()).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn config() -> RegistryConfig {
        RegistryConfig {
            lookup_url: "https://registry.test/elink/2416api".to_string(),
            citation_url: "https://registry.test/api/v1/records/".to_string(),
            username: "svc".to_string(),
            password: "secret".to_string(),
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_citation_url_appends_item_id() {
        let client = ElinkClient::new(config()).unwrap();
        assert_eq!(
            client.citation_url("1190959").as_str(),
            "https://registry.test/api/v1/records/1190959"
        );
    }

    #[test]
    fn test_citation_url_escapes_item_id() {
        let client = ElinkClient::new(config()).unwrap();
        assert_eq!(
            client.citation_url("a b").as_str(),
            "https://registry.test/api/v1/records/a%20b"
        );
    }

    #[test]
    fn test_new_rejects_missing_credentials() {
        let mut config = config();
        config.username.clear();
        let err = ElinkClient::new(config).err().unwrap();
        assert!(matches!(err, RegistryError::Config(_)));
    }
}
