//! FHIR REST client.

use base64::Engine;
use reqwest::{Client, RequestBuilder, header};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::resources::{BinaryResource, Bundle, CatalogRecord, CreatedResource};
use crate::config::FhirConfig;
use crate::error::{FhirError, ServiceError, ServiceResult};

const FHIR_JSON: &str = "application/fhir+json";

/// Decoded content of a `Binary` resource
#[derive(Debug, Clone)]
pub struct FetchedBinary {
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// FHIR server client
#[derive(Clone)]
pub struct FhirClient {
    client: Client,
    config: FhirConfig,
}

impl FhirClient {
    /// Create a new FHIR client
    pub fn new(config: FhirConfig) -> ServiceResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("larynx-service/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                ServiceError::Fhir(FhirError::Connection {
                    url: config.base_url.clone(),
                    source: e,
                })
            })?;

        Ok(Self {
            client,
            config: FhirConfig {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                ..config
            },
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request and decode a successful JSON response.
    async fn send_json<T: DeserializeOwned>(
        &self,
        url: &str,
        request: RequestBuilder,
    ) -> Result<T, FhirError> {
        let response = self
            .authorize(request.header(header::ACCEPT, FHIR_JSON))
            .send()
            .await
            .map_err(|e| FhirError::Connection {
                url: url.to_string(),
                source: e,
            })?;

        if !response.status().is_success() {
            return Err(FhirError::Status {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        response.json().await.map_err(|e| FhirError::InvalidResponse {
            url: url.to_string(),
            source: e,
        })
    }

    /// Search the demo-case catalog by its configured category coding.
    ///
    /// Only the first page of results is returned.
    pub async fn search_catalog(&self) -> Result<Vec<CatalogRecord>, FhirError> {
        let url = format!(
            "{}/DocumentReference?category={}&_count={}",
            self.config.base_url,
            urlencoding::encode(&format!(
                "{}|{}",
                self.config.category_system, self.config.category_code
            )),
            self.config.page_size
        );

        let bundle: Bundle<CatalogRecord> = self.send_json(&url, self.client.get(&url)).await?;

        let records = bundle.into_resources();
        debug!(count = records.len(), "Catalog search returned records");
        Ok(records)
    }

    /// Fetch a `Binary` resource and decode its payload.
    ///
    /// Returns `Ok(None)` when the resource exists but carries no data.
    pub async fn fetch_binary(&self, binary_id: &str) -> Result<Option<FetchedBinary>, FhirError> {
        let url = format!(
            "{}/Binary/{}?_format=json",
            self.config.base_url,
            urlencoding::encode(binary_id)
        );

        let binary: BinaryResource = self.send_json(&url, self.client.get(&url)).await?;
        decode_binary(binary_id, binary)
    }

    /// Create a resource and return the id the server assigned to it.
    pub async fn create<T: Serialize + ?Sized>(
        &self,
        resource_type: &str,
        resource: &T,
    ) -> Result<String, FhirError> {
        let url = format!("{}/{}", self.config.base_url, resource_type);

        let request = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, FHIR_JSON)
            .json(resource);
        let created: CreatedResource = self.send_json(&url, request).await?;

        created.id.ok_or(FhirError::MissingResourceId)
    }
}

fn decode_binary(
    binary_id: &str,
    binary: BinaryResource,
) -> Result<Option<FetchedBinary>, FhirError> {
    let Some(encoded) = binary.data.filter(|d| !d.is_empty()) else {
        return Ok(None);
    };

    // Some servers wrap long base64 payloads across lines.
    let compact: String = encoded.split_whitespace().collect();
    let data = base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| FhirError::InvalidBinaryData {
            binary_id: binary_id.to_string(),
            source: e,
        })?;

    Ok(Some(FetchedBinary {
        content_type: binary.content_type,
        data,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_binary_with_data() {
        let binary = BinaryResource {
            content_type: Some("application/pdf".to_string()),
            data: Some("JVBERi0x\nLjQ=".to_string()),
        };
        let fetched = decode_binary("b1", binary).unwrap().unwrap();
        assert_eq!(fetched.data, b"%PDF-1.4");
        assert_eq!(fetched.content_type.as_deref(), Some("application/pdf"));
    }

    #[test]
    fn test_decode_binary_without_data_is_missing() {
        let binary = BinaryResource {
            content_type: Some("image/png".to_string()),
            data: None,
        };
        assert!(decode_binary("b1", binary).unwrap().is_none());

        let empty = BinaryResource {
            content_type: None,
            data: Some(String::new()),
        };
        assert!(decode_binary("b2", empty).unwrap().is_none());
    }

    #[test]
    fn test_decode_binary_rejects_garbage() {
        let binary = BinaryResource {
            content_type: None,
            data: Some("***".to_string()),
        };
        let err = decode_binary("b3", binary).unwrap_err();
        assert!(matches!(err, FhirError::InvalidBinaryData { binary_id, .. } if binary_id == "b3"));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = FhirConfig {
            base_url: "https://fhir.example.org/r4/".to_string(),
            bearer_token: None,
            timeout_secs: 5,
            category_system: "urn:cat".to_string(),
            category_code: "demo".to_string(),
            page_size: 10,
        };
        let client = FhirClient::new(config).unwrap();
        assert_eq!(client.base_url(), "https://fhir.example.org/r4");
    }
}
