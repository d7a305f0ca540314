use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::error::FetchError;
use crate::sync::source::DataSource;
use crate::tally::api_types::{CompanyQuery, VoucherQuery};
use crate::tally::types::{LedgerList, StockItemList, VoucherBatch};
use crate::types::CompanyIdentity;

const VOUCHERS_PATH: &str = "api/vouchers";
const LEDGERS_PATH: &str = "api/ledgers";
const STOCK_ITEMS_PATH: &str = "api/stock-items";

/// Accounting data service client
#[derive(Clone)]
pub struct TallyClient {
  http: reqwest::Client,
  base_url: Url,
  token: Option<String>,
}

impl TallyClient {
  pub fn new(config: &Config) -> Result<Self> {
    Self::with_base_url(
      &config.server.url,
      Duration::from_secs(config.server.timeout_secs),
      Config::get_api_token(),
    )
  }

  pub fn with_base_url(url: &str, timeout: Duration, token: Option<String>) -> Result<Self> {
    let mut base_url = Url::parse(url).map_err(|e| eyre!("Invalid server URL '{}': {}", url, e))?;

    // Url::join drops the last path segment unless it ends with a slash
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    let http = reqwest::Client::builder()
      .timeout(timeout)
      .gzip(true)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      token,
    })
  }

  /// POST a JSON body and decode the JSON response.
  async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, FetchError>
  where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
  {
    let url = self
      .base_url
      .join(path)
      .map_err(|e| FetchError::NotFound(format!("{}: {}", path, e)))?;

    let mut request = self.http.post(url.clone()).json(body);
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(FetchError::from_status(status.as_u16(), url.as_str(), &body));
    }

    let bytes = response.bytes().await?;
    debug!(url = %url, bytes = bytes.len(), "response received");

    serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode(e.to_string()))
  }
}

#[async_trait]
impl DataSource for TallyClient {
  async fn fetch_vouchers(&self, query: &VoucherQuery) -> Result<VoucherBatch, FetchError> {
    self.post(VOUCHERS_PATH, query).await
  }

  async fn fetch_ledgers(&self, company: &CompanyIdentity) -> Result<LedgerList, FetchError> {
    self.post(LEDGERS_PATH, &CompanyQuery::from(company)).await
  }

  async fn fetch_stock_items(&self, company: &CompanyIdentity) -> Result<StockItemList, FetchError> {
    self.post(STOCK_ITEMS_PATH, &CompanyQuery::from(company)).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::DateRange;
  use chrono::NaiveDate;
  use serde_json::json;
  use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
  };

  fn company() -> CompanyIdentity {
    CompanyIdentity::new("loc1", "guid-1", "Acme")
  }

  fn query() -> VoucherQuery {
    let range = DateRange::new(
      NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
      NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
    );
    VoucherQuery::new(&company(), &range, "daily", "Sales")
  }

  fn client(server: &MockServer, token: Option<&str>) -> TallyClient {
    TallyClient::with_base_url(
      &server.uri(),
      Duration::from_secs(5),
      token.map(String::from),
    )
    .unwrap()
  }

  #[tokio::test]
  async fn test_fetch_vouchers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/vouchers"))
      .and(header("authorization", "Bearer secret"))
      .and(body_partial_json(json!({
        "companyGuid": "guid-1",
        "fromDate": "20240101",
        "toDate": "20240102"
      })))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "vouchers": [
          {"masterId": "1", "alterId": 10, "date": "20240101", "amount": 5},
          {"masterId": "2", "alterId": "12", "date": "20240102"}
        ]
      })))
      .expect(1)
      .mount(&server)
      .await;

    let batch = client(&server, Some("secret"))
      .fetch_vouchers(&query())
      .await
      .unwrap();
    assert_eq!(batch.vouchers.len(), 2);
    assert_eq!(batch.max_alter_id(), Some(12));
  }

  #[tokio::test]
  async fn test_base_url_with_path_prefix() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/tenant/api/ledgers"))
      .respond_with(
        ResponseTemplate::new(200).set_body_json(json!({"ledgers": [{"name": "Cash"}]})),
      )
      .mount(&server)
      .await;

    let client = TallyClient::with_base_url(
      &format!("{}/tenant", server.uri()),
      Duration::from_secs(5),
      None,
    )
    .unwrap();
    let ledgers = client.fetch_ledgers(&company()).await.unwrap();
    assert_eq!(ledgers.ledgers[0].name, "Cash");
  }

  #[tokio::test]
  async fn test_status_codes_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/vouchers"))
      .respond_with(ResponseTemplate::new(401))
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/api/stock-items"))
      .respond_with(ResponseTemplate::new(503))
      .mount(&server)
      .await;

    let client = client(&server, None);
    assert_eq!(
      client.fetch_vouchers(&query()).await.unwrap_err(),
      FetchError::AuthExpired
    );
    assert_eq!(
      client.fetch_stock_items(&company()).await.unwrap_err(),
      FetchError::Server { status: 503 }
    );
  }

  #[tokio::test]
  async fn test_undecodable_body_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/vouchers"))
      .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
      .mount(&server)
      .await;

    let err = client(&server, None)
      .fetch_vouchers(&query())
      .await
      .unwrap_err();
    assert!(matches!(err, FetchError::Decode(_)));
  }

  #[tokio::test]
  async fn test_unreachable_server_is_connectivity_error() {
    // Nothing listens on port 9 (discard) on test machines
    let client =
      TallyClient::with_base_url("http://127.0.0.1:9", Duration::from_secs(2), None).unwrap();
    let err = client.fetch_ledgers(&company()).await.unwrap_err();
    assert!(matches!(
      err,
      FetchError::Connectivity(_) | FetchError::Timeout
    ));
  }
}
