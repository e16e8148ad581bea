//! Client for the store HTTP API and WebSocket endpoint addresses

mod types;

pub(crate) use types::{MenuItem, OrderResponse};

use crate::config::ApiConfig;
use crate::error::{ApiError, AppError};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{info, instrument, warn};
use types::{ChantResponse, ErrorResponse, MenuItemRequest, MenuResponse};
use url::Url;

/// Maximum number of retry attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// Initial delay between retries (doubles with each attempt).
const INITIAL_RETRY_DELAY_MS: u64 = 1000;

/// The two WebSocket endpoints of a room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SocketEndpoint {
    /// Local samples out, peer average in
    VolumeRelay,
    /// Occupancy and countdown anchor
    Presence,
}

impl SocketEndpoint {
    fn path(self) -> &'static str {
        match self {
            SocketEndpoint::VolumeRelay => "ws",
            SocketEndpoint::Presence => "ws/stay",
        }
    }
}

pub(crate) struct ApiClient {
    base: Url,
    client: reqwest::Client,
}

impl ApiClient {
    pub(crate) fn new(config: &ApiConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| AppError::HttpClient(e.to_string()))?;

        let mut base = Url::parse(&config.base_url)
            .map_err(|e| AppError::HttpClient(format!("{}: {}", config.base_url, e)))?;
        // Relative joins keep any path prefix of the base URL
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self { base, client })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base.join(path)?)
    }

    /// Address of a room's WebSocket endpoint
    pub(crate) fn socket_url(
        &self,
        endpoint: SocketEndpoint,
        room: &str,
    ) -> Result<String, ApiError> {
        let mut url = self.endpoint(endpoint.path())?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(ApiError::UnsupportedScheme(other.to_string())),
        };
        url.set_scheme(scheme)
            .map_err(|_| ApiError::UnsupportedScheme(scheme.to_string()))?;
        url.query_pairs_mut().append_pair("room", room);
        Ok(url.into())
    }

    fn order_url(&self, order_id: &str) -> Result<Url, ApiError> {
        let mut url = self.endpoint("api/v1/stores/orders")?;
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidResponse("Base URL cannot carry a path".into()))?
            .pop_if_empty()
            .push(order_id);
        Ok(url)
    }

    #[instrument(skip(self))]
    pub(crate) async fn menu(&self) -> Result<Vec<MenuItem>, ApiError> {
        let url = self.endpoint("api/v1/stores/menu")?;
        let response: MenuResponse = self.send_json("menu", || self.client.get(url.clone())).await?;
        info!(items = response.menu.len(), "Menu loaded");
        Ok(response.menu)
    }

    #[instrument(skip(self))]
    pub(crate) async fn create_order(&self, menu_item_id: &str) -> Result<OrderResponse, ApiError> {
        let url = self.endpoint("api/v1/stores/orders")?;
        let body = MenuItemRequest { menu_item_id };
        let order: OrderResponse = self
            .send_json("create_order", || self.client.post(url.clone()).json(&body))
            .await?;
        info!(order_id = %order.id, order_number = order.order_number, "Order created");
        Ok(order)
    }

    #[instrument(skip(self))]
    pub(crate) async fn get_order(&self, order_id: &str) -> Result<OrderResponse, ApiError> {
        let url = self.order_url(order_id)?;
        self.send_json("get_order", || self.client.get(url.clone()))
            .await
    }

    /// Fetch the text the attendee reads aloud
    #[instrument(skip(self))]
    pub(crate) async fn fetch_chant(&self, menu_item_id: &str) -> Result<String, ApiError> {
        let url = self.endpoint("api/v1/chant")?;
        let body = MenuItemRequest { menu_item_id };
        let response: ChantResponse = self
            .send_json("chant", || self.client.post(url.clone()).json(&body))
            .await?;
        Ok(response.chant)
    }

    /// Send a request, retrying transient failures, and decode the JSON body
    async fn send_json<T: DeserializeOwned>(
        &self,
        label: &'static str,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let mut last_error: Option<ApiError> = None;
        let mut retry_delay = Duration::from_millis(INITIAL_RETRY_DELAY_MS);

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                warn!(
                    request = label,
                    attempt = attempt,
                    max_retries = MAX_RETRIES,
                    delay_ms = retry_delay.as_millis(),
                    "Retrying API request after transient failure"
                );
                tokio::time::sleep(retry_delay).await;
                retry_delay *= 2;
            }

            match build().send().await {
                Ok(response) => {
                    if response.status().is_success() {
                        let parsed = response.json::<T>().await.map_err(|e| {
                            ApiError::InvalidResponse(format!("Failed to parse {label} response: {e}"))
                        })?;
                        if attempt > 0 {
                            info!(request = label, attempt = attempt, "API request succeeded after retry");
                        }
                        return Ok(parsed);
                    }

                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    let error = ApiError::ServerError {
                        status,
                        message: ErrorResponse::describe(&body),
                    };

                    if (500..600).contains(&status) && attempt < MAX_RETRIES {
                        warn!(request = label, status = status, attempt = attempt, "Server error, will retry");
                        last_error = Some(error);
                        continue;
                    }
                    return Err(error);
                }
                Err(e) => {
                    if is_retryable_error(&e) && attempt < MAX_RETRIES {
                        warn!(request = label, error = %e, attempt = attempt, "Network error, will retry");
                        last_error = Some(ApiError::Network(e));
                        continue;
                    }
                    return Err(ApiError::Network(e));
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ApiError::InvalidResponse("Unexpected retry loop exit".into())))
    }
}

/// Check if a reqwest error is retryable (transient).
fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> ApiClient {
        ApiClient::new(&ApiConfig {
            base_url: base_url.to_string(),
            timeout_secs: 30,
            connect_timeout_secs: 10,
        })
        .unwrap()
    }

    #[test]
    fn test_socket_urls_switch_scheme() {
        let api = client("http://localhost:8080");
        assert_eq!(
            api.socket_url(SocketEndpoint::VolumeRelay, "giiku-sai").unwrap(),
            "ws://localhost:8080/ws?room=giiku-sai"
        );
        assert_eq!(
            api.socket_url(SocketEndpoint::Presence, "giiku-sai").unwrap(),
            "ws://localhost:8080/ws/stay?room=giiku-sai"
        );

        let secure = client("https://chant.example.com");
        assert_eq!(
            secure.socket_url(SocketEndpoint::Presence, "giiku-ten").unwrap(),
            "wss://chant.example.com/ws/stay?room=giiku-ten"
        );
    }

    #[test]
    fn test_base_path_prefix_is_kept() {
        let api = client("https://example.com/kakigori");
        assert_eq!(
            api.endpoint("api/v1/stores/menu").unwrap().as_str(),
            "https://example.com/kakigori/api/v1/stores/menu"
        );
        assert_eq!(
            api.socket_url(SocketEndpoint::VolumeRelay, "a b").unwrap(),
            "wss://example.com/kakigori/ws?room=a+b"
        );
    }

    #[test]
    fn test_order_url_escapes_id() {
        let api = client("http://localhost:8080/");
        assert_eq!(
            api.order_url("ord/1").unwrap().as_str(),
            "http://localhost:8080/api/v1/stores/orders/ord%2F1"
        );
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let result = ApiClient::new(&ApiConfig {
            base_url: "not a url".to_string(),
            timeout_secs: 30,
            connect_timeout_secs: 10,
        });
        assert!(matches!(result, Err(AppError::HttpClient(_))));
    }
}
