//! Reqwest-backed lightweight engine, site prober and proxy health checker.
//!
//! Thin adapters around `reqwest::Client` that translate a [`Strategy`] into a
//! request and the response back into a [`FetchOutcome`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use http::HeaderMap;
use http::header::ACCEPT_ENCODING;
use reqwest::Client;
use tokio::sync::Mutex;
use url::Url;

use super::{FetchEngine, FetchError, FetchOutcome, ProbeMethod, ProbeResponse, SiteProber};
use crate::core::Strategy;
use crate::modules::proxy::{ProxyHealthChecker, ProxyRecord};

/// Plain HTTP engine. Keeps one client per proxy endpoint, created on first
/// use and dropped on [`FetchEngine::shutdown`].
///
/// Has no render phase, so `Strategy::wait_time` does not apply here.
pub struct ReqwestFetchEngine {
    clients: Mutex<HashMap<Option<String>, Client>>,
}

impl ReqwestFetchEngine {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn client(&self, proxy: Option<&ProxyRecord>) -> Result<Client, FetchError> {
        let mut guard = self.clients.lock().await;
        let key = proxy.map(ProxyRecord::url);
        if let Some(client) = guard.get(&key) {
            return Ok(client.clone());
        }

        let client = build_client(proxy)?;
        guard.insert(key, client.clone());
        Ok(client)
    }

    async fn send(&self, locator: &Url, strategy: &Strategy) -> Result<(u16, HeaderMap, String), FetchError> {
        let client = self.client(strategy.proxy.as_ref()).await?;
        let response = client
            .get(locator.as_str())
            .headers(request_headers(&strategy.headers))
            .timeout(strategy.timeout)
            .send()
            .await
            .map_err(transport_error)?;
        read_response(response).await
    }
}

impl Default for ReqwestFetchEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FetchEngine for ReqwestFetchEngine {
    fn name(&self) -> &'static str {
        "reqwest"
    }

    async fn fetch(&self, locator: &Url, strategy: &Strategy) -> FetchOutcome {
        let started = Instant::now();
        match self.send(locator, strategy).await {
            Ok((status, headers, body)) => {
                log::debug!("reqwest fetch {locator} -> {status} ({} bytes)", body.len());
                FetchOutcome::completed(status, headers, body, started.elapsed())
            }
            Err(err) => {
                log::error!("reqwest fetch {locator} failed: {err}");
                FetchOutcome::failed(err, started.elapsed())
            }
        }
    }

    async fn shutdown(&self) {
        let mut guard = self.clients.lock().await;
        log::debug!("releasing {} pooled http clients", guard.len());
        guard.clear();
    }
}

/// `HEAD`/`GET` probe used by the dispatcher.
pub struct ReqwestSiteProber {
    client: Client,
}

impl ReqwestSiteProber {
    pub fn new() -> Result<Self, FetchError> {
        Ok(Self {
            client: build_client(None)?,
        })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SiteProber for ReqwestSiteProber {
    async fn probe(
        &self,
        locator: &Url,
        method: ProbeMethod,
        timeout: Duration,
    ) -> Result<ProbeResponse, FetchError> {
        let builder = match method {
            ProbeMethod::Head => self.client.head(locator.as_str()),
            ProbeMethod::Get => self.client.get(locator.as_str()),
        };
        let response = builder.timeout(timeout).send().await.map_err(transport_error)?;
        let (status, headers, body) = read_response(response).await?;
        Ok(ProbeResponse { status, headers, body })
    }
}

/// Health probe: `GET` a check URL through the proxy, healthy on `200`.
pub struct ReqwestProxyHealthChecker {
    check_url: String,
    timeout: Duration,
}

impl ReqwestProxyHealthChecker {
    pub fn new(check_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            check_url: check_url.into(),
            timeout,
        }
    }
}

impl Default for ReqwestProxyHealthChecker {
    fn default() -> Self {
        Self::new("http://httpbin.org/ip", Duration::from_secs(10))
    }
}

#[async_trait]
impl ProxyHealthChecker for ReqwestProxyHealthChecker {
    async fn check(&self, proxy: &ProxyRecord) -> Result<(), String> {
        let client = build_client(Some(proxy)).map_err(|err| err.to_string())?;
        let response = client
            .get(&self.check_url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| err.to_string())?;
        match response.status().as_u16() {
            200 => Ok(()),
            status => Err(format!("Status: {status}")),
        }
    }
}

/// Clients are shared across workflows, so they carry no cookie store.
fn build_client(proxy: Option<&ProxyRecord>) -> Result<Client, FetchError> {
    let mut builder = Client::builder();
    if let Some(record) = proxy {
        let endpoint = reqwest::Proxy::all(record.url())
            .map_err(|err| FetchError::InvalidProxy(format!("{}: {err}", record.endpoint())))?;
        builder = builder.proxy(endpoint);
    }
    builder
        .build()
        .map_err(|err| FetchError::Transport(err.to_string()))
}

/// Strategy headers minus `Accept-Encoding`, which reqwest negotiates itself so
/// that compressed bodies are decoded.
fn request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut headers = headers.clone();
    headers.remove(ACCEPT_ENCODING);
    headers
}

fn transport_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Transport(format!("timeout: {err}"))
    } else {
        FetchError::Transport(err.to_string())
    }
}

async fn read_response(response: reqwest::Response) -> Result<(u16, HeaderMap, String), FetchError> {
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let body = response
        .bytes()
        .await
        .map_err(|err| FetchError::Body(err.to_string()))?;
    Ok((status, headers, String::from_utf8_lossy(&body).into_owned()))
}
