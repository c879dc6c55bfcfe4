//! Live Fetcher
//!
//! Issues real HTTP requests with a blocking reqwest client. Each request
//! runs on smol's blocking pool so the engine's executor keeps polling.

use nav_prefetch::{FetchError, FetchRequest, FetchResponse, Fetcher, Method};
use std::time::Duration;
use tracing::debug;

pub struct LiveFetcher {
    client: reqwest::blocking::Client,
}

impl LiveFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

fn send(client: &reqwest::blocking::Client, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
    let mut builder = match request.method {
        Method::Get => client.get(&request.url),
        Method::Head => client.head(&request.url),
    };
    for (key, value) in &request.headers {
        builder = builder.header(key.as_str(), value.as_str());
    }
    if request.timeout_ms > 0 {
        builder = builder.timeout(Duration::from_millis(request.timeout_ms));
    }

    let response = builder
        .send()
        .map_err(|e| FetchError::Network(e.to_string()))?;

    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect();
    let body = response
        .bytes()
        .map_err(|e| FetchError::Network(e.to_string()))?
        .to_vec();

    Ok(FetchResponse { status, headers, body })
}

impl Fetcher for LiveFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let client = self.client.clone();
        debug!(url = %request.url, "live fetch");
        smol::unblock(move || send(&client, &request)).await
    }
}
