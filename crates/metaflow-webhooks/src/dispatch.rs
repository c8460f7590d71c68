//! `dispatch` (§4.7): one HTTP call, 30 s timeout, body omitted for GET,
//! response body truncated to `MAX_RESPONSE_BODY_BYTES`.

use std::collections::BTreeMap;
use std::time::Duration;

use metaflow_domain::{HttpMethod, MAX_RESPONSE_BODY_BYTES};
use reqwest::Client;
use serde_json::Value as JsonValue;

#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub status: u16,
    pub body: Option<String>,
    pub error: Option<String>,
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

pub async fn dispatch(
    client: &Client,
    url: &str,
    method: HttpMethod,
    headers: &BTreeMap<String, String>,
    body: &JsonValue,
) -> DispatchResult {
    let mut req = client
        .request(to_reqwest_method(method), url)
        .timeout(Duration::from_secs(metaflow_core::constants::WEBHOOK_TIMEOUT_SECS));

    for (name, value) in headers {
        req = req.header(name, value);
    }

    if method != HttpMethod::Get {
        req = req.header("Content-Type", "application/json").json(body);
    }

    match req.send().await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            let truncated = if text.len() > MAX_RESPONSE_BODY_BYTES {
                let mut end = MAX_RESPONSE_BODY_BYTES;
                while !text.is_char_boundary(end) {
                    end -= 1;
                }
                text[..end].to_string()
            } else {
                text
            };
            DispatchResult {
                status,
                body: Some(truncated),
                error: None,
            }
        }
        Err(e) => DispatchResult {
            status: 0,
            body: None,
            error: Some(e.to_string()),
        },
    }
}
