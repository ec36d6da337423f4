//! Reverse-proxy liveness check run at the end of `setup`.

use crate::config::ProxyConfig;
use serde::Serialize;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LivenessReport {
    pub url: String,
    pub status_code: Option<u16>,
    pub healthy: bool,
    pub detail: String,
}

pub fn proxy_health_url(proxy: &ProxyConfig) -> String {
    let path = if proxy.health_path.starts_with('/') {
        proxy.health_path.clone()
    } else {
        format!("/{}", proxy.health_path)
    };
    format!("http://localhost:{}{path}", proxy.health_port)
}

/// GET `url`; healthy means HTTP 200 with a JSON body whose `status` is
/// `"healthy"`. Never fails: transport problems are reported in `detail`.
pub fn probe(url: &str, timeout: Duration) -> LivenessReport {
    let agent = ureq::AgentBuilder::new().timeout(timeout).build();
    let report = |status_code, healthy, detail: String| LivenessReport {
        url: url.to_string(),
        status_code,
        healthy,
        detail,
    };

    match agent.get(url).call() {
        Ok(resp) => {
            let code = resp.status();
            match resp.into_json::<serde_json::Value>() {
                Ok(body) => {
                    let status = body
                        .get("status")
                        .and_then(|s| s.as_str())
                        .unwrap_or_default()
                        .to_string();
                    let healthy = code == 200 && status == "healthy";
                    report(Some(code), healthy, format!("status: {status}"))
                }
                Err(e) => report(Some(code), false, format!("unreadable body: {e}")),
            }
        }
        Err(ureq::Error::Status(code, _)) => report(Some(code), false, format!("HTTP {code}")),
        Err(e) => report(None, false, e.to_string()),
    }
}
