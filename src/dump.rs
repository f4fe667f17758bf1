//! Printable representation of a request that was not sent.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::request::PreparedRequest;

/// Header names whose values are masked in dumps.
const SENSITIVE_HEADERS: &[&str] = &["authorization", "proxy-authorization", "cookie", "x-api-key"];

/// Masks all but the first and last few characters of a secret.
pub fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 12 {
        return "*".repeat(chars.len().max(8));
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}*********{}", head, tail)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestDump {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    pub cookies_domain: String,
    pub auth: String,
    pub body: String,
    pub params: serde_json::Value,
    pub attachment: Option<(String, String)>,
    /// `None` when the request has no timeout.
    pub timeout_secs: Option<u64>,
    pub retry: Option<(u32, u128)>,
}

impl RequestDump {
    pub fn from_request(request: &PreparedRequest) -> Self {
        let headers = request
            .headers
            .iter()
            .map(|(name, value)| {
                let value = if SENSITIVE_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                    mask(value)
                } else {
                    value.clone()
                };
                (name.clone(), value)
            })
            .collect();

        let cookies = request
            .cookies
            .cookies()
            .iter()
            .map(|(name, value)| (name.clone(), mask(value)))
            .collect();

        Self {
            method: request.method.to_string(),
            url: request.url.to_string(),
            headers,
            cookies,
            cookies_domain: request.cookies.domain().to_string(),
            auth: request.auth.kind().to_string(),
            body: request.body.content_type().to_string(),
            params: serde_json::Value::Object(request.body_params.clone()),
            attachment: request
                .attachment
                .as_ref()
                .map(|a| (a.name().to_string(), a.filename().to_string())),
            timeout_secs: request.timeout.map(|t| t.as_secs()),
            retry: request
                .retry
                .as_ref()
                .map(|policy| (policy.attempts, policy.delay.as_millis())),
        }
    }
}

impl fmt::Display for RequestDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.method, self.url)?;
        for (name, value) in &self.headers {
            writeln!(f, "{}: {}", name, value)?;
        }
        if !self.cookies.is_empty() {
            let cookies: Vec<String> = self
                .cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect();
            writeln!(f, "Cookie: {} (domain: {})", cookies.join("; "), self.cookies_domain)?;
        }
        writeln!(f, "Auth: {}", self.auth)?;
        writeln!(f, "Body: {} {}", self.body, self.params)?;
        if let Some((name, filename)) = &self.attachment {
            writeln!(f, "Attachment: {} ({})", name, filename)?;
        }
        match self.timeout_secs {
            Some(secs) => write!(f, "Timeout: {}s", secs)?,
            None => write!(f, "Timeout: none")?,
        }
        if let Some((attempts, delay)) = self.retry {
            write!(f, ", retry {} times every {}ms", attempts, delay)?;
        }
        Ok(())
    }
}
