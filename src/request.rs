//! A fully assembled request, ready to be sent or dumped.

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use reqwest::header::{COOKIE, HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::attachment::Attachment;
use crate::auth::Auth;
use crate::cookies::CookieSet;
use crate::dump::RequestDump;
use crate::http::RetryPolicy;

/// How the request body is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    Json,
    Form,
    Multipart,
}

impl BodyMode {
    pub fn content_type(&self) -> &'static str {
        match self {
            BodyMode::Json => "application/json",
            BodyMode::Form => "application/x-www-form-urlencoded",
            BodyMode::Multipart => "multipart/form-data",
        }
    }
}

/// Whether `method` carries its params in the query string rather than the body.
pub fn params_in_query(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::DELETE)
}

/// Converts call params into a JSON object. `()`/`null` become an empty map.
pub fn params_to_map<P: Serialize + ?Sized>(params: &P) -> Result<Map<String, Value>> {
    match serde_json::to_value(params).context("Failed to serialize request params")? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => bail!("Request params must serialize to a map, got {}", other),
    }
}

/// Flattens params into `key=value` pairs, nesting as `a[b]` and `a[0]`.
pub fn form_pairs(params: &Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (key, value) in params {
        flatten(key.clone(), value, &mut pairs);
    }
    pairs
}

fn flatten(key: String, value: &Value, pairs: &mut Vec<(String, String)>) {
    match value {
        Value::Null => pairs.push((key, String::new())),
        Value::Bool(b) => pairs.push((key, if *b { "1" } else { "0" }.to_string())),
        Value::Number(n) => pairs.push((key, n.to_string())),
        Value::String(s) => pairs.push((key, s.clone())),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten(format!("{}[{}]", key, i), item, pairs);
            }
        }
        Value::Object(map) => {
            for (k, item) in map {
                flatten(format!("{}[{}]", key, k), item, pairs);
            }
        }
    }
}

/// Joins the service base URL and a request path with a single `/`.
pub fn join_url(base: &str, path: &str) -> Result<Url> {
    let raw = format!("{}/{}", base, path);
    Url::parse(&raw).with_context(|| format!("Invalid request URL '{}'", raw))
}

/// Everything needed to send one request. Built per call and never mutated.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    /// Includes the query string for query-param methods.
    pub url: Url,
    /// Params sent in the body; empty for query-param methods.
    pub body_params: Map<String, Value>,
    pub headers: BTreeMap<String, String>,
    pub cookies: CookieSet,
    pub auth: Auth,
    /// `None` when the service disables retry.
    pub retry: Option<RetryPolicy>,
    pub body: BodyMode,
    pub attachment: Option<Attachment>,
    /// `None` sends without a timeout.
    pub timeout: Option<Duration>,
}

impl PreparedRequest {
    /// Builds a reqwest request. `attachment` holds the loaded attachment bytes
    /// and `authorization` an answered digest challenge.
    pub fn build(
        &self,
        client: &Client,
        attachment: Option<&Bytes>,
        authorization: Option<&str>,
    ) -> Result<RequestBuilder> {
        let mut builder = client
            .request(self.method.clone(), self.url.clone())
            .headers(self.header_map()?);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        builder = self.auth.apply(builder);
        if let Some(value) = authorization {
            let mut value = HeaderValue::from_str(value).context("Invalid digest header")?;
            value.set_sensitive(true);
            builder = builder.header(reqwest::header::AUTHORIZATION, value);
        }

        builder = match self.body {
            BodyMode::Multipart => builder.multipart(self.multipart_form(attachment)),
            BodyMode::Form if !self.body_params.is_empty() => {
                builder.form(&form_pairs(&self.body_params))
            }
            BodyMode::Json if !self.body_params.is_empty() => builder.json(&self.body_params),
            BodyMode::Form | BodyMode::Json => builder,
        };

        Ok(builder)
    }

    fn header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("Invalid header name '{}'", name))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("Invalid value for header '{}'", name))?;
            map.insert(name, value);
        }

        // A Cookie header given per call is joined with the service cookies.
        if let Some(cookies) = self.cookies.header_for(&self.url) {
            let cookie = match map.get(COOKIE).and_then(|v| v.to_str().ok()) {
                Some(existing) if !existing.trim().is_empty() => {
                    format!("{}; {}", existing.trim().trim_end_matches(';'), cookies)
                }
                _ => cookies,
            };
            map.insert(
                COOKIE,
                HeaderValue::from_str(&cookie).context("Invalid cookie value")?,
            );
        }
        Ok(map)
    }

    fn multipart_form(&self, attachment: Option<&Bytes>) -> Form {
        let mut form = Form::new();
        for (key, value) in form_pairs(&self.body_params) {
            form = form.text(key, value);
        }
        if let (Some(meta), Some(data)) = (&self.attachment, attachment) {
            let part = Part::stream_with_length(data.clone(), data.len() as u64)
                .file_name(meta.filename().to_string());
            form = form.part(meta.name().to_string(), part);
        }
        form
    }

    pub fn dump(&self) -> RequestDump {
        RequestDump::from_request(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_params_in_query() {
        assert!(params_in_query(&Method::GET));
        assert!(params_in_query(&Method::HEAD));
        assert!(params_in_query(&Method::DELETE));
        assert!(!params_in_query(&Method::POST));
        assert!(!params_in_query(&Method::PUT));
        assert!(!params_in_query(&Method::PATCH));
    }

    #[test]
    fn test_params_to_map() {
        let map = params_to_map(&json!({"page": 1})).unwrap();
        assert_eq!(map.get("page"), Some(&json!(1)));

        assert!(params_to_map(&()).unwrap().is_empty());
        assert!(params_to_map(&[("a", "b")]).is_err());
        assert!(params_to_map("text").is_err());
    }

    #[test]
    fn test_params_to_map_from_btreemap() {
        let mut params = BTreeMap::new();
        params.insert("page", "1");
        let map = params_to_map(&params).unwrap();
        assert_eq!(map.get("page"), Some(&json!("1")));
    }

    #[test]
    fn test_form_pairs_flattens_nested_values() {
        let params = params_to_map(&json!({
            "name": "ada",
            "admin": true,
            "age": 36,
            "note": null,
            "tags": ["a", "b"],
            "address": {"city": "London"}
        }))
        .unwrap();

        let pairs = form_pairs(&params);
        let expected: Vec<(String, String)> = [
            ("address[city]", "London"),
            ("admin", "1"),
            ("age", "36"),
            ("name", "ada"),
            ("note", ""),
            ("tags[0]", "a"),
            ("tags[1]", "b"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(pairs, expected);
    }

    fn prepared(headers: &[(&str, &str)], cookies: &[(&str, &str)]) -> PreparedRequest {
        let map = |pairs: &[(&str, &str)]| -> BTreeMap<String, String> {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        };
        PreparedRequest {
            method: Method::GET,
            url: Url::parse("https://api.test/users").unwrap(),
            body_params: Map::new(),
            headers: map(headers),
            cookies: CookieSet::new(map(cookies), ""),
            auth: Auth::None,
            retry: None,
            body: BodyMode::Json,
            attachment: None,
            timeout: None,
        }
    }

    #[test]
    fn test_cookie_header_is_joined_into_one() {
        let request = prepared(&[("Cookie", "trace=1")], &[("session", "abc")]);
        let built = request
            .build(&Client::new(), None, None)
            .unwrap()
            .build()
            .unwrap();

        let cookies: Vec<_> = built.headers().get_all(COOKIE).iter().collect();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0], "trace=1; session=abc");
    }

    #[test]
    fn test_cookie_header_without_service_cookies_is_kept() {
        let request = prepared(&[("cookie", "trace=1")], &[]);
        let built = request
            .build(&Client::new(), None, None)
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(built.headers().get_all(COOKIE).iter().count(), 1);
        assert_eq!(built.headers().get(COOKIE).unwrap(), "trace=1");
    }

    #[test]
    fn test_no_timeout_in_dump() {
        let dump = prepared(&[], &[]).dump();
        assert_eq!(dump.timeout_secs, None);
        assert!(dump.to_string().contains("Timeout: none"));
    }

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("https://api.test", "users").unwrap().as_str(),
            "https://api.test/users"
        );
        assert_eq!(
            join_url("https://api.test/v1", "users/42").unwrap().as_str(),
            "https://api.test/v1/users/42"
        );
        assert!(join_url("", "users").is_err());
    }
}
