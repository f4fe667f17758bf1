//! Pre-authenticated HTTP calls against a named service.
//!
//! A [`Caller`] snapshots one service's configuration and turns each verb call
//! into an immutable [`PreparedRequest`]: service headers and cookies merged
//! with the call's overrides, authentication unless the call is public, the
//! retry policy, the body encoding and the pending attachment, if any.

use anyhow::{Result, bail};
use log::debug;
use reqwest::{Method, Response};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::attachment::Attachment;
use crate::auth::{Auth, Credentials};
use crate::config::{ServiceConfig, ServiceConfigStore};
use crate::cookies::CookieSet;
use crate::dump::RequestDump;
use crate::http::{HttpClient, RetryPolicy, RetryWhen};
use crate::request::{self, BodyMode, PreparedRequest};

/// Per-call overrides. The default sends JSON, authenticated, with no extra
/// headers or cookies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub as_form: bool,
    pub is_public: bool,
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    pub debug: bool,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send the body as `application/x-www-form-urlencoded`.
    pub fn as_form(mut self, as_form: bool) -> Self {
        self.as_form = as_form;
        self
    }

    /// Skip the service's authentication.
    pub fn public(mut self, is_public: bool) -> Self {
        self.is_public = is_public;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    /// Assemble the request but return it instead of sending it.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Result of a verb call.
#[derive(Debug)]
pub enum Reply {
    Sent(Response),
    /// Debug mode: the request that would have been sent.
    DryRun(RequestDump),
}

impl Reply {
    pub fn into_response(self) -> Result<Response> {
        match self {
            Reply::Sent(response) => Ok(response),
            Reply::DryRun(dump) => {
                bail!("Request was not sent (debug mode): {} {}", dump.method, dump.url)
            }
        }
    }

    pub fn dry_run(&self) -> Option<&RequestDump> {
        match self {
            Reply::DryRun(dump) => Some(dump),
            Reply::Sent(_) => None,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self, Reply::DryRun(_))
    }
}

/// Later values win. Header names compare case-insensitively.
fn merge_headers(
    defaults: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged: BTreeMap<String, String> = defaults
        .iter()
        .filter(|(name, _)| !overrides.keys().any(|o| o.eq_ignore_ascii_case(name)))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

fn merge_cookies(
    defaults: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = defaults.clone();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// HTTP client bound to one configured service.
///
/// Credential overrides and the attachment slot live on the caller, so verbs
/// take `&mut self`: one caller serves one logical sequence of calls.
pub struct Caller {
    store: Arc<ServiceConfigStore>,
    service: ServiceConfig,
    credentials: Credentials,
    attachment: Option<Attachment>,
    retry_when: RetryWhen,
    http: HttpClient,
}

impl Caller {
    pub fn new(store: Arc<ServiceConfigStore>, service: &str) -> Result<Self> {
        Ok(Self::with_client(store, service, HttpClient::with_default_client()?))
    }

    pub fn with_client(store: Arc<ServiceConfigStore>, service: &str, http: HttpClient) -> Self {
        let config = store.load(service);
        let credentials = credentials_of(&config);
        Self {
            store,
            service: config,
            credentials,
            attachment: None,
            retry_when: RetryWhen::default(),
            http,
        }
    }

    /// The resolved service configuration.
    pub fn service(&self) -> &ServiceConfig {
        &self.service
    }

    /// Re-resolves the service. Credential overrides are replaced by the new
    /// service's credentials.
    pub fn set_service(&mut self, service: &str) -> &mut Self {
        self.service = self.store.load(service);
        self.credentials = credentials_of(&self.service);
        debug!("Switched to service '{}'", self.service.name);
        self
    }

    pub fn set_auth_user(&mut self, user: impl Into<String>) -> &mut Self {
        self.credentials.user = user.into();
        self
    }

    pub fn set_auth_password(&mut self, password: impl Into<String>) -> &mut Self {
        self.credentials.password = password.into();
        self
    }

    pub fn set_auth_token(&mut self, token: impl Into<String>) -> &mut Self {
        self.credentials.token = token.into();
        self
    }

    /// Queues a file for the next request only. Replaces any pending attachment.
    pub fn set_attachment(&mut self, attachment: Attachment) -> &mut Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn has_attachment(&self) -> bool {
        self.attachment.is_some()
    }

    /// Decides which failures count toward the service's retries.
    pub fn set_retry_when(&mut self, when: RetryWhen) -> &mut Self {
        self.retry_when = when;
        self
    }

    /// Authentication for the current service and credentials.
    pub fn configure_auth(&self) -> Auth {
        Auth::configure(
            &self.service.auth.kind,
            &self.credentials,
            &self.service.auth.token_type,
        )
    }

    /// Assembles a request. Takes the pending attachment.
    pub fn prepare<P: Serialize + ?Sized>(
        &mut self,
        method: Method,
        path: &str,
        params: &P,
        options: &CallOptions,
    ) -> Result<PreparedRequest> {
        let params = request::params_to_map(params)?;
        let mut url = request::join_url(&self.service.url, path)?;

        let in_query = request::params_in_query(&method);
        let body_params = if in_query {
            if !params.is_empty() {
                url.query_pairs_mut()
                    .extend_pairs(request::form_pairs(&params));
            }
            serde_json::Map::new()
        } else {
            params
        };

        let headers = merge_headers(&self.service.headers, &options.headers);
        let cookies = CookieSet::new(
            merge_cookies(&self.service.cookies, &options.cookies),
            &self.service.cookies_domain,
        );

        let auth = if options.is_public {
            Auth::None
        } else {
            self.configure_auth()
        };

        let retry = (self.service.retries > 0).then(|| {
            RetryPolicy::new(self.service.retries, self.service.retry_delay())
                .when(self.retry_when.clone())
        });

        let attachment = self.attachment.take();
        let body = if attachment.is_some() {
            BodyMode::Multipart
        } else if options.as_form {
            BodyMode::Form
        } else {
            BodyMode::Json
        };

        Ok(PreparedRequest {
            method,
            url,
            body_params,
            headers,
            cookies,
            auth,
            retry,
            body,
            attachment,
            timeout: self.service.timeout(),
        })
    }

    /// Prepares and sends a request, or returns its dump in debug mode.
    #[tracing::instrument(skip(self, params, options), fields(service = %self.service.name))]
    pub async fn call<P: Serialize + ?Sized>(
        &mut self,
        method: Method,
        path: &str,
        params: &P,
        options: CallOptions,
    ) -> Result<Reply> {
        let prepared = self.prepare(method, path, params, &options)?;

        if options.debug {
            let dump = prepared.dump();
            debug!("Debug mode, not sending:\n{}", dump);
            return Ok(Reply::DryRun(dump));
        }

        let response = self.http.execute(&prepared).await?;
        Ok(Reply::Sent(response))
    }

    pub async fn head<P: Serialize + ?Sized>(
        &mut self,
        path: &str,
        params: &P,
        options: CallOptions,
    ) -> Result<Reply> {
        self.call(Method::HEAD, path, params, options).await
    }

    pub async fn get<P: Serialize + ?Sized>(
        &mut self,
        path: &str,
        params: &P,
        options: CallOptions,
    ) -> Result<Reply> {
        self.call(Method::GET, path, params, options).await
    }

    pub async fn post<P: Serialize + ?Sized>(
        &mut self,
        path: &str,
        params: &P,
        options: CallOptions,
    ) -> Result<Reply> {
        self.call(Method::POST, path, params, options).await
    }

    pub async fn put<P: Serialize + ?Sized>(
        &mut self,
        path: &str,
        params: &P,
        options: CallOptions,
    ) -> Result<Reply> {
        self.call(Method::PUT, path, params, options).await
    }

    pub async fn patch<P: Serialize + ?Sized>(
        &mut self,
        path: &str,
        params: &P,
        options: CallOptions,
    ) -> Result<Reply> {
        self.call(Method::PATCH, path, params, options).await
    }

    pub async fn delete<P: Serialize + ?Sized>(
        &mut self,
        path: &str,
        params: &P,
        options: CallOptions,
    ) -> Result<Reply> {
        self.call(Method::DELETE, path, params, options).await
    }
}

fn credentials_of(config: &ServiceConfig) -> Credentials {
    Credentials {
        user: config.auth.user.clone(),
        password: config.auth.password.clone(),
        token: config.auth.token.clone(),
    }
}
