//! Sends prepared requests through reqwest.

use anyhow::{Context, Result};
use bytes::Bytes;
use log::debug;
use reqwest::header::WWW_AUTHENTICATE;
use reqwest::{Client, Response, StatusCode};

use crate::auth::{Auth, DigestChallenge};
use crate::request::PreparedRequest;

/// HTTP client that applies the retry policy and answers digest challenges.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a new HTTP client wrapping the given reqwest Client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// A client identifying itself as `caller/<version>`.
    pub fn with_default_client() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("caller/", env!("CALLER_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::new(client))
    }

    /// Sends the request. With a retry policy every attempt must return a
    /// success status; without one the response is returned whatever its status.
    #[tracing::instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn execute(&self, request: &PreparedRequest) -> Result<Response> {
        let attachment = match &request.attachment {
            Some(attachment) => Some(attachment.content().load().await?),
            None => None,
        };

        match &request.retry {
            Some(policy) => {
                let operation_name = format!("{} {}", request.method, request.url);
                policy
                    .run(&operation_name, || async {
                        let response = self.send_once(request, attachment.as_ref()).await?;
                        Ok(response.error_for_status()?)
                    })
                    .await
            }
            None => self.send_once(request, attachment.as_ref()).await,
        }
    }

    async fn send_once(
        &self,
        request: &PreparedRequest,
        attachment: Option<&Bytes>,
    ) -> Result<Response> {
        debug!("{} {}...", request.method, request.url);

        let response = request
            .build(&self.client, attachment, None)?
            .send()
            .await
            .context("Failed to send request")?;

        let Auth::Digest { user, password } = &request.auth else {
            return Ok(response);
        };
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(DigestChallenge::parse);

        let Some(challenge) = challenge else {
            debug!("401 without a usable digest challenge");
            return Ok(response);
        };

        debug!("Answering digest challenge for realm '{}'", challenge.realm);
        let authorization =
            challenge.authorization(request.method.as_str(), &request.url, user, password);

        request
            .build(&self.client, attachment, Some(&authorization))?
            .send()
            .await
            .context("Failed to send request")
    }
}
