//! Outbound request construction and delivery.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::config::HttpConfig;
use crate::envelope::{Envelope, Header, Operation};
use crate::error::{RelayError, RelayResult};

/// Header carrying the resolved credential.
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Result of one relay attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayOutcome {
    /// The target answered with a status outside 4xx/5xx.
    Delivered(u16),
    /// The target answered with a 4xx/5xx status.
    RejectedByTarget(u16),
    /// No status code was obtained.
    TransportFailure(String),
    /// The envelope could not be parsed.
    Malformed(String),
    /// The envelope's credential could not be resolved.
    CredentialUnavailable(String),
}

impl RelayOutcome {
    /// Classifies a response status code.
    pub fn from_status(status: u16) -> Self {
        if (400..600).contains(&status) {
            RelayOutcome::RejectedByTarget(status)
        } else {
            RelayOutcome::Delivered(status)
        }
    }

    /// Maps a pipeline error onto the outcome it represents.
    pub fn from_error(err: &RelayError) -> Self {
        match err {
            RelayError::MalformedEnvelope(reason) => RelayOutcome::Malformed(reason.clone()),
            RelayError::CredentialUnavailable(reason) => {
                RelayOutcome::CredentialUnavailable(reason.clone())
            }
            RelayError::TargetRejected(status) => RelayOutcome::RejectedByTarget(*status),
            RelayError::TransportFailure(cause) => RelayOutcome::TransportFailure(cause.clone()),
            other => RelayOutcome::TransportFailure(other.to_string()),
        }
    }

    /// Whether the message reached its target.
    pub fn is_delivered(&self) -> bool {
        matches!(self, RelayOutcome::Delivered(_))
    }

    /// Returns the error this outcome represents, `None` when delivered.
    pub fn to_error(&self) -> Option<RelayError> {
        match self {
            RelayOutcome::Delivered(_) => None,
            RelayOutcome::RejectedByTarget(status) => Some(RelayError::TargetRejected(*status)),
            RelayOutcome::TransportFailure(cause) => Some(RelayError::TransportFailure(cause.clone())),
            RelayOutcome::Malformed(reason) => Some(RelayError::MalformedEnvelope(reason.clone())),
            RelayOutcome::CredentialUnavailable(reason) => {
                Some(RelayError::CredentialUnavailable(reason.clone()))
            }
        }
    }

    /// Returns the response status, if one was obtained.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RelayOutcome::Delivered(status) | RelayOutcome::RejectedByTarget(status) => Some(*status),
            _ => None,
        }
    }
}

/// A fully constructed outbound request, independent of the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPlan {
    /// HTTP operation.
    pub operation: Operation,
    /// Target URL.
    pub url: String,
    /// Headers in envelope order, duplicates kept. On the wire the transport
    /// groups repeated names together, so only per-name order survives there.
    pub headers: Vec<Header>,
    /// Body, absent for DELETE.
    pub body: Option<String>,
}

impl RequestPlan {
    /// Builds the request for an envelope.
    ///
    /// User headers keep their order and duplicates; the credential, when
    /// present, is appended last as `Authorization`. The sent request keeps
    /// the relative order of values sharing a name, not the order across names.
    pub fn new(envelope: &Envelope, token: Option<&str>) -> Self {
        let mut headers = envelope.headers.clone();
        if let Some(token) = token {
            headers.push(Header::new(AUTHORIZATION_HEADER, token));
        }

        Self {
            operation: envelope.operation,
            url: envelope.target_url.clone(),
            headers,
            body: envelope.body(),
        }
    }
}

fn method(operation: Operation) -> reqwest::Method {
    match operation {
        Operation::Put => reqwest::Method::PUT,
        Operation::Post => reqwest::Method::POST,
        Operation::Delete => reqwest::Method::DELETE,
    }
}

/// Issues outbound calls. One attempt per call; never retries.
#[derive(Clone)]
pub struct Dispatcher {
    client: reqwest::Client,
}

impl Dispatcher {
    /// Creates a dispatcher with the given transport settings.
    ///
    /// Redirects are never followed: a 3xx answer is the outcome.
    pub fn new(config: &HttpConfig) -> RelayResult<Self> {
        let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
        if let Some(ms) = config.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        let client = builder
            .build()
            .map_err(|e| RelayError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(client))
    }

    /// Creates a dispatcher over an existing client. The client's redirect
    /// policy is used as-is.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Delivers an envelope.
    pub async fn dispatch(&self, envelope: &Envelope, token: Option<&str>) -> RelayOutcome {
        self.send(&RequestPlan::new(envelope, token)).await
    }

    /// Sends a prepared request and classifies the response.
    pub async fn send(&self, plan: &RequestPlan) -> RelayOutcome {
        let start = Instant::now();

        let mut request = self.client.request(method(plan.operation), plan.url.as_str());
        for header in &plan.headers {
            request = request.header(header.name.as_str(), header.value.as_str());
        }
        if let Some(body) = &plan.body {
            request = request.body(body.clone());
        }

        let outcome = match request.send().await {
            Ok(response) => RelayOutcome::from_status(response.status().as_u16()),
            Err(e) => RelayOutcome::TransportFailure(RelayError::from(e).to_string()),
        };

        tracing::debug!(
            operation = %plan.operation,
            url = %plan.url,
            status = ?outcome.status_code(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "dispatched relay request"
        );

        outcome
    }
}
