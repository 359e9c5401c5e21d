//! HTTP client for the agent backend.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, TransportError};

/// Body of `POST /api/run`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// Catalog task identifier.
    pub task_id: String,
    /// The user's question.
    pub prompt: String,
    /// Clinical context for the task.
    pub context: String,
}

/// A predefined question exposed by the legacy backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub question: String,
}

/// What a streaming session connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedRequest {
    /// Modern body-mode stream from `POST /api/run`.
    Run(RunRequest),
    /// Legacy event stream from `GET /run_agent?question_id=<id>`.
    Legacy {
        /// Identifier from `GET /questions`.
        question_id: String,
    },
}

impl FeedRequest {
    /// Legacy feeds are never restarted: a replay would push duplicate frames
    /// into the playback queue.
    #[must_use]
    pub fn allows_retry(&self) -> bool {
        matches!(self, Self::Run(_))
    }
}

/// Client for the run and legacy endpoints.
///
/// # Example
///
/// ```rust,no_run
/// use sara_stream::transport::{ApiClient, RunRequest};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = ApiClient::new("http://localhost:8000", "http://localhost:8080")?;
/// let response = client
///     .open_run(&RunRequest {
///         task_id: "task1".into(),
///         prompt: "What's the MRN of Peter Stafford?".into(),
///         context: String::new(),
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: Url,
    legacy_base_url: Url,
    http: reqwest::Client,
}

impl ApiClient {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the run API (e.g. "http://localhost:8000")
    /// * `legacy_base_url` - Base URL of the legacy question/run_agent API
    pub fn new(base_url: impl AsRef<str>, legacy_base_url: impl AsRef<str>) -> Result<Self> {
        Self::with_client(base_url, legacy_base_url, reqwest::Client::new())
    }

    /// Create a new client with a custom reqwest client.
    pub fn with_client(
        base_url: impl AsRef<str>,
        legacy_base_url: impl AsRef<str>,
        http: reqwest::Client,
    ) -> Result<Self> {
        Ok(Self {
            base_url: Url::parse(base_url.as_ref())?,
            legacy_base_url: Url::parse(legacy_base_url.as_ref())?,
            http,
        })
    }

    /// Get the base URL of the run API.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Open the event stream for a request and return the response once its
    /// headers arrived with a success status.
    pub async fn open(&self, request: &FeedRequest) -> Result<reqwest::Response> {
        match request {
            FeedRequest::Run(run) => self.open_run(run).await,
            FeedRequest::Legacy { question_id } => self.open_legacy(question_id).await,
        }
    }

    /// `POST /api/run`.
    pub async fn open_run(&self, request: &RunRequest) -> Result<reqwest::Response> {
        let response = self
            .http
            .post(join(&self.base_url, "/api/run"))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;
        check_status(response).await
    }

    /// `GET /run_agent?question_id=<id>`.
    pub async fn open_legacy(&self, question_id: &str) -> Result<reqwest::Response> {
        let mut url = join(&self.legacy_base_url, "/run_agent");
        url.query_pairs_mut().append_pair("question_id", question_id);
        let response = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        check_status(response).await
    }

    /// `GET /questions`.
    pub async fn questions(&self) -> Result<Vec<Question>> {
        let response = self
            .http
            .get(join(&self.legacy_base_url, "/questions"))
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }
}

fn join(base: &Url, path: &str) -> Url {
    base.join(path).unwrap_or_else(|_| base.clone())
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Status {
        status: status.as_u16(),
        body,
    })
}
