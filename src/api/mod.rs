use crate::models::{NewPoll, Poll};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{StatusCode, Url};
use thiserror::Error;

// Shown for every fetch failure, whatever the cause
pub const FETCH_FAILED_MESSAGE: &str = "Poll not found or server error.";
pub const CREATE_FAILED_MESSAGE: &str = "Failed to create poll";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("backend url {0} cannot be used as a base")]
    InvalidBaseUrl(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("poll {0} not found")]
    NotFound(String),

    #[error("server responded with {0}")]
    Status(StatusCode),

    #[error("request interrupted: {0}")]
    Interrupted(String),
}

/// Anything that can produce the current snapshot of a poll.
#[async_trait]
pub trait PollSource: Send + Sync {
    async fn get_poll(&self, poll_id: &str) -> Result<Poll, ApiError>;
}

/// REST client for `<backend>/api/polls`.
pub struct PollApi {
    client: reqwest::Client,
    base: Url,
}

impl PollApi {
    pub fn new(backend_url: &Url) -> Result<Self, ApiError> {
        if backend_url.cannot_be_a_base() {
            return Err(ApiError::InvalidBaseUrl(backend_url.to_string()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base: backend_url.clone(),
        })
    }

    // `<backend>/api/polls[/<id>]`, keeping any path prefix the backend is mounted under
    fn polls_url(&self, poll_id: Option<&str>) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ApiError::InvalidBaseUrl(self.base.to_string()))?;
            segments.pop_if_empty().extend(["api", "polls"]);
            if let Some(id) = poll_id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    pub async fn create_poll(&self, new_poll: &NewPoll) -> Result<Poll, ApiError> {
        let url = self.polls_url(None)?;
        debug!("Creating poll at {} with {} options", url, new_poll.options.len());

        let resp = self.client.post(url).json(new_poll).send().await?;
        if !resp.status().is_success() {
            warn!("Poll creation rejected with status {}", resp.status());
            return Err(ApiError::Status(resp.status()));
        }

        Ok(resp.json::<Poll>().await?)
    }
}

#[async_trait]
impl PollSource for PollApi {
    async fn get_poll(&self, poll_id: &str) -> Result<Poll, ApiError> {
        let url = self.polls_url(Some(poll_id))?;
        debug!("Fetching poll from {}", url);

        let resp = self.client.get(url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(poll_id.to_string()));
        }
        if !resp.status().is_success() {
            return Err(ApiError::Status(resp.status()));
        }

        Ok(resp.json::<Poll>().await?)
    }
}
