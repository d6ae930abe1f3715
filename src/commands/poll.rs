use crate::api::{ApiError, PollApi};
use crate::models::{NewPoll, Poll};
use log::{error, info};
use thiserror::Error;

pub const FILL_ALL_FIELDS_MESSAGE: &str = "Please fill in all fields";
pub const MIN_OPTIONS: usize = 2;

#[derive(Debug, Error)]
pub enum FormError {
    #[error("Please fill in all fields")]
    MissingFields,

    #[error("option {0} does not exist")]
    NoSuchOption(usize),

    #[error("a poll needs at least two options")]
    TooFewOptions,

    #[error("failed to create poll: {0}")]
    Api(#[from] ApiError),
}

// A created poll and the link to hand out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPoll {
    pub poll: Poll,
    pub share_url: String,
}

/// The "new poll" form: a question plus at least two options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePollForm {
    question: String,
    options: Vec<String>,
}

impl Default for CreatePollForm {
    fn default() -> Self {
        Self {
            question: String::new(),
            options: vec![String::new(); MIN_OPTIONS],
        }
    }
}

impl CreatePollForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn set_question(&mut self, question: &str) {
        self.question = question.to_string();
    }

    pub fn set_option(&mut self, index: usize, text: &str) -> Result<(), FormError> {
        let option = self.options.get_mut(index).ok_or(FormError::NoSuchOption(index))?;
        *option = text.to_string();
        Ok(())
    }

    pub fn add_option(&mut self) {
        self.options.push(String::new());
    }

    // Options can only be removed while more than the minimum remain
    pub fn remove_option(&mut self, index: usize) -> Result<(), FormError> {
        if self.options.len() <= MIN_OPTIONS {
            return Err(FormError::TooFewOptions);
        }
        if index >= self.options.len() {
            return Err(FormError::NoSuchOption(index));
        }
        self.options.remove(index);
        Ok(())
    }

    /// Request body for the current form, or the reason it can't be sent yet.
    pub fn validate(&self) -> Result<NewPoll, FormError> {
        if self.question.trim().is_empty() || self.options.iter().any(|option| option.trim().is_empty()) {
            return Err(FormError::MissingFields);
        }
        Ok(NewPoll {
            question: self.question.trim().to_string(),
            options: self.options.iter().map(|option| option.trim().to_string()).collect(),
        })
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub async fn submit(&self, api: &PollApi, origin: &str) -> Result<CreatedPoll, FormError> {
        // nothing goes over the wire for an incomplete form
        let new_poll = self.validate()?;

        let poll = match api.create_poll(&new_poll).await {
            Ok(poll) => poll,
            Err(e) => {
                error!("Failed to create poll: {}", e);
                return Err(e.into());
            }
        };
        let share_url = super::share_url(origin, &poll.id);
        info!("Created poll {} ({})", poll.id, share_url);

        Ok(CreatedPoll { poll, share_url })
    }
}
