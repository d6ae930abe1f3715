use crate::models::Poll;
use log::info;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VoteError {
    #[error("option {0} is not part of this poll")]
    UnknownOption(String),

    #[error("a vote was already submitted")]
    AlreadySubmitted,

    #[error("no option selected")]
    NothingSelected,
}

/// Selection state of the vote form. Once submitted, the form is locked and
/// further submissions yield nothing.
#[derive(Debug, Default)]
pub struct VoteForm {
    selected: Option<String>,
    submitted: bool,
}

impl VoteForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    // The submit control is live only with a selection and before the first submission
    pub fn can_submit(&self) -> bool {
        self.selected.is_some() && !self.submitted
    }

    pub fn select(&mut self, poll: &Poll, option_id: &str) -> Result<(), VoteError> {
        if self.submitted {
            return Err(VoteError::AlreadySubmitted);
        }
        if poll.option(option_id).is_none() {
            return Err(VoteError::UnknownOption(option_id.to_string()));
        }
        self.selected = Some(option_id.to_string());
        Ok(())
    }

    /// Lock the form and hand out the selected option id.
    pub fn submit(&mut self) -> Result<String, VoteError> {
        if self.submitted {
            return Err(VoteError::AlreadySubmitted);
        }
        let option_id = self.selected.clone().ok_or(VoteError::NothingSelected)?;
        info!("Submitting vote for option {}", option_id);
        self.submitted = true;
        Ok(option_id)
    }

    // Unlock after a submission that never left the client
    pub fn reopen(&mut self) {
        self.submitted = false;
    }
}
