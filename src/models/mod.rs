use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// The backend is document-store flavoured and names ids `_id`; plain `id` is accepted too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub question: String,
    pub options: Vec<PollOption>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub votes: u64,
}

// Body of `POST /api/polls`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPoll {
    pub question: String,
    pub options: Vec<String>,
}

// Payload of the `vote` channel event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub poll_id: String,
    pub option_id: String,
}

/// Payload of the server's `error` channel event.
///
/// `code` is the stable classification; `message` is for humans. Older servers
/// only send `message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Poll {
    pub fn total_votes(&self) -> u64 {
        self.options.iter().map(|option| option.votes).sum()
    }

    pub fn option(&self, option_id: &str) -> Option<&PollOption> {
        self.options.iter().find(|option| option.id == option_id)
    }

    // Ids are expected to be unique but snapshots are rendered as received either way
    pub fn has_unique_option_ids(&self) -> bool {
        let mut seen = HashSet::new();
        self.options.iter().all(|option| seen.insert(option.id.as_str()))
    }
}

#[cfg(test)]
pub(crate) fn sample_poll(id: &str, counts: &[(&str, &str, u64)]) -> Poll {
    Poll {
        id: id.to_string(),
        question: "Tea or coffee?".to_string(),
        options: counts
            .iter()
            .map(|(option_id, text, votes)| PollOption {
                id: option_id.to_string(),
                text: text.to_string(),
                votes: *votes,
            })
            .collect(),
    }
}
