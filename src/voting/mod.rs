pub mod chart;

use crate::models::Poll;

// Bar palette, assigned by option position and wrapping around
pub const COLORS: [&str; 6] = ["#6366f1", "#8b5cf6", "#ec4899", "#f43f5e", "#f59e0b", "#10b981"];

// Results of one poll snapshot, in the poll's option order
#[derive(Debug, Clone, PartialEq)]
pub struct PollResults {
    pub question: String,
    pub total_votes: u64,
    pub rows: Vec<VoteCount>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoteCount {
    pub option_id: String,
    pub option_text: String,
    pub votes: u64,
    pub percentage: u32,
    pub color: &'static str,
}

/// Share of `votes` in `total`, rounded to a whole percent. Zero when nobody voted.
pub fn percentage(votes: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    ((votes as f64 / total as f64) * 100.0).round() as u32
}

pub fn calculate_results(poll: &Poll) -> PollResults {
    let total_votes = poll.total_votes();
    let rows = poll
        .options
        .iter()
        .enumerate()
        .map(|(i, option)| VoteCount {
            option_id: option.id.clone(),
            option_text: option.text.clone(),
            votes: option.votes,
            percentage: percentage(option.votes, total_votes),
            color: COLORS[i % COLORS.len()],
        })
        .collect();

    PollResults {
        question: poll.question.clone(),
        total_votes,
        rows,
    }
}
