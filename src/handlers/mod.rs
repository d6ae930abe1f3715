pub mod vote;

use crate::api::{ApiError, PollSource, FETCH_FAILED_MESSAGE};
use crate::channel::{ChannelError, ErrorKind, LiveChannel, ServerEvent, Subscription};
use crate::db::VoteStateStore;
use crate::models::{ErrorPayload, Poll};
use crate::tasks::FetchTask;
use crate::voting::{calculate_results, chart};
use log::{error, info, warn};
use std::sync::Arc;
use thiserror::Error;
use vote::{VoteError, VoteForm};

#[derive(Debug, Error)]
pub enum PageError {
    #[error("no poll id given")]
    MissingPollId,

    #[error("this view is not taking votes")]
    NotVoting,

    #[error(transparent)]
    Vote(#[from] VoteError),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Screen of a mounted poll view. `Results` is terminal for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewState {
    Loading,
    Failed(String),
    Voting,
    Results,
}

/// What changed after [`PollPage::next`], for the caller to re-render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageUpdate {
    Ready,
    Snapshot,
    Notice(String),
    Failed(String),
}

/// Something that arrived for the view and has not been applied yet.
#[derive(Debug)]
pub enum PageInput {
    Fetched(Result<Poll, ApiError>),
    Pushed(ServerEvent),
}

/// A mounted `/polls/<id>` view.
///
/// Mounting joins the poll's live updates and starts the initial fetch
/// concurrently. Voting is optimistic: the local vote state is written as
/// soon as the vote is emitted, without waiting for the server.
pub struct PollPage {
    poll_id: String,
    state: ViewState,
    poll: Option<Poll>,
    has_voted: bool,
    form: VoteForm,
    store: VoteStateStore,
    subscription: Subscription,
    fetch: FetchTask,
}

impl PollPage {
    pub async fn mount(
        poll_id: &str,
        source: Arc<dyn PollSource>,
        channel: &LiveChannel,
        store: VoteStateStore,
    ) -> Result<Self, PageError> {
        if poll_id.trim().is_empty() {
            return Err(PageError::MissingPollId);
        }
        info!("[PollPage] Mounting poll {}", poll_id);

        let subscription = channel.join(poll_id)?;
        let fetch = FetchTask::spawn(source, poll_id);

        let has_voted = match store.has_voted(poll_id).await {
            Ok(voted) => voted,
            Err(e) => {
                error!("[PollPage] Failed to read vote state for {}: {}", poll_id, e);
                false
            }
        };

        Ok(Self {
            poll_id: poll_id.to_string(),
            state: ViewState::Loading,
            poll: None,
            has_voted,
            form: VoteForm::new(),
            store,
            subscription,
            fetch,
        })
    }

    pub fn poll_id(&self) -> &str {
        &self.poll_id
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn poll(&self) -> Option<&Poll> {
        self.poll.as_ref()
    }

    pub fn has_voted(&self) -> bool {
        self.has_voted
    }

    pub fn form(&self) -> &VoteForm {
        &self.form
    }

    /// Wait for the fetch result or the next push without applying it.
    /// `None` once neither can produce anything anymore.
    ///
    /// Cancel-safe: dropping the future loses nothing, so it can sit in a
    /// `select!` next to terminal input. Hand the result to [`PollPage::apply`].
    pub async fn recv(&mut self) -> Option<PageInput> {
        loop {
            tokio::select! {
                fetched = self.fetch.join(), if self.fetch.is_pending() => {
                    return Some(PageInput::Fetched(fetched));
                }
                event = self.subscription.next_event(), if self.subscription.is_open() => {
                    match event {
                        Some(event) => return Some(PageInput::Pushed(event)),
                        None => warn!("[PollPage] Live updates for poll {} stopped", self.poll_id),
                    }
                }
                else => return None,
            }
        }
    }

    /// Apply what [`PollPage::recv`] produced. Must run to completion: a
    /// duplicate-vote rejection is persisted here.
    pub async fn apply(&mut self, input: PageInput) -> Option<PageUpdate> {
        match input {
            PageInput::Fetched(fetched) => self.apply_fetch(fetched),
            PageInput::Pushed(event) => self.apply_event(event).await,
        }
    }

    #[cfg(test)]
    pub(crate) async fn next(&mut self) -> Option<PageUpdate> {
        loop {
            let input = self.recv().await?;
            if let Some(update) = self.apply(input).await {
                return Some(update);
            }
        }
    }

    fn apply_fetch(&mut self, fetched: Result<Poll, ApiError>) -> Option<PageUpdate> {
        if self.state != ViewState::Loading {
            return None;
        }
        match fetched {
            Ok(poll) => {
                check_snapshot(&poll);
                self.poll = Some(poll);
                self.state = if self.has_voted {
                    ViewState::Results
                } else {
                    ViewState::Voting
                };
                info!("[PollPage] Poll {} ready ({:?})", self.poll_id, self.state);
                Some(PageUpdate::Ready)
            }
            Err(e) => {
                error!("[PollPage] Failed to fetch poll {}: {}", self.poll_id, e);
                // nothing left to show updates for
                self.subscription.teardown();
                self.state = ViewState::Failed(FETCH_FAILED_MESSAGE.to_string());
                Some(PageUpdate::Failed(FETCH_FAILED_MESSAGE.to_string()))
            }
        }
    }

    async fn apply_event(&mut self, event: ServerEvent) -> Option<PageUpdate> {
        match event {
            ServerEvent::UpdatePoll(poll) => {
                if matches!(self.state, ViewState::Failed(_)) {
                    return None;
                }
                check_snapshot(&poll);
                // whole snapshot replaces whatever is shown, last write wins
                self.poll = Some(poll);
                Some(PageUpdate::Snapshot)
            }
            ServerEvent::Error(payload) => Some(self.apply_error(payload).await),
        }
    }

    async fn apply_error(&mut self, payload: ErrorPayload) -> PageUpdate {
        match payload.kind() {
            ErrorKind::DuplicateVote => {
                warn!("[PollPage] Server rejected a duplicate vote on {}", self.poll_id);
                self.record_vote().await;
            }
            ErrorKind::Other => {
                warn!("[PollPage] Server error on {}: {}", self.poll_id, payload.message);
            }
        }
        PageUpdate::Notice(payload.notice())
    }

    async fn record_vote(&mut self) {
        self.has_voted = true;
        if self.state == ViewState::Voting {
            self.state = ViewState::Results;
        }
        if let Err(e) = self.store.mark_voted(&self.poll_id).await {
            error!("[PollPage] Failed to persist vote state for {}: {}", self.poll_id, e);
        }
    }

    pub fn select(&mut self, option_id: &str) -> Result<(), PageError> {
        if self.state != ViewState::Voting {
            return Err(PageError::NotVoting);
        }
        let poll = self.poll.as_ref().ok_or(PageError::NotVoting)?;
        self.form.select(poll, option_id)?;
        Ok(())
    }

    /// Emit the selected vote and switch to results without waiting for the server.
    pub async fn submit(&mut self) -> Result<(), PageError> {
        if self.state != ViewState::Voting {
            return Err(PageError::NotVoting);
        }
        let option_id = self.form.submit()?;
        if let Err(e) = self.subscription.submit_vote(&option_id) {
            self.form.reopen();
            return Err(e.into());
        }
        self.record_vote().await;
        Ok(())
    }

    pub async fn vote(&mut self, option_id: &str) -> Result<(), PageError> {
        self.select(option_id)?;
        self.submit().await
    }

    pub fn render(&self) -> String {
        match (&self.state, &self.poll) {
            (ViewState::Loading, _) => "Loading poll...".to_string(),
            (ViewState::Failed(message), _) => message.clone(),
            (ViewState::Voting, Some(poll)) => render_vote_form(poll, &self.form),
            (ViewState::Results, Some(poll)) => chart::render(&calculate_results(poll)),
            (_, None) => String::new(),
        }
    }

    /// Release the live channel and abandon the fetch. Safe to call more than once.
    pub fn teardown(&mut self) {
        self.fetch.cancel();
        self.subscription.teardown();
    }
}

impl Drop for PollPage {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn check_snapshot(poll: &Poll) {
    if !poll.has_unique_option_ids() {
        warn!("[PollPage] Poll {} has duplicate option ids", poll.id);
    }
}

fn render_vote_form(poll: &Poll, form: &VoteForm) -> String {
    let mut out = format!("{}\n\n", poll.question);
    for (i, option) in poll.options.iter().enumerate() {
        let marker = if form.selected() == Some(option.id.as_str()) { "(x)" } else { "( )" };
        out.push_str(&format!("  {}. {} {}\n", i + 1, marker, option.text));
    }
    out.push_str("\nEnter an option number to select it, then an empty line to vote.\n");
    out
}
