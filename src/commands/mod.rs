pub mod poll;

use crate::api::{PollApi, CREATE_FAILED_MESSAGE};
use crate::channel::LiveChannel;
use crate::db::VoteStateStore;
use crate::handlers::{PageInput, PageUpdate, PollPage, ViewState};
use console::style;
use lazy_static::lazy_static;
use log::{info, warn};
use percent_encoding::percent_decode_str;
use poll::{CreatePollForm, FormError, FILL_ALL_FIELDS_MESSAGE, MIN_OPTIONS};
use regex::Regex;
use reqwest::Url;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, Lines};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

lazy_static! {
    static ref POLL_ROUTE: Regex = Regex::new(r"^/polls/([^/?#]+)/?$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Home,
    Poll(String),
    NotFound(String),
}

impl Route {
    /// Accepts a path (`/polls/abc`) or a full share link. The poll id comes
    /// back percent-decoded.
    pub fn parse(target: &str) -> Self {
        let target = target.trim();
        let path = match Url::parse(target) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url.path().to_string(),
            _ => target.split(['?', '#']).next().unwrap_or_default().to_string(),
        };

        if path.is_empty() || path == "/" {
            return Route::Home;
        }
        match POLL_ROUTE.captures(&path) {
            Some(caps) => Route::Poll(percent_decode_str(&caps[1]).decode_utf8_lossy().into_owned()),
            None => Route::NotFound(path),
        }
    }
}

pub fn poll_path(poll_id: &str) -> String {
    format!("/polls/{}", poll_id)
}

pub fn share_url(origin: &str, poll_id: &str) -> String {
    format!("{}{}", origin.trim_end_matches('/'), poll_path(poll_id))
}

/// Everything the interactive screens share for the lifetime of the process.
pub struct App {
    pub api: Arc<PollApi>,
    pub channel: LiveChannel,
    pub store: VoteStateStore,
    pub origin: String,
}

pub async fn run<R, W>(app: &App, mut route: Route, input: &mut Lines<R>, out: &mut W) -> Result<(), BoxError>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    loop {
        match route {
            Route::Home => match run_home(app, input, out).await? {
                Some(next) => route = next,
                None => return Ok(()),
            },
            Route::Poll(poll_id) => return run_poll(app, &poll_id, input, out).await,
            Route::NotFound(path) => {
                warn!("No page at {}", path);
                writeln!(out, "Page not found: {}", path)?;
                return Ok(());
            }
        }
    }
}

async fn prompt<R, W>(input: &mut Lines<R>, out: &mut W, label: &str) -> Result<Option<String>, BoxError>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    write!(out, "{} ", label)?;
    out.flush()?;
    Ok(input.next_line().await?)
}

// A line typed while reviewing the creation form
#[derive(Debug, PartialEq, Eq)]
enum FormEdit {
    Submit,
    Add(String),
    Remove(usize),
    Replace(usize, String),
    Unknown,
}

fn parse_edit(line: &str) -> FormEdit {
    let line = line.trim();
    if line.is_empty() {
        return FormEdit::Submit;
    }
    if let Some(text) = line.strip_prefix('+') {
        return FormEdit::Add(text.trim().to_string());
    }
    if let Some(number) = line.strip_prefix('-') {
        return match number.trim().parse::<usize>().ok().and_then(|n| n.checked_sub(1)) {
            Some(index) => FormEdit::Remove(index),
            None => FormEdit::Unknown,
        };
    }
    if let Some((number, text)) = line.split_once('=') {
        if let Some(index) = number.trim().parse::<usize>().ok().and_then(|n| n.checked_sub(1)) {
            return FormEdit::Replace(index, text.trim().to_string());
        }
    }
    FormEdit::Unknown
}

fn print_form<W: Write>(form: &CreatePollForm, out: &mut W) -> std::io::Result<()> {
    writeln!(out, "\n{}", style(form.question()).bold())?;
    for (i, option) in form.options().iter().enumerate() {
        writeln!(out, "  {}. {}", i + 1, option)?;
    }
    Ok(())
}

/// The `/` screen. Returns the route to continue with, if the user picked one.
pub async fn run_home<R, W>(app: &App, input: &mut Lines<R>, out: &mut W) -> Result<Option<Route>, BoxError>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut form = CreatePollForm::new();
    loop {
        writeln!(out, "{}", style("Create a new poll").bold())?;
        let Some(question) = prompt(input, out, "Question:").await? else {
            return Ok(None);
        };
        form.set_question(&question);

        let mut index = 0;
        loop {
            let label = if index < MIN_OPTIONS {
                format!("Option {}:", index + 1)
            } else {
                format!("Option {} (empty to finish):", index + 1)
            };
            let Some(text) = prompt(input, out, &label).await? else {
                return Ok(None);
            };
            if index >= MIN_OPTIONS && text.trim().is_empty() {
                break;
            }
            if index >= form.options().len() {
                form.add_option();
            }
            form.set_option(index, &text)?;
            index += 1;
        }

        let created = loop {
            print_form(&form, out)?;
            let Some(line) = prompt(input, out, "Enter to create, +text adds, -N removes, N=text edits:").await? else {
                return Ok(None);
            };
            let edited = match parse_edit(&line) {
                FormEdit::Submit => match form.submit(&app.api, &app.origin).await {
                    Ok(created) => break created,
                    Err(FormError::MissingFields) => {
                        writeln!(out, "{}", style(FILL_ALL_FIELDS_MESSAGE).yellow())?;
                        if form.question().trim().is_empty() {
                            if let Some(question) = prompt(input, out, "Question:").await? {
                                form.set_question(&question);
                            }
                        }
                        Ok(())
                    }
                    Err(FormError::Api(_)) => {
                        writeln!(out, "{}", style(CREATE_FAILED_MESSAGE).red())?;
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
                FormEdit::Add(text) => {
                    form.add_option();
                    form.set_option(form.options().len() - 1, &text)
                }
                FormEdit::Remove(index) => form.remove_option(index),
                FormEdit::Replace(index, text) => form.set_option(index, &text),
                FormEdit::Unknown => {
                    writeln!(out, "Unrecognised input: {}", line.trim())?;
                    Ok(())
                }
            };
            if let Err(e) = edited {
                writeln!(out, "{}", style(e).yellow())?;
            }
        };

        writeln!(out, "{} {}", style("Poll created! Share this link:").green(), created.share_url)?;
        let choice = prompt(input, out, "[o]pen poll, [n]ew poll or [q]uit:").await?;
        match choice.as_deref().map(str::trim) {
            Some("o") => return Ok(Some(Route::Poll(created.poll.id))),
            Some("n") => form.reset(),
            _ => return Ok(None),
        }
    }
}

// One turn of the poll screen
enum Step {
    Page(PageInput),
    PageDone,
    Line(Option<String>),
    Interrupt,
}

/// The `/polls/<id>` screen. Runs until the user quits, input ends or Ctrl-C.
///
/// Only cancel-safe futures race in the `select!`; whatever won is applied
/// after it, so a vote-state write is never cut short by a keystroke.
pub async fn run_poll<R, W>(app: &App, poll_id: &str, input: &mut Lines<R>, out: &mut W) -> Result<(), BoxError>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut page = PollPage::mount(poll_id, app.api.clone(), &app.channel, app.store.clone()).await?;
    writeln!(out, "{}", page.render())?;

    let mut live = true;
    loop {
        // typing only means something once the poll is on screen
        let accepting = page.state() != &ViewState::Loading;
        let step = tokio::select! {
            received = page.recv(), if live => match received {
                Some(received) => Step::Page(received),
                None => Step::PageDone,
            },
            line = input.next_line(), if accepting => Step::Line(line?),
            _ = tokio::signal::ctrl_c() => Step::Interrupt,
        };

        match step {
            Step::Page(received) => {
                if let Some(update) = page.apply(received).await {
                    if !show_update(&page, &update, out)? {
                        break;
                    }
                }
            }
            Step::PageDone => live = false,
            Step::Line(Some(line)) => {
                if !handle_poll_input(&mut page, line.trim(), out).await? {
                    break;
                }
            }
            Step::Line(None) => break,
            Step::Interrupt => {
                info!("Interrupted, leaving poll {}", page.poll_id());
                break;
            }
        }
    }

    page.teardown();
    Ok(())
}

// false once the view has nothing more to show
fn show_update<W: Write>(page: &PollPage, update: &PageUpdate, out: &mut W) -> std::io::Result<bool> {
    match update {
        PageUpdate::Ready => writeln!(out, "{}", page.render())?,
        PageUpdate::Snapshot => {
            if page.state() != &ViewState::Loading {
                writeln!(out, "{}", page.render())?;
            }
        }
        PageUpdate::Notice(notice) => {
            writeln!(out, "{}", style(notice).yellow())?;
            writeln!(out, "{}", page.render())?;
        }
        PageUpdate::Failed(message) => {
            writeln!(out, "{}", style(message).red())?;
            return Ok(false);
        }
    }
    Ok(true)
}

// false once the user asked to leave
async fn handle_poll_input<W: Write>(page: &mut PollPage, line: &str, out: &mut W) -> std::io::Result<bool> {
    if line.eq_ignore_ascii_case("q") {
        return Ok(false);
    }
    if page.state() != &ViewState::Voting {
        if !line.is_empty() {
            writeln!(out, "Type q to leave.")?;
        }
        return Ok(true);
    }

    if line.is_empty() {
        if !page.form().can_submit() {
            writeln!(out, "Pick an option first.")?;
            return Ok(true);
        }
        match page.submit().await {
            Ok(()) => writeln!(out, "{}", page.render())?,
            Err(e) => writeln!(out, "{}", style(e).yellow())?,
        }
        return Ok(true);
    }

    let option_id = line
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| page.poll().and_then(|poll| poll.options.get(i)))
        .map(|option| option.id.clone());
    match option_id {
        Some(option_id) => match page.select(&option_id) {
            Ok(()) => writeln!(out, "{}", page.render())?,
            Err(e) => writeln!(out, "{}", style(e).yellow())?,
        },
        None => writeln!(out, "Unknown option: {}", line)?,
    }
    Ok(true)
}
