use super::PollResults;
use console::{style, Color};

const CHART_WIDTH: usize = 30;
const SHARE_WIDTH: usize = 20;
const BAR: char = '█';
const TRACK: char = '░';

// Closest xterm-256 entries for the palette
fn terminal_color(hex: &str) -> Color {
    match hex {
        "#6366f1" => Color::Color256(63),
        "#8b5cf6" => Color::Color256(99),
        "#ec4899" => Color::Color256(205),
        "#f43f5e" => Color::Color256(203),
        "#f59e0b" => Color::Color256(214),
        "#10b981" => Color::Color256(36),
        _ => Color::White,
    }
}

/// Bar length for `value` on an axis that ends at `max`.
pub fn bar_length(value: u64, max: u64, width: usize) -> usize {
    if max == 0 {
        return 0;
    }
    ((value as f64 / max as f64) * width as f64).round() as usize
}

/// Results screen: a horizontal bar per option scaled to the leading option,
/// followed by each option's share of all votes.
pub fn render(results: &PollResults) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n", style(&results.question).bold()));
    out.push_str(&format!("{} votes\n\n", results.total_votes));

    let label_width = results
        .rows
        .iter()
        .map(|row| row.option_text.chars().count())
        .max()
        .unwrap_or(0);
    let max_votes = results.rows.iter().map(|row| row.votes).max().unwrap_or(0);

    for row in &results.rows {
        let bar: String = std::iter::repeat_n(BAR, bar_length(row.votes, max_votes, CHART_WIDTH)).collect();
        out.push_str(&format!(
            "{:<width$}  {} {}\n",
            row.option_text,
            style(bar).fg(terminal_color(row.color)),
            row.votes,
            width = label_width
        ));
    }
    out.push('\n');

    for row in &results.rows {
        let filled = bar_length(u64::from(row.percentage), 100, SHARE_WIDTH);
        let share: String = std::iter::repeat_n(BAR, filled)
            .chain(std::iter::repeat_n(TRACK, SHARE_WIDTH - filled))
            .collect();
        out.push_str(&format!(
            "{:<width$}  {} {:>3}%\n",
            row.option_text,
            style(share).fg(terminal_color(row.color)),
            row.percentage,
            width = label_width
        ));
    }

    out
}
