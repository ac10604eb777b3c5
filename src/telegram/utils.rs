use url::Url;

use crate::{
    domain::{Manga, QueueStats, WorkerDescriptor},
    tasks::supervisor::{WorkerState, WorkerStatus},
};

#[derive(Debug, PartialEq, Eq)]
pub struct TrackArgs {
    pub feed_url: Url,
    pub title: String,
}

/// Parses `<feed_url> <title...>`; only http(s) feeds are accepted.
pub fn parse_track_args(raw: &str) -> Option<TrackArgs> {
    let raw = raw.trim();
    let (url_part, title_part) = raw.split_once(char::is_whitespace).unwrap_or((raw, ""));
    let feed_url = Url::parse(url_part).ok()?;
    if !matches!(feed_url.scheme(), "http" | "https") {
        return None;
    }
    let title = title_part.trim();
    let title = if title.is_empty() {
        feed_url
            .path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()).map(str::to_string))
            .unwrap_or_else(|| feed_url.host_str().unwrap_or("untitled").to_string())
    } else {
        title.to_string()
    };
    Some(TrackArgs { feed_url, title })
}

pub fn format_manga_list(entries: &[Manga]) -> String {
    if entries.is_empty() {
        return "You are not following anything yet. Use /track <feed_url> <title>.".to_string();
    }
    let mut message = String::from("Followed manga:\n\n");
    for manga in entries {
        let latest = manga
            .last_chapter
            .map(|chapter| format!("chapter {chapter}"))
            .unwrap_or_else(|| "not checked yet".to_string());
        message.push_str(&format!(
            "#{} {}\n   latest: {}\n",
            manga.id, manga.title, latest
        ));
    }
    message
}

pub fn format_status(stats: &QueueStats, workers: &[(WorkerDescriptor, WorkerStatus)]) -> String {
    let mut message = format!(
        "Chapter queue\n- pending: {}\n- running: {}\n- done: {}\n- failed: {}\n\nWorkers\n",
        stats.pending, stats.running, stats.done, stats.failed
    );
    for (descriptor, status) in workers {
        let state = match status.state {
            WorkerState::Starting => "starting",
            WorkerState::Running => "running",
            WorkerState::Backoff => "backoff",
            WorkerState::Stopped => "stopped",
        };
        message.push_str(&format!(
            "- {descriptor}: {state}, {} ticks, {} faults\n",
            status.ticks, status.faults
        ));
    }
    message
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_args_split_url_and_title() {
        let args = parse_track_args(" https://feed.example/jojo  Steel Ball Run ").unwrap();
        assert_eq!(args.feed_url.as_str(), "https://feed.example/jojo");
        assert_eq!(args.title, "Steel Ball Run");
    }

    #[test]
    fn track_title_defaults_to_last_segment() {
        let args = parse_track_args("https://feed.example/series/chainsaw-man/").unwrap();
        assert_eq!(args.title, "chainsaw-man");
    }

    #[test]
    fn track_rejects_non_http_urls() {
        assert!(parse_track_args("ftp://feed.example/x Title").is_none());
        assert!(parse_track_args("not-a-url Title").is_none());
        assert!(parse_track_args("").is_none());
    }

    #[test]
    fn status_lists_workers() {
        let workers = vec![(
            WorkerDescriptor::Creator { index: 2 },
            WorkerStatus {
                state: WorkerState::Backoff,
                ticks: 4,
                faults: 1,
                last_fault: None,
            },
        )];
        let text = format_status(&QueueStats::default(), &workers);
        assert!(text.contains("- creator-2: backoff, 4 ticks, 1 faults"));
    }
}
