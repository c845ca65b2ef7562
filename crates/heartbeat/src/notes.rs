//! Markdown files the heartbeat reads and writes: the task list, the
//! knowledge journal and the roadmap.

use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;

const EXCERPT_CHARS: usize = 2000;

/// Unchecked checklist items (`- [ ]` or `* [ ]`), in file order.
pub fn pending_tasks(markdown: &str) -> Vec<String> {
    markdown
        .lines()
        .filter_map(|line| {
            let line = line.trim_start();
            line.strip_prefix("- [ ]")
                .or_else(|| line.strip_prefix("* [ ]"))
                .map(|task| task.trim().to_string())
        })
        .filter(|task| !task.is_empty())
        .collect()
}

/// File contents, or empty when the file does not exist yet.
pub async fn read_optional(path: &Path) -> io::Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e),
    }
}

/// Append an entry under a timestamp heading. Never rewrites earlier entries.
pub async fn append_entry(path: &Path, at: DateTime<Utc>, body: &str) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let entry = format!(
        "\n## {}\n\n{}\n",
        at.format("%Y-%m-%d %H:%M UTC"),
        body.trim()
    );
    file.write_all(entry.as_bytes()).await?;
    file.flush().await
}

/// The last `EXCERPT_CHARS` characters, cut at a line boundary when possible.
pub fn tail_excerpt(text: &str) -> &str {
    let count = text.chars().count();
    if count <= EXCERPT_CHARS {
        return text;
    }
    let start = text
        .char_indices()
        .nth(count - EXCERPT_CHARS)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let tail = &text[start..];
    match tail.find('\n') {
        Some(nl) if nl + 1 < tail.len() => &tail[nl + 1..],
        _ => tail,
    }
}

/// The first `EXCERPT_CHARS` characters.
pub fn head_excerpt(text: &str) -> &str {
    match text.char_indices().nth(EXCERPT_CHARS) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}
