//! Pulls durable notes out of an assistant answer.
//!
//! A line that starts with one of the markers (after an optional list
//! bullet) becomes a long-term decision tagged with the marker name.

const MARKERS: &[(&str, &str)] = &[
    ("decision:", "decision"),
    ("insight:", "insight"),
    ("lesson:", "lesson"),
    ("note:", "note"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insight {
    pub tag: &'static str,
    pub text: String,
}

pub fn extract_insights(answer: &str) -> Vec<Insight> {
    answer
        .lines()
        .filter_map(|line| {
            let line = line
                .trim()
                .trim_start_matches(['-', '*', '>'])
                .trim_start()
                .trim_start_matches("**");
            let lower = line.to_lowercase();
            MARKERS.iter().find_map(|&(marker, tag)| {
                if !lower.starts_with(marker) {
                    return None;
                }
                let text = line.get(marker.len()..)?.trim().trim_start_matches("**").trim();
                (!text.is_empty()).then(|| Insight {
                    tag,
                    text: text.to_string(),
                })
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_marked_lines() {
        let answer = "I updated the parser.\n\
                      Decision: keep the lexer hand-written\n\
                      - Lesson: run clippy before committing\n\
                      Some prose mentioning a note: inline is ignored\n\
                      **Insight:** tests were flaky because of time";
        let found = extract_insights(answer);
        assert_eq!(
            found,
            vec![
                Insight {
                    tag: "decision",
                    text: "keep the lexer hand-written".into()
                },
                Insight {
                    tag: "lesson",
                    text: "run clippy before committing".into()
                },
                Insight {
                    tag: "insight",
                    text: "tests were flaky because of time".into()
                },
            ]
        );
    }

    #[test]
    fn empty_marker_is_skipped() {
        assert!(extract_insights("Note:   \nnothing here").is_empty());
    }
}
