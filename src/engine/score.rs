//! LLM newsworthiness scoring: asks the generation model to rate recent items
//! 1-10. Responses are free-form, so parsing is layered: strict JSON first,
//! then a bare in-range integer, then a neutral 5 so no item is retried
//! forever.

use chrono::{Duration as ChronoDuration, Utc};
use regex::Regex;
use serde_json::Value;

use crate::ai::AiProvider;
use crate::error::Result;
use crate::feed::FeedSource;
use crate::util::truncate_chars;

use super::Engine;

/// LLM calls are slow; score only this many per cycle.
const SCORE_BATCH_SIZE: usize = 5;
const SCORE_WINDOW_HOURS: i64 = 24;
const SUMMARY_MAX_CHARS: usize = 500;
const NEUTRAL_SCORE: f64 = 5.0;
const UNPARSEABLE_REASON: &str = "auto: unparseable LLM response";

const PROMPT_TEMPLATE: &str = r#"Rate the newsworthiness of this article on a scale of 1 to 10, where:
- 1-3: routine, niche, or filler content
- 4-6: moderately interesting, relevant to some audiences
- 7-8: significant news, broad interest
- 9-10: major breaking news, historic event

Article title: {title}
Article summary: {summary}

Respond with ONLY a JSON object like: {"score": 7, "reason": "brief explanation"}
Do not include any other text."#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreOutcome {
    pub scored: usize,
}

fn render_prompt(title: &str, summary: &str) -> String {
    let title = if title.is_empty() { "(no title)" } else { title };
    let summary = if summary.is_empty() { "(no summary)" } else { summary };
    PROMPT_TEMPLATE
        .replace("{title}", title)
        .replace("{summary}", summary)
}

/// Extract a 1-10 score and optional reason from a model response. JSON shape
/// first; failing that, the first bare integer, which must itself be in range.
pub(crate) fn parse_score_response(response: &str) -> Option<(f64, String)> {
    if response.is_empty() {
        return None;
    }

    // The model may wrap the JSON in extra prose.
    if let Ok(json_re) = Regex::new(r#"(?s)\{.*?"score".*?\}"#) {
        if let Some(m) = json_re.find(response) {
            if let Ok(value) = serde_json::from_str::<Value>(m.as_str()) {
                let score = value.get("score").and_then(|s| match s {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                });
                if let Some(score) = score {
                    if (1.0..=10.0).contains(&score) {
                        let reason = value
                            .get("reason")
                            .and_then(|r| r.as_str())
                            .unwrap_or("")
                            .to_string();
                        return Some((score, reason));
                    }
                }
            }
        }
    }

    let num_re = Regex::new(r"\b(\d+)\b").ok()?;
    let first = num_re.captures(response)?.get(1)?;
    let score: f64 = first.as_str().parse().ok()?;
    if (1.0..=10.0).contains(&score) {
        return Some((score, String::new()));
    }

    None
}

impl<S: FeedSource, A: AiProvider> Engine<S, A> {
    /// Score up to a small batch of recent unscored items. Every attempted
    /// item ends up with a score (parsed or the neutral fallback), so nothing
    /// is left in limbo. No-op when the generation provider is unavailable.
    pub async fn run_newsworthiness_scoring(&self) -> Result<ScoreOutcome> {
        if !self.inner.ai.is_available().await {
            return Ok(ScoreOutcome { scored: 0 });
        }

        let cutoff = Utc::now() - ChronoDuration::hours(SCORE_WINDOW_HOURS);
        let items = self
            .inner
            .repo
            .items_without_newsworthiness(cutoff, SCORE_BATCH_SIZE)
            .await?;
        if items.is_empty() {
            return Ok(ScoreOutcome { scored: 0 });
        }

        let mut scored = 0usize;
        for (item_id, title, description) in items {
            let prompt = render_prompt(&title, truncate_chars(&description, SUMMARY_MAX_CHARS));
            let response = self.inner.ai.generate(&prompt).await.unwrap_or_default();

            match parse_score_response(&response) {
                Some((score, reason)) => {
                    self.inner
                        .repo
                        .set_newsworthiness(item_id, score, &reason)
                        .await?;
                }
                None => {
                    self.inner
                        .repo
                        .set_newsworthiness(item_id, NEUTRAL_SCORE, UNPARSEABLE_REASON)
                        .await?;
                }
            }
            scored += 1;
        }

        Ok(ScoreOutcome { scored })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{engine_with_items, published_hours_ago, StubAi};
    use super::*;

    #[test]
    fn parses_strict_json() {
        let parsed = parse_score_response(r#"{"score": 7, "reason": "x"}"#);
        assert_eq!(parsed, Some((7.0, "x".to_string())));
    }

    #[test]
    fn parses_json_wrapped_in_prose() {
        let parsed = parse_score_response(r#"Sure! {"score": 9, "reason": "major"} hope that helps"#);
        assert_eq!(parsed, Some((9.0, "major".to_string())));
    }

    #[test]
    fn out_of_range_first_integer_is_unparseable() {
        assert_eq!(parse_score_response("garbage 11 more garbage"), None);
    }

    #[test]
    fn bare_in_range_integer_is_accepted() {
        assert_eq!(
            parse_score_response("I would rate this a 7 out of 10"),
            Some((7.0, String::new()))
        );
    }

    #[test]
    fn empty_or_numberless_response_is_unparseable() {
        assert_eq!(parse_score_response(""), None);
        assert_eq!(parse_score_response("no rating here"), None);
    }

    #[test]
    fn prompt_substitutes_placeholders() {
        let prompt = render_prompt("Big story", "Something happened");
        assert!(prompt.contains("Article title: Big story"));
        assert!(prompt.contains("Article summary: Something happened"));
        let fallback = render_prompt("", "");
        assert!(fallback.contains("(no title)"));
        assert!(fallback.contains("(no summary)"));
    }

    #[tokio::test]
    async fn unparseable_response_gets_neutral_score() {
        let (engine, ids) = engine_with_items(&[("story", published_hours_ago(1))]).await;
        let engine = engine.with_ai(StubAi {
            available: true,
            vector: None,
            response: Some("no idea, honestly".to_string()),
        });

        let outcome = engine.run_newsworthiness_scoring().await.unwrap();
        assert_eq!(outcome.scored, 1);

        let scores = engine.repository().newsworthiness_scores().await.unwrap();
        assert_eq!(scores.get(&ids[0]), Some(&NEUTRAL_SCORE));

        // Scored items are never attempted again.
        let outcome = engine.run_newsworthiness_scoring().await.unwrap();
        assert_eq!(outcome.scored, 0);
    }

    #[tokio::test]
    async fn parseable_response_is_stored() {
        let (engine, ids) = engine_with_items(&[("story", published_hours_ago(1))]).await;
        let engine = engine.with_ai(StubAi {
            available: true,
            vector: None,
            response: Some(r#"{"score": 8, "reason": "broad interest"}"#.to_string()),
        });

        engine.run_newsworthiness_scoring().await.unwrap();
        let scores = engine.repository().newsworthiness_scores().await.unwrap();
        assert_eq!(scores.get(&ids[0]), Some(&8.0));
    }
}
