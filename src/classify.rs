//! Keyword-based topic classification. Deterministic and stateless so it can
//! be swapped out or tested independently of the fetch orchestration.

/// Topics shown as tabs by a UI layer; "all" and "for_you" are virtual.
pub const TOPICS: &[&str] = &[
    "news",
    "business",
    "sports",
    "tech",
    "entertainment",
    "science",
    "other",
];

const RULES: &[(&str, &[&str])] = &[
    (
        "sports",
        &[
            "sport", "football", "soccer", "basketball", "baseball", "nfl", "nba", "mlb", "game",
            "match", "score", "league", "championship", "olympics", "tennis", "golf", "hockey",
        ],
    ),
    (
        "business",
        &[
            "stock", "market", "trading", "earnings", "economy", "business", "finance", "invest",
            "wall street", "fed", "inflation", "recession", "ceo", "merger", "ipo",
        ],
    ),
    (
        "tech",
        &[
            "tech", "software", "apple", "google", "microsoft", "ai", "android", "iphone",
            "startup", "coding", "developer", "app", "digital", "gadget",
        ],
    ),
    (
        "science",
        &[
            "science", "research", "study", "climate", "space", "nasa", "health", "medical",
            "vaccine", "physics", "biology", "discovery",
        ],
    ),
    (
        "entertainment",
        &[
            "movie", "film", "music", "celebrity", "tv", "netflix", "album", "band", "actor",
            "oscar", "grammy", "entertainment",
        ],
    ),
    (
        "news",
        &[
            "news", "breaking", "politics", "election", "government", "world", "today", "reuters",
            "ap ", "bbc", "cnn", "reported", "said",
        ],
    ),
];

/// Classify an item into a topic by keyword hit count over title+description.
/// The topic with the most matching keywords wins; "other" if nothing matches.
/// Ties go to the earlier rule.
pub fn classify_topic(title: &str, description: &str) -> &'static str {
    let text = format!("{} {}", title, description).to_lowercase();

    let mut best: &'static str = "other";
    let mut best_hits = 0usize;
    for (topic, words) in RULES {
        let hits = words.iter().filter(|w| text.contains(*w)).count();
        if hits > best_hits {
            best_hits = hits;
            best = topic;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_keyword_count() {
        let topic = classify_topic(
            "NBA championship game goes to overtime",
            "A basketball match for the league title",
        );
        assert_eq!(topic, "sports");
    }

    #[test]
    fn highest_count_wins_over_single_hit() {
        // "game" alone would hit sports, but tech keywords dominate.
        let topic = classify_topic(
            "Apple launches iPhone app for developers",
            "The software startup scene reacts to the new gadget",
        );
        assert_eq!(topic, "tech");
    }

    #[test]
    fn no_keywords_is_other() {
        assert_eq!(classify_topic("Untitled", ""), "other");
        assert_eq!(classify_topic("", ""), "other");
    }
}
