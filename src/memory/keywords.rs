//! Keyword extraction for cache keys and enriched summaries.
//!
//! Deterministic: lowercase, strip punctuation, split on whitespace and
//! hyphens/underscores, drop stop words and short tokens, rank by length
//! (longer tends to be more specific) then alphabetically. The sorted
//! signature lets differently-worded queries with the same keywords share
//! an L2 cache entry.

use std::collections::HashSet;
use std::sync::OnceLock;

fn stop_words() -> &'static HashSet<&'static str> {
    static STOP_WORDS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    STOP_WORDS.get_or_init(|| {
        [
            // English
            "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with",
            "by", "from", "is", "are", "was", "were", "be", "been", "have", "has", "had", "do",
            "does", "did", "will", "would", "should", "could", "may", "might", "can", "must",
            "this", "that", "these", "those", "it", "its", "what", "which", "who", "when",
            "where", "why", "how",
            // Japanese particles and common words
            "の", "は", "が", "を", "に", "へ", "と", "で", "や", "か", "も", "から", "まで",
            "より", "など", "として", "について", "による", "こと", "もの", "ため", "よう",
            "これ", "それ", "あれ", "どれ",
        ]
        .into_iter()
        .collect()
    })
}

/// Extract the top `top_n` keywords from a query, minimum `min_length`
/// characters each.
pub fn extract_keywords(query: &str, top_n: usize, min_length: usize) -> Vec<String> {
    if query.trim().is_empty() || top_n == 0 {
        return Vec::new();
    }

    let normalized: String = query
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    let mut seen = HashSet::new();
    let mut unique: Vec<&str> = Vec::new();
    for word in normalized.split(|c: char| c.is_whitespace() || c == '-' || c == '_') {
        if word.chars().count() < min_length || stop_words().contains(word) {
            continue;
        }
        if seen.insert(word) {
            unique.push(word);
        }
    }

    let mut ranked = unique;
    ranked.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then(a.cmp(b)));
    ranked.truncate(top_n);
    ranked.into_iter().map(String::from).collect()
}

/// Deterministic signature: keywords sorted alphabetically, `+`-joined.
pub fn build_signature(keywords: &[String]) -> String {
    if keywords.is_empty() {
        return String::new();
    }
    let mut sorted: Vec<&str> = keywords.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.join("+")
}

/// Extract keywords and build the signature in one call.
pub fn query_signature(query: &str) -> String {
    build_signature(&extract_keywords(query, 3, 3))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_top_keywords_by_length() {
        let keywords = extract_keywords("change feed ingestion errors", 3, 3);
        assert_eq!(keywords, vec!["ingestion", "change", "errors"]);
    }

    #[test]
    fn drops_stop_words_and_short_tokens() {
        let keywords = extract_keywords("how to fix the db in ci", 3, 3);
        assert_eq!(keywords, vec!["fix"]);
    }

    #[test]
    fn splits_hyphenated_compounds() {
        let keywords = extract_keywords("cross-encoder rerank", 3, 3);
        assert!(keywords.contains(&"encoder".to_string()));
        assert!(keywords.contains(&"cross".to_string()));
        assert!(keywords.contains(&"rerank".to_string()));
    }

    #[test]
    fn signature_is_order_independent() {
        let a = query_signature("change feed ingestion errors");
        let b = query_signature("ingestion errors in change feed");
        assert_eq!(a, b);
        assert_eq!(a, "change+errors+ingestion");
    }

    #[test]
    fn empty_inputs_produce_empty_outputs() {
        assert!(extract_keywords("", 3, 3).is_empty());
        assert!(extract_keywords("a of to", 3, 3).is_empty());
        assert_eq!(build_signature(&[]), "");
        assert_eq!(query_signature("   "), "");
    }

    #[test]
    fn deduplicates_repeated_words() {
        let keywords = extract_keywords("deploy deploy deploy rollback", 3, 3);
        assert_eq!(keywords, vec!["rollback", "deploy"]);
    }
}
