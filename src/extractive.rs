//! Model-free summarization heuristics.
//!
//! Sentences are scored by the summed frequency of their content words, and
//! the best ones are returned in their original order. These helpers back the
//! basic tier and the parser's fallback path.

use std::collections::{HashMap, HashSet};

const STOPWORDS: &[&str] = &[
    "a", "about", "after", "again", "all", "also", "am", "an", "and", "any", "are", "as", "at",
    "be", "because", "been", "before", "being", "but", "by", "can", "could", "did", "do", "does",
    "doing", "don't", "for", "from", "get", "got", "had", "has", "have", "he", "her", "here",
    "him", "his", "how", "i", "i'm", "if", "in", "into", "is", "it", "it's", "its", "just",
    "kind", "know", "like", "me", "more", "my", "no", "not", "now", "of", "oh", "ok", "okay",
    "on", "one", "or", "our", "out", "really", "right", "so", "some", "that", "that's", "the",
    "their", "them", "then", "there", "these", "they", "thing", "things", "think", "this",
    "those", "to", "too", "um", "uh", "up", "very", "was", "we", "well", "were", "what", "when",
    "where", "which", "who", "will", "with", "would", "yeah", "yes", "you", "your",
];

/// Split text into trimmed sentences on `.`, `!`, `?` and line breaks.
#[must_use]
pub fn sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        if c == '\n' || c == '\r' {
            push_sentence(&mut out, &mut current);
            continue;
        }
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            push_sentence(&mut out, &mut current);
        }
    }
    push_sentence(&mut out, &mut current);

    out
}

fn push_sentence(out: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if trimmed.chars().any(char::is_alphanumeric) {
        out.push(trimmed.to_string());
    }
    current.clear();
}

fn content_words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|w| w.trim_matches('\'').to_lowercase())
        .filter(|w| w.chars().count() > 2 && !STOPWORDS.contains(&w.as_str()))
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
}

fn frequencies(text: &str) -> HashMap<String, usize> {
    let mut freq = HashMap::new();
    for word in content_words(text) {
        *freq.entry(word).or_insert(0) += 1;
    }
    freq
}

/// The `n` most frequent content words, most frequent first.
#[must_use]
pub fn keywords(text: &str, n: usize) -> Vec<String> {
    let freq = frequencies(text);
    let mut ranked: Vec<(String, usize)> = freq.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(n).map(|(w, _)| w).collect()
}

/// The `n` highest-scoring sentences, in their original order.
#[must_use]
pub fn key_sentences(text: &str, n: usize) -> Vec<String> {
    let all = sentences(text);
    if all.len() <= n {
        return all;
    }

    let freq = frequencies(text);
    let mut scored: Vec<(usize, f32)> = all
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let words: Vec<String> = content_words(s).collect();
            if words.is_empty() {
                return (i, 0.0);
            }
            let total: usize = words.iter().map(|w| freq.get(w).copied().unwrap_or(0)).sum();
            // Length-damped: sqrt(len), not len.
            (i, total as f32 / (words.len() as f32).sqrt())
        })
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let mut picked: Vec<usize> = scored.into_iter().take(n).map(|(i, _)| i).collect();
    picked.sort_unstable();

    picked.into_iter().map(|i| all[i].clone()).collect()
}

/// A short extractive summary: the top `n` sentences joined by spaces, or
/// the leading words when the text has no sentence structure.
#[must_use]
pub fn summarize(text: &str, n: usize) -> String {
    let picked = key_sentences(text, n);
    if picked.is_empty() {
        return leading_words(text, 40);
    }
    picked.join(" ")
}

/// The first `n` whitespace-separated words, with an ellipsis when cut.
#[must_use]
pub fn leading_words(text: &str, n: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= n {
        return words.join(" ");
    }
    format!("{}…", words[..n].join(" "))
}

/// A headline built from the first sentence, capped at eight words.
#[must_use]
pub fn title(text: &str) -> String {
    let first = sentences(text).into_iter().next().unwrap_or_default();
    let trimmed = first.trim_end_matches(['.', '!', '?']);
    leading_words(trimmed, 8)
}

/// Union of string lists, keeping first-seen order and dropping
/// case-insensitive duplicates.
#[must_use]
pub fn merge_unique<I>(lists: I) -> Vec<String>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for list in lists {
        for item in list {
            let key = item.trim().to_lowercase();
            if !key.is_empty() && seen.insert(key) {
                out.push(item.trim().to_string());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRANSCRIPT: &str = "We planned the garden today. The garden needs new soil and seeds. \
        Um, yeah. I called the hardware store about soil prices. \
        Tomorrow I will buy seeds for the garden.";

    #[test]
    fn splits_sentences_and_drops_noise() {
        let s = sentences("One. Two!\nThree?  ...  ");
        assert_eq!(s, vec!["One.", "Two!", "Three?"]);
    }

    #[test]
    fn keywords_rank_by_frequency() {
        let kw = keywords(TRANSCRIPT, 3);
        assert_eq!(kw[0], "garden");
        assert!(kw.contains(&"soil".to_string()));
        assert!(kw.contains(&"seeds".to_string()));
    }

    #[test]
    fn key_sentences_keep_original_order() {
        let picked = key_sentences(TRANSCRIPT, 2);
        assert_eq!(picked.len(), 2);
        let first = TRANSCRIPT.find(&picked[0]).unwrap_or(usize::MAX);
        let second = TRANSCRIPT.find(&picked[1]).unwrap_or(usize::MAX);
        assert!(first < second);
        assert!(!picked.iter().any(|s| s.starts_with("Um")));
    }

    #[test]
    fn summarize_falls_back_to_leading_words() {
        assert_eq!(summarize("   ", 3), "");
        assert_eq!(summarize("just some words", 3), "just some words");
    }

    #[test]
    fn leading_words_marks_truncation() {
        assert_eq!(leading_words("a b c d", 2), "a b…");
        assert_eq!(leading_words("a b", 2), "a b");
    }

    #[test]
    fn title_uses_first_sentence() {
        assert_eq!(title(TRANSCRIPT), "We planned the garden today");
    }

    #[test]
    fn merge_unique_is_case_insensitive() {
        let merged = merge_unique(vec![
            vec!["Soil".to_string(), "seeds".to_string()],
            vec!["soil".to_string(), "Prices".to_string(), " ".to_string()],
        ]);
        assert_eq!(merged, vec!["Soil", "seeds", "Prices"]);
    }
}
