// src/suggest.rs

//! "Did you mean" suggestions for package names

/// Minimum similarity for a name to be suggested
pub const DEFAULT_CUTOFF: f64 = 0.7;

/// Maximum number of suggestions per name
pub const MAX_SUGGESTIONS: usize = 3;

/// Similarity in `[0, 1]`: twice the longest common subsequence over the
/// combined length, compared case-insensitively
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }

    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in &a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    2.0 * prev[b.len()] as f64 / total as f64
}

/// Candidates at least `cutoff` similar to `word`, best first
pub fn close_matches<'a, I>(word: &str, candidates: I, cutoff: f64) -> Vec<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut scored: Vec<(f64, &String)> = candidates
        .into_iter()
        .map(|c| (similarity(word, c), c))
        .filter(|(score, _)| *score >= cutoff)
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    scored
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|(_, c)| c.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_bounds() {
        assert_eq!(similarity("numpy", "numpy"), 1.0);
        assert_eq!(similarity("abc", "xyz"), 0.0);
        assert_eq!(similarity("NumPy", "numpy"), 1.0);
    }

    #[test]
    fn test_close_matches_finds_typos() {
        let names = vec![
            "numpy".to_string(),
            "numba".to_string(),
            "scipy".to_string(),
            "pandas".to_string(),
        ];
        let matches = close_matches("numpi", &names, DEFAULT_CUTOFF);
        assert_eq!(matches.first().map(String::as_str), Some("numpy"));
        assert!(!matches.contains(&"pandas".to_string()));
    }
}
