//! Text Utilities
//!
//! Keyword extraction, set similarity, and signature hashing shared by the
//! search path, the detectors, and the clustering layer. Everything here is
//! pure and allocation-light; signatures are pre-filters only and never stand
//! in for a real similarity comparison.

use std::collections::HashSet;

// ============================================================================
// STOP WORDS
// ============================================================================

/// Common English words plus the domain words that dominate coding-session
/// queries. Keyword extraction drops all of these.
pub const STOP_WORDS: &[&str] = &[
    // common
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "had",
    "her", "was", "one", "our", "out", "day", "get", "has", "him", "his",
    "how", "its", "new", "now", "old", "see", "two", "way", "who", "did",
    "that", "this", "with", "have", "from", "they", "been", "were", "what",
    "when", "where", "which", "while", "will", "would", "could", "should",
    "there", "their", "them", "then", "than", "these", "those", "some",
    "such", "into", "over", "under", "about", "after", "before", "between",
    "because", "through", "during", "again", "also", "only", "very", "just",
    "more", "most", "other", "does", "doing", "done", "being", "each",
    // domain
    "function", "method", "class", "file", "code", "implement",
    "implementation", "using", "used", "work", "works", "working", "make",
    "makes", "made", "need", "needs", "want", "wants", "like", "show",
    "find", "help", "change", "changes", "update", "updated",
];

/// Minimum token length kept by keyword extraction
pub const MIN_KEYWORD_LEN: usize = 4;

fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

// ============================================================================
// KEYWORD EXTRACTION
// ============================================================================

/// Extract search keywords from free text.
///
/// Lowercases, splits on anything that is not alphanumeric or underscore,
/// drops tokens shorter than four characters and stop words, and deduplicates
/// while preserving the order of first occurrence.
///
/// ```
/// use mnemo_core::text::extract_keywords;
/// let kw = extract_keywords("What is the authentication flow?");
/// assert_eq!(kw, vec!["authentication", "flow"]);
/// ```
pub fn extract_keywords(query: &str) -> Vec<String> {
    let lowered = query.to_lowercase();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut keywords = Vec::new();

    for token in lowered.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
        if token.len() < MIN_KEYWORD_LEN || is_stop_word(token) {
            continue;
        }
        if seen.insert(token) {
            keywords.push(token.to_string());
        }
    }

    keywords
}

/// Significant words from a title for signature building: longer than three
/// characters, not a stop word, lowercased, first occurrence kept.
pub fn significant_words(title: &str) -> Vec<String> {
    let lowered = title.to_lowercase();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut words = Vec::new();

    for token in lowered.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
        if token.len() <= 3 || is_stop_word(token) {
            continue;
        }
        if seen.insert(token) {
            words.push(token.to_string());
        }
    }

    words
}

// ============================================================================
// SET SIMILARITY
// ============================================================================

/// Jaccard similarity of two string sets.
///
/// Two empty sets are identical (1.0); exactly one empty set means no
/// overlap (0.0).
pub fn jaccard<S: AsRef<str> + Eq + std::hash::Hash>(a: &[S], b: &[S]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let set_a: HashSet<&str> = a.iter().map(|s| s.as_ref()).collect();
    let set_b: HashSet<&str> = b.iter().map(|s| s.as_ref()).collect();

    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();

    intersection as f64 / union as f64
}

/// Count of elements shared by two string slices (set semantics)
pub fn overlap_count<S: AsRef<str> + Eq + std::hash::Hash>(a: &[S], b: &[S]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let set_a: HashSet<&str> = a.iter().map(|s| s.as_ref()).collect();
    b.iter()
        .map(|s| s.as_ref())
        .collect::<HashSet<_>>()
        .intersection(&set_a)
        .count()
}

// ============================================================================
// TERM SIGNATURES
// ============================================================================

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a hash of a single token
pub fn fnv1a(token: &str) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in token.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// XOR-combined term signature over a token set.
///
/// Used only as a cheap pre-filter: pairs whose signatures share too few bits
/// are skipped before any real Jaccard comparison. Never use it as a final
/// similarity measure.
pub fn term_signature<S: AsRef<str>>(tokens: &[S]) -> u64 {
    tokens
        .iter()
        .fold(0u64, |acc, t| acc ^ fnv1a(t.as_ref()))
}

/// Number of identical bits between two signatures
pub fn matching_bits(a: u64, b: u64) -> u32 {
    (a ^ b).count_zeros()
}

// ============================================================================
// VECTOR SIMILARITY
// ============================================================================

/// Cosine similarity between two vectors.
///
/// Returns 0.0 for zero-norm inputs or mismatched dimensions.
pub fn cosine_similarity(u: &[f32], v: &[f32]) -> f32 {
    if u.len() != v.len() || u.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_u = 0.0f32;
    let mut norm_v = 0.0f32;
    for (x, y) in u.iter().zip(v.iter()) {
        dot += x * y;
        norm_u += x * x;
        norm_v += y * y;
    }

    if norm_u <= 0.0 || norm_v <= 0.0 {
        return 0.0;
    }

    dot / (norm_u.sqrt() * norm_v.sqrt())
}

// ============================================================================
// TESTS
// ============================================================================
