//! Question and identifier tokenization.
//!
//! Question words and schema identifiers go through the same normalisation
//! (lowercase, plural folding) so that `orders`, `Order` and `order_id`
//! all share the `order` stem.

use std::sync::LazyLock;

use regex::Regex;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"'([^']*)'|"([^"]*)"|(-?\d+(?:\.\d+)?)|(>=|<=|!=|<>|=|>|<)|([A-Za-z_][A-Za-z0-9_]*)"#,
    )
    .expect("token pattern is valid")
});

/// Words that carry no schema meaning.
const STOPWORDS: [&str; 46] = [
    "a", "all", "an", "and", "any", "are", "be", "by", "can", "display", "do", "does", "each",
    "every", "for", "from", "get", "give", "have", "how", "i", "in", "is", "it", "list", "me",
    "my", "of", "on", "or", "per", "please", "show", "tell", "than", "that", "the", "their",
    "there", "to", "want", "what", "where", "which", "who", "with",
];

/// Identifier parts too generic to identify a column on their own.
const GENERIC_PARTS: [&str; 5] = ["id", "at", "no", "num", "key"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Word,
    Number,
    Quoted,
    Operator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Text as typed (quotes removed for quoted values).
    pub raw: String,
    /// Normalised form used for matching.
    pub norm: String,
}

impl Token {
    pub fn is_word(&self, word: &str) -> bool {
        self.kind == TokenKind::Word && self.raw.eq_ignore_ascii_case(word)
    }

    pub fn is_stopword(&self) -> bool {
        self.kind == TokenKind::Word
            && (STOPWORDS.contains(&self.norm.as_str())
                || STOPWORDS.contains(&self.raw.to_ascii_lowercase().as_str()))
    }

    /// Whether this token can serve as a filter value.
    pub fn is_value(&self) -> bool {
        match self.kind {
            TokenKind::Number | TokenKind::Quoted => true,
            TokenKind::Word => !self.is_stopword(),
            TokenKind::Operator => false,
        }
    }
}

/// Splits a question into words, numbers, quoted values and comparison operators.
pub fn tokenize(question: &str) -> Vec<Token> {
    TOKEN_RE
        .captures_iter(question)
        .filter_map(|caps| {
            if let Some(m) = caps.get(1).or_else(|| caps.get(2)) {
                Some(Token {
                    kind: TokenKind::Quoted,
                    raw: m.as_str().to_string(),
                    norm: m.as_str().to_lowercase(),
                })
            } else if let Some(m) = caps.get(3) {
                Some(Token {
                    kind: TokenKind::Number,
                    raw: m.as_str().to_string(),
                    norm: m.as_str().to_string(),
                })
            } else if let Some(m) = caps.get(4) {
                Some(Token {
                    kind: TokenKind::Operator,
                    raw: m.as_str().to_string(),
                    norm: m.as_str().to_string(),
                })
            } else {
                caps.get(5).map(|m| Token {
                    kind: TokenKind::Word,
                    raw: m.as_str().to_string(),
                    norm: singular(&m.as_str().to_lowercase()),
                })
            }
        })
        .collect()
}

/// Splits an identifier on underscores and camelCase boundaries and
/// normalises each part. Generic parts such as `id` are dropped unless the
/// identifier has nothing else.
pub fn identifier_parts(identifier: &str) -> Vec<String> {
    let mut parts = Vec::new();
    for chunk in identifier.split(|c: char| c == '_' || c == '-' || c == ' ' || c == '.') {
        let mut current = String::new();
        let mut prev_lower = false;
        for ch in chunk.chars() {
            if ch.is_uppercase() && prev_lower && !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
            current.extend(ch.to_lowercase());
        }
        if !current.is_empty() {
            parts.push(current);
        }
    }

    let parts: Vec<String> = parts.iter().map(|p| singular(p)).collect();
    let specific: Vec<String> = parts
        .iter()
        .filter(|p| !GENERIC_PARTS.contains(&p.as_str()))
        .cloned()
        .collect();
    if specific.is_empty() {
        parts
    } else {
        specific
    }
}

/// Folds common English plurals to a singular stem.
pub fn singular(word: &str) -> String {
    let len = word.len();
    if len <= 3 || word.ends_with("ss") || word.ends_with("us") || word.ends_with("is") {
        return word.to_string();
    }
    if let Some(stem) = word.strip_suffix("ies") {
        return format!("{stem}y");
    }
    for suffix in ["ches", "shes", "xes", "ses", "zes"] {
        if word.ends_with(suffix) {
            return word[..len - 2].to_string();
        }
    }
    match word.strip_suffix('s') {
        Some(stem) => stem.to_string(),
        None => word.to_string(),
    }
}
