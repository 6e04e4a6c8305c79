//! Lexical matching between question tokens and catalog identifiers.

use common::models::{SchemaCatalog, TableInfo};
use strsim::jaro_winkler;

use crate::tokenizer::{identifier_parts, Token, TokenKind};

/// Minimum Jaro-Winkler similarity for a near match.
const FUZZY_THRESHOLD: f64 = 0.92;

const EXACT_WEIGHT: f64 = 1.0;
const SYNONYM_WEIGHT: f64 = 0.8;
const FUZZY_WEIGHT: f64 = 0.7;

/// Groups of interchangeable stems.
const SYNONYMS: [&[&str]; 7] = [
    &["user", "customer", "client", "member"],
    &["order", "purchase", "sale"],
    &["product", "item", "good"],
    &["amount", "price", "cost", "revenue", "spend"],
    &["stock", "inventory", "quantity", "qty"],
    &["email", "mail"],
    &["created", "joined", "registered", "signup"],
];

/// Weight of matching a normalised question token against one identifier part.
pub fn token_weight(token: &str, part: &str) -> f64 {
    if token == part {
        return EXACT_WEIGHT;
    }
    if SYNONYMS
        .iter()
        .any(|group| group.contains(&token) && group.contains(&part))
    {
        return SYNONYM_WEIGHT;
    }
    if token.len() >= 4 && part.len() >= 4 && jaro_winkler(token, part) >= FUZZY_THRESHOLD {
        return FUZZY_WEIGHT;
    }
    0.0
}

/// How well a set of question tokens covers an identifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentifierMatch {
    /// Mean over identifier parts of the best token weight, in [0, 1].
    pub score: f64,
    /// Best single part weight, in [0, 1].
    pub best_part: f64,
    /// Positions of the question tokens that contributed.
    pub positions: Vec<usize>,
}

impl IdentifierMatch {
    pub fn is_match(&self) -> bool {
        self.score > 0.0
    }
}

/// Matches the candidate tokens against the parts of `identifier`.
pub fn match_identifier(tokens: &[(usize, &Token)], identifier: &str) -> IdentifierMatch {
    let parts = identifier_parts(identifier);
    if parts.is_empty() {
        return IdentifierMatch::default();
    }

    let mut total = 0.0;
    let mut best_part: f64 = 0.0;
    let mut positions = Vec::new();
    for part in &parts {
        let best = tokens
            .iter()
            .map(|(pos, token)| (*pos, token_weight(&token.norm, part)))
            .filter(|(_, w)| *w > 0.0)
            .fold(None, |acc: Option<(usize, f64)>, cur| match acc {
                Some(a) if a.1 >= cur.1 => Some(a),
                _ => Some(cur),
            });
        if let Some((pos, weight)) = best {
            total += weight;
            best_part = best_part.max(weight);
            if !positions.contains(&pos) {
                positions.push(pos);
            }
        }
    }

    positions.sort_unstable();
    IdentifierMatch {
        score: total / parts.len() as f64,
        best_part,
        positions,
    }
}

#[derive(Debug, Clone)]
pub struct ColumnMatch {
    pub name: String,
    pub ident: IdentifierMatch,
}

/// Lexical evidence that the question is about one table.
#[derive(Debug, Clone)]
pub struct TableMatch<'a> {
    /// Position of the table in catalog order.
    pub index: usize,
    pub table: &'a TableInfo,
    pub name: IdentifierMatch,
    /// Matched columns in catalog order.
    pub columns: Vec<ColumnMatch>,
}

impl TableMatch<'_> {
    /// Lexical overlap score: table name weighs double, the best column fully
    /// and the runner-up a quarter.
    pub fn lexical_score(&self) -> f64 {
        let mut col_scores: Vec<f64> = self.columns.iter().map(|c| c.ident.score).collect();
        col_scores.sort_by(|a, b| b.total_cmp(a));
        let best = col_scores.first().copied().unwrap_or(0.0);
        let second = col_scores.get(1).copied().unwrap_or(0.0);
        2.0 * self.name.score + best + 0.25 * second
    }

    pub fn is_match(&self) -> bool {
        self.name.is_match() || !self.columns.is_empty()
    }

    /// Columns matched only through tokens that did not name the table.
    pub fn projected_columns(&self, min_score: f64) -> Vec<&ColumnMatch> {
        self.columns
            .iter()
            .filter(|c| c.ident.score >= min_score)
            .filter(|c| c.ident.positions.iter().all(|p| !self.name.positions.contains(p)))
            .collect()
    }
}

/// Scores every catalog table against the question tokens.
pub fn match_catalog<'a>(tokens: &[Token], catalog: &'a SchemaCatalog) -> Vec<TableMatch<'a>> {
    let candidates: Vec<(usize, &Token)> = tokens
        .iter()
        .enumerate()
        .filter(|(_, t)| t.kind == TokenKind::Word && !t.is_stopword())
        .collect();

    catalog
        .tables
        .iter()
        .enumerate()
        .map(|(index, table)| {
            let columns = table
                .columns
                .iter()
                .map(|c| ColumnMatch {
                    name: c.name.clone(),
                    ident: match_identifier(&candidates, &c.name),
                })
                .filter(|c| c.ident.is_match())
                .collect();
            TableMatch {
                index,
                table,
                name: match_identifier(&candidates, &table.name),
                columns,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::tokenize;
    use common::models::{ColumnInfo, Engine};

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::new(
            "c",
            Engine::Postgresql,
            1,
            vec![
                TableInfo::new(
                    "orders",
                    vec![
                        ColumnInfo::new("order_id", "int").primary(),
                        ColumnInfo::new("customer_id", "int"),
                        ColumnInfo::new("total_amount", "decimal(10,2)"),
                    ],
                ),
                TableInfo::new("customers", vec![ColumnInfo::new("id", "int").primary()]),
            ],
        )
    }

    #[test]
    fn test_exact_synonym_and_fuzzy_weights() {
        assert_eq!(token_weight("order", "order"), 1.0);
        assert_eq!(token_weight("purchase", "order"), 0.8);
        assert_eq!(token_weight("custmer", "customer"), 0.7);
        assert_eq!(token_weight("cat", "car"), 0.0);
    }

    #[test]
    fn test_table_name_outweighs_columns() {
        let catalog = catalog();
        let tokens = tokenize("show me the total orders");
        let matches = match_catalog(&tokens, &catalog);
        assert!(matches[0].lexical_score() > matches[1].lexical_score());
        assert!(!matches[1].is_match());
    }

    #[test]
    fn test_partial_identifier_score() {
        let tokens = tokenize("total");
        let candidates: Vec<(usize, &Token)> = tokens.iter().enumerate().collect();
        let m = match_identifier(&candidates, "total_amount");
        assert_eq!(m.score, 0.5);
        assert_eq!(m.best_part, 1.0);
        assert_eq!(m.positions, vec![0]);
    }

    #[test]
    fn test_projection_skips_table_name_tokens() {
        let catalog = catalog();
        let tokens = tokenize("orders");
        let matches = match_catalog(&tokens, &catalog);
        // order_id only matched through the word naming the table
        assert!(matches[0].projected_columns(0.75).is_empty());
    }
}
