//! Schema-aware resolution of questions into SQL.
//!
//! Every candidate template is built only from identifiers present in the
//! catalog snapshot, ranked by lexical overlap plus template evidence, and
//! degraded to the bounded default query when nothing clears the minimum
//! confidence.

use async_trait::async_trait;
use common::errors::ResolutionError;
use common::models::{ColumnInfo, QueryIntent, ResolvedQuery, SchemaCatalog, TableInfo};
use common::utils::SqlValidator;

use crate::dialect::Dialect;
use crate::matcher::{match_catalog, token_weight, TableMatch};
use crate::template::{Aggregation, Comparison, Filter, JoinPath, Literal, Ordering, Template};
use crate::tokenizer::{identifier_parts, tokenize, Token, TokenKind};

/// Upper bound for an explicit "top N" in the question.
const MAX_TOP_N: u32 = 10_000;

/// Column score needed for a column to be projected by a select.
const PROJECTION_SCORE: f64 = 0.75;

/// Part weight needed for a question word to stand for a column in a
/// filter or grouping.
const COLUMN_CUE_WEIGHT: f64 = 0.8;

/// Scores are divided by this to obtain a confidence in [0, 1].
const SCORE_SCALE: f64 = 3.0;

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Row limit for non-aggregate templates and the default query.
    pub default_limit: u32,
    /// Candidates below this confidence are ignored.
    pub min_confidence: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            default_limit: 100,
            min_confidence: 0.35,
        }
    }
}

/// Session state that influences ranking.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveContext<'a> {
    /// Tables queried in this session, most recent first.
    pub recent_tables: &'a [String],
}

/// Turns a question into SQL against a catalog snapshot.
#[async_trait]
pub trait QueryResolver: Send + Sync {
    async fn resolve(
        &self,
        question: &str,
        catalog: &SchemaCatalog,
        context: ResolveContext<'_>,
    ) -> Result<ResolvedQuery, ResolutionError>;
}

/// Rule-based resolver over catalog identifiers.
#[derive(Debug, Clone, Default)]
pub struct SchemaAwareResolver {
    config: ResolverConfig,
}

#[async_trait]
impl QueryResolver for SchemaAwareResolver {
    async fn resolve(
        &self,
        question: &str,
        catalog: &SchemaCatalog,
        context: ResolveContext<'_>,
    ) -> Result<ResolvedQuery, ResolutionError> {
        self.resolve_sync(question, catalog, context)
    }
}

impl SchemaAwareResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn resolve_sync(
        &self,
        question: &str,
        catalog: &SchemaCatalog,
        context: ResolveContext<'_>,
    ) -> Result<ResolvedQuery, ResolutionError> {
        if catalog.is_empty() {
            return Err(ResolutionError::NoSchemaLoaded);
        }
        let question = question.trim();
        if question.is_empty() {
            return Err(ResolutionError::EmptyQuestion);
        }

        let tokens = tokenize(question);
        let matches = match_catalog(&tokens, catalog);
        let cues = Cues::read(&tokens);

        let ranked = self.rank(&tokens, &cues, &matches, catalog, context);
        let (template, confidence, note) = match ranked {
            Ok(best) => {
                let note = withheld_note(&best.withheld);
                (best.template, best.confidence, note)
            }
            Err(ResolutionError::AmbiguousIntent) => {
                let table = fallback_table(&matches, catalog, context);
                tracing::debug!(table = %table, "问题无法可靠匹配，使用默认查询");
                let note = format!(
                    "Could not confidently interpret the question; showing the first {} rows of {}",
                    self.config.default_limit, table
                );
                (Template::Default { table }, 0.0, Some(note))
            }
            Err(e) => return Err(e),
        };

        let limit = cues.top_n.unwrap_or(self.config.default_limit);
        let sql = template.render(&Dialect::new(catalog.engine), limit);
        tracing::debug!(intent = ?template.intent(), confidence, sql = %sql, "问题已解析");

        Ok(ResolvedQuery {
            natural_language_text: question.to_string(),
            generated_sql: sql,
            source_schema_version: catalog.version,
            intent: template.intent(),
            confidence,
            tables: template.tables(),
            note,
        })
    }

    /// Best candidate above the confidence threshold.
    fn rank(
        &self,
        tokens: &[Token],
        cues: &Cues,
        matches: &[TableMatch<'_>],
        catalog: &SchemaCatalog,
        context: ResolveContext<'_>,
    ) -> Result<Ranked, ResolutionError> {
        let mut candidates = Vec::new();
        for m in matches.iter().filter(|m| m.is_match()) {
            candidates.extend(candidates_for(tokens, cues, m, matches, catalog));
        }

        let recency_rank = |table: &str| {
            context
                .recent_tables
                .iter()
                .position(|t| t == table)
                .unwrap_or(usize::MAX)
        };

        candidates
            .into_iter()
            .map(|c| {
                let confidence = (c.score / SCORE_SCALE).clamp(0.0, 1.0);
                Ranked {
                    key: RankKey {
                        score: (c.score * 1e6).round() as i64,
                        prefers_aggregate: cues.quantified
                            && c.template.intent() == QueryIntent::Aggregate,
                        recency: recency_rank(c.template.table()),
                        intent: intent_rank(c.template.intent()),
                        index: c.index,
                    },
                    confidence,
                    template: c.template,
                    withheld: c.withheld,
                }
            })
            .filter(|r| r.confidence >= self.config.min_confidence)
            .min_by(|a, b| a.key.cmp(&b.key))
            .ok_or(ResolutionError::AmbiguousIntent)
    }
}

struct Ranked {
    key: RankKey,
    confidence: f64,
    template: Template,
    withheld: Vec<String>,
}

/// Ordering of candidates: smaller is better.
#[derive(Debug, PartialEq, Eq)]
struct RankKey {
    score: i64,
    prefers_aggregate: bool,
    recency: usize,
    intent: u8,
    index: usize,
}

impl Ord for RankKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .score
            .cmp(&self.score)
            .then(other.prefers_aggregate.cmp(&self.prefers_aggregate))
            .then(self.recency.cmp(&other.recency))
            .then(self.intent.cmp(&other.intent))
            .then(self.index.cmp(&other.index))
    }
}

impl PartialOrd for RankKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

fn intent_rank(intent: QueryIntent) -> u8 {
    match intent {
        QueryIntent::Aggregate => 0,
        QueryIntent::Join => 1,
        QueryIntent::Filter => 2,
        QueryIntent::Select => 3,
        QueryIntent::Default => 4,
    }
}

struct Candidate {
    template: Template,
    score: f64,
    index: usize,
    /// Filter values left out of the statement.
    withheld: Vec<String>,
}

/// Question-level signals independent of the schema.
#[derive(Debug, Default)]
struct Cues {
    aggregation: Option<Aggregation>,
    /// Contains a quantifier word.
    quantified: bool,
    /// `Some(true)` for newest first, `Some(false)` for oldest first.
    recency: Option<bool>,
    top_n: Option<u32>,
    /// Positions of the words following `per`, `by` or `each`.
    group_positions: Vec<usize>,
    /// Positions of the words following `sorted by` / `ordered by`.
    sort_positions: Vec<usize>,
    descending: bool,
}

impl Cues {
    fn read(tokens: &[Token]) -> Self {
        let word = |i: usize| -> Option<String> {
            tokens
                .get(i)
                .filter(|t| t.kind == TokenKind::Word)
                .map(|t| t.raw.to_ascii_lowercase())
        };

        let mut cues = Cues::default();
        let mut found = Vec::new();
        for i in 0..tokens.len() {
            let Some(w) = word(i) else {
                if let (TokenKind::Number, Ok(n)) = (tokens[i].kind, tokens[i].raw.parse::<u32>()) {
                    let before = i.checked_sub(1).and_then(&word);
                    let after = word(i + 1);
                    let limits = matches!(
                        before.as_deref(),
                        Some("top" | "first" | "last" | "latest" | "newest" | "recent" | "limit")
                    ) || matches!(
                        after.as_deref(),
                        Some("recent" | "latest" | "newest" | "oldest" | "earliest")
                    );
                    if limits && n > 0 && cues.top_n.is_none() {
                        cues.top_n = Some(n.min(MAX_TOP_N));
                    }
                }
                continue;
            };
            let next = word(i + 1);
            match w.as_str() {
                "count" => found.push(Aggregation::Count),
                "how" if next.as_deref() == Some("many") => found.push(Aggregation::Count),
                "number" if next.as_deref() == Some("of") => found.push(Aggregation::Count),
                "total" | "sum" => found.push(Aggregation::Sum),
                "average" | "avg" | "mean" => found.push(Aggregation::Avg),
                "max" | "maximum" | "highest" | "largest" | "biggest" => {
                    found.push(Aggregation::Max)
                }
                "min" | "minimum" | "lowest" | "smallest" | "cheapest" | "least" => {
                    found.push(Aggregation::Min)
                }
                "recent" | "latest" | "newest" | "last" => {
                    cues.recency.get_or_insert(true);
                }
                "oldest" | "earliest" => {
                    cues.recency.get_or_insert(false);
                }
                "desc" | "descending" => cues.descending = true,
                _ => {}
            }

            let prev = i.checked_sub(1).and_then(&word);
            let sorting = matches!(
                prev.as_deref(),
                Some("sort" | "sorted" | "order" | "ordered")
            );
            if matches!(w.as_str(), "per" | "by" | "each") {
                let mut j = i + 1;
                while matches!(word(j).as_deref(), Some("the" | "each" | "every")) {
                    j += 1;
                }
                if word(j).is_some() && !tokens[j].is_stopword() {
                    if w == "by" && sorting {
                        cues.sort_positions.push(j);
                    } else {
                        cues.group_positions.push(j);
                    }
                }
            }
        }

        cues.quantified = !found.is_empty();
        cues.aggregation = [
            Aggregation::Count,
            Aggregation::Avg,
            Aggregation::Max,
            Aggregation::Min,
            Aggregation::Sum,
        ]
        .into_iter()
        .find(|a| found.contains(a));
        cues
    }
}

/// Best weight of a question word against the parts of a column name.
fn column_cue(token: &Token, column: &ColumnInfo) -> f64 {
    if token.kind != TokenKind::Word || token.is_stopword() {
        return 0.0;
    }
    identifier_parts(&column.name)
        .iter()
        .map(|part| token_weight(&token.norm, part))
        .fold(0.0, f64::max)
}

/// Column of `table` best named by the word at `pos`.
fn column_at<'t>(tokens: &[Token], pos: usize, table: &'t TableInfo) -> Option<&'t ColumnInfo> {
    let token = tokens.get(pos)?;
    table
        .columns
        .iter()
        .map(|c| (c, column_cue(token, c)))
        .filter(|(_, w)| *w >= COLUMN_CUE_WEIGHT)
        .fold(None, |acc: Option<(&ColumnInfo, f64)>, cur| match acc {
            Some(a) if a.1 >= cur.1 => Some(a),
            _ => Some(cur),
        })
        .map(|(c, _)| c)
}

/// Column used to describe rows of a table in joins and groupings.
fn label_column(table: &TableInfo) -> Option<&ColumnInfo> {
    const LABELS: [&str; 5] = ["name", "title", "username", "email", "label"];
    LABELS
        .iter()
        .find_map(|l| table.columns.iter().find(|c| c.name.eq_ignore_ascii_case(l)))
        .or_else(|| {
            table
                .columns
                .iter()
                .find(|c| c.name.to_ascii_lowercase().contains("name"))
        })
        .or_else(|| {
            table
                .columns
                .iter()
                .find(|c| !c.is_key_like() && !c.is_numeric() && !c.is_temporal())
        })
}

/// Temporal column used for recency ordering.
fn recency_column<'t>(m: &TableMatch<'t>) -> Option<&'t ColumnInfo> {
    let temporal: Vec<&ColumnInfo> = m.table.columns.iter().filter(|c| c.is_temporal()).collect();
    temporal
        .iter()
        .find(|c| m.columns.iter().any(|mc| mc.name == c.name))
        .or_else(|| {
            temporal.iter().find(|c| {
                let name = c.name.to_ascii_lowercase();
                name.contains("created") || name.contains("date")
            })
        })
        .or_else(|| temporal.first())
        .copied()
}

/// Join path between `from` and `to` whose columns both exist in the catalog.
fn join_path(catalog: &SchemaCatalog, from: &str, to: &str) -> Option<JoinPath> {
    catalog
        .links_between(from, to)
        .into_iter()
        .map(|(owner, fk)| {
            if owner == from {
                JoinPath {
                    from_table: from.to_string(),
                    from_column: fk.column.clone(),
                    to_table: to.to_string(),
                    to_column: fk.references_column.clone(),
                }
            } else {
                JoinPath {
                    from_table: from.to_string(),
                    from_column: fk.references_column.clone(),
                    to_table: to.to_string(),
                    to_column: fk.column.clone(),
                }
            }
        })
        .find(|j| {
            catalog.contains(&j.from_table, &j.from_column) && catalog.contains(&j.to_table, &j.to_column)
        })
}

/// Comparison phrase starting at `start`: the operator, the position of the
/// value and whether the operator was spelled out. Without a phrase the
/// value is expected right at `start`.
fn read_comparison(tokens: &[Token], start: usize) -> (Comparison, usize, bool) {
    let word = |i: usize| -> Option<String> {
        tokens
            .get(i)
            .filter(|t| t.kind == TokenKind::Word)
            .map(|t| t.raw.to_ascii_lowercase())
    };

    let mut i = start;
    let mut copula = false;
    while matches!(word(i).as_deref(), Some("is" | "was" | "are" | "of")) {
        copula = true;
        i += 1;
    }

    if let Some(t) = tokens.get(i).filter(|t| t.kind == TokenKind::Operator) {
        let op = match t.raw.as_str() {
            "=" => Comparison::Eq,
            "!=" | "<>" => Comparison::Ne,
            ">" => Comparison::Gt,
            ">=" => Comparison::Gte,
            "<" => Comparison::Lt,
            _ => Comparison::Lte,
        };
        return (op, i + 1, true);
    }

    let w = word(i);
    let next = word(i + 1);
    let phrase = match (w.as_deref(), next.as_deref()) {
        (Some("greater" | "more" | "higher"), Some("than")) => Some((Comparison::Gt, 2)),
        (Some("less" | "fewer" | "lower"), Some("than")) => Some((Comparison::Lt, 2)),
        (Some("at"), Some("least")) => Some((Comparison::Gte, 2)),
        (Some("at"), Some("most")) => Some((Comparison::Lte, 2)),
        (Some("equal" | "equals"), Some("to")) => Some((Comparison::Eq, 2)),
        (Some("over" | "above" | "exceeding" | "exceeds"), _) => Some((Comparison::Gt, 1)),
        (Some("under" | "below"), _) => Some((Comparison::Lt, 1)),
        (Some("equal" | "equals"), _) => Some((Comparison::Eq, 1)),
        (Some("not"), _) => Some((Comparison::Ne, 1)),
        _ => None,
    };

    match phrase {
        Some((op, len)) => (op, i + len, true),
        None => (Comparison::Eq, i, copula),
    }
}

/// Filters on columns of `m.table` spelled out in the question, and the
/// values that could not be used because the validator would reject them.
fn read_filters(tokens: &[Token], m: &TableMatch<'_>) -> (Vec<Filter>, Vec<String>) {
    let mut filters: Vec<Filter> = Vec::new();
    let mut withheld: Vec<String> = Vec::new();
    let mut used = vec![false; tokens.len()];
    for p in &m.name.positions {
        used[*p] = true;
    }

    for i in 0..tokens.len() {
        if used[i] {
            continue;
        }
        let Some(column) = column_at(tokens, i, m.table) else {
            continue;
        };
        if filters.iter().any(|f| f.column == column.name) {
            continue;
        }
        let (op, at, explicit) = read_comparison(tokens, i + 1);
        let Some(value) = tokens.get(at).filter(|t| t.is_value() && !used[at]) else {
            continue;
        };

        let literal = match value.kind {
            TokenKind::Number if column.is_numeric() => Literal::Number(value.raw.clone()),
            TokenKind::Number if matches!(op, Comparison::Eq | Comparison::Ne) => {
                Literal::Text(value.raw.clone())
            }
            TokenKind::Quoted if !column.is_numeric() && matches!(op, Comparison::Eq | Comparison::Ne) => {
                Literal::Text(value.raw.clone())
            }
            TokenKind::Word
                if explicit
                    && !column.is_numeric()
                    && matches!(op, Comparison::Eq | Comparison::Ne) =>
            {
                Literal::Text(value.raw.clone())
            }
            _ => continue,
        };

        for slot in used.iter_mut().take(at + 1).skip(i) {
            *slot = true;
        }
        if SqlValidator::forbidden_keyword(&value.raw).is_some() {
            withheld.push(value.raw.clone());
            continue;
        }
        filters.push(Filter {
            table: m.table.name.clone(),
            column: column.name.clone(),
            op,
            value: literal,
        });
    }
    (filters, withheld)
}

/// Note explaining filter values dropped from the statement.
fn withheld_note(values: &[String]) -> Option<String> {
    if values.is_empty() {
        return None;
    }
    let quoted: Vec<String> = values.iter().map(|v| format!("'{v}'")).collect();
    Some(format!(
        "Ignored filter value {}: read-only queries may not contain that SQL keyword",
        quoted.join(", ")
    ))
}

fn ordering_for(tokens: &[Token], cues: &Cues, m: &TableMatch<'_>) -> Option<Ordering> {
    if let Some(column) = cues.sort_positions.iter().find_map(|p| column_at(tokens, *p, m.table)) {
        return Some(Ordering {
            column: column.name.clone(),
            descending: cues.descending,
        });
    }
    let newest_first = cues.recency?;
    recency_column(m).map(|c| Ordering {
        column: c.name.clone(),
        descending: newest_first,
    })
}

/// Numeric column targeted by SUM/AVG/MIN/MAX, and whether the question named it.
fn measure_column<'t>(tokens: &[Token], table: &'t TableInfo) -> Option<(&'t ColumnInfo, bool)> {
    let measures: Vec<&ColumnInfo> = table
        .columns
        .iter()
        .filter(|c| c.is_numeric() && !c.is_key_like())
        .collect();
    let named = measures
        .iter()
        .map(|c| (*c, tokens.iter().map(|t| column_cue(t, c)).fold(0.0, f64::max)))
        .filter(|(_, w)| *w > 0.0)
        .fold(None, |acc: Option<(&ColumnInfo, f64)>, cur| match acc {
            Some(a) if a.1 >= cur.1 => Some(a),
            _ => Some(cur),
        });
    match named {
        Some((c, _)) => Some((c, true)),
        None => measures.first().map(|c| (*c, false)),
    }
}

/// Grouping column for an aggregate over `m.table`: either one of its own
/// columns or the label of a foreign-key-linked table named in the question.
/// Grouping through a join also credits the joined table's name match.
fn grouping_for(
    tokens: &[Token],
    cues: &Cues,
    m: &TableMatch<'_>,
    matches: &[TableMatch<'_>],
    catalog: &SchemaCatalog,
) -> Option<(String, String, Option<JoinPath>, f64)> {
    let joined = |target: &str| -> Option<(String, String, Option<JoinPath>, f64)> {
        let join = join_path(catalog, &m.table.name, target)?;
        let label = label_column(catalog.table(target)?)?;
        let name_score = matches
            .iter()
            .find(|o| o.table.name == target)
            .map_or(0.0, |o| o.name.score);
        Some((
            target.to_string(),
            label.name.clone(),
            Some(join),
            0.5 + 2.0 * name_score,
        ))
    };

    for &p in &cues.group_positions {
        if let Some(column) = column_at(tokens, p, m.table).filter(|c| !c.is_primary) {
            let via_key = m
                .table
                .foreign_keys
                .iter()
                .find(|fk| fk.column == column.name)
                .and_then(|fk| joined(&fk.references_table));
            return via_key.or_else(|| Some((m.table.name.clone(), column.name.clone(), None, 0.5)));
        }
        let other = matches
            .iter()
            .filter(|o| o.index != m.index && o.name.positions.contains(&p))
            .find_map(|o| joined(&o.table.name));
        if other.is_some() {
            return other;
        }
    }
    None
}

fn candidates_for(
    tokens: &[Token],
    cues: &Cues,
    m: &TableMatch<'_>,
    matches: &[TableMatch<'_>],
    catalog: &SchemaCatalog,
) -> Vec<Candidate> {
    let lexical = m.lexical_score();
    let (filters, withheld) = read_filters(tokens, m);
    let filter_evidence = (filters.len() as f64).min(2.0);
    let ordering = ordering_for(tokens, cues, m);
    let order_evidence = if ordering.is_some() { 0.5 } else { 0.0 };
    let table = m.table.name.clone();
    let mut out = Vec::new();

    let projection: Vec<String> = m
        .projected_columns(PROJECTION_SCORE)
        .into_iter()
        .map(|c| c.name.clone())
        .collect();
    let projection_evidence = (0.3 * projection.len() as f64).min(0.6);
    out.push(Candidate {
        template: Template::Select {
            table: table.clone(),
            columns: projection,
            order_by: ordering.clone(),
        },
        score: lexical + projection_evidence + order_evidence,
        index: m.index,
        withheld: withheld.clone(),
    });

    if !filters.is_empty() {
        out.push(Candidate {
            template: Template::Filter {
                table: table.clone(),
                filters: filters.clone(),
                order_by: ordering.clone(),
            },
            score: lexical + filter_evidence + order_evidence,
            index: m.index,
            withheld: withheld.clone(),
        });
    }

    if let Some(func) = cues.aggregation {
        let target = match func {
            Aggregation::Count => Some((Aggregation::Count, None, 0.5)),
            _ => match measure_column(tokens, m.table) {
                Some((c, named)) => Some((func, Some(c.name.clone()), if named { 0.5 } else { 0.0 })),
                // "total" over a table without measures reads as a row count
                None if func == Aggregation::Sum => Some((Aggregation::Count, None, 0.0)),
                None => None,
            },
        };
        if let Some((func, column, column_evidence)) = target {
            let grouping = grouping_for(tokens, cues, m, matches, catalog);
            let (group_by, join, group_evidence) = match grouping {
                Some((g_table, g_col, join, evidence)) => (Some((g_table, g_col)), join, evidence),
                None => (None, None, 0.0),
            };
            out.push(Candidate {
                template: Template::Aggregate {
                    table: table.clone(),
                    func,
                    column,
                    group_by,
                    join,
                    filters: filters.clone(),
                },
                score: lexical + 1.0 + column_evidence + group_evidence + filter_evidence,
                index: m.index,
                withheld: withheld.clone(),
            });
        }
    }

    for other in matches.iter().filter(|o| o.index != m.index && o.name.score >= 0.5) {
        // each pair is joined from the table owning the foreign key
        if !m.table.foreign_keys.iter().any(|fk| fk.references_table == other.table.name) {
            continue;
        }
        if other.name.positions.iter().all(|p| m.name.positions.contains(p)) {
            continue;
        }
        let Some(join) = join_path(catalog, &m.table.name, &other.table.name) else {
            continue;
        };
        let joined_columns = label_column(other.table)
            .map(|c| vec![c.name.clone()])
            .unwrap_or_default();
        out.push(Candidate {
            template: Template::Join {
                table: table.clone(),
                join,
                joined_columns,
                filters: filters.clone(),
            },
            score: lexical + 2.0 * other.name.score + 0.5 + filter_evidence,
            index: m.index,
            withheld: withheld.clone(),
        });
    }

    out
}

/// Bounded `SELECT *` over one catalog table, used to browse its rows.
pub fn preview_sql(
    catalog: &SchemaCatalog,
    table: &str,
    limit: u32,
) -> Result<String, ResolutionError> {
    if catalog.is_empty() {
        return Err(ResolutionError::NoSchemaLoaded);
    }
    let table = catalog
        .table(table)
        .ok_or_else(|| ResolutionError::UnknownTable(table.to_string()))?;
    let template = Template::Default {
        table: table.name.clone(),
    };
    Ok(template.render(&Dialect::new(catalog.engine), limit))
}

/// Table for the default query: best lexical match (ties go to the most
/// recently queried table), else the most recently queried table, else the
/// first catalog table.
fn fallback_table(
    matches: &[TableMatch<'_>],
    catalog: &SchemaCatalog,
    context: ResolveContext<'_>,
) -> String {
    let recency = |table: &str| {
        context
            .recent_tables
            .iter()
            .position(|t| t == table)
            .unwrap_or(usize::MAX)
    };
    let best = matches
        .iter()
        .filter(|m| m.lexical_score() > 0.0)
        .min_by_key(|m| {
            (
                -((m.lexical_score() * 1e6).round() as i64),
                recency(&m.table.name),
                m.index,
            )
        });
    if let Some(m) = best {
        return m.table.name.clone();
    }
    context
        .recent_tables
        .iter()
        .find(|t| catalog.table(t).is_some())
        .cloned()
        .or_else(|| catalog.tables.first().map(|t| t.name.clone()))
        .unwrap_or_default()
}
