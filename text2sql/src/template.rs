//! Query templates and their SQL rendering.
//!
//! Templates only carry identifiers that were taken from the catalog; all
//! column references are rendered table-qualified.

use common::models::QueryIntent;

use crate::dialect::Dialect;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl Aggregation {
    fn sql(&self) -> &'static str {
        match self {
            Aggregation::Count => "COUNT",
            Aggregation::Sum => "SUM",
            Aggregation::Avg => "AVG",
            Aggregation::Min => "MIN",
            Aggregation::Max => "MAX",
        }
    }

    fn alias_prefix(&self) -> &'static str {
        match self {
            Aggregation::Count => "count",
            Aggregation::Sum => "sum",
            Aggregation::Avg => "avg",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    fn sql(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Ne => "<>",
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(String),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub table: String,
    pub column: String,
    pub op: Comparison,
    pub value: Literal,
}

/// `JOIN to_table ON from_table.from_column = to_table.to_column`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPath {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ordering {
    pub column: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Template {
    Aggregate {
        table: String,
        func: Aggregation,
        column: Option<String>,
        /// `(table, column)` to group by; the table is either `table` or the join target.
        group_by: Option<(String, String)>,
        join: Option<JoinPath>,
        filters: Vec<Filter>,
    },
    Filter {
        table: String,
        filters: Vec<Filter>,
        order_by: Option<Ordering>,
    },
    Join {
        table: String,
        join: JoinPath,
        /// Descriptive columns of the joined table to project.
        joined_columns: Vec<String>,
        filters: Vec<Filter>,
    },
    Select {
        table: String,
        columns: Vec<String>,
        order_by: Option<Ordering>,
    },
    Default {
        table: String,
    },
}

impl Template {
    pub fn intent(&self) -> QueryIntent {
        match self {
            Template::Aggregate { .. } => QueryIntent::Aggregate,
            Template::Filter { .. } => QueryIntent::Filter,
            Template::Join { .. } => QueryIntent::Join,
            Template::Select { .. } => QueryIntent::Select,
            Template::Default { .. } => QueryIntent::Default,
        }
    }

    /// Primary table of the template.
    pub fn table(&self) -> &str {
        match self {
            Template::Aggregate { table, .. }
            | Template::Filter { table, .. }
            | Template::Join { table, .. }
            | Template::Select { table, .. }
            | Template::Default { table } => table,
        }
    }

    /// Tables referenced by the rendered SQL, primary table first.
    pub fn tables(&self) -> Vec<String> {
        let mut tables = vec![self.table().to_string()];
        let joined = match self {
            Template::Aggregate { join: Some(j), .. } | Template::Join { join: j, .. } => {
                Some(j.to_table.clone())
            }
            _ => None,
        };
        tables.extend(joined);
        tables
    }

    pub fn render(&self, dialect: &Dialect, limit: u32) -> String {
        let mut q = SelectBuilder::from_table(dialect.ident(self.table()));
        match self {
            Template::Aggregate {
                table,
                func,
                column,
                group_by,
                join,
                filters,
            } => {
                let (expr, alias) = match column {
                    Some(col) => (
                        format!("{}({})", func.sql(), dialect.column(table, col)),
                        format!("{}_{}", func.alias_prefix(), col.to_ascii_lowercase()),
                    ),
                    None => (format!("{}(*)", func.sql()), "count_all".to_string()),
                };
                let alias = sanitize_alias(&alias);
                if let Some((g_table, g_col)) = group_by {
                    let key = dialect.column(g_table, g_col);
                    q.projection.push(key.clone());
                    q.group_by.push(key);
                    q.order_by = Some(format!("{alias} DESC"));
                    q.limit = Some(limit);
                }
                q.projection.push(format!("{expr} AS {alias}"));
                if let Some(join) = join {
                    q.join(dialect, join);
                }
                q.filter(dialect, filters);
            }
            Template::Filter {
                filters, order_by, ..
            } => {
                q.filter(dialect, filters);
                q.order(dialect, self.table(), order_by.as_ref());
                q.limit = Some(limit);
            }
            Template::Join {
                table,
                join,
                joined_columns,
                filters,
            } => {
                q.projection.push(format!("{}.*", dialect.ident(table)));
                q.projection.extend(
                    joined_columns
                        .iter()
                        .map(|c| dialect.column(&join.to_table, c)),
                );
                q.join(dialect, join);
                q.filter(dialect, filters);
                q.limit = Some(limit);
            }
            Template::Select {
                table,
                columns,
                order_by,
            } => {
                q.projection
                    .extend(columns.iter().map(|c| dialect.column(table, c)));
                q.order(dialect, table, order_by.as_ref());
                q.limit = Some(limit);
            }
            Template::Default { .. } => {
                q.limit = Some(limit);
            }
        }
        q.render(dialect)
    }
}

fn sanitize_alias(alias: &str) -> String {
    alias
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[derive(Debug, Default)]
struct SelectBuilder {
    projection: Vec<String>,
    from: String,
    joins: Vec<String>,
    filters: Vec<String>,
    group_by: Vec<String>,
    order_by: Option<String>,
    limit: Option<u32>,
}

impl SelectBuilder {
    fn from_table(from: String) -> Self {
        Self {
            from,
            ..Default::default()
        }
    }

    fn join(&mut self, dialect: &Dialect, join: &JoinPath) {
        self.joins.push(format!(
            "JOIN {} ON {} = {}",
            dialect.ident(&join.to_table),
            dialect.column(&join.from_table, &join.from_column),
            dialect.column(&join.to_table, &join.to_column),
        ));
    }

    fn filter(&mut self, dialect: &Dialect, filters: &[Filter]) {
        self.filters.extend(filters.iter().map(|f| {
            let value = match &f.value {
                Literal::Number(n) => n.clone(),
                Literal::Text(t) => dialect.string(t),
            };
            format!("{} {} {}", dialect.column(&f.table, &f.column), f.op.sql(), value)
        }));
    }

    fn order(&mut self, dialect: &Dialect, table: &str, order_by: Option<&Ordering>) {
        if let Some(o) = order_by {
            let dir = if o.descending { "DESC" } else { "ASC" };
            self.order_by = Some(format!("{} {}", dialect.column(table, &o.column), dir));
        }
    }

    fn render(self, dialect: &Dialect) -> String {
        let mut sql = String::from("SELECT ");
        if let Some(prefix) = self.limit.and_then(|l| dialect.limit_prefix(l)) {
            sql.push_str(&prefix);
            sql.push(' ');
        }
        if self.projection.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&self.projection.join(", "));
        }
        sql.push_str(" FROM ");
        sql.push_str(&self.from);
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if !self.filters.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.filters.join(" AND "));
        }
        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }
        if let Some(order_by) = &self.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(order_by);
        }
        if let Some(suffix) = self.limit.and_then(|l| dialect.limit_suffix(l)) {
            sql.push(' ');
            sql.push_str(&suffix);
        }
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::models::Engine;

    fn pg() -> Dialect {
        Dialect::new(Engine::Postgresql)
    }

    #[test]
    fn test_default_template() {
        let t = Template::Default {
            table: "users".into(),
        };
        assert_eq!(t.render(&pg(), 10), "SELECT * FROM users LIMIT 10");
        assert_eq!(
            t.render(&Dialect::new(Engine::Mssql), 10),
            "SELECT TOP 10 * FROM users"
        );
    }

    #[test]
    fn test_sum_without_grouping_has_no_limit() {
        let t = Template::Aggregate {
            table: "orders".into(),
            func: Aggregation::Sum,
            column: Some("total_amount".into()),
            group_by: None,
            join: None,
            filters: vec![],
        };
        assert_eq!(
            t.render(&pg(), 100),
            "SELECT SUM(orders.total_amount) AS sum_total_amount FROM orders"
        );
    }

    #[test]
    fn test_grouped_aggregate_over_join() {
        let t = Template::Aggregate {
            table: "orders".into(),
            func: Aggregation::Count,
            column: None,
            group_by: Some(("customers".into(), "name".into())),
            join: Some(JoinPath {
                from_table: "orders".into(),
                from_column: "customer_id".into(),
                to_table: "customers".into(),
                to_column: "id".into(),
            }),
            filters: vec![],
        };
        assert_eq!(
            t.render(&pg(), 20),
            "SELECT customers.name, COUNT(*) AS count_all FROM orders \
             JOIN customers ON orders.customer_id = customers.id \
             GROUP BY customers.name ORDER BY count_all DESC LIMIT 20"
        );
        assert_eq!(t.tables(), vec!["orders", "customers"]);
    }

    #[test]
    fn test_filter_with_text_literal() {
        let t = Template::Filter {
            table: "orders".into(),
            filters: vec![Filter {
                table: "orders".into(),
                column: "status".into(),
                op: Comparison::Eq,
                value: Literal::Text("it's done".into()),
            }],
            order_by: None,
        };
        assert_eq!(
            t.render(&pg(), 5),
            "SELECT * FROM orders WHERE orders.status = 'it''s done' LIMIT 5"
        );
    }
}
