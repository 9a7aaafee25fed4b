use serde::{Deserialize, Deserializer, Serialize};

/// One column-level hit from the schema corpus, as returned by
/// `match_table_embeddings`. Never leaves this crate ungrouped.
#[derive(Debug, Clone, Deserialize)]
pub struct TableEmbeddingRow {
    pub table_name: String,
    #[serde(default)]
    pub db_id: Option<String>,
    #[serde(default)]
    pub column_name: Option<String>,
    #[serde(default)]
    pub column_type: Option<String>,
    #[serde(default)]
    pub text_content: Option<String>,
    #[serde(default)]
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMatch {
    pub column_name: String,
    pub column_type: Option<String>,
    pub description: Option<String>,
    pub similarity: f32,
}

/// All matched columns of one table, grouped at the search boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMatch {
    pub table_name: String,
    pub collection_id: Option<String>,
    pub columns: Vec<ColumnMatch>,
    pub best_similarity: f32,
}

/// A historical query from the query-log corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryLogMatch {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub query_text: String,
    #[serde(default)]
    pub sql_query: String,
    #[serde(default)]
    pub query_type: Option<String>,
    #[serde(default, deserialize_with = "table_list")]
    pub table_names: Vec<String>,
    #[serde(default)]
    pub complexity_score: Option<f64>,
    #[serde(default, alias = "semantic_category")]
    pub category: Option<String>,
    #[serde(default)]
    pub similarity: f32,
    #[serde(default, alias = "db_id")]
    pub collection_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Tagged union of the two result shapes. Raw rows are converted into one of
/// these before they reach any agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SimilarityMatch {
    Table(TableMatch),
    QueryLog(QueryLogMatch),
}

impl SimilarityMatch {
    pub fn collection_id(&self) -> Option<&str> {
        match self {
            Self::Table(t) => t.collection_id.as_deref(),
            Self::QueryLog(q) => q.collection_id.as_deref(),
        }
    }

    pub fn similarity(&self) -> f32 {
        match self {
            Self::Table(t) => t.best_similarity,
            Self::QueryLog(q) => q.similarity,
        }
    }
}

impl QueryLogMatch {
    pub(crate) fn clamped(mut self) -> Self {
        self.similarity = clamp_similarity(self.similarity);
        self
    }
}

/// Group column rows by table, keeping the order in which tables first appear.
/// The service returns rows by descending similarity, so the first row seen for
/// a table carries its best score.
pub fn group_table_rows(rows: Vec<TableEmbeddingRow>) -> Vec<TableMatch> {
    let mut tables: Vec<TableMatch> = Vec::new();

    for row in rows {
        let similarity = clamp_similarity(row.similarity);
        let position = tables
            .iter()
            .position(|t| t.table_name == row.table_name && t.collection_id == row.db_id);
        let table = match position {
            Some(i) => &mut tables[i],
            None => {
                tables.push(TableMatch {
                    table_name: row.table_name.clone(),
                    collection_id: row.db_id.clone(),
                    columns: Vec::new(),
                    best_similarity: similarity,
                });
                let last = tables.len() - 1;
                &mut tables[last]
            }
        };

        if similarity > table.best_similarity {
            table.best_similarity = similarity;
        }
        if let Some(column_name) = row.column_name {
            table.columns.push(ColumnMatch {
                column_name,
                column_type: row.column_type,
                description: row.text_content,
                similarity,
            });
        }
    }

    tables
}

fn clamp_similarity(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// `table_names` arrives as an array, a comma-separated string, or null.
fn table_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        serde_json::Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(table: &str, column: &str, similarity: f32) -> TableEmbeddingRow {
        TableEmbeddingRow {
            table_name: table.to_string(),
            db_id: Some("bank".to_string()),
            column_name: Some(column.to_string()),
            column_type: Some("INTEGER".to_string()),
            text_content: None,
            similarity,
        }
    }

    #[test]
    fn groups_columns_under_their_table() {
        let tables = group_table_rows(vec![
            row("accounts", "custid", 0.91),
            row("savings", "balance", 0.80),
            row("accounts", "name", 0.75),
        ]);

        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].table_name, "accounts");
        assert_eq!(tables[0].columns.len(), 2);
        assert_eq!(tables[0].best_similarity, 0.91);
        assert_eq!(tables[1].table_name, "savings");
    }

    #[test]
    fn best_similarity_tracks_maximum_even_out_of_order() {
        let tables = group_table_rows(vec![row("t", "a", 0.4), row("t", "b", 0.9)]);
        assert_eq!(tables[0].best_similarity, 0.9);
    }

    #[test]
    fn similarity_is_clamped_into_unit_range() {
        let tables = group_table_rows(vec![row("t", "a", 1.2), row("u", "b", -0.1)]);
        assert_eq!(tables[0].best_similarity, 1.0);
        assert_eq!(tables[1].best_similarity, 0.0);
    }

    #[test]
    fn query_log_row_accepts_numeric_id_and_string_tables() {
        let parsed: QueryLogMatch = serde_json::from_value(serde_json::json!({
            "id": 42,
            "query_text": "Total balance per customer",
            "sql_query": "SELECT customer_id, SUM(balance) FROM savings GROUP BY customer_id",
            "query_type": "SELECT",
            "db_id": "bank",
            "table_names": "savings, accounts",
            "complexity_score": 2.5,
            "semantic_category": "aggregation",
            "similarity": 0.77,
            "metadata": {"source": "log"}
        }))
        .unwrap();

        assert_eq!(parsed.id, "42");
        assert_eq!(parsed.table_names, vec!["savings", "accounts"]);
        assert_eq!(parsed.category.as_deref(), Some("aggregation"));
        assert_eq!(parsed.collection_id.as_deref(), Some("bank"));
    }

    #[test]
    fn tagged_match_reports_collection() {
        let tables = group_table_rows(vec![row("accounts", "name", 0.5)]);
        let m = SimilarityMatch::Table(tables[0].clone());
        assert_eq!(m.collection_id(), Some("bank"));
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["kind"], "table");
    }
}
