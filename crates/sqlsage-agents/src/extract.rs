//! Pull fenced `sql` blocks out of generated markdown.

use pulldown_cmark::{CodeBlockKind, Event, Parser, Tag, TagEnd};

const SQL_LANG: &str = "sql";

/// Bodies of every fenced code block whose language tag is exactly `sql`,
/// in document order. Uses a CommonMark parse, so SQL-looking prose and
/// blocks tagged anything else (`SQL`, `sqlite`, `python`, untagged) are
/// ignored. No blocks is a valid, empty answer.
pub fn extract_sql_blocks(markdown: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<String> = None;

    for event in Parser::new(markdown) {
        match event {
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(info))) => {
                let lang = info.split_whitespace().next().unwrap_or_default();
                if lang == SQL_LANG {
                    current = Some(String::new());
                }
            }
            Event::Text(text) => {
                if let Some(body) = current.as_mut() {
                    body.push_str(&text);
                }
            }
            Event::End(TagEnd::CodeBlock) => {
                if let Some(mut body) = current.take() {
                    if body.ends_with('\n') {
                        body.pop();
                    }
                    blocks.push(body);
                }
            }
            _ => {}
        }
    }

    blocks
}

/// Render statements back as a markdown document of `sql` fences. The fence is
/// made longer than any backtick run inside a statement.
pub fn to_sql_markdown(statements: &[String]) -> String {
    statements
        .iter()
        .map(|sql| {
            let fence = "`".repeat(longest_backtick_run(sql).max(2) + 1);
            format!("{fence}{SQL_LANG}\n{sql}\n{fence}\n")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn longest_backtick_run(text: &str) -> usize {
    let mut longest = 0;
    let mut run = 0;
    for c in text.chars() {
        if c == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    longest
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANSWER: &str = r#"Here is the total balance per customer:

```sql
SELECT customer_id, SUM(balance) AS total
FROM accounts
GROUP BY customer_id;
```

You could also check the raw rows in Python:

```python
rows = cursor.execute("SELECT * FROM accounts")
```

And a filtered variant:

```sql
SELECT * FROM accounts WHERE balance > 100
```

SELECT * FROM prose_is_not_sql;
"#;

    #[test]
    fn keeps_only_sql_blocks_in_order() {
        let blocks = extract_sql_blocks(ANSWER);
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].starts_with("SELECT customer_id"));
        assert!(blocks[0].ends_with("GROUP BY customer_id;"));
        assert_eq!(blocks[1], "SELECT * FROM accounts WHERE balance > 100");
        assert!(blocks.iter().all(|b| !b.contains("```")));
    }

    #[test]
    fn tag_match_is_exact_and_case_sensitive() {
        let md = "```SQL\nSELECT 1\n```\n\n```sqlite\nSELECT 2\n```\n\n```\nSELECT 3\n```\n\n```sql title=q\nSELECT 4\n```\n";
        assert_eq!(extract_sql_blocks(md), vec!["SELECT 4".to_string()]);
    }

    #[test]
    fn indented_code_and_inline_code_are_ignored() {
        let md = "Try `SELECT 1` inline.\n\n    SELECT 2\n";
        assert!(extract_sql_blocks(md).is_empty());
    }

    #[test]
    fn no_blocks_is_empty_not_error() {
        assert!(extract_sql_blocks("No SQL needed for that question.").is_empty());
        assert!(extract_sql_blocks("").is_empty());
    }

    #[test]
    fn tilde_fences_count() {
        let md = "~~~sql\nSELECT 1\n~~~\n";
        assert_eq!(extract_sql_blocks(md), vec!["SELECT 1".to_string()]);
    }

    #[test]
    fn reextracting_rendered_blocks_is_stable() {
        let first = extract_sql_blocks(ANSWER);
        let second = extract_sql_blocks(&to_sql_markdown(&first));
        assert_eq!(first, second);
    }

    #[test]
    fn rendering_survives_backticks_inside_sql() {
        let statements = vec!["SELECT \"a```b\" AS odd".to_string(), "SELECT 2".to_string()];
        assert_eq!(extract_sql_blocks(&to_sql_markdown(&statements)), statements);
    }
}
