//! Prompt templates and request builders for the two generation stages.

use sqlchat_core::{ConversationHistory, ConversationTurn};

pub const SQL_SYSTEM_PROMPT: &str = "\
## Role
You are a senior SQL Server developer who writes production T-SQL against large databases.

## Task
Translate the user's question into one fully executable T-SQL script for Microsoft SQL Server,
using only the schema supplied with the question.

## Rules
1. Use the exact database, schema, table and column names from the supplied schema. Never invent
   columns or tables; derive join conditions from the columns that actually exist.
2. Return pure SQL only: no prose, no headings, no comments.
3. Write for large tables: prefer joins, CTEs and window functions over correlated subqueries;
   avoid cursors, temp tables and procedural code unless the question needs them.
4. Guard against runtime errors: wrap divisors in NULLIF(x, 0), handle NULLs in aggregates,
   and use proper date functions.
5. Do not use reserved words such as RowCount, order, key, group or user as aliases.
6. When a literal value is needed, take it from the sample rows or use an obvious placeholder.
7. The schema starts with the current database. Prefix with USE [Database] only when the tables
   live in a different one.

## Output
Only the SQL script, for example:
SELECT TOP 5 p.ProductName, SUM(s.SalesAmount) AS TotalRevenue
FROM dbo.Sales s
JOIN dbo.Products p ON s.ProductID = p.ProductID
GROUP BY p.ProductName
ORDER BY TotalRevenue DESC;";

pub const EXPLANATION_SYSTEM_PROMPT: &str = "\
## Role
You are a data analyst explaining query results to business stakeholders.

## Task
Given a user's question and the SQL query that answers it, say in plain language what the
query tells the business.

## Rules
- Describe what is measured or compared, not how the query works.
- Do not mention SQL, tables, joins, keywords or any code.
- Keep it to two or three sentences for a non-technical decision maker.";

/// Turns for the SQL stage: system prompt, history oldest-first, then the
/// question with the schema text.
pub fn sql_request(
    history: &ConversationHistory,
    question: &str,
    schema_text: &str,
) -> Vec<ConversationTurn> {
    let mut turns = Vec::with_capacity(history.len() + 2);
    turns.push(ConversationTurn::system(SQL_SYSTEM_PROMPT));
    turns.extend(history.turns().cloned());
    turns.push(ConversationTurn::human(format!(
        "{question}\nSchema:\n{schema_text}"
    )));
    turns
}

/// Turns for the explanation stage. Independent of the history.
pub fn explanation_request(question: &str, sql: &str) -> Vec<ConversationTurn> {
    vec![
        ConversationTurn::system(EXPLANATION_SYSTEM_PROMPT),
        ConversationTurn::human(format!("User Question: {question}\nSQL Query:\n{sql}")),
    ]
}

/// Drops one leading "```sql" and one trailing "```", then trims. Purely
/// textual; the body is not inspected.
pub fn strip_sql_fence(text: &str) -> String {
    let trimmed = text.trim();
    let trimmed = trimmed.strip_prefix("```sql").unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("```").unwrap_or(trimmed);
    trimmed.trim().to_string()
}
