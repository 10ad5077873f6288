use sqlchat_core::{DataValue, StatementResult};

/// Text preview of a batch, one block per statement, numbered from 1.
pub fn render_batch(results: &[StatementResult]) -> String {
    let blocks: Vec<String> = results
        .iter()
        .enumerate()
        .map(|(idx, result)| {
            let n = idx + 1;
            match result {
                StatementResult::Rows { columns, rows } => {
                    format!("Result {n}:\n{}", grid(columns, rows))
                }
                StatementResult::Affected { count } => {
                    format!("Statement {n} executed successfully. Rows affected: {count}")
                }
                StatementResult::Failure { message } => {
                    format!("Error in statement {n}:\n{message}")
                }
            }
        })
        .collect();
    blocks.join("\n\n")
}

/// Grid table with a `=` rule under the header.
pub fn grid(columns: &[String], rows: &[Vec<DataValue>]) -> String {
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.iter().map(|v| v.to_string()).collect())
        .collect();
    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    for row in &cells {
        for (idx, cell) in row.iter().enumerate() {
            let len = cell.chars().count();
            match widths.get_mut(idx) {
                Some(w) => *w = (*w).max(len),
                None => widths.push(len),
            }
        }
    }

    let rule = |fill: char| {
        let mut line = String::from("+");
        for w in &widths {
            line.push_str(&fill.to_string().repeat(w + 2));
            line.push('+');
        }
        line
    };
    let line = |values: &[String]| {
        let mut out = String::from("|");
        for (idx, w) in widths.iter().enumerate() {
            let value = values.get(idx).map(String::as_str).unwrap_or("");
            let pad = w - value.chars().count();
            out.push(' ');
            out.push_str(value);
            out.push_str(&" ".repeat(pad + 1));
            out.push('|');
        }
        out
    };

    let mut out = vec![rule('-'), line(columns), rule('=')];
    for row in &cells {
        out.push(line(row.as_slice()));
        out.push(rule('-'));
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_aligns_columns() {
        let text = grid(
            &["id".to_string(), "name".to_string()],
            &[
                vec![DataValue::Int64(1), DataValue::String("alice".into())],
                vec![DataValue::Int64(22), DataValue::Null],
            ],
        );
        let expected = "\
+----+-------+
| id | name  |
+====+=======+
| 1  | alice |
+----+-------+
| 22 | NULL  |
+----+-------+";
        assert_eq!(text, expected);
    }

    #[test]
    fn render_numbers_each_statement() {
        let text = render_batch(&[
            StatementResult::Affected { count: 3 },
            StatementResult::Failure {
                message: "Invalid object name 'nope'.".into(),
            },
        ]);
        assert_eq!(
            text,
            "Statement 1 executed successfully. Rows affected: 3\n\nError in statement 2:\nInvalid object name 'nope'."
        );
    }
}
