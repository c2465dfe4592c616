//! 最小化的 CSV 读写（支持引号、转义引号、字段内换行与 CRLF）

use std::io::{self, Write};
use std::mem::take;

/// 解析 CSV 文本为行列表，跳过空行
pub fn parse_rows(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut field = String::new();
    let mut row = Vec::new();
    let mut in_quotes = false;
    let mut chars = text.trim_start_matches('\u{feff}').chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if matches!(chars.peek(), Some('"')) {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => row.push(take(&mut field)),
            '\n' | '\r' if !in_quotes => {
                if ch == '\r' && matches!(chars.peek(), Some('\n')) {
                    chars.next();
                }
                row.push(take(&mut field));
                push_row(&mut rows, take(&mut row));
            }
            _ => field.push(ch),
        }
    }

    // 末尾没有换行（或引号未闭合）时也保留最后一行
    row.push(field);
    push_row(&mut rows, row);

    rows
}

fn push_row(rows: &mut Vec<Vec<String>>, row: Vec<String>) {
    if !(row.len() == 1 && row[0].is_empty()) {
        rows.push(row);
    }
}

fn needs_quotes(field: &str) -> bool {
    field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
}

/// 写出一行
pub fn write_row<W: Write, S: AsRef<str>>(mut w: W, row: &[S]) -> io::Result<()> {
    for (i, cell) in row.iter().enumerate() {
        if i > 0 {
            write!(w, ",")?;
        }
        let cell = cell.as_ref();
        if needs_quotes(cell) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            write!(w, "{}", cell)?;
        }
    }
    writeln!(w)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoted_fields_survive_write_and_parse() {
        let row = vec![
            "Question_MQ_Parsed_0001".to_string(),
            "He said \"hi\", then left".to_string(),
            "line one\nline two".to_string(),
            String::new(),
        ];
        let mut buf = Vec::new();
        write_row(&mut buf, &["Key", "Text", "Notes", "Empty"]).unwrap();
        write_row(&mut buf, &row).unwrap();

        let rows = parse_rows(&String::from_utf8(buf).unwrap());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], row);
    }

    #[test]
    fn test_parse_tolerates_crlf_and_blank_lines() {
        let rows = parse_rows("a,b\r\n\r\nc,d");
        assert_eq!(rows, vec![vec!["a", "b"], vec!["c", "d"]]);
    }
}
