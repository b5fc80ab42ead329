//! Comma-separated table codec used by every file the task reads or writes.
//!
//! Quoting follows the usual spreadsheet convention: a field is wrapped in
//! double quotes when it contains a comma, a quote, or a line break, and
//! embedded quotes are doubled. Blank lines are skipped on read.

use std::fs;
use std::path::Path;

use crate::{Error, Result};

/// One parsed row.
pub type Row = Vec<String>;

/// Parse a whole table. The header, if any, is returned as the first row.
pub fn parse(input: &str) -> Result<Vec<Row>> {
    let input = input.strip_prefix('\u{feff}').unwrap_or(input);
    let mut rows = Vec::new();
    let mut row: Row = Vec::new();
    let mut field = String::new();
    let mut line = 1usize;
    let mut quote_line = 0usize;
    let mut in_quotes = false;
    let mut row_has_content = false;
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push('\n');
                }
                c => field.push(c),
            }
            continue;
        }

        match ch {
            '"' if field.is_empty() => {
                in_quotes = true;
                quote_line = line;
                row_has_content = true;
            }
            ',' => {
                row.push(std::mem::take(&mut field));
                row_has_content = true;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                if row_has_content || !field.is_empty() {
                    row.push(std::mem::take(&mut field));
                    rows.push(std::mem::take(&mut row));
                }
                row_has_content = false;
                line += 1;
            }
            c => {
                field.push(c);
                row_has_content = true;
            }
        }
    }

    if in_quotes {
        return Err(Error::Table {
            line: quote_line,
            message: "unterminated quoted field".into(),
        });
    }
    if row_has_content || !field.is_empty() {
        row.push(field);
        rows.push(row);
    }
    Ok(rows)
}

/// Read and parse a table file.
pub fn read(path: &Path) -> Result<Vec<Row>> {
    parse(&fs::read_to_string(path)?)
}

/// Quote a single field if it needs it.
pub fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Format one row, newline-terminated.
pub fn format_row<S: AsRef<str>>(cells: &[S]) -> String {
    let mut line = cells
        .iter()
        .map(|c| escape(c.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

/// Format a full table.
pub fn format<S: AsRef<str>>(rows: &[Vec<S>]) -> String {
    rows.iter().map(|r| format_row(r)).collect()
}

/// Replace `path` with `contents` through a sibling temporary file, so a
/// failed write never leaves a half-written table behind.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_plain() {
        let rows = parse("Key,Text\nA,hello\nB,world\n").unwrap();
        assert_eq!(rows, vec![
            vec!["Key".to_string(), "Text".to_string()],
            vec!["A".to_string(), "hello".to_string()],
            vec!["B".to_string(), "world".to_string()],
        ]);
    }

    #[test]
    fn test_parse_quoted_comma_and_newline() {
        let rows = parse("a,\"b, c\",\"line1\nline2\"\r\nx,\"say \"\"hi\"\"\",z").unwrap();
        assert_eq!(rows[0], vec!["a", "b, c", "line1\nline2"]);
        assert_eq!(rows[1], vec!["x", "say \"hi\"", "z"]);
    }

    #[test]
    fn test_parse_skips_blank_lines_and_bom() {
        let rows = parse("\u{feff}h1,h2\n\n1,2\n\n").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], "h1");
    }

    #[test]
    fn test_parse_keeps_empty_fields() {
        let rows = parse("a,,c\n,\n").unwrap();
        assert_eq!(rows[0], vec!["a", "", "c"]);
        assert_eq!(rows[1], vec!["", ""]);
    }

    #[test]
    fn test_parse_unterminated_quote() {
        let err = parse("a,b\nc,\"open").unwrap_err();
        assert!(matches!(err, Error::Table { line: 2, .. }));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("a,b"), "\"a,b\"");
        assert_eq!(escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_format_then_parse_preserves_awkward_cells() {
        let rows = vec![vec!["x,y".to_string(), "q\"uote".to_string(), "multi\nline".to_string()]];
        assert_eq!(parse(&format(&rows)).unwrap(), rows);
    }
}
