use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    print!("{}", render_table(headers, &rows));
}

/// Left-aligned columns separated by two spaces, with a dashed rule under
/// the header. Trailing padding is trimmed from each line.
fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let headers: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }
    let rule: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();

    let mut out = render_line(&headers, &widths);
    out.push_str(&render_line(&rule, &widths));
    for row in rows {
        out.push_str(&render_line(row, &widths));
    }
    out
}

fn render_line(cells: &[String], widths: &[usize]) -> String {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, &w)| format!("{cell:w$}"))
        .collect();
    let mut line = padded.join("  ").trim_end().to_string();
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_align_to_widest_cell() {
        let rows = vec![
            vec!["backend".to_string(), "1234".to_string()],
            vec!["frontend".to_string(), "-".to_string()],
        ];
        let table = render_table(&["NAME", "PID"], &rows);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "NAME      PID");
        assert_eq!(lines[1], "--------  ----");
        assert_eq!(lines[2], "backend   1234");
        assert_eq!(lines[3], "frontend  -");
    }

    #[test]
    fn empty_rows_still_print_header() {
        let table = render_table(&["NAME"], &[]);
        assert_eq!(table, "NAME\n----\n");
    }
}
