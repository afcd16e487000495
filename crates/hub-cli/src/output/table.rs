/// Render aligned columns with a dashed rule under the header. Numbers are
/// right-aligned.
#[must_use]
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(i, header)| {
            rows.iter()
                .filter_map(|row| row.get(i))
                .map(|cell| cell.chars().count())
                .chain(std::iter::once(header.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let header = headers
        .iter()
        .zip(&widths)
        .map(|(h, w)| pad(h, *w, false))
        .collect::<Vec<_>>()
        .join("  ");
    let rule = "-".repeat(header.chars().count());

    let mut lines = vec![header.trim_end().to_string(), rule];
    for row in rows {
        let line = widths
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let cell = row.get(i).map_or("-", String::as_str);
                pad(cell, *w, is_numeric(cell))
            })
            .collect::<Vec<_>>()
            .join("  ");
        lines.push(line.trim_end().to_string());
    }
    lines.join("\n")
}

fn pad(value: &str, width: usize, right_align: bool) -> String {
    let fill = " ".repeat(width.saturating_sub(value.chars().count()));
    if right_align {
        format!("{fill}{value}")
    } else {
        format!("{value}{fill}")
    }
}

fn is_numeric(value: &str) -> bool {
    !value.is_empty() && value.parse::<f64>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_align_and_numbers_right_align() {
        let rows = vec![
            vec!["stk-1".to_string(), "active".to_string(), "3".to_string()],
            vec!["stk-200".to_string(), "failed".to_string(), "12".to_string()],
        ];
        let out = render_table(&["id", "status", "runs"], &rows);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].chars().all(|c| c == '-'));
        assert!(lines[2].ends_with("   3"));
        assert!(lines[3].ends_with("  12"));
        assert_eq!(lines[2].find("active"), lines[3].find("failed"));
    }
}
