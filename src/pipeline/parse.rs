//! Delimited-text parsing: model output → [`Grid`].
//!
//! The model is asked for a delimited table but nothing guarantees it.
//! It sometimes wraps the answer in a fenced block, appends a caption
//! after the table, or emits rows of different widths. The parser accepts
//! all of that: every non-blank line becomes a row, and it never fails.
//!
//! ## Algorithm
//!
//! 1. Split on a fence marker (three backticks, optional whitespace, then
//!    a newline). Drop sections that are blank after trimming.
//! 2. Split each section into lines and drop blank lines.
//! 3. Split each line on the configured delimiter and trim every cell.
//!    Rows are not padded.
//! 4. Join sections with exactly one empty row between them.

use crate::grid::{Grid, Row};
use once_cell::sync::Lazy;
use regex::Regex;

static RE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```\s*\n").unwrap());

/// Parse combined model text into a ragged grid.
pub fn parse_table(text: &str, delimiter: char) -> Grid {
    let mut grid = Grid::new();

    for section in RE_FENCE.split(text) {
        if section.trim().is_empty() {
            continue;
        }

        let rows: Vec<Row> = section
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| split_row(line, delimiter))
            .collect();

        if !grid.is_empty() && !rows.is_empty() {
            grid.push_row(Vec::new());
        }
        grid.extend_rows(rows);
    }

    grid
}

fn split_row(line: &str, delimiter: char) -> Row {
    line.split(delimiter)
        .map(|cell| cell.trim().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(g: &Grid) -> Vec<Vec<&str>> {
        g.rows()
            .iter()
            .map(|r| r.iter().map(String::as_str).collect())
            .collect()
    }

    #[test]
    fn well_formed_table() {
        let g = parse_table("x,y\nz,w", ',');
        assert_eq!(rows(&g), vec![vec!["x", "y"], vec!["z", "w"]]);
    }

    #[test]
    fn fenced_block_then_caption() {
        let g = parse_table("```\na,b\n```\nCaption text", ',');
        assert_eq!(
            rows(&g),
            vec![vec!["a", "b"], vec![], vec!["Caption text"]]
        );
    }

    #[test]
    fn ragged_rows_are_not_padded() {
        let g = parse_table("a,b,c\nd,e", ',');
        assert_eq!(rows(&g), vec![vec!["a", "b", "c"], vec!["d", "e"]]);
    }

    #[test]
    fn cells_are_trimmed() {
        let g = parse_table("  Article , Qté ,Prix  \r\n Vis M6 ,  12, 0.40", ',');
        assert_eq!(
            rows(&g),
            vec![vec!["Article", "Qté", "Prix"], vec!["Vis M6", "12", "0.40"]]
        );
    }

    #[test]
    fn blank_lines_inside_a_section_are_dropped() {
        let g = parse_table("a,b\n\n   \nc,d\n", ',');
        assert_eq!(rows(&g), vec![vec!["a", "b"], vec!["c", "d"]]);
    }

    #[test]
    fn blank_sections_do_not_add_separators() {
        let g = parse_table("```\n\n```  \n   \n```\na,b\n```\n", ',');
        assert_eq!(rows(&g), vec![vec!["a", "b"]]);
    }

    #[test]
    fn three_sections_get_two_separators() {
        let g = parse_table("a\n```\nb\n```\nc", ',');
        assert_eq!(
            rows(&g),
            vec![vec!["a"], vec![], vec!["b"], vec![], vec!["c"]]
        );
    }

    #[test]
    fn pipe_delimiter() {
        let g = parse_table("Ref | Désignation\nA1 | Écrou", '|');
        assert_eq!(
            rows(&g),
            vec![vec!["Ref", "Désignation"], vec!["A1", "Écrou"]]
        );
    }

    #[test]
    fn delimiter_is_not_auto_detected() {
        let g = parse_table("a|b", ',');
        assert_eq!(rows(&g), vec![vec!["a|b"]]);
    }

    #[test]
    fn empty_and_whitespace_input() {
        assert!(parse_table("", ',').is_empty());
        assert!(parse_table(" \n\t\n", ',').is_empty());
    }

    #[test]
    fn language_tagged_fence_is_kept_as_text() {
        // Only a bare fence marker followed by a newline splits sections.
        let g = parse_table("```csv\na,b\n```", ',');
        assert_eq!(rows(&g), vec![vec!["```csv"], vec!["a", "b"], vec!["```"]]);
    }
}
