//! Spreadsheet encoding: a [`Grid`] becomes a single-sheet `.xlsx` workbook.
//!
//! Row `i`, column `j` of the grid lands in cell `(i, j)`. Every cell is
//! written as a string so values such as `=SUM(A1)` or `007` survive
//! unchanged. Empty cells are left blank rather than written.

use crate::error::Img2XlsxError;
use crate::grid::Grid;
use rust_xlsxwriter::{Workbook, XlsxError};
use std::path::Path;
use tracing::debug;

/// Suggested download name for a workbook.
pub const DEFAULT_FILE_NAME: &str = "bon-de-livraison.xlsx";

fn encode_error(e: XlsxError) -> Img2XlsxError {
    Img2XlsxError::EncodeFailed {
        detail: e.to_string(),
    }
}

/// Encode `grid` as an xlsx file held in memory.
///
/// Column widths are set to the longest cell in each column, in characters,
/// capped at `max_column_width`. Columns whose cells are all empty keep the
/// default width.
pub fn write_workbook(
    grid: &Grid,
    sheet_name: &str,
    max_column_width: usize,
) -> Result<Vec<u8>, Img2XlsxError> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet_name).map_err(encode_error)?;

    for (r, row) in grid.rows().iter().enumerate() {
        let row_num = u32::try_from(r).map_err(|_| Img2XlsxError::EncodeFailed {
            detail: format!("row {r} is out of range"),
        })?;
        for (c, cell) in row.iter().enumerate() {
            if cell.is_empty() {
                continue;
            }
            let col_num = u16::try_from(c).map_err(|_| Img2XlsxError::EncodeFailed {
                detail: format!("column {c} is out of range"),
            })?;
            worksheet
                .write_string(row_num, col_num, cell)
                .map_err(encode_error)?;
        }
    }

    for (c, width) in grid.column_widths(max_column_width).into_iter().enumerate() {
        if width == 0 {
            continue;
        }
        let col_num = u16::try_from(c).map_err(|_| Img2XlsxError::EncodeFailed {
            detail: format!("column {c} is out of range"),
        })?;
        worksheet
            .set_column_width(col_num, width as f64)
            .map_err(encode_error)?;
    }

    let bytes = workbook.save_to_buffer().map_err(encode_error)?;
    debug!(
        "Encoded {} row(s) x {} column(s) into {} bytes",
        grid.len(),
        grid.column_count(),
        bytes.len()
    );
    Ok(bytes)
}

/// Write workbook bytes to `path` atomically (temp file + rename).
///
/// Missing parent directories are created.
pub async fn save_workbook(bytes: &[u8], path: &Path) -> Result<(), Img2XlsxError> {
    let write_err = |e| Img2XlsxError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("xlsx.tmp");
    tokio::fs::write(&tmp_path, bytes).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    debug!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use calamine::{open_workbook_from_rs, Data, Reader, Xlsx};
    use std::io::Cursor;

    fn grid(rows: &[&[&str]]) -> Grid {
        Grid::from(
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect::<Vec<_>>(),
        )
    }

    fn read_back(bytes: Vec<u8>, sheet: &str) -> calamine::Range<Data> {
        let mut wb: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes)).unwrap();
        wb.worksheet_range(sheet).unwrap()
    }

    fn cell(range: &calamine::Range<Data>, r: u32, c: u32) -> String {
        match range.get_value((r, c)) {
            Some(Data::String(s)) => s.clone(),
            Some(Data::Empty) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    #[test]
    fn ragged_grid_reads_back_cell_for_cell() {
        let g = grid(&[
            &["Article", "Qté", "Prix"],
            &["Vis M6", "100"],
            &[],
            &["Livré le 12/03"],
        ]);
        let bytes = write_workbook(&g, "Bon de livraison", 50).unwrap();
        let range = read_back(bytes, "Bon de livraison");

        assert_eq!(cell(&range, 0, 0), "Article");
        assert_eq!(cell(&range, 0, 1), "Qté");
        assert_eq!(cell(&range, 0, 2), "Prix");
        assert_eq!(cell(&range, 1, 0), "Vis M6");
        assert_eq!(cell(&range, 1, 1), "100");
        assert_eq!(cell(&range, 1, 2), "");
        assert_eq!(cell(&range, 2, 0), "");
        assert_eq!(cell(&range, 3, 0), "Livré le 12/03");
    }

    #[test]
    fn values_stay_strings() {
        let g = grid(&[&["=SUM(A1:A3)", "007"]]);
        let bytes = write_workbook(&g, "Sheet", 50).unwrap();
        let range = read_back(bytes, "Sheet");
        assert_eq!(range.get_value((0, 0)), Some(&Data::String("=SUM(A1:A3)".into())));
        assert_eq!(range.get_value((0, 1)), Some(&Data::String("007".into())));
    }

    #[test]
    fn empty_grid_still_produces_a_workbook() {
        let bytes = write_workbook(&Grid::new(), "Bon de livraison", 50).unwrap();
        assert!(bytes.starts_with(b"PK"), "xlsx is a zip container");
    }

    #[test]
    fn invalid_sheet_name_is_encode_error() {
        let err = write_workbook(&grid(&[&["a"]]), "bad/name", 50).unwrap_err();
        assert!(matches!(err, Img2XlsxError::EncodeFailed { .. }));
    }

    #[tokio::test]
    async fn save_creates_parent_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/nested/table.xlsx");
        let bytes = write_workbook(&grid(&[&["a"]]), "Sheet", 50).unwrap();

        save_workbook(&bytes, &path).await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), bytes);
        assert!(!path.with_extension("xlsx.tmp").exists());
    }

    #[test]
    fn wide_cells_do_not_fail() {
        let long = "x".repeat(400);
        let g = grid(&[&[long.as_str(), ""]]);
        assert!(write_workbook(&g, "Sheet", 50).is_ok());
    }
}
