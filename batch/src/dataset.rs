//! Dataset loading and range selection.

use std::path::Path;

use anyhow::{Result, bail};
use interview::core::types::CaseContext;
use interview::io::case_file::load_cases;

/// A case together with its position in the dataset.
#[derive(Debug, Clone)]
pub struct IndexedCase {
    pub index: usize,
    pub case: CaseContext,
}

/// `[start, end)` of the dataset, further capped at `limit` cases.
#[derive(Debug, Clone, Copy, Default)]
pub struct Range {
    pub start: usize,
    pub end: Option<usize>,
    pub limit: Option<usize>,
}

pub fn load_range(path: &Path, range: Range) -> Result<Vec<IndexedCase>> {
    let cases = load_cases(path)?;
    select(cases, range)
}

/// Clip `range` to the dataset; an empty selection is an error.
pub fn select(cases: Vec<CaseContext>, range: Range) -> Result<Vec<IndexedCase>> {
    let total = cases.len();
    let end = range.end.unwrap_or(total).min(total);
    let mut end = end.max(range.start);
    if let Some(limit) = range.limit {
        end = end.min(range.start.saturating_add(limit));
    }
    if range.start >= end {
        bail!(
            "no cases selected: dataset has {total} cases, range is {}..{end}",
            range.start
        );
    }
    Ok(cases
        .into_iter()
        .enumerate()
        .skip(range.start)
        .take(end - range.start)
        .map(|(index, case)| IndexedCase { index, case })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cases(n: usize) -> Vec<CaseContext> {
        (0..n)
            .map(|i| {
                serde_json::from_value(json!({"id": format!("c{i}"), "chief_complaint": "cough"}))
                    .expect("case")
            })
            .collect()
    }

    fn indices(selected: &[IndexedCase]) -> Vec<usize> {
        selected.iter().map(|case| case.index).collect()
    }

    #[test]
    fn default_range_selects_everything() {
        let selected = select(cases(3), Range::default()).expect("select");
        assert_eq!(indices(&selected), vec![0, 1, 2]);
    }

    #[test]
    fn end_is_clipped_and_limit_applies_after_start() {
        let range = Range {
            start: 1,
            end: Some(50),
            limit: Some(2),
        };
        let selected = select(cases(5), range).expect("select");
        assert_eq!(indices(&selected), vec![1, 2]);
        assert_eq!(selected[0].case.id.as_deref(), Some("c1"));
    }

    #[test]
    fn empty_range_is_an_error() {
        let past_end = Range {
            start: 3,
            ..Range::default()
        };
        assert!(select(cases(3), past_end).is_err());

        let zero_limit = Range {
            limit: Some(0),
            ..Range::default()
        };
        assert!(select(cases(3), zero_limit).is_err());

        let inverted = Range {
            start: 2,
            end: Some(1),
            limit: None,
        };
        assert!(select(cases(3), inverted).is_err());
    }

    #[test]
    fn load_range_reads_json_array() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("cases.json");
        std::fs::write(&path, r#"[{"id": 1}, {"id": 2}, {"id": 3}]"#).expect("write");
        let selected = load_range(
            &path,
            Range {
                start: 2,
                ..Range::default()
            },
        )
        .expect("load");
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].case.id.as_deref(), Some("3"));
    }
}
