use chrono::NaiveDate;
use ledgerhouse_model::FileKind;
use once_cell::sync::Lazy;
use regex::Regex;

/// On-disk suffix of framed-compressed record files.
pub const RAW_SUFFIX: &str = ".bin.gz";

static MIGRATION_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|/)migration=(\d+)(?:/|$)").expect("static regex"));

static DATE_SEGMENTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|/)year=(\d{4})/month=(\d{1,2})/day=(\d{1,2})(?:/|$)")
        .expect("static regex")
});

/// Everything the scanner can learn from a normalized relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPath {
    pub kind: FileKind,
    pub migration_id: Option<i64>,
    pub record_date: Option<NaiveDate>,
}

/// Classify a normalized (forward-slash) relative path.
///
/// `None` when the filename prefix is unrecognized or the suffix is not the
/// framed-compressed container - such files are skipped, not errors.
pub fn parse_path(path: &str) -> Option<ParsedPath> {
    if !path.ends_with(RAW_SUFFIX) {
        return None;
    }
    let filename = path.rsplit('/').next().unwrap_or(path);
    let kind = FileKind::from_filename(filename)?;

    let migration_id = MIGRATION_SEGMENT
        .captures(path)
        .and_then(|c| c[1].parse::<i64>().ok());

    let record_date = DATE_SEGMENTS.captures(path).and_then(|c| {
        let year = c[1].parse::<i32>().ok()?;
        let month = c[2].parse::<u32>().ok()?;
        let day = c[3].parse::<u32>().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)
    });

    Some(ParsedPath { kind, migration_id, record_date })
}
