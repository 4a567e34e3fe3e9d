//! Pipe-delimited table parser for the versioning endpoint
//!
//! Both the `/versions` and `/cdns` responses share one line-oriented
//! shape:
//!
//! ```text
//! Region!STRING:0|BuildConfig!HEX:16|...|VersionsName!String:0|...
//! ## seqn = 3011512
//! us|be2bb98d…|5a0f296e…|…|56421|11.0.2.56421|53020d32…
//! eu|be2bb98d…|5a0f296e…|…|56421|11.0.2.56421|53020d32…
//! ```
//!
//! Comment lines start with `#`; exactly one of them carries the shared
//! sequence number. The header is the first pipe line, its cells shaped
//! `Name!TYPE:len`. Everything after it is one data row per region.

/// Marker prefix of the sequence comment line
const SEQN_MARKER: &str = "## seqn = ";

/// A parsed pipe-delimited response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeTable {
    /// Shared sequence number, when the response carried a parseable one
    pub seqn: Option<u64>,
    /// Column names from the header, `!TYPE:len` suffixes stripped
    pub columns: Vec<String>,
    /// Data rows, split on `|`
    pub rows: Vec<Vec<String>>,
}

/// Parse failures below the level of any one product
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// Body too short to contain a header and a data row
    TooShort,
    /// No header line found
    NoHeader,
}

impl PipeTable {
    /// Index of a named column
    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell of `row` under the named column; `None` when the column is
    /// unknown or the row is short
    pub fn cell<'a>(&self, row: &'a [String], name: &str) -> Option<&'a str> {
        row.get(self.column(name)?).map(String::as_str)
    }
}

/// Parse a pipe-delimited response body
pub fn parse(body: &str) -> Result<PipeTable, WireError> {
    if body.lines().count() < 3 {
        return Err(WireError::TooShort);
    }

    let mut seqn = None;
    let mut columns: Vec<String> = Vec::new();
    let mut rows = Vec::new();

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }

        if let Some(value) = line.strip_prefix(SEQN_MARKER) {
            seqn = value.trim().parse::<u64>().ok();
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        if !line.contains('|') {
            continue;
        }

        if columns.is_empty() {
            columns = line
                .split('|')
                .map(|cell| cell.split('!').next().unwrap_or(cell).to_string())
                .collect();
        } else {
            rows.push(line.split('|').map(str::to_string).collect());
        }
    }

    if columns.is_empty() {
        return Err(WireError::NoHeader);
    }

    Ok(PipeTable {
        seqn,
        columns,
        rows,
    })
}

/// Strip the trailing build-number segment from a versions-name cell.
///
/// The endpoint embeds the build number as the last dotted segment of the
/// version text ("11.0.2.56421" with build 56421); the canonical text is
/// everything before it. A cell without the suffix passes through as-is.
pub fn strip_build_suffix(versions_name: &str, build: &str) -> String {
    versions_name
        .strip_suffix(&format!(".{build}"))
        .unwrap_or(versions_name)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERSIONS_BODY: &str = "Region!STRING:0|BuildConfig!HEX:16|CDNConfig!HEX:16|KeyRing!HEX:16|BuildId!DEC:4|VersionsName!String:0|ProductConfig!HEX:16\n\
## seqn = 3011512\n\
us|aabbccdd|eeff0011|22334455|56421|11.0.2.56421|99887766\n\
eu|aabbccdd|eeff0011|22334455|56421|11.0.2.56421|99887766\n";

    #[test]
    fn parses_seqn_header_and_rows() {
        let table = parse(VERSIONS_BODY).unwrap();
        assert_eq!(table.seqn, Some(3011512));
        assert_eq!(table.columns[0], "Region");
        assert_eq!(table.columns[5], "VersionsName");
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.cell(&table.rows[0], "Region"), Some("us"));
        assert_eq!(table.cell(&table.rows[1], "BuildId"), Some("56421"));
    }

    #[test]
    fn seqn_marker_position_does_not_matter() {
        // some endpoints put the marker before the header, some after
        let body = "## seqn = 7\n\
Name!STRING:0|Path!STRING:0\n\
us|tpr/configs/data\n";
        let table = parse(body).unwrap();
        assert_eq!(table.seqn, Some(7));
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn short_body_is_too_short() {
        assert_eq!(parse("").unwrap_err(), WireError::TooShort);
        assert_eq!(parse("one\ntwo").unwrap_err(), WireError::TooShort);
    }

    #[test]
    fn body_without_pipes_has_no_header() {
        assert_eq!(
            parse("## seqn = 1\nnothing\nhere either\n").unwrap_err(),
            WireError::NoHeader
        );
    }

    #[test]
    fn garbled_seqn_parses_as_absent() {
        let body = "## seqn = banana\n\
Region!STRING:0|BuildId!DEC:4\n\
us|100\n";
        assert_eq!(parse(body).unwrap().seqn, None);
    }

    #[test]
    fn unknown_column_and_short_row_yield_none() {
        let table = parse(VERSIONS_BODY).unwrap();
        assert_eq!(table.cell(&table.rows[0], "Bogus"), None);
        let short_row = vec!["us".to_string()];
        assert_eq!(table.cell(&short_row, "BuildId"), None);
    }

    #[test]
    fn build_suffix_stripping() {
        assert_eq!(strip_build_suffix("11.0.2.56421", "56421"), "11.0.2");
        assert_eq!(strip_build_suffix("1.15.3", "56421"), "1.15.3");
        assert_eq!(strip_build_suffix("56421", "56421"), "56421");
    }
}
