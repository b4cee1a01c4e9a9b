//! Index record model
//!
//! One line of an archive index query response describes a single capture of
//! a page: where it lives in the archive's storage (file, offset, length)
//! and what was observed (status, mime type, timestamp). The service emits
//! numeric fields as JSON strings, so deserialization accepts both forms.

use serde::{Deserialize, Deserializer, Serialize};

/// One observation of a logical page, as reported by an index query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub url: String,

    /// HTTP status of the capture, as a string code (e.g. "200").
    #[serde(default)]
    pub status: String,

    /// Mime type claimed by the origin server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,

    /// Mime type detected by the archive; preferred over `mime` when present.
    #[serde(
        rename = "mime-detected",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub mime_detected: Option<String>,

    /// Declared payload size in bytes; also the byte count of the stored
    /// range.
    #[serde(default, deserialize_with = "lenient_u64")]
    pub length: u64,

    /// Sortable capture timestamp (e.g. "20240115120000").
    #[serde(default)]
    pub timestamp: String,

    /// Content digest assigned by the archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    /// Storage file holding the raw capture bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    /// Byte offset of the capture within `filename`.
    #[serde(default, deserialize_with = "lenient_opt_u64")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl RawRecord {
    /// Effective mime type: the archive's detection wins over the origin's
    /// claim.
    pub fn mime(&self) -> Option<&str> {
        self.mime_detected.as_deref().or(self.mime.as_deref())
    }

    /// Whether this capture looks like an HTML page.
    pub fn is_html(&self) -> bool {
        self.mime()
            .map(|m| m.to_ascii_lowercase().contains("html"))
            .unwrap_or(false)
    }

    /// Whether the record carries a complete storage locator.
    pub fn has_locator(&self) -> bool {
        self.filename.as_deref().is_some_and(|f| !f.is_empty())
            && self.offset.is_some()
            && self.length > 0
    }
}

/// The index emits numbers as strings ("length": "12345"); tolerate both.
/// Unparseable values fold to zero rather than rejecting the whole record.
fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(u64),
        Str(String),
    }

    Ok(match NumOrStr::deserialize(deserializer)? {
        NumOrStr::Num(n) => n,
        NumOrStr::Str(s) => s.trim().parse().unwrap_or(0),
    })
}

fn lenient_opt_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(u64),
        Str(String),
    }

    Ok(
        match Option::<NumOrStr>::deserialize(deserializer)? {
            Some(NumOrStr::Num(n)) => Some(n),
            Some(NumOrStr::Str(s)) => s.trim().parse().ok(),
            None => None,
        },
    )
}

/// Parse a newline-delimited JSON body into records, skipping corrupt lines.
///
/// The remote index intermixes the occasional truncated or non-JSON line
/// with valid records; those lines are dropped rather than failing the page.
pub fn parse_ndjson(body: &str) -> Vec<RawRecord> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<RawRecord>(line).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{"urlkey":"com,example)/world","timestamp":"20240115120000","url":"https://example.com/world","mime":"text/html","mime-detected":"text/html","status":"200","digest":"AAAABBBB","length":"1234","offset":"5678","filename":"crawl-data/SEG-2024-10/warc/part-00001.warc.gz"}"#;

    #[test]
    fn test_deserialize_string_numbers() {
        let rec: RawRecord = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(rec.length, 1234);
        assert_eq!(rec.offset, Some(5678));
        assert_eq!(rec.status, "200");
        assert!(rec.is_html());
        assert!(rec.has_locator());
    }

    #[test]
    fn test_deserialize_integer_numbers() {
        let json = r#"{"url":"https://example.com/a","status":"200","length":99,"offset":7,"timestamp":"2020"}"#;
        let rec: RawRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.length, 99);
        assert_eq!(rec.offset, Some(7));
    }

    #[test]
    fn test_unparseable_length_folds_to_zero() {
        let json = r#"{"url":"https://example.com/a","status":"200","length":"not-a-number","timestamp":"2020"}"#;
        let rec: RawRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.length, 0);
    }

    #[test]
    fn test_mime_detected_preferred() {
        let json = r#"{"url":"https://example.com/a","mime":"application/octet-stream","mime-detected":"text/html"}"#;
        let rec: RawRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.mime(), Some("text/html"));
        assert!(rec.is_html());
    }

    #[test]
    fn test_parse_ndjson_skips_corrupt_lines() {
        let body = format!("{SAMPLE}\nnot json at all\n\n{SAMPLE}\n");
        let records = parse_ndjson(&body);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_missing_locator() {
        let json = r#"{"url":"https://example.com/a","status":"200","length":"10"}"#;
        let rec: RawRecord = serde_json::from_str(json).unwrap();
        assert!(!rec.has_locator());
    }
}
