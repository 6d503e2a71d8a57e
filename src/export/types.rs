// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use sqlgate_core::EngineError;

/// Output encodings a result set can be streamed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Csv,
    Json,
    Ldjson,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 3] = [OutputFormat::Csv, OutputFormat::Json, OutputFormat::Ldjson];

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "text/csv",
            OutputFormat::Json => "application/json",
            OutputFormat::Ldjson => "application/x-ldjson",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
            OutputFormat::Ldjson => "ldjson",
        }
    }

    /// Maps a media type to a format. An empty value or `*/*` selects JSON,
    /// and `application/json; boundary=NL` selects line-delimited JSON.
    /// Parameters other than `boundary` are ignored.
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        let mut parts = media_type.split(';');
        let essence = parts.next().unwrap_or("").trim().to_ascii_lowercase();
        let newline_boundary = parts.any(|param| {
            param
                .split_once('=')
                .map(|(k, v)| {
                    k.trim().eq_ignore_ascii_case("boundary")
                        && v.trim().trim_matches('"') == "NL"
                })
                .unwrap_or(false)
        });

        match essence.as_str() {
            "" | "*/*" => Some(OutputFormat::Json),
            "application/json" if newline_boundary => Some(OutputFormat::Ldjson),
            "application/json" => Some(OutputFormat::Json),
            "text/csv" => Some(OutputFormat::Csv),
            "application/x-ldjson" => Some(OutputFormat::Ldjson),
            _ => None,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OutputFormat {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OutputFormat::ALL
            .into_iter()
            .find(|format| format.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| EngineError::invalid_parameter(format!("unknown output format: {}", s)))
    }
}

/// What an encoder wrote to its sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeSummary {
    pub rows_written: u64,
    pub bytes_written: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_types() {
        assert_eq!(OutputFormat::Csv.content_type(), "text/csv");
        assert_eq!(OutputFormat::Json.content_type(), "application/json");
        assert_eq!(OutputFormat::Ldjson.content_type(), "application/x-ldjson");
    }

    #[test]
    fn test_from_str() {
        assert_eq!("csv".parse::<OutputFormat>().unwrap(), OutputFormat::Csv);
        assert_eq!("LDJSON".parse::<OutputFormat>().unwrap(), OutputFormat::Ldjson);
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_from_media_type() {
        assert_eq!(OutputFormat::from_media_type(""), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::from_media_type("*/*"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::from_media_type("text/csv"), Some(OutputFormat::Csv));
        assert_eq!(
            OutputFormat::from_media_type("application/json; boundary=NL"),
            Some(OutputFormat::Ldjson)
        );
        assert_eq!(
            OutputFormat::from_media_type("application/x-ldjson"),
            Some(OutputFormat::Ldjson)
        );
        assert_eq!(OutputFormat::from_media_type("text/html"), None);
    }
}
