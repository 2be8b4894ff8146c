//! Start command parameters.
//!
//! ```json
//! {
//!     "mode": "source",
//!     "store": "fs",
//!     "indices": "logs-*",
//!     "location": "/mount/backup"
//! }
//! ```
//!
//! `location` is a directory for `fs` and a bucket name for `gcs` / `s3`.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which side of the migration this process drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Export collections into the repository.
    Source,
    /// Import collections out of the repository.
    Sink,
}

impl FromStr for RunMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(RunMode::Source),
            "sink" => Ok(RunMode::Sink),
            other => Err(SyncError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Source => f.write_str("source"),
            RunMode::Sink => f.write_str("sink"),
        }
    }
}

/// Backing store type of the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    /// Shared filesystem mount.
    Fs,
    /// Google Cloud Storage bucket.
    Gcs,
    /// Amazon S3 bucket.
    S3,
}

impl StoreType {
    /// Repository type name as registered with the cluster.
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreType::Fs => "fs",
            StoreType::Gcs => "gcs",
            StoreType::S3 => "s3",
        }
    }

    /// Cluster plugin required for this store, if any.
    pub fn plugin(&self) -> Option<&'static str> {
        match self {
            StoreType::Fs => None,
            StoreType::Gcs => Some("repository-gcs"),
            StoreType::S3 => Some("repository-s3"),
        }
    }
}

impl FromStr for StoreType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fs" => Ok(StoreType::Fs),
            "gcs" => Ok(StoreType::Gcs),
            "s3" | "aws-s3" => Ok(StoreType::S3),
            other => Err(SyncError::InvalidRequest(format!("unsupported store: {other}"))),
        }
    }
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw start request body.
#[derive(Debug, Default, Deserialize)]
struct StartRequest {
    mode: Option<String>,
    store: Option<String>,
    indices: Option<String>,
    location: Option<String>,
}

/// Validated parameters of one run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunParams {
    /// Source or sink.
    pub mode: RunMode,
    /// Repository store type.
    pub store: StoreType,
    /// Collection name pattern (source only).
    pub indices: Option<String>,
    /// Repository location: path or bucket.
    pub location: Option<String>,
}

impl RunParams {
    /// Parameters for a source run.
    pub fn source(store: StoreType, indices: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            mode: RunMode::Source,
            store,
            indices: Some(indices.into()),
            location: Some(location.into()),
        }
    }

    /// Parameters for a sink run.
    pub fn sink(store: StoreType, location: Option<String>) -> Self {
        Self {
            mode: RunMode::Sink,
            store,
            indices: None,
            location,
        }
    }

    /// Parses and validates a JSON start request.
    ///
    /// # Errors
    ///
    /// Returns an input error if the body is not JSON or fails validation.
    pub fn from_json(body: &str) -> SyncResult<Self> {
        let request: StartRequest = serde_json::from_str(body)
            .map_err(|e| SyncError::InvalidRequest(format!("start body is not valid JSON: {e}")))?;
        Self::from_parts(
            request.mode.as_deref(),
            request.store.as_deref(),
            request.indices.as_deref(),
            request.location.as_deref(),
        )
    }

    /// Validates loose start parameters.
    ///
    /// `mode` is checked first, so a bad mode is reported even when other
    /// parameters are also missing. Blank strings count as missing.
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidMode`] unless mode is exactly `source` or `sink`
    /// - [`SyncError::MissingParameter`] for a missing `store`, or a missing
    ///   `indices` / `location` on the source
    /// - [`SyncError::InvalidRequest`] for an unknown store type
    pub fn from_parts(
        mode: Option<&str>,
        store: Option<&str>,
        indices: Option<&str>,
        location: Option<&str>,
    ) -> SyncResult<Self> {
        let mode: RunMode = mode.unwrap_or_default().parse()?;
        let store: StoreType = non_blank(store)
            .ok_or(SyncError::MissingParameter("store"))?
            .parse()?;
        let indices = non_blank(indices).map(str::to_string);
        let location = non_blank(location).map(str::to_string);

        if mode == RunMode::Source {
            if indices.is_none() {
                return Err(SyncError::MissingParameter("indices"));
            }
            if location.is_none() {
                return Err(SyncError::MissingParameter("location"));
            }
        }

        Ok(Self {
            mode,
            store,
            indices,
            location,
        })
    }

    /// The collection pattern of a source run.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MissingParameter`] if no pattern was given.
    pub fn indices(&self) -> SyncResult<&str> {
        self.indices
            .as_deref()
            .ok_or(SyncError::MissingParameter("indices"))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_source_request() {
        let params = RunParams::from_json(
            r#"{"mode":"source","store":"fs","indices":"logs-*","location":"/mount/backup"}"#,
        )
        .unwrap();

        assert_eq!(params.mode, RunMode::Source);
        assert_eq!(params.store, StoreType::Fs);
        assert_eq!(params.indices().unwrap(), "logs-*");
        assert_eq!(params.location.as_deref(), Some("/mount/backup"));
    }

    #[test]
    fn parse_sink_request() {
        let params = RunParams::from_json(r#"{"mode":"sink","store":"gcs"}"#).unwrap();

        assert_eq!(params, RunParams::sink(StoreType::Gcs, None));
        assert!(params.indices().is_err());
    }

    #[test]
    fn mode_must_be_exact() {
        for body in [
            r#"{"mode":"Source","store":"fs","indices":"a","location":"b"}"#,
            r#"{"mode":"both","store":"fs"}"#,
            r#"{"store":"fs","indices":"a","location":"b"}"#,
        ] {
            let result = RunParams::from_json(body);
            assert!(matches!(result, Err(SyncError::InvalidMode(_))), "{body}");
        }
    }

    #[test]
    fn mode_checked_before_other_fields() {
        let result = RunParams::from_parts(Some("replica"), None, None, None);
        assert!(matches!(result, Err(SyncError::InvalidMode(_))));
    }

    #[test]
    fn source_requires_pattern_and_location() {
        let result = RunParams::from_parts(Some("source"), Some("fs"), None, Some("/b"));
        assert!(matches!(result, Err(SyncError::MissingParameter("indices"))));

        let result = RunParams::from_parts(Some("source"), Some("fs"), Some("logs-*"), Some("  "));
        assert!(matches!(result, Err(SyncError::MissingParameter("location"))));
    }

    #[test]
    fn store_is_required_and_known() {
        let result = RunParams::from_parts(Some("sink"), None, None, None);
        assert!(matches!(result, Err(SyncError::MissingParameter("store"))));

        let result = RunParams::from_parts(Some("sink"), Some("azure"), None, None);
        assert!(matches!(result, Err(SyncError::InvalidRequest(_))));
    }

    #[test]
    fn malformed_body() {
        let result = RunParams::from_json("mode=source");
        assert!(matches!(result, Err(SyncError::InvalidRequest(_))));
    }

    #[test]
    fn store_plugins() {
        assert_eq!(StoreType::Fs.plugin(), None);
        assert_eq!(StoreType::Gcs.plugin(), Some("repository-gcs"));
        assert_eq!("aws-s3".parse::<StoreType>().unwrap(), StoreType::S3);
    }
}
