use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::markers::{Marker, all_markers};
use crate::side_effects::SideEffectCheckerConfig;

/// Settings for one analysis run, usually read from a JSON file.
///
/// ```json
/// {
///   "side_effects": { "include_built_in_exceptions": true },
///   "markers": ["PARAMETER_ESCAPE", "READ_WRITE_FIELD"]
/// }
/// ```
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    pub side_effects: SideEffectCheckerConfig,
    /// Marker ids to run; every registered marker when absent.
    pub markers: Option<Vec<String>>,
}

impl AnalysisConfig {
    /// Parses a configuration document. Errors name the offending key path.
    pub fn from_json(json: &str) -> Result<Self> {
        let deserializer = &mut serde_json::Deserializer::from_str(json);
        serde_path_to_error::deserialize(deserializer).map_err(|err| {
            let path = err.path().to_string();
            anyhow::Error::new(err.into_inner()).context(format!("invalid configuration at {path}"))
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("failed to parse {}", path.display()))
    }
}

/// Registered markers enabled by `config`, sorted by id.
pub fn select_markers(config: &AnalysisConfig) -> Result<Vec<Box<dyn Marker + Sync>>> {
    let markers = all_markers();
    let Some(enabled) = &config.markers else {
        return Ok(markers);
    };
    let known: BTreeSet<&str> = markers.iter().map(|marker| marker.metadata().id).collect();
    let unknown: Vec<&str> = enabled
        .iter()
        .map(String::as_str)
        .filter(|id| !known.contains(id))
        .collect();
    if !unknown.is_empty() {
        bail!("unknown marker ids: {}", unknown.join(", "));
    }
    Ok(markers
        .into_iter()
        .filter(|marker| enabled.iter().any(|id| id == marker.metadata().id))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_uses_defaults() {
        let config = AnalysisConfig::from_json("{}").expect("config");

        assert_eq!(config, AnalysisConfig::default());
        assert!(!config.side_effects.include_return_instructions);
    }

    #[test]
    fn unknown_keys_report_their_path() {
        let err = AnalysisConfig::from_json(r#"{"side_effects": {"include_everything": true}}"#)
            .expect_err("unknown key");

        let message = format!("{err:#}");
        assert!(message.contains("side_effects"), "{message}");
        assert!(message.contains("include_everything"), "{message}");
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{"side_effects": {{"include_array_store_instructions": true}}, "markers": ["DOT_CLASS"]}}"#
        )
        .expect("write");

        let config = AnalysisConfig::load(file.path()).expect("config");

        assert!(config.side_effects.include_array_store_instructions);
        assert_eq!(config.markers, Some(vec!["DOT_CLASS".to_string()]));
    }

    #[test]
    fn load_names_missing_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("missing.json");

        let err = AnalysisConfig::load(&path).expect_err("missing file");

        assert!(format!("{err:#}").contains("missing.json"));
    }

    #[test]
    fn select_markers_filters_by_id() {
        let config = AnalysisConfig {
            markers: Some(vec!["DOT_CLASS".to_string(), "BACKWARD_BRANCH".to_string()]),
            ..AnalysisConfig::default()
        };

        let ids: Vec<&str> = select_markers(&config)
            .expect("markers")
            .iter()
            .map(|marker| marker.metadata().id)
            .collect();

        assert_eq!(ids, vec!["BACKWARD_BRANCH", "DOT_CLASS"]);
    }

    #[test]
    fn select_markers_rejects_unknown_ids() {
        let config = AnalysisConfig {
            markers: Some(vec!["NO_SUCH_MARKER".to_string()]),
            ..AnalysisConfig::default()
        };

        let err = select_markers(&config).err().expect("unknown id");

        assert!(err.to_string().contains("NO_SUCH_MARKER"));
    }
}
