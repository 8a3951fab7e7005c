//! Typed configuration for batch jobs.
//!
//! Tuning knobs arrive as one flat struct deserialized from JSON (or built
//! in code) and are consumed once, while the job graph is constructed —
//! conditional steps and profile-specific sources are resolved here, never
//! re-evaluated mid-run.

use serde::Deserialize;

use crate::BatchError;
use crate::core::item::ItemReader;
use crate::core::parameters::JobParameters;
use crate::item::lines::LineItemReader;
use crate::item::list::ListItemReader;

/// Step tuning knobs and job-graph toggles.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BatchProperties {
    /// Items per commit.
    pub chunk_size: usize,
    /// Tolerated whitelisted per-item failures across a step.
    pub skip_limit: usize,
    /// Additional write attempts for a failing chunk commit.
    pub retry_limit: usize,
    /// Chunk worker pool size per step.
    pub concurrency: usize,
    /// Whether the optional trailing cleanup step is wired into the graph.
    pub enable_cleanup_step: bool,
}

impl Default for BatchProperties {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            skip_limit: 0,
            retry_limit: 0,
            concurrency: 1,
            enable_cleanup_step: false,
        }
    }
}

impl BatchProperties {
    pub fn from_json(raw: &str) -> Result<Self, BatchError> {
        serde_json::from_str(raw)
            .map_err(|error| BatchError::Configuration(format!("invalid properties: {error}")))
    }
}

/// Environment profile selecting where string items come from.
///
/// Resolved once at process start; the chosen factory is handed to the job
/// builder as a plain value, so the graph never consults the environment
/// again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceProfile {
    /// Small in-memory list, no external setup.
    Dev,
    /// Line-oriented file named by the `input.path` job parameter.
    Prod,
}

impl SourceProfile {
    /// Builds the reader for this profile from the resolved job parameters.
    ///
    /// Shaped to slot straight into
    /// [`crate::core::chunk::ChunkStepBuilder::reader`]:
    ///
    /// ```
    /// use batchling::config::SourceProfile;
    /// use batchling::core::item::PassThroughProcessor;
    /// use batchling::core::parameters::JobParameters;
    /// use batchling::core::step::StepBuilder;
    /// use batchling::item::logger::LoggerWriter;
    ///
    /// let profile = SourceProfile::Dev;
    /// let step = StepBuilder::new("process")
    ///     .chunk::<String, String>(3)
    ///     .reader(move |parameters: &JobParameters| profile.open_reader(parameters))
    ///     .processor(PassThroughProcessor)
    ///     .writer(|_: &JobParameters| Ok(Box::new(LoggerWriter)))
    ///     .build();
    /// ```
    pub fn open_reader(
        self,
        parameters: &JobParameters,
    ) -> Result<Box<dyn ItemReader<String>>, BatchError> {
        match self {
            SourceProfile::Dev => Ok(Box::new(ListItemReader::new(
                ["alpha", "bravo", "charlie"].map(String::from),
            ))),
            SourceProfile::Prod => {
                let path = parameters.get_string("input.path").ok_or_else(|| {
                    BatchError::Configuration(
                        "missing required job parameter 'input.path'".to_string(),
                    )
                })?;
                Ok(Box::new(LineItemReader::from_path(path)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_apply_to_omitted_fields() {
        let properties = BatchProperties::from_json(r#"{"chunk-size": 3}"#).expect("valid json");

        assert_eq!(properties.chunk_size, 3);
        assert_eq!(properties.skip_limit, 0);
        assert_eq!(properties.concurrency, 1);
        assert!(!properties.enable_cleanup_step);
    }

    #[test]
    fn kebab_case_keys_are_parsed() {
        let properties = BatchProperties::from_json(
            r#"{"chunk-size": 5, "skip-limit": 3, "retry-limit": 2, "concurrency": 4, "enable-cleanup-step": true}"#,
        )
        .expect("valid json");

        assert_eq!(
            properties,
            BatchProperties {
                chunk_size: 5,
                skip_limit: 3,
                retry_limit: 2,
                concurrency: 4,
                enable_cleanup_step: true,
            }
        );
    }

    #[test]
    fn malformed_properties_are_a_configuration_error() {
        let result = BatchProperties::from_json(r#"{"chunk-size": "lots"}"#);
        assert!(matches!(result, Err(BatchError::Configuration(_))));
    }

    #[test]
    fn dev_profile_reads_the_builtin_list() {
        let reader = SourceProfile::Dev
            .open_reader(&JobParameters::default())
            .expect("dev reader");

        assert_eq!(reader.read(), Ok(Some("alpha".to_string())));
        assert_eq!(reader.read(), Ok(Some("bravo".to_string())));
        assert_eq!(reader.read(), Ok(Some("charlie".to_string())));
        assert_eq!(reader.read(), Ok(None));
    }

    #[test]
    fn prod_profile_requires_the_input_path_parameter() {
        let result = SourceProfile::Prod.open_reader(&JobParameters::default());
        assert!(matches!(result, Err(BatchError::Configuration(_))));
    }

    #[test]
    fn prod_profile_reads_lines_from_the_parameterized_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "first\nsecond").expect("seed file");

        let parameters = JobParameters::builder()
            .string("input.path", file.path().to_string_lossy())
            .build();
        let reader = SourceProfile::Prod
            .open_reader(&parameters)
            .expect("prod reader");

        assert_eq!(reader.read(), Ok(Some("first".to_string())));
        assert_eq!(reader.read(), Ok(Some("second".to_string())));
        assert_eq!(reader.read(), Ok(None));
    }
}
