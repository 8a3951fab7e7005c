use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::Date;

/// A typed job parameter value.
///
/// The launch surface supplies parameters as `key=value` pairs; the typed
/// variants keep identity derivation and context hand-off unambiguous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    String(String),
    Long(i64),
    Double(f64),
    Date(Date),
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::String(value) => write!(f, "{value}"),
            ParameterValue::Long(value) => write!(f, "{value}"),
            ParameterValue::Double(value) => write!(f, "{value}"),
            ParameterValue::Date(value) => write!(f, "{value}"),
        }
    }
}

/// A parameter value plus its identity flag.
///
/// Identifying parameters take part in the job-instance identity; two
/// launches whose identifying parameters are equal address the same
/// [`crate::core::job::JobInstance`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
    pub value: ParameterValue,
    pub identifying: bool,
}

/// Immutable mapping from parameter name to typed value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    entries: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    pub fn builder() -> JobParametersBuilder {
        JobParametersBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.entries.get(name).map(|parameter| &parameter.value)
    }

    pub fn get_string(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(ParameterValue::String(value)) => Some(value),
            _ => None,
        }
    }

    pub fn get_long(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(ParameterValue::Long(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_double(&self, name: &str) -> Option<f64> {
        match self.get(name) {
            Some(ParameterValue::Double(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_date(&self, name: &str) -> Option<Date> {
        match self.get(name) {
            Some(ParameterValue::Date(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &JobParameter)> {
        self.entries
            .iter()
            .map(|(name, parameter)| (name.as_str(), parameter))
    }

    /// Derives the logical job-instance identity for these parameters.
    ///
    /// The key is the job name plus the canonical JSON rendering of the
    /// identifying parameters (a `BTreeMap`, so ordering is stable). Two
    /// parameter sets that differ only in non-identifying entries map to
    /// the same instance.
    pub fn instance_key(&self, job_name: &str) -> String {
        let identifying: BTreeMap<&String, &ParameterValue> = self
            .entries
            .iter()
            .filter(|(_, parameter)| parameter.identifying)
            .map(|(name, parameter)| (name, &parameter.value))
            .collect();

        // BTreeMap serialization is deterministic; a serialization failure
        // would mean a broken ParameterValue serde impl.
        let rendered = serde_json::to_string(&identifying)
            .unwrap_or_else(|error| format!("unserializable:{error}"));

        format!("{job_name}?{rendered}")
    }
}

/// Builder for [`JobParameters`].
#[derive(Debug, Default)]
pub struct JobParametersBuilder {
    entries: BTreeMap<String, JobParameter>,
}

impl JobParametersBuilder {
    /// Adds a parameter with an explicit identity flag.
    pub fn add(mut self, name: &str, value: ParameterValue, identifying: bool) -> Self {
        self.entries
            .insert(name.to_string(), JobParameter { value, identifying });
        self
    }

    /// Adds an identifying string parameter.
    pub fn string(self, name: &str, value: impl Into<String>) -> Self {
        self.add(name, ParameterValue::String(value.into()), true)
    }

    /// Adds an identifying long parameter.
    pub fn long(self, name: &str, value: i64) -> Self {
        self.add(name, ParameterValue::Long(value), true)
    }

    /// Adds an identifying double parameter.
    pub fn double(self, name: &str, value: f64) -> Self {
        self.add(name, ParameterValue::Double(value), true)
    }

    /// Adds an identifying date parameter.
    pub fn date(self, name: &str, value: Date) -> Self {
        self.add(name, ParameterValue::Date(value), true)
    }

    pub fn build(self) -> JobParameters {
        JobParameters {
            entries: self.entries,
        }
    }
}
