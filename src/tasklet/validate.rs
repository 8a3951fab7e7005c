//! # Parameter Validation Tasklet
//!
//! A tasklet that checks required job parameters before any chunk work
//! begins. Putting it first in a job makes a missing parameter fail fast
//! with an error naming the parameter, instead of surfacing halfway through
//! a chunk step.

use log::info;

use crate::BatchError;
use crate::core::context::ExecutionContext;
use crate::core::parameters::JobParameters;
use crate::core::step::{RepeatStatus, Tasklet};

/// Fails the step when any of the required parameters is absent.
///
/// On success it records the validated names in the step context and greets
/// the `name` parameter when one is present.
pub struct ValidateParametersTasklet {
    required: Vec<String>,
}

impl ValidateParametersTasklet {
    pub fn new(required: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            required: required.into_iter().map(Into::into).collect(),
        }
    }
}

impl Tasklet for ValidateParametersTasklet {
    fn execute(
        &self,
        parameters: &JobParameters,
        context: &mut ExecutionContext,
    ) -> Result<RepeatStatus, BatchError> {
        for name in &self.required {
            if parameters.get(name).is_none() {
                return Err(BatchError::Configuration(format!(
                    "missing required job parameter '{name}'"
                )));
            }
        }

        if let Some(name) = parameters.get_string("name") {
            info!("Hello, {name}!");
        }
        context.put("parameters.validated", self.required.join(","));

        Ok(RepeatStatus::Finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_when_all_required_parameters_are_present() {
        let tasklet = ValidateParametersTasklet::new(["name", "input.path"]);
        let parameters = JobParameters::builder()
            .string("name", "World")
            .string("input.path", "/tmp/lines.txt")
            .build();
        let mut context = ExecutionContext::new();

        let status = tasklet.execute(&parameters, &mut context).expect("valid");

        assert_eq!(status, RepeatStatus::Finished);
        assert_eq!(
            context.get_str("parameters.validated"),
            Some("name,input.path")
        );
    }

    #[test]
    fn names_the_missing_parameter() {
        let tasklet = ValidateParametersTasklet::new(["name"]);
        let parameters = JobParameters::default();
        let mut context = ExecutionContext::new();

        let error = tasklet
            .execute(&parameters, &mut context)
            .expect_err("missing parameter");

        assert!(
            matches!(error, BatchError::Configuration(message) if message.contains("'name'"))
        );
    }
}
