/// Job-parameter validation tasklet.
pub mod validate;
