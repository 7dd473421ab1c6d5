//! Environment listing

use std::env;

use crate::protocol::{EnvironmentVariablesListedResponse, Response};

/// The agent's own environment; non-UTF-8 entries are skipped
pub fn list_environment_variables() -> Response {
    Response::EnvironmentVariablesListed(EnvironmentVariablesListedResponse {
        variables: env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .collect(),
    })
}
