use thiserror::Error;

/// Errors raised while parsing a machine-description file. Each variant
/// carries the offending key (and, where enumerable, the permitted values)
/// so the CLI can point at the exact configuration mistake.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("missing key \"{key}\"{}", region_suffix(.region))]
    MissingKey { key: String, region: String },

    #[error(
        "{expected} type data is expected for \"{key}\" but {found} is specified{}",
        region_suffix(.region)
    )]
    InvalidDataType {
        key: String,
        expected: &'static str,
        found: String,
        region: String,
    },

    #[error(
        "invalid data \"{value}\" for {key}{}\navailable values: [{}]",
        region_suffix(.region),
        .permitted.join(", ")
    )]
    InvalidValue {
        key: String,
        value: String,
        permitted: Vec<String>,
        region: String,
    },

    #[error("configuring {value} for {key} is not implemented")]
    NotImplemented { key: String, value: String },

    #[error("fail to parse \"{file}\": {cause}")]
    Unreadable { file: String, cause: String },
}

fn region_suffix(region: &str) -> String {
    if region.is_empty() {
        String::new()
    } else {
        format!(" in {}", region)
    }
}

impl ModelError {
    pub fn missing(key: &str) -> Self {
        ModelError::MissingKey {
            key: key.to_string(),
            region: String::new(),
        }
    }

    pub fn bad_type(key: &str, expected: &'static str, found: &serde_json::Value) -> Self {
        ModelError::InvalidDataType {
            key: key.to_string(),
            expected,
            found: found.to_string(),
            region: String::new(),
        }
    }

    pub fn bad_value(
        key: &str,
        value: impl ToString,
        permitted: &[&str],
    ) -> Self {
        ModelError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            permitted: permitted.iter().map(|s| s.to_string()).collect(),
            region: String::new(),
        }
    }

    /// Attach the configuration region the error occurred in.
    pub fn in_region(mut self, r: &str) -> Self {
        match &mut self {
            ModelError::MissingKey { region, .. }
            | ModelError::InvalidDataType { region, .. }
            | ModelError::InvalidValue { region, .. } => {
                *region = r.to_string()
            }
            _ => (),
        }
        self
    }

    pub fn is_missing_key(&self) -> bool {
        matches!(self, ModelError::MissingKey { .. })
    }
}

impl From<ModelError> for cgraomp_utils::Error {
    fn from(e: ModelError) -> Self {
        cgraomp_utils::Error::configuration(e.to_string())
    }
}
