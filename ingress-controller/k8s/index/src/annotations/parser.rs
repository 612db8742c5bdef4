use mci_ingress_controller_k8s_api::{Ingress, MultiClusterIngress, ObjectMeta};
use std::collections::BTreeMap;
use thiserror::Error;

pub const DEFAULT_PREFIX: &str = "nginx.ingress.kubernetes.io";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("ingress rule without annotations")]
    MissingAnnotations,

    #[error("annotation {name} contains invalid value {value:?}")]
    InvalidContent { name: String, value: String },

    #[error("invalid {name} configuration: {reason}")]
    InvalidConfiguration { name: String, reason: String },

    /// The location must refuse requests instead of serving them without the
    /// policy.
    #[error("location denied, reason: {0}")]
    LocationDenied(String),
}

/// An object whose annotations carry routing policy.
pub trait AnnotatedResource {
    fn object_meta(&self) -> &ObjectMeta;
}

/// Typed reads of the annotations under a single prefix.
#[derive(Copy, Clone, Debug)]
pub struct Parser<'a> {
    prefix: &'a str,
    annotations: Option<&'a BTreeMap<String, String>>,
}

// === impl Parser ===

impl<'a> Parser<'a> {
    pub fn new<R: AnnotatedResource>(prefix: &'a str, resource: &'a R) -> Self {
        Self {
            prefix,
            annotations: resource.object_meta().annotations.as_ref(),
        }
    }

    /// Formats the full annotation key for `name`.
    pub fn key(&self, name: &str) -> String {
        format!("{}/{}", self.prefix, name)
    }

    fn value(&self, name: &str) -> Result<&'a str, ParseError> {
        let annotations = self.annotations.ok_or(ParseError::MissingAnnotations)?;
        annotations
            .get(&self.key(name))
            .map(String::as_str)
            .ok_or(ParseError::MissingAnnotations)
    }

    fn invalid(&self, name: &str, value: &str) -> ParseError {
        ParseError::InvalidContent {
            name: self.key(name),
            value: value.to_string(),
        }
    }

    pub fn string(&self, name: &str) -> Result<String, ParseError> {
        let value = self.value(name)?;
        if value.is_empty() {
            return Err(self.invalid(name, value));
        }
        Ok(value.to_string())
    }

    pub fn bool(&self, name: &str) -> Result<bool, ParseError> {
        let value = self.value(name)?;
        parse_bool(value).ok_or_else(|| self.invalid(name, value))
    }

    pub fn int(&self, name: &str) -> Result<i32, ParseError> {
        let value = self.value(name)?;
        value.parse().map_err(|_| self.invalid(name, value))
    }

    /// Reads a comma-separated list, trimming entries and skipping empty ones.
    pub fn list(&self, name: &str) -> Result<Vec<String>, ParseError> {
        let value = self.string(name)?;
        Ok(value
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(Into::into)
            .collect())
    }

    /// Returns the value of `name`, or `default` if it is missing or invalid.
    pub fn string_or(&self, name: &str, default: &str) -> String {
        self.string(name).unwrap_or_else(|_| default.to_string())
    }

    pub fn bool_or(&self, name: &str, default: bool) -> bool {
        self.bool(name).unwrap_or(default)
    }
}

/// Accepts the same spellings as Go's `strconv.ParseBool`, which annotation
/// authors commonly rely on.
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

impl AnnotatedResource for MultiClusterIngress {
    fn object_meta(&self) -> &ObjectMeta {
        &self.metadata
    }
}

impl AnnotatedResource for Ingress {
    fn object_meta(&self) -> &ObjectMeta {
        &self.metadata
    }
}
