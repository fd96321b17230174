//! Option bags attached to load and save calls.
//!
//! Options arrive either as a map built by the caller or as a string
//! appended to a filename in square brackets:
//!
//! ```text
//! photo.jpg[Q=85,keep=icc]
//! scan.tif[access=sequential,fail_on=truncated]
//! ```
//!
//! A bare key is shorthand for `key=true`. Keys are case-insensitive and
//! `-` is equivalent to `_`. Array values are space separated
//! (`background=255 255 255`).

use crate::error::ForeignError;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Split `name[options]` into the name and the text between the brackets.
///
/// ```
/// use imgport::options::split_filename;
///
/// assert_eq!(split_filename("a.png[Q=90]"), ("a.png", Some("Q=90")));
/// assert_eq!(split_filename("a.png"), ("a.png", None));
/// ```
pub fn split_filename(name: &str) -> (&str, Option<&str>) {
    if let Some(stripped) = name.strip_suffix(']')
        && let Some(open) = stripped.rfind('[')
    {
        return (&stripped[..open], Some(&stripped[open + 1..]));
    }
    (name, None)
}

fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase().replace('-', "_")
}

/// String-keyed option values with typed accessors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    values: BTreeMap<String, String>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `key=value,key,...`.
    pub fn parse(text: &str) -> Result<Self, ForeignError> {
        let mut options = Self::new();
        for item in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = match item.split_once('=') {
                Some((k, v)) => (k, v.trim()),
                None => (item, "true"),
            };
            if key.trim().is_empty() {
                return Err(ForeignError::bad_option(item, "missing option name"));
            }
            options.set(key, value);
        }
        Ok(options)
    }

    /// Options from the bracketed suffix of `name`, if any.
    pub fn from_filename(name: &str) -> Result<Self, ForeignError> {
        match split_filename(name).1 {
            Some(text) => Self::parse(text),
            None => Ok(Self::new()),
        }
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl ToString) {
        self.values.insert(normalize_key(key), value.to_string());
    }

    /// Add every entry of `other`, overriding existing keys.
    pub fn extend(&mut self, other: Options) {
        self.values.extend(other.values);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&normalize_key(key)).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(&normalize_key(key))
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(&normalize_key(key))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ForeignError> {
        self.get(key).map(|v| parse_bool(key, v)).transpose()
    }

    /// Parse any `FromStr` value.
    pub fn get_parsed<T>(&self, key: &str) -> Result<Option<T>, ForeignError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|v| v.parse::<T>().map_err(|e| ForeignError::bad_option(key, e)))
            .transpose()
    }

    /// Space-separated numbers.
    pub fn get_doubles(&self, key: &str) -> Result<Option<Vec<f64>>, ForeignError> {
        self.get(key)
            .map(|v| {
                v.split_whitespace()
                    .map(|n| n.parse::<f64>().map_err(|e| ForeignError::bad_option(key, e)))
                    .collect()
            })
            .transpose()
    }

    /// Remove and parse a boolean.
    pub fn take_bool(&mut self, key: &str) -> Result<Option<bool>, ForeignError> {
        let value = self.get_bool(key)?;
        self.remove(key);
        Ok(value)
    }

    /// Remove and parse any `FromStr` value.
    pub fn take_parsed<T>(&mut self, key: &str) -> Result<Option<T>, ForeignError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let value = self.get_parsed(key)?;
        self.remove(key);
        Ok(value)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ForeignError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => Err(ForeignError::bad_option(key, format!("\"{other}\" is not a boolean"))),
    }
}
