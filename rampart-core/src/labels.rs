use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Ordered set of `key:value` labels partitioning a metric into independent series.
///
/// Ordering is by key so two label sets built in different orders hash and compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `true` if every label of `self` is present with the same value in `other`.
    pub fn is_subset_of(&self, other: &Labels) -> bool {
        self.0
            .iter()
            .all(|(k, v)| other.0.get(k).is_some_and(|o| o == v))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Labels {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}:{v}")?;
        }
        f.write_str("}")
    }
}

/// Build a [`Labels`] set from `key => value` pairs.
///
/// ```
/// let labels = rampart_core::labels! { "method" => "GET", "status" => "200" };
/// assert_eq!(labels.get("status"), Some("200"));
/// ```
#[macro_export]
macro_rules! labels {
    () => {
        $crate::Labels::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {
        $crate::Labels::new()$(.with($key, $value))+
    };
}

/// A metric name with an optional label filter, e.g. `http_req_duration{route:/api/products}`.
///
/// A selector matches every series of the metric whose labels contain the filter, so a bare
/// name covers the whole metric.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricSelector {
    pub name: String,
    pub filter: Labels,
}

impl MetricSelector {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter: Labels::new(),
        }
    }

    pub fn with_filter(mut self, filter: Labels) -> Self {
        self.filter = filter;
        self
    }
}

impl FromStr for MetricSelector {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ConfigError::InvalidSelector(s.to_string());

        let (name, rest) = match s.find('{') {
            Some(idx) => (&s[..idx], Some(&s[idx + 1..])),
            None => (s, None),
        };

        let name = name.trim();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid());
        }

        let mut filter = Labels::new();
        if let Some(rest) = rest {
            let body = rest.strip_suffix('}').ok_or_else(invalid)?;
            for pair in body.split(',').filter(|p| !p.trim().is_empty()) {
                let (k, v) = pair.split_once(':').ok_or_else(invalid)?;
                let k = k.trim();
                let v = v.trim().trim_matches(|c| c == '"' || c == '\'');
                if k.is_empty() {
                    return Err(invalid());
                }
                filter.insert(k, v);
            }
        }

        Ok(Self {
            name: name.to_string(),
            filter,
        })
    }
}

impl fmt::Display for MetricSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.filter)
    }
}
