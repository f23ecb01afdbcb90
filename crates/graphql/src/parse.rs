use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

static DNS1123_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("static regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceId {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}/{}", self.namespace, self.name) }
}

fn is_label(s: &str) -> bool { s.len() <= 63 && DNS1123_LABEL.is_match(s) }

/// Parses `<namespace>/<name>`; both halves must be DNS-1123 labels.
pub fn parse_service_id(id: &str) -> Result<ServiceId, ParseError> {
    match id.split('/').collect::<Vec<_>>().as_slice() {
        [ns, name] if is_label(ns) && is_label(name) => Ok(ServiceId { namespace: ns.to_string(), name: name.to_string() }),
        _ => Err(ParseError::ServiceId(id.to_string())),
    }
}

/// Subset name to weight, ordered by name.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize)]
#[serde(transparent)]
pub struct ParsedSubsets(pub BTreeMap<String, u32>);

impl ParsedSubsets {
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> { self.0.iter().map(|(k, v)| (k.as_str(), *v)) }
}

impl fmt::Display for ParsedSubsets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        f.write_str(&parts.join(", "))
    }
}

/// Parses `subset=weight` pairs. Weights must add up to exactly 100.
pub fn parse_subsets<S: AsRef<str>>(raw: &[S]) -> Result<ParsedSubsets, ParseError> {
    let mut out = BTreeMap::new();
    let mut sum = 0u32;
    for item in raw {
        let item = item.as_ref();
        let (subset, weight) = match item.split('=').collect::<Vec<_>>().as_slice() {
            [subset, weight] if is_label(subset) => match weight.parse::<u32>() {
                Ok(w) => (subset.to_string(), w),
                Err(_) => return Err(ParseError::Subset(item.to_string())),
            },
            _ => return Err(ParseError::Subset(item.to_string())),
        };
        sum = sum.saturating_add(weight);
        out.insert(subset, weight);
    }
    if sum != 100 { return Err(ParseError::WeightSum); }
    Ok(ParsedSubsets(out))
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid service ID: '{0}': format must be <namespace>/<name>")]
    ServiceId(String),
    #[error("invalid subset: '{0}': format must be <subset>=<weight>")]
    Subset(String),
    #[error("sum of subset weights must be 100")]
    WeightSum,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_ids() {
        let id = parse_service_id("default/reviews").unwrap();
        assert_eq!(id, ServiceId { namespace: "default".into(), name: "reviews".into() });
        assert_eq!(id.to_string(), "default/reviews");

        for bad in ["reviews", "a/b/c", "Default/reviews", "default/-reviews", "/reviews", "default/"] {
            let err = parse_service_id(bad).unwrap_err();
            assert_eq!(err.to_string(), format!("invalid service ID: '{}': format must be <namespace>/<name>", bad));
        }
    }

    #[test]
    fn subsets_sum_to_one_hundred() {
        let parsed = parse_subsets(&["v2=30", "v1=70"]).unwrap();
        assert_eq!(parsed.to_string(), "v1=70, v2=30");
        assert_eq!(parsed.iter().collect::<Vec<_>>(), vec![("v1", 70), ("v2", 30)]);

        assert_eq!(parse_subsets(&["v1=70", "v2=20"]).unwrap_err().to_string(), "sum of subset weights must be 100");
        assert_eq!(parse_subsets::<&str>(&[]).unwrap_err().to_string(), "sum of subset weights must be 100");
    }

    #[test]
    fn malformed_subsets() {
        for bad in ["v1", "v1=x", "v1=50=50", "V1=100", "=100"] {
            assert_eq!(
                parse_subsets(&[bad]).unwrap_err().to_string(),
                format!("invalid subset: '{}': format must be <subset>=<weight>", bad)
            );
        }
    }
}
