//! ARM resource ids.
//!
//! `/subscriptions/{sub}/resourceGroups/{rg}/providers/{ns}/{type}/{name}[/{child_type}/{child_name}...]`

use std::fmt;

use crate::client::{AzureError, AzureResult};

/// A parsed resource id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    pub subscription: String,
    pub resource_group: Option<String>,
    pub namespace: Option<String>,
    /// `(type, name)` pairs below the namespace.
    pub types: Vec<(String, String)>,
}

impl ResourceId {
    /// Parse a resource id, subscription or resource group id.
    pub fn parse(id: &str) -> AzureResult<Self> {
        let invalid = || AzureError::InvalidParameter(format!("{} is not a valid resource id", id));
        let segments: Vec<&str> = id.split('/').collect();
        // Leading slash gives an empty first segment.
        if segments.first() != Some(&"") || segments.iter().skip(1).any(|s| s.is_empty()) {
            return Err(invalid());
        }
        let mut rest = segments[1..].iter().copied();

        match (rest.next(), rest.next()) {
            (Some(s), Some(sub)) if s.eq_ignore_ascii_case("subscriptions") => {
                let mut parsed = ResourceId {
                    subscription: sub.to_string(),
                    resource_group: None,
                    namespace: None,
                    types: Vec::new(),
                };
                let remaining: Vec<&str> = rest.collect();
                let mut i = 0;
                if remaining.len() >= 2 && remaining[0].eq_ignore_ascii_case("resourceGroups") {
                    parsed.resource_group = Some(remaining[1].to_string());
                    i = 2;
                }
                if i < remaining.len() {
                    if !remaining[i].eq_ignore_ascii_case("providers") || remaining.len() < i + 2 {
                        return Err(invalid());
                    }
                    parsed.namespace = Some(remaining[i + 1].to_string());
                    let pairs = &remaining[i + 2..];
                    if pairs.is_empty() || pairs.len() % 2 != 0 {
                        return Err(invalid());
                    }
                    parsed.types = pairs
                        .chunks(2)
                        .map(|c| (c[0].to_string(), c[1].to_string()))
                        .collect();
                }
                Ok(parsed)
            }
            _ => Err(invalid()),
        }
    }

    /// Name of the last resource in the id.
    pub fn name(&self) -> Option<&str> {
        self.types
            .last()
            .map(|(_, n)| n.as_str())
            .or(self.resource_group.as_deref())
    }

    /// Fully qualified type, e.g. `Microsoft.Network/virtualNetworks/subnets`.
    pub fn resource_type(&self) -> Option<String> {
        let ns = self.namespace.as_ref()?;
        let types: Vec<&str> = self.types.iter().map(|(t, _)| t.as_str()).collect();
        Some(format!("{}/{}", ns, types.join("/")))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/subscriptions/{}", self.subscription)?;
        if let Some(ref rg) = self.resource_group {
            write!(f, "/resourceGroups/{}", rg)?;
        }
        if let Some(ref ns) = self.namespace {
            write!(f, "/providers/{}", ns)?;
            for (t, n) in &self.types {
                write!(f, "/{}/{}", t, n)?;
            }
        }
        Ok(())
    }
}

/// Whether `id` is a resource id, optionally of a given type.
pub fn is_valid_resource_id(id: &str, resource_type: Option<&str>) -> bool {
    match ResourceId::parse(id) {
        Ok(parsed) => match resource_type {
            None => parsed.namespace.is_some(),
            Some(expected) => parsed
                .resource_type()
                .map(|t| t.eq_ignore_ascii_case(expected))
                .unwrap_or(false),
        },
        Err(_) => false,
    }
}

/// Last path segment of an id, or the input when it has no slash.
pub fn last_segment(id: &str) -> &str {
    id.trim_end_matches('/').rsplit('/').next().unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUBNET: &str = "/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/rg1/providers/Microsoft.Network/virtualNetworks/vnet1/subnets/default";

    #[test]
    fn test_parse_child_resource() {
        let id = ResourceId::parse(SUBNET).unwrap();
        assert_eq!(id.resource_group.as_deref(), Some("rg1"));
        assert_eq!(id.name(), Some("default"));
        assert_eq!(
            id.resource_type().as_deref(),
            Some("Microsoft.Network/virtualNetworks/subnets")
        );
        assert_eq!(id.to_string(), SUBNET);
    }

    #[test]
    fn test_parse_resource_group() {
        let id = ResourceId::parse("/subscriptions/s/resourceGroups/rg1").unwrap();
        assert_eq!(id.name(), Some("rg1"));
        assert!(id.namespace.is_none());
    }

    #[test]
    fn test_invalid_ids() {
        assert!(ResourceId::parse("subscriptions/s").is_err());
        assert!(ResourceId::parse("/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks").is_err());
        assert!(ResourceId::parse("/tenants/t").is_err());
        assert!(ResourceId::parse("/subscriptions//resourceGroups/rg").is_err());
    }

    #[test]
    fn test_is_valid_resource_id() {
        let plan = "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/ddosProtectionPlans/plan1";
        assert!(is_valid_resource_id(plan, None));
        assert!(is_valid_resource_id(plan, Some("Microsoft.Network/ddosProtectionPlans")));
        assert!(!is_valid_resource_id(plan, Some("Microsoft.Network/virtualNetworks")));
        assert!(!is_valid_resource_id("plan1", None));
    }

    #[test]
    fn test_last_segment() {
        assert_eq!(last_segment(SUBNET), "default");
        assert_eq!(last_segment("name"), "name");
    }
}
