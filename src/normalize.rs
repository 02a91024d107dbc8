//! Response normalization.
//!
//! ARM speaks camelCase JSON with most settings nested under `properties`.
//! Execution modules return snake_case mappings; for resource families whose
//! models are flat, `properties` is merged into the top level.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// Keys whose values are user data and keep their keys verbatim.
pub const OPAQUE_KEYS: &[&str] = &[
    "tags",
    "metadata",
    "parameters",
    "policy_rule",
    "redis_configuration",
    "user_assigned_identities",
    "app_settings_map",
    "outputs",
];

static BOUNDARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([a-z0-9])([A-Z])|([A-Z])([A-Z][a-z])").expect("Invalid case boundary regex")
});

/// Convert a camelCase (or PascalCase) key to snake_case.
///
/// Acronyms stay together: `publicIPAllocationMethod` becomes
/// `public_ip_allocation_method`.
pub fn to_snake(key: &str) -> String {
    let mut out = key.to_string();
    // Two passes catch overlapping boundaries such as `aBCd`.
    for _ in 0..2 {
        out = BOUNDARY
            .replace_all(&out, |caps: &regex::Captures<'_>| {
                if let (Some(a), Some(b)) = (caps.get(1), caps.get(2)) {
                    format!("{}_{}", a.as_str(), b.as_str())
                } else {
                    format!(
                        "{}_{}",
                        caps.get(3).map(|m| m.as_str()).unwrap_or_default(),
                        caps.get(4).map(|m| m.as_str()).unwrap_or_default()
                    )
                }
            })
            .into_owned();
    }
    out.to_ascii_lowercase()
}

/// Lower-case a value and upper-case its first letter (`STANDARD` to
/// `Standard`), the way ARM spells enum values.
pub fn capitalize(value: &str) -> String {
    let lower = value.to_ascii_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// Convert a snake_case key to camelCase.
pub fn to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for c in key.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Normalize an ARM response body.
pub fn as_dict(value: Value, flatten: bool) -> Value {
    convert(value, flatten, 0)
}

fn convert(value: Value, flatten: bool, depth: usize) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            let mut properties = None;
            for (k, v) in map {
                let snake = to_snake(&k);
                if flatten && depth == 0 && snake == "properties" && v.is_object() {
                    properties = Some(v);
                    continue;
                }
                let converted = if OPAQUE_KEYS.contains(&snake.as_str()) {
                    v
                } else {
                    convert(v, flatten, depth + 1)
                };
                out.insert(snake, converted);
            }
            if let Some(Value::Object(props)) = properties {
                for (k, v) in props {
                    let snake = to_snake(&k);
                    let converted = if OPAQUE_KEYS.contains(&snake.as_str()) {
                        v
                    } else {
                        convert(v, flatten, depth + 1)
                    };
                    out.entry(snake).or_insert(converted);
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| convert_item(item, flatten, depth))
                .collect(),
        ),
        other => other,
    }
}

/// Items of a list are resources in their own right (subnets, rules,
/// access policies); flatten their `properties` too.
fn convert_item(item: Value, flatten: bool, depth: usize) -> Value {
    if flatten && item.get("properties").map(Value::is_object).unwrap_or(false) {
        convert(item, flatten, 0)
    } else {
        convert(item, flatten, depth + 1)
    }
}

/// Convert user supplied snake_case keys to camelCase for request bodies.
pub fn to_camel_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let camel = to_camel(k);
                    let converted = if OPAQUE_KEYS.contains(&k.as_str()) {
                        v.clone()
                    } else {
                        to_camel_keys(v)
                    };
                    (camel, converted)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(to_camel_keys).collect()),
        other => other.clone(),
    }
}

/// Key a list of resources by their `name`.
pub fn keyed_by_name(items: Vec<Value>) -> Value {
    let mut out = Map::new();
    for item in items {
        if let Some(name) = item.get("name").and_then(Value::as_str) {
            out.insert(name.to_string(), item.clone());
        }
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("STANDARD"), "Standard");
        assert_eq!(capitalize("static"), "Static");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn test_to_snake() {
        assert_eq!(to_snake("addressPrefixes"), "address_prefixes");
        assert_eq!(to_snake("enableHttpsTrafficOnly"), "enable_https_traffic_only");
        assert_eq!(to_snake("publicIPAllocationMethod"), "public_ip_allocation_method");
        assert_eq!(to_snake("softDeleteRetentionInDays"), "soft_delete_retention_in_days");
        assert_eq!(to_snake("ID"), "id");
        assert_eq!(to_snake("name"), "name");
    }

    #[test]
    fn test_to_camel() {
        assert_eq!(to_camel("virtual_network_rules"), "virtualNetworkRules");
        assert_eq!(to_camel("bypass"), "bypass");
    }

    #[test]
    fn test_flattened_resource() {
        let raw = json!({
            "id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet1",
            "name": "vnet1",
            "tags": {"CostCenter": "Ops"},
            "properties": {
                "addressSpace": {"addressPrefixes": ["10.0.0.0/16"]},
                "subnets": [
                    {"name": "default", "properties": {"addressPrefix": "10.0.0.0/24"}}
                ]
            }
        });
        let out = as_dict(raw, true);
        assert_eq!(out["tags"], json!({"CostCenter": "Ops"}));
        assert_eq!(out["address_space"]["address_prefixes"], json!(["10.0.0.0/16"]));
        assert_eq!(out["subnets"][0]["address_prefix"], "10.0.0.0/24");
        assert!(out.get("properties").is_none());
    }

    #[test]
    fn test_nested_resource() {
        let raw = json!({"name": "vault1", "properties": {"vaultUri": "https://vault1.vault.azure.net/"}});
        let out = as_dict(raw, false);
        assert_eq!(out["properties"]["vault_uri"], "https://vault1.vault.azure.net/");
    }

    #[test]
    fn test_opaque_keys_are_verbatim() {
        let raw = json!({"properties": {"policyRule": {"if": {"allOf": []}, "then": {"effect": "deny"}}, "metadata": {"createdBy": "x"}}});
        let out = as_dict(raw, true);
        assert_eq!(out["policy_rule"]["if"]["allOf"], json!([]));
        assert_eq!(out["metadata"]["createdBy"], "x");
    }

    #[test]
    fn test_to_camel_keys() {
        let body = to_camel_keys(&json!({"default_action": "Deny", "ip_rules": [{"value": "1.2.3.4"}], "tags": {"my_tag": "x"}}));
        assert_eq!(body["defaultAction"], "Deny");
        assert_eq!(body["ipRules"][0]["value"], "1.2.3.4");
        assert_eq!(body["tags"]["my_tag"], "x");
    }

    #[test]
    fn test_keyed_by_name() {
        let out = keyed_by_name(vec![json!({"name": "a"}), json!({"name": "b"}), json!({"x": 1})]);
        assert_eq!(out.as_object().unwrap().len(), 2);
    }
}
