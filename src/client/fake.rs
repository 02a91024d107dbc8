//! In-memory ARM used by unit tests.
//!
//! Resources are stored by path. GET/HEAD/PUT/PATCH/DELETE behave like a
//! small resource manager; canned responses registered with
//! [`FakeArm::respond`] take precedence for any method and target.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use super::{ArmClient, ArmRequest, ArmResponse, AzureResult, Body, Method};

pub(crate) struct FakeArm {
    subscription_id: String,
    resources: Mutex<BTreeMap<String, Value>>,
    canned: Mutex<HashMap<(Method, String), VecDeque<ArmResponse>>>,
    requests: Mutex<Vec<ArmRequest>>,
}

fn key(target: &str) -> String {
    let without_query = target.split('?').next().unwrap_or(target);
    without_query.trim_end_matches('/').to_ascii_lowercase()
}

/// ARM paths alternate type/name segments once the `providers/{namespace}`
/// pairs are removed; an odd count names a collection.
fn is_collection(path: &str) -> bool {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let mut count = 0;
    let mut i = 0;
    while i < segments.len() {
        if segments[i].eq_ignore_ascii_case("providers") && i + 1 < segments.len() {
            i += 2;
            continue;
        }
        count += 1;
        i += 1;
    }
    count % 2 == 1
}

fn not_found(target: &str) -> ArmResponse {
    ArmResponse::new(
        404,
        json!({"error": {"code": "ResourceNotFound", "message": format!("The Resource '{}' was not found.", target)}}),
    )
}

fn merge_objects(base: &mut Value, patch: &Value) {
    if let (Some(base), Some(patch)) = (base.as_object_mut(), patch.as_object()) {
        for (k, v) in patch {
            match (base.get_mut(k), v) {
                (Some(existing @ Value::Object(_)), Value::Object(_)) if k == "properties" => {
                    merge_objects(existing, v)
                }
                _ => {
                    base.insert(k.clone(), v.clone());
                }
            }
        }
    }
}

impl FakeArm {
    pub(crate) fn new(subscription_id: &str) -> Self {
        Self {
            subscription_id: subscription_id.to_string(),
            resources: Mutex::new(BTreeMap::new()),
            canned: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Store a resource as if it had been created at `path`.
    pub(crate) fn insert(&self, path: &str, mut value: Value) {
        if let Some(obj) = value.as_object_mut() {
            obj.entry("id").or_insert_with(|| json!(path));
            let name = path.rsplit('/').next().unwrap_or_default();
            obj.entry("name").or_insert_with(|| json!(name));
        }
        self.resources.lock().insert(key(path), value);
    }

    pub(crate) fn get(&self, path: &str) -> Option<Value> {
        self.resources.lock().get(&key(path)).cloned()
    }

    /// Always answer `method target` with `response`.
    pub(crate) fn respond(&self, method: Method, target: &str, response: ArmResponse) {
        self.respond_sequence(method, target, vec![response]);
    }

    /// Answer successive calls with `responses`; the last one repeats.
    pub(crate) fn respond_sequence(&self, method: Method, target: &str, responses: Vec<ArmResponse>) {
        self.canned
            .lock()
            .insert((method, key(target)), responses.into_iter().collect());
    }

    pub(crate) fn requests(&self) -> Vec<ArmRequest> {
        self.requests.lock().clone()
    }

    /// Requests sent with `method`.
    pub(crate) fn sent(&self, method: Method) -> Vec<ArmRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method)
            .cloned()
            .collect()
    }

    pub(crate) fn count(&self, method: Method, target: &str) -> usize {
        let target = key(target);
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method && key(r.target()) == target)
            .count()
    }

    fn canned_response(&self, method: Method, target: &str) -> Option<ArmResponse> {
        let mut canned = self.canned.lock();
        let queue = canned.get_mut(&(method, key(target)))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    fn list(&self, path: &str) -> Vec<Value> {
        let prefix = format!("{}/", key(path));
        let resources = self.resources.lock();
        let direct: Vec<Value> = resources
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix) && !k[prefix.len()..].contains('/'))
            .map(|(_, v)| v.clone())
            .collect();
        if !direct.is_empty() {
            return direct;
        }
        // Subscription-wide listing of a provider type.
        let lower = key(path);
        match lower.find("/providers/") {
            Some(idx) if !lower.contains("/resourcegroups/") => {
                let sub = &lower[..idx];
                let suffix = format!("{}/", &lower[idx..]);
                resources
                    .iter()
                    .filter(|(k, _)| {
                        k.starts_with(sub)
                            && k.find(&suffix)
                                .map(|pos| !k[pos + suffix.len()..].contains('/'))
                                .unwrap_or(false)
                    })
                    .map(|(_, v)| v.clone())
                    .collect()
            }
            _ => Vec::new(),
        }
    }

    fn handle(&self, request: &ArmRequest) -> ArmResponse {
        let target = request.target().to_string();
        let k = key(&target);
        match request.method {
            Method::Get => {
                if let Some(v) = self.resources.lock().get(&k) {
                    return ArmResponse::new(200, v.clone());
                }
                if is_collection(&target) {
                    ArmResponse::new(200, json!({"value": self.list(&target)}))
                } else {
                    not_found(&target)
                }
            }
            Method::Head => {
                if self.resources.lock().contains_key(&k) {
                    ArmResponse::new(204, Value::Null)
                } else {
                    ArmResponse::new(404, Value::Null)
                }
            }
            Method::Put => {
                let mut body = match &request.body {
                    Some(Body::Json(v)) => v.clone(),
                    _ => Value::Object(Map::new()),
                };
                if let Some(props) = body.get_mut("properties").and_then(Value::as_object_mut) {
                    props
                        .entry("provisioningState")
                        .or_insert_with(|| json!("Succeeded"));
                }
                let existed = self.resources.lock().contains_key(&k);
                self.insert(&target, body);
                let stored = self.get(&target).unwrap_or(Value::Null);
                ArmResponse::new(if existed { 200 } else { 201 }, stored)
            }
            Method::Patch => {
                let mut resources = self.resources.lock();
                match resources.get_mut(&k) {
                    Some(existing) => {
                        if let Some(Body::Json(patch)) = &request.body {
                            merge_objects(existing, patch);
                        }
                        ArmResponse::new(200, existing.clone())
                    }
                    None => not_found(&target),
                }
            }
            Method::Delete => {
                let mut resources = self.resources.lock();
                let existed = resources.remove(&k).is_some();
                let prefix = format!("{}/", k);
                resources.retain(|key, _| !key.starts_with(&prefix));
                ArmResponse::new(if existed { 200 } else { 204 }, Value::Null)
            }
            Method::Post => ArmResponse::new(200, Value::Null),
        }
    }
}

#[async_trait]
impl ArmClient for FakeArm {
    fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    async fn send(&self, request: ArmRequest) -> AzureResult<ArmResponse> {
        self.requests.lock().push(request.clone());
        if let Some(response) = self.canned_response(request.method, request.target()) {
            return Ok(response);
        }
        Ok(self.handle(&request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_detection() {
        assert!(is_collection("/subscriptions/s/resourcegroups"));
        assert!(!is_collection("/subscriptions/s/resourcegroups/rg"));
        assert!(is_collection(
            "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks"
        ));
        assert!(!is_collection(
            "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet1"
        ));
        assert!(is_collection(
            "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet1/subnets"
        ));
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let fake = FakeArm::new("s");
        let path = "/subscriptions/s/resourcegroups/rg1";
        let put = ArmRequest::management(Method::Put, path, "v").with_json(json!({"location": "eastus"}));
        assert_eq!(fake.send(put).await.unwrap().status, 201);

        let got = fake
            .send(ArmRequest::management(Method::Get, "/subscriptions/s/resourceGroups/RG1", "v"))
            .await
            .unwrap();
        assert_eq!(got.body["name"], "rg1");

        let list = fake
            .send(ArmRequest::management(Method::Get, "/subscriptions/s/resourcegroups", "v"))
            .await
            .unwrap();
        assert_eq!(list.body["value"].as_array().unwrap().len(), 1);

        fake.send(ArmRequest::management(Method::Delete, path, "v")).await.unwrap();
        assert!(fake.get(path).is_none());
    }
}
