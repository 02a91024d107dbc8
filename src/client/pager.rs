//! `nextLink` pager.

use serde_json::Value;
use tracing::{trace, warn};

use super::{ArmClient, ArmRequest, AzureError, AzureResult, Method};

/// Upper bound on followed pages; a service returning a cyclic `nextLink`
/// would otherwise loop forever.
const MAX_PAGES: usize = 1000;

/// Collect every item of a list operation.
///
/// Each page is `{"value": [...], "nextLink": "..."}`. Key Vault spells the
/// link the same way; storage list operations that return a bare array are
/// accepted as a single page. A listing that still has a `nextLink` after
/// [`MAX_PAGES`] pages is an error rather than a partial result.
pub async fn collect(client: &dyn ArmClient, first: ArmRequest) -> AzureResult<Vec<Value>> {
    let audience = first.audience;
    let mut items = Vec::new();
    let mut next = Some(first);
    let mut pages = 0;

    while let Some(request) = next.take() {
        let body = client.send(request).await?.error_for_status()?.body;
        pages += 1;
        match body {
            Value::Array(values) => items.extend(values),
            Value::Object(mut page) => {
                if let Some(Value::Array(values)) = page.remove("value") {
                    items.extend(values);
                }
                if let Some(link) = page
                    .get("nextLink")
                    .and_then(Value::as_str)
                    .filter(|l| !l.is_empty())
                {
                    if pages >= MAX_PAGES {
                        warn!("Giving up on list after {} pages, nextLink {}", pages, link);
                        return Err(AzureError::Http {
                            message: format!(
                                "List operation still had a nextLink after {} pages",
                                MAX_PAGES
                            ),
                            source: None,
                        });
                    }
                    trace!("Following nextLink {}", link);
                    next = Some(ArmRequest::url(Method::Get, link).with_audience(audience));
                }
            }
            _ => {}
        }
    }

    Ok(items)
}
