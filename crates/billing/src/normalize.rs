//! Tolerant extraction from provider payload shapes
//!
//! Stripe payloads shift between API versions: fields appear in snake_case or
//! camelCase, and the billing-period end has moved between the subscription
//! and its first billed item. Each extractor here probes a documented fallback
//! order and returns a typed `Option`; callers decide whether absence is fatal.

use serde_json::Value;

/// Unix timestamp of the current period end.
///
/// Fallback order:
/// 1. `current_period_end`
/// 2. `currentPeriodEnd`
/// 3. `items.data[0].current_period_end`
/// 4. `items.data[0].currentPeriodEnd`
pub fn period_end(obj: &Value) -> Option<i64> {
    if let Some(ts) = obj.get("current_period_end").and_then(Value::as_i64) {
        return Some(ts);
    }
    if let Some(ts) = obj.get("currentPeriodEnd").and_then(Value::as_i64) {
        return Some(ts);
    }
    let first_item = obj.get("items")?.get("data")?.get(0)?;
    first_item
        .get("current_period_end")
        .and_then(Value::as_i64)
        .or_else(|| first_item.get("currentPeriodEnd").and_then(Value::as_i64))
}

/// The object's own id (e.g. a subscription object's `id`).
pub fn object_id(obj: &Value) -> Option<String> {
    obj.get("id").and_then(Value::as_str).map(str::to_owned)
}

/// Subscription id referenced by a checkout session: either a plain string or
/// an expanded object with an `id`.
pub fn checkout_subscription_id(session: &Value) -> Option<String> {
    match session.get("subscription")? {
        Value::String(id) => Some(id.clone()),
        Value::Object(_) => session
            .get("subscription")?
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_owned),
        _ => None,
    }
}

/// Provider-reported subscription status (`active`, `past_due`, ...).
pub fn status(obj: &Value) -> Option<&str> {
    obj.get("status").and_then(Value::as_str)
}

/// Whether the provider has a cancellation scheduled at period end.
pub fn cancel_at_period_end(obj: &Value) -> Option<bool> {
    obj.get("cancel_at_period_end")
        .and_then(Value::as_bool)
        .or_else(|| obj.get("cancelAtPeriodEnd").and_then(Value::as_bool))
}

/// Price id of the first billed item, falling back to the legacy `plan` field.
pub fn price_id(obj: &Value) -> Option<String> {
    if let Some(id) = obj
        .get("items")
        .and_then(|i| i.get("data"))
        .and_then(|d| d.get(0))
        .and_then(|item| item.get("price"))
        .and_then(|p| p.get("id"))
        .and_then(Value::as_str)
    {
        return Some(id.to_owned());
    }
    obj.get("plan")
        .and_then(|p| p.get("id"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

/// A string value out of the object's `metadata` map.
pub fn metadata_str<'a>(obj: &'a Value, key: &str) -> Option<&'a str> {
    obj.get("metadata")?.get(key)?.as_str()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_period_end_prefers_top_level_snake_case() {
        let obj = json!({
            "current_period_end": 100,
            "currentPeriodEnd": 200,
            "items": { "data": [{ "current_period_end": 300 }] }
        });
        assert_eq!(period_end(&obj), Some(100));
    }

    #[test]
    fn test_period_end_falls_back_to_camel_case_then_items() {
        let camel = json!({ "currentPeriodEnd": 200 });
        assert_eq!(period_end(&camel), Some(200));

        let nested = json!({ "items": { "data": [{ "current_period_end": 300 }] } });
        assert_eq!(period_end(&nested), Some(300));

        let nested_camel = json!({ "items": { "data": [{ "currentPeriodEnd": 400 }] } });
        assert_eq!(period_end(&nested_camel), Some(400));
    }

    #[test]
    fn test_period_end_total_absence_is_none() {
        assert_eq!(period_end(&json!({})), None);
        assert_eq!(period_end(&json!({ "items": { "data": [] } })), None);
        // Never guess from a wrong type.
        assert_eq!(period_end(&json!({ "current_period_end": "soon" })), None);
    }

    #[test]
    fn test_checkout_subscription_id_string_or_expanded() {
        let plain = json!({ "subscription": "sub_123" });
        assert_eq!(checkout_subscription_id(&plain).as_deref(), Some("sub_123"));

        let expanded = json!({ "subscription": { "id": "sub_456" } });
        assert_eq!(checkout_subscription_id(&expanded).as_deref(), Some("sub_456"));

        assert_eq!(checkout_subscription_id(&json!({})), None);
        assert_eq!(checkout_subscription_id(&json!({ "subscription": null })), None);
    }

    #[test]
    fn test_price_id_from_items_then_plan() {
        let items = json!({ "items": { "data": [{ "price": { "id": "price_a" } }] } });
        assert_eq!(price_id(&items).as_deref(), Some("price_a"));

        let plan = json!({ "plan": { "id": "price_b" } });
        assert_eq!(price_id(&plan).as_deref(), Some("price_b"));

        assert_eq!(price_id(&json!({})), None);
    }

    #[test]
    fn test_metadata_str() {
        let obj = json!({ "metadata": { "account_id": "abc" } });
        assert_eq!(metadata_str(&obj, "account_id"), Some("abc"));
        assert_eq!(metadata_str(&obj, "course_id"), None);
    }
}
