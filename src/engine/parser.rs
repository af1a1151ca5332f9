//! Quote response parsing.
//!
//! A response that decodes but carries no price is still a result, and a
//! body that does not decode is kept verbatim. Nothing the endpoint sent is
//! dropped.

use chrono::Utc;
use serde_json::Value;
use tracing::{error, warn};

use crate::model::{Identity, ScrapeResult};

/// Build the result for one accepted response body.
pub fn parse(raw_text: &str, item_key: &str, identity: Identity) -> ScrapeResult {
    let (extracted_value, raw_payload) = match serde_json::from_str::<Value>(raw_text) {
        Ok(payload) => (extract_price(item_key, &payload), payload),
        Err(e) => {
            error!(key = item_key, error = %e, "failed to decode quote response");
            (None, Value::String(raw_text.to_string()))
        }
    };

    ScrapeResult {
        item_key: item_key.to_string(),
        extracted_value,
        raw_payload,
        observed_at: Utc::now(),
        identity,
    }
}

/// `data.pricing.total`, only when the top-level `success` flag is truthy.
fn extract_price(item_key: &str, payload: &Value) -> Option<f64> {
    if !payload.get("success").is_some_and(truthy) {
        return None;
    }
    let total = payload.pointer("/data/pricing/total")?;
    let price = as_price(total);
    if price.is_none() {
        warn!(key = item_key, total = %total, "pricing total is not numeric");
    }
    price
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn as_price(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s
            .trim()
            .trim_start_matches('$')
            .replace(',', "")
            .parse()
            .ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity() -> Identity {
        Identity {
            name: "Mary Lopez".to_string(),
            email: "mary.lopez913@gmail.com".to_string(),
            phone: "(210) 555-1234".to_string(),
        }
    }

    #[test]
    fn extracts_nested_total() {
        let body = r#"{"success": true, "data": {"pricing": {"total": 142.50}}}"#;
        let result = parse(body, "78240", identity());
        assert_eq!(result.item_key, "78240");
        assert_eq!(result.extracted_value, Some(142.50));
        assert_eq!(result.raw_payload["data"]["pricing"]["total"], json!(142.50));
    }

    #[test]
    fn missing_pricing_path_is_not_an_error() {
        let result = parse(r#"{"success": true}"#, "78242", identity());
        assert_eq!(result.extracted_value, None);
        assert_eq!(result.raw_payload, json!({"success": true}));
    }

    #[test]
    fn unsuccessful_flag_ignores_price() {
        let body = r#"{"success": false, "data": {"pricing": {"total": 99}}}"#;
        assert_eq!(parse(body, "1", identity()).extracted_value, None);
    }

    #[test]
    fn undecodable_body_is_kept_verbatim() {
        let result = parse("<html>maintenance</html>", "78243", identity());
        assert_eq!(result.extracted_value, None);
        assert_eq!(result.raw_payload, json!("<html>maintenance</html>"));
        assert_eq!(result.identity, identity());
    }

    #[test]
    fn numeric_string_totals_are_accepted() {
        let body = r#"{"success": 1, "data": {"pricing": {"total": "$1,204.00"}}}"#;
        assert_eq!(parse(body, "1", identity()).extracted_value, Some(1204.0));
    }

    #[test]
    fn non_object_payload_has_no_price() {
        let result = parse("[1, 2, 3]", "1", identity());
        assert_eq!(result.extracted_value, None);
        assert_eq!(result.raw_payload, json!([1, 2, 3]));
    }
}
