//! Inbound event payloads.

use serde::{Deserialize, Serialize};

/// Fact that a product was created, published by the products service.
///
/// Field names stay camelCase on the wire to match the producer's JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCreatedEvent {
    pub product_id: String,
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_created_event_deserialization() {
        let json = r#"{
            "productId": "P-100",
            "title": "Standing Desk"
        }"#;

        let event: ProductCreatedEvent = serde_json::from_str(json).expect("Failed to parse");
        assert_eq!(event.product_id, "P-100");
        assert_eq!(event.title, "Standing Desk");
    }

    #[test]
    fn test_product_created_event_serializes_camel_case() {
        let event = ProductCreatedEvent {
            product_id: "P-1".to_string(),
            title: "Lamp".to_string(),
        };

        let json = serde_json::to_value(&event).expect("Failed to serialize");
        assert_eq!(json["productId"], "P-1");
        assert_eq!(json["title"], "Lamp");
    }
}
