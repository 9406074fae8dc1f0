//! BSON to JSON conversion for result rows.

use mongodb::bson::{Bson, Document};
use serde_json::Value;

use common::models::Row;

/// Converts a BSON value to plain JSON.
///
/// Object ids become their hex string and dates an RFC 3339 string; other
/// values use relaxed extended JSON.
pub fn bson_to_json(value: Bson) -> Value {
    match value {
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => match dt.try_to_rfc3339_string() {
            Ok(s) => Value::String(s),
            Err(_) => Value::from(dt.timestamp_millis()),
        },
        Bson::Document(doc) => Value::Object(document_to_row(doc)),
        Bson::Array(items) => Value::Array(items.into_iter().map(bson_to_json).collect()),
        other => other.into_relaxed_extjson(),
    }
}

/// Converts one document into a result row, keeping field order.
pub fn document_to_row(doc: Document) -> Row {
    doc.into_iter()
        .map(|(key, value)| (key, bson_to_json(value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{doc, oid::ObjectId, DateTime};
    use serde_json::json;

    #[test]
    fn test_document_to_row() {
        let oid = ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap();
        let row = document_to_row(doc! {
            "_id": oid,
            "at": DateTime::from_millis(0),
            "n": 5_000_000_000i64,
            "nested": {"ids": [oid], "flag": true},
            "missing": Bson::Null,
        });
        assert_eq!(
            Value::Object(row),
            json!({
                "_id": "507f1f77bcf86cd799439011",
                "at": "1970-01-01T00:00:00Z",
                "n": 5_000_000_000i64,
                "nested": {"ids": ["507f1f77bcf86cd799439011"], "flag": true},
                "missing": null,
            })
        );
    }
}
