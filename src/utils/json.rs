use std::io;

use bson::{Bson, Document};

use crate::errors::DbError;

/// Convert a `serde_json::Value` that must be an object into a `bson::Document`.
/// Extended-JSON wrappers such as `{"$oid": ...}` and `{"$date": ...}` are decoded.
///
/// # Errors
/// `DbError::Io` (`InvalidData`) when the value is not an object or cannot be represented.
pub fn json_value_to_document(val: &serde_json::Value) -> Result<Document, DbError> {
    let obj = val
        .as_object()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "expected JSON object"))?;
    let doc = Document::try_from(obj.clone())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(doc)
}

/// Convert any JSON value (object, array or scalar) into BSON.
///
/// # Errors
/// `DbError::Io` (`InvalidData`) when the value cannot be represented.
pub fn json_value_to_bson(val: &serde_json::Value) -> Result<Bson, DbError> {
    let mut wrapper = serde_json::Map::new();
    wrapper.insert("v".to_string(), val.clone());
    let doc = Document::try_from(wrapper)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(doc.get("v").cloned().unwrap_or(Bson::Null))
}

/// Parse a JSON string into a `bson::Document`. The JSON must be a top-level object.
///
/// # Errors
/// `DbError::Json` on malformed JSON, `DbError::Io` when the top level is not an object.
pub fn parse_json_document(json: &str) -> Result<Document, DbError> {
    let val: serde_json::Value = serde_json::from_str(json)?;
    json_value_to_document(&val)
}

/// Parse a JSON array of objects (e.g. a pipeline) into documents.
///
/// # Errors
/// `DbError::Json` on malformed JSON, `DbError::Io` when an element is not an object.
pub fn parse_json_documents(json: &str) -> Result<Vec<Document>, DbError> {
    let val: serde_json::Value = serde_json::from_str(json)?;
    let items = val
        .as_array()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "expected JSON array"))?;
    items.iter().map(json_value_to_document).collect()
}

/// Render a document as relaxed extended JSON for output (`{"$oid": ...}` for object ids,
/// `{"$date": ...}` for dates, plain numbers otherwise).
#[must_use]
pub fn document_to_json(doc: &Document) -> serde_json::Value {
    Bson::Document(doc.clone()).into_relaxed_extjson()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_to_bson_success() {
        let d = parse_json_document("{\"a\":1,\"b\":\"x\"}").unwrap();
        assert_eq!(d.get_i32("a").unwrap(), 1);
        assert_eq!(d.get_str("b").unwrap(), "x");
    }

    #[test]
    fn json_to_bson_rejects_array() {
        let e = parse_json_document("[1,2,3]").unwrap_err();
        assert!(matches!(e, DbError::Io(ref io) if io.kind() == io::ErrorKind::InvalidData));
    }

    #[test]
    fn json_array_of_stages() {
        let docs = parse_json_documents(r#"[{"$match":{"a":1}},{"$limit":2}]"#).unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs[1].contains_key("$limit"));
    }

    #[test]
    fn scalar_conversion() {
        let v = json_value_to_bson(&serde_json::json!([1, "x"])).unwrap();
        assert_eq!(v, Bson::Array(vec![Bson::Int32(1), Bson::String("x".into())]));
    }
}
