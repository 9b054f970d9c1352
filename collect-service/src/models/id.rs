//! Canonical identifiers.
//!
//! Orders and statuses written by older clients may hold an identifier either as
//! a BSON `ObjectId` or as plain text. Every identifier entering the service is
//! turned into a [`CanonicalId`] once; comparisons, joins and writes only ever
//! use the canonical string form.

use crate::error::PaymentError;
use mongodb::bson::{oid::ObjectId, Bson};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalId(String);

impl CanonicalId {
    /// Canonicalise client-supplied text.
    ///
    /// 24 hex digits are treated as a structured id and lowercased. Anything
    /// else is accepted verbatim as an opaque id so lookups by arbitrary text
    /// still work.
    pub fn parse(raw: &str) -> Result<Self, PaymentError> {
        if raw.is_empty() {
            return Err(PaymentError::validation("identifier must not be empty"));
        }
        match ObjectId::parse_str(raw) {
            Ok(oid) => Ok(Self(oid.to_hex())),
            Err(_) => Ok(Self(raw.to_string())),
        }
    }

    pub fn from_object_id(oid: ObjectId) -> Self {
        Self(oid.to_hex())
    }

    /// Canonicalise a stored value. Returns `None` for BSON kinds that can not
    /// denote an identifier.
    pub fn from_bson(value: &Bson) -> Option<Self> {
        match value {
            Bson::ObjectId(oid) => Some(Self::from_object_id(*oid)),
            Bson::String(s) => Self::parse(s).ok(),
            Bson::Int32(n) => Some(Self(n.to_string())),
            Bson::Int64(n) => Some(Self(n.to_string())),
            Bson::Document(doc) => match doc.get("$oid") {
                Some(Bson::String(hex)) if doc.len() == 1 => Self::parse(hex).ok(),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The structured form, when the id is one.
    pub fn object_id(&self) -> Option<ObjectId> {
        ObjectId::parse_str(&self.0).ok()
    }

    /// Every representation under which this id may be stored.
    pub fn lookup_candidates(&self) -> Vec<Bson> {
        let mut candidates = vec![Bson::String(self.0.clone())];
        if let Some(oid) = self.object_id() {
            candidates.push(Bson::ObjectId(oid));
        }
        candidates
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<ObjectId> for CanonicalId {
    fn from(oid: ObjectId) -> Self {
        Self::from_object_id(oid)
    }
}

impl From<CanonicalId> for Bson {
    fn from(id: CanonicalId) -> Self {
        Bson::String(id.0)
    }
}

impl Serialize for CanonicalId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for CanonicalId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Bson::deserialize(deserializer)?;
        CanonicalId::from_bson(&value).ok_or_else(|| {
            serde::de::Error::custom(format!("unsupported identifier value: {}", value))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    const HEX: &str = "65b0e6293e9f76a9694d84b4";

    #[test]
    fn object_id_and_its_text_normalize_equal() {
        let oid = ObjectId::parse_str(HEX).unwrap();
        let from_native = CanonicalId::from_bson(&Bson::ObjectId(oid)).unwrap();
        let from_text = CanonicalId::parse(HEX).unwrap();
        let from_upper = CanonicalId::parse(&HEX.to_uppercase()).unwrap();

        assert_eq!(from_native, from_text);
        assert_eq!(from_text, from_upper);
        assert_eq!(from_text.as_str(), HEX);
    }

    #[test]
    fn malformed_ids_are_kept_as_opaque_text() {
        let id = CanonicalId::parse("order-42/not-an-oid").unwrap();
        assert_eq!(id.as_str(), "order-42/not-an-oid");
        assert!(id.object_id().is_none());
        assert_eq!(id.lookup_candidates(), vec![Bson::String(id.to_string())]);

        // 24 characters but not hex.
        let almost = CanonicalId::parse("zzzzzzzzzzzzzzzzzzzzzzzz").unwrap();
        assert!(almost.object_id().is_none());
    }

    #[test]
    fn empty_id_is_rejected() {
        assert!(matches!(
            CanonicalId::parse(""),
            Err(PaymentError::Validation(_))
        ));
    }

    #[test]
    fn structured_ids_look_up_both_representations() {
        let id = CanonicalId::parse(HEX).unwrap();
        let candidates = id.lookup_candidates();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0], Bson::String(HEX.to_string()));
        assert_eq!(
            candidates[1],
            Bson::ObjectId(ObjectId::parse_str(HEX).unwrap())
        );
    }

    #[test]
    fn deserializes_from_json_string_number_and_extended_oid() {
        let text: CanonicalId = serde_json::from_str(&format!("\"{}\"", HEX)).unwrap();
        let number: CanonicalId = serde_json::from_str("12345").unwrap();
        let extended: CanonicalId =
            serde_json::from_value(serde_json::json!({ "$oid": HEX })).unwrap();

        assert_eq!(text.as_str(), HEX);
        assert_eq!(number.as_str(), "12345");
        assert_eq!(extended, text);
    }

    #[test]
    fn deserializes_from_stored_object_id_and_serializes_as_string() {
        #[derive(Serialize, Deserialize)]
        struct Holder {
            id: CanonicalId,
        }

        let oid = ObjectId::parse_str(HEX).unwrap();
        let holder: Holder = mongodb::bson::from_document(doc! { "id": oid }).unwrap();
        assert_eq!(holder.id.as_str(), HEX);

        let written = mongodb::bson::to_document(&holder).unwrap();
        assert_eq!(written.get("id"), Some(&Bson::String(HEX.to_string())));
    }

    #[test]
    fn rejects_non_identifier_values() {
        assert!(CanonicalId::from_bson(&Bson::Boolean(true)).is_none());
        assert!(serde_json::from_str::<CanonicalId>("true").is_err());
    }
}
