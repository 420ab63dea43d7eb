//! Id fields arrive either as JSON integers or as numeric strings depending on
//! the client, so inbound payloads accept both.

use serde::{de, Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Text(String),
}

impl RawId {
    fn into_id<E: de::Error>(self) -> Result<i64, E> {
        match self {
            RawId::Int(id) => Ok(id),
            RawId::Text(raw) => raw
                .trim()
                .parse::<i64>()
                .map_err(|_| E::custom(format!("invalid id '{raw}'"))),
        }
    }
}

pub fn de_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer)?.into_id()
}

pub fn de_opt_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawId>::deserialize(deserializer)? {
        Some(raw) => raw.into_id().map(Some),
        None => Ok(None),
    }
}

pub fn de_opt_ids<'de, D>(deserializer: D) -> Result<Option<Vec<i64>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Vec<RawId>>::deserialize(deserializer)? {
        Some(list) => list
            .into_iter()
            .map(RawId::into_id)
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Ids {
        #[serde(deserialize_with = "de_id")]
        id: i64,
        #[serde(default, deserialize_with = "de_opt_ids")]
        more: Option<Vec<i64>>,
    }

    #[test]
    fn ids_accept_numbers_and_numeric_strings() {
        let parsed: Ids =
            serde_json::from_value(json!({ "id": " 42 ", "more": [1, "2"] })).unwrap();
        assert_eq!(parsed.id, 42);
        assert_eq!(parsed.more, Some(vec![1, 2]));

        let parsed: Ids = serde_json::from_value(json!({ "id": 7 })).unwrap();
        assert_eq!(parsed.id, 7);
        assert!(parsed.more.is_none());

        assert!(serde_json::from_value::<Ids>(json!({ "id": "abc" })).is_err());
        assert!(serde_json::from_value::<Ids>(json!({ "id": null })).is_err());
    }
}
