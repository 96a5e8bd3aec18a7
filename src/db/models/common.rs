//! Common helpers shared across models.

use serde::{Deserialize, Deserializer};
use sqlx::{QueryBuilder, Sqlite};

/// Placeholder returned in place of stored secrets.
pub const MASKED_SECRET: &str = "**********";

/// Deserialize `null` the same way as a missing field.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Append `(?, ?, ...)` with one bind per id.
pub fn push_id_list(builder: &mut QueryBuilder<'_, Sqlite>, ids: &[i64]) {
    builder.push("(");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");
}

/// Remove duplicate ids while keeping the first occurrence order.
pub fn dedup_ids(ids: &[i64]) -> Vec<i64> {
    let mut seen = std::collections::HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Holder {
        #[serde(default, deserialize_with = "null_as_default")]
        ids: Vec<i64>,
    }

    #[test]
    fn test_null_as_default() {
        let h: Holder = serde_json::from_str(r#"{"ids": null}"#).unwrap();
        assert!(h.ids.is_empty());
        let h: Holder = serde_json::from_str(r#"{}"#).unwrap();
        assert!(h.ids.is_empty());
        let h: Holder = serde_json::from_str(r#"{"ids": [3, 4]}"#).unwrap();
        assert_eq!(h.ids, vec![3, 4]);
    }

    #[test]
    fn test_dedup_ids_keeps_order() {
        assert_eq!(dedup_ids(&[3, 1, 3, 2, 1]), vec![3, 1, 2]);
    }

    #[test]
    fn test_push_id_list() {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM teams WHERE id IN ");
        push_id_list(&mut builder, &[1, 2, 3]);
        assert_eq!(builder.sql(), "SELECT * FROM teams WHERE id IN (?, ?, ?)");
    }
}
