//! Items owned by a principal, and the queries that list them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::cache::{Owned, PrincipalId};
use crate::domain::error::DomainError;

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_PER_PAGE: u32 = 100;
pub const DEFAULT_PER_PAGE: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Active,
    Archived,
}

impl ItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Active => "active",
            ItemStatus::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemSort {
    #[default]
    Newest,
    Oldest,
    Title,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: Uuid,
    pub owner_id: PrincipalId,
    pub title: String,
    pub notes: Option<String>,
    pub status: ItemStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Owned for ItemRecord {
    fn is_owned_by(&self, principal: &PrincipalId) -> bool {
        self.owner_id == *principal
    }
}

/// Filter and pagination for listing a principal's items.
///
/// Absent fields and fields set to their default are left out of the
/// canonical form, so `{}`, `{"page":1}` and `{"per_page":20}` all name the
/// same unfiltered first page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ItemQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ItemStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<ItemSort>,
}

impl ItemQuery {
    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.page == Some(0) {
            return Err(DomainError::validation("page starts at 1"));
        }
        if let Some(per_page) = self.per_page
            && !(1..=MAX_PER_PAGE).contains(&per_page)
        {
            return Err(DomainError::validation(format!(
                "per_page must be between 1 and {MAX_PER_PAGE}"
            )));
        }
        Ok(())
    }

    pub fn page_or_default(&self) -> u32 {
        self.page.unwrap_or(1)
    }

    pub fn per_page_or_default(&self) -> u32 {
        self.per_page.unwrap_or(DEFAULT_PER_PAGE)
    }

    /// Parse a query shape given as JSON, e.g. from configuration.
    pub fn from_shape(shape: &Value) -> Result<Self, DomainError> {
        let query: ItemQuery = serde_json::from_value(shape.clone()).map_err(|err| {
            DomainError::validation(format!("invalid list query `{shape}`: {err}"))
        })?;
        query.validate()?;
        Ok(query)
    }

    /// Same listing with every defaulted field cleared.
    pub fn normalized(&self) -> Self {
        Self {
            status: self.status,
            page: self.page.filter(|page| *page != 1),
            per_page: self.per_page.filter(|per_page| *per_page != DEFAULT_PER_PAGE),
            sort: self.sort.filter(|sort| *sort != ItemSort::default()),
        }
    }

    /// The query as a JSON object holding only the fields that differ from
    /// their defaults.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self.normalized()).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemPage {
    pub items: Vec<ItemRecord>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

impl Owned for ItemPage {
    fn is_owned_by(&self, principal: &PrincipalId) -> bool {
        self.items.is_owned_by(principal)
    }
}

/// Validated title: trimmed, non-empty, bounded.
pub fn normalize_title(raw: &str) -> Result<String, DomainError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(DomainError::validation("title must not be empty"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(DomainError::validation(format!(
            "title exceeds {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(title.to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::cache::canonical_query;

    #[test]
    fn default_query_is_empty_object() {
        assert_eq!(ItemQuery::default().to_value(), json!({}));
        assert_eq!(ItemQuery::default().with_page(1).to_value(), json!({}));
    }

    #[test]
    fn default_valued_fields_collapse_to_one_shape() {
        let spellings = [
            r#"{}"#,
            r#"{"page":1}"#,
            r#"{"per_page":20}"#,
            r#"{"sort":"newest"}"#,
            r#"{"sort":"newest","per_page":20,"page":1}"#,
        ];
        for spelling in spellings {
            let query: ItemQuery = serde_json::from_str(spelling).unwrap();
            assert_eq!(canonical_query(&query.to_value()), "{}", "{spelling}");
        }

        let filtered: ItemQuery =
            serde_json::from_str(r#"{"status":"active","page":1,"sort":"title"}"#).unwrap();
        assert_eq!(
            canonical_query(&filtered.to_value()),
            r#"{"sort":"title","status":"active"}"#
        );
    }

    #[test]
    fn shapes_from_configuration_are_checked() {
        assert_eq!(
            ItemQuery::from_shape(&json!({"page": 1})).unwrap().to_value(),
            json!({})
        );
        assert!(ItemQuery::from_shape(&json!({"page": "1"})).is_err());
        assert!(ItemQuery::from_shape(&json!({"pgae": 2})).is_err());
        assert!(ItemQuery::from_shape(&json!({"per_page": 0})).is_err());
    }

    #[test]
    fn field_order_in_request_does_not_matter() {
        let a: ItemQuery = serde_json::from_str(r#"{"status":"active","page":2}"#).unwrap();
        let b: ItemQuery = serde_json::from_str(r#"{"page":2,"status":"active"}"#).unwrap();

        assert_eq!(
            canonical_query(&a.to_value()),
            canonical_query(&b.to_value())
        );
        assert_eq!(
            canonical_query(&a.to_value()),
            r#"{"page":2,"status":"active"}"#
        );
    }

    #[test]
    fn query_validation_rejects_out_of_range_paging() {
        assert!(ItemQuery::default().with_page(0).validate().is_err());
        let oversized = ItemQuery {
            per_page: Some(MAX_PER_PAGE + 1),
            ..Default::default()
        };
        assert!(oversized.validate().is_err());
        assert!(ItemQuery::default().with_page(3).validate().is_ok());
    }

    #[test]
    fn titles_are_trimmed_and_bounded() {
        assert_eq!(normalize_title("  groceries ").unwrap(), "groceries");
        assert!(normalize_title("   ").is_err());
        assert!(normalize_title(&"x".repeat(MAX_TITLE_LEN + 1)).is_err());
    }

    #[test]
    fn record_ownership() {
        let now = OffsetDateTime::now_utc();
        let record = ItemRecord {
            id: Uuid::new_v4(),
            owner_id: PrincipalId::from("u1"),
            title: "t".into(),
            notes: None,
            status: ItemStatus::Active,
            created_at: now,
            updated_at: now,
        };
        assert!(record.is_owned_by(&PrincipalId::from("u1")));
        assert!(!record.is_owned_by(&PrincipalId::from("u2")));
    }
}
