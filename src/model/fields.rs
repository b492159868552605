use super::{Hooks, IdField, Identifiable};
use crate::core::Result;
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// `create_time` / `last_modify_time` field group, filled in by its hooks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateFields {
    #[serde(rename = "create_time", default)]
    pub created_at: i64,
    #[serde(rename = "last_modify_time", default)]
    pub updated_at: i64,
    #[serde(skip)]
    just_created: bool,
}

impl DateFields {
    pub fn new(created_at: i64, updated_at: i64) -> Self {
        Self {
            created_at,
            updated_at,
            just_created: false,
        }
    }
}

impl Hooks for DateFields {
    fn creating(&mut self) -> Result<()> {
        let now = now_millis();
        self.created_at = now;
        self.updated_at = now;
        self.just_created = true;
        Ok(())
    }

    // The save right after `creating` keeps its timestamp so a fresh
    // document has created_at == updated_at. Every other save stamps the
    // wall clock, never moving backwards or below created_at.
    fn saving(&mut self) -> Result<()> {
        if std::mem::take(&mut self.just_created) {
            return Ok(());
        }
        self.updated_at = now_millis().max(self.updated_at).max(self.created_at);
        Ok(())
    }
}

/// Default model fields: identifier plus creation/modification timestamps.
///
/// ```ignore
/// #[derive(Debug, Serialize, Deserialize, Model)]
/// struct Book {
///     #[serde(flatten)]
///     #[model(base)]
///     base: DefaultModel,
///     name: String,
///     pages: i32,
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultModel {
    #[serde(flatten)]
    id: IdField,
    #[serde(flatten)]
    dates: DateFields,
}

impl DefaultModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(id: IdField, dates: DateFields) -> Self {
        Self { id, dates }
    }

    pub fn created_at(&self) -> i64 {
        self.dates.created_at
    }

    pub fn updated_at(&self) -> i64 {
        self.dates.updated_at
    }

    pub fn dates(&self) -> &DateFields {
        &self.dates
    }
}

impl Identifiable for DefaultModel {
    fn get_id(&self) -> Option<ObjectId> {
        self.id.get_id()
    }

    fn set_id(&mut self, id: ObjectId) -> Result<()> {
        self.id.set_id(id)
    }

    fn get_id_str(&self) -> &str {
        self.id.get_id_str()
    }
}

impl Hooks for DefaultModel {
    fn creating(&mut self) -> Result<()> {
        self.dates.creating()
    }

    fn saving(&mut self) -> Result<()> {
        self.dates.saving()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_path_stamps_equal_timestamps() {
        let mut model = DefaultModel::new();
        model.creating().unwrap();
        model.saving().unwrap();

        assert!(model.created_at() > 0);
        assert_eq!(model.created_at(), model.updated_at());
    }

    #[test]
    fn test_saving_never_moves_backwards() {
        let mut dates = DateFields::new(1, i64::MAX - 1);
        dates.saving().unwrap();
        assert_eq!(dates.updated_at, i64::MAX - 1);
    }

    #[test]
    fn test_saving_keeps_created_at() {
        let mut dates = DateFields::default();
        dates.creating().unwrap();
        dates.saving().unwrap();
        let created = dates.created_at;

        dates.saving().unwrap();

        assert_eq!(dates.created_at, created);
        assert!(dates.updated_at >= created);
    }

    #[test]
    fn test_saving_stamps_clock_on_legacy_record() {
        // stored before last_modify_time existed
        let mut dates: DateFields =
            bson::from_document(bson::doc! { "create_time": 1000_i64 }).unwrap();
        assert_eq!(dates.updated_at, 0);

        let before = now_millis();
        dates.saving().unwrap();

        assert_eq!(dates.created_at, 1000);
        assert!(dates.updated_at >= before);
    }

    #[test]
    fn test_saving_never_below_created_at() {
        let mut dates = DateFields::new(i64::MAX - 5, 0);
        dates.saving().unwrap();
        assert_eq!(dates.updated_at, i64::MAX - 5);
    }

    #[test]
    fn test_bson_layout() {
        let id = ObjectId::new();
        let model = DefaultModel::from_parts(
            IdField::with_id(id),
            DateFields::new(10, 20),
        );

        let doc = bson::to_document(&model).unwrap();
        assert_eq!(doc.get_object_id("_id").unwrap(), id);
        assert_eq!(doc.get_i64("create_time").unwrap(), 10);
        assert_eq!(doc.get_i64("last_modify_time").unwrap(), 20);
        assert!(!doc.contains_key("id_str"));

        let back: DefaultModel = bson::from_document(doc).unwrap();
        assert_eq!(back, model);
        assert_eq!(back.get_id_str(), id.to_hex());
    }
}
