use crate::backend::Attributes;
use serde_json::Value;

/// Current and original attribute bags for one model instance.
///
/// `original` is the snapshot taken when the instance was hydrated from
/// storage (empty for a freshly built instance). After a successful save the
/// store is re-synced from the re-read row and remembers which columns that
/// save actually changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeStore {
    current: Attributes,
    original: Attributes,
    changes: Attributes,
    saved: bool,
}

impl AttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clean store: current and original both equal `row`.
    pub fn from_row(row: Attributes) -> Self {
        Self {
            current: row.clone(),
            original: row,
            changes: Attributes::new(),
            saved: false,
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.current.get(column)
    }

    pub fn set(&mut self, column: impl Into<String>, value: Value) {
        self.current.insert(column.into(), value);
    }

    pub fn current(&self) -> &Attributes {
        &self.current
    }

    pub fn get_original(&self) -> &Attributes {
        &self.original
    }

    pub fn get_original_value(&self, column: &str) -> Option<&Value> {
        self.original.get(column)
    }

    /// Columns in `fillable` whose current value differs from the original.
    pub fn get_changes(&self, fillable: &[String]) -> Attributes {
        fillable
            .iter()
            .filter(|column| self.column_differs(column))
            .filter_map(|column| {
                self.current
                    .get(column.as_str())
                    .map(|value| (column.clone(), value.clone()))
            })
            .collect()
    }

    /// One column, or any column when `column` is `None`. A key present on
    /// only one side counts as a difference.
    pub fn is_dirty(&self, column: Option<&str>) -> bool {
        match column {
            Some(column) => self.column_differs(column),
            None => self
                .original
                .keys()
                .chain(self.current.keys())
                .any(|column| self.column_differs(column)),
        }
    }

    pub fn is_clean(&self, column: Option<&str>) -> bool {
        !self.is_dirty(column)
    }

    /// True once a save has gone through and that save changed the column
    /// (or any column when `None`).
    pub fn was_changed(&self, column: Option<&str>) -> bool {
        if !self.saved {
            return false;
        }
        match column {
            Some(column) => self.changes.contains_key(column),
            None => !self.changes.is_empty(),
        }
    }

    pub fn has_saved(&self) -> bool {
        self.saved
    }

    /// Re-sync from a row read back after a write. Records which columns
    /// differ from the pre-save original and leaves the store clean.
    pub fn sync_persisted(&mut self, row: Attributes) {
        self.changes = row
            .iter()
            .filter(|(column, value)| self.original.get(column.as_str()) != Some(*value))
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect();
        self.current = row.clone();
        self.original = row;
        self.saved = true;
    }

    fn column_differs(&self, column: &str) -> bool {
        self.current.get(column) != self.original.get(column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row() -> Attributes {
        json!({"id": 1, "brand": "visa", "last_four": 4242})
            .as_object()
            .cloned()
            .unwrap()
    }

    fn fillable() -> Vec<String> {
        vec!["brand".to_string(), "last_four".to_string()]
    }

    #[test]
    fn test_hydrated_store_is_clean() {
        let store = AttributeStore::from_row(row());

        assert!(store.is_clean(None));
        assert!(!store.is_dirty(Some("brand")));
        assert!(store.get_changes(&fillable()).is_empty());
        assert!(!store.was_changed(None));
    }

    #[test]
    fn test_setter_makes_single_column_dirty() {
        let mut store = AttributeStore::from_row(row());
        store.set("brand", json!("amex"));

        assert!(store.is_dirty(None));
        assert!(store.is_dirty(Some("brand")));
        assert!(store.is_clean(Some("last_four")));

        let changes = store.get_changes(&fillable());
        assert_eq!(changes.len(), 1);
        assert_eq!(changes.get("brand"), Some(&json!("amex")));
        assert_eq!(store.get_original_value("brand"), Some(&json!("visa")));
    }

    #[test]
    fn test_setting_same_value_stays_clean() {
        let mut store = AttributeStore::from_row(row());
        store.set("brand", json!("visa"));
        assert!(store.is_clean(None));
    }

    #[test]
    fn test_changes_limited_to_fillable() {
        let mut store = AttributeStore::from_row(row());
        store.set("id", json!(2));

        assert!(store.is_dirty(Some("id")));
        assert!(store.get_changes(&fillable()).is_empty());
    }

    #[test]
    fn test_unbound_store_tracks_new_keys() {
        let mut store = AttributeStore::new();
        assert!(store.is_clean(None));
        assert!(store.get_original().is_empty());

        store.set("brand", json!("visa"));
        assert!(store.is_dirty(None));
    }

    #[test]
    fn test_was_changed_after_save() {
        let mut store = AttributeStore::from_row(row());
        store.set("brand", json!("amex"));
        assert!(!store.was_changed(Some("brand")));

        let mut persisted = row();
        persisted.insert("brand".to_string(), json!("amex"));
        store.sync_persisted(persisted);

        assert!(store.is_clean(None));
        assert!(store.was_changed(Some("brand")));
        assert!(!store.was_changed(Some("last_four")));
        assert!(store.was_changed(None));
        assert_eq!(store.get_original_value("brand"), Some(&json!("amex")));
    }
}
