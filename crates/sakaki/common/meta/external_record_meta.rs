use std::sync::Arc;

use crate::meta::RecordMeta;

/// Record meta for user-facing results, optionally carrying column names.
#[derive(Debug)]
pub struct ExternalRecordMeta {
    meta: Arc<RecordMeta>,
    field_names: Vec<Option<String>>,
}

impl ExternalRecordMeta {
    pub fn new(meta: Arc<RecordMeta>, field_names: Vec<Option<String>>) -> Arc<Self> {
        assert_eq!(meta.field_count(), field_names.len(), "one name slot per field");
        Arc::new(Self { meta, field_names })
    }

    /// Meta without any column names.
    pub fn anonymous(meta: Arc<RecordMeta>) -> Arc<Self> {
        let names = vec![None; meta.field_count()];
        Self::new(meta, names)
    }

    pub fn origin(&self) -> &Arc<RecordMeta> {
        &self.meta
    }

    pub fn field_name(&self, index: usize) -> Option<&str> {
        self.field_names[index].as_deref()
    }

    /// Index of the first field with the given name.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.field_names.iter().position(|n| n.as_deref() == Some(name))
    }
}
