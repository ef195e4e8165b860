use std::sync::Arc;

use sakaki_common::meta::RecordMeta;
use sakaki_common::types::Value;
use sakaki_data::{PagedArena, RecordRef};

use crate::expr::VariableSource;

/// Variables of one block scope, backed by a single record buffer.
///
/// Operators address variables by field index; the table lives as long as
/// the task context owning it. Reads and writes go through the record
/// accessor, so only the task running the chain may touch it.
pub struct VariableTable {
    meta: Arc<RecordMeta>,
    buffer: Box<[u8]>,
}

impl VariableTable {
    pub fn new(meta: Arc<RecordMeta>) -> Self {
        let buffer = vec![0u8; meta.record_size()].into_boxed_slice();
        let table = Self { meta, buffer };
        // start with every variable NULL
        for i in 0..table.meta.field_count() {
            table.record().set_null(table.meta.nullity_offset(i), true);
        }
        table
    }

    pub fn meta(&self) -> &Arc<RecordMeta> {
        &self.meta
    }

    /// Record view over the backing buffer.
    pub fn record(&self) -> RecordRef {
        RecordRef::new(self.buffer.as_ptr() as *mut u8, self.buffer.len())
    }

    pub fn get(&self, index: usize) -> Value {
        self.record().get_value(&self.meta, index)
    }

    pub fn set(&self, index: usize, value: &Value, arena: &PagedArena) {
        self.record().set_value(&self.meta, index, value, arena);
    }
}

impl VariableSource for VariableTable {
    fn value(&self, index: usize) -> Value {
        self.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sakaki_common::types::FieldType;
    use sakaki_data::PagePool;

    #[test]
    fn variables_start_null() {
        let meta = RecordMeta::all_nullable(vec![FieldType::Int4, FieldType::Float8]);
        let table = VariableTable::new(meta);
        assert_eq!(table.get(0), Value::Null);
        assert_eq!(table.get(1), Value::Null);
    }

    #[test]
    fn set_and_get() {
        let meta = RecordMeta::all_nullable(vec![FieldType::Int4]);
        let table = VariableTable::new(meta);
        let arena = PagedArena::new(Arc::new(PagePool::new()));
        table.set(0, &Value::Int4(5), &arena);
        assert_eq!(table.get(0), Value::Int4(5));
        table.set(0, &Value::Null, &arena);
        assert_eq!(table.get(0), Value::Null);
    }
}
