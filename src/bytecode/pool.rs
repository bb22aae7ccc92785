use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::bytecode::compile_error::GenerationError;

pub const TAG_UTF8: u8 = 1;
pub const TAG_INTEGER: u8 = 3;
pub const TAG_CLASS: u8 = 7;
pub const TAG_STRING: u8 = 8;
pub const TAG_FIELDREF: u8 = 9;
pub const TAG_METHODREF: u8 = 10;
pub const TAG_NAME_AND_TYPE: u8 = 12;

/// Constant pool entry. References to other entries are 1-based pool
/// indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolEntry {
    Utf8(String),
    Integer(i32),
    String { utf8: u16 },
    ClassRef { name: u16 },
    FieldRef { class: u16, name_and_type: u16 },
    MethodRef { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
}

impl PoolEntry {
    pub fn tag(&self) -> u8 {
        match self {
            PoolEntry::Utf8(_) => TAG_UTF8,
            PoolEntry::Integer(_) => TAG_INTEGER,
            PoolEntry::String { .. } => TAG_STRING,
            PoolEntry::ClassRef { .. } => TAG_CLASS,
            PoolEntry::FieldRef { .. } => TAG_FIELDREF,
            PoolEntry::MethodRef { .. } => TAG_METHODREF,
            PoolEntry::NameAndType { .. } => TAG_NAME_AND_TYPE,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            PoolEntry::Utf8(_) => "Utf8",
            PoolEntry::Integer(_) => "Integer",
            PoolEntry::String { .. } => "String",
            PoolEntry::ClassRef { .. } => "Class",
            PoolEntry::FieldRef { .. } => "Fieldref",
            PoolEntry::MethodRef { .. } => "Methodref",
            PoolEntry::NameAndType { .. } => "NameAndType",
        }
    }
}

/// Append-only, deduplicated constant pool.
///
/// Index 0 is reserved; the first entry lives at index 1. Adding an entry
/// equal to an existing one returns the existing index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<PoolEntry>", into = "Vec<PoolEntry>")]
pub struct ConstantPool {
    entries: Vec<PoolEntry>,
    index: HashMap<PoolEntry, u16>,
}

impl ConstantPool {
    /// Largest entry count whose `pool_count` (entries + 1) fits a u16.
    pub const MAX_ENTRIES: usize = u16::MAX as usize - 1;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entry: PoolEntry) -> Result<u16, GenerationError> {
        if let Some(&index) = self.index.get(&entry) {
            return Ok(index);
        }
        if self.entries.len() >= Self::MAX_ENTRIES {
            return Err(GenerationError::PoolOverflow);
        }

        let index = (self.entries.len() + 1) as u16;
        self.index.insert(entry.clone(), index);
        self.entries.push(entry);
        Ok(index)
    }

    pub fn utf8(&mut self, text: &str) -> Result<u16, GenerationError> {
        self.add(PoolEntry::Utf8(text.to_string()))
    }

    pub fn integer(&mut self, value: i32) -> Result<u16, GenerationError> {
        self.add(PoolEntry::Integer(value))
    }

    pub fn string(&mut self, text: &str) -> Result<u16, GenerationError> {
        let utf8 = self.utf8(text)?;
        self.add(PoolEntry::String { utf8 })
    }

    pub fn class_ref(&mut self, name: &str) -> Result<u16, GenerationError> {
        let name = self.utf8(name)?;
        self.add(PoolEntry::ClassRef { name })
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16, GenerationError> {
        let name = self.utf8(name)?;
        let descriptor = self.utf8(descriptor)?;
        self.add(PoolEntry::NameAndType { name, descriptor })
    }

    pub fn field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> Result<u16, GenerationError> {
        let class = self.class_ref(class)?;
        let name_and_type = self.name_and_type(name, descriptor)?;
        self.add(PoolEntry::FieldRef { class, name_and_type })
    }

    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> Result<u16, GenerationError> {
        let class = self.class_ref(class)?;
        let name_and_type = self.name_and_type(name, descriptor)?;
        self.add(PoolEntry::MethodRef { class, name_and_type })
    }

    pub fn get(&self, index: u16) -> Option<&PoolEntry> {
        let slot = usize::from(index).checked_sub(1)?;
        self.entries.get(slot)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PoolEntry] {
        &self.entries
    }

    /// Entries with their 1-based indices.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &PoolEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, entry)| ((i + 1) as u16, entry))
    }

    pub fn utf8_at(&self, index: u16) -> Option<&str> {
        match self.get(index)? {
            PoolEntry::Utf8(text) => Some(text),
            _ => None,
        }
    }

    pub fn class_name(&self, index: u16) -> Option<&str> {
        match self.get(index)? {
            PoolEntry::ClassRef { name } => self.utf8_at(*name),
            _ => None,
        }
    }

    /// `(class, name, descriptor)` of a FieldRef or MethodRef.
    pub fn member(&self, index: u16) -> Option<(&str, &str, &str)> {
        let (class, name_and_type) = match self.get(index)? {
            PoolEntry::FieldRef { class, name_and_type } | PoolEntry::MethodRef { class, name_and_type } => {
                (*class, *name_and_type)
            }
            _ => return None,
        };
        let PoolEntry::NameAndType { name, descriptor } = self.get(name_and_type)? else {
            return None;
        };
        Some((self.class_name(class)?, self.utf8_at(*name)?, self.utf8_at(*descriptor)?))
    }

    /// Human-readable rendering of an entry, resolving references.
    pub fn describe(&self, index: u16) -> String {
        let Some(entry) = self.get(index) else {
            return format!("<bad index #{}>", index);
        };
        match entry {
            PoolEntry::Utf8(text) => format!("{:?}", text),
            PoolEntry::Integer(value) => value.to_string(),
            PoolEntry::String { utf8 } => match self.utf8_at(*utf8) {
                Some(text) => format!("{:?}", text),
                None => format!("<bad string #{}>", utf8),
            },
            PoolEntry::ClassRef { .. } => self.class_name(index).unwrap_or("<bad class>").to_string(),
            PoolEntry::FieldRef { .. } | PoolEntry::MethodRef { .. } => match self.member(index) {
                Some((class, name, descriptor)) => format!("{}.{}:{}", class, name, descriptor),
                None => format!("<bad member #{}>", index),
            },
            PoolEntry::NameAndType { name, descriptor } => format!(
                "{}:{}",
                self.utf8_at(*name).unwrap_or("?"),
                self.utf8_at(*descriptor).unwrap_or("?")
            ),
        }
    }
}

impl From<Vec<PoolEntry>> for ConstantPool {
    fn from(entries: Vec<PoolEntry>) -> Self {
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.clone(), (i + 1) as u16))
            .collect();
        ConstantPool { entries, index }
    }
}

impl From<ConstantPool> for Vec<PoolEntry> {
    fn from(pool: ConstantPool) -> Self {
        pool.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_start_at_one() {
        let mut pool = ConstantPool::new();
        assert_eq!(pool.integer(70000).unwrap(), 1);
        assert_eq!(pool.get(0), None);
        assert_eq!(pool.get(1), Some(&PoolEntry::Integer(70000)));
    }

    #[test]
    fn test_string_deduplication() {
        let mut pool = ConstantPool::new();
        let a = pool.string("abc").unwrap();
        let b = pool.string("abc").unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.len(), 2); // Utf8 + String
        let strings = pool.entries().iter().filter(|e| matches!(e, PoolEntry::String { .. }));
        assert_eq!(strings.count(), 1);
    }

    #[test]
    fn test_method_ref_shares_parts() {
        let mut pool = ConstantPool::new();
        let m = pool.method_ref("Main", "add", "(AA)A").unwrap();
        let f = pool.field_ref("Main", "add", "A").unwrap();
        assert_ne!(m, f);
        // Utf8 Main, Class, Utf8 add, Utf8 (AA)A, NameAndType, Methodref,
        // Utf8 A, NameAndType, Fieldref
        assert_eq!(pool.len(), 9);
        assert_eq!(pool.member(m), Some(("Main", "add", "(AA)A")));
        assert_eq!(pool.describe(f), "Main.add:A");
    }

    #[test]
    fn test_overflow() {
        let mut pool = ConstantPool::new();
        for n in 0..ConstantPool::MAX_ENTRIES as i32 {
            pool.integer(n).unwrap();
        }
        assert_eq!(pool.integer(-1), Err(GenerationError::PoolOverflow));
        // Existing entries still resolve.
        assert_eq!(pool.integer(0), Ok(1));
    }

    #[test]
    fn test_rebuilt_pool_keeps_deduplicating() {
        let mut pool = ConstantPool::new();
        pool.string("x").unwrap();
        let entries: Vec<PoolEntry> = pool.clone().into();
        let mut rebuilt = ConstantPool::from(entries);
        assert_eq!(rebuilt, pool);
        assert_eq!(rebuilt.string("x").unwrap(), 2);
    }
}
