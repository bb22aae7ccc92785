use serde::{Deserialize, Serialize};

use crate::bytecode::pool::ConstantPool;

/// Method flag: no receiver.
pub const ACC_STATIC: u16 = 0x0008;

/// A compiled compilation unit: one constant pool shared by every class.
///
/// `classes[0]` is always the module class holding top-level functions and
/// the implicit `<main>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledModule {
    pub major_version: u16,
    pub minor_version: u16,
    pub pool: ConstantPool,
    /// ClassRef of the module class.
    pub this_class: u16,
    pub classes: Vec<CompiledClass>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledClass {
    pub name: String,
    pub class_ref: u16,
    pub fields: Vec<CompiledField>,
    pub methods: Vec<CompiledMethod>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledField {
    pub name: String,
    pub name_index: u16,
    pub descriptor_index: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledMethod {
    pub name: String,
    pub descriptor: String,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub flags: u16,
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
}

impl CompiledMethod {
    pub fn is_static(&self) -> bool {
        self.flags & ACC_STATIC != 0
    }
}

impl CompiledClass {
    pub fn method(&self, name: &str) -> Option<&CompiledMethod> {
        self.methods.iter().find(|method| method.name == name)
    }
}

impl CompiledModule {
    pub fn module_class(&self) -> Option<&CompiledClass> {
        self.classes.first()
    }

    pub fn class(&self, name: &str) -> Option<&CompiledClass> {
        self.classes.iter().find(|class| class.name == name)
    }

    /// Looks up `method` on class `class`.
    pub fn method(&self, class: &str, method: &str) -> Option<&CompiledMethod> {
        self.class(class)?.method(method)
    }

    /// Binary artifact, see [`crate::emit`].
    pub fn to_bytes(&self) -> Result<Vec<u8>, crate::emit::ArtifactError> {
        crate::emit::write_artifact(self)
    }

    /// Compact postcard encoding of the whole module.
    pub fn to_snapshot(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn from_snapshot(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}
