//! Binary module artifact.
//!
//! All integers are big-endian:
//!
//! ```text
//! u32  magic "KILN"
//! u16  minor_version, u16 major_version
//! u16  pool_count (entries + 1), then entries: u8 tag + payload
//! u16  this_class
//! u16  class_count, then per class:
//!        u16 class_ref
//!        u16 field_count, fields: u16 name, u16 descriptor
//!        u16 method_count, methods: u16 name, u16 descriptor, u16 flags,
//!            u16 max_stack, u16 max_locals, u32 code_length, code
//! ```

use crate::bytecode::ir::{CompiledClass, CompiledField, CompiledMethod, CompiledModule};
use crate::bytecode::pool::{
    ConstantPool, PoolEntry, TAG_CLASS, TAG_FIELDREF, TAG_INTEGER, TAG_METHODREF, TAG_NAME_AND_TYPE, TAG_STRING,
    TAG_UTF8,
};

pub const MAGIC: u32 = 0x4B49_4C4E;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ArtifactError {
    #[error("not a kiln artifact (magic 0x{found:08x})")]
    BadMagic { found: u32 },

    #[error("artifact truncated at byte {offset}")]
    Truncated { offset: usize },

    #[error("unknown constant pool tag {tag} at byte {offset}")]
    UnknownTag { tag: u8, offset: usize },

    #[error("invalid UTF-8 in constant at byte {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("too many {what} ({count}) for the artifact format")]
    Overflow { what: &'static str, count: usize },

    #[error("constant pool index #{index} is missing or has the wrong kind")]
    InvalidIndex { index: u16 },

    #[error("{count} unexpected bytes after the last class")]
    TrailingBytes { count: usize },
}

// =============================================================================
// Writing
// =============================================================================

pub fn write_artifact(module: &CompiledModule) -> Result<Vec<u8>, ArtifactError> {
    let mut w = ArtifactWriter::default();
    w.u32(MAGIC);
    w.u16(module.minor_version);
    w.u16(module.major_version);

    w.count("constant pool entries", module.pool.len() + 1)?;
    for entry in module.pool.entries() {
        w.entry(entry)?;
    }

    w.u16(module.this_class);
    w.count("classes", module.classes.len())?;
    for class in &module.classes {
        w.u16(class.class_ref);

        w.count("fields", class.fields.len())?;
        for field in &class.fields {
            w.u16(field.name_index);
            w.u16(field.descriptor_index);
        }

        w.count("methods", class.methods.len())?;
        for method in &class.methods {
            w.u16(method.name_index);
            w.u16(method.descriptor_index);
            w.u16(method.flags);
            w.u16(method.max_stack);
            w.u16(method.max_locals);
            let length = u32::try_from(method.code.len()).map_err(|_| ArtifactError::Overflow {
                what: "code bytes",
                count: method.code.len(),
            })?;
            w.u32(length);
            w.bytes.extend_from_slice(&method.code);
        }
    }

    tracing::debug!(bytes = w.bytes.len(), classes = module.classes.len(), "artifact written");
    Ok(w.bytes)
}

#[derive(Default)]
struct ArtifactWriter {
    bytes: Vec<u8>,
}

impl ArtifactWriter {
    fn u8(&mut self, v: u8) {
        self.bytes.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.bytes.extend_from_slice(&v.to_be_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_be_bytes());
    }

    fn count(&mut self, what: &'static str, count: usize) -> Result<(), ArtifactError> {
        let v = u16::try_from(count).map_err(|_| ArtifactError::Overflow { what, count })?;
        self.u16(v);
        Ok(())
    }

    fn entry(&mut self, entry: &PoolEntry) -> Result<(), ArtifactError> {
        self.u8(entry.tag());
        match entry {
            PoolEntry::Utf8(text) => {
                self.count("UTF-8 bytes", text.len())?;
                self.bytes.extend_from_slice(text.as_bytes());
            }
            PoolEntry::Integer(value) => self.bytes.extend_from_slice(&value.to_be_bytes()),
            PoolEntry::String { utf8 } => self.u16(*utf8),
            PoolEntry::ClassRef { name } => self.u16(*name),
            PoolEntry::FieldRef { class, name_and_type } | PoolEntry::MethodRef { class, name_and_type } => {
                self.u16(*class);
                self.u16(*name_and_type);
            }
            PoolEntry::NameAndType { name, descriptor } => {
                self.u16(*name);
                self.u16(*descriptor);
            }
        }
        Ok(())
    }
}

// =============================================================================
// Reading
// =============================================================================

/// The artifact as laid out on disk: names are still pool indices.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleImage {
    pub minor_version: u16,
    pub major_version: u16,
    pub pool: Vec<PoolEntry>,
    pub this_class: u16,
    pub classes: Vec<ClassImage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassImage {
    pub class_ref: u16,
    /// `(name, descriptor)` indices.
    pub fields: Vec<(u16, u16)>,
    pub methods: Vec<MethodImage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodImage {
    pub name: u16,
    pub descriptor: u16,
    pub flags: u16,
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
}

pub fn read_artifact(bytes: &[u8]) -> Result<ModuleImage, ArtifactError> {
    let mut r = ArtifactReader { bytes, pos: 0 };

    let magic = r.u32()?;
    if magic != MAGIC {
        return Err(ArtifactError::BadMagic { found: magic });
    }
    let minor_version = r.u16()?;
    let major_version = r.u16()?;

    let pool_count = r.u16()?;
    let mut pool = Vec::with_capacity(usize::from(pool_count.saturating_sub(1)));
    for _ in 1..pool_count {
        pool.push(r.entry()?);
    }

    let this_class = r.u16()?;
    let class_count = r.u16()?;
    let mut classes = Vec::with_capacity(usize::from(class_count));
    for _ in 0..class_count {
        let class_ref = r.u16()?;

        let field_count = r.u16()?;
        let mut fields = Vec::with_capacity(usize::from(field_count));
        for _ in 0..field_count {
            fields.push((r.u16()?, r.u16()?));
        }

        let method_count = r.u16()?;
        let mut methods = Vec::with_capacity(usize::from(method_count));
        for _ in 0..method_count {
            let name = r.u16()?;
            let descriptor = r.u16()?;
            let flags = r.u16()?;
            let max_stack = r.u16()?;
            let max_locals = r.u16()?;
            let length = r.u32()? as usize;
            let code = r.take(length)?.to_vec();
            methods.push(MethodImage {
                name,
                descriptor,
                flags,
                max_stack,
                max_locals,
                code,
            });
        }

        classes.push(ClassImage {
            class_ref,
            fields,
            methods,
        });
    }

    if r.pos < bytes.len() {
        return Err(ArtifactError::TrailingBytes {
            count: bytes.len() - r.pos,
        });
    }

    Ok(ModuleImage {
        minor_version,
        major_version,
        pool,
        this_class,
        classes,
    })
}

struct ArtifactReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ArtifactReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ArtifactError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(ArtifactError::Truncated { offset: self.pos })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ArtifactError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ArtifactError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, ArtifactError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, ArtifactError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn entry(&mut self) -> Result<PoolEntry, ArtifactError> {
        let offset = self.pos;
        let tag = self.u8()?;
        Ok(match tag {
            TAG_UTF8 => {
                let length = usize::from(self.u16()?);
                let start = self.pos;
                let raw = self.take(length)?;
                let text = std::str::from_utf8(raw).map_err(|_| ArtifactError::InvalidUtf8 { offset: start })?;
                PoolEntry::Utf8(text.to_string())
            }
            TAG_INTEGER => PoolEntry::Integer(i32::from_be_bytes(self.array()?)),
            TAG_STRING => PoolEntry::String { utf8: self.u16()? },
            TAG_CLASS => PoolEntry::ClassRef { name: self.u16()? },
            TAG_FIELDREF => PoolEntry::FieldRef {
                class: self.u16()?,
                name_and_type: self.u16()?,
            },
            TAG_METHODREF => PoolEntry::MethodRef {
                class: self.u16()?,
                name_and_type: self.u16()?,
            },
            TAG_NAME_AND_TYPE => PoolEntry::NameAndType {
                name: self.u16()?,
                descriptor: self.u16()?,
            },
            tag => return Err(ArtifactError::UnknownTag { tag, offset }),
        })
    }
}

// =============================================================================
// Image -> module
// =============================================================================

impl TryFrom<ModuleImage> for CompiledModule {
    type Error = ArtifactError;

    /// Resolves names through the pool so the result compares equal to the
    /// module the artifact was written from.
    fn try_from(image: ModuleImage) -> Result<Self, Self::Error> {
        let pool = ConstantPool::from(image.pool);
        let utf8 = |index: u16| {
            pool.utf8_at(index)
                .map(str::to_string)
                .ok_or(ArtifactError::InvalidIndex { index })
        };

        let mut classes = Vec::with_capacity(image.classes.len());
        for class in image.classes {
            let name = pool
                .class_name(class.class_ref)
                .ok_or(ArtifactError::InvalidIndex { index: class.class_ref })?
                .to_string();

            let mut fields = Vec::with_capacity(class.fields.len());
            for (name_index, descriptor_index) in class.fields {
                fields.push(CompiledField {
                    name: utf8(name_index)?,
                    name_index,
                    descriptor_index,
                });
                utf8(descriptor_index)?;
            }

            let mut methods = Vec::with_capacity(class.methods.len());
            for method in class.methods {
                methods.push(CompiledMethod {
                    name: utf8(method.name)?,
                    descriptor: utf8(method.descriptor)?,
                    name_index: method.name,
                    descriptor_index: method.descriptor,
                    flags: method.flags,
                    max_stack: method.max_stack,
                    max_locals: method.max_locals,
                    code: method.code,
                });
            }

            classes.push(CompiledClass {
                name,
                class_ref: class.class_ref,
                fields,
                methods,
            });
        }

        if pool.class_name(image.this_class).is_none() {
            return Err(ArtifactError::InvalidIndex {
                index: image.this_class,
            });
        }

        Ok(CompiledModule {
            major_version: image.major_version,
            minor_version: image.minor_version,
            pool,
            this_class: image.this_class,
            classes,
        })
    }
}

/// Reads an artifact back into a module.
pub fn load_artifact(bytes: &[u8]) -> Result<CompiledModule, ArtifactError> {
    CompiledModule::try_from(read_artifact(bytes)?)
}
