use super::{file::BlendFile, sdna::Field, sdna::Struct};
use std::collections::HashSet;

/// Typed window over one struct instance inside a block.
///
/// Every accessor takes a dotted path through embedded structs, e.g. `r.im_format.imtype`,
/// and returns `None` when any part of the path does not exist in this file's DNA.
#[derive(Clone, Copy)]
pub struct StructView<'a> {
    file: &'a BlendFile,
    layout: &'a Struct,
    data: &'a [u8],
}

impl<'a> StructView<'a> {
    pub(crate) fn new(file: &'a BlendFile, layout: &'a Struct, data: &'a [u8]) -> Self {
        Self { file, layout, data }
    }

    pub fn type_name(&self) -> Option<&'a str> {
        self.file.sdna().type_name(self.layout.type_index)
    }

    pub fn has_field(&self, path: &str) -> bool {
        self.locate(path).is_some()
    }

    fn locate(&self, path: &str) -> Option<(&'a Field, &'a [u8])> {
        let sdna = self.file.sdna();
        let mut layout = self.layout;
        let mut data = self.data;
        let mut parts = path.split('.').peekable();

        while let Some(part) = parts.next() {
            let field = layout.field(part)?;
            let bytes = data.get(field.offset..field.offset.checked_add(field.size)?)?;
            if parts.peek().is_none() {
                return Some((field, bytes));
            }
            if field.is_pointer {
                return None;
            }
            layout = sdna.struct_for_type(field.type_index)?;
            data = bytes;
        }
        None
    }

    /// Embedded (not pointed to) struct member.
    pub fn get_struct(&self, path: &str) -> Option<StructView<'a>> {
        let (field, bytes) = self.locate(path)?;
        if field.is_pointer {
            return None;
        }
        let layout = self.file.sdna().struct_for_type(field.type_index)?;
        Some(StructView::new(self.file, layout, bytes.get(..layout.size)?))
    }

    /// Integer member of any width, widened to `i64`. The first element is used for arrays.
    pub fn get_int(&self, path: &str) -> Option<i64> {
        let (field, bytes) = self.locate(path)?;
        if field.is_pointer {
            return None;
        }
        let endian = self.file.header.endian;
        let value = match self.file.sdna().type_name(field.type_index)? {
            "char" | "uchar" | "uint8_t" | "bool" => i64::from(*bytes.first()?),
            "int8_t" => i64::from(*bytes.first()? as i8),
            "short" | "int16_t" => i64::from(endian.read_i16(bytes.get(..2)?)),
            "ushort" | "uint16_t" => i64::from(endian.read_u16(bytes.get(..2)?)),
            "int" | "int32_t" => i64::from(endian.read_i32(bytes.get(..4)?)),
            "uint" | "uint32_t" => i64::from(endian.read_u32(bytes.get(..4)?)),
            "int64_t" => endian.read_i64(bytes.get(..8)?),
            "uint64_t" => i64::try_from(endian.read_u64(bytes.get(..8)?)).ok()?,
            _ => return None,
        };
        Some(value)
    }

    pub fn get_i32(&self, path: &str) -> Option<i32> {
        self.get_int(path).and_then(|v| i32::try_from(v).ok())
    }

    pub fn get_i16(&self, path: &str) -> Option<i16> {
        self.get_int(path).and_then(|v| i16::try_from(v).ok())
    }

    pub fn get_u8(&self, path: &str) -> Option<u8> {
        self.get_int(path).and_then(|v| u8::try_from(v).ok())
    }

    pub fn get_f32(&self, path: &str) -> Option<f32> {
        let (field, bytes) = self.locate(path)?;
        if field.is_pointer || self.file.sdna().type_name(field.type_index)? != "float" {
            return None;
        }
        Some(self.file.header.endian.read_f32(bytes.get(..4)?))
    }

    /// `char[]` member read up to the first NUL.
    pub fn get_string(&self, path: &str) -> Option<String> {
        let (field, bytes) = self.locate(path)?;
        if field.is_pointer {
            return None;
        }
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Some(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    /// Raw old-memory address stored in a pointer member. Null yields `None`.
    pub fn get_pointer(&self, path: &str) -> Option<u64> {
        let (field, bytes) = self.locate(path)?;
        if !field.is_pointer {
            return None;
        }
        let endian = self.file.header.endian;
        let address = match self.file.header.pointer_size {
            8 => endian.read_u64(bytes.get(..8)?),
            _ => u64::from(endian.read_u32(bytes.get(..4)?)),
        };
        (address != 0).then_some(address)
    }

    /// Follow a pointer member to the struct it refers to.
    pub fn deref(&self, path: &str) -> Option<StructView<'a>> {
        self.file.resolve(self.get_pointer(path)?)
    }

    /// Iterate a `ListBase` member, following `next` from `first`.
    pub fn list(&self, path: &str) -> ListIter<'a> {
        let first = self
            .get_struct(path)
            .and_then(|list| list.get_pointer("first"));
        ListIter {
            file: self.file,
            next: first,
            seen: HashSet::new(),
        }
    }
}

impl std::fmt::Debug for StructView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructView")
            .field("type", &self.type_name())
            .field("size", &self.data.len())
            .finish()
    }
}

/// Links of a `ListBase`. Stops on a null link, an unresolvable address or a cycle.
pub struct ListIter<'a> {
    file: &'a BlendFile,
    next: Option<u64>,
    seen: HashSet<u64>,
}

impl<'a> Iterator for ListIter<'a> {
    type Item = StructView<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let address = self.next.take()?;
        if !self.seen.insert(address) {
            return None;
        }
        let item = self.file.resolve(address)?;
        self.next = item.get_pointer("next");
        Some(item)
    }
}
