use super::{header::Endian, BlendError};
use std::collections::HashMap;

/// One member of a DNA struct, with its layout already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub type_index: usize,
    /// Name as stored in the file, e.g. `*next`, `name[64]` or `(*poll)()`.
    pub name: String,
    /// Name without pointer or array decoration.
    pub bare: String,
    pub is_pointer: bool,
    pub array_len: usize,
    pub offset: usize,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Struct {
    pub type_index: usize,
    pub size: usize,
    pub fields: Vec<Field>,
}

impl Struct {
    pub fn field(&self, bare: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.bare == bare)
    }
}

/// Struct DNA: the schema stored in the `DNA1` block that describes every struct
/// written to the file. Layouts change between Blender releases, so all reads
/// go through this instead of fixed offsets.
#[derive(Debug, Clone, Default)]
pub struct Sdna {
    pub types: Vec<String>,
    pub type_lengths: Vec<usize>,
    pub structs: Vec<Struct>,
    struct_of_type: HashMap<usize, usize>,
}

impl Sdna {
    pub fn parse(data: &[u8], endian: Endian, pointer_size: usize) -> Result<Self, BlendError> {
        let mut cur = Cursor {
            data,
            pos: 0,
            endian,
        };

        cur.tag(b"SDNA")?;
        cur.tag(b"NAME")?;
        let names = cur.strings()?;
        cur.align4();

        cur.tag(b"TYPE")?;
        let types = cur.strings()?;
        cur.align4();

        cur.tag(b"TLEN")?;
        let type_lengths = (0..types.len())
            .map(|_| cur.u16("type length").map(usize::from))
            .collect::<Result<Vec<_>, _>>()?;
        cur.align4();

        cur.tag(b"STRC")?;
        let count = cur.count()?;
        let mut structs = Vec::with_capacity(count);
        let mut struct_of_type = HashMap::with_capacity(count);

        for index in 0..count {
            let type_index = usize::from(cur.u16("struct type")?);
            let field_count = usize::from(cur.u16("field count")?);
            let size = *type_lengths.get(type_index).ok_or_else(|| {
                BlendError::Corrupt(format!("struct type index {type_index} out of range"))
            })?;

            let mut offset = 0;
            let mut fields = Vec::with_capacity(field_count);
            for _ in 0..field_count {
                let field_type = usize::from(cur.u16("field type")?);
                let name_index = usize::from(cur.u16("field name")?);
                let name = names.get(name_index).ok_or_else(|| {
                    BlendError::Corrupt(format!("field name index {name_index} out of range"))
                })?;
                let type_len = *type_lengths.get(field_type).ok_or_else(|| {
                    BlendError::Corrupt(format!("field type index {field_type} out of range"))
                })?;

                let decl = Declarator::parse(name)?;
                let unit = if decl.is_pointer { pointer_size } else { type_len };
                let field_size = unit
                    .checked_mul(decl.array_len)
                    .ok_or_else(|| BlendError::Corrupt(format!("member {name} is too large")))?;

                fields.push(Field {
                    type_index: field_type,
                    name: name.clone(),
                    bare: decl.bare,
                    is_pointer: decl.is_pointer,
                    array_len: decl.array_len,
                    offset,
                    size: field_size,
                });
                // DNA structs carry explicit padding members, so members are packed.
                offset = offset
                    .checked_add(field_size)
                    .ok_or_else(|| BlendError::Corrupt(format!("struct {type_index} is too large")))?;
            }

            struct_of_type.insert(type_index, index);
            structs.push(Struct {
                type_index,
                size,
                fields,
            });
        }

        Ok(Self {
            types,
            type_lengths,
            structs,
            struct_of_type,
        })
    }

    pub fn type_name(&self, type_index: usize) -> Option<&str> {
        self.types.get(type_index).map(String::as_str)
    }

    /// Struct layout by index into the struct table, as referenced by block headers.
    pub fn struct_at(&self, index: usize) -> Option<&Struct> {
        self.structs.get(index)
    }

    pub fn struct_for_type(&self, type_index: usize) -> Option<&Struct> {
        self.struct_of_type
            .get(&type_index)
            .and_then(|&index| self.structs.get(index))
    }

    pub fn struct_named(&self, name: &str) -> Option<&Struct> {
        let type_index = self.types.iter().position(|t| t == name)?;
        self.struct_for_type(type_index)
    }
}

/// Decoded form of a DNA member name.
#[derive(Debug, PartialEq, Eq)]
struct Declarator {
    bare: String,
    is_pointer: bool,
    array_len: usize,
}

impl Declarator {
    fn parse(name: &str) -> Result<Self, BlendError> {
        let is_pointer = name.starts_with('*') || name.starts_with("(*");
        let bare = name
            .trim_start_matches(['*', '('])
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        let array_len = name
            .split('[')
            .skip(1)
            .filter_map(|part| part.split(']').next()?.trim().parse::<usize>().ok())
            .try_fold(1usize, usize::checked_mul)
            .ok_or_else(|| BlendError::Corrupt(format!("array size of {name} overflows")))?;

        Ok(Self {
            bare,
            is_pointer,
            array_len,
        })
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    endian: Endian,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], BlendError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or(BlendError::Truncated(what))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn tag(&mut self, tag: &[u8; 4]) -> Result<(), BlendError> {
        let found = self.take(4, "SDNA section tag")?;
        if found != tag {
            return Err(BlendError::Corrupt(format!(
                "expected {} in SDNA, found {}",
                String::from_utf8_lossy(tag),
                String::from_utf8_lossy(found)
            )));
        }
        Ok(())
    }

    fn u16(&mut self, what: &'static str) -> Result<u16, BlendError> {
        Ok(self.endian.read_u16(self.take(2, what)?))
    }

    fn count(&mut self) -> Result<usize, BlendError> {
        let count = self.endian.read_u32(self.take(4, "SDNA count")?) as usize;
        // every entry takes at least one byte, anything larger is garbage
        if count > self.data.len() {
            return Err(BlendError::Corrupt(format!("SDNA count {count} too large")));
        }
        Ok(count)
    }

    fn cstr(&mut self) -> Result<String, BlendError> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(BlendError::Truncated("SDNA string"))?;
        let s = String::from_utf8_lossy(&rest[..len]).into_owned();
        self.pos += len + 1;
        Ok(s)
    }

    fn strings(&mut self) -> Result<Vec<String>, BlendError> {
        let count = self.count()?;
        (0..count).map(|_| self.cstr()).collect()
    }

    fn align4(&mut self) {
        self.pos = (self.pos + 3) & !3;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blend::fixture::Fixture;

    #[test]
    fn declarator_strips_decoration() {
        let plain = Declarator::parse("sfra").unwrap();
        assert_eq!(plain.bare, "sfra");
        assert!(!plain.is_pointer);
        assert_eq!(plain.array_len, 1);

        let pointer = Declarator::parse("*next").unwrap();
        assert_eq!(pointer.bare, "next");
        assert!(pointer.is_pointer);

        let array = Declarator::parse("mat[4][4]").unwrap();
        assert_eq!(array.bare, "mat");
        assert_eq!(array.array_len, 16);

        let function = Declarator::parse("(*poll)()").unwrap();
        assert_eq!(function.bare, "poll");
        assert!(function.is_pointer);
        assert_eq!(function.array_len, 1);
    }

    #[test]
    fn oversized_arrays_are_corrupt() {
        let result = Declarator::parse(&format!("a[{}][2]", usize::MAX));
        assert!(matches!(result, Err(BlendError::Corrupt(_))));
    }

    #[test]
    fn oversized_members_are_corrupt() {
        let name = format!("a[{}]", usize::MAX);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"SDNANAME");
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(name.as_bytes());
        bytes.push(0);
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
        bytes.extend_from_slice(b"TYPE");
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(b"int\0");
        bytes.extend_from_slice(b"TLEN");
        bytes.extend_from_slice(&4u16.to_le_bytes());
        bytes.extend_from_slice(&[0, 0]);
        bytes.extend_from_slice(b"STRC");
        bytes.extend_from_slice(&1u32.to_le_bytes());
        for value in [0u16, 1, 0, 0] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }

        let result = Sdna::parse(&bytes, Endian::Little, 8);
        assert!(matches!(result, Err(BlendError::Corrupt(_))));
    }

    #[test]
    fn offsets_follow_member_sizes() {
        let fixture = Fixture::new();
        let bytes = fixture.sdna_bytes();
        let sdna = Sdna::parse(&bytes, Endian::Little, 8).unwrap();

        let id = sdna.struct_named("ID").unwrap();
        assert_eq!(id.field("next").unwrap().offset, 0);
        assert_eq!(id.field("prev").unwrap().offset, 8);
        assert_eq!(id.field("name").unwrap().offset, 16);
        assert_eq!(id.field("name").unwrap().size, 66);

        let scene = sdna.struct_named("Scene").unwrap();
        let render = scene.field("r").unwrap();
        assert_eq!(render.offset, fixture.offset_of("Scene", "r"));
        assert_eq!(scene.size, fixture.size_of("Scene"));
        assert_eq!(
            scene.field("view_layers").unwrap().offset,
            fixture.offset_of("Scene", "view_layers")
        );
    }

    #[test]
    fn truncated_dna_is_an_error() {
        let fixture = Fixture::new();
        let bytes = fixture.sdna_bytes();
        let result = Sdna::parse(&bytes[..bytes.len() / 2], Endian::Little, 8);
        assert!(matches!(
            result,
            Err(BlendError::Truncated(_)) | Err(BlendError::Corrupt(_))
        ));
    }
}
