//! Writes small synthetic blend files for tests.
//!
//! Layouts are computed here independently of the reader, so a mistake in one
//! side shows up as a test failure instead of cancelling out.

const POINTER: usize = 8;

const PRIMITIVES: &[(&str, usize)] = &[
    ("char", 1),
    ("uchar", 1),
    ("short", 2),
    ("int", 4),
    ("float", 4),
    ("void", 0),
];

type StructDef = (&'static str, &'static [(&'static str, &'static str)]);

const STRUCTS: &[StructDef] = &[
    ("ListBase", &[("void", "*first"), ("void", "*last")]),
    (
        "ID",
        &[
            ("void", "*next"),
            ("void", "*prev"),
            ("char", "name[66]"),
            ("char", "_pad0[6]"),
        ],
    ),
    (
        "ImageFormatData",
        &[
            ("char", "depth"),
            ("char", "planes"),
            ("uchar", "imtype"),
            ("char", "_pad[5]"),
        ],
    ),
    (
        "RenderData",
        &[
            ("int", "sfra"),
            ("int", "efra"),
            ("int", "frame_step"),
            ("short", "xsch"),
            ("short", "ysch"),
            ("float", "frs_sec_base"),
            ("ImageFormatData", "im_format"),
            ("char", "pic[1024]"),
            ("char", "engine[32]"),
        ],
    ),
    (
        "ViewLayer",
        &[
            ("ViewLayer", "*next"),
            ("ViewLayer", "*prev"),
            ("char", "name[64]"),
            ("short", "flag"),
            ("char", "_pad[6]"),
        ],
    ),
    (
        "Scene",
        &[
            ("ID", "id"),
            ("RenderData", "r"),
            ("ListBase", "view_layers"),
            ("char", "use_nodes"),
            ("char", "_pad1[7]"),
        ],
    ),
    (
        "wmWindow",
        &[
            ("wmWindow", "*next"),
            ("wmWindow", "*prev"),
            ("Scene", "*scene"),
        ],
    ),
    ("wmWindowManager", &[("ID", "id"), ("ListBase", "windows")]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    /// `BLENDER-v402` with 24 byte block headers.
    Legacy,
    /// `BLENDER17-01v0500` with 32 byte block headers.
    Large,
}

struct Record {
    code: [u8; 4],
    struct_name: &'static str,
    address: u64,
    data: Vec<u8>,
}

pub struct Fixture {
    structs: Vec<(&'static str, Vec<(&'static str, &'static str)>)>,
    records: Vec<Record>,
    pub version: u16,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            structs: STRUCTS
                .iter()
                .map(|(name, fields)| (*name, fields.to_vec()))
                .collect(),
            records: Vec::new(),
            version: 402,
        }
    }

    /// Remove a member from the DNA, as older or newer Blender releases would.
    /// Must be called before any record is added.
    pub fn drop_field(&mut self, struct_name: &str, field: &str) {
        assert!(self.records.is_empty());
        for (name, fields) in &mut self.structs {
            if *name == struct_name {
                fields.retain(|(_, f)| bare(f) != field);
            }
        }
    }

    fn struct_fields(&self, name: &str) -> Option<&[(&'static str, &'static str)]> {
        self.structs
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, f)| f.as_slice())
    }

    pub fn size_of(&self, type_name: &str) -> usize {
        if let Some((_, size)) = PRIMITIVES.iter().find(|(n, _)| *n == type_name) {
            return *size;
        }
        self.struct_fields(type_name)
            .unwrap_or_else(|| panic!("unknown type {type_name}"))
            .iter()
            .map(|(ty, name)| self.member_size(ty, name))
            .sum()
    }

    fn member_size(&self, ty: &str, name: &str) -> usize {
        let unit = if name.starts_with('*') || name.starts_with("(*") {
            POINTER
        } else {
            self.size_of(ty)
        };
        unit * array_len(name)
    }

    /// Offset of a top level member.
    pub fn offset_of(&self, struct_name: &str, field: &str) -> usize {
        self.locate(struct_name, field).0
    }

    /// Offset and size of a dotted member path.
    fn locate(&self, struct_name: &str, path: &str) -> (usize, usize) {
        let mut current = struct_name;
        let mut base = 0;
        let mut parts = path.split('.').peekable();
        while let Some(part) = parts.next() {
            let fields = self
                .struct_fields(current)
                .unwrap_or_else(|| panic!("{current} is not a struct"));
            let mut offset = 0;
            let mut found = None;
            for (ty, name) in fields {
                let size = self.member_size(ty, name);
                if bare(name) == part {
                    found = Some((*ty, offset, size));
                    break;
                }
                offset += size;
            }
            let (ty, offset, size) =
                found.unwrap_or_else(|| panic!("{current} has no member {part}"));
            base += offset;
            if parts.peek().is_none() {
                return (base, size);
            }
            current = ty;
        }
        unreachable!("empty member path")
    }

    fn add_record(&mut self, code: &str, struct_name: &'static str) -> usize {
        let mut code_bytes = [0u8; 4];
        code_bytes[..code.len()].copy_from_slice(code.as_bytes());
        let index = self.records.len();
        self.records.push(Record {
            code: code_bytes,
            struct_name,
            address: 0x1000 * (index as u64 + 1),
            data: vec![0; self.size_of(struct_name)],
        });
        index
    }

    fn has_member(&self, struct_name: &str, field: &str) -> bool {
        self.struct_fields(struct_name)
            .is_some_and(|fields| fields.iter().any(|(_, f)| bare(f) == field))
    }

    pub fn add_scene(&mut self, name: &str) -> usize {
        let scene = self.add_record("SC", "Scene");
        self.set_str(scene, "id.name", &format!("SC{name}"));
        if self.has_member("RenderData", "frs_sec_base") {
            self.set_f32(scene, "r.frs_sec_base", 1.0);
        }
        scene
    }

    /// Append a view layer to the scene's `view_layers` list.
    pub fn add_view_layer(&mut self, scene: usize, name: &str, flag: i16) -> usize {
        let layer = self.add_record("DATA", "ViewLayer");
        self.set_str(layer, "name", name);
        self.set_i16(layer, "flag", flag);

        let address = self.records[layer].address;
        let last = self.get_pointer(scene, "view_layers.last");
        match last.and_then(|a| self.records.iter().position(|r| r.address == a)) {
            Some(prev) => {
                self.set_pointer(prev, "next", address);
                self.set_pointer(layer, "prev", self.records[prev].address);
            }
            None => self.set_pointer(scene, "view_layers.first", address),
        }
        self.set_pointer(scene, "view_layers.last", address);
        layer
    }

    pub fn link_next(&mut self, from: usize, to: usize) {
        let address = self.records[to].address;
        self.set_pointer(from, "next", address);
    }

    /// Window manager with a single window showing `scene`.
    pub fn add_window_manager(&mut self, scene: Option<usize>) -> usize {
        let wm = self.add_record("WM", "wmWindowManager");
        self.set_str(wm, "id.name", "WMWinMan");
        let window = self.add_record("DATA", "wmWindow");
        if let Some(scene) = scene {
            let address = self.records[scene].address;
            self.set_pointer(window, "scene", address);
        }
        let address = self.records[window].address;
        self.set_pointer(wm, "windows.first", address);
        self.set_pointer(wm, "windows.last", address);
        wm
    }

    fn write(&mut self, record: usize, path: &str, bytes: &[u8]) {
        let (offset, size) = self.locate(self.records[record].struct_name, path);
        assert!(bytes.len() <= size, "{path} is only {size} bytes");
        self.records[record].data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn set_i32(&mut self, record: usize, path: &str, value: i32) {
        self.write(record, path, &value.to_le_bytes());
    }

    pub fn set_i16(&mut self, record: usize, path: &str, value: i16) {
        self.write(record, path, &value.to_le_bytes());
    }

    pub fn set_u8(&mut self, record: usize, path: &str, value: u8) {
        self.write(record, path, &[value]);
    }

    pub fn set_f32(&mut self, record: usize, path: &str, value: f32) {
        self.write(record, path, &value.to_le_bytes());
    }

    pub fn set_str(&mut self, record: usize, path: &str, value: &str) {
        let (offset, size) = self.locate(self.records[record].struct_name, path);
        let data = &mut self.records[record].data[offset..offset + size];
        data.fill(0);
        let len = value.len().min(size - 1);
        data[..len].copy_from_slice(&value.as_bytes()[..len]);
    }

    fn set_pointer(&mut self, record: usize, path: &str, address: u64) {
        self.write(record, path, &address.to_le_bytes());
    }

    fn get_pointer(&self, record: usize, path: &str) -> Option<u64> {
        let (offset, _) = self.locate(self.records[record].struct_name, path);
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.records[record].data[offset..offset + 8]);
        let address = u64::from_le_bytes(raw);
        (address != 0).then_some(address)
    }

    fn type_names(&self) -> Vec<&'static str> {
        PRIMITIVES
            .iter()
            .map(|(n, _)| *n)
            .chain(self.structs.iter().map(|(n, _)| *n))
            .collect()
    }

    fn struct_index(&self, name: &str) -> usize {
        self.structs
            .iter()
            .position(|(n, _)| *n == name)
            .unwrap_or_else(|| panic!("unknown struct {name}"))
    }

    /// Payload of the `DNA1` block, little endian.
    pub fn sdna_bytes(&self) -> Vec<u8> {
        let types = self.type_names();
        let mut names: Vec<&str> = Vec::new();
        for (_, fields) in &self.structs {
            for (_, name) in fields {
                if !names.contains(name) {
                    names.push(name);
                }
            }
        }

        let mut out = b"SDNANAME".to_vec();
        out.extend_from_slice(&(names.len() as u32).to_le_bytes());
        for name in &names {
            out.extend_from_slice(name.as_bytes());
            out.push(0);
        }
        pad4(&mut out);

        out.extend_from_slice(b"TYPE");
        out.extend_from_slice(&(types.len() as u32).to_le_bytes());
        for ty in &types {
            out.extend_from_slice(ty.as_bytes());
            out.push(0);
        }
        pad4(&mut out);

        out.extend_from_slice(b"TLEN");
        for ty in &types {
            out.extend_from_slice(&(self.size_of(ty) as u16).to_le_bytes());
        }
        pad4(&mut out);

        out.extend_from_slice(b"STRC");
        out.extend_from_slice(&(self.structs.len() as u32).to_le_bytes());
        let type_index = |ty: &str| types.iter().position(|t| *t == ty).unwrap() as u16;
        for (name, fields) in &self.structs {
            out.extend_from_slice(&type_index(name).to_le_bytes());
            out.extend_from_slice(&(fields.len() as u16).to_le_bytes());
            for (ty, field) in fields {
                let name_index = names.iter().position(|n| n == field).unwrap() as u16;
                out.extend_from_slice(&type_index(ty).to_le_bytes());
                out.extend_from_slice(&name_index.to_le_bytes());
            }
        }
        out
    }

    /// Serialise records, the DNA block and `ENDB` into an uncompressed blend file.
    pub fn to_bytes(&self, style: Style) -> Vec<u8> {
        let mut out = match style {
            Style::Legacy => format!("BLENDER-v{:03}", self.version).into_bytes(),
            Style::Large => b"BLENDER17-01v0500".to_vec(),
        };

        for record in &self.records {
            let sdna = self.struct_index(record.struct_name);
            write_block(&mut out, style, record.code, sdna, record.address, &record.data);
        }
        write_block(&mut out, style, *b"DNA1", 0, 0, &self.sdna_bytes());
        write_block(&mut out, style, *b"ENDB", 0, 0, &[]);
        out
    }
}

fn write_block(out: &mut Vec<u8>, style: Style, code: [u8; 4], sdna: usize, address: u64, data: &[u8]) {
    out.extend_from_slice(&code);
    match style {
        Style::Legacy => {
            out.extend_from_slice(&(data.len() as i32).to_le_bytes());
            out.extend_from_slice(&address.to_le_bytes());
            out.extend_from_slice(&(sdna as i32).to_le_bytes());
            out.extend_from_slice(&1i32.to_le_bytes());
        }
        Style::Large => {
            out.extend_from_slice(&(sdna as i32).to_le_bytes());
            out.extend_from_slice(&address.to_le_bytes());
            out.extend_from_slice(&(data.len() as i64).to_le_bytes());
            out.extend_from_slice(&1i64.to_le_bytes());
        }
    }
    out.extend_from_slice(data);
}

fn pad4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

fn bare(name: &str) -> &str {
    let name = name.trim_start_matches(['*', '(']);
    let end = name
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(name.len());
    &name[..end]
}

fn array_len(name: &str) -> usize {
    name.split('[')
        .skip(1)
        .map(|part| part.trim_end_matches(']').parse::<usize>().unwrap())
        .product()
}
