use super::{header::Header, sdna::Sdna, view::StructView, BlendError};
use flate2::read::MultiGzDecoder;
use std::{collections::HashMap, fmt, io::Read, path::Path};

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];

/// Header of one file block. The payload lives at `offset..offset + len` in [BlendFile::data].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub code: [u8; 4],
    pub sdna_index: usize,
    /// Memory address the block had when the file was saved. Pointers in other blocks refer to it.
    pub old_address: u64,
    pub len: usize,
    pub count: usize,
    pub offset: usize,
}

impl BlockHeader {
    /// Match a block code, e.g. `SC` for scenes or `DNA1`. Shorter codes are NUL padded.
    pub fn has_code(&self, code: &str) -> bool {
        let code = code.as_bytes();
        code.len() <= 4
            && self.code[..code.len()] == *code
            && self.code[code.len()..].iter().all(|&b| b == 0)
    }

    pub fn code_str(&self) -> String {
        String::from_utf8_lossy(&self.code)
            .trim_end_matches('\0')
            .to_owned()
    }
}

/// A fully loaded and indexed blend file.
pub struct BlendFile {
    pub header: Header,
    data: Vec<u8>,
    blocks: Vec<BlockHeader>,
    sdna: Sdna,
    by_address: HashMap<u64, usize>,
}

impl BlendFile {
    /// Read a blend file from disk. Gzip and zstd compressed saves are handled transparently.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BlendError> {
        let raw = std::fs::read(path.as_ref())?;
        Self::from_bytes(raw)
    }

    pub fn from_bytes(raw: Vec<u8>) -> Result<Self, BlendError> {
        let data = decompress(raw)?;
        let header = Header::parse(&data)?;
        let blocks = read_blocks(&data, &header)?;

        let dna = blocks
            .iter()
            .find(|b| b.has_code("DNA1"))
            .ok_or(BlendError::MissingSdna)?;
        let sdna = Sdna::parse(
            &data[dna.offset..dna.offset + dna.len],
            header.endian,
            header.pointer_size,
        )?;

        let by_address = blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.old_address != 0)
            .map(|(i, b)| (b.old_address, i))
            .collect();

        Ok(Self {
            header,
            data,
            blocks,
            sdna,
            by_address,
        })
    }

    pub fn sdna(&self) -> &Sdna {
        &self.sdna
    }

    pub fn blocks(&self) -> &[BlockHeader] {
        &self.blocks
    }

    pub fn block_data(&self, block: &BlockHeader) -> &[u8] {
        &self.data[block.offset..block.offset + block.len]
    }

    /// Views of the first struct in each block carrying `code`.
    pub fn blocks_with_code<'a>(&'a self, code: &'a str) -> impl Iterator<Item = StructView<'a>> {
        self.blocks
            .iter()
            .filter(move |b| b.has_code(code))
            .filter_map(move |b| self.view(b, 0))
    }

    /// Find the struct an old memory address points at. Null yields `None`.
    pub fn resolve(&self, address: u64) -> Option<StructView<'_>> {
        if address == 0 {
            return None;
        }
        if let Some(&index) = self.by_address.get(&address) {
            return self.view(&self.blocks[index], 0);
        }
        // pointer into the middle of an array block
        self.blocks.iter().find_map(|b| {
            let end = b.old_address.checked_add(b.len as u64)?;
            if b.old_address == 0 || address <= b.old_address || address >= end {
                return None;
            }
            self.view(b, (address - b.old_address) as usize)
        })
    }

    fn view(&self, block: &BlockHeader, at: usize) -> Option<StructView<'_>> {
        let layout = self.sdna.struct_at(block.sdna_index)?;
        let data = self.block_data(block);
        let end = at.checked_add(layout.size)?;
        if end > data.len() {
            return None;
        }
        Some(StructView::new(self, layout, &data[at..end]))
    }
}

impl fmt::Debug for BlendFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlendFile")
            .field("header", &self.header)
            .field("blocks", &self.blocks.len())
            .field("structs", &self.sdna.structs.len())
            .finish()
    }
}

fn decompress(raw: Vec<u8>) -> Result<Vec<u8>, BlendError> {
    if raw.starts_with(GZIP_MAGIC) {
        let mut out = Vec::with_capacity(raw.len() * 4);
        MultiGzDecoder::new(raw.as_slice()).read_to_end(&mut out)?;
        Ok(out)
    } else if raw.starts_with(ZSTD_MAGIC) {
        // seekable zstd keeps its seek table in a skippable frame, which the decoder passes over
        Ok(zstd::stream::decode_all(raw.as_slice())?)
    } else {
        Ok(raw)
    }
}

fn read_blocks(data: &[u8], header: &Header) -> Result<Vec<BlockHeader>, BlendError> {
    let endian = header.endian;
    let head_size = header.block_header_size();
    let mut pos = header.size;
    let mut blocks = Vec::new();

    loop {
        let head = data
            .get(pos..pos + head_size)
            .ok_or(BlendError::Truncated("block header"))?;
        let mut code = [0u8; 4];
        code.copy_from_slice(&head[..4]);

        let (len, old_address, sdna_index, count) = if header.large_blocks {
            (
                endian.read_i64(&head[16..24]),
                endian.read_u64(&head[8..16]),
                i64::from(endian.read_i32(&head[4..8])),
                endian.read_i64(&head[24..32]),
            )
        } else {
            let old_address = if header.pointer_size == 8 {
                endian.read_u64(&head[8..16])
            } else {
                u64::from(endian.read_u32(&head[8..12]))
            };
            let rest = 8 + header.pointer_size;
            (
                i64::from(endian.read_i32(&head[4..8])),
                old_address,
                i64::from(endian.read_i32(&head[rest..rest + 4])),
                i64::from(endian.read_i32(&head[rest + 4..rest + 8])),
            )
        };

        if &code == b"ENDB" {
            break;
        }

        let len = usize::try_from(len).map_err(|_| {
            BlendError::Corrupt(format!(
                "block {} has negative length",
                String::from_utf8_lossy(&code)
            ))
        })?;
        let offset = pos + head_size;
        if offset + len > data.len() {
            return Err(BlendError::Truncated("block data"));
        }

        blocks.push(BlockHeader {
            code,
            sdna_index: usize::try_from(sdna_index).unwrap_or(usize::MAX),
            old_address,
            len,
            count: usize::try_from(count).unwrap_or(0),
            offset,
        });
        pos = offset + len;
    }

    Ok(blocks)
}
