//! Minimal class-file indexing.
//!
//! Only the header is decoded: enough to tell listeners which type changed,
//! what it extends and which interfaces it implements.

use thiserror::Error;

const MAGIC: u32 = 0xCAFE_BABE;

/// Metadata extracted from a class file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    /// Binary name with `.` separators.
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub access_flags: u16,
    pub major_version: u16,
    pub minor_version: u16,
}

impl ClassInfo {
    pub fn is_interface(&self) -> bool {
        self.access_flags & 0x0200 != 0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassFormatError {
    #[error("Class data truncated at offset {0}")]
    Truncated(usize),
    #[error("Bad magic number {0:#010x}")]
    BadMagic(u32),
    #[error("Unknown constant pool tag {tag} at index {index}")]
    UnknownTag { tag: u8, index: u16 },
    #[error("Constant pool index {0} does not name a class")]
    NotAClass(u16),
    #[error("Constant pool index {0} is not valid UTF-8 text")]
    BadUtf8(u16),
    #[error("Long or double constant at index {0} has no room for its second slot")]
    WideConstantOverflow(u16),
}

#[derive(Debug, Clone)]
enum Constant {
    Utf8(String),
    Class(u16),
    Other,
    /// Second slot of a long/double entry.
    Unusable,
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ClassFormatError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(ClassFormatError::Truncated(self.offset))?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ClassFormatError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ClassFormatError> {
        let raw = self.take(2)?;
        Ok(u16::from_be_bytes([raw[0], raw[1]]))
    }

    fn u32(&mut self) -> Result<u32, ClassFormatError> {
        let raw = self.take(4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }
}

/// Decode the header of a class file.
pub fn index_class(bytes: &[u8]) -> Result<ClassInfo, ClassFormatError> {
    let mut reader = Reader::new(bytes);
    let magic = reader.u32()?;
    if magic != MAGIC {
        return Err(ClassFormatError::BadMagic(magic));
    }
    let minor_version = reader.u16()?;
    let major_version = reader.u16()?;
    let pool = read_constant_pool(&mut reader)?;
    let access_flags = reader.u16()?;
    let this_class = reader.u16()?;
    let super_class = reader.u16()?;
    let interface_count = reader.u16()?;
    let mut interfaces = Vec::with_capacity(interface_count as usize);
    for _ in 0..interface_count {
        let index = reader.u16()?;
        interfaces.push(class_name(&pool, index)?);
    }
    let super_name = if super_class == 0 {
        None
    } else {
        Some(class_name(&pool, super_class)?)
    };
    Ok(ClassInfo {
        name: class_name(&pool, this_class)?,
        super_name,
        interfaces,
        access_flags,
        major_version,
        minor_version,
    })
}

fn read_constant_pool(reader: &mut Reader<'_>) -> Result<Vec<Constant>, ClassFormatError> {
    let count = reader.u16()?;
    let mut pool = Vec::with_capacity(count as usize);
    pool.push(Constant::Unusable);
    // Widened so a long/double taking two slots cannot overflow the counter.
    let mut index: u32 = 1;
    while index < u32::from(count) {
        // `index < count <= u16::MAX` here.
        let slot = index as u16;
        let tag = reader.u8()?;
        let constant = match tag {
            1 => {
                let len = reader.u16()? as usize;
                let raw = reader.take(len)?;
                // Modified UTF-8 only differs from UTF-8 for NUL and supplementary
                // characters, neither of which occur in class names.
                let text =
                    std::str::from_utf8(raw).map_err(|_| ClassFormatError::BadUtf8(slot))?;
                Constant::Utf8(text.to_string())
            }
            7 => Constant::Class(reader.u16()?),
            8 | 16 | 19 | 20 => {
                reader.take(2)?;
                Constant::Other
            }
            15 => {
                reader.take(3)?;
                Constant::Other
            }
            3 | 4 | 9 | 10 | 11 | 12 | 17 | 18 => {
                reader.take(4)?;
                Constant::Other
            }
            5 | 6 => {
                if index + 1 >= u32::from(count) {
                    return Err(ClassFormatError::WideConstantOverflow(slot));
                }
                reader.take(8)?;
                pool.push(Constant::Other);
                index += 1;
                Constant::Unusable
            }
            tag => return Err(ClassFormatError::UnknownTag { tag, index: slot }),
        };
        pool.push(constant);
        index += 1;
    }
    Ok(pool)
}

fn class_name(pool: &[Constant], index: u16) -> Result<String, ClassFormatError> {
    let Some(Constant::Class(name_index)) = pool.get(index as usize) else {
        return Err(ClassFormatError::NotAClass(index));
    };
    match pool.get(*name_index as usize) {
        Some(Constant::Utf8(name)) => Ok(name.replace('/', ".")),
        _ => Err(ClassFormatError::NotAClass(index)),
    }
}

/// Assemble a minimal, structurally valid class file for tests.
#[cfg(test)]
pub(crate) fn synthetic_class(name: &str, super_name: &str, interfaces: &[&str]) -> Vec<u8> {
    fn utf8(out: &mut Vec<u8>, text: &str) {
        out.push(1);
        out.extend_from_slice(&(text.len() as u16).to_be_bytes());
        out.extend_from_slice(text.as_bytes());
    }
    let mut pool = Vec::new();
    let mut entries: u16 = 1;
    let mut class_entry = |pool: &mut Vec<u8>, text: &str| -> u16 {
        utf8(pool, text);
        pool.push(7);
        pool.extend_from_slice(&entries.to_be_bytes());
        let class_index = entries + 1;
        entries += 2;
        class_index
    };
    let this_index = class_entry(&mut pool, &name.replace('.', "/"));
    let super_index = class_entry(&mut pool, &super_name.replace('.', "/"));
    let interface_indices: Vec<u16> = interfaces
        .iter()
        .map(|iface| class_entry(&mut pool, &iface.replace('.', "/")))
        .collect();

    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&61u16.to_be_bytes());
    out.extend_from_slice(&entries.to_be_bytes());
    out.extend_from_slice(&pool);
    out.extend_from_slice(&0x0021u16.to_be_bytes());
    out.extend_from_slice(&this_index.to_be_bytes());
    out.extend_from_slice(&super_index.to_be_bytes());
    out.extend_from_slice(&(interface_indices.len() as u16).to_be_bytes());
    for index in interface_indices {
        out.extend_from_slice(&index.to_be_bytes());
    }
    out.extend_from_slice(&[0; 6]);
    out
}
