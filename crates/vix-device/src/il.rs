use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::{DeviceError, DeviceResult};

pub const SPIRV_MAGIC: u32 = 0x0723_0203;

const HEADER_WORDS: usize = 5;

/// Checks the SPIR-V header and returns the module version `(major, minor)`.
///
/// Either byte order is accepted; the magic word decides which one applies.
pub fn validate_spirv_header(name: &str, bytes: &[u8]) -> DeviceResult<(u8, u8)> {
    let invalid = |reason| DeviceError::InvalidModule {
        name: name.to_string(),
        reason,
    };
    if bytes.len() < HEADER_WORDS * 4 {
        return Err(invalid("shorter than the five-word header"));
    }
    if bytes.len() % 4 != 0 {
        return Err(invalid("length is not a whole number of words"));
    }

    let head = [bytes[0], bytes[1], bytes[2], bytes[3]];
    let read_word: fn([u8; 4]) -> u32 = if u32::from_le_bytes(head) == SPIRV_MAGIC {
        u32::from_le_bytes
    } else if u32::from_be_bytes(head) == SPIRV_MAGIC {
        u32::from_be_bytes
    } else {
        return Err(invalid("magic number mismatch"));
    };

    let version = read_word([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let major = ((version >> 16) & 0xFF) as u8;
    let minor = ((version >> 8) & 0xFF) as u8;
    if major != 1 {
        return Err(invalid("unsupported major version"));
    }
    Ok((major, minor))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IlModule {
    pub name: String,
    pub path: PathBuf,
    pub version: (u8, u8),
    pub bytes: Vec<u8>,
}

impl IlModule {
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.bytes.len() / 4
    }
}

/// Directory of pre-compiled modules named `<kernel>.spv32` / `<kernel>.spv64`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IlModuleStore {
    root: PathBuf,
}

impl IlModuleStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn module_path(&self, name: &str, address_bits: u32) -> PathBuf {
        self.root.join(format!("{name}.spv{address_bits}"))
    }

    pub fn load(&self, name: &str, address_bits: u32) -> DeviceResult<IlModule> {
        let path = self.module_path(name, address_bits);
        let bytes = fs::read(&path).map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                DeviceError::ProgramNotFound {
                    name: name.to_string(),
                    path: path.clone(),
                }
            } else {
                DeviceError::ModuleIo {
                    path: path.clone(),
                    message: err.to_string(),
                }
            }
        })?;
        let version = validate_spirv_header(name, &bytes)?;
        Ok(IlModule {
            name: name.to_string(),
            path,
            version,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{IlModuleStore, SPIRV_MAGIC, validate_spirv_header};
    use crate::DeviceError;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn header(version: u32, little_endian: bool) -> Vec<u8> {
        let words = [SPIRV_MAGIC, version, 0, 16, 0];
        words
            .iter()
            .flat_map(|word| {
                if little_endian {
                    word.to_le_bytes()
                } else {
                    word.to_be_bytes()
                }
            })
            .collect()
    }

    #[test]
    fn accepts_both_byte_orders() {
        assert_eq!(
            validate_spirv_header("m", &header(0x0001_0000, true)),
            Ok((1, 0))
        );
        assert_eq!(
            validate_spirv_header("m", &header(0x0001_0300, false)),
            Ok((1, 3))
        );
    }

    #[test]
    fn rejects_malformed_headers() {
        let short = validate_spirv_header("m", &[0u8; 12]).expect_err("short");
        assert_eq!(short.reason_code(), "device_module_invalid");

        let mut bad_magic = header(0x0001_0000, true);
        bad_magic[0] ^= 0xFF;
        assert!(matches!(
            validate_spirv_header("m", &bad_magic),
            Err(DeviceError::InvalidModule {
                reason: "magic number mismatch",
                ..
            })
        ));

        let mut ragged = header(0x0001_0000, true);
        ragged.push(0);
        assert!(validate_spirv_header("m", &ragged).is_err());

        assert!(validate_spirv_header("m", &header(0x0002_0000, true)).is_err());
    }

    #[test]
    fn store_resolves_modules_by_address_width() {
        let ts_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |duration| duration.as_nanos());
        let root = std::env::temp_dir().join(format!(
            "vix_il_store_{}_{}",
            std::process::id(),
            ts_nanos
        ));
        fs::create_dir_all(&root).expect("temp dir");
        let store = IlModuleStore::new(&root);
        fs::write(
            store.module_path("vector_int4_insert", 64),
            header(0x0001_0000, true),
        )
        .expect("write module");

        let module = store.load("vector_int4_insert", 64).expect("module loads");
        assert_eq!(module.word_count(), 5);
        assert_eq!(module.version, (1, 0));

        let missing = store
            .load("vector_int4_insert", 32)
            .expect_err("no spv32 module");
        assert_eq!(missing.reason_code(), "device_program_not_found");

        let _ = fs::remove_dir_all(root);
    }
}
