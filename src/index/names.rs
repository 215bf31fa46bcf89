//! Deterministic names of engine indexes, fields and mapping files.
//!
//! Same inputs, same names, across runs: this is what makes the
//! delete-then-create of fields at the start of every save safe.

use sha1::{Digest, Sha1};

pub const INDEX_NAME_PREFIX: &str = "idx";
pub const FIELD_NAME_PREFIX: &str = "fld";
pub const MAPPING_FILE_PREFIX: &str = "map";
pub const MAPPING_FILE_EXTENSION: &str = ".db";

/// Each part is length-prefixed so that no two splits of the same bytes
/// hash alike
fn sha1_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    format!("{:x}", hasher.finalize())
}

/// Engine index shared by every index of a table
pub fn index_name(db: &str, table: &str) -> String {
    format!(
        "{}-{}",
        INDEX_NAME_PREFIX,
        sha1_hex(&[db.as_bytes(), table.as_bytes()])
    )
}

/// Field of one expression of one index in one partition
pub fn field_name(id: &str, expression: &str, partition_key: &[u8]) -> String {
    format!(
        "{}-{}",
        FIELD_NAME_PREFIX,
        sha1_hex(&[id.as_bytes(), expression.as_bytes(), partition_key])
    )
}

/// Key of a partition in the driver config and the mapping table
pub fn mapping_key(partition_key: &[u8]) -> String {
    partition_key.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn mapping_file_name(mapping_key: &str) -> String {
    format!(
        "{}-{}{}",
        MAPPING_FILE_PREFIX,
        sha1_hex(&[mapping_key.as_bytes()]),
        MAPPING_FILE_EXTENSION
    )
}

pub fn is_mapping_file_name(name: &str) -> bool {
    name.starts_with(MAPPING_FILE_PREFIX) && name.ends_with(MAPPING_FILE_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_deterministic() {
        assert_eq!(index_name("db", "t"), index_name("db", "t"));
        assert_ne!(index_name("db", "t"), index_name("db", "u"));
        assert_eq!(field_name("i", "e", b"p"), field_name("i", "e", b"p"));
        assert_ne!(field_name("i", "e", b"p"), field_name("i", "e", b"q"));
    }

    #[test]
    fn test_part_boundaries_matter() {
        assert_ne!(index_name("ab", "c"), index_name("a", "bc"));
        assert_ne!(index_name("", "ab"), index_name("ab", ""));
        assert_ne!(field_name("ab", "c", b"p"), field_name("a", "bc", b"p"));
        assert_ne!(field_name("i", "ep", b""), field_name("i", "e", b"p"));
    }

    #[test]
    fn test_name_shapes() {
        let index = index_name("", "");
        assert!(index.starts_with("idx-"));
        assert_eq!(index.len(), "idx-".len() + 40);
        assert!(field_name("i", "e", b"p").starts_with("fld-"));
        assert_eq!(mapping_key(&[0x01, 0xab]), "01ab");

        let file = mapping_file_name("01ab");
        assert!(is_mapping_file_name(&file));
        assert!(!is_mapping_file_name("config.yml"));
    }
}
