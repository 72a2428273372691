//! PIT (Partition Information Table) binary codec.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{Error, Result};

/// Magic number at the start of every PIT blob.
pub const PIT_MAGIC: u32 = 0x1234_9876;

/// Size in bytes of a single partition entry.
pub const PIT_ENTRY_SIZE: usize = 132;

/// Size in bytes of the PIT header (magic + entry_count + unknown + project
/// + reserved).
pub const PIT_HEADER_SIZE: usize = 4 + 4 + 8 + 8 + 4;

/// Size of a single PIT download block.
pub const PIT_BLOCK_SIZE: usize = 500;

/// A single partition entry from the PIT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEntry {
    /// 0 = AP/regular, 1 = modem. Selects the flash finalization
    /// sub-protocol.
    pub binary_type: i32,
    /// Target device type.
    pub device_type: i32,
    /// Partition identifier.
    pub partition_id: i32,
    /// Partition attribute flags.
    pub attributes: i32,
    /// Update attribute flags.
    pub update_attributes: i32,
    /// Block size in bytes.
    pub block_size: i32,
    /// Block count.
    pub block_count: i32,
    /// Offset of this partition's image within its source file.
    pub file_offset: i32,
    /// Size of this partition's image.
    pub file_size: i32,
    /// Partition name, trimmed of trailing NULs/spaces.
    pub partition: String,
    /// Associated file name, trimmed.
    pub file_name: String,
    /// Delta file name, trimmed.
    pub delta_name: String,
}

/// The header preceding PIT entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PitHeader {
    /// Number of entries that follow.
    pub entry_count: u32,
    /// 8 bytes of unspecified text.
    pub unknown: String,
    /// 8 bytes naming the project.
    pub project: String,
    /// Reserved signed field.
    pub reserved: i32,
}

/// A fully parsed PIT: header plus partitions keyed by trimmed name.
///
/// Duplicate partition names overwrite earlier entries, matching the
/// original device firmware's behavior.
#[derive(Debug, Clone, Default)]
pub struct Pit {
    /// The decoded header, if the PIT has been parsed.
    pub header: Option<PitHeader>,
    /// Partitions keyed by trimmed name.
    pub partitions: BTreeMap<String, PartitionEntry>,
}

fn trim_c_string(raw: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| Error::ProtocolError(format!("non-UTF-8 PIT string: {e}")))?;
    Ok(text.trim_matches(|c| c == '\0' || c == ' ').to_string())
}

fn read_entry<R: Read>(reader: &mut R) -> Result<PartitionEntry> {
    let binary_type = reader.read_i32::<LittleEndian>()?;
    let device_type = reader.read_i32::<LittleEndian>()?;
    let partition_id = reader.read_i32::<LittleEndian>()?;
    let attributes = reader.read_i32::<LittleEndian>()?;
    let update_attributes = reader.read_i32::<LittleEndian>()?;
    let block_size = reader.read_i32::<LittleEndian>()?;
    let block_count = reader.read_i32::<LittleEndian>()?;
    let file_offset = reader.read_i32::<LittleEndian>()?;
    let file_size = reader.read_i32::<LittleEndian>()?;

    let mut partition_buf = [0u8; 32];
    reader.read_exact(&mut partition_buf)?;
    let mut file_name_buf = [0u8; 32];
    reader.read_exact(&mut file_name_buf)?;
    let mut delta_name_buf = [0u8; 32];
    reader.read_exact(&mut delta_name_buf)?;

    Ok(PartitionEntry {
        binary_type,
        device_type,
        partition_id,
        attributes,
        update_attributes,
        block_size,
        block_count,
        file_offset,
        file_size,
        partition: trim_c_string(&partition_buf)?,
        file_name: trim_c_string(&file_name_buf)?,
        delta_name: trim_c_string(&delta_name_buf)?,
    })
}

/// Parse a complete PIT blob (header + entries) into a [`Pit`].
pub fn parse_pit(data: &[u8]) -> Result<Pit> {
    let mut reader = Cursor::new(data);

    let magic = reader.read_u32::<LittleEndian>()?;
    if magic != PIT_MAGIC {
        return Err(Error::MagicMismatch {
            expected: PIT_MAGIC,
            actual: magic,
        });
    }

    let entry_count = reader.read_u32::<LittleEndian>()?;
    let mut unknown_buf = [0u8; 8];
    reader.read_exact(&mut unknown_buf)?;
    let mut project_buf = [0u8; 8];
    reader.read_exact(&mut project_buf)?;
    let reserved = reader.read_i32::<LittleEndian>()?;

    let header = PitHeader {
        entry_count,
        unknown: trim_c_string(&unknown_buf)?,
        project: trim_c_string(&project_buf)?,
        reserved,
    };

    let mut partitions = BTreeMap::new();
    for _ in 0..entry_count {
        let entry = read_entry(&mut reader)?;
        partitions.insert(entry.partition.clone(), entry);
    }

    Ok(Pit {
        header: Some(header),
        partitions,
    })
}

/// Render a parsed PIT as an indented tree of `name -> field: value` lines,
/// for human-readable display.
///
/// This is a pure formatting function over already-parsed data; it has no
/// bearing on wire behavior.
#[must_use]
pub fn format_partition_table(pit: &Pit) -> String {
    let mut out = String::from("Partitions\n");
    for (name, entry) in &pit.partitions {
        out.push_str(&format!("  {name}\n"));
        out.push_str(&format!("    BinaryType: {}\n", entry.binary_type));
        out.push_str(&format!("    DeviceType: {}\n", entry.device_type));
        out.push_str(&format!("    PartitionID: {}\n", entry.partition_id));
        out.push_str(&format!("    Attributes: {}\n", entry.attributes));
        out.push_str(&format!(
            "    UpdateAttributes: {}\n",
            entry.update_attributes
        ));
        out.push_str(&format!("    BlockSize: {}\n", entry.block_size));
        out.push_str(&format!("    BlockCount: {}\n", entry.block_count));
        out.push_str(&format!("    FileOffset: {}\n", entry.file_offset));
        out.push_str(&format!("    FileSize: {}\n", entry.file_size));
        out.push_str(&format!("    FileName: {}\n", entry.file_name));
        out.push_str(&format!("    DeltaName: {}\n", entry.delta_name));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Write;

    fn encode_entry(entry: &PartitionEntry, out: &mut Vec<u8>) {
        out.write_i32::<LittleEndian>(entry.binary_type).unwrap();
        out.write_i32::<LittleEndian>(entry.device_type).unwrap();
        out.write_i32::<LittleEndian>(entry.partition_id).unwrap();
        out.write_i32::<LittleEndian>(entry.attributes).unwrap();
        out.write_i32::<LittleEndian>(entry.update_attributes)
            .unwrap();
        out.write_i32::<LittleEndian>(entry.block_size).unwrap();
        out.write_i32::<LittleEndian>(entry.block_count).unwrap();
        out.write_i32::<LittleEndian>(entry.file_offset).unwrap();
        out.write_i32::<LittleEndian>(entry.file_size).unwrap();

        let mut field = [0u8; 32];
        field[..entry.partition.len()].copy_from_slice(entry.partition.as_bytes());
        out.write_all(&field).unwrap();

        let mut field = [0u8; 32];
        field[..entry.file_name.len()].copy_from_slice(entry.file_name.as_bytes());
        out.write_all(&field).unwrap();

        let mut field = [0u8; 32];
        field[..entry.delta_name.len()].copy_from_slice(entry.delta_name.as_bytes());
        out.write_all(&field).unwrap();
    }

    fn encode_pit(header: &PitHeader, entries: &[PartitionEntry]) -> Vec<u8> {
        let mut out = Vec::new();
        out.write_u32::<LittleEndian>(PIT_MAGIC).unwrap();
        out.write_u32::<LittleEndian>(header.entry_count).unwrap();

        let mut unknown = [0u8; 8];
        unknown[..header.unknown.len()].copy_from_slice(header.unknown.as_bytes());
        out.write_all(&unknown).unwrap();

        let mut project = [0u8; 8];
        project[..header.project.len()].copy_from_slice(header.project.as_bytes());
        out.write_all(&project).unwrap();

        out.write_i32::<LittleEndian>(header.reserved).unwrap();

        for entry in entries {
            encode_entry(entry, &mut out);
        }
        out
    }

    fn sample_entry() -> PartitionEntry {
        PartitionEntry {
            binary_type: 0,
            device_type: 2,
            partition_id: 7,
            attributes: 5,
            update_attributes: 1,
            block_size: 512,
            block_count: 1024,
            file_offset: 0,
            file_size: 4096,
            partition: "BOOT".to_string(),
            file_name: "boot.img".to_string(),
            delta_name: String::new(),
        }
    }

    #[test]
    fn parse_pit_rejects_bad_magic() {
        let mut data = vec![0u8; PIT_HEADER_SIZE];
        data[0..4].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        let err = parse_pit(&data).unwrap_err();
        assert!(matches!(err, Error::MagicMismatch { .. }));
    }

    #[test]
    fn pit_round_trip_preserves_logical_entries() {
        let header = PitHeader {
            entry_count: 1,
            unknown: String::new(),
            project: "PROJ".to_string(),
            reserved: 0,
        };
        let entry = sample_entry();
        let bytes = encode_pit(&header, std::slice::from_ref(&entry));

        let parsed = parse_pit(&bytes).unwrap();
        assert_eq!(parsed.header.unwrap().project, "PROJ");
        assert_eq!(parsed.partitions.len(), 1);
        assert_eq!(parsed.partitions["BOOT"], entry);
    }

    #[test]
    fn scenario_s3_single_entry_populates_boot_partition() {
        let header = PitHeader {
            entry_count: 1,
            unknown: String::new(),
            project: String::new(),
            reserved: 0,
        };
        let entry = sample_entry();
        let bytes = encode_pit(&header, std::slice::from_ref(&entry));
        assert_eq!(bytes.len(), PIT_HEADER_SIZE + PIT_ENTRY_SIZE);

        let parsed = parse_pit(&bytes).unwrap();
        let got = &parsed.partitions["BOOT"];
        assert_eq!(got.binary_type, 0);
        assert_eq!(got.device_type, 2);
        assert_eq!(got.partition_id, 7);
    }

    #[test]
    fn duplicate_names_overwrite() {
        let header = PitHeader {
            entry_count: 2,
            unknown: String::new(),
            project: String::new(),
            reserved: 0,
        };
        let mut first = sample_entry();
        first.file_size = 1;
        let mut second = sample_entry();
        second.file_size = 2;
        let bytes = encode_pit(&header, &[first, second]);

        let parsed = parse_pit(&bytes).unwrap();
        assert_eq!(parsed.partitions.len(), 1);
        assert_eq!(parsed.partitions["BOOT"].file_size, 2);
    }
}
