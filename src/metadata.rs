use serde::Serialize;
use std::fmt::Write as _;
use std::path::PathBuf;

use crate::asset_store::AssetRecord;
use crate::error::MirrorError;
use crate::file_manager::FileManager;

pub const METADATA_JSON: &str = "mirror_metadata.json";
pub const METADATA_CSV: &str = "mirror_metadata.csv";

/// Writes the asset audit files to the mirror root and returns their paths.
pub fn write_metadata(
    writer: &FileManager,
    records: &[AssetRecord],
) -> Result<Vec<PathBuf>, MirrorError> {
    let json_path = write_json(writer, METADATA_JSON, records)?;
    let csv_path = writer.save_file(METADATA_CSV, to_csv(records).as_bytes())?;
    Ok(vec![json_path, csv_path])
}

// Nothing is written when serialization fails.
fn write_json<T: Serialize + ?Sized>(
    writer: &FileManager,
    name: &str,
    value: &T,
) -> Result<PathBuf, MirrorError> {
    let json = serde_json::to_vec_pretty(value)?;
    writer.save_file(name, &json)
}

pub fn to_csv(records: &[AssetRecord]) -> String {
    let mut output = String::from("url,category,local_path,width,height,byte_size\n");
    for record in records {
        let _ = writeln!(
            output,
            "{},{},{},{},{},{}",
            escape_csv(&record.url.to_string()),
            record.category,
            escape_csv(&record.local_path),
            record.width.map(|w| w.to_string()).unwrap_or_default(),
            record.height.map(|h| h.to_string()).unwrap_or_default(),
            record.byte_size
        );
    }
    output
}

fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
