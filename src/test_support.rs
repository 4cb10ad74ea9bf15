//! Fixtures shared by the unit tests: migrated scratch databases and
//! synthetic DICOM / NIfTI files.

use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::db::{migrate, Db};

type Tag = (u16, u16);

/// Serializes tests that mutate process-wide environment variables
pub static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Scratch database with every migration applied
pub fn migrated_db() -> (Db, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Db::new(temp_dir.path().join("lineage.db"));
    let migrations_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations");
    let mut conn = db.open_connection().unwrap();
    migrate::run_migrations(&mut conn, &migrations_dir).unwrap();
    (db, temp_dir)
}

/// Open connection on a migrated scratch database
pub fn migrated_conn() -> (Connection, TempDir) {
    let (db, temp_dir) = migrated_db();
    let conn = db.open_connection().unwrap();
    (conn, temp_dir)
}

pub fn provenance(conn: &Connection) -> i64 {
    crate::lineage::create_or_get_provenance(conn, &crate::lineage::ProvenanceFields::new("PPMI"))
        .unwrap()
}

pub fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |r| r.get(0))
        .unwrap()
}

/// Register participant → scan → session → sequence → repetition the way an
/// upstream registration process would. Returns the repetition id.
pub fn register_chain(
    conn: &Connection,
    participant: &str,
    date: &str,
    session: i64,
    sequence_name: &str,
    repetition: i64,
) -> i64 {
    conn.execute("INSERT OR IGNORE INTO participant (id) VALUES (?1)", params![participant]).unwrap();
    conn.execute(
        "INSERT OR IGNORE INTO scan (date, participant_id) VALUES (?1, ?2)",
        params![date, participant],
    ).unwrap();
    let scan_id: i64 = conn.query_row(
        "SELECT id FROM scan WHERE participant_id = ?1 AND date = ?2",
        params![participant, date],
        |r| r.get(0),
    ).unwrap();
    conn.execute(
        "INSERT OR IGNORE INTO session (scan_id, value) VALUES (?1, ?2)",
        params![scan_id, session],
    ).unwrap();
    let session_id: i64 = conn.query_row(
        "SELECT id FROM session WHERE scan_id = ?1 AND value = ?2",
        params![scan_id, session],
        |r| r.get(0),
    ).unwrap();
    let sequence_type_id = insert_sequence_type(conn, sequence_name);
    conn.execute(
        "INSERT OR IGNORE INTO sequence (session_id, sequence_type_id) VALUES (?1, ?2)",
        params![session_id, sequence_type_id],
    ).unwrap();
    let sequence_id: i64 = conn.query_row(
        "SELECT id FROM sequence WHERE session_id = ?1 AND sequence_type_id = ?2",
        params![session_id, sequence_type_id],
        |r| r.get(0),
    ).unwrap();
    conn.execute(
        "INSERT OR IGNORE INTO repetition (sequence_id, value) VALUES (?1, ?2)",
        params![sequence_id, repetition],
    ).unwrap();
    conn.query_row(
        "SELECT id FROM repetition WHERE sequence_id = ?1 AND value = ?2",
        params![sequence_id, repetition],
        |r| r.get(0),
    ).unwrap()
}

/// Insert a sequence_type row, reusing the lowest id already carrying `name`
pub fn insert_sequence_type(conn: &Connection, name: &str) -> i64 {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT MIN(id) FROM sequence_type WHERE name = ?1",
            params![name],
            |r| r.get(0),
        )
        .unwrap();
    existing.unwrap_or_else(|| insert_duplicate_sequence_type(conn, name))
}

/// Always insert a new sequence_type row, even if the name exists
pub fn insert_duplicate_sequence_type(conn: &Connection, name: &str) -> i64 {
    conn.execute(
        "INSERT INTO sequence_type (name, manufacturer, manufacturer_model_name, institution_name) \
         VALUES (?1, 'SIEMENS', 'Prisma', 'CHUV')",
        params![name],
    ).unwrap();
    conn.last_insert_rowid()
}

/// 352-byte single-file NIfTI-1 image header (64x64x32, float32, 2x2x3 mm)
pub fn nifti1_bytes() -> Vec<u8> {
    let mut buf = vec![0u8; 352];
    buf[0..4].copy_from_slice(&348i32.to_le_bytes());
    for (i, dim) in [3i16, 64, 64, 32, 1, 1, 1, 1].iter().enumerate() {
        buf[40 + 2 * i..42 + 2 * i].copy_from_slice(&dim.to_le_bytes());
    }
    buf[70..72].copy_from_slice(&16i16.to_le_bytes());
    buf[72..74].copy_from_slice(&32i16.to_le_bytes());
    for (i, pixdim) in [1.0f32, 2.0, 2.0, 3.0].iter().enumerate() {
        buf[76 + 4 * i..80 + 4 * i].copy_from_slice(&pixdim.to_le_bytes());
    }
    buf[108..112].copy_from_slice(&352f32.to_le_bytes());
    buf[344..348].copy_from_slice(b"n+1\0");
    buf
}

pub fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, bytes).unwrap();
}

enum Element {
    Bytes { vr: [u8; 2], value: Vec<u8> },
    Sequence(Vec<DicomBuilder>),
}

/// Builds DICOM Part 10 byte streams for reader and importer tests
pub struct DicomBuilder {
    explicit: bool,
    transfer_syntax: Option<String>,
    elements: Vec<(Tag, Element)>,
}

impl DicomBuilder {
    pub fn new() -> Self {
        Self {
            explicit: true,
            transfer_syntax: None,
            elements: Vec::new(),
        }
    }

    pub fn implicit(mut self) -> Self {
        self.explicit = false;
        self
    }

    pub fn transfer_syntax(mut self, uid: &str) -> Self {
        self.transfer_syntax = Some(uid.to_string());
        self
    }

    pub fn text(mut self, tag: Tag, vr: &str, value: &str) -> Self {
        let mut bytes = value.as_bytes().to_vec();
        if bytes.len() % 2 == 1 {
            bytes.push(if vr == "UI" { 0 } else { b' ' });
        }
        let vr = [vr.as_bytes()[0], vr.as_bytes()[1]];
        self.elements.push((tag, Element::Bytes { vr, value: bytes }));
        self
    }

    pub fn ushort(mut self, tag: Tag, value: u16) -> Self {
        self.elements.push((tag, Element::Bytes { vr: *b"US", value: value.to_le_bytes().to_vec() }));
        self
    }

    pub fn undefined_sequence(mut self, tag: Tag, items: Vec<DicomBuilder>) -> Self {
        self.elements.push((tag, Element::Sequence(items)));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![0u8; 128];
        out.extend_from_slice(b"DICM");

        let default_syntax = if self.explicit { "1.2.840.10008.1.2.1" } else { "1.2.840.10008.1.2" };
        let syntax = self
            .transfer_syntax
            .clone()
            .unwrap_or_else(|| default_syntax.to_string());
        let mut uid = syntax.into_bytes();
        if uid.len() % 2 == 1 {
            uid.push(0);
        }
        encode_bytes(&mut out, (0x0002, 0x0010), b"UI", &uid, true);

        self.encode_dataset(&mut out, self.explicit);
        out
    }

    fn encode_dataset(&self, out: &mut Vec<u8>, explicit: bool) {
        let mut elements: Vec<&(Tag, Element)> = self.elements.iter().collect();
        elements.sort_by_key(|(tag, _)| *tag);

        for (tag, element) in elements {
            match element {
                Element::Bytes { vr, value } => encode_bytes(out, *tag, vr, value, explicit),
                Element::Sequence(items) => {
                    push_tag(out, *tag);
                    if explicit {
                        out.extend_from_slice(b"SQ\0\0");
                    }
                    out.extend_from_slice(&u32::MAX.to_le_bytes());
                    for item in items {
                        push_tag(out, (0xFFFE, 0xE000));
                        out.extend_from_slice(&u32::MAX.to_le_bytes());
                        item.encode_dataset(out, explicit);
                        push_tag(out, (0xFFFE, 0xE00D));
                        out.extend_from_slice(&0u32.to_le_bytes());
                    }
                    push_tag(out, (0xFFFE, 0xE0DD));
                    out.extend_from_slice(&0u32.to_le_bytes());
                }
            }
        }
    }
}

fn push_tag(out: &mut Vec<u8>, tag: Tag) {
    out.extend_from_slice(&tag.0.to_le_bytes());
    out.extend_from_slice(&tag.1.to_le_bytes());
}

fn encode_bytes(out: &mut Vec<u8>, tag: Tag, vr: &[u8; 2], value: &[u8], explicit: bool) {
    push_tag(out, tag);
    if explicit {
        out.extend_from_slice(vr);
        if matches!(vr, b"OB" | b"OW" | b"SQ" | b"UN" | b"UT") {
            out.extend_from_slice(&[0, 0]);
            out.extend_from_slice(&(value.len() as u32).to_le_bytes());
        } else {
            out.extend_from_slice(&(value.len() as u16).to_le_bytes());
        }
    } else {
        out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    }
    out.extend_from_slice(value);
}

/// A typical 3T structural MR slice header
pub fn mri_dicom(patient: &str, date: &str, series_description: &str, series_number: i64) -> DicomBuilder {
    DicomBuilder::new()
        .text((0x0008, 0x0020), "DA", date)
        .text((0x0008, 0x0070), "LO", "SIEMENS")
        .text((0x0008, 0x0080), "LO", "CHUV")
        .text((0x0008, 0x103E), "LO", series_description)
        .text((0x0008, 0x1090), "LO", "Prisma")
        .text((0x0010, 0x0020), "LO", patient)
        .text((0x0010, 0x0030), "DA", "19800101")
        .text((0x0010, 0x0040), "CS", "F")
        .text((0x0018, 0x0050), "DS", "1")
        .text((0x0018, 0x0080), "DS", "2300")
        .text((0x0018, 0x0081), "DS", "2.98")
        .text((0x0018, 0x0087), "DS", "3")
        .text((0x0018, 0x1314), "DS", "9")
        .text((0x0020, 0x0010), "SH", "3")
        .text((0x0020, 0x0011), "IS", &series_number.to_string())
        .ushort((0x0028, 0x0010), 256)
        .ushort((0x0028, 0x0011), 240)
        .text((0x0028, 0x0030), "DS", "1\\1.05")
}
