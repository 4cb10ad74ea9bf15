//! Minimal DICOM Part 10 header reader.
//!
//! Walks the data elements of a file until the end of group 0x0028 and keeps
//! the handful of attributes the lineage model stores. Pixel data is never
//! read. Supported transfer syntaxes: implicit and explicit VR little endian
//! (compressed syntaxes included, their headers are explicit VR little endian).

use chrono::NaiveDate;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use thiserror::Error;

type Tag = (u16, u16);

const ITEM: Tag = (0xFFFE, 0xE000);
const ITEM_DELIMITATION: Tag = (0xFFFE, 0xE00D);
const SEQUENCE_DELIMITATION: Tag = (0xFFFE, 0xE0DD);
const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;
const MAX_VALUE_LENGTH: u32 = 1 << 20;
const LAST_GROUP: u16 = 0x0028;

const TRANSFER_SYNTAX_UID: Tag = (0x0002, 0x0010);
const STUDY_DATE: Tag = (0x0008, 0x0020);
const SERIES_DATE: Tag = (0x0008, 0x0021);
const ACQUISITION_DATE: Tag = (0x0008, 0x0022);
const MANUFACTURER: Tag = (0x0008, 0x0070);
const INSTITUTION_NAME: Tag = (0x0008, 0x0080);
const SERIES_DESCRIPTION: Tag = (0x0008, 0x103E);
const MANUFACTURER_MODEL_NAME: Tag = (0x0008, 0x1090);
const PATIENT_ID: Tag = (0x0010, 0x0020);
const PATIENT_BIRTH_DATE: Tag = (0x0010, 0x0030);
const PATIENT_SEX: Tag = (0x0010, 0x0040);
const SLICE_THICKNESS: Tag = (0x0018, 0x0050);
const REPETITION_TIME: Tag = (0x0018, 0x0080);
const ECHO_TIME: Tag = (0x0018, 0x0081);
const ECHO_NUMBERS: Tag = (0x0018, 0x0086);
const MAGNETIC_FIELD_STRENGTH: Tag = (0x0018, 0x0087);
const SPACING_BETWEEN_SLICES: Tag = (0x0018, 0x0088);
const NUMBER_OF_PHASE_ENCODING_STEPS: Tag = (0x0018, 0x0089);
const ECHO_TRAIN_LENGTH: Tag = (0x0018, 0x0091);
const PERCENT_SAMPLING: Tag = (0x0018, 0x0093);
const PERCENT_PHASE_FIELD_OF_VIEW: Tag = (0x0018, 0x0094);
const PIXEL_BANDWIDTH: Tag = (0x0018, 0x0095);
const PROTOCOL_NAME: Tag = (0x0018, 0x1030);
const FLIP_ANGLE: Tag = (0x0018, 0x1314);
const STUDY_ID: Tag = (0x0020, 0x0010);
const SERIES_NUMBER: Tag = (0x0020, 0x0011);
const ROWS: Tag = (0x0028, 0x0010);
const COLUMNS: Tag = (0x0028, 0x0011);
const PIXEL_SPACING: Tag = (0x0028, 0x0030);

const WANTED: &[Tag] = &[
    TRANSFER_SYNTAX_UID, STUDY_DATE, SERIES_DATE, ACQUISITION_DATE, MANUFACTURER,
    INSTITUTION_NAME, SERIES_DESCRIPTION, MANUFACTURER_MODEL_NAME, PATIENT_ID,
    PATIENT_BIRTH_DATE, PATIENT_SEX, SLICE_THICKNESS, REPETITION_TIME, ECHO_TIME,
    ECHO_NUMBERS, MAGNETIC_FIELD_STRENGTH, SPACING_BETWEEN_SLICES,
    NUMBER_OF_PHASE_ENCODING_STEPS, ECHO_TRAIN_LENGTH, PERCENT_SAMPLING,
    PERCENT_PHASE_FIELD_OF_VIEW, PIXEL_BANDWIDTH, PROTOCOL_NAME, FLIP_ANGLE, STUDY_ID,
    SERIES_NUMBER, ROWS, COLUMNS, PIXEL_SPACING,
];

const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
const EXPLICIT_VR_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";
const DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1.99";

#[derive(Error, Debug)]
pub enum DicomError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("missing DICM prefix")]
    NotDicom,

    #[error("malformed data set: {0}")]
    Malformed(String),

    #[error("unsupported transfer syntax {0}")]
    UnsupportedTransferSyntax(String),

    #[error("required attribute {0} is absent or unreadable")]
    MissingAttribute(&'static str),
}

/// Acquisition protocol descriptor, stored as one `sequence_type` row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SequenceTypeInfo {
    pub name: String,
    pub manufacturer: String,
    pub manufacturer_model_name: String,
    pub institution_name: String,
    pub slice_thickness: Option<f64>,
    pub repetition_time: Option<f64>,
    pub echo_time: Option<f64>,
    pub echo_number: Option<i64>,
    pub number_of_phase_encoding_steps: Option<i64>,
    pub percent_phase_field_of_view: Option<f64>,
    pub pixel_bandwidth: Option<i64>,
    pub flip_angle: Option<f64>,
    pub rows: Option<i64>,
    pub columns: Option<i64>,
    pub magnetic_field_strength: Option<f64>,
    pub space_between_slices: Option<f64>,
    pub echo_train_length: Option<i64>,
    pub percent_sampling: Option<f64>,
    pub pixel_spacing: Option<(f64, f64)>,
}

/// Attributes of one DICOM file needed to place it in the scan chain
#[derive(Debug, Clone, PartialEq)]
pub struct DicomHeader {
    pub patient_id: String,
    pub patient_sex: Option<String>,
    pub patient_birth_date: Option<NaiveDate>,
    /// First present of AcquisitionDate, SeriesDate, StudyDate
    pub scan_date: NaiveDate,
    pub study_id: Option<String>,
    pub series_number: i64,
    pub sequence_type: SequenceTypeInfo,
}

/// Read the header of the DICOM file at `path`
pub fn read_header(path: &Path) -> Result<DicomHeader, DicomError> {
    let reader = BufReader::new(File::open(path)?);
    let values = read_values(reader)?;
    DicomHeader::from_values(&values)
}

/// Collect the raw values of the wanted attributes
fn read_values<R: Read>(mut reader: R) -> Result<HashMap<Tag, Vec<u8>>, DicomError> {
    let mut preamble = [0u8; 132];
    if let Err(e) = reader.read_exact(&mut preamble) {
        return match e.kind() {
            io::ErrorKind::UnexpectedEof => Err(DicomError::NotDicom),
            _ => Err(e.into()),
        };
    }
    if &preamble[128..132] != b"DICM" {
        return Err(DicomError::NotDicom);
    }

    let mut elements = ElementReader { inner: reader, explicit: true };
    let mut values = HashMap::new();

    // File meta group: always explicit VR little endian
    let mut pending = elements.next_tag()?;
    while let Some(tag) = pending {
        if tag.0 != 0x0002 {
            break;
        }
        elements.read_element(tag, &mut values)?;
        pending = elements.next_tag()?;
    }

    let syntax = values
        .get(&TRANSFER_SYNTAX_UID)
        .map(|v| decode_string(v))
        .unwrap_or_else(|| IMPLICIT_VR_LITTLE_ENDIAN.to_string());
    match syntax.as_str() {
        IMPLICIT_VR_LITTLE_ENDIAN => elements.explicit = false,
        EXPLICIT_VR_BIG_ENDIAN | DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN => {
            return Err(DicomError::UnsupportedTransferSyntax(syntax));
        }
        _ => elements.explicit = true,
    }

    while let Some(tag) = pending {
        if tag.0 > LAST_GROUP {
            break;
        }
        elements.read_element(tag, &mut values)?;
        pending = elements.next_tag()?;
    }

    Ok(values)
}

struct ElementReader<R> {
    inner: R,
    explicit: bool,
}

impl<R: Read> ElementReader<R> {
    /// Next tag, or `None` at a clean end of stream
    fn next_tag(&mut self) -> Result<Option<Tag>, DicomError> {
        let mut buf = [0u8; 4];
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => return Err(DicomError::Malformed("truncated tag".to_string())),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Some((
            u16::from_le_bytes([buf[0], buf[1]]),
            u16::from_le_bytes([buf[2], buf[3]]),
        )))
    }

    fn expect_tag(&mut self) -> Result<Tag, DicomError> {
        self.next_tag()?
            .ok_or_else(|| DicomError::Malformed("unterminated sequence".to_string()))
    }

    /// VR (explicit syntax only) and value length following `tag`
    fn read_vr_and_length(&mut self, tag: Tag) -> Result<(Option<[u8; 2]>, u32), DicomError> {
        // item and delimiter tags never carry a VR
        if tag.0 == 0xFFFE || !self.explicit {
            return Ok((None, self.read_u32()?));
        }

        let mut vr = [0u8; 2];
        self.read_exact(&mut vr)?;
        let length = if has_long_length(&vr) {
            self.skip(2)?;
            self.read_u32()?
        } else {
            let mut len = [0u8; 2];
            self.read_exact(&mut len)?;
            u16::from_le_bytes(len) as u32
        };
        Ok((Some(vr), length))
    }

    fn read_element(&mut self, tag: Tag, values: &mut HashMap<Tag, Vec<u8>>) -> Result<(), DicomError> {
        let (_, length) = self.read_vr_and_length(tag)?;

        if length == UNDEFINED_LENGTH {
            return self.skip_undefined_sequence();
        }

        if WANTED.contains(&tag) {
            if length > MAX_VALUE_LENGTH {
                return Err(DicomError::Malformed(format!(
                    "attribute ({:04X},{:04X}) claims {} bytes",
                    tag.0, tag.1, length
                )));
            }
            let mut value = vec![0u8; length as usize];
            self.read_exact(&mut value)?;
            values.insert(tag, value);
        } else {
            self.skip(length as u64)?;
        }
        Ok(())
    }

    fn skip_undefined_sequence(&mut self) -> Result<(), DicomError> {
        loop {
            let tag = self.expect_tag()?;
            let length = self.read_u32()?;
            match tag {
                SEQUENCE_DELIMITATION => return Ok(()),
                ITEM if length == UNDEFINED_LENGTH => self.skip_undefined_item()?,
                ITEM => self.skip(length as u64)?,
                other => {
                    return Err(DicomError::Malformed(format!(
                        "unexpected ({:04X},{:04X}) inside sequence",
                        other.0, other.1
                    )))
                }
            }
        }
    }

    fn skip_undefined_item(&mut self) -> Result<(), DicomError> {
        loop {
            let tag = self.expect_tag()?;
            if tag == ITEM_DELIMITATION {
                self.read_u32()?;
                return Ok(());
            }
            let (_, length) = self.read_vr_and_length(tag)?;
            if length == UNDEFINED_LENGTH {
                self.skip_undefined_sequence()?;
            } else {
                self.skip(length as u64)?;
            }
        }
    }

    fn read_u32(&mut self) -> Result<u32, DicomError> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), DicomError> {
        self.inner.read_exact(buf).map_err(truncation)
    }

    fn skip(&mut self, count: u64) -> Result<(), DicomError> {
        let skipped = io::copy(&mut (&mut self.inner).take(count), &mut io::sink())?;
        if skipped < count {
            return Err(DicomError::Malformed("value runs past end of file".to_string()));
        }
        Ok(())
    }
}

fn truncation(e: io::Error) -> DicomError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        DicomError::Malformed("truncated element".to_string())
    } else {
        DicomError::Io(e)
    }
}

fn has_long_length(vr: &[u8; 2]) -> bool {
    matches!(
        vr,
        b"OB" | b"OD" | b"OF" | b"OL" | b"OV" | b"OW" | b"SQ" | b"SV" | b"UC" | b"UN" | b"UR" | b"UT" | b"UV"
    )
}

fn decode_string(value: &[u8]) -> String {
    String::from_utf8_lossy(value)
        .trim_end_matches(['\0', ' '])
        .trim()
        .to_string()
}

impl DicomHeader {
    fn from_values(values: &HashMap<Tag, Vec<u8>>) -> Result<Self, DicomError> {
        let text = |tag: Tag| -> Option<String> {
            values
                .get(&tag)
                .map(|v| decode_string(v))
                .filter(|s| !s.is_empty())
        };
        // multi-valued DS/IS: keep the first value
        let decimal = |tag: Tag| -> Option<f64> {
            text(tag).and_then(|s| s.split('\\').next().and_then(|v| v.trim().parse().ok()))
        };
        let integer = |tag: Tag| -> Option<i64> { decimal(tag).map(|v| v.round() as i64) };
        let unsigned_short = |tag: Tag| -> Option<i64> {
            values
                .get(&tag)
                .filter(|v| v.len() >= 2)
                .map(|v| u16::from_le_bytes([v[0], v[1]]) as i64)
        };
        let date = |tag: Tag| -> Option<NaiveDate> {
            text(tag).and_then(|s| NaiveDate::parse_from_str(&s, "%Y%m%d").ok())
        };

        let patient_id = text(PATIENT_ID).ok_or(DicomError::MissingAttribute("PatientID"))?;
        let scan_date = date(ACQUISITION_DATE)
            .or_else(|| date(SERIES_DATE))
            .or_else(|| date(STUDY_DATE))
            .ok_or(DicomError::MissingAttribute("StudyDate"))?;
        let name = text(SERIES_DESCRIPTION)
            .or_else(|| text(PROTOCOL_NAME))
            .ok_or(DicomError::MissingAttribute("SeriesDescription"))?;
        let series_number = integer(SERIES_NUMBER).ok_or(DicomError::MissingAttribute("SeriesNumber"))?;

        let pixel_spacing = text(PIXEL_SPACING).and_then(|s| {
            let mut parts = s.split('\\').map(|p| p.trim().parse::<f64>());
            match (parts.next(), parts.next()) {
                (Some(Ok(row)), Some(Ok(col))) => Some((row, col)),
                _ => None,
            }
        });

        let unknown = || "unknown".to_string();

        Ok(Self {
            patient_id,
            patient_sex: text(PATIENT_SEX),
            patient_birth_date: date(PATIENT_BIRTH_DATE),
            scan_date,
            study_id: text(STUDY_ID),
            series_number,
            sequence_type: SequenceTypeInfo {
                name,
                manufacturer: text(MANUFACTURER).unwrap_or_else(unknown),
                manufacturer_model_name: text(MANUFACTURER_MODEL_NAME).unwrap_or_else(unknown),
                institution_name: text(INSTITUTION_NAME).unwrap_or_else(unknown),
                slice_thickness: decimal(SLICE_THICKNESS),
                repetition_time: decimal(REPETITION_TIME),
                echo_time: decimal(ECHO_TIME),
                echo_number: integer(ECHO_NUMBERS),
                number_of_phase_encoding_steps: integer(NUMBER_OF_PHASE_ENCODING_STEPS),
                percent_phase_field_of_view: decimal(PERCENT_PHASE_FIELD_OF_VIEW),
                pixel_bandwidth: integer(PIXEL_BANDWIDTH),
                flip_angle: decimal(FLIP_ANGLE),
                rows: unsigned_short(ROWS),
                columns: unsigned_short(COLUMNS),
                magnetic_field_strength: decimal(MAGNETIC_FIELD_STRENGTH),
                space_between_slices: decimal(SPACING_BETWEEN_SLICES),
                echo_train_length: integer(ECHO_TRAIN_LENGTH),
                percent_sampling: decimal(PERCENT_SAMPLING),
                pixel_spacing,
            },
        })
    }
}
