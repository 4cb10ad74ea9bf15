//! NIfTI-1 / NIfTI-2 header validation.
//!
//! Only the fixed-size header is read: enough to tell a NIfTI image apart from
//! arbitrary binary data and to report its geometry.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

const NIFTI1_HEADER_SIZE: i32 = 348;
const NIFTI2_HEADER_SIZE: i32 = 540;

#[derive(Error, Debug)]
pub enum NiftiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The bytes are readable but are not a NIfTI header
    #[error("not a NIfTI image: {0}")]
    NotNifti(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NiftiVersion {
    Nifti1,
    Nifti2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

/// Geometry read from a NIfTI header
#[derive(Debug, Clone, PartialEq)]
pub struct NiftiHeader {
    pub version: NiftiVersion,
    pub byte_order: ByteOrder,
    /// `n+1`/`n+2` images carry their voxels in the same file; `ni1`/`ni2` use a .img pair.
    pub single_file: bool,
    pub dims: Vec<i64>,
    pub datatype: i16,
    pub voxel_size: Vec<f64>,
}

/// Read and validate the header of the NIfTI file at `path`
pub fn load(path: &Path) -> Result<NiftiHeader, NiftiError> {
    let file = File::open(path)?;
    let mut buf = Vec::with_capacity(NIFTI2_HEADER_SIZE as usize);
    file.take(NIFTI2_HEADER_SIZE as u64).read_to_end(&mut buf)?;
    parse_header(&buf)
}

/// Validate a header held in memory
pub fn parse_header(buf: &[u8]) -> Result<NiftiHeader, NiftiError> {
    if buf.len() < 4 {
        return Err(NiftiError::NotNifti(format!("only {} bytes", buf.len())));
    }

    let size_le = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let size_be = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);

    let (version, order) = match (size_le, size_be) {
        (NIFTI1_HEADER_SIZE, _) => (NiftiVersion::Nifti1, ByteOrder::Little),
        (_, NIFTI1_HEADER_SIZE) => (NiftiVersion::Nifti1, ByteOrder::Big),
        (NIFTI2_HEADER_SIZE, _) => (NiftiVersion::Nifti2, ByteOrder::Little),
        (_, NIFTI2_HEADER_SIZE) => (NiftiVersion::Nifti2, ByteOrder::Big),
        _ => {
            return Err(NiftiError::NotNifti(format!(
                "unexpected sizeof_hdr {}",
                size_le
            )))
        }
    };

    match version {
        NiftiVersion::Nifti1 => parse_nifti1(buf, order),
        NiftiVersion::Nifti2 => parse_nifti2(buf, order),
    }
}

fn parse_nifti1(buf: &[u8], order: ByteOrder) -> Result<NiftiHeader, NiftiError> {
    if buf.len() < NIFTI1_HEADER_SIZE as usize {
        return Err(NiftiError::NotNifti("truncated NIfTI-1 header".to_string()));
    }

    let single_file = match &buf[344..348] {
        b"n+1\0" => true,
        b"ni1\0" => false,
        // ANALYZE 7.5 shares the header size but has no magic
        _ => return Err(NiftiError::NotNifti("missing NIfTI-1 magic".to_string())),
    };

    let ndim = read_i16(buf, 40, order) as i64;
    let ndim = checked_ndim(ndim)?;

    let dims = (1..=ndim)
        .map(|i| read_i16(buf, 40 + 2 * i, order) as i64)
        .collect();
    let voxel_size = (1..=ndim)
        .map(|i| read_f32(buf, 76 + 4 * i, order) as f64)
        .collect();

    Ok(NiftiHeader {
        version: NiftiVersion::Nifti1,
        byte_order: order,
        single_file,
        dims,
        datatype: read_i16(buf, 70, order),
        voxel_size,
    })
}

fn parse_nifti2(buf: &[u8], order: ByteOrder) -> Result<NiftiHeader, NiftiError> {
    if buf.len() < NIFTI2_HEADER_SIZE as usize {
        return Err(NiftiError::NotNifti("truncated NIfTI-2 header".to_string()));
    }

    let single_file = match &buf[4..8] {
        b"n+2\0" => true,
        b"ni2\0" => false,
        _ => return Err(NiftiError::NotNifti("missing NIfTI-2 magic".to_string())),
    };

    let ndim = checked_ndim(read_i64(buf, 16, order))?;

    let dims = (1..=ndim).map(|i| read_i64(buf, 16 + 8 * i, order)).collect();
    let voxel_size = (1..=ndim).map(|i| read_f64(buf, 104 + 8 * i, order)).collect();

    Ok(NiftiHeader {
        version: NiftiVersion::Nifti2,
        byte_order: order,
        single_file,
        dims,
        datatype: read_i16(buf, 12, order),
        voxel_size,
    })
}

fn checked_ndim(ndim: i64) -> Result<usize, NiftiError> {
    if (1..=7).contains(&ndim) {
        Ok(ndim as usize)
    } else {
        Err(NiftiError::NotNifti(format!("invalid dimension count {}", ndim)))
    }
}

fn field<const N: usize>(buf: &[u8], offset: usize, order: ByteOrder) -> [u8; N] {
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(&buf[offset..offset + N]);
    if order == ByteOrder::Big {
        bytes.reverse();
    }
    bytes
}

fn read_i16(buf: &[u8], offset: usize, order: ByteOrder) -> i16 {
    i16::from_le_bytes(field(buf, offset, order))
}

fn read_i64(buf: &[u8], offset: usize, order: ByteOrder) -> i64 {
    i64::from_le_bytes(field(buf, offset, order))
}

fn read_f32(buf: &[u8], offset: usize, order: ByteOrder) -> f32 {
    f32::from_le_bytes(field(buf, offset, order))
}

fn read_f64(buf: &[u8], offset: usize, order: ByteOrder) -> f64 {
    f64::from_le_bytes(field(buf, offset, order))
}
