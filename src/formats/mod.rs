//! Header readers for the two recognized imaging formats.

pub mod dicom;
pub mod nifti;
