//! DICOM upload classification.
//!
//! An upload counts as DICOM when the client-claimed media type is `application/dicom`, or
//! when the file name, trimmed the same way it is stored, ends in `.dcm` in any letter case.
//! Content is not inspected.

use crate::constants::{DICOM_EXTENSION, DICOM_MEDIA_TYPE};
use crate::study::DicomUpload;

/// Which check accepted an upload as DICOM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DicomEvidence {
    MediaType,
    Extension,
}

/// Returns the first check that accepts `file`, or `None` if it is not DICOM.
pub fn classify(file: &DicomUpload) -> Option<DicomEvidence> {
    if file.media_type.as_deref().is_some_and(is_dicom_media_type) {
        return Some(DicomEvidence::MediaType);
    }
    if has_dicom_extension(file.file_name.trim()) {
        return Some(DicomEvidence::Extension);
    }
    None
}

pub fn classify_as_dicom(file: &DicomUpload) -> bool {
    classify(file).is_some()
}

/// Media types compare case-insensitively and ignore parameters such as `; charset=`.
pub fn is_dicom_media_type(media_type: &str) -> bool {
    media_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|essence| essence.eq_ignore_ascii_case(DICOM_MEDIA_TYPE))
}

pub fn has_dicom_extension(file_name: &str) -> bool {
    file_name
        .rsplit_once('.')
        .is_some_and(|(stem, ext)| !stem.is_empty() && ext.eq_ignore_ascii_case(DICOM_EXTENSION))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: &str, media_type: Option<&str>) -> DicomUpload {
        DicomUpload::new(name, media_type.map(str::to_string), vec![1u8])
    }

    #[test]
    fn accepts_by_media_type_alone() {
        let file = upload("image.bin", Some("application/dicom"));
        assert_eq!(classify(&file), Some(DicomEvidence::MediaType));
    }

    #[test]
    fn media_type_ignores_case_and_parameters() {
        assert!(is_dicom_media_type("Application/DICOM"));
        assert!(is_dicom_media_type("application/dicom; transfer-syntax=1.2.840.10008.1.2"));
        assert!(!is_dicom_media_type("application/dicom+json"));
    }

    #[test]
    fn accepts_lower_and_upper_case_extension() {
        assert_eq!(classify(&upload("scan.dcm", None)), Some(DicomEvidence::Extension));
        assert_eq!(classify(&upload("SCAN.DCM", None)), Some(DicomEvidence::Extension));
        assert_eq!(
            classify(&upload("scan.Dcm", Some("application/octet-stream"))),
            Some(DicomEvidence::Extension)
        );
    }

    #[test]
    fn extension_is_read_from_the_trimmed_name() {
        assert_eq!(classify(&upload("scan.dcm ", None)), Some(DicomEvidence::Extension));
        assert_eq!(classify(&upload("\tscan.DCM\n", None)), Some(DicomEvidence::Extension));
        assert!(!classify_as_dicom(&upload(" .dcm", None)));
    }

    #[test]
    fn rejects_other_files() {
        assert!(!classify_as_dicom(&upload("report.txt", Some("text/plain"))));
        assert!(!classify_as_dicom(&upload("scan.dcm.txt", None)));
        assert!(!classify_as_dicom(&upload("dcm", None)));
        assert!(!classify_as_dicom(&upload(".dcm", None)));
    }
}
