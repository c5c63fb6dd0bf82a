//! Request and response bodies of the REST API.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use catalog_core::{DateLabel, DicomUpload, StudyDownload, StudyError, StudyRecord};
use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

/// A DICOM file carried inline as base64.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StudyFilePayload {
    /// Original file name, e.g. `scan.dcm`.
    pub file_name: String,
    /// Media type claimed by the client, e.g. `application/dicom`.
    #[serde(default)]
    pub media_type: Option<String>,
    /// File content, standard base64 with padding.
    pub content_base64: String,
}

impl StudyFilePayload {
    pub fn decode(self) -> Result<DicomUpload, StudyError> {
        let content = STANDARD.decode(self.content_base64.trim()).map_err(|e| {
            StudyError::Validation(format!("file content is not valid base64: {e}"))
        })?;
        Ok(DicomUpload::new(self.file_name, self.media_type, content))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateStudyReq {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub file: Option<StudyFilePayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateStudyReq {
    pub name: String,
    pub description: String,
    /// Replacement file; omit to keep the current one.
    #[serde(default)]
    pub file: Option<StudyFilePayload>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListStudiesParams {
    /// `all` (default), `today`, `week` or `month`.
    pub since: Option<String>,
    /// Case-insensitive substring of the study name.
    pub search: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StudyRes {
    pub id: String,
    pub name: String,
    pub description: String,
    pub storage_path: String,
    pub file_name: String,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// `Today`, `Yesterday` or the full local date.
    pub created_label: String,
}

impl StudyRes {
    pub fn from_record<Tz: TimeZone>(record: StudyRecord, now: &DateTime<Tz>) -> Self {
        Self {
            id: record.id.to_string(),
            created_label: DateLabel::for_timestamp(record.created_at, now).to_string(),
            created_at: record.created_at.to_rfc3339(),
            name: record.name.into_inner(),
            description: record.description.into_inner(),
            storage_path: record.storage_path.to_string(),
            file_name: record.file_name.into_inner(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListStudiesRes {
    pub studies: Vec<StudyRes>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DownloadRes {
    pub url: String,
    pub file_name: String,
}

impl From<StudyDownload> for DownloadRes {
    fn from(download: StudyDownload) -> Self {
        Self {
            url: download.url,
            file_name: download.file_name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorRes {
    /// Stable error kind, e.g. `validation_error` or `storage_delete_error`.
    pub kind: String,
    pub message: String,
}
