//! Attachment preparation and the one-at-a-time upload pipeline.

use listform_client::{Attachment, ListService};
use regex::Regex;
use serde_json::json;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::FormConfig;
use crate::error::{FormError, Result};
use crate::pipeline::{step_async, Pipeline, PipelineState, StepOutcome};

/// A file waiting to be uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub name: String,
    pub content: Vec<u8>,
}

impl PendingFile {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

fn unsafe_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^A-Za-z0-9_.\-]").expect("static pattern"))
}

/// Strip every character the store refuses in attachment names.
pub fn clean_file_name(name: &str) -> String {
    unsafe_chars().replace_all(name, "").into_owned()
}

/// `("report", "pdf")` for `report.pdf`. Extensions are 2 to 4 word characters.
pub fn split_extension(name: &str) -> Option<(&str, &str)> {
    let (root, ext) = name.rsplit_once('.')?;
    let valid = (2..=4).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then_some((root, ext))
}

/// `name`, or `root-N.ext` with the smallest N not already taken.
pub fn unique_file_name(name: &str, taken: &[String]) -> String {
    let is_taken = |candidate: &str| taken.iter().any(|t| t.eq_ignore_ascii_case(candidate));
    if !is_taken(name) {
        return name.to_string();
    }

    let (root, ext) = match split_extension(name) {
        Some((root, ext)) => (root, format!(".{}", ext)),
        None => (name, String::new()),
    };
    let mut n = 1;
    loop {
        let candidate = format!("{}-{}{}", root, n, ext);
        if !is_taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Clean, check and de-duplicate a batch against the item's attachments.
///
/// Rejects the whole batch when any file has a disallowed extension.
pub fn prepare_files(
    files: Vec<PendingFile>,
    existing: &[Attachment],
    config: &FormConfig,
) -> Result<Vec<PendingFile>> {
    let mut taken: Vec<String> = existing.iter().map(|a| a.name.clone()).collect();
    let mut prepared = Vec::with_capacity(files.len());

    for file in files {
        let cleaned = clean_file_name(&file.name);
        let Some((_, ext)) = split_extension(&cleaned) else {
            return Err(FormError::Attachment(format!(
                "'{}' has no file extension",
                file.name
            )));
        };
        if !config.allows_extension(ext) {
            return Err(FormError::Attachment(format!(
                "Only {} files are allowed",
                config.allowed_extensions.join(", ")
            )));
        }

        let name = unique_file_name(&cleaned, &taken);
        if name != file.name {
            debug!(original = %file.name, renamed = %name, "Renamed attachment");
        }
        taken.push(name.clone());
        prepared.push(PendingFile {
            name,
            content: file.content,
        });
    }
    Ok(prepared)
}

/// State shared by the steps of one upload batch.
pub struct UploadBatch {
    service: Arc<dyn ListService>,
    list: String,
    item_id: u64,
    uploaded: Vec<Attachment>,
}

impl UploadBatch {
    pub fn item_id(&self) -> u64 {
        self.item_id
    }

    pub fn uploaded(&self) -> &[Attachment] {
        &self.uploaded
    }
}

/// How a batch ended.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadReport {
    pub state: PipelineState,
    /// Files stored before the batch finished or halted
    pub uploaded: Vec<Attachment>,
    pub failure: Option<String>,
}

impl UploadReport {
    pub fn is_complete(&self) -> bool {
        self.state == PipelineState::Completed
    }
}

/// Uploads a batch through a pipeline with one step per file, so the store
/// never sees two attachment writes for the batch at once.
#[derive(Clone)]
pub struct AttachmentUploader {
    service: Arc<dyn ListService>,
    list: String,
    step_timeout: Option<Duration>,
}

impl AttachmentUploader {
    pub fn new(service: Arc<dyn ListService>, list: impl Into<String>) -> Self {
        Self {
            service,
            list: list.into(),
            step_timeout: None,
        }
    }

    pub fn with_step_timeout(mut self, limit: Option<Duration>) -> Self {
        self.step_timeout = limit;
        self
    }

    /// Upload prepared files in order. Stops at the first failed write.
    pub async fn upload(&self, item_id: u64, files: Vec<PendingFile>) -> UploadReport {
        let mut pipeline = Pipeline::new(format!("upload {} file(s)", files.len()))
            .with_step_timeout(self.step_timeout);

        for file in files {
            let file = Arc::new(file);
            pipeline.push(Box::new(step_async(
                file.name.clone(),
                move |batch: &mut UploadBatch| {
                    let file = Arc::clone(&file);
                    Box::pin(async move {
                        match batch
                            .service
                            .add_attachment(&batch.list, batch.item_id, &file.name, &file.content)
                            .await
                        {
                            Ok(attachment) => {
                                let payload = json!({ "name": attachment.name, "uri": attachment.uri });
                                batch.uploaded.push(attachment);
                                StepOutcome::advance_with(format!("Uploaded {}", file.name))
                                    .with_payload(payload)
                            }
                            Err(e) => StepOutcome::fail(format!("Failed to upload {}: {}", file.name, e)),
                        }
                    })
                },
            )));
        }

        let mut batch = UploadBatch {
            service: Arc::clone(&self.service),
            list: self.list.clone(),
            item_id,
            uploaded: Vec::new(),
        };
        let state = pipeline.run(&mut batch).await;
        let failure = match state {
            PipelineState::HaltedFailure => pipeline.last_outcome().map(|o| o.message().to_string()),
            _ => None,
        };

        info!(
            list = %self.list,
            item_id,
            uploaded = batch.uploaded.len(),
            state = %state,
            "Attachment batch finished"
        );
        UploadReport {
            state,
            uploaded: batch.uploaded,
            failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use listform_client::MockListService;

    fn attachment(name: &str) -> Attachment {
        Attachment::new(name, format!("http://mock/att/{}", name))
    }

    #[test]
    fn test_clean_file_name() {
        assert_eq!(clean_file_name("Q3 report (final)!.pdf"), "Q3reportfinal.pdf");
        assert_eq!(clean_file_name("site_plan-v2.dwg.zip"), "site_plan-v2.dwg.zip");
    }

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("plan.docx"), Some(("plan", "docx")));
        assert_eq!(split_extension("archive.tar.gz"), Some(("archive.tar", "gz")));
        assert_eq!(split_extension("README"), None);
        assert_eq!(split_extension("data.parquet"), None);
    }

    #[test]
    fn test_unique_file_name() {
        let taken = vec!["plan.pdf".to_string(), "Plan-1.PDF".to_string()];
        assert_eq!(unique_file_name("notes.txt", &taken), "notes.txt");
        assert_eq!(unique_file_name("PLAN.pdf", &taken), "PLAN-2.pdf");
    }

    #[test]
    fn test_prepare_files() {
        let config = FormConfig::for_list("Work Orders");
        let existing = vec![attachment("plan.pdf")];

        let prepared = prepare_files(
            vec![
                PendingFile::new("plan.pdf", b"a".to_vec()),
                PendingFile::new("my photo.jpg", b"b".to_vec()),
                PendingFile::new("plan.pdf", b"c".to_vec()),
            ],
            &existing,
            &config,
        )
        .unwrap();

        let names: Vec<&str> = prepared.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["plan-1.pdf", "myphoto.jpg", "plan-2.pdf"]);

        let rejected = prepare_files(vec![PendingFile::new("setup.exe", b"x".to_vec())], &[], &config);
        assert!(matches!(rejected, Err(FormError::Attachment(_))));
    }

    #[tokio::test]
    async fn test_uploads_are_sequential() {
        let service = Arc::new(MockListService::new().with_latency(Duration::from_millis(15)));
        let uploader = AttachmentUploader::new(service.clone(), "Work Orders");

        let report = uploader
            .upload(
                4,
                vec![
                    PendingFile::new("a.txt", b"one".to_vec()),
                    PendingFile::new("b.txt", b"two".to_vec()),
                    PendingFile::new("c.txt", b"three".to_vec()),
                ],
            )
            .await;

        assert!(report.is_complete());
        assert_eq!(report.uploaded.len(), 3);
        assert_eq!(service.max_in_flight(), 1);

        let uploads: Vec<String> = service.uploads().into_iter().map(|(_, name, _)| name).collect();
        assert_eq!(uploads, vec!["a.txt", "b.txt", "c.txt"]);
    }

    #[tokio::test]
    async fn test_failed_upload_halts_batch() {
        let service = Arc::new(MockListService::new().with_failing_file("b.txt"));
        let uploader = AttachmentUploader::new(service.clone(), "Work Orders");

        let report = uploader
            .upload(
                4,
                vec![
                    PendingFile::new("a.txt", b"one".to_vec()),
                    PendingFile::new("b.txt", b"two".to_vec()),
                    PendingFile::new("c.txt", b"three".to_vec()),
                ],
            )
            .await;

        assert_eq!(report.state, PipelineState::HaltedFailure);
        assert_eq!(report.uploaded, vec![service_attachment("a.txt")]);
        assert!(report.failure.unwrap().starts_with("Failed to upload b.txt"));
        assert_eq!(service.uploads().len(), 1);
    }

    fn service_attachment(name: &str) -> Attachment {
        Attachment::new(
            name,
            format!(
                "http://mock/_vti_bin/listdata.svc/Attachments(EntitySet='Work Orders',ItemId=4,Name='{}')",
                name
            ),
        )
    }
}
