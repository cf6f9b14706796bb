//! In-memory object store used by tests.
//!
//! Records every call in order and can be told to fail a given part number,
//! every single put, or the probe. Puts and parts can be slowed down, and the
//! highest number of puts seen running at once is tracked.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::object_store::{ObjectStore, PartToken};
use crate::error_handling::types::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Put {
        key: String,
        len: usize,
        content_type: String,
    },
    Create {
        key: String,
        content_type: String,
    },
    Part {
        upload_id: String,
        part_number: i32,
        len: usize,
    },
    Complete {
        upload_id: String,
        parts: Vec<PartToken>,
    },
    Abort {
        upload_id: String,
    },
    Probe,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    pub calls: Mutex<Vec<StoreCall>>,
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
    pending: Mutex<HashMap<String, (String, Vec<(i32, Vec<u8>)>)>>,
    next_upload: AtomicU32,
    pub fail_part: Option<i32>,
    pub fail_puts: bool,
    pub fail_probe: bool,
    pub put_delay: Option<Duration>,
    pub part_delay: Option<Duration>,
    puts_running: AtomicUsize,
    max_puts_running: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_part(part_number: i32) -> Self {
        Self {
            fail_part: Some(part_number),
            ..Self::default()
        }
    }

    pub fn failing_puts() -> Self {
        Self {
            fail_puts: true,
            ..Self::default()
        }
    }

    pub fn failing_probe() -> Self {
        Self {
            fail_probe: true,
            ..Self::default()
        }
    }

    /// Every single put waits `delay` before it is acknowledged.
    pub fn with_put_delay(mut self, delay: Duration) -> Self {
        self.put_delay = Some(delay);
        self
    }

    /// Every part upload waits `delay` before it is recorded.
    pub fn with_part_delay(mut self, delay: Duration) -> Self {
        self.part_delay = Some(delay);
        self
    }

    /// Highest number of single puts that were in progress at the same time.
    pub fn max_concurrent_puts(&self) -> usize {
        self.max_puts_running.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_object(
        &self,
        key: &str,
        path: &Path,
        length: u64,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let running = self.puts_running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_puts_running.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.put_delay {
            tokio::time::sleep(delay).await;
        }
        self.puts_running.fetch_sub(1, Ordering::SeqCst);

        let mut body = tokio::fs::read(path)
            .await
            .map_err(|e| StoreError::RequestFailed(format!("read {}: {}", path.display(), e)))?;
        if (body.len() as u64) < length {
            return Err(StoreError::RequestFailed(format!(
                "{} is shorter than {} bytes",
                path.display(),
                length
            )));
        }
        body.truncate(length as usize);
        self.record(StoreCall::Put {
            key: key.to_string(),
            len: body.len(),
            content_type: content_type.to_string(),
        });
        if self.fail_puts {
            return Err(StoreError::RequestFailed(format!("put {} refused", key)));
        }
        self.objects.lock().unwrap().insert(key.to_string(), body);
        Ok(())
    }

    async fn create_multipart(&self, key: &str, content_type: &str) -> Result<String, StoreError> {
        self.record(StoreCall::Create {
            key: key.to_string(),
            content_type: content_type.to_string(),
        });
        let upload_id = format!("upload-{}", self.next_upload.fetch_add(1, Ordering::SeqCst));
        self.pending
            .lock()
            .unwrap()
            .insert(upload_id.clone(), (key.to_string(), Vec::new()));
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<PartToken, StoreError> {
        if let Some(delay) = self.part_delay {
            tokio::time::sleep(delay).await;
        }
        self.record(StoreCall::Part {
            upload_id: upload_id.to_string(),
            part_number,
            len: body.len(),
        });
        if self.fail_part == Some(part_number) {
            return Err(StoreError::RequestFailed(format!(
                "part {} refused",
                part_number
            )));
        }
        let mut pending = self.pending.lock().unwrap();
        let entry = pending
            .get_mut(upload_id)
            .ok_or_else(|| StoreError::MissingUploadId(upload_id.to_string()))?;
        entry.1.push((part_number, body));
        Ok(PartToken {
            part_number,
            etag: format!("etag-{}-{}", upload_id, part_number),
        })
    }

    async fn complete_multipart(
        &self,
        _key: &str,
        upload_id: &str,
        parts: &[PartToken],
    ) -> Result<(), StoreError> {
        self.record(StoreCall::Complete {
            upload_id: upload_id.to_string(),
            parts: parts.to_vec(),
        });
        let (key, mut uploaded) = self
            .pending
            .lock()
            .unwrap()
            .remove(upload_id)
            .ok_or_else(|| StoreError::MissingUploadId(upload_id.to_string()))?;
        uploaded.sort_by_key(|(n, _)| *n);
        let body: Vec<u8> = uploaded.into_iter().flat_map(|(_, data)| data).collect();
        self.objects.lock().unwrap().insert(key, body);
        Ok(())
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> Result<(), StoreError> {
        self.record(StoreCall::Abort {
            upload_id: upload_id.to_string(),
        });
        self.pending.lock().unwrap().remove(upload_id);
        Ok(())
    }

    async fn probe(&self) -> Result<(), StoreError> {
        self.record(StoreCall::Probe);
        if self.fail_probe {
            return Err(StoreError::RequestFailed("bucket not reachable".into()));
        }
        Ok(())
    }
}
