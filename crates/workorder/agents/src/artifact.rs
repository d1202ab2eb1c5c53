//! Output artifact generation
//!
//! The terminal node asks this collaborator to render the output documents
//! agents requested (spreadsheets, reports) and records the resulting
//! descriptors on the work order. Rendering itself lives behind the trait;
//! the engine only cares that a re-issued request with the same idempotency
//! key does not produce a second copy.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use workorder_types::{ArtifactDescriptor, IdempotencyKey, TenantId, WorkOrderId};

/// One artifact rendering request
#[derive(Clone, Debug)]
pub struct ArtifactRequest {
    pub work_order_id: WorkOrderId,
    pub tenant_id: TenantId,
    /// Artifact kind to render, e.g. "xlsx", "pdf"
    pub kind: String,
    /// Deduplicates rendering across re-issues of the terminal node
    pub idempotency_key: IdempotencyKey,
}

/// Failures the artifact generator can surface
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Artifact kind '{kind}' is not supported")]
    Unsupported { kind: String },

    #[error("Artifact backend unavailable: {reason}")]
    Unavailable { reason: String },
}

impl ArtifactError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ArtifactError::Unavailable { .. })
    }
}

/// Renders output documents and reports where they landed
#[async_trait]
pub trait ArtifactGenerator: Send + Sync {
    /// Render one artifact. Re-issuing with the same key and kind must
    /// return the descriptor of the already-rendered artifact.
    async fn generate(&self, request: ArtifactRequest) -> Result<ArtifactDescriptor, ArtifactError>;
}

/// In-memory generator for tests: deterministic descriptors, observable
/// render counts, and per-key memoization.
pub struct MockArtifactGenerator {
    rendered: Mutex<HashMap<(String, String), ArtifactDescriptor>>,
    render_count: Mutex<u32>,
    unsupported: Vec<String>,
    /// Transient failures to emit before rendering succeeds
    transient_failures: Mutex<u32>,
}

impl MockArtifactGenerator {
    pub fn new() -> Self {
        Self {
            rendered: Mutex::new(HashMap::new()),
            render_count: Mutex::new(0),
            unsupported: Vec::new(),
            transient_failures: Mutex::new(0),
        }
    }

    /// Reject this artifact kind as unsupported
    pub fn with_unsupported(mut self, kind: impl Into<String>) -> Self {
        self.unsupported.push(kind.into());
        self
    }

    /// Fail transiently `n` times before rendering anything
    pub fn with_transient_failures(self, n: u32) -> Self {
        *self.transient_failures.lock().unwrap() = n;
        self
    }

    /// Renders performed, excluding memoized re-issues
    pub fn render_count(&self) -> u32 {
        *self.render_count.lock().unwrap()
    }
}

impl Default for MockArtifactGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactGenerator for MockArtifactGenerator {
    async fn generate(&self, request: ArtifactRequest) -> Result<ArtifactDescriptor, ArtifactError> {
        let memo_key = (request.idempotency_key.to_string(), request.kind.clone());

        if let Some(existing) = self.rendered.lock().unwrap().get(&memo_key) {
            return Ok(existing.clone());
        }

        if self.unsupported.contains(&request.kind) {
            return Err(ArtifactError::Unsupported { kind: request.kind });
        }

        {
            let mut remaining = self.transient_failures.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ArtifactError::Unavailable {
                    reason: "render backend busy".into(),
                });
            }
        }

        let descriptor = ArtifactDescriptor {
            kind: request.kind.clone(),
            location: format!(
                "memory://{}/{}/{}.{}",
                request.tenant_id, request.work_order_id, request.idempotency_key.retry_count,
                request.kind
            ),
            checksum: format!("{:016x}", fingerprint(&memo_key.0, &memo_key.1)),
            size_bytes: 4096,
        };

        *self.render_count.lock().unwrap() += 1;
        self.rendered
            .lock()
            .unwrap()
            .insert(memo_key, descriptor.clone());
        Ok(descriptor)
    }
}

/// FNV-1a over the memo key, stable across runs
fn fingerprint(key: &str, kind: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in key.bytes().chain(kind.bytes()) {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use workorder_types::Stage;

    fn make_request(kind: &str) -> ArtifactRequest {
        ArtifactRequest {
            work_order_id: WorkOrderId::new("wo-1"),
            tenant_id: TenantId::new("acme"),
            kind: kind.into(),
            idempotency_key: IdempotencyKey::new(
                WorkOrderId::new("wo-1"),
                Stage::ArtifactGeneration,
                0,
            ),
        }
    }

    #[tokio::test]
    async fn test_render_and_descriptor_shape() {
        let generator = MockArtifactGenerator::new();
        let descriptor = generator.generate(make_request("xlsx")).await.unwrap();
        assert_eq!(descriptor.kind, "xlsx");
        assert!(descriptor.location.contains("acme"));
        assert_eq!(generator.render_count(), 1);
    }

    #[tokio::test]
    async fn test_same_key_renders_once() {
        let generator = MockArtifactGenerator::new();
        let first = generator.generate(make_request("xlsx")).await.unwrap();
        let second = generator.generate(make_request("xlsx")).await.unwrap();
        assert_eq!(first.checksum, second.checksum);
        assert_eq!(generator.render_count(), 1);
    }

    #[tokio::test]
    async fn test_distinct_kinds_render_separately() {
        let generator = MockArtifactGenerator::new();
        generator.generate(make_request("xlsx")).await.unwrap();
        generator.generate(make_request("pdf")).await.unwrap();
        assert_eq!(generator.render_count(), 2);
    }

    #[tokio::test]
    async fn test_unsupported_kind() {
        let generator = MockArtifactGenerator::new().with_unsupported("docx");
        let err = generator.generate(make_request("docx")).await.unwrap_err();
        assert!(matches!(err, ArtifactError::Unsupported { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let generator = MockArtifactGenerator::new().with_transient_failures(1);
        let err = generator.generate(make_request("xlsx")).await.unwrap_err();
        assert!(err.is_transient());
        generator.generate(make_request("xlsx")).await.unwrap();
        assert_eq!(generator.render_count(), 1);
    }
}
