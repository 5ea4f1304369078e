//! Upload strategies
//!
//! How the pending objects of a layer are split into requests.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::api::Capabilities;
use crate::error::{Result, SyncError};

/// Default number of objects per request in chunked mode
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Partitioning of the pending objects into requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum UploadStrategy {
    /// All objects in one request
    SingleRequest,
    /// Requests of at most `chunk_size` objects
    Chunked { chunk_size: usize },
    /// One request per object
    PerObject,
}

impl Default for UploadStrategy {
    fn default() -> Self {
        UploadStrategy::Chunked {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl UploadStrategy {
    /// Size of the next request when `remaining` objects are pending
    pub fn batch_len(&self, remaining: usize) -> usize {
        match self {
            UploadStrategy::SingleRequest => remaining,
            UploadStrategy::Chunked { chunk_size } => remaining.min((*chunk_size).max(1)),
            UploadStrategy::PerObject => remaining.min(1),
        }
    }

    /// Number of requests needed for `count` objects
    pub fn num_requests(&self, count: usize) -> usize {
        if count == 0 {
            return 0;
        }
        match self {
            UploadStrategy::SingleRequest => 1,
            UploadStrategy::Chunked { chunk_size } => count.div_ceil((*chunk_size).max(1)),
            UploadStrategy::PerObject => count,
        }
    }

    /// Split `items` into consecutive batches
    pub fn partition<T: Clone>(&self, items: &[T]) -> Vec<Vec<T>> {
        let mut batches = Vec::with_capacity(self.num_requests(items.len()));
        let mut rest = items;
        while !rest.is_empty() {
            let (batch, tail) = rest.split_at(self.batch_len(rest.len()));
            batches.push(batch.to_vec());
            rest = tail;
        }
        batches
    }
}

impl fmt::Display for UploadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadStrategy::SingleRequest => write!(f, "single request"),
            UploadStrategy::Chunked { chunk_size } => write!(f, "chunked ({})", chunk_size),
            UploadStrategy::PerObject => write!(f, "one request per object"),
        }
    }
}

/// Strategy plus what to do with the changeset afterwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadStrategySpecification {
    pub strategy: UploadStrategy,
    pub close_changeset_after_upload: bool,
}

impl Default for UploadStrategySpecification {
    fn default() -> Self {
        Self {
            strategy: UploadStrategy::default(),
            close_changeset_after_upload: true,
        }
    }
}

impl UploadStrategySpecification {
    pub fn new(strategy: UploadStrategy, close_changeset_after_upload: bool) -> Self {
        Self {
            strategy,
            close_changeset_after_upload,
        }
    }

    /// Check the strategy against the number of objects and the server limits
    pub fn validate(&self, count: usize, capabilities: Capabilities) -> Result<()> {
        match self.strategy {
            UploadStrategy::Chunked { chunk_size } if chunk_size == 0 => {
                Err(SyncError::InvalidStrategy {
                    reason: "chunk size must be at least 1".to_string(),
                })
            }
            UploadStrategy::Chunked { chunk_size } => match capabilities.max_changeset_size {
                Some(max) if chunk_size > max => Err(SyncError::InvalidStrategy {
                    reason: format!(
                        "chunk size {} exceeds the server limit of {} objects per changeset",
                        chunk_size, max
                    ),
                }),
                _ => Ok(()),
            },
            UploadStrategy::SingleRequest => match capabilities.max_changeset_size {
                Some(max) if count > max => Err(SyncError::InvalidStrategy {
                    reason: format!(
                        "{} objects do not fit into a single request (server limit {})",
                        count, max
                    ),
                }),
                _ => Ok(()),
            },
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(UploadStrategy::SingleRequest, 250, 1 ; "single request")]
    #[test_case(UploadStrategy::Chunked { chunk_size: 100 }, 250, 3 ; "chunked with remainder")]
    #[test_case(UploadStrategy::Chunked { chunk_size: 50 }, 100, 2 ; "chunked exact")]
    #[test_case(UploadStrategy::PerObject, 7, 7 ; "per object")]
    #[test_case(UploadStrategy::Chunked { chunk_size: 10 }, 0, 0 ; "nothing to upload")]
    fn test_num_requests(strategy: UploadStrategy, count: usize, expected: usize) {
        assert_eq!(strategy.num_requests(count), expected);
        let items: Vec<usize> = (0..count).collect();
        assert_eq!(strategy.partition(&items).len(), expected);
    }

    #[test]
    fn test_partition_keeps_order_without_duplicates() {
        let items: Vec<u32> = (0..23).collect();
        let batches = UploadStrategy::Chunked { chunk_size: 10 }.partition(&items);
        assert_eq!(
            batches.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![10, 10, 3]
        );
        let flattened: Vec<u32> = batches.into_iter().flatten().collect();
        assert_eq!(flattened, items);
    }

    #[test]
    fn test_validate_rejects_zero_chunk_size() {
        let spec = UploadStrategySpecification::new(UploadStrategy::Chunked { chunk_size: 0 }, true);
        let err = spec.validate(10, Capabilities::default()).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_STRATEGY");
    }

    #[test]
    fn test_validate_single_request_against_server_limit() {
        let spec = UploadStrategySpecification::new(UploadStrategy::SingleRequest, false);
        let limit = Capabilities {
            max_changeset_size: Some(100),
        };
        assert!(spec.validate(100, limit).is_ok());
        assert!(spec.validate(101, limit).is_err());
        assert!(spec.validate(5000, Capabilities::default()).is_ok());
    }

    #[test]
    fn test_validate_chunk_size_against_server_limit() {
        let limit = Capabilities {
            max_changeset_size: Some(100),
        };
        let fits = UploadStrategySpecification::new(UploadStrategy::Chunked { chunk_size: 100 }, true);
        let too_big = UploadStrategySpecification::new(UploadStrategy::Chunked { chunk_size: 101 }, true);
        assert!(fits.validate(5000, limit).is_ok());
        assert_eq!(
            too_big.validate(5000, limit).unwrap_err().error_code(),
            "INVALID_STRATEGY"
        );
        assert!(too_big.validate(5000, Capabilities::default()).is_ok());
    }

    #[test]
    fn test_strategy_serialization() {
        let json = serde_json::to_string(&UploadStrategy::Chunked { chunk_size: 5 }).unwrap();
        assert_eq!(json, r#"{"mode":"chunked","chunk_size":5}"#);
        let parsed: UploadStrategy = serde_json::from_str(r#"{"mode":"per_object"}"#).unwrap();
        assert_eq!(parsed, UploadStrategy::PerObject);
    }
}
