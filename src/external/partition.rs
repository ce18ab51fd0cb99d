//! Hash-based corpus partitioning
//!
//! A test lands in shard `sha256(category, id) mod total + 1`, so the same
//! `(index, total)` always selects the same tests regardless of corpus
//! file order.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, warn};

use super::Partitioner;
use crate::config::CorpusConfig;
use crate::models::{Category, ShardSpec, TestId};

/// Test IDs of both categories
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TestCorpus {
    broad: Vec<TestId>,
    legacy: Vec<TestId>,
}

impl TestCorpus {
    pub fn new<B, L>(broad: B, legacy: L) -> Self
    where
        B: IntoIterator,
        B::Item: Into<TestId>,
        L: IntoIterator,
        L::Item: Into<TestId>,
    {
        Self {
            broad: normalize(broad.into_iter().map(Into::into)),
            legacy: normalize(legacy.into_iter().map(Into::into)),
        }
    }

    /// Load corpus files; a missing file yields an empty category
    pub fn load(config: &CorpusConfig) -> Result<Self> {
        Ok(Self::new(
            load_category(config.path(Category::Broad), Category::Broad)?,
            load_category(config.path(Category::Legacy), Category::Legacy)?,
        ))
    }

    /// Parse one test ID per line, skipping blanks and `#` comments
    pub fn parse(content: &str) -> Vec<TestId> {
        normalize(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        )
    }

    pub fn tests(&self, category: Category) -> &[TestId] {
        match category {
            Category::Broad => &self.broad,
            Category::Legacy => &self.legacy,
        }
    }
}

fn normalize(ids: impl Iterator<Item = TestId>) -> Vec<TestId> {
    ids.collect::<BTreeSet<_>>().into_iter().collect()
}

fn load_category(path: &Path, category: Category) -> Result<Vec<TestId>> {
    if !path.exists() {
        warn!(
            "No {} corpus at {}, shards receive an empty test list",
            category,
            path.display()
        );
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {category} corpus: {}", path.display()))?;
    let tests = TestCorpus::parse(&content);
    debug!("Loaded {} {} tests from {}", tests.len(), category, path.display());
    Ok(tests)
}

/// Assigns tests to shards by a stable hash of their ID
#[derive(Clone, Debug)]
pub struct HashPartitioner {
    corpus: TestCorpus,
}

impl HashPartitioner {
    pub fn new(corpus: TestCorpus) -> Self {
        Self { corpus }
    }

    /// Zero-based bucket of a test for a given shard total
    pub fn bucket(category: Category, test_id: &str, total: u32) -> u32 {
        let mut hasher = Sha256::new();
        hasher.update(category.name().as_bytes());
        hasher.update([0u8]);
        hasher.update(test_id.as_bytes());
        let digest = hasher.finalize();

        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(prefix) % u64::from(total.max(1))) as u32
    }
}

impl Partitioner for HashPartitioner {
    fn select(&self, spec: &ShardSpec) -> Vec<TestId> {
        let bucket = spec.index() - 1;
        self.corpus
            .tests(spec.category())
            .iter()
            .filter(|id| Self::bucket(spec.category(), id, spec.total()) == bucket)
            .cloned()
            .collect()
    }
}
