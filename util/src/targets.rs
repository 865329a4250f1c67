use std::fs;
use std::path::Path;

use rand::Rng;

use crate::Error;

/// The URLs requests are sent to. Never empty; fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSet {
    urls: Vec<String>,
}

impl TargetSet {
    pub fn new(urls: Vec<String>) -> Result<Self, Error> {
        if urls.is_empty() {
            return Err(Error::NoTargetsLoaded);
        }
        Ok(TargetSet { urls })
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.urls
    }

    /// Pick one URL uniformly at random.
    pub fn choose<R: Rng>(&self, rng: &mut R) -> &str {
        &self.urls[rng.gen_range(0..self.urls.len())]
    }
}

/// One URL per line, trimmed. Blank lines are dropped, order is kept.
///
/// Lines are not validated as URLs; a bad one fails at request time.
pub fn parse_targets(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

/// Read the target list from `path`.
pub fn load_targets(path: &Path) -> Result<TargetSet, Error> {
    let text = fs::read_to_string(path).map_err(|source| Error::ReadTargets {
        path: path.to_path_buf(),
        source,
    })?;

    TargetSet::new(parse_targets(&text))
}
