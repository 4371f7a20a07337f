use std::collections::BTreeMap;
use std::path::PathBuf;

use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::{PollError, Result};

/// One browser-like header set: header name -> value.
pub type HeaderSet = BTreeMap<String, String>;

#[derive(Debug, Clone)]
enum Source {
    /// Re-read on every pick so the file can be edited while running.
    File(PathBuf),
    Fixed(Vec<HeaderSet>),
}

/// Pool of request header sets. Each request gets one chosen uniformly at random.
#[derive(Debug, Clone)]
pub struct HeaderPool {
    source: Source,
}

impl HeaderPool {
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: Source::File(path.into()),
        }
    }

    pub fn fixed(sets: Vec<HeaderSet>) -> Self {
        Self {
            source: Source::Fixed(sets),
        }
    }

    fn load(&self) -> Result<Vec<HeaderSet>> {
        match &self.source {
            Source::Fixed(sets) => Ok(sets.clone()),
            Source::File(path) => {
                let bytes = std::fs::read(path).map_err(|e| {
                    PollError::HeaderPool(format!("read {}: {e}", path.display()))
                })?;
                serde_json::from_slice(&bytes).map_err(|e| {
                    PollError::HeaderPool(format!("parse {}: {e}", path.display()))
                })
            }
        }
    }

    /// Pick a random header set and convert it for use on a request.
    pub fn pick(&self) -> Result<HeaderMap> {
        let sets = self.load()?;
        let set = sets
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| PollError::HeaderPool("pool is empty".into()))?;
        to_header_map(set)
    }
}

fn to_header_map(set: &HeaderSet) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(set.len());
    for (name, value) in set {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| PollError::HeaderPool(format!("bad header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| PollError::HeaderPool(format!("bad value for {name}: {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}
