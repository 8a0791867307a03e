pub mod common;
pub mod monitor;
pub mod resolve;

#[cfg(test)]
pub(crate) mod tests;

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

pub type Error = crate::common::error::FarlaunchError;
pub type Result<T> = std::result::Result<T, Error>;

pub use common::{Map, Set};

/// Identifier of a submitted job, as known to the job store.
#[derive(
    Debug, Default, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct JobId(u64);

impl JobId {
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[inline]
    pub fn as_num(&self) -> u64 {
        self.0
    }
}

impl From<u64> for JobId {
    #[inline]
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

pub const FARLAUNCH_VERSION: &str = {
    match option_env!("FARLAUNCH_BUILD_VERSION") {
        Some(version) => version,
        None => const_format::concatcp!(env!("CARGO_PKG_VERSION"), "-dev"),
    }
};
