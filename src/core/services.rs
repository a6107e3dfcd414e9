//! The production build path is out of scope for this crate; kept as a
//! thin stub so the CLI's `build` subcommand has something real to call
//! instead of silently doing nothing.

use crate::utils::errors::SprigError;
use crate::utils::Result;
use std::path::PathBuf;

pub struct BuildStub;

impl BuildStub {
    pub fn new() -> Self {
        Self
    }

    /// Always fails: there is no production bundler behind this entry point.
    pub async fn build(&self, _root: &PathBuf) -> Result<()> {
        Err(SprigError::Other(
            "production build is not implemented by this tool; run `sprig dev` for the \
             development server"
                .to_string(),
        ))
    }
}

impl Default for BuildStub {
    fn default() -> Self {
        Self::new()
    }
}
