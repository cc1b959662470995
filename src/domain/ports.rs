use crate::utils::error::Result;
use std::io::Write;

/// Destination of export artifacts.
///
/// Artifacts are written to a staging area first and only become visible
/// under their final name through [`Storage::publish`]. Dropping a staged
/// artifact without publishing it must discard it.
pub trait Storage {
    type Staged: Write;

    fn stage(&self) -> Result<Self::Staged>;

    /// Moves a staged artifact to `name`; fails if `name` already exists.
    /// Returns the full location of the published artifact.
    fn publish(&self, staged: Self::Staged, name: &str) -> Result<String>;

    fn read_file(&self, name: &str) -> Result<Vec<u8>>;

    fn exists(&self, name: &str) -> bool;

    /// Removes a published artifact; used when the batch commit fails afterwards.
    fn remove(&self, name: &str) -> Result<()>;
}
