pub mod process;
pub mod types;

use crate::error::ToolError;
use std::path::Path;

pub use process::ProcessRunner;
pub use types::{Chosen, Step, Tool};

/// Runs one tool chain on one input file, producing one output file.
///
/// Implementations are shared by every in-flight page, hence `Sync`.
pub trait ToolRunner: Sync {
    /// Returns the byte size of `output` on success.
    fn run(&self, tool: Tool, input: &Path, output: &Path) -> Result<u64, ToolError>;
}

impl<T: ToolRunner + ?Sized> ToolRunner for &T {
    fn run(&self, tool: Tool, input: &Path, output: &Path) -> Result<u64, ToolError> {
        (**self).run(tool, input, output)
    }
}
