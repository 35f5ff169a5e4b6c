#![allow(dead_code)]

use std::path::Path;

use ciflow::config::{RawWorkflowFile, Workflow};

pub use ciflow_test_utils::{init_tracing, with_timeout};

/// Parse and validate an inline TOML workflow.
pub fn workflow(src: &str) -> Workflow {
    let raw: RawWorkflowFile = toml::from_str(src).expect("valid TOML");
    Workflow::try_from(raw).expect("valid workflow")
}

/// Write `contents` to `dir/name`, creating parent directories.
pub fn write_file(dir: &Path, name: &str, contents: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dirs");
    }
    std::fs::write(path, contents).expect("write file");
}
