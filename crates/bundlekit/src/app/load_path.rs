//! Script search paths handed to the engine.

use std::path::Path;

use crate::app::discovery::LIB_DIRECTORY;
use crate::app::scope::absolute;

/// Load paths for every script of the bundle at `bundle_dir`: the engine's builtins, then the
/// bundle's own `lib` directory.
pub fn load_paths_for(builtins: &str, bundle_dir: &Path) -> Vec<String> {
    vec![
        builtins.to_owned(),
        absolute(bundle_dir)
            .join(LIB_DIRECTORY)
            .display()
            .to_string(),
    ]
}
