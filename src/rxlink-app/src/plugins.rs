// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Startup-time loading of backend plugins.
//!
//! A plugin is a shared library exporting `rxlink_register_backend`, which
//! receives a pointer to the server's backend registration table. A plugin
//! may also export `rxlink_backend_abi() -> u32`; libraries reporting a
//! different ABI version are skipped. The returned [`PluginSet`] must outlive
//! every device the plugins built.

use std::ffi::{c_void, OsStr};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use libloading::{Library, Symbol};
use tracing::{debug, warn};

/// Version of the registration table layout handed to plugins.
pub const BACKEND_ABI_VERSION: u32 = 1;

const PLUGIN_ENV: &str = "RXLINK_PLUGIN_DIRS";
const REGISTER_SYMBOL: &[u8] = b"rxlink_register_backend";
const ABI_SYMBOL: &[u8] = b"rxlink_backend_abi";

#[cfg(windows)]
const PATH_SEPARATOR: char = ';';
#[cfg(not(windows))]
const PATH_SEPARATOR: char = ':';

#[cfg(windows)]
const PLUGIN_EXTENSION: &str = "dll";
#[cfg(target_os = "macos")]
const PLUGIN_EXTENSION: &str = "dylib";
#[cfg(all(unix, not(target_os = "macos")))]
const PLUGIN_EXTENSION: &str = "so";

/// Libraries that registered backends, kept loaded for the process lifetime.
#[derive(Default)]
pub struct PluginSet {
    loaded: Vec<(PathBuf, Library)>,
}

impl PluginSet {
    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.loaded.iter().map(|(path, _)| path.as_path())
    }
}

/// Scan the plugin directories and let each library register its backends
/// into `registry`.
pub fn load_backend_plugins(registry: NonNull<c_void>) -> PluginSet {
    let mut set = PluginSet::default();
    let dirs = plugin_dirs(std::env::var(PLUGIN_ENV).ok().as_deref(), dirs::config_dir());
    debug!("Plugin directories: {:?}", dirs);

    for dir in dirs {
        let candidates = match plugin_candidates(&dir) {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!("Cannot scan plugin directory {}: {}", dir.display(), err);
                continue;
            }
        };
        for path in candidates {
            match unsafe { load_one(&path, registry) } {
                Ok(lib) => {
                    debug!("Loaded backend plugin {}", path.display());
                    set.loaded.push((path, lib));
                }
                Err(err) => warn!("Skipping plugin {}: {}", path.display(), err),
            }
        }
    }
    set
}

/// # Safety
/// The library's initializers and entry points run with the caller's
/// privileges; `registry` must point at a live registration table.
unsafe fn load_one(path: &Path, registry: NonNull<c_void>) -> Result<Library, String> {
    let lib = Library::new(path).map_err(|e| e.to_string())?;

    if let Ok(abi) = lib.get::<unsafe extern "C" fn() -> u32>(ABI_SYMBOL) {
        let version = abi();
        if version != BACKEND_ABI_VERSION {
            return Err(format!(
                "ABI version {} (expected {})",
                version, BACKEND_ABI_VERSION
            ));
        }
    }

    {
        let register: Symbol<unsafe extern "C" fn(*mut c_void)> = lib
            .get(REGISTER_SYMBOL)
            .map_err(|e| format!("no rxlink_register_backend: {}", e))?;
        register(registry.as_ptr());
    }
    Ok(lib)
}

/// Plugin files in `dir`, sorted so registration order is stable. A missing
/// directory yields nothing.
fn plugin_candidates(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && has_plugin_extension(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// `RXLINK_PLUGIN_DIRS` entries first, then `./plugins` and
/// `<config dir>/rxlink/plugins`. Duplicates are dropped.
fn plugin_dirs(env_value: Option<&str>, config_dir: Option<PathBuf>) -> Vec<PathBuf> {
    let from_env = env_value
        .into_iter()
        .flat_map(|v| v.split(PATH_SEPARATOR))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from);
    let defaults = std::iter::once(PathBuf::from("plugins"))
        .chain(config_dir.map(|d| d.join("rxlink").join("plugins")));

    let mut dirs: Vec<PathBuf> = Vec::new();
    for dir in from_env.chain(defaults) {
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
    }
    dirs
}

fn has_plugin_extension(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| ext.eq_ignore_ascii_case(PLUGIN_EXTENSION))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_dirs_come_first_without_duplicates() {
        let value = format!(
            "/opt/a{sep}{sep}/opt/b{sep}plugins",
            sep = PATH_SEPARATOR
        );
        let dirs = plugin_dirs(Some(&value), Some(PathBuf::from("/home/u/.config")));
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("/opt/a"),
                PathBuf::from("/opt/b"),
                PathBuf::from("plugins"),
                PathBuf::from("/home/u/.config/rxlink/plugins"),
            ]
        );
    }

    #[test]
    fn defaults_without_env() {
        let dirs = plugin_dirs(None, None);
        assert_eq!(dirs, vec![PathBuf::from("plugins")]);
    }

    #[test]
    fn extension_filter() {
        assert!(has_plugin_extension(Path::new(&format!(
            "librtl.{}",
            PLUGIN_EXTENSION.to_uppercase()
        ))));
        assert!(!has_plugin_extension(Path::new("README.md")));
        assert!(!has_plugin_extension(Path::new("noext")));
    }

    #[test]
    fn candidates_are_sorted_and_filtered() {
        let dir = std::env::temp_dir().join(format!("rxlink-plugins-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["b", "a"] {
            std::fs::write(dir.join(format!("lib{}.{}", name, PLUGIN_EXTENSION)), b"").unwrap();
        }
        std::fs::write(dir.join("notes.txt"), b"").unwrap();

        let found = plugin_candidates(&dir).unwrap();
        let names: Vec<_> = found
            .iter()
            .filter_map(|p| p.file_stem().and_then(OsStr::to_str))
            .collect();
        assert_eq!(names, vec!["liba", "libb"]);

        std::fs::remove_dir_all(&dir).unwrap();
        assert!(plugin_candidates(&dir).unwrap().is_empty());
    }

    #[test]
    fn loading_garbage_library_fails() {
        let dir = std::env::temp_dir().join(format!("rxlink-badplugin-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("libbad.{}", PLUGIN_EXTENSION));
        std::fs::write(&path, b"not a library").unwrap();

        let mut table = 0u8;
        let registry = NonNull::from(&mut table).cast();
        assert!(unsafe { load_one(&path, registry) }.is_err());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
