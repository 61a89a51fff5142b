#![allow(dead_code)]

use std::env::consts::{DLL_EXTENSION, DLL_PREFIX};
use std::fs;
use std::path::{Path, PathBuf};

const SERIAL_DRIVER_LIB: &str = "serial_driver";

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// `target/<profile>` of the running test binary (`target/<profile>/deps/<test>`)
fn profile_dir() -> PathBuf {
    let exe = std::env::current_exe().expect("Failed to locate test binary");
    exe.parent()
        .and_then(Path::parent)
        .expect("Test binary outside target/<profile>/deps")
        .to_path_buf()
}

/// Path of the serial-driver library built alongside the tests.
pub fn serial_driver_library() -> PathBuf {
    let profile = profile_dir();
    let file_name = format!("{}{}.{}", DLL_PREFIX, SERIAL_DRIVER_LIB, DLL_EXTENSION);
    let candidates = [profile.join(&file_name), profile.join("deps").join(&file_name)];
    if let Some(found) = candidates.iter().find(|p| p.is_file()) {
        return found.clone();
    }
    // Dependency artifacts may carry a metadata hash: libserial_driver-<hash>.so
    let hashed_prefix = format!("{}{}-", DLL_PREFIX, SERIAL_DRIVER_LIB);
    let suffix = format!(".{}", DLL_EXTENSION);
    if let Ok(entries) = fs::read_dir(profile.join("deps")) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&hashed_prefix) && name.ends_with(&suffix) {
                return entry.path();
            }
        }
    }

    panic!(
        "{} not found under {}; it is built as a dev-dependency of this crate",
        file_name,
        profile.display()
    )
}

/// Install the serial-driver plugin under `root/serial-driver`, with the
/// library renamed to the default `plugin.<ext>` entry.
pub fn install_serial_driver(root: &Path) -> PathBuf {
    let dir = root.join("serial-driver");
    fs::create_dir_all(&dir).unwrap();
    fs::copy(
        workspace_root().join("plugins/examples/serial-driver/plugin.json"),
        dir.join("plugin.json"),
    )
    .unwrap();
    fs::copy(serial_driver_library(), dir.join(format!("plugin.{}", DLL_EXTENSION))).unwrap();
    dir
}
