use std::path::{Path, PathBuf};

/// Files that mark a directory as a stack root, in priority order.
const MARKERS: &[&str] = &["stackctl.yaml", ".env", "docker-compose.yml"];

/// Resolve the project root.
///
/// Priority:
/// 1. `--root` flag / `STACKCTL_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for each marker in turn
/// 3. Fall back to `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_root(&cwd).unwrap_or(cwd)
}

fn find_root(start: &Path) -> Option<PathBuf> {
    MARKERS.iter().find_map(|marker| {
        start
            .ancestors()
            .find(|dir| dir.join(marker).is_file())
            .map(Path::to_path_buf)
    })
}
