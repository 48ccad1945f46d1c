use std::path::{Path, PathBuf};

pub const STACK_FILE: &str = "stackrig.toml";
pub const DATA_DIR: &str = ".stackrig";

/// Walk up the directory tree from `start`, checking for `filename` at each level.
pub fn find_config(start: &Path, filename: &str) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        let candidate = current.join(filename);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Resolve the project root and the stack file:
///
/// - file: `-f` (must exist), else `<root>/stackrig.toml` when present.
/// - root: `--root`, else the directory holding the stack file (explicit or
///   the nearest one above the working directory), else the working directory.
pub fn resolve_root(
    cli_file: Option<&Path>,
    cli_root: Option<&Path>,
) -> anyhow::Result<(PathBuf, Option<PathBuf>)> {
    let cwd = std::env::current_dir()?;

    let file = match cli_file {
        Some(path) if path.is_file() => Some(path.canonicalize()?),
        Some(path) => anyhow::bail!("Config file not found: {}", path.display()),
        None => None,
    };

    let root = match cli_root {
        Some(root) => {
            if !root.is_dir() {
                anyhow::bail!("Root directory not found: {}", root.display());
            }
            root.canonicalize()?
        }
        None => {
            let anchor = file.clone().or_else(|| find_config(&cwd, STACK_FILE));
            anchor
                .as_deref()
                .and_then(Path::parent)
                .map(Path::to_path_buf)
                .unwrap_or(cwd)
        }
    };

    let file = file.or_else(|| Some(root.join(STACK_FILE)).filter(|p| p.is_file()));
    Ok((root, file))
}

/// `--data-dir` (relative to the working directory), else `data_dir` from the
/// stack file (relative to root), else `<root>/.stackrig`.
pub fn resolve_data_dir(
    cli_data_dir: Option<&Path>,
    file_data_dir: Option<&str>,
    root: &Path,
) -> anyhow::Result<PathBuf> {
    Ok(match (cli_data_dir, file_data_dir) {
        (Some(dir), _) => absolutize(
            &crate::platform::expand_home(&dir.to_string_lossy()),
            &std::env::current_dir()?,
        ),
        (None, Some(dir)) => absolutize(&crate::platform::expand_home(dir), root),
        (None, None) => root.join(DATA_DIR),
    })
}

fn absolutize(path: &str, base: &Path) -> PathBuf {
    let path = PathBuf::from(path);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}
