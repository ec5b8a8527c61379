use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{symlink, DirBuilderExt, OpenOptionsExt};
use std::path::Path;

const GIT_DIR: &str = ".git";

/// Recursively create a directory readable only by its owner.
pub fn create_private_dir(path: &Path) -> io::Result<()> {
    DirBuilder::new().recursive(true).mode(0o700).create(path)
}

/// Write an executable script (mode 0500).
pub fn write_script(path: &Path, contents: &str) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o500)
        .open(path)?;
    file.write_all(contents.as_bytes())
}

/// Copy `src` into `dst`, creating `dst` if needed. Symlinks are copied as
/// links. When `skip_git` is set, `.git` entries at any depth are left out.
/// Returns the number of files and links copied.
pub fn copy_tree(src: &Path, dst: &Path, skip_git: bool) -> io::Result<usize> {
    create_private_dir(dst)?;
    let mut count = 0;
    copy_recursive(src, dst, skip_git, &mut count)?;
    Ok(count)
}

fn copy_recursive(src: &Path, dst: &Path, skip_git: bool, count: &mut usize) -> io::Result<()> {
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        if skip_git && entry.file_name() == GIT_DIR {
            continue;
        }
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            symlink(fs::read_link(&src_path)?, &dst_path)?;
            *count += 1;
        } else if file_type.is_dir() {
            create_private_dir(&dst_path)?;
            copy_recursive(&src_path, &dst_path, skip_git, count)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
            *count += 1;
        }
    }
    Ok(())
}

/// Delete every file under `dir` whose name does not end in `suffix`.
/// Directories are kept. A missing `dir` is not an error.
pub fn prune_except_suffix(dir: &Path, suffix: &str) -> io::Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            removed += prune_except_suffix(&path, suffix)?;
        } else if !entry.file_name().to_string_lossy().ends_with(suffix) {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn copy_tree_skips_git_metadata() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join(".git/objects")).unwrap();
        fs::write(src.path().join(".git/HEAD"), "ref: refs/heads/main").unwrap();
        fs::create_dir_all(src.path().join("lib/nested")).unwrap();
        fs::write(src.path().join("main.go"), "package main").unwrap();
        fs::write(src.path().join("lib/nested/util.go"), "package nested").unwrap();
        symlink("main.go", src.path().join("link.go")).unwrap();

        let dst = tempfile::tempdir().unwrap();
        let out = dst.path().join("src");
        let count = copy_tree(src.path(), &out, true).unwrap();

        assert_eq!(count, 3);
        assert!(out.join("main.go").is_file());
        assert!(out.join("lib/nested/util.go").is_file());
        assert!(out.join("link.go").symlink_metadata().unwrap().file_type().is_symlink());
        assert!(!out.join(".git").exists());
    }

    #[test]
    fn copy_tree_keeps_git_when_asked() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join(".git")).unwrap();
        fs::write(src.path().join(".git/HEAD"), "x").unwrap();

        let dst = tempfile::tempdir().unwrap();
        copy_tree(src.path(), dst.path(), false).unwrap();
        assert!(dst.path().join(".git/HEAD").is_file());
    }

    #[test]
    fn write_script_is_executable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run");
        write_script(&path, "#!/bin/bash\n").unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o500);
        assert_eq!(fs::read_to_string(&path).unwrap(), "#!/bin/bash\n");
    }

    #[test]
    fn prune_keeps_jars_and_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        fs::create_dir_all(target.join("classes")).unwrap();
        fs::write(target.join("app.jar"), "jar").unwrap();
        fs::write(target.join("build.log"), "log").unwrap();
        fs::write(target.join("classes/Main.class"), "class").unwrap();

        assert_eq!(prune_except_suffix(&target, ".jar").unwrap(), 2);
        assert!(target.join("app.jar").exists());
        assert!(target.join("classes").is_dir());
        assert!(!target.join("build.log").exists());
    }

    #[test]
    fn prune_missing_dir_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(prune_except_suffix(&dir.path().join("target"), ".jar").unwrap(), 0);
    }
}
