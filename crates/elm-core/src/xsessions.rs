//! Discovery of installed X sessions.
//!
//! Each installed session is described by a `*.desktop` file (usually under
//! `/usr/share/xsessions`) containing, among other keys:
//!
//! ```text
//! Name=Openbox
//! Exec=/usr/bin/openbox-session
//! ```
//!
//! Only the first `Name=` and first `Exec=` line are used. Discovery is best
//! effort: a missing directory, an unreadable file or a file lacking either
//! key simply contributes nothing.

use serde::Serialize;
use std::fs::{self, ReadDir};
use std::path::{Path, PathBuf};

/// File extension of session definition files.
pub const DESCRIPTOR_EXTENSION: &str = ".desktop";

const NAME_KEY: &str = "Name=";
const EXEC_KEY: &str = "Exec=";

/// A selectable session type: what to show and what to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionDescriptor {
    pub label: String,
    pub command: String,
}

impl SessionDescriptor {
    pub fn new(label: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            command: command.into(),
        }
    }

    /// Parse descriptor file contents. Returns `None` when either key is
    /// missing or empty.
    pub fn parse(contents: &str) -> Option<Self> {
        let label = first_value(contents, NAME_KEY)?;
        let command = first_value(contents, EXEC_KEY)?;
        Some(Self::new(label, command))
    }

    /// Read and parse a descriptor file.
    pub fn from_file(path: &Path) -> Option<Self> {
        let bytes = fs::read(path).ok()?;
        Self::parse(&String::from_utf8_lossy(&bytes))
    }
}

fn first_value<'a>(contents: &'a str, key: &str) -> Option<&'a str> {
    contents
        .lines()
        .find_map(|line| line.strip_prefix(key))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Lazily walks a session directory, yielding descriptors in directory
/// enumeration order.
pub struct DescriptorIter {
    entries: Option<ReadDir>,
}

impl Iterator for DescriptorIter {
    type Item = SessionDescriptor;

    fn next(&mut self) -> Option<Self::Item> {
        let entries = self.entries.as_mut()?;
        for entry in entries.by_ref() {
            let Ok(entry) = entry else { continue };

            // Symlinks and directories are skipped, matching readdir's d_type
            let is_regular = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_regular {
                continue;
            }

            let name = entry.file_name();
            if !name.to_string_lossy().ends_with(DESCRIPTOR_EXTENSION) {
                continue;
            }

            match SessionDescriptor::from_file(&entry.path()) {
                Some(descriptor) => return Some(descriptor),
                None => log::debug!(
                    "Skipping session file without Name/Exec: {}",
                    entry.path().display()
                ),
            }
        }
        None
    }
}

/// Iterate over the descriptors in `dir`. Yields nothing if the directory
/// is missing or unreadable.
pub fn iter_sessions(dir: &Path) -> DescriptorIter {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => Some(entries),
        Err(e) => {
            log::info!("No sessions available from {}: {}", dir.display(), e);
            None
        }
    };
    DescriptorIter { entries }
}

/// Collect every descriptor in `dir`.
///
/// If the result cannot be grown, everything gathered so far is discarded
/// and an empty list is returned rather than a partial one.
pub fn scan_sessions(dir: &Path) -> Vec<SessionDescriptor> {
    let mut sessions = Vec::new();
    for descriptor in iter_sessions(dir) {
        if sessions.try_reserve(1).is_err() {
            log::error!("Unable to grow session list, discarding scan results");
            return Vec::new();
        }
        sessions.push(descriptor);
    }
    log::info!("Found {} session(s) in {}", sessions.len(), dir.display());
    sessions
}

/// Session directory scanner bound to a configured location.
#[derive(Debug, Clone)]
pub struct SessionScanner {
    dir: PathBuf,
}

impl SessionScanner {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn scan(&self) -> Vec<SessionDescriptor> {
        scan_sessions(&self.dir)
    }

    pub fn iter(&self) -> DescriptorIter {
        iter_sessions(&self.dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    mod parse {
        use super::*;

        #[test]
        fn extracts_name_and_exec() {
            let contents = "[Desktop Entry]\nName=Openbox\nComment=Log in using Openbox\nExec=/usr/bin/openbox-session\nType=XSession\n";
            assert_eq!(
                SessionDescriptor::parse(contents),
                Some(SessionDescriptor::new("Openbox", "/usr/bin/openbox-session"))
            );
        }

        #[test]
        fn uses_first_occurrence() {
            let contents = "Name=First\nName=Second\nExec=one\nExec=two\n";
            let descriptor = SessionDescriptor::parse(contents).unwrap();
            assert_eq!(descriptor.label, "First");
            assert_eq!(descriptor.command, "one");
        }

        #[test]
        fn prefixed_keys_do_not_match() {
            let contents = "GenericName=Window Manager\nTryExec=/usr/bin/i3\nName=i3\nExec=i3\n";
            let descriptor = SessionDescriptor::parse(contents).unwrap();
            assert_eq!(descriptor.label, "i3");
            assert_eq!(descriptor.command, "i3");
        }

        #[test]
        fn missing_exec_is_none() {
            assert_eq!(SessionDescriptor::parse("Name=Broken\n"), None);
        }

        #[test]
        fn missing_name_is_none() {
            assert_eq!(SessionDescriptor::parse("Exec=/bin/true\n"), None);
        }

        #[test]
        fn empty_value_is_none() {
            assert_eq!(SessionDescriptor::parse("Name=\nExec=xterm\n"), None);
        }

        #[test]
        fn trims_carriage_returns() {
            let descriptor = SessionDescriptor::parse("Name=Xfce\r\nExec=startxfce4\r\n").unwrap();
            assert_eq!(descriptor.label, "Xfce");
            assert_eq!(descriptor.command, "startxfce4");
        }
    }

    mod scan {
        use super::*;

        #[test]
        fn yields_one_entry_per_valid_file() {
            let dir = tempdir().unwrap();
            write(dir.path(), "openbox.desktop", "Name=Openbox\nExec=openbox-session\n");
            write(dir.path(), "i3.desktop", "Name=i3\nExec=i3\n");
            write(dir.path(), "xfce.desktop", "Name=Xfce Session\nExec=startxfce4\n");

            let mut sessions = scan_sessions(dir.path());
            assert_eq!(sessions.len(), 3);

            sessions.sort_by(|a, b| a.label.cmp(&b.label));
            assert_eq!(sessions[0], SessionDescriptor::new("Openbox", "openbox-session"));
            assert_eq!(sessions[1], SessionDescriptor::new("Xfce Session", "startxfce4"));
            assert_eq!(sessions[2], SessionDescriptor::new("i3", "i3"));
        }

        #[test]
        fn incomplete_files_are_excluded() {
            let dir = tempdir().unwrap();
            write(dir.path(), "good.desktop", "Name=Good\nExec=good\n");
            write(dir.path(), "noexec.desktop", "Name=NoExec\n");
            write(dir.path(), "noname.desktop", "Exec=noname\n");
            write(dir.path(), "other.desktop", "Name=Other\nExec=other\n");

            let mut labels: Vec<String> =
                scan_sessions(dir.path()).into_iter().map(|s| s.label).collect();
            labels.sort();
            assert_eq!(labels, vec!["Good", "Other"]);
        }

        #[test]
        fn wrong_extension_and_directories_ignored() {
            let dir = tempdir().unwrap();
            write(dir.path(), "notes.txt", "Name=Text\nExec=text\n");
            write(dir.path(), "openbox.desktop.bak", "Name=Backup\nExec=bak\n");
            fs::create_dir(dir.path().join("nested.desktop")).unwrap();
            write(dir.path(), "real.desktop", "Name=Real\nExec=real\n");

            let sessions = scan_sessions(dir.path());
            assert_eq!(sessions, vec![SessionDescriptor::new("Real", "real")]);
        }

        #[test]
        #[cfg(unix)]
        fn symlinks_ignored() {
            let dir = tempdir().unwrap();
            let target = dir.path().join("target.session");
            fs::write(&target, "Name=Linked\nExec=linked\n").unwrap();
            std::os::unix::fs::symlink(&target, dir.path().join("link.desktop")).unwrap();

            assert!(scan_sessions(dir.path()).is_empty());
        }

        #[test]
        fn duplicate_labels_kept() {
            let dir = tempdir().unwrap();
            write(dir.path(), "a.desktop", "Name=Same\nExec=a\n");
            write(dir.path(), "b.desktop", "Name=Same\nExec=b\n");

            let mut commands: Vec<String> =
                scan_sessions(dir.path()).into_iter().map(|s| s.command).collect();
            commands.sort();
            assert_eq!(commands, vec!["a", "b"]);
        }

        #[test]
        fn nonexistent_directory_is_empty() {
            let sessions = scan_sessions(Path::new("/nonexistent/elm/xsessions"));
            assert!(sessions.is_empty());
        }

        #[test]
        fn non_utf8_content_tolerated() {
            let dir = tempdir().unwrap();
            fs::write(
                dir.path().join("latin.desktop"),
                b"Comment=\xff\xfe\nName=Latin\nExec=latin\n",
            )
            .unwrap();
            assert_eq!(
                scan_sessions(dir.path()),
                vec![SessionDescriptor::new("Latin", "latin")]
            );
        }

        #[test]
        fn iterator_matches_materialized_scan() {
            let dir = tempdir().unwrap();
            write(dir.path(), "a.desktop", "Name=A\nExec=a\n");
            write(dir.path(), "b.desktop", "Name=B\nExec=b\n");

            let scanner = SessionScanner::new(dir.path());
            let lazy: Vec<_> = scanner.iter().collect();
            assert_eq!(lazy, scanner.scan());
        }
    }
}
