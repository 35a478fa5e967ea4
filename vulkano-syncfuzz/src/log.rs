// Copyright (c) 2024 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! A structured test log.
//!
//! The log is a tree of sections holding messages and image comparison summaries. It is kept in
//! memory so that callers can inspect or print it after a run, and every entry is mirrored to
//! `tracing` as it is written.

use std::fmt;

/// One entry of a [`TestLog`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogEntry {
    Message(String),
    Section {
        name: String,
        entries: Vec<LogEntry>,
    },
    ImageComparison {
        name: String,
        width: u32,
        height: u32,
        /// The first differing pixel, or `None` if the images matched.
        first_mismatch: Option<[u32; 2]>,
        mismatch_count: u64,
    },
}

/// A tree of log entries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TestLog {
    entries: Vec<LogEntry>,
}

impl TestLog {
    #[inline]
    pub fn new() -> Self {
        TestLog::default()
    }

    /// Appends a message.
    pub fn message(&mut self, text: impl Into<String>) {
        let text = text.into();
        tracing::debug!("{text}");
        self.entries.push(LogEntry::Message(text));
    }

    /// Runs `f` with a log whose entries end up in a new section named `name`.
    pub fn section<R>(&mut self, name: impl Into<String>, f: impl FnOnce(&mut TestLog) -> R) -> R {
        let name = name.into();
        let span = tracing::info_span!("section", name = %name);
        let _enter = span.enter();

        let mut inner = TestLog::new();
        let ret = f(&mut inner);
        self.push_section(name, inner);

        ret
    }

    /// Appends the entries of `section` as a new section named `name`.
    pub fn push_section(&mut self, name: impl Into<String>, section: TestLog) {
        self.entries.push(LogEntry::Section {
            name: name.into(),
            entries: section.entries,
        });
    }

    /// Records the result of comparing two images.
    pub fn image_comparison(
        &mut self,
        name: impl Into<String>,
        extent: [u32; 2],
        first_mismatch: Option<[u32; 2]>,
        mismatch_count: u64,
    ) {
        let name = name.into();

        match first_mismatch {
            None => tracing::debug!(%name, "images match"),
            Some([x, y]) => tracing::warn!(%name, x, y, mismatch_count, "images differ"),
        }

        self.entries.push(LogEntry::ImageComparison {
            name,
            width: extent[0],
            height: extent[1],
            first_mismatch,
            mismatch_count,
        });
    }

    #[inline]
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Returns whether any message in the tree contains `needle`.
    pub fn contains_message(&self, needle: &str) -> bool {
        fn search(entries: &[LogEntry], needle: &str) -> bool {
            entries.iter().any(|entry| match entry {
                LogEntry::Message(text) => text.contains(needle),
                LogEntry::Section { entries, .. } => search(entries, needle),
                LogEntry::ImageComparison { .. } => false,
            })
        }

        search(&self.entries, needle)
    }

    /// Returns the section with the given name, searching the whole tree.
    pub fn find_section(&self, name: &str) -> Option<&[LogEntry]> {
        fn search<'a>(entries: &'a [LogEntry], name: &str) -> Option<&'a [LogEntry]> {
            entries.iter().find_map(|entry| match entry {
                LogEntry::Section {
                    name: section_name,
                    entries,
                } => {
                    if section_name == name {
                        Some(entries.as_slice())
                    } else {
                        search(entries, name)
                    }
                }
                _ => None,
            })
        }

        search(&self.entries, name)
    }
}

impl fmt::Display for TestLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_entries(
            f: &mut fmt::Formatter<'_>,
            entries: &[LogEntry],
            depth: usize,
        ) -> fmt::Result {
            for entry in entries {
                let indent = depth * 2;

                match entry {
                    LogEntry::Message(text) => writeln!(f, "{:indent$}{text}", "")?,
                    LogEntry::Section { name, entries } => {
                        writeln!(f, "{:indent$}[{name}]", "")?;
                        write_entries(f, entries, depth + 1)?;
                    }
                    LogEntry::ImageComparison {
                        name,
                        width,
                        height,
                        first_mismatch,
                        mismatch_count,
                    } => match first_mismatch {
                        None => writeln!(f, "{:indent$}{name}: {width}x{height} images match", "")?,
                        Some([x, y]) => writeln!(
                            f,
                            "{:indent$}{name}: {width}x{height} images differ at {mismatch_count} \
                            pixels, first at ({x}, {y})",
                            "",
                        )?,
                    },
                }
            }

            Ok(())
        }

        write_entries(f, &self.entries, 0)
    }
}
