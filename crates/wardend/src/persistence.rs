//! Text and descriptor encoding of entity state across a re-execution.
//!
//! Entity state is written as `key=value` lines grouped into sections, one
//! section per entity. Live descriptors cannot travel in text, so each one is
//! duplicated into a [`DescriptorTable`] and referenced from the text by the
//! table key. The table is handed to the next process image alongside the
//! text.
//!
//! Restoring is lenient: unknown keys, malformed values and dangling
//! descriptor references are logged and skipped so one bad line never costs
//! the rest of the state.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while persisting or restoring state.
#[derive(Debug, Error)]
pub enum PersistError {
    /// A live descriptor could not be duplicated into the table.
    #[error("failed to duplicate descriptor for {entity}: {source}")]
    Duplicate {
        /// Entity owning the descriptor.
        entity: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The state file could not be read or removed.
    #[error("failed to read state file '{path}': {source}")]
    Read {
        /// Path of the state file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The state file could not be written.
    #[error("failed to write state file '{path}': {source}")]
    Write {
        /// Path of the state file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Descriptors carried across a re-execution, keyed by small integers.
///
/// Keys are the raw numbers of the duplicated descriptors, which is what the
/// next process image sees once the table is passed along.
#[derive(Debug, Default)]
pub struct DescriptorTable {
    fds: BTreeMap<RawFd, OwnedFd>,
}

impl DescriptorTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Duplicates `fd` into the table and returns its key.
    pub fn put_dup(&mut self, fd: BorrowedFd<'_>) -> io::Result<RawFd> {
        let copy = fd.try_clone_to_owned()?;
        let id = copy.as_raw_fd();
        self.fds.insert(id, copy);
        Ok(id)
    }

    /// Adopts an already owned descriptor, e.g. one inherited from the
    /// previous process image.
    pub fn adopt(&mut self, fd: OwnedFd) -> RawFd {
        let id = fd.as_raw_fd();
        self.fds.insert(id, fd);
        id
    }

    /// Returns `true` when `id` names a descriptor in the table.
    #[must_use]
    pub fn contains(&self, id: RawFd) -> bool {
        self.fds.contains_key(&id)
    }

    /// Borrows the descriptor stored under `id`.
    #[must_use]
    pub fn get(&self, id: RawFd) -> Option<BorrowedFd<'_>> {
        self.fds.get(&id).map(AsFd::as_fd)
    }

    /// Removes and returns the descriptor stored under `id`.
    pub fn take(&mut self, id: RawFd) -> Option<OwnedFd> {
        self.fds.remove(&id)
    }

    /// Keys currently stored.
    pub fn ids(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.fds.keys().copied()
    }

    /// Number of stored descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fds.len()
    }

    /// Returns `true` when no descriptor is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }
}

/// Appends a `key=value` line to `out`.
pub fn write_item(out: &mut String, key: &str, value: impl fmt::Display) {
    out.push_str(key);
    out.push('=');
    out.push_str(&value.to_string());
    out.push('\n');
}

/// Splits a `key=value` line; lines without `=` yield `None`.
#[must_use]
pub fn parse_item(line: &str) -> Option<(&str, &str)> {
    line.split_once('=')
}

/// Header naming the entity a state section belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum SectionKey {
    /// Bus-name entity, by unit identifier.
    BusName(String),
    /// Link entity, by interface index.
    Link(u32),
}

impl SectionKey {
    fn parse(line: &str) -> Option<Self> {
        let (kind, identity) = line.split_once(' ')?;
        match kind {
            "busname" if !identity.is_empty() => Some(Self::BusName(identity.to_owned())),
            "link" => identity.parse().ok().map(Self::Link),
            _ => None,
        }
    }
}

impl fmt::Display for SectionKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BusName(unit) => write!(formatter, "busname {unit}"),
            Self::Link(ifindex) => write!(formatter, "link {ifindex}"),
        }
    }
}

/// One parsed state section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Entity the items belong to.
    pub key: SectionKey,
    /// Items in file order.
    pub items: Vec<(String, String)>,
}

/// Writes a section header for `key`.
pub fn write_header(out: &mut String, key: &SectionKey) {
    out.push_str(&key.to_string());
    out.push('\n');
}

/// Terminates the current section.
pub fn end_section(out: &mut String) {
    out.push('\n');
}

/// Splits serialized state into sections.
///
/// A blank line or a new header closes a section. Unrecognised headers cause
/// the whole section to be skipped; item lines without `=` are skipped on
/// their own.
#[must_use]
pub fn parse_sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current: Option<Section> = None;
    let mut skipping = false;

    for line in text.lines() {
        if line.trim().is_empty() {
            sections.extend(current.take());
            skipping = false;
            continue;
        }
        if let Some(key) = SectionKey::parse(line) {
            sections.extend(current.take());
            current = Some(Section {
                key,
                items: Vec::new(),
            });
            skipping = false;
            continue;
        }
        if skipping {
            continue;
        }
        let Some(section) = current.as_mut() else {
            tracing::debug!(header = line, "skipping unknown state section");
            skipping = true;
            continue;
        };
        match parse_item(line) {
            Some((key, value)) => section.items.push((key.to_owned(), value.to_owned())),
            None => tracing::debug!(
                section = %section.key,
                line,
                "skipping malformed state item"
            ),
        }
    }
    sections.extend(current);
    sections
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;

    use nix::sys::stat::fstat;
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn duplicated_descriptors_refer_to_the_same_file() {
        let (left, _right) = UnixStream::pair().expect("socket pair");
        let original = OwnedFd::from(left);
        let mut table = DescriptorTable::new();

        let id = table.put_dup(original.as_fd()).expect("dup");
        assert!(table.contains(id));
        let restored = table.take(id).expect("descriptor stored");

        let before = fstat(original.as_raw_fd()).expect("stat original");
        let after = fstat(restored.as_raw_fd()).expect("stat restored");
        assert_eq!(before.st_ino, after.st_ino);
        assert_ne!(original.as_raw_fd(), restored.as_raw_fd());
        assert!(table.is_empty());
    }

    #[rstest]
    fn sections_round_trip_through_text() {
        let mut text = String::new();
        write_header(&mut text, &SectionKey::BusName("org.example.Foo.busname".to_owned()));
        write_item(&mut text, "state", "listening");
        write_item(&mut text, "starter-fd", 7);
        end_section(&mut text);
        write_header(&mut text, &SectionKey::Link(3));
        write_item(&mut text, "link-up", "yes");
        end_section(&mut text);

        let sections = parse_sections(&text);

        assert_eq!(sections.len(), 2);
        assert_eq!(
            sections.first().map(|section| &section.key),
            Some(&SectionKey::BusName("org.example.Foo.busname".to_owned()))
        );
        assert_eq!(
            sections.get(1).map(|section| section.items.clone()),
            Some(vec![("link-up".to_owned(), "yes".to_owned())])
        );
    }

    #[rstest]
    fn unknown_sections_and_malformed_items_are_skipped() {
        let text = "socket foo.socket\nstate=listening\n\nlink 2\nbogus\nstate=configured\n";

        let sections = parse_sections(text);

        assert_eq!(
            sections,
            vec![Section {
                key: SectionKey::Link(2),
                items: vec![("state".to_owned(), "configured".to_owned())],
            }]
        );
    }

    #[rstest]
    fn a_header_closes_the_previous_section() {
        let text = "busname a.b.busname\nstate=listening\nlink 2\nstate=configured\n";

        let sections = parse_sections(text);

        assert_eq!(
            sections,
            vec![
                Section {
                    key: SectionKey::BusName("a.b.busname".to_owned()),
                    items: vec![("state".to_owned(), "listening".to_owned())],
                },
                Section {
                    key: SectionKey::Link(2),
                    items: vec![("state".to_owned(), "configured".to_owned())],
                },
            ]
        );
    }

    #[rstest]
    fn adopted_descriptors_are_stored_under_their_number() {
        let (left, _right) = UnixStream::pair().expect("socket pair");
        let fd = OwnedFd::from(left);
        let raw = fd.as_raw_fd();
        let mut table = DescriptorTable::new();

        let id = table.adopt(fd);

        assert_eq!(id, raw);
        assert_eq!(table.ids().collect::<Vec<_>>(), vec![raw]);
        assert!(table.get(id).is_some());
    }
}
