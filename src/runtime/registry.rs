//! Bookkeeping for the registers the engine mirrors.

use embassy_time::Instant;
use heapless::Vec;

use super::traits::NameCollector;
use crate::value::{RegisterName, RegisterValue, register_name};

/// What the engine remembers about one register.
#[derive(Debug, Clone)]
pub struct RegisterRecord {
    pub name: RegisterName,
    /// Last value read from the handler.
    pub last_known: Option<RegisterValue>,
    /// Last value the broker confirmed. Only updated after a successful
    /// publish.
    pub last_published: Option<RegisterValue>,
    pub published_at: Option<Instant>,
    /// Whether the retained `meta` topic reflects the handler.
    pub meta_published: bool,
    /// Set once the handler stopped reporting the name; the record lives on
    /// until its retained topics are cleared.
    pub retiring: bool,
}

impl RegisterRecord {
    fn new(name: RegisterName) -> Self {
        Self {
            name,
            last_known: None,
            last_published: None,
            published_at: None,
            meta_published: false,
            retiring: false,
        }
    }

    /// Whether `value` differs from what the broker last saw.
    pub fn is_stale(&self, value: &RegisterValue) -> bool {
        self.last_published
            .as_ref()
            .is_none_or(|published| !published.same_as(value))
    }

    pub fn mark_published(&mut self, value: RegisterValue, now: Instant) {
        self.last_known = Some(value.clone());
        self.last_published = Some(value);
        self.published_at = Some(now);
    }

    /// Forget the published state so the next sync republishes everything.
    pub fn invalidate(&mut self) {
        self.last_published = None;
        self.published_at = None;
        self.meta_published = false;
    }

    /// Takes back a retiring record whose name is reported again. Its topics
    /// may already be half cleared, so everything is republished.
    pub fn revive(&mut self) {
        self.retiring = false;
        self.invalidate();
    }
}

/// Fixed-capacity table of [`RegisterRecord`]s, at most one per name.
#[derive(Debug, Default)]
pub struct RegisterTable<const MAX_REGISTERS: usize> {
    records: Vec<RegisterRecord, MAX_REGISTERS>,
}

impl<const MAX_REGISTERS: usize> RegisterTable<MAX_REGISTERS> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&RegisterRecord> {
        self.records.iter().find(|r| r.name.as_str() == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut RegisterRecord> {
        self.records.iter_mut().find(|r| r.name.as_str() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Adds a record for `name` unless one exists.
    ///
    /// Returns `true` if a new record was created.
    pub fn insert(&mut self, name: RegisterName) -> bool {
        if self.contains(&name) {
            return false;
        }
        self.records.push(RegisterRecord::new(name)).is_ok()
    }

    pub fn remove(&mut self, name: &str) -> Option<RegisterRecord> {
        let index = self.records.iter().position(|r| r.name.as_str() == name)?;
        Some(self.records.swap_remove(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisterRecord> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RegisterRecord> {
        self.records.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.records.len() == MAX_REGISTERS
    }
}

/// Collects the names a handler reports in one enumeration.
///
/// Names are validated as topic levels and de-duplicated. Names the engine
/// already tracks always fit: one slot is held back for each of them, and a
/// new name is refused once only held-back slots remain.
#[derive(Debug, Default)]
pub struct NameSet<const MAX_REGISTERS: usize> {
    names: Vec<RegisterName, MAX_REGISTERS>,
    /// Known names not reported yet.
    reserved: Vec<RegisterName, MAX_REGISTERS>,
    /// Names refused because they were invalid or did not fit.
    pub(crate) refused: usize,
}

impl<const MAX_REGISTERS: usize> NameSet<MAX_REGISTERS> {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty set holding a slot for each of `known`.
    pub fn reserving<'a>(known: impl IntoIterator<Item = &'a RegisterName>) -> Self {
        let mut set = Self::new();
        for name in known {
            let _ = set.reserved.push(name.clone());
        }
        set
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.as_str() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|n| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<const MAX_REGISTERS: usize> NameCollector for NameSet<MAX_REGISTERS> {
    fn add(&mut self, name: &str) -> bool {
        if self.contains(name) {
            return true;
        }
        if let Some(index) = self.reserved.iter().position(|n| n.as_str() == name) {
            let owned = self.reserved.swap_remove(index);
            return self.names.push(owned).is_ok();
        }
        let has_room = self.names.len() + self.reserved.len() < MAX_REGISTERS;
        let accepted = has_room
            && match register_name(name) {
                Ok(owned) => self.names.push(owned).is_ok(),
                Err(_) => false,
            };
        if !accepted {
            self.refused += 1;
        }
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> RegisterName {
        register_name(s).unwrap()
    }

    #[test]
    fn one_record_per_name() {
        let mut table = RegisterTable::<4>::new();
        assert!(table.insert(name("a")));
        assert!(!table.insert(name("a")));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn revived_record_is_republished() {
        let mut table = RegisterTable::<4>::new();
        table.insert(name("a"));
        let record = table.get_mut("a").unwrap();
        record.mark_published(RegisterValue::Int(1), Instant::from_millis(5));
        record.meta_published = true;
        record.retiring = true;

        record.revive();
        assert!(!record.retiring);
        assert!(!record.meta_published);
        assert!(record.is_stale(&RegisterValue::Int(1)));
    }

    #[test]
    fn table_is_bounded() {
        let mut table = RegisterTable::<1>::new();
        assert!(table.insert(name("a")));
        assert!(!table.insert(name("b")));
        assert!(table.is_full());
        assert!(table.remove("a").is_some());
        assert!(table.is_empty());
    }

    #[test]
    fn stale_until_published() {
        let mut table = RegisterTable::<2>::new();
        table.insert(name("a"));
        let record = table.get_mut("a").unwrap();
        assert!(record.is_stale(&RegisterValue::Int(1)));
        record.mark_published(RegisterValue::Int(1), Instant::from_millis(5));
        assert!(!record.is_stale(&RegisterValue::Int(1)));
        assert!(record.is_stale(&RegisterValue::Int(2)));
        record.invalidate();
        assert!(record.is_stale(&RegisterValue::Int(1)));
    }

    #[test]
    fn name_set_deduplicates_and_refuses_invalid_names() {
        let mut names = NameSet::<2>::new();
        assert!(names.add("a"));
        assert!(names.add("a"));
        assert!(!names.add("bad/name"));
        assert!(names.add("b"));
        assert!(!names.add("c"));
        assert_eq!(names.len(), 2);
        assert_eq!(names.refused, 2);
    }

    #[test]
    fn known_names_keep_their_slots() {
        let known = [name("b"), name("c")];
        let mut names = NameSet::<2>::reserving(&known);
        assert!(!names.add("a"));
        assert!(names.add("c"));
        assert!(!names.add("d"));
        assert!(names.add("b"));
        assert_eq!(names.iter().collect::<std::vec::Vec<_>>(), ["c", "b"]);
        assert_eq!(names.refused, 2);
    }

    #[test]
    fn vanished_known_name_frees_nothing_until_forgotten() {
        let known = [name("b")];
        let mut names = NameSet::<2>::reserving(&known);
        assert!(names.add("a"));
        assert!(!names.add("z"));
        assert!(!names.contains("b"));
    }
}
