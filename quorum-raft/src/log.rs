use crate::raft::{Entry, LogIndex, Term};

/// The replicated command log, indexed from 1.
///
/// Entries are held contiguously in memory and flushed through the store
/// whenever they change; the in-memory view is authoritative between flushes.
#[derive(Debug, Clone, Default)]
pub struct Log {
    entries: Vec<Entry>,
}

impl Log {
    pub fn new(entries: Vec<Entry>) -> Log {
        Log { entries }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn last_index(&self) -> LogIndex {
        self.entries.last().map_or(0, |e| e.index)
    }

    pub fn last_term(&self) -> Term {
        self.entries.last().map_or(0, |e| e.term)
    }

    pub fn get(&self, index: LogIndex) -> Option<&Entry> {
        if index == 0 {
            return None;
        }
        self.entries.get((index - 1) as usize)
    }

    /// The term of the entry at `index`. Index 0 is the empty prefix before
    /// the first entry and carries term 0.
    pub fn term_at(&self, index: LogIndex) -> Option<Term> {
        if index == 0 {
            return Some(0);
        }
        self.get(index).map(|e| e.term)
    }

    /// Append a fresh entry at the next index.
    pub fn append(&mut self, term: Term, data: Vec<u8>) -> LogIndex {
        let index = self.last_index() + 1;
        self.entries.push(Entry { term, index, data });
        index
    }

    /// Entries from `index` to the end, for replication to a peer.
    pub fn entries_from(&self, index: LogIndex) -> Vec<Entry> {
        if index == 0 || index > self.last_index() {
            return Vec::new();
        }
        self.entries[(index - 1) as usize..].to_vec()
    }

    /// Drop the entry at `index` and everything after it.
    pub fn truncate_from(&mut self, index: LogIndex) {
        self.entries.truncate(index.saturating_sub(1) as usize);
    }

    /// The AppendEntries consistency check: does this log contain the
    /// leader's `(prev_index, prev_term)`?
    pub fn matches(&self, prev_index: LogIndex, prev_term: Term) -> bool {
        self.term_at(prev_index) == Some(prev_term)
    }

    /// Merge `entries` in after `prev_index`. An existing entry that
    /// conflicts (same index, different term) takes everything after it down
    /// with it. Returns the index of the last new entry, or `prev_index` for
    /// a heartbeat.
    pub fn splice(&mut self, prev_index: LogIndex, entries: Vec<Entry>) -> LogIndex {
        let mut last_new = prev_index;
        for entry in entries {
            last_new = entry.index;
            match self.term_at(entry.index) {
                Some(term) if term == entry.term => {}
                Some(_) => {
                    self.truncate_from(entry.index);
                    self.entries.push(entry);
                }
                None => self.entries.push(entry),
            }
        }
        last_new
    }

    /// Whether a candidate whose log ends at `(last_index, last_term)` is at
    /// least as up to date as this log.
    pub fn up_to_date(&self, last_index: LogIndex, last_term: Term) -> bool {
        (last_term, last_index) >= (self.last_term(), self.last_index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(term: Term, index: LogIndex) -> Entry {
        Entry {
            term,
            index,
            data: vec![index as u8],
        }
    }

    fn log_of(entries: &[(Term, LogIndex)]) -> Log {
        Log::new(entries.iter().map(|&(t, i)| entry(t, i)).collect())
    }

    #[test]
    fn empty_log() {
        let log = Log::default();
        assert_eq!(log.last_index(), 0);
        assert_eq!(log.last_term(), 0);
        assert_eq!(log.term_at(0), Some(0));
        assert_eq!(log.term_at(1), None);
        assert!(log.matches(0, 0));
        assert!(!log.matches(1, 1));
    }

    #[test]
    fn append_assigns_contiguous_indexes() {
        let mut log = Log::default();
        assert_eq!(log.append(1, vec![1]), 1);
        assert_eq!(log.append(1, vec![2]), 2);
        assert_eq!(log.append(2, vec![3]), 3);
        assert_eq!(log.last_index(), 3);
        assert_eq!(log.last_term(), 2);
    }

    #[test]
    fn consistency_check() {
        let log = log_of(&[(1, 1), (1, 2), (2, 3)]);
        assert!(log.matches(2, 1));
        assert!(log.matches(3, 2));
        assert!(!log.matches(3, 1));
        assert!(!log.matches(4, 2));
    }

    #[test]
    fn splice_appends_new_entries() {
        let mut log = log_of(&[(1, 1)]);
        let last = log.splice(1, vec![entry(1, 2), entry(2, 3)]);
        assert_eq!(last, 3);
        assert_eq!(log.last_index(), 3);
    }

    #[test]
    fn splice_is_idempotent_for_duplicates() {
        let mut log = log_of(&[(1, 1), (1, 2)]);
        let before = log.entries().to_vec();
        log.splice(0, vec![entry(1, 1), entry(1, 2)]);
        assert_eq!(log.entries(), &before[..]);
    }

    #[test]
    fn splice_truncates_conflicting_suffix() {
        // Follower holds [(1,x),(1,y),(2,z)]; a term-3 leader replaces the
        // conflicting entry at index 3.
        let mut log = log_of(&[(1, 1), (1, 2), (2, 3)]);
        let last = log.splice(2, vec![entry(3, 3)]);
        assert_eq!(last, 3);
        assert_eq!(log.last_index(), 3);
        assert_eq!(log.term_at(3), Some(3));
        assert_eq!(log.term_at(2), Some(1));
    }

    #[test]
    fn heartbeat_splice_leaves_log_alone() {
        let mut log = log_of(&[(1, 1), (1, 2)]);
        let last = log.splice(2, Vec::new());
        assert_eq!(last, 2);
        assert_eq!(log.last_index(), 2);
    }

    #[test]
    fn up_to_date_compares_term_then_index() {
        let log = log_of(&[(1, 1), (2, 2)]);
        assert!(log.up_to_date(2, 2));
        assert!(log.up_to_date(1, 3));
        assert!(log.up_to_date(5, 2));
        assert!(!log.up_to_date(1, 2));
        assert!(!log.up_to_date(9, 1));
    }

    #[test]
    fn entries_from_clamps_to_range() {
        let log = log_of(&[(1, 1), (1, 2), (2, 3)]);
        assert_eq!(log.entries_from(4), Vec::new());
        assert_eq!(log.entries_from(2).len(), 2);
        assert_eq!(log.entries_from(1).len(), 3);
    }
}
