use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use uuid::Uuid;

use super::{CsvStore, Person};
use crate::lifecycle::ManagedResource;

/// In-memory roster backed by a [`CsvStore`]
///
/// Edits mark the roster dirty; [`Roster::persist`] writes it back. Closing
/// the roster (shutdown) persists any unsaved edits.
pub struct Roster {
    store: CsvStore,
    people: Mutex<Vec<Person>>,
    dirty: AtomicBool,
    // Serialises file writes from concurrent save tasks
    write_lock: Mutex<()>,
}

impl Roster {
    pub fn new(store: CsvStore) -> Self {
        Self {
            store,
            people: Mutex::new(Vec::new()),
            dirty: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        }
    }

    /// Open a roster and load it from disk
    pub fn open(store: CsvStore) -> Result<Self> {
        let roster = Self::new(store);
        roster.reload()?;
        Ok(roster)
    }

    pub fn store(&self) -> &CsvStore {
        &self.store
    }

    /// Replace in-memory records with the file contents, discarding edits
    pub fn reload(&self) -> Result<usize> {
        let loaded = self.store.load()?;
        let count = loaded.len();
        *self.people() = loaded;
        self.dirty.store(false, Ordering::SeqCst);
        Ok(count)
    }

    /// Write the current records if there are unsaved edits
    pub fn persist(&self) -> Result<bool> {
        let _write = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }

        let snapshot = self.all();
        if let Err(err) = self.store.save(&snapshot) {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(err);
        }
        Ok(true)
    }

    /// Insert a new record or replace the one with the same id
    ///
    /// Returns true when an existing record was replaced.
    pub fn upsert(&self, person: Person) -> bool {
        let mut people = self.people();
        let replaced = match people.iter_mut().find(|existing| existing.id == person.id) {
            Some(existing) => {
                *existing = person;
                true
            }
            None => {
                people.push(person);
                false
            }
        };
        self.dirty.store(true, Ordering::SeqCst);
        replaced
    }

    pub fn remove(&self, id: Uuid) -> Option<Person> {
        let mut people = self.people();
        let index = people.iter().position(|person| person.id == id)?;
        self.dirty.store(true, Ordering::SeqCst);
        Some(people.remove(index))
    }

    pub fn get(&self, id: Uuid) -> Option<Person> {
        self.people().iter().find(|person| person.id == id).cloned()
    }

    pub fn all(&self) -> Vec<Person> {
        self.people().clone()
    }

    /// Records matching `query`, best match first; an empty query returns
    /// everyone sorted by last name
    pub fn filter(&self, query: &str) -> Vec<Person> {
        let query = query.trim();
        let mut people = self.all();

        if query.is_empty() {
            people.sort_by(|a, b| {
                (a.last_name.to_lowercase(), a.first_name.to_lowercase())
                    .cmp(&(b.last_name.to_lowercase(), b.first_name.to_lowercase()))
            });
            return people;
        }

        let matcher = SkimMatcherV2::default();
        let mut scored: Vec<(i64, Person)> = people
            .into_iter()
            .filter_map(|person| {
                let haystack = format!(
                    "{} {} {} {}",
                    person.first_name, person.last_name, person.department, person.title
                );
                matcher.fuzzy_match(&haystack, query).map(|score| (score, person))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().map(|(_, person)| person).collect()
    }

    pub fn len(&self) -> usize {
        self.people().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn people(&self) -> MutexGuard<'_, Vec<Person>> {
        self.people.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ManagedResource for Roster {
    fn name(&self) -> &str {
        "roster"
    }

    fn close(&self) -> Result<()> {
        if self.persist()? {
            log::info!(target: "roster::records", "Flushed unsaved edits on close");
        }
        Ok(())
    }
}
