use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Result;

use crate::zendesk::{HelpCenterArticle, HelpCenterCategory, HelpCenterSection};

/// Lookups memoized for the lifetime of one migration run.
///
/// Each key space has its own slot. Nothing is ever evicted. A populated
/// slot short-circuits the fetch entirely; when two workers race to fill
/// an empty slot, the first stored value is kept.
#[derive(Debug, Default)]
pub struct RunCache {
    category_names: Mutex<HashMap<u64, String>>,
    categories: Mutex<Option<Vec<HelpCenterCategory>>>,
    sections: Mutex<Option<Vec<HelpCenterSection>>>,
    articles: Mutex<Option<Vec<HelpCenterArticle>>>,
}

impl RunCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn category_name<F>(&self, id: u64, fetch: F) -> Result<String>
    where
        F: FnOnce() -> Result<String>,
    {
        if let Some(name) = lock(&self.category_names).get(&id) {
            return Ok(name.clone());
        }
        let fetched = fetch()?;
        Ok(lock(&self.category_names)
            .entry(id)
            .or_insert(fetched)
            .clone())
    }

    pub fn categories<F>(&self, fetch: F) -> Result<Vec<HelpCenterCategory>>
    where
        F: FnOnce() -> Result<Vec<HelpCenterCategory>>,
    {
        get_or_fetch(&self.categories, fetch)
    }

    pub fn sections<F>(&self, fetch: F) -> Result<Vec<HelpCenterSection>>
    where
        F: FnOnce() -> Result<Vec<HelpCenterSection>>,
    {
        get_or_fetch(&self.sections, fetch)
    }

    pub fn articles<F>(&self, fetch: F) -> Result<Vec<HelpCenterArticle>>
    where
        F: FnOnce() -> Result<Vec<HelpCenterArticle>>,
    {
        get_or_fetch(&self.articles, fetch)
    }

    pub fn remember_category(&self, category: HelpCenterCategory) {
        append(&self.categories, category);
    }

    pub fn remember_section(&self, section: HelpCenterSection) {
        append(&self.sections, section);
    }
}

fn get_or_fetch<T, F>(slot: &Mutex<Option<Vec<T>>>, fetch: F) -> Result<Vec<T>>
where
    T: Clone,
    F: FnOnce() -> Result<Vec<T>>,
{
    if let Some(cached) = lock(slot).as_ref() {
        return Ok(cached.clone());
    }
    let fetched = fetch()?;
    Ok(lock(slot).get_or_insert(fetched).clone())
}

// An unpopulated slot stays empty: the next listing returns the new item
// from the remote anyway.
fn append<T>(slot: &Mutex<Option<Vec<T>>>, item: T) {
    if let Some(items) = lock(slot).as_mut() {
        items.push(item);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
