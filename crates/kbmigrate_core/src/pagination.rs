use anyhow::Result;

use crate::error::MigrateError;

/// One response of a listing addressed by page number.
#[derive(Debug, Clone)]
pub struct NumberedPage<T> {
    pub items: Vec<T>,
    /// Total page count advertised by the server, if any.
    pub total_pages: Option<usize>,
}

/// One response of a listing that links to its successor.
#[derive(Debug, Clone)]
pub struct LinkedPage<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

/// Fetch pages `1..=total_pages`, where the total comes from the first response.
/// A missing total means a single page.
pub fn collect_numbered<T, F>(endpoint: &str, max_pages: usize, mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(usize) -> Result<NumberedPage<T>>,
{
    let mut output = Vec::new();
    let mut page = 1usize;
    loop {
        if page > max_pages {
            return Err(page_limit(endpoint, max_pages));
        }
        let batch = fetch(page)?;
        output.extend(batch.items);
        match batch.total_pages {
            Some(total) if total > max_pages => return Err(page_limit(endpoint, max_pages)),
            Some(total) if page < total => page += 1,
            _ => break,
        }
    }
    Ok(output)
}

/// Follow `next` links starting from `first` until a response carries none.
pub fn collect_linked<T, F>(
    endpoint: &str,
    first: String,
    max_pages: usize,
    mut fetch: F,
) -> Result<Vec<T>>
where
    F: FnMut(&str) -> Result<LinkedPage<T>>,
{
    let mut output = Vec::new();
    let mut next = Some(first);
    let mut fetched = 0usize;
    while let Some(url) = next.take() {
        if fetched == max_pages {
            return Err(page_limit(endpoint, max_pages));
        }
        let batch = fetch(&url)?;
        fetched += 1;
        output.extend(batch.items);
        next = batch.next.filter(|value| !value.trim().is_empty());
    }
    Ok(output)
}

fn page_limit(endpoint: &str, limit: usize) -> anyhow::Error {
    MigrateError::PageLimitExceeded {
        endpoint: endpoint.to_string(),
        limit,
    }
    .into()
}
