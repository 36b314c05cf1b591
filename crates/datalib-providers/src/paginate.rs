use std::future::Future;
use std::ops::ControlFlow;

use tracing::{debug, warn};

use crate::ProviderError;

/// Ceiling on cursor follows for one listing.
pub const MAX_PAGES: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the following page; `None` or empty when done.
    pub next: Option<String>,
}

/// Follows cursors until the server reports none left, `visit` breaks, or
/// `max_pages` pages have been read. `fetch` gets `None` for the first page.
/// Any page error aborts the walk. Returns the number of pages read.
pub async fn for_each_page<T, F, Fut, V>(
    max_pages: usize,
    mut fetch: F,
    mut visit: V,
) -> Result<usize, ProviderError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, ProviderError>>,
    V: FnMut(Vec<T>) -> ControlFlow<()>,
{
    let mut cursor = None;
    for read in 1..=max_pages {
        let page = fetch(cursor.take()).await?;
        let next = page.next.filter(|next| !next.is_empty());
        if visit(page.items).is_break() {
            return Ok(read);
        }
        match next {
            None => return Ok(read),
            Some(next) => {
                debug!(page = read, "following cursor");
                cursor = Some(next);
            }
        }
    }
    warn!(max_pages, "pagination stopped at page ceiling");
    Ok(max_pages)
}

pub async fn collect_pages<T, F, Fut>(max_pages: usize, fetch: F) -> Result<Vec<T>, ProviderError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, ProviderError>>,
{
    let mut all = Vec::new();
    for_each_page(max_pages, fetch, |items| {
        all.extend(items);
        ControlFlow::Continue(())
    })
    .await?;
    Ok(all)
}
