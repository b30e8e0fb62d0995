//! Generic pagination over cursor-addressed pages
//!
//! Endpoints differ in how they address the next page (an opaque token, a
//! page number) but share one protocol: fetch the first page without a
//! cursor, keep going while pages are non-empty and a next cursor exists.
//! Each raw item may expand into several output items, which is how
//! composite feed entries are flattened.

use std::collections::VecDeque;
use std::future::Future;

use futures::stream::{self, Stream};

use crate::error::ApiError;

/// One fetched page: its raw items and the cursor of the page after it
#[derive(Debug, Clone, PartialEq)]
pub struct Page<R, C> {
    pub items: Vec<R>,
    pub next: Option<C>,
}

impl<R, C> Page<R, C> {
    pub fn new(items: Vec<R>, next: Option<C>) -> Self {
        Self { items, next }
    }

    /// The final page
    pub fn last(items: Vec<R>) -> Self {
        Self { items, next: None }
    }
}

/// Where the walk stands between pages
#[derive(Debug)]
enum Cursor<C> {
    First,
    Next(C),
    Done,
}

/// Page bookkeeping shared by the iterator and the stream
struct Walk<R, C, T, E> {
    cursor: Cursor<C>,
    raw: std::vec::IntoIter<R>,
    ready: VecDeque<T>,
    expand: E,
}

impl<R, C, T, E> Walk<R, C, T, E>
where
    E: FnMut(R) -> Result<Vec<T>, ApiError>,
{
    fn new(expand: E) -> Self {
        Self {
            cursor: Cursor::First,
            raw: Vec::new().into_iter(),
            ready: VecDeque::new(),
            expand,
        }
    }

    /// Next item from pages already fetched, or `None` if a fetch is needed
    fn next_buffered(&mut self) -> Option<Result<T, ApiError>> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some(Ok(item));
            }
            let raw = self.raw.next()?;
            match (self.expand)(raw) {
                Ok(items) => self.ready.extend(items),
                Err(e) => {
                    self.halt();
                    return Some(Err(e));
                }
            }
        }
    }

    /// Cursor for the next fetch; `None` once the walk is over
    fn take_cursor(&mut self) -> Option<Option<C>> {
        match std::mem::replace(&mut self.cursor, Cursor::Done) {
            Cursor::First => Some(None),
            Cursor::Next(c) => Some(Some(c)),
            Cursor::Done => None,
        }
    }

    /// Queues a fetched page, ending the walk at an empty or final page
    fn accept(&mut self, page: Page<R, C>) {
        if page.items.is_empty() {
            return;
        }
        if let Some(next) = page.next {
            self.cursor = Cursor::Next(next);
        }
        self.raw = page.items.into_iter();
    }

    fn halt(&mut self) {
        self.cursor = Cursor::Done;
        self.raw = Vec::new().into_iter();
        self.ready.clear();
    }
}

/// Lazy iterator over every item of every page
///
/// Pages are fetched only as items are consumed. After the first error the
/// iterator is exhausted.
pub struct Paginated<R, C, T, F, E> {
    fetch: F,
    walk: Walk<R, C, T, E>,
}

impl<R, C, T, F, E> Iterator for Paginated<R, C, T, F, E>
where
    F: FnMut(Option<C>) -> Result<Page<R, C>, ApiError>,
    E: FnMut(R) -> Result<Vec<T>, ApiError>,
{
    type Item = Result<T, ApiError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.walk.next_buffered() {
                return Some(item);
            }
            let cursor = self.walk.take_cursor()?;
            match (self.fetch)(cursor) {
                Ok(page) => self.walk.accept(page),
                Err(e) => {
                    self.walk.halt();
                    return Some(Err(e));
                }
            }
        }
    }
}

impl<R, C, T, F, E> std::iter::FusedIterator for Paginated<R, C, T, F, E>
where
    F: FnMut(Option<C>) -> Result<Page<R, C>, ApiError>,
    E: FnMut(R) -> Result<Vec<T>, ApiError>,
{
}

impl<R, C, T, F, E> Paginated<R, C, T, F, E>
where
    F: FnMut(Option<C>) -> Result<Page<R, C>, ApiError>,
    E: FnMut(R) -> Result<Vec<T>, ApiError>,
{
    /// Drains every page, stopping at the first error
    pub fn collect_all(self) -> Result<Vec<T>, ApiError> {
        self.collect()
    }
}

/// Walks pages with a blocking fetcher
///
/// `fetch` receives `None` for the first page and the previous page's cursor
/// afterwards. `expand` turns one raw item into zero or more output items.
pub fn paginate<R, C, T, F, E>(fetch: F, expand: E) -> Paginated<R, C, T, F, E>
where
    F: FnMut(Option<C>) -> Result<Page<R, C>, ApiError>,
    E: FnMut(R) -> Result<Vec<T>, ApiError>,
{
    Paginated {
        fetch,
        walk: Walk::new(expand),
    }
}

/// Async counterpart of [`paginate`]
pub fn paginate_stream<R, C, T, F, Fut, E>(
    fetch: F,
    expand: E,
) -> impl Stream<Item = Result<T, ApiError>>
where
    F: FnMut(Option<C>) -> Fut,
    Fut: Future<Output = Result<Page<R, C>, ApiError>>,
    E: FnMut(R) -> Result<Vec<T>, ApiError>,
{
    stream::unfold((fetch, Walk::new(expand)), |(mut fetch, mut walk)| async move {
        loop {
            if let Some(item) = walk.next_buffered() {
                return Some((item, (fetch, walk)));
            }
            let cursor = walk.take_cursor()?;
            match fetch(cursor).await {
                Ok(page) => walk.accept(page),
                Err(e) => {
                    walk.halt();
                    return Some((Err(e), (fetch, walk)));
                }
            }
        }
    })
}

/// Adapts a page-number fetcher to the cursor protocol, starting at page 0
pub fn numbered<R, F>(mut fetch_page: F) -> impl FnMut(Option<usize>) -> Result<Page<R, usize>, ApiError>
where
    F: FnMut(usize) -> Result<Vec<R>, ApiError>,
{
    move |cursor| {
        let page = cursor.unwrap_or(0);
        let items = fetch_page(page)?;
        Ok(Page::new(items, Some(page + 1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{StreamExt, TryStreamExt};
    use std::cell::RefCell;

    fn single(item: i32) -> Result<Vec<i32>, ApiError> {
        Ok(vec![item])
    }

    #[test]
    fn test_stops_on_empty_page_without_third_fetch() {
        let calls = RefCell::new(Vec::new());
        let items: Vec<i32> = paginate(
            |cursor: Option<String>| {
                calls.borrow_mut().push(cursor.clone());
                match cursor.as_deref() {
                    None => Ok(Page::new(vec![1, 2, 3], Some("tok".to_string()))),
                    Some("tok") => Ok(Page::new(vec![], None)),
                    Some(other) => panic!("unexpected cursor {}", other),
                }
            },
            single,
        )
        .collect_all()
        .unwrap();

        assert_eq!(items, vec![1, 2, 3]);
        assert_eq!(*calls.borrow(), vec![None, Some("tok".to_string())]);
    }

    #[test]
    fn test_stops_when_cursor_is_absent() {
        let mut fetches = 0;
        let items: Vec<i32> = paginate(
            |_cursor: Option<String>| {
                fetches += 1;
                Ok(Page::last(vec![7, 8]))
            },
            single,
        )
        .collect_all()
        .unwrap();

        assert_eq!(items, vec![7, 8]);
        assert_eq!(fetches, 1);
    }

    #[test]
    fn test_empty_first_page_with_cursor_yields_nothing() {
        let mut fetches = 0;
        let mut iter = paginate(
            |_cursor: Option<String>| {
                fetches += 1;
                Ok(Page::new(Vec::<i32>::new(), Some("more".to_string())))
            },
            single,
        );
        assert!(iter.next().is_none());
        assert!(iter.next().is_none());
        drop(iter);
        assert_eq!(fetches, 1);
    }

    #[test]
    fn test_pages_are_fetched_lazily() {
        let fetches = RefCell::new(0);
        let mut iter = paginate(
            |cursor: Option<u32>| {
                *fetches.borrow_mut() += 1;
                let page = cursor.unwrap_or(0);
                Ok(Page::new(vec![page * 10, page * 10 + 1], Some(page + 1)))
            },
            |item| Ok(vec![item]),
        );

        assert_eq!(iter.next().unwrap().unwrap(), 0);
        assert_eq!(iter.next().unwrap().unwrap(), 1);
        assert_eq!(*fetches.borrow(), 1);
        assert_eq!(iter.next().unwrap().unwrap(), 10);
        assert_eq!(*fetches.borrow(), 2);
    }

    #[test]
    fn test_fetch_error_halts_iteration() {
        let mut iter = paginate(
            |cursor: Option<u8>| match cursor {
                None => Ok(Page::new(vec![1], Some(1))),
                Some(_) => Err(ApiError::RequestFailed {
                    status: Some(502),
                    message: "Bad Gateway".into(),
                }),
            },
            single,
        );

        assert_eq!(iter.next().unwrap().unwrap(), 1);
        assert!(matches!(iter.next(), Some(Err(ApiError::RequestFailed { .. }))));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_expand_error_halts_iteration() {
        let mut iter = paginate(
            |_cursor: Option<u8>| Ok(Page::last(vec![1, 2, 3])),
            |item: i32| {
                if item == 2 {
                    Err(ApiError::DecodeFailed("bad item".into()))
                } else {
                    Ok(vec![item])
                }
            },
        );

        assert_eq!(iter.next().unwrap().unwrap(), 1);
        assert!(matches!(iter.next(), Some(Err(ApiError::DecodeFailed(_)))));
        assert!(iter.next().is_none(), "item 3 must not be yielded after an error");
    }

    #[test]
    fn test_expansion_flattens_in_order() {
        let items: Vec<String> = paginate(
            |_cursor: Option<u8>| Ok(Page::last(vec!["a", "bc", "", "d"])),
            |raw: &str| Ok(raw.chars().map(String::from).collect()),
        )
        .collect_all()
        .unwrap();
        assert_eq!(items, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_numbered_pages() {
        let pages = vec![vec![1, 2], vec![3], vec![]];
        let items: Vec<i32> = paginate(numbered(|page| Ok(pages[page].clone())), single)
            .collect_all()
            .unwrap();
        assert_eq!(items, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_stream_matches_iterator_semantics() {
        let fetches = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = fetches.clone();
        let stream = paginate_stream(
            move |cursor: Option<String>| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async move {
                    match cursor {
                        None => Ok(Page::new(vec![1, 2], Some("next".to_string()))),
                        Some(_) => Ok(Page::new(vec![], Some("ignored".to_string()))),
                    }
                }
            },
            single,
        );

        let items: Vec<i32> = stream.try_collect().await.unwrap();
        assert_eq!(items, vec![1, 2]);
        assert_eq!(fetches.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stream_error_halts() {
        let stream = paginate_stream(
            |cursor: Option<u8>| async move {
                match cursor {
                    None => Ok(Page::new(vec![1], Some(1))),
                    Some(_) => Err(ApiError::Unauthorized("Unauthorized".into())),
                }
            },
            single,
        );
        let results: Vec<Result<i32, ApiError>> = stream.collect().await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap(), &1);
        assert!(matches!(results[1], Err(ApiError::Unauthorized(_))));
    }
}
