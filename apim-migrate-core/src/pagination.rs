//! Offset/limit bookkeeping shared by the export driver and the upload producer.

use tracing::debug;

use crate::artifact::{ArtifactDescriptor, IdentityKey};
use crate::contract::{ArtifactCatalog, ArtifactPage, CatalogError};

/// Where a walk currently stands inside a remote collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationCursor {
    /// Offset at which the current page was fetched.
    pub offset: usize,
    /// Page-size limit sent with every list call.
    pub limit: usize,
    /// First index in the current page that still needs work.
    pub start_index: usize,
    /// Items in the current page still to be processed.
    pub remaining: usize,
}

impl PaginationCursor {
    pub fn fresh(limit: usize) -> Self {
        Self {
            offset: 0,
            limit,
            start_index: 0,
            remaining: 0,
        }
    }

    /// Cursor for a recorded page of `page_len` items where everything before
    /// `resume_index` is already done.
    pub fn resume(offset: usize, limit: usize, page_len: usize, resume_index: usize) -> Self {
        let start_index = resume_index.min(page_len);
        Self {
            offset,
            limit,
            start_index,
            remaining: page_len - start_index,
        }
    }

    pub fn page_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Moves to the next page. The offset grows by the limit, not by how many
    /// items the last page happened to hold.
    pub fn advance_page(&mut self) {
        self.offset += self.limit;
        self.start_index = 0;
        self.remaining = 0;
    }

    /// Records that a page of `len` items has been loaded at the current offset.
    pub fn load_page(&mut self, len: usize) {
        self.start_index = 0;
        self.remaining = len;
    }

    /// Marks one item of the current page as done.
    pub fn complete_one(&mut self) {
        self.start_index += 1;
        self.remaining = self.remaining.saturating_sub(1);
    }
}

/// Index of the first item after the one named by `marker`, or 0 when there is
/// no marker or it does not belong to `items`.
pub fn resume_index<T: ArtifactDescriptor>(items: &[T], marker: Option<&IdentityKey>) -> usize {
    let Some(marker) = marker else {
        return 0;
    };
    items
        .iter()
        .position(|item| &item.identity_key() == marker)
        .map(|idx| idx + 1)
        .unwrap_or(0)
}

/// Fetches the page the cursor points at.
pub async fn fetch_page<C>(
    catalog: &C,
    cursor: &PaginationCursor,
) -> Result<ArtifactPage<C::Item>, CatalogError>
where
    C: ArtifactCatalog + ?Sized,
{
    debug!(
        kind = %catalog.kind(),
        offset = cursor.offset,
        limit = cursor.limit,
        "Fetching artifact page"
    );
    catalog.list(cursor.offset, cursor.limit).await
}

/// Non-checkpointed walk over a whole collection, one page at a time.
pub struct PageWalker<'a, C: ArtifactCatalog + ?Sized> {
    catalog: &'a C,
    cursor: PaginationCursor,
    finished: bool,
}

impl<'a, C: ArtifactCatalog + ?Sized> PageWalker<'a, C> {
    pub fn new(catalog: &'a C, limit: usize) -> Self {
        Self {
            catalog,
            cursor: PaginationCursor::fresh(limit),
            finished: false,
        }
    }

    pub fn cursor(&self) -> &PaginationCursor {
        &self.cursor
    }

    /// Returns the next non-empty page, or `None` once the service returns an
    /// empty one.
    pub async fn next_page(&mut self) -> Result<Option<Vec<C::Item>>, CatalogError> {
        if self.finished {
            return Ok(None);
        }
        let page = fetch_page(self.catalog, &self.cursor).await?;
        if page.is_empty() {
            self.finished = true;
            return Ok(None);
        }
        self.cursor.advance_page();
        Ok(Some(page.list))
    }
}
