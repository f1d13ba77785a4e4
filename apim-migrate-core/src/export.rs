//! Resumable, page-by-page export of an artifact collection to local archives.
//!
//! The driver walks a remote collection through an [`ArtifactCatalog`],
//! exporting one artifact at a time and checkpointing after each one, so that
//! a run killed at any point can be picked up again by the next invocation.
//!
//! # States
//! - **Fresh start** (no metadata on disk, or a forced restart): clear all
//!   previous state, fetch the page at offset 0, record it, export from index 0.
//! - **Resume**: reload the recorded page and offset, find the last-succeeded
//!   marker in it, and continue right after it. If the recorded page was
//!   already finished, move straight on to the next page.
//! - **Exporting**: for each remaining item, export and write every archive
//!   the catalog asks for (the working copy, revisions, or both), then
//!   advance the marker. At the end of a page, fetch the next one and record
//!   it before touching any of its items.
//! - **Terminal**: the service returned an empty page.
//!
//! # Ordering
//! Every archive of an item is on disk before the marker names it. A crash
//! in between re-exports that one item on the next run, it never skips it.
//!
//! # Error Handling
//! The first failure (listing, exporting a single artifact, writing a file)
//! aborts the run. There is no skip-and-continue; the service
//! does not tell transient export failures apart from permanent ones.
//!
//! Runs are strictly sequential; there is no concurrent export within a run.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::archive::{ArchiveError, ArchiveWriter};
use crate::artifact::{ArtifactDescriptor, ArtifactKind};
use crate::checkpoint::{CheckpointError, CheckpointStore, MigrationMetadata};
use crate::contract::{ArtifactCatalog, ArtifactPage, CatalogError, ExportUnit};
use crate::pagination::{fetch_page, resume_index, PaginationCursor};

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to list {kind} at offset {offset}: {source}")]
    Listing {
        kind: ArtifactKind,
        offset: usize,
        source: CatalogError,
    },
    #[error("failed to export {artifact}: {source}")]
    Export {
        artifact: String,
        source: CatalogError,
    },
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(
        "checkpoint {path} was recorded for tenant '{recorded}', not '{requested}'; \
         rerun with --force to start over"
    )]
    CheckpointMismatch {
        path: PathBuf,
        recorded: String,
        requested: String,
    },
}

/// Who is running the migration, and for which tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunIdentity {
    pub tenant_domain: String,
    pub user: String,
}

/// In-memory state of a run, owned by the driver for its duration.
#[derive(Debug, Clone)]
pub struct MigrationRunState<T> {
    pub cursor: PaginationCursor,
    /// The page currently being exported, as recorded in the metadata file.
    pub items: Vec<T>,
    /// Artifacts exported by this invocation.
    pub exported: usize,
    /// Archives written by this invocation; more than `exported` when
    /// revisions are exported too.
    pub archives: usize,
    /// Pages this invocation worked on.
    pub pages: usize,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportOutcome {
    /// At least one page was walked to completion.
    Completed,
    /// The collection was empty on a fresh start; nothing was written.
    NothingToExport,
    /// A resumed run found its last page finished and no further pages.
    AlreadyComplete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub kind: ArtifactKind,
    pub outcome: ExportOutcome,
    pub exported: usize,
    pub archives: usize,
    pub pages: usize,
    pub archive_dir: PathBuf,
}

enum StartState<T> {
    Exporting(MigrationRunState<T>),
    NothingToExport,
    AlreadyComplete,
}

/// Drives one resumable export of one artifact kind.
pub struct ExportDriver<'a, C: ArtifactCatalog> {
    catalog: &'a C,
    store: CheckpointStore,
    writer: ArchiveWriter,
    identity: RunIdentity,
    page_size: usize,
}

impl<'a, C: ArtifactCatalog> ExportDriver<'a, C> {
    pub fn new(catalog: &'a C, store: CheckpointStore, identity: RunIdentity) -> Self {
        let page_size = catalog.kind().default_page_size();
        Self {
            catalog,
            store,
            writer: ArchiveWriter,
            identity,
            page_size,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Runs the export to completion. With `force_restart`, all previous
    /// checkpoint state and archives for this tenant/environment are discarded.
    pub async fn run(&self, force_restart: bool) -> Result<ExportSummary, MigrationError> {
        let kind = self.catalog.kind();
        info!(
            kind = %kind,
            force_restart,
            run_dir = %self.store.layout().run_dir().display(),
            "Starting export for migration"
        );

        let start = if force_restart {
            self.fresh_start().await?
        } else {
            match self.store.read_metadata::<C::Item>()? {
                Some(metadata) => self.resume(metadata).await?,
                None => {
                    info!(kind = %kind, "No previous export metadata found, starting from the beginning");
                    self.fresh_start().await?
                }
            }
        };

        let summary = |outcome, exported, archives, pages| ExportSummary {
            kind,
            outcome,
            exported,
            archives,
            pages,
            archive_dir: self.store.archive_dir(),
        };

        let mut state = match start {
            StartState::Exporting(state) => state,
            StartState::NothingToExport => {
                info!(kind = %kind, "No artifacts available to be exported");
                return Ok(summary(ExportOutcome::NothingToExport, 0, 0, 0));
            }
            StartState::AlreadyComplete => {
                info!(kind = %kind, "Previous export had already completed");
                return Ok(summary(ExportOutcome::AlreadyComplete, 0, 0, 0));
            }
        };

        self.export_pages(&mut state).await?;
        info!(
            kind = %kind,
            exported = state.exported,
            archives = state.archives,
            pages = state.pages,
            archive_dir = %self.store.archive_dir().display(),
            "Export for migration completed"
        );
        Ok(summary(
            ExportOutcome::Completed,
            state.exported,
            state.archives,
            state.pages,
        ))
    }

    async fn fresh_start(&self) -> Result<StartState<C::Item>, MigrationError> {
        self.store.clear_all()?;

        let mut cursor = PaginationCursor::fresh(self.page_size);
        let page = self.list(&cursor).await?;
        if page.is_empty() {
            return Ok(StartState::NothingToExport);
        }

        self.store.ensure_dirs()?;
        cursor.load_page(page.list.len());
        self.record_page(&page.list, cursor.offset)?;
        Ok(StartState::Exporting(MigrationRunState {
            cursor,
            items: page.list,
            exported: 0,
            archives: 0,
            pages: 0,
        }))
    }

    async fn resume(
        &self,
        metadata: MigrationMetadata<C::Item>,
    ) -> Result<StartState<C::Item>, MigrationError> {
        if metadata.on_tenant != self.identity.tenant_domain {
            return Err(MigrationError::CheckpointMismatch {
                path: self.store.metadata_path(),
                recorded: metadata.on_tenant,
                requested: self.identity.tenant_domain.clone(),
            });
        }
        if metadata.user != self.identity.user {
            warn!(
                recorded = %metadata.user,
                current = %self.identity.user,
                "Resuming an export started by a different user"
            );
        }

        let marker = self.store.read_marker()?;
        let items = metadata.items_to_export;
        let start_index = resume_index(&items, marker.as_ref());
        let mut cursor =
            PaginationCursor::resume(metadata.list_offset, self.page_size, items.len(), start_index);
        info!(
            kind = %self.catalog.kind(),
            offset = cursor.offset,
            start_index,
            remaining = cursor.remaining,
            marker = ?marker.as_ref().map(|m| m.fields()),
            "Resuming previously halted export"
        );

        if !cursor.page_exhausted() {
            return Ok(StartState::Exporting(MigrationRunState {
                cursor,
                items,
                exported: 0,
                archives: 0,
                pages: 0,
            }));
        }

        // The recorded page finished before the halt; pick up the next one.
        cursor.advance_page();
        let page = self.list(&cursor).await?;
        if page.is_empty() {
            return Ok(StartState::AlreadyComplete);
        }
        self.store.ensure_dirs()?;
        cursor.load_page(page.list.len());
        self.record_page(&page.list, cursor.offset)?;
        Ok(StartState::Exporting(MigrationRunState {
            cursor,
            items: page.list,
            exported: 0,
            archives: 0,
            pages: 0,
        }))
    }

    async fn export_pages(&self, state: &mut MigrationRunState<C::Item>) -> Result<(), MigrationError> {
        let kind = self.catalog.kind();
        let archive_dir = self.store.ensure_dirs()?;

        loop {
            info!(
                kind = %kind,
                count = state.cursor.remaining,
                offset = state.cursor.offset,
                page_size = self.page_size,
                "Found artifacts to be exported in the iteration"
            );

            let mut exported_in_page = 0;
            while !state.cursor.page_exhausted() {
                let item = &state.items[state.cursor.start_index];
                state.archives += self.export_item(item, &archive_dir).await?;
                state.cursor.complete_one();
                state.exported += 1;
                exported_in_page += 1;
            }
            state.pages += 1;
            info!(kind = %kind, count = exported_in_page, "Batch exported successfully");

            state.cursor.advance_page();
            let page = self.list(&state.cursor).await?;
            if page.is_empty() {
                return Ok(());
            }
            state.cursor.load_page(page.list.len());
            self.record_page(&page.list, state.cursor.offset)?;
            state.items = page.list;
        }
    }

    /// Exports and archives every unit of one item, then advances the marker.
    /// Returns the number of archives written.
    async fn export_item(&self, item: &C::Item, archive_dir: &Path) -> Result<usize, MigrationError> {
        debug!(artifact = %item.display_name(), "Exporting artifact");
        let export_err = |source| MigrationError::Export {
            artifact: item.display_name(),
            source,
        };
        let units = self.catalog.export_units(item).await.map_err(export_err)?;
        if units.is_empty() {
            info!(artifact = %item.display_name(), "Nothing to export for artifact");
        }

        let stem = item.archive_stem();
        for unit in &units {
            let archive = match unit {
                ExportUnit::WorkingCopy => self.catalog.export_one(item).await,
                ExportUnit::Revision(number) => self.catalog.export_revision(item, number).await,
            }
            .map_err(export_err)?;
            let path = self
                .writer
                .write(archive_dir, &unit.archive_stem(&stem), &archive.bytes)?;
            info!(artifact = %item.display_name(), path = %path.display(), "Exported artifact");
        }
        self.store.write_marker(&item.identity_key())?;
        Ok(units.len())
    }

    async fn list(&self, cursor: &PaginationCursor) -> Result<ArtifactPage<C::Item>, MigrationError> {
        fetch_page(self.catalog, cursor)
            .await
            .map_err(|source| MigrationError::Listing {
                kind: self.catalog.kind(),
                offset: cursor.offset,
                source,
            })
    }

    fn record_page(&self, items: &[C::Item], offset: usize) -> Result<(), MigrationError> {
        self.store.write_metadata(
            items,
            offset,
            &self.identity.tenant_domain,
            &self.identity.user,
        )?;
        Ok(())
    }
}
