#![allow(dead_code)]

use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::sync::Mutex;

use apim_migrate_core::artifact::{
    ApiDescriptor, ApplicationDescriptor, ArtifactDescriptor, ArtifactKind,
};
use apim_migrate_core::contract::{
    ArtifactCatalog, ArtifactPage, CatalogError, ExportUnit, ExportedArchive,
};
use async_trait::async_trait;

type ArchiveFn<T> = Box<dyn Fn(&T) -> Vec<u8> + Send + Sync>;
type UnitsFn<T> = Box<dyn Fn(&T) -> Vec<ExportUnit> + Send + Sync>;

/// In-memory collection served with the management service's offset/limit
/// semantics. Records every list call and every successful export.
pub struct FakeCatalog<T> {
    kind: ArtifactKind,
    items: Vec<T>,
    archive: ArchiveFn<T>,
    units: UnitsFn<T>,
    fail_export: Mutex<HashSet<String>>,
    fail_list_at: Mutex<Option<usize>>,
    pub list_calls: Mutex<Vec<(usize, usize)>>,
    pub exported: Mutex<Vec<String>>,
}

impl<T: ArtifactDescriptor> FakeCatalog<T> {
    pub fn new(kind: ArtifactKind, items: Vec<T>) -> Self {
        Self {
            kind,
            items,
            archive: Box::new(|item: &T| format!("archive of {}", item.display_name()).into_bytes()),
            units: Box::new(|_: &T| vec![ExportUnit::WorkingCopy]),
            fail_export: Mutex::new(HashSet::new()),
            fail_list_at: Mutex::new(None),
            list_calls: Mutex::new(Vec::new()),
            exported: Mutex::new(Vec::new()),
        }
    }

    pub fn with_archive(mut self, archive: impl Fn(&T) -> Vec<u8> + Send + Sync + 'static) -> Self {
        self.archive = Box::new(archive);
        self
    }

    pub fn with_units(mut self, units: impl Fn(&T) -> Vec<ExportUnit> + Send + Sync + 'static) -> Self {
        self.units = Box::new(units);
        self
    }

    /// The next export recorded under this name fails. Revisions are recorded
    /// as `<display name> rev <n>`.
    pub fn fail_export_once(&self, display_name: &str) {
        self.fail_export
            .lock()
            .unwrap()
            .insert(display_name.to_string());
    }

    /// The next list call at `offset` fails.
    pub fn fail_list_once_at(&self, offset: usize) {
        *self.fail_list_at.lock().unwrap() = Some(offset);
    }

    pub fn list_offsets(&self) -> Vec<usize> {
        self.list_calls.lock().unwrap().iter().map(|(o, _)| *o).collect()
    }

    pub fn take_exported(&self) -> Vec<String> {
        std::mem::take(&mut *self.exported.lock().unwrap())
    }
}

#[async_trait]
impl<T: ArtifactDescriptor> ArtifactCatalog for FakeCatalog<T> {
    type Item = T;

    fn kind(&self) -> ArtifactKind {
        self.kind
    }

    async fn list(&self, offset: usize, limit: usize) -> Result<ArtifactPage<T>, CatalogError> {
        self.list_calls.lock().unwrap().push((offset, limit));
        {
            let mut fail_at = self.fail_list_at.lock().unwrap();
            if *fail_at == Some(offset) {
                *fail_at = None;
                return Err(CatalogError::Status {
                    status: 500,
                    body: "internal error".into(),
                });
            }
        }
        let list: Vec<T> = self.items.iter().skip(offset).take(limit).cloned().collect();
        Ok(ArtifactPage {
            count: list.len(),
            list,
        })
    }

    async fn export_one(&self, item: &T) -> Result<ExportedArchive, CatalogError> {
        self.record_export(item, item.display_name())
    }

    async fn export_units(&self, item: &T) -> Result<Vec<ExportUnit>, CatalogError> {
        Ok((self.units)(item))
    }

    async fn export_revision(&self, item: &T, revision: &str) -> Result<ExportedArchive, CatalogError> {
        self.record_export(item, format!("{} rev {revision}", item.display_name()))
    }
}

impl<T: ArtifactDescriptor> FakeCatalog<T> {
    fn record_export(&self, item: &T, name: String) -> Result<ExportedArchive, CatalogError> {
        if self.fail_export.lock().unwrap().remove(&name) {
            return Err(CatalogError::Transport(format!("connection reset exporting {name}")));
        }
        self.exported.lock().unwrap().push(name);
        Ok(ExportedArchive {
            bytes: (self.archive)(item),
        })
    }
}

pub fn api(i: usize) -> ApiDescriptor {
    ApiDescriptor {
        id: format!("id-{i}"),
        name: format!("Api{i:03}"),
        context: format!("/api{i}"),
        version: "1.0.0".into(),
        provider: "admin".into(),
        life_cycle_status: "PUBLISHED".into(),
    }
}

pub fn apis(n: usize) -> Vec<ApiDescriptor> {
    (0..n).map(api).collect()
}

pub fn app(i: usize, owner: &str) -> ApplicationDescriptor {
    ApplicationDescriptor {
        application_id: format!("app-{i}"),
        name: format!("App {i}"),
        owner: owner.into(),
        status: "APPROVED".into(),
    }
}

/// A minimal exported-API zip of the shape the publisher returns.
pub fn api_archive(item: &ApiDescriptor, visibility: &str) -> Vec<u8> {
    let dir = item.archive_dir_name();
    let api_json = format!(
        r#"{{"type":"api","data":{{"id":"{}","name":"{}","version":"{}","type":"HTTP","visibility":"{}"}}}}"#,
        item.id, item.name, item.version, visibility
    );
    let swagger = r#"{"openapi":"3.0.1","info":{"title":"t","description":"A test API"}}"#;

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    writer.start_file(format!("{dir}/api.json"), options).unwrap();
    writer.write_all(api_json.as_bytes()).unwrap();
    writer
        .start_file(format!("{dir}/Definitions/swagger.json"), options)
        .unwrap();
    writer.write_all(swagger.as_bytes()).unwrap();
    writer.finish().unwrap().into_inner()
}

/// Names of the files directly under `dir`, sorted.
pub fn file_names(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
