use serde::{Deserialize, Serialize};
use skyq_common::{Result, SkyqError};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// One worker node of the fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerInfo {
    /// Unique worker name.
    pub name: String,
    /// Host of the query/replication service.
    pub svc_host: String,
    /// Port of the query/replication service.
    pub svc_port: u16,
    /// Host of the file-transfer service.
    pub fs_host: String,
    /// Port of the file-transfer service.
    pub fs_port: u16,
    /// Root directory of chunk data; may contain a `{worker}` placeholder.
    pub data_dir: String,
    /// Disabled workers receive no new requests or replicas.
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    /// Read-only workers serve queries but accept no new replicas.
    #[serde(default)]
    pub is_read_only: bool,
}

fn default_true() -> bool {
    true
}

impl WorkerInfo {
    /// Data directory with the `{worker}` placeholder substituted.
    pub fn resolved_data_dir(&self) -> String {
        self.data_dir.replace("{worker}", &self.name)
    }
}

/// A group of databases sharing partitioning geometry and replication level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseFamily {
    /// Unique family name.
    pub name: String,
    /// Target number of replicas per chunk; at least 1.
    pub replication_level: usize,
    /// Latitude stripe count of the sky partitioning.
    pub num_stripes: u32,
    /// Sub-stripe count within each stripe.
    pub num_sub_stripes: u32,
}

impl DatabaseFamily {
    /// Whether a chunk number is addressable under this family's geometry.
    pub fn is_valid_chunk(&self, chunk: u32) -> bool {
        // Two spare ids at the top of the range are reserved for the
        // partitioner's overflow chunks.
        chunk < self.num_stripes * self.num_stripes * 2 + 2
    }
}

/// One partitioned table, optionally a match table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionedTable {
    /// Table name.
    pub name: String,
    /// Whether self-joins expand over sub-chunks.
    #[serde(default)]
    pub sub_chunked: bool,
    /// Director (secondary-key) column, when the table has one.
    #[serde(default)]
    pub director_column: Option<String>,
    /// Match-table parameters; present iff this is a match table.
    #[serde(default)]
    pub match_params: Option<MatchTableParams>,
}

/// Partitioning metadata of a match table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchTableParams {
    /// Director column referencing the first matched entity.
    pub dir_col1: String,
    /// Director column referencing the second matched entity.
    pub dir_col2: String,
    /// 2-bit partitioning-flags column written by the partitioner.
    pub flag_col: String,
}

/// One database: a named member of a family.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseInfo {
    /// Database name.
    pub name: String,
    /// Family this database belongs to.
    pub family: String,
    /// Partitioned tables, chunk-substituted at dispatch time.
    #[serde(default)]
    pub partitioned_tables: Vec<PartitionedTable>,
    /// Regular tables, replicated whole to every worker.
    #[serde(default)]
    pub regular_tables: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct CatalogFile {
    #[serde(default)]
    workers: Vec<WorkerInfo>,
    #[serde(default)]
    families: Vec<DatabaseFamily>,
    #[serde(default)]
    databases: Vec<DatabaseInfo>,
}

/// Deployment catalog: workers, families, databases and their tables.
///
/// The analysis plugins and the replication jobs only consume this facade;
/// where the metadata comes from (file, admin push) is not their concern.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    workers: HashMap<String, WorkerInfo>,
    families: HashMap<String, DatabaseFamily>,
    databases: HashMap<String, DatabaseInfo>,
}

impl Catalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a `.json` or `.toml` file by extension.
    pub fn load(path: &str) -> Result<Self> {
        match Path::new(path).extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::load_from_json(path),
            Some("toml") => Self::load_from_toml(path),
            Some(other) => Err(SkyqError::InvalidConfig(format!(
                "unsupported catalog extension '.{other}'; use .json or .toml"
            ))),
            None => Err(SkyqError::InvalidConfig(
                "catalog path must include extension .json or .toml".to_string(),
            )),
        }
    }

    /// Load from a JSON file.
    pub fn load_from_json(path: &str) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let file: CatalogFile = serde_json::from_str(&s)
            .map_err(|e| SkyqError::InvalidConfig(format!("catalog json: {e}")))?;
        Self::from_file(file)
    }

    /// Load from a TOML file.
    pub fn load_from_toml(path: &str) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let file: CatalogFile = toml::from_str(&s)
            .map_err(|e| SkyqError::InvalidConfig(format!("catalog toml: {e}")))?;
        Self::from_file(file)
    }

    /// Assemble and validate from in-memory parts.
    pub fn from_parts(
        workers: Vec<WorkerInfo>,
        families: Vec<DatabaseFamily>,
        databases: Vec<DatabaseInfo>,
    ) -> Result<Self> {
        Self::from_file(CatalogFile {
            workers,
            families,
            databases,
        })
    }

    fn from_file(file: CatalogFile) -> Result<Self> {
        let mut svc_endpoints = HashMap::new();
        let mut fs_endpoints = HashMap::new();
        for w in &file.workers {
            if let Some(prev) =
                svc_endpoints.insert((w.svc_host.clone(), w.svc_port), w.name.clone())
            {
                return Err(SkyqError::InvalidConfig(format!(
                    "workers '{prev}' and '{}' share svc endpoint {}:{}",
                    w.name, w.svc_host, w.svc_port
                )));
            }
            if let Some(prev) = fs_endpoints.insert((w.fs_host.clone(), w.fs_port), w.name.clone())
            {
                return Err(SkyqError::InvalidConfig(format!(
                    "workers '{prev}' and '{}' share fs endpoint {}:{}",
                    w.name, w.fs_host, w.fs_port
                )));
            }
        }
        for f in &file.families {
            if f.replication_level < 1 {
                return Err(SkyqError::InvalidConfig(format!(
                    "family '{}' has replication level {}; must be at least 1",
                    f.name, f.replication_level
                )));
            }
        }
        let families: HashMap<_, _> = file
            .families
            .into_iter()
            .map(|f| (f.name.clone(), f))
            .collect();
        for db in &file.databases {
            if !families.contains_key(&db.family) {
                return Err(SkyqError::InvalidConfig(format!(
                    "database '{}' references unknown family '{}'",
                    db.name, db.family
                )));
            }
        }
        Ok(Self {
            workers: file
                .workers
                .into_iter()
                .map(|w| (w.name.clone(), w))
                .collect(),
            families,
            databases: file
                .databases
                .into_iter()
                .map(|d| (d.name.clone(), d))
                .collect(),
        })
    }

    /// All workers, sorted by name for deterministic planning.
    pub fn workers(&self) -> Vec<&WorkerInfo> {
        let mut v: Vec<_> = self.workers.values().collect();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        v
    }

    /// One worker by name.
    pub fn worker(&self, name: &str) -> Result<&WorkerInfo> {
        self.workers
            .get(name)
            .ok_or_else(|| SkyqError::InvalidConfig(format!("unknown worker: {name}")))
    }

    /// Mark a worker disabled (eviction path). Returns false if unknown.
    pub fn disable_worker(&mut self, name: &str) -> bool {
        match self.workers.get_mut(name) {
            Some(w) => {
                w.is_enabled = false;
                true
            }
            None => false,
        }
    }

    /// Remove a worker permanently from the configuration.
    pub fn delete_worker(&mut self, name: &str) -> bool {
        self.workers.remove(name).is_some()
    }

    /// All families, sorted by name.
    pub fn families(&self) -> Vec<&DatabaseFamily> {
        let mut v: Vec<_> = self.families.values().collect();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        v
    }

    /// One family by name.
    pub fn family(&self, name: &str) -> Result<&DatabaseFamily> {
        self.families
            .get(name)
            .ok_or_else(|| SkyqError::InvalidConfig(format!("unknown family: {name}")))
    }

    /// All databases, sorted by name.
    pub fn databases(&self) -> Vec<&DatabaseInfo> {
        let mut v: Vec<_> = self.databases.values().collect();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        v
    }

    /// One database by name.
    pub fn database(&self, name: &str) -> Result<&DatabaseInfo> {
        self.databases
            .get(name)
            .ok_or_else(|| SkyqError::Analysis(format!("unknown database: {name}")))
    }

    /// Databases belonging to a family, sorted by name.
    pub fn family_databases(&self, family: &str) -> Vec<&DatabaseInfo> {
        let mut v: Vec<_> = self
            .databases
            .values()
            .filter(|d| d.family == family)
            .collect();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        v
    }

    /// Family of a database.
    pub fn family_of(&self, db: &str) -> Result<&DatabaseFamily> {
        let database = self.database(db)?;
        self.family(&database.family)
    }

    fn partitioned(&self, db: &str, table: &str) -> Option<&PartitionedTable> {
        self.databases
            .get(db)
            .and_then(|d| d.partitioned_tables.iter().find(|t| t.name == table))
    }

    /// Whether a table is partitioned into chunks.
    pub fn is_chunked(&self, db: &str, table: &str) -> bool {
        self.partitioned(db, table).is_some()
    }

    /// Whether a table additionally partitions into sub-chunks.
    pub fn is_sub_chunked(&self, db: &str, table: &str) -> bool {
        self.partitioned(db, table).is_some_and(|t| t.sub_chunked)
    }

    /// Whether a table is a match table.
    pub fn is_match_table(&self, db: &str, table: &str) -> bool {
        self.partitioned(db, table)
            .is_some_and(|t| t.match_params.is_some())
    }

    /// Match-table partitioning parameters.
    pub fn match_table_params(&self, db: &str, table: &str) -> Result<&MatchTableParams> {
        self.partitioned(db, table)
            .and_then(|t| t.match_params.as_ref())
            .ok_or_else(|| SkyqError::Analysis(format!("'{db}.{table}' is not a match table")))
    }

    /// Director (secondary-key) column of a table, when it has one.
    pub fn director_column(&self, db: &str, table: &str) -> Option<&str> {
        self.partitioned(db, table)
            .and_then(|t| t.director_column.as_deref())
    }

    /// Whether a table exists at all in the given database.
    pub fn has_table(&self, db: &str, table: &str) -> bool {
        self.databases.get(db).is_some_and(|d| {
            d.partitioned_tables.iter().any(|t| t.name == table)
                || d.regular_tables.iter().any(|t| t == table)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(name: &str, svc_port: u16) -> WorkerInfo {
        WorkerInfo {
            name: name.to_string(),
            svc_host: "host-a".to_string(),
            svc_port,
            fs_host: "host-a".to_string(),
            fs_port: svc_port + 1000,
            data_dir: "/data/{worker}/chunks".to_string(),
            is_enabled: true,
            is_read_only: false,
        }
    }

    fn family(name: &str, level: usize) -> DatabaseFamily {
        DatabaseFamily {
            name: name.to_string(),
            replication_level: level,
            num_stripes: 85,
            num_sub_stripes: 12,
        }
    }

    fn lsst() -> Catalog {
        Catalog::from_parts(
            vec![worker("w1", 25000), worker("w2", 25001)],
            vec![family("production", 2)],
            vec![DatabaseInfo {
                name: "LSST".to_string(),
                family: "production".to_string(),
                partitioned_tables: vec![
                    PartitionedTable {
                        name: "Object".to_string(),
                        sub_chunked: true,
                        director_column: Some("objectId".to_string()),
                        match_params: None,
                    },
                    PartitionedTable {
                        name: "RefObjMatch".to_string(),
                        sub_chunked: false,
                        director_column: None,
                        match_params: Some(MatchTableParams {
                            dir_col1: "refObjectId".to_string(),
                            dir_col2: "objectId".to_string(),
                            flag_col: "flags".to_string(),
                        }),
                    },
                ],
                regular_tables: vec!["Filter".to_string()],
            }],
        )
        .expect("catalog")
    }

    #[test]
    fn table_shape_queries() {
        let cat = lsst();
        assert!(cat.is_chunked("LSST", "Object"));
        assert!(cat.is_sub_chunked("LSST", "Object"));
        assert!(!cat.is_chunked("LSST", "Filter"));
        assert!(cat.is_match_table("LSST", "RefObjMatch"));
        assert!(!cat.is_match_table("LSST", "Object"));
        assert!(cat.has_table("LSST", "Filter"));
        assert!(!cat.has_table("LSST", "Nope"));
        assert_eq!(cat.director_column("LSST", "Object"), Some("objectId"));
    }

    #[test]
    fn data_dir_placeholder_is_substituted() {
        let cat = lsst();
        assert_eq!(
            cat.worker("w1").expect("w1").resolved_data_dir(),
            "/data/w1/chunks"
        );
    }

    #[test]
    fn duplicate_svc_endpoint_rejected() {
        let err = Catalog::from_parts(
            vec![worker("w1", 25000), worker("w2", 25000)],
            vec![],
            vec![],
        )
        .expect_err("should clash");
        assert!(err.to_string().contains("share svc endpoint"));
    }

    #[test]
    fn zero_replication_level_rejected() {
        let err = Catalog::from_parts(vec![], vec![family("f", 0)], vec![]).expect_err("level 0");
        assert!(err.to_string().contains("replication level"));
    }

    #[test]
    fn database_must_name_existing_family() {
        let err = Catalog::from_parts(
            vec![],
            vec![],
            vec![DatabaseInfo {
                name: "LSST".to_string(),
                family: "missing".to_string(),
                partitioned_tables: vec![],
                regular_tables: vec![],
            }],
        )
        .expect_err("unknown family");
        assert!(err.to_string().contains("unknown family"));
    }
}
