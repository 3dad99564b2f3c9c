//! Golden tests for the full analysis pipeline: parse, plugin chain,
//! parallel/merge split and proxy tail.

use skyq_catalog::{Catalog, DatabaseFamily, DatabaseInfo, MatchTableParams, PartitionedTable, WorkerInfo};
use skyq_common::{ChunkId, SkyqError, TuningConfig};
use skyq_planner::{ChunkResolver, QuerySession};
use skyq_sql::QsRestrictor;
use std::sync::Arc;

struct TestResolver {
    all: Vec<u32>,
    by_object_id: Vec<u32>,
}

impl ChunkResolver for TestResolver {
    fn resolve(&self, restrictor: &QsRestrictor) -> Option<Vec<ChunkId>> {
        match restrictor.name.as_str() {
            "qserv_objectId" | "sIndex" => {
                Some(self.by_object_id.iter().map(|&c| ChunkId(c)).collect())
            }
            name if name.starts_with("qserv_areaspec_") => {
                Some(self.all.iter().take(1).map(|&c| ChunkId(c)).collect())
            }
            _ => None,
        }
    }

    fn all_chunks(&self, _family: &str) -> Vec<ChunkId> {
        self.all.iter().map(|&c| ChunkId(c)).collect()
    }

    fn sub_chunks(&self, _family: &str, _chunk: ChunkId) -> Vec<u32> {
        vec![0, 1, 2]
    }
}

fn resolver_with(all: Vec<u32>) -> TestResolver {
    TestResolver {
        all,
        by_object_id: vec![147],
    }
}

fn worker(name: &str, port: u16) -> WorkerInfo {
    WorkerInfo {
        name: name.to_string(),
        svc_host: name.to_string(),
        svc_port: port,
        fs_host: name.to_string(),
        fs_port: port + 1000,
        data_dir: "/data/{worker}".to_string(),
        is_enabled: true,
        is_read_only: false,
    }
}

fn lsst_catalog() -> Arc<Catalog> {
    let partitioned = |name: &str, sub: bool| PartitionedTable {
        name: name.to_string(),
        sub_chunked: sub,
        director_column: Some("objectId".to_string()),
        match_params: None,
    };
    Arc::new(
        Catalog::from_parts(
            vec![worker("w1", 25000)],
            vec![DatabaseFamily {
                name: "production".to_string(),
                replication_level: 2,
                num_stripes: 85,
                num_sub_stripes: 12,
            }],
            vec![DatabaseInfo {
                name: "LSST".to_string(),
                family: "production".to_string(),
                partitioned_tables: vec![
                    partitioned("Source", false),
                    partitioned("Object", true),
                    PartitionedTable {
                        name: "RefObjMatch".to_string(),
                        sub_chunked: false,
                        director_column: None,
                        match_params: Some(MatchTableParams {
                            dir_col1: "dirColName1".to_string(),
                            dir_col2: "dirColName2".to_string(),
                            flag_col: "flagCol".to_string(),
                        }),
                    },
                ],
                regular_tables: vec![
                    "Filter".to_string(),
                    "Science_Ccd_Exposure".to_string(),
                ],
            }],
        )
        .expect("catalog"),
    )
}

fn analyze(sql: &str, chunks: Vec<u32>) -> QuerySession {
    QuerySession::analyze(
        sql,
        "LSST",
        lsst_catalog(),
        &resolver_with(chunks),
        &TuningConfig::default(),
    )
    .expect("analysis")
}

fn parallel_for_first_chunk(session: &QuerySession, chunks: Vec<u32>) -> String {
    let specs = session.chunk_specs(&resolver_with(chunks));
    specs[0].fragments[0].clone()
}

#[test]
fn order_by_without_aggregate_goes_to_proxy_tail() {
    let session = analyze(
        "SELECT objectId, taiMidPoint FROM Source ORDER BY objectId ASC",
        vec![100],
    );
    assert_eq!(
        parallel_for_first_chunk(&session, vec![100]),
        "SELECT objectId,taiMidPoint FROM LSST.Source_100 AS QST_1_"
    );
    assert_eq!(session.merge_sql(), None);
    assert_eq!(session.proxy_order_by(), Some("ORDER BY objectId ASC"));
}

#[test]
fn avg_splits_into_count_and_sum() {
    let session = analyze(
        "SELECT objectId, AVG(taiMidPoint) FROM Source GROUP BY objectId ORDER BY objectId ASC",
        vec![100],
    );
    assert_eq!(
        parallel_for_first_chunk(&session, vec![100]),
        "SELECT objectId,COUNT(taiMidPoint) AS QS1_COUNT,SUM(taiMidPoint) AS QS2_SUM \
         FROM LSST.Source_100 AS QST_1_ GROUP BY objectId"
    );
    assert_eq!(
        session.merge_sql().as_deref(),
        Some("SELECT objectId,(SUM(QS2_SUM)/SUM(QS1_COUNT)) GROUP BY objectId")
    );
    assert_eq!(session.proxy_order_by(), Some("ORDER BY objectId ASC"));
}

#[test]
fn aggregate_with_limit_keeps_order_in_both_forms() {
    let session = analyze(
        "SELECT filterId, SUM(photClam) FROM Filter GROUP BY filterId ORDER BY filterId LIMIT 3",
        vec![100],
    );
    assert_eq!(
        parallel_for_first_chunk(&session, vec![100]),
        "SELECT filterId,SUM(photClam) AS QS1_SUM FROM LSST.Filter AS QST_1_ \
         GROUP BY filterId ORDER BY filterId LIMIT 3"
    );
    assert_eq!(
        session.merge_sql().as_deref(),
        Some("SELECT filterId,SUM(QS1_SUM) GROUP BY filterId ORDER BY filterId LIMIT 3")
    );
    assert_eq!(session.proxy_order_by(), Some("ORDER BY filterId"));
}

#[test]
fn plain_limit_keeps_order_in_parallel_without_merge() {
    let session = analyze(
        "SELECT run FROM LSST.Science_Ccd_Exposure ORDER BY field LIMIT 2",
        vec![100],
    );
    assert_eq!(
        parallel_for_first_chunk(&session, vec![100]),
        "SELECT run FROM LSST.Science_Ccd_Exposure AS QST_1_ ORDER BY field LIMIT 2"
    );
    assert_eq!(session.merge_sql(), None);
    assert_eq!(session.proxy_order_by(), Some("ORDER BY field"));
}

#[test]
fn match_table_filter_is_and_prepended() {
    let session = analyze("SELECT * FROM RefObjMatch WHERE x > 0", vec![100, 101]);
    let sql = parallel_for_first_chunk(&session, vec![100, 101]);
    assert!(
        sql.contains("WHERE (dirColName1 IS NULL OR flagCol<>2) AND x>0"),
        "got: {sql}"
    );
}

#[test]
fn match_table_filter_creates_where_when_absent() {
    let session = analyze("SELECT * FROM RefObjMatch", vec![100]);
    let sql = parallel_for_first_chunk(&session, vec![100]);
    assert!(
        sql.ends_with("WHERE (dirColName1 IS NULL OR flagCol<>2)"),
        "got: {sql}"
    );
}

#[test]
fn scan_classification_follows_threshold() {
    // Two chunks, column-reading query, no secondary-key restrictor: scan.
    let scan = analyze("SELECT objectId FROM Source", vec![100, 101]);
    assert_eq!(
        scan.context().scan_tables,
        vec![("LSST".to_string(), "Source".to_string())]
    );

    // One chunk is below the default threshold of 2: squashed.
    let small = analyze("SELECT objectId FROM Source", vec![100]);
    assert!(small.context().scan_tables.is_empty());

    // Secondary-key restrictor makes it point-like regardless of count.
    let point = analyze(
        "SELECT objectId FROM Object WHERE qserv_objectId(390034570102582)",
        vec![100, 101],
    );
    assert!(point.context().scan_tables.is_empty());
    assert_eq!(point.chunks(), &[ChunkId(147)]);

    // Pure COUNT(*) does not read columns.
    let count = analyze("SELECT COUNT(*) FROM Source", vec![100, 101]);
    assert!(count.context().scan_tables.is_empty());
}

#[test]
fn restrictors_are_extracted_and_residual_where_remains() {
    let session = analyze(
        "SELECT objectId FROM Object WHERE qserv_areaspec_box(0,0,1,1) AND x > 3",
        vec![100, 101],
    );
    let restrictors = &session.context().restrictors;
    assert_eq!(restrictors.len(), 1);
    assert_eq!(restrictors[0].name, "qserv_areaspec_box");
    assert_eq!(restrictors[0].args, vec!["0", "0", "1", "1"]);
    let sql = parallel_for_first_chunk(&session, vec![100, 101]);
    assert!(sql.contains("WHERE x>3"), "got: {sql}");
    assert!(!sql.contains("areaspec"), "got: {sql}");
    // Area restrictor narrowed the chunk set to its first chunk.
    assert_eq!(session.chunks(), &[ChunkId(100)]);
}

#[test]
fn self_join_on_sub_chunked_table_expands_sub_chunks() {
    let session = analyze(
        "SELECT o1.objectId FROM Object AS o1, Object AS o2 WHERE o1.x = o2.x",
        vec![100],
    );
    let specs = session.chunk_specs(&resolver_with(vec![100]));
    assert_eq!(specs[0].sub_chunks, vec![0, 1, 2]);
    assert_eq!(specs[0].fragments.len(), 3);
    assert!(specs[0].fragments[0].contains("LSST.Object_100_0"));
    assert!(specs[0].fragments[2].contains("LSST.Object_100_2"));
}

#[test]
fn order_by_column_missing_from_aggregate_select_fails() {
    let err = QuerySession::analyze(
        "SELECT objectId, AVG(taiMidPoint) FROM Source GROUP BY objectId ORDER BY raErr",
        "LSST",
        lsst_catalog(),
        &resolver_with(vec![100]),
        &TuningConfig::default(),
    )
    .expect_err("raErr is not in the SELECT list");
    assert!(matches!(err, SkyqError::Analysis(_)), "got: {err}");
}

#[test]
fn ambiguous_and_unknown_names_fail_analysis() {
    let ambiguous = QuerySession::analyze(
        "SELECT objectId FROM Object AS a, Source AS b",
        "LSST",
        lsst_catalog(),
        &resolver_with(vec![100]),
        &TuningConfig::default(),
    )
    .expect_err("two tables, unqualified column");
    assert!(matches!(ambiguous, SkyqError::Analysis(_)));

    let unknown = QuerySession::analyze(
        "SELECT x FROM NoSuchTable",
        "LSST",
        lsst_catalog(),
        &resolver_with(vec![100]),
        &TuningConfig::default(),
    )
    .expect_err("unknown table");
    assert!(matches!(unknown, SkyqError::Analysis(_)));
}

#[test]
fn non_partitioned_query_uses_single_dummy_chunk() {
    let session = analyze("SELECT filterId FROM Filter", vec![100, 101]);
    assert_eq!(session.chunks().len(), 1);
    assert_eq!(session.chunks()[0], ChunkId(skyq_planner::DUMMY_CHUNK));
    let specs = session.chunk_specs(&resolver_with(vec![100, 101]));
    // Regular tables are never chunk-substituted.
    assert_eq!(
        specs[0].fragments[0],
        "SELECT filterId FROM LSST.Filter AS QST_1_"
    );
}
