//! Statement-level tests running compiled plans against the in-memory KV
//! engine.

use std::sync::Arc;

use sakaki_common::config::Config;
use sakaki_common::error::ErrorCode;
use sakaki_common::meta::{ExternalRecordMeta, RecordMeta};
use sakaki_common::status::Status;
use sakaki_common::types::{FieldType, Value};
use sakaki_data::PagePool;
use sakaki_index::{FieldInfo, PrimaryTarget, SecondaryKeyField, SecondaryTarget};
use sakaki_kvs::coder::CodingSpec;
use sakaki_kvs::memory::MemoryDatabase;
use sakaki_kvs::{Database, TransactionOption};
use sakaki_storage::StorageManager;

use sakaki_executor::exchange::AggregateFunctionKind;
use sakaki_executor::exec::execute_statement;
use sakaki_executor::expr::{BinaryOp, Expression};
use sakaki_executor::io::record_channel::{CollectingChannel, RecordChannel};
use sakaki_executor::io::response::{RecordingResponse, Response, ResponseCode};
use sakaki_executor::io::writer_pool::WriterPool;
use sakaki_executor::plan::{
    AggregateSpec, EmitSpec, ExchangeAggregateSpec, FieldMapping, OperatorKind, OperatorSpec,
    ProcessStep, ScanBound, ScanSpec, SecondaryScanInfo, Step, StepBody, StepGraph,
    TakeGroupSpec, UpdateColumn, ValuesSpec, WriteKind, WriteSpec,
};
use sakaki_executor::request_context::RequestContext;
use sakaki_executor::transaction::{TransactionContext, TransactionState};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
}

struct TestEngine {
    db: Arc<dyn Database>,
    config: Arc<Config>,
    storage_manager: Arc<StorageManager>,
    page_pool: Arc<PagePool>,
}

impl TestEngine {
    fn new() -> Self {
        init_tracing();
        Self {
            db: Arc::new(MemoryDatabase::new()),
            config: Arc::new(Config { single_thread: true, ..Config::default() }),
            storage_manager: Arc::new(StorageManager::new()),
            page_pool: Arc::new(PagePool::new()),
        }
    }

    fn with_config(config: Config) -> Self {
        Self { config: Arc::new(config), ..Self::new() }
    }

    fn request(
        &self,
        option: TransactionOption,
    ) -> (Arc<RequestContext>, Arc<CollectingChannel>, Arc<TransactionContext>) {
        let tx = TransactionContext::create(self.db.as_ref(), option).unwrap();
        let channel = CollectingChannel::new();
        let req = RequestContext::new(
            Arc::clone(&self.config),
            Arc::clone(&self.db),
            Arc::clone(&self.storage_manager),
            Arc::clone(&tx),
            Some(Arc::clone(&channel) as Arc<dyn RecordChannel>),
            WriterPool::new(2),
            Arc::clone(&self.page_pool),
            None,
        );
        (req, channel, tx)
    }
}

/// Block layout shared by the simple two-column table plans:
/// var 0 = C0 (int8 key), var 1 = C1 (float8).
fn two_column_block() -> Arc<RecordMeta> {
    RecordMeta::all_nullable(vec![FieldType::Int8, FieldType::Float8])
}

fn key_field(meta: &RecordMeta, index: usize, ty: FieldType) -> FieldInfo {
    FieldInfo::new(
        ty,
        meta.value_offset(index),
        meta.nullity_offset(index),
        true,
        CodingSpec::Ascending,
    )
}

/// Primary target of `T(C0 INT8 PRIMARY KEY, C1 DOUBLE)`.
fn two_column_target(storage: &str) -> Arc<PrimaryTarget> {
    let key_meta = RecordMeta::all_nullable(vec![FieldType::Int8]);
    let value_meta = RecordMeta::all_nullable(vec![FieldType::Float8]);
    let keys = vec![key_field(&key_meta, 0, FieldType::Int8)];
    let values = vec![key_field(&value_meta, 0, FieldType::Float8)];
    Arc::new(PrimaryTarget::new(
        storage,
        key_meta,
        value_meta,
        keys.clone(),
        keys,
        values,
    ))
}

/// Primary target of `T(C0 INT8 PRIMARY KEY)`.
fn single_column_target(storage: &str) -> Arc<PrimaryTarget> {
    let key_meta = RecordMeta::all_nullable(vec![FieldType::Int8]);
    let value_meta = RecordMeta::all_nullable(vec![]);
    let keys = vec![key_field(&key_meta, 0, FieldType::Int8)];
    Arc::new(PrimaryTarget::new(storage, key_meta, value_meta, keys.clone(), keys, vec![]))
}

fn write_step(
    block: Arc<RecordMeta>,
    values: ValuesSpec,
    write: WriteSpec,
) -> Arc<StepGraph> {
    StepGraph::new(vec![Step {
        id: 0,
        inputs: vec![],
        sub_inputs: vec![],
        body: StepBody::Process(ProcessStep {
            operators: vec![
                OperatorSpec {
                    index: 0,
                    block: 0,
                    downstream: Some(1),
                    kind: OperatorKind::Values(values),
                },
                OperatorSpec {
                    index: 1,
                    block: 0,
                    downstream: None,
                    kind: OperatorKind::Write(write),
                },
            ],
            root: 0,
            block_metas: vec![block],
            partitions: None,
        }),
    }])
}

fn insert_rows(engine: &TestEngine, storage: &str, rows: Vec<Vec<Value>>, two_columns: bool) {
    let (req, _channel, tx) = engine.request(TransactionOption::occ());
    let (target, block, targets, value_mappings) = if two_columns {
        (
            two_column_target(storage),
            two_column_block(),
            vec![0, 1],
            vec![FieldMapping { source: 1, target: 0 }],
        )
    } else {
        (
            single_column_target(storage),
            RecordMeta::all_nullable(vec![FieldType::Int8]),
            vec![0],
            vec![],
        )
    };
    let graph = write_step(
        block,
        ValuesSpec { targets, rows },
        WriteSpec {
            kind: WriteKind::Insert,
            primary: target,
            secondaries: vec![],
            key_mappings: vec![FieldMapping { source: 0, target: 0 }],
            value_mappings,
            updates: vec![],
            storage_entry: None,
        },
    );
    execute_statement(&req, &graph, None).unwrap();
    tx.commit().unwrap();
}

/// `SELECT C0[, C1] FROM storage` via scan -> emit.
fn select_all(engine: &TestEngine, storage: &str, two_columns: bool) -> Vec<Vec<Value>> {
    select_all_with(engine, storage, two_columns, TransactionOption::occ(), false)
}

fn select_all_with(
    engine: &TestEngine,
    storage: &str,
    two_columns: bool,
    option: TransactionOption,
    parallel: bool,
) -> Vec<Vec<Value>> {
    let (req, channel, tx) = engine.request(option);
    let block = if two_columns {
        two_column_block()
    } else {
        RecordMeta::all_nullable(vec![FieldType::Int8])
    };
    let value_fields = if two_columns {
        vec![key_field(&block, 1, FieldType::Float8)]
    } else {
        vec![]
    };
    let emit_fields: Vec<usize> = if two_columns { vec![0, 1] } else { vec![0] };
    let emit_types: Vec<FieldType> = if two_columns {
        vec![FieldType::Int8, FieldType::Float8]
    } else {
        vec![FieldType::Int8]
    };
    let graph = StepGraph::new(vec![Step {
        id: 0,
        inputs: vec![],
        sub_inputs: vec![],
        body: StepBody::Process(ProcessStep {
            operators: vec![
                OperatorSpec {
                    index: 0,
                    block: 0,
                    downstream: Some(1),
                    kind: OperatorKind::Scan(ScanSpec {
                        storage_name: storage.into(),
                        secondary: None,
                        key_fields: vec![key_field(&block, 0, FieldType::Int8)],
                        value_fields,
                        begin: ScanBound::unbound(),
                        end: ScanBound::unbound(),
                        limit: None,
                        parallel,
                        storage_entry: None,
                    }),
                },
                OperatorSpec {
                    index: 1,
                    block: 0,
                    downstream: None,
                    kind: OperatorKind::Emit(EmitSpec {
                        meta: ExternalRecordMeta::anonymous(RecordMeta::all_nullable(emit_types)),
                        fields: emit_fields,
                    }),
                },
            ],
            root: 0,
            block_metas: vec![block],
            partitions: None,
        }),
    }]);
    execute_statement(&req, &graph, None).unwrap();
    tx.commit().unwrap();
    let mut rows = channel.rows();
    rows.sort_by(|a, b| match (&a[0], &b[0]) {
        (Value::Int8(x), Value::Int8(y)) => x.cmp(y),
        _ => std::cmp::Ordering::Equal,
    });
    rows
}

#[test]
fn insert_then_select_round_trips() {
    let engine = TestEngine::new();
    engine.db.create_storage("T").unwrap();
    insert_rows(
        &engine,
        "T",
        vec![
            vec![Value::Int8(2), Value::Float8(2.0)],
            vec![Value::Int8(1), Value::Float8(1.0)],
        ],
        true,
    );
    let rows = select_all(&engine, "T", true);
    assert_eq!(
        rows,
        vec![
            vec![Value::Int8(1), Value::Float8(1.0)],
            vec![Value::Int8(2), Value::Float8(2.0)],
        ]
    );
}

#[test]
fn primary_key_update_preserves_scan_result() {
    // INSERT 0,2,4 then UPDATE C0 = C0 + 1: SELECT yields 1,3,5
    let engine = TestEngine::new();
    engine.db.create_storage("T").unwrap();
    insert_rows(
        &engine,
        "T",
        vec![
            vec![Value::Int8(0)],
            vec![Value::Int8(2)],
            vec![Value::Int8(4)],
        ],
        false,
    );

    let (req, _channel, tx) = engine.request(TransactionOption::occ());
    let block = RecordMeta::all_nullable(vec![FieldType::Int8]);
    let graph = StepGraph::new(vec![Step {
        id: 0,
        inputs: vec![],
        sub_inputs: vec![],
        body: StepBody::Process(ProcessStep {
            operators: vec![
                OperatorSpec {
                    index: 0,
                    block: 0,
                    downstream: Some(1),
                    kind: OperatorKind::Scan(ScanSpec {
                        storage_name: "T".into(),
                        secondary: None,
                        key_fields: vec![key_field(&block, 0, FieldType::Int8)],
                        value_fields: vec![],
                        begin: ScanBound::unbound(),
                        end: ScanBound::unbound(),
                        limit: None,
                        parallel: false,
                        storage_entry: None,
                    }),
                },
                OperatorSpec {
                    index: 1,
                    block: 0,
                    downstream: None,
                    kind: OperatorKind::Write(WriteSpec {
                        kind: WriteKind::Update,
                        primary: single_column_target("T"),
                        secondaries: vec![],
                        key_mappings: vec![FieldMapping { source: 0, target: 0 }],
                        value_mappings: vec![],
                        updates: vec![UpdateColumn {
                            key_field: Some(0),
                            value_field: None,
                            expr: Expression::binary(
                                BinaryOp::Add,
                                Expression::variable(0),
                                Expression::constant(Value::Int8(1)),
                            ),
                        }],
                        storage_entry: None,
                    }),
                },
            ],
            root: 0,
            block_metas: vec![block],
            partitions: None,
        }),
    }]);
    execute_statement(&req, &graph, None).unwrap();
    tx.commit().unwrap();

    let rows = select_all(&engine, "T", false);
    assert_eq!(
        rows,
        vec![vec![Value::Int8(1)], vec![Value::Int8(3)], vec![Value::Int8(5)]]
    );
}

fn upsert_row(engine: &TestEngine, storage: &str, key: i64, value: f64) {
    let (req, _channel, tx) = engine.request(TransactionOption::occ());
    let graph = write_step(
        two_column_block(),
        ValuesSpec {
            targets: vec![0, 1],
            rows: vec![vec![Value::Int8(key), Value::Float8(value)]],
        },
        WriteSpec {
            kind: WriteKind::Upsert,
            primary: two_column_target(storage),
            secondaries: vec![],
            key_mappings: vec![FieldMapping { source: 0, target: 0 }],
            value_mappings: vec![FieldMapping { source: 1, target: 0 }],
            updates: vec![],
            storage_entry: None,
        },
    );
    execute_statement(&req, &graph, None).unwrap();
    tx.commit().unwrap();
}

#[test]
fn upsert_inserts_and_replaces() {
    let engine = TestEngine::new();
    engine.db.create_storage("T").unwrap();
    insert_rows(&engine, "T", vec![vec![Value::Int8(1), Value::Float8(1.0)]], true);

    upsert_row(&engine, "T", 2, 2.0);
    assert_eq!(
        select_all(&engine, "T", true),
        vec![
            vec![Value::Int8(1), Value::Float8(1.0)],
            vec![Value::Int8(2), Value::Float8(2.0)],
        ]
    );

    upsert_row(&engine, "T", 1, 10.0);
    assert_eq!(
        select_all(&engine, "T", true),
        vec![
            vec![Value::Int8(1), Value::Float8(10.0)],
            vec![Value::Int8(2), Value::Float8(2.0)],
        ]
    );
}

#[test]
fn group_by_avg_over_aggregate_exchange() {
    let engine = TestEngine::new();
    engine.db.create_storage("TA").unwrap();
    insert_rows(
        &engine,
        "TA",
        vec![
            vec![Value::Int8(1), Value::Float8(1.0)],
            vec![Value::Int8(10), Value::Float8(1.0)],
            vec![Value::Int8(11), Value::Float8(1.0)],
            vec![Value::Int8(30), Value::Float8(2.0)],
            vec![Value::Int8(31), Value::Float8(2.0)],
        ],
        true,
    );
    // group key = C0 / 10, so groups are {0}, {10,11}, {30,31}
    let (req, channel, tx) = engine.request(TransactionOption::occ());
    let block = two_column_block();
    let exchange_meta = RecordMeta::all_nullable(vec![FieldType::Int8, FieldType::Float8]);
    let out_block = RecordMeta::all_nullable(vec![FieldType::Int8, FieldType::Float8]);
    let graph = StepGraph::new(vec![
        Step {
            id: 0,
            inputs: vec![],
            sub_inputs: vec![],
            body: StepBody::Process(ProcessStep {
                operators: vec![
                    OperatorSpec {
                        index: 0,
                        block: 0,
                        downstream: Some(1),
                        kind: OperatorKind::Scan(ScanSpec {
                            storage_name: "TA".into(),
                            secondary: None,
                            key_fields: vec![key_field(&block, 0, FieldType::Int8)],
                            value_fields: vec![key_field(&block, 1, FieldType::Float8)],
                            begin: ScanBound::unbound(),
                            end: ScanBound::unbound(),
                            limit: None,
                            parallel: false,
                            storage_entry: None,
                        }),
                    },
                    OperatorSpec {
                        index: 1,
                        block: 0,
                        downstream: Some(2),
                        kind: OperatorKind::Project(sakaki_executor::plan::ProjectSpec {
                            // group key = C0 / 10
                            columns: vec![(
                                0,
                                Expression::binary(
                                    BinaryOp::Divide,
                                    Expression::variable(0),
                                    Expression::constant(Value::Int8(10)),
                                ),
                            )],
                        }),
                    },
                    OperatorSpec {
                        index: 2,
                        block: 0,
                        downstream: None,
                        kind: OperatorKind::Offer(sakaki_executor::plan::OfferSpec {
                            output: 0,
                            fields: vec![
                                FieldMapping { source: 0, target: 0 },
                                FieldMapping { source: 1, target: 1 },
                            ],
                        }),
                    },
                ],
                root: 0,
                block_metas: vec![Arc::clone(&block)],
                partitions: None,
            }),
        },
        Step {
            id: 1,
            inputs: vec![0],
            sub_inputs: vec![],
            body: StepBody::Aggregate(AggregateSpec {
                meta: exchange_meta,
                key_fields: vec![0],
                functions: vec![ExchangeAggregateSpec {
                    kind: AggregateFunctionKind::Avg,
                    source_field: 1,
                    result_type: FieldType::Float8,
                }],
                partitions: 3,
            }),
        },
        Step {
            id: 2,
            inputs: vec![1],
            sub_inputs: vec![],
            body: StepBody::Process(ProcessStep {
                operators: vec![
                    OperatorSpec {
                        index: 0,
                        block: 0,
                        downstream: Some(1),
                        kind: OperatorKind::TakeGroup(TakeGroupSpec {
                            input: 0,
                            key_fields: vec![FieldMapping { source: 0, target: 0 }],
                            member_fields: vec![FieldMapping { source: 1, target: 1 }],
                        }),
                    },
                    OperatorSpec {
                        index: 1,
                        block: 0,
                        downstream: None,
                        kind: OperatorKind::Emit(EmitSpec {
                            meta: ExternalRecordMeta::anonymous(RecordMeta::all_nullable(vec![
                                FieldType::Int8,
                                FieldType::Float8,
                            ])),
                            fields: vec![0, 1],
                        }),
                    },
                ],
                root: 0,
                block_metas: vec![out_block],
                partitions: Some(1),
            }),
        },
    ]);
    execute_statement(&req, &graph, None).unwrap();
    tx.commit().unwrap();
    assert_eq!(
        channel.rows(),
        vec![
            vec![Value::Int8(0), Value::Float8(1.0)],
            vec![Value::Int8(1), Value::Float8(1.0)],
            vec![Value::Int8(3), Value::Float8(2.0)],
        ]
    );
}

#[test]
fn parallel_scan_without_pivots_is_complete() {
    // one row, fanout cap 4: the oracle finds no pivots and a single
    // full-range strand must still deliver exactly one row
    let engine = TestEngine::with_config(Config {
        single_thread: false,
        thread_pool_size: 3,
        scan_default_parallel: 4,
        ..Config::default()
    });
    engine.db.create_storage("TP").unwrap();
    insert_rows(&engine, "TP", vec![vec![Value::Int8(1)]], false);
    let rows = select_all_with(&engine, "TP", false, TransactionOption::rtx(), true);
    assert_eq!(rows, vec![vec![Value::Int8(1)]]);
}

#[test]
fn parallel_scan_with_pivots_is_complete() {
    let engine = TestEngine::with_config(Config {
        single_thread: false,
        thread_pool_size: 4,
        scan_default_parallel: 4,
        ..Config::default()
    });
    engine.db.create_storage("TP").unwrap();
    let rows: Vec<Vec<Value>> = (0..200).map(|i| vec![Value::Int8(i)]).collect();
    insert_rows(&engine, "TP", rows, false);
    let got = select_all_with(&engine, "TP", false, TransactionOption::rtx(), true);
    let expected: Vec<Vec<Value>> = (0..200).map(|i| vec![Value::Int8(i)]).collect();
    assert_eq!(got, expected);
}

#[test]
fn ltx_write_without_preserve_aborts_early() {
    let engine = TestEngine::new();
    engine.db.create_storage("T").unwrap();
    let (req, _channel, tx) =
        engine.request(TransactionOption::ltx(vec!["OTHER".to_owned()]));
    let graph = write_step(
        RecordMeta::all_nullable(vec![FieldType::Int8]),
        ValuesSpec { targets: vec![0], rows: vec![vec![Value::Int8(1)]] },
        WriteSpec {
            kind: WriteKind::Insert,
            primary: single_column_target("T"),
            secondaries: vec![],
            key_mappings: vec![FieldMapping { source: 0, target: 0 }],
            value_mappings: vec![],
            updates: vec![],
            storage_entry: None,
        },
    );
    let response = RecordingResponse::new();
    let err = execute_statement(&req, &graph, Some(&response as &dyn Response)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::LtxWriteOperationWithoutWritePreserveException);
    assert_eq!(tx.state(), TransactionState::Aborted);
    assert_eq!(response.recorded_code(), ResponseCode::ApplicationError);
    assert!(response
        .recorded_message()
        .contains("ltx_write_operation_without_write_preserve_exception"));
    // a later commit reports the inactive transaction
    let commit_err = tx.commit().unwrap_err();
    assert_eq!(commit_err.status(), Status::ErrInactiveTransaction);
    // a later abort is a no-op
    tx.abort().unwrap();
}

#[test]
fn unique_violation_on_insert() {
    let engine = TestEngine::new();
    engine.db.create_storage("T").unwrap();
    insert_rows(&engine, "T", vec![vec![Value::Int8(7)]], false);
    let (req, _channel, tx) = engine.request(TransactionOption::occ());
    let graph = write_step(
        RecordMeta::all_nullable(vec![FieldType::Int8]),
        ValuesSpec { targets: vec![0], rows: vec![vec![Value::Int8(7)]] },
        WriteSpec {
            kind: WriteKind::Insert,
            primary: single_column_target("T"),
            secondaries: vec![],
            key_mappings: vec![FieldMapping { source: 0, target: 0 }],
            value_mappings: vec![],
            updates: vec![],
            storage_entry: None,
        },
    );
    let err = execute_statement(&req, &graph, None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::UniqueConstraintViolationException);
    assert_eq!(tx.state(), TransactionState::Aborted);
}

fn secondary_target(primary: &Arc<PrimaryTarget>, storage: &str) -> Arc<SecondaryTarget> {
    let value_meta = primary.value_meta();
    Arc::new(SecondaryTarget::new(
        storage,
        vec![SecondaryKeyField {
            info: FieldInfo::new(
                FieldType::Float8,
                value_meta.value_offset(0),
                value_meta.nullity_offset(0),
                true,
                CodingSpec::Ascending,
            ),
            from_key: false,
        }],
    ))
}

#[test]
fn secondary_index_is_maintained_and_scannable() {
    let engine = TestEngine::new();
    engine.db.create_storage("T3").unwrap();
    engine.db.create_storage("T3_S").unwrap();
    let primary = two_column_target("T3");
    let secondary = secondary_target(&primary, "T3_S");

    // insert through the write operator so the secondary is maintained
    let (req, _channel, tx) = engine.request(TransactionOption::occ());
    let graph = write_step(
        two_column_block(),
        ValuesSpec {
            targets: vec![0, 1],
            rows: vec![
                vec![Value::Int8(1), Value::Float8(30.0)],
                vec![Value::Int8(2), Value::Float8(10.0)],
                vec![Value::Int8(3), Value::Float8(20.0)],
            ],
        },
        WriteSpec {
            kind: WriteKind::Insert,
            primary: Arc::clone(&primary),
            secondaries: vec![Arc::clone(&secondary)],
            key_mappings: vec![FieldMapping { source: 0, target: 0 }],
            value_mappings: vec![FieldMapping { source: 1, target: 0 }],
            updates: vec![],
            storage_entry: None,
        },
    );
    execute_statement(&req, &graph, None).unwrap();
    tx.commit().unwrap();

    // scan through the secondary: rows come back ordered by C1
    let (req, channel, tx) = engine.request(TransactionOption::occ());
    let block = two_column_block();
    let graph = StepGraph::new(vec![Step {
        id: 0,
        inputs: vec![],
        sub_inputs: vec![],
        body: StepBody::Process(ProcessStep {
            operators: vec![
                OperatorSpec {
                    index: 0,
                    block: 0,
                    downstream: Some(1),
                    kind: OperatorKind::Scan(ScanSpec {
                        storage_name: "T3_S".into(),
                        secondary: Some(SecondaryScanInfo {
                            primary_storage: "T3".into(),
                            secondary_key_fields: vec![FieldInfo::new(
                                FieldType::Float8,
                                0,
                                0,
                                true,
                                CodingSpec::Ascending,
                            )],
                        }),
                        key_fields: vec![key_field(&block, 0, FieldType::Int8)],
                        value_fields: vec![key_field(&block, 1, FieldType::Float8)],
                        begin: ScanBound::unbound(),
                        end: ScanBound::unbound(),
                        limit: None,
                        parallel: false,
                        storage_entry: None,
                    }),
                },
                OperatorSpec {
                    index: 1,
                    block: 0,
                    downstream: None,
                    kind: OperatorKind::Emit(EmitSpec {
                        meta: ExternalRecordMeta::anonymous(RecordMeta::all_nullable(vec![
                            FieldType::Int8,
                            FieldType::Float8,
                        ])),
                        fields: vec![0, 1],
                    }),
                },
            ],
            root: 0,
            block_metas: vec![block],
            partitions: None,
        }),
    }]);
    execute_statement(&req, &graph, None).unwrap();
    tx.commit().unwrap();
    assert_eq!(
        channel.rows(),
        vec![
            vec![Value::Int8(2), Value::Float8(10.0)],
            vec![Value::Int8(3), Value::Float8(20.0)],
            vec![Value::Int8(1), Value::Float8(30.0)],
        ]
    );
}

#[test]
fn filter_limits_emitted_rows() {
    let engine = TestEngine::new();
    engine.db.create_storage("T").unwrap();
    insert_rows(
        &engine,
        "T",
        (1..=6).map(|i| vec![Value::Int8(i), Value::Float8(i as f64)]).collect(),
        true,
    );
    let (req, channel, tx) = engine.request(TransactionOption::occ());
    let block = two_column_block();
    let graph = StepGraph::new(vec![Step {
        id: 0,
        inputs: vec![],
        sub_inputs: vec![],
        body: StepBody::Process(ProcessStep {
            operators: vec![
                OperatorSpec {
                    index: 0,
                    block: 0,
                    downstream: Some(1),
                    kind: OperatorKind::Scan(ScanSpec {
                        storage_name: "T".into(),
                        secondary: None,
                        key_fields: vec![key_field(&block, 0, FieldType::Int8)],
                        value_fields: vec![key_field(&block, 1, FieldType::Float8)],
                        begin: ScanBound::unbound(),
                        end: ScanBound::unbound(),
                        limit: None,
                        parallel: false,
                        storage_entry: None,
                    }),
                },
                OperatorSpec {
                    index: 1,
                    block: 0,
                    downstream: Some(2),
                    kind: OperatorKind::Filter(sakaki_executor::plan::FilterSpec {
                        condition: Expression::compare(
                            sakaki_executor::expr::CompareOp::Gt,
                            Expression::variable(0),
                            Expression::constant(Value::Int8(4)),
                        ),
                    }),
                },
                OperatorSpec {
                    index: 2,
                    block: 0,
                    downstream: None,
                    kind: OperatorKind::Emit(EmitSpec {
                        meta: ExternalRecordMeta::anonymous(RecordMeta::all_nullable(vec![
                            FieldType::Int8,
                        ])),
                        fields: vec![0],
                    }),
                },
            ],
            root: 0,
            block_metas: vec![block],
            partitions: None,
        }),
    }]);
    execute_statement(&req, &graph, None).unwrap();
    tx.commit().unwrap();
    assert_eq!(channel.rows(), vec![vec![Value::Int8(5)], vec![Value::Int8(6)]]);
}

#[test]
fn division_by_zero_aborts_the_statement() {
    let engine = TestEngine::new();
    engine.db.create_storage("T").unwrap();
    insert_rows(&engine, "T", vec![vec![Value::Int8(1), Value::Float8(0.0)]], true);
    let (req, _channel, tx) = engine.request(TransactionOption::occ());
    let block = two_column_block();
    let graph = StepGraph::new(vec![Step {
        id: 0,
        inputs: vec![],
        sub_inputs: vec![],
        body: StepBody::Process(ProcessStep {
            operators: vec![
                OperatorSpec {
                    index: 0,
                    block: 0,
                    downstream: Some(1),
                    kind: OperatorKind::Scan(ScanSpec {
                        storage_name: "T".into(),
                        secondary: None,
                        key_fields: vec![key_field(&block, 0, FieldType::Int8)],
                        value_fields: vec![],
                        begin: ScanBound::unbound(),
                        end: ScanBound::unbound(),
                        limit: None,
                        parallel: false,
                        storage_entry: None,
                    }),
                },
                OperatorSpec {
                    index: 1,
                    block: 0,
                    downstream: None,
                    kind: OperatorKind::Project(sakaki_executor::plan::ProjectSpec {
                        columns: vec![(
                            0,
                            Expression::binary(
                                BinaryOp::Divide,
                                Expression::variable(0),
                                Expression::constant(Value::Int8(0)),
                            ),
                        )],
                    }),
                },
            ],
            root: 0,
            block_metas: vec![block],
            partitions: None,
        }),
    }]);
    let err = execute_statement(&req, &graph, None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValueEvaluationException);
    assert_eq!(tx.state(), TransactionState::Aborted);
}
