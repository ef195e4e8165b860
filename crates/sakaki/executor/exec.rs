//! Statement driver: walks the step DAG leaves first, builds task contexts,
//! and schedules each step's tasks on the serial scheduler or the worker
//! pool.

use std::cell::RefCell;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::{debug, info};

use sakaki_common::error::{ErrorCode, ErrorInfo};
use sakaki_common::status::Status;
use sakaki_common::config::KeyDistributionKind;
use sakaki_data::PagedArena;
use sakaki_index::dist::{KeyDistribution, KeyRange, SimpleKeyDistribution, UniformKeyDistribution};
use sakaki_kvs::EndPointKind;

use crate::exchange::ExchangeRuntime;
use crate::io::response::{Response, ResponseCode};
use crate::plan::{ProcessStep, ScanSpec, StepBody, StepGraph, StepId};
use crate::process::ops::encode_key_values;
use crate::process::task_context::{ContextContainer, TaskContext};
use crate::process::{ProcessExecutor, VariableTable};
use crate::request_context::RequestContext;
use crate::scheduler::dag::DagState;
use crate::scheduler::{ProcessTask, SchedulableTask, SerialScheduler, StepState, WorkerPool};
use crate::writer_count::calculate_partitions;

/// Executes a compiled statement against the request's transaction.
///
/// On failure the first fatal error is returned and reported through the
/// response as `application_error`; the transaction has already been moved
/// to `aborted` for transaction-fatal failures.
pub fn execute_statement(
    req: &Arc<RequestContext>,
    graph: &Arc<StepGraph>,
    response: Option<&dyn Response>,
) -> Result<(), ErrorInfo> {
    if let Err(e) = req.check_deadline() {
        req.set_error(e.clone());
        report(response, req);
        return Err(e);
    }
    req.transaction().activate();

    let runtimes: Vec<Option<ExchangeRuntime>> =
        graph.steps.iter().map(|s| ExchangeRuntime::from_step(&s.body)).collect();
    let mut dag = DagState::new(graph.steps.len());

    for id in graph.topological_order() {
        if req.error().is_some() {
            // drain: leave the remaining steps unscheduled
            break;
        }
        match &graph.step(id).body {
            StepBody::Process(process) => {
                if let Err(e) = run_process_step(req, graph, id, process, &runtimes, &mut dag) {
                    req.set_error(e);
                }
            }
            _ => {
                // exchanges are passive: their work happens in writer flush
                // and reader construction
                dag.advance(id, StepState::Prepared);
                dag.advance(id, StepState::Running);
                dag.advance(id, StepState::Completed);
            }
        }
    }
    dag.deactivate_all();
    report(response, req);
    match req.error() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn report(response: Option<&dyn Response>, req: &RequestContext) {
    let Some(response) = response else {
        return;
    };
    match req.error() {
        Some(e) => {
            response.code(ResponseCode::ApplicationError);
            response.message(&format!("{} {}", e.code(), e.message()));
        }
        None => response.code(ResponseCode::Success),
    }
    response.complete();
}

fn run_process_step(
    req: &Arc<RequestContext>,
    graph: &Arc<StepGraph>,
    id: StepId,
    process: &ProcessStep,
    runtimes: &[Option<ExchangeRuntime>],
    dag: &mut DagState,
) -> Result<(), ErrorInfo> {
    let config = req.config();
    let tx_readonly = req.transaction().readonly();

    // parallel-scan fanout: one strand task per pivot interval
    let strand_ranges = match process.root_scan() {
        Some(scan) if scan.parallel && tx_readonly && config.scan_default_parallel > 1 => {
            Some(compute_strand_ranges(req, scan, config.scan_default_parallel)?)
        }
        _ => None,
    };
    let task_count = match &strand_ranges {
        Some(ranges) => ranges.len(),
        None => calculate_partitions(graph, id, config, tx_readonly),
    };

    let step = graph.step(id);
    let inputs_empty = !step.inputs.is_empty()
        && step
            .inputs
            .iter()
            .all(|&i| runtimes[i].as_ref().map(ExchangeRuntime::no_input).unwrap_or(true));

    // pre-task phase: drain sub-inputs and build the task contexts
    let mut contexts = Vec::with_capacity(task_count);
    for partition in 0..task_count {
        let scan_range = strand_ranges.as_ref().map(|r| r[partition].clone());
        let use_strand = strand_ranges.as_ref().map(|r| r.len() > 1).unwrap_or(false);
        contexts.push(build_context(
            req,
            graph,
            id,
            process,
            partition,
            task_count,
            runtimes,
            scan_range,
            use_strand,
            inputs_empty,
        ));
    }
    dag.advance(id, StepState::Prepared);

    let executor = ProcessExecutor::new(Arc::clone(graph), id, contexts, Arc::clone(req));
    let tasks: Vec<Box<dyn SchedulableTask>> =
        (0..task_count).map(|_| Box::new(ProcessTask::new(Arc::clone(&executor))) as _).collect();
    dag.advance(id, StepState::Running);
    debug!(step = id, tasks = task_count, "scheduling process step");
    let saw_errors = if config.single_thread {
        SerialScheduler::new().run(tasks)
    } else {
        WorkerPool::new(config).run(tasks)
    };
    dag.advance(id, StepState::Completed);
    if saw_errors {
        info!(step = id, "process step completed with errors");
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn build_context(
    req: &Arc<RequestContext>,
    graph: &StepGraph,
    id: StepId,
    process: &ProcessStep,
    partition: usize,
    task_count: usize,
    runtimes: &[Option<ExchangeRuntime>],
    scan_range: Option<KeyRange>,
    use_strand: bool,
    empty_input_from_shuffle: bool,
) -> Box<TaskContext> {
    let pool = Arc::clone(req.page_pool());
    let step = graph.step(id);
    let variable_tables: Vec<VariableTable> =
        process.block_metas.iter().map(|m| VariableTable::new(Arc::clone(m))).collect();
    let mut readers = Vec::with_capacity(step.inputs.len() + step.sub_inputs.len());
    for &input in step.inputs.iter().chain(step.sub_inputs.iter()) {
        let runtime = runtimes[input].as_ref().expect("process inputs are exchanges");
        readers.push(RefCell::new(runtime.create_reader(
            partition,
            task_count,
            Arc::clone(&pool),
        )));
    }
    let mut writers = Vec::new();
    for output in graph.downstreams(id) {
        let runtime = runtimes[output].as_ref().expect("process outputs are exchanges");
        writers.push(RefCell::new(runtime.create_writer(Arc::clone(&pool))));
    }
    let transaction = Arc::clone(req.transaction());
    let strand = use_strand.then(|| transaction.strand());
    let sticky = process.has_write() || process.has_emit();
    Box::new(TaskContext {
        partition,
        variable_tables,
        contexts: ContextContainer::new(process.operators.len()),
        pool: Arc::clone(&pool),
        arena: PagedArena::new(Arc::clone(&pool)),
        varlen: PagedArena::new(pool),
        transaction,
        strand: RefCell::new(strand),
        readers,
        writers,
        channel_writer: RefCell::new(None),
        seat: RefCell::new(None),
        waker: Arc::new(AtomicBool::new(false)),
        scan_range,
        empty_input_from_shuffle,
        in_transaction_and_non_sticky: !sticky,
    })
}

/// Splits the scan range of a parallel scan into per-strand sub-ranges.
///
/// With no pivots (empty index, degenerate range, oracle fallback) a single
/// full-range strand runs, which keeps the scan complete.
fn compute_strand_ranges(
    req: &RequestContext,
    scan: &ScanSpec,
    fanout_cap: usize,
) -> Result<Vec<KeyRange>, ErrorInfo> {
    let (begin, begin_kind) = encode_bound(&scan.begin)?;
    let (end, end_kind) = encode_bound(&scan.end)?;
    let full = KeyRange::new(begin, begin_kind, end, end_kind);

    let Some(storage) = req.database().get_storage(&scan.storage_name) else {
        return Ok(vec![full]);
    };
    let tx = req.transaction().kvs_transaction();
    let mut pivots = match req.config().key_distribution {
        KeyDistributionKind::Simple => {
            SimpleKeyDistribution.compute_pivots(fanout_cap - 1, &full)
        }
        KeyDistributionKind::Uniform => {
            UniformKeyDistribution::new(storage.as_ref(), tx.as_ref())
                .compute_pivots(fanout_cap - 1, &full)
        }
    }
    .map_err(|e| {
        ErrorInfo::new(ErrorCode::SqlExecutionException, e.to_string(), Status::ErrUnknown)
    })?;
    pivots.sort();
    pivots.dedup();
    debug!(pivots = pivots.len(), "parallel scan fanout");

    let mut ranges = Vec::with_capacity(pivots.len() + 1);
    let mut begin = (full.begin_key().to_vec(), full.begin_kind());
    for pivot in pivots {
        ranges.push(KeyRange::new(
            begin.0,
            begin.1,
            pivot.clone(),
            EndPointKind::Exclusive,
        ));
        begin = (pivot, EndPointKind::Inclusive);
    }
    ranges.push(KeyRange::new(begin.0, begin.1, full.end_key().to_vec(), full.end_kind()));
    Ok(ranges)
}

fn encode_bound(
    bound: &crate::plan::ScanBound,
) -> Result<(Vec<u8>, EndPointKind), ErrorInfo> {
    if bound.kind == EndPointKind::Unbound {
        return Ok((Vec::new(), EndPointKind::Unbound));
    }
    let bytes = encode_key_values(&bound.keys).map_err(|e| e.info)?;
    Ok((bytes, bound.kind))
}
