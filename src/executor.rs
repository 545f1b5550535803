//! Materialisation of lazy computation graphs.

use crate::chunk_store::ChunkStore;
use crate::data_array::DataArray;
use crate::error::ExplorerError;
use crate::lazy::{variable_axis, LazyArray, Op};
use crate::metrics::{MATERIALISATIONS, MATERIALISATION_RETRIES, MATERIALISATION_TIME};
use crate::operations;

use hashbrown::HashMap;
use ndarray::{ArrayD, Axis, IxDyn, Slice};
use std::ops::Range;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use uuid::Uuid;

/// Default number of times a materialisation is retried after a transient failure.
pub const DEFAULT_MAX_RETRIES: usize = 2;

type Values = Arc<ArrayD<f64>>;

/// Evaluates lazy arrays against a chunk store.
///
/// Evaluation walks the graph inputs-first, evaluating each node once per attempt even when it
/// is shared by several consumers. Chunk reads fan out as Tokio tasks bounded by the resource
/// manager; kernels run inline or on the Rayon thread pool. Under a memory limit, the memory a
/// graph needs is reserved before evaluation starts, splitting the graph into blocks if needed.
#[derive(Debug)]
pub struct Executor {
    chunk_store: Arc<ChunkStore>,
    max_retries: usize,
    use_rayon: bool,
}

impl Executor {
    pub fn new(chunk_store: Arc<ChunkStore>) -> Self {
        Self {
            chunk_store,
            max_retries: DEFAULT_MAX_RETRIES,
            use_rayon: false,
        }
    }

    /// Sets the number of retries after transient failures.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets whether kernels run on the Rayon thread pool.
    pub fn with_rayon(mut self, use_rayon: bool) -> Self {
        self.use_rayon = use_rayon;
        self
    }

    /// Reads and computes the values of a lazy array.
    ///
    /// Transient failures, such as interrupted store reads or panicking kernels, cause the whole
    /// graph to be evaluated again, up to the retry limit. Chunks decoded by earlier attempts are
    /// served from the chunk cache.
    #[tracing::instrument(skip(self, array), fields(array = %array, run_id = %Uuid::new_v4()))]
    pub async fn materialize(&self, array: &LazyArray) -> Result<DataArray, ExplorerError> {
        let timer = MATERIALISATION_TIME.start_timer();
        let mut attempts = 0;
        let result = loop {
            attempts += 1;
            match self.evaluate(array).await {
                Ok(values) => break Ok(values),
                Err(err) if err.is_transient() && attempts <= self.max_retries => {
                    MATERIALISATION_RETRIES.inc();
                    tracing::warn!(
                        "Attempt {} of {} failed, retrying: {}",
                        attempts,
                        self.max_retries + 1,
                        err
                    );
                }
                Err(err) if err.is_transient() => {
                    break Err(ExplorerError::RetriesExhausted {
                        attempts,
                        source: Box::new(err),
                    })
                }
                Err(err) => break Err(err),
            }
        };
        timer.observe_duration();
        let outcome = if result.is_ok() { "success" } else { "failure" };
        MATERIALISATIONS.with_label_values(&[outcome]).inc();
        let values = result?;
        tracing::debug!("Materialised after {} attempt(s)", attempts);
        DataArray::new(
            array.name().map(str::to_string),
            array.dims().to_vec(),
            values,
        )
    }

    /// Evaluates the graph once, in blocks if the memory limit requires it.
    async fn evaluate(&self, array: &LazyArray) -> Result<ArrayD<f64>, ExplorerError> {
        let resource_manager = self.chunk_store.resource_manager();
        let plan = BlockPlan::new(array, resource_manager.memory_limit())?;
        // Held until every block has been evaluated.
        let _mem_permits = resource_manager.memory(plan.reservation).await?;
        let Some(dim) = &plan.dim else {
            return self.evaluate_block(array, None).await;
        };
        tracing::debug!(
            "Evaluating {} blocks along {} within {} bytes",
            plan.blocks.len(),
            dim,
            plan.reservation
        );
        let axis = array.axis(dim)?;
        let mut output = ArrayD::from_elem(IxDyn(&array.shape()), f64::NAN);
        for range in &plan.blocks {
            let block = Block {
                dim: dim.clone(),
                range: range.clone(),
            };
            let values = self.evaluate_block(array, Some(&block)).await?;
            output
                .slice_axis_mut(Axis(axis), Slice::from(range.clone()))
                .assign(&values);
        }
        Ok(output)
    }

    async fn evaluate_block(
        &self,
        array: &LazyArray,
        block: Option<&Block>,
    ) -> Result<ArrayD<f64>, ExplorerError> {
        let order = array.post_order();
        // Count the consumers of each node so that intermediate results can be released early.
        let mut consumers: HashMap<usize, usize> = HashMap::new();
        for node in &order {
            for input in node.node().op.inputs() {
                *consumers.entry(input.id()).or_default() += 1;
            }
        }
        let mut results: HashMap<usize, Values> = HashMap::new();
        for node in &order {
            let values = self.evaluate_node(node, block, &results).await?;
            for input in node.node().op.inputs() {
                if let Some(count) = consumers.get_mut(&input.id()) {
                    *count -= 1;
                    if *count == 0 {
                        results.remove(&input.id());
                    }
                }
            }
            results.insert(node.id(), values);
        }
        let values = results
            .remove(&array.id())
            .ok_or(ExplorerError::EmptyArray {
                operation: "materialise",
            })?;
        Ok(Arc::try_unwrap(values).unwrap_or_else(|values| (*values).clone()))
    }

    async fn evaluate_node(
        &self,
        array: &LazyArray,
        block: Option<&Block>,
        results: &HashMap<usize, Values>,
    ) -> Result<Values, ExplorerError> {
        let input = |input: &LazyArray| -> Result<Values, ExplorerError> {
            results
                .get(&input.id())
                .cloned()
                .ok_or(ExplorerError::EmptyArray {
                    operation: "evaluate input",
                })
        };
        let values = match &array.node().op {
            Op::Source {
                variable,
                region,
                keep,
            } => {
                let region = match block {
                    Some(block) => block.narrow(array, region, keep),
                    None => region.clone(),
                };
                let mut values = self.chunk_store.read_region(variable, &region).await?;
                for (axis, kept) in keep.iter().enumerate().rev() {
                    if !kept {
                        values = values.index_axis_move(Axis(axis), 0);
                    }
                }
                values
            }
            Op::Take {
                input: source,
                axis,
                indices,
                drop,
            } => {
                let source = input(source)?;
                let (axis, indices, drop) = (*axis, indices.clone(), *drop);
                self.run(move || Ok(operations::take(source.view(), axis, &indices, drop)))
                    .await?
            }
            Op::Reduce {
                input: source,
                axes,
                reducer,
            } => {
                let source = input(source)?;
                let (axes, reducer) = (axes.clone(), *reducer);
                self.run(move || Ok(operations::reduce(source.view(), &axes, reducer)))
                    .await?
            }
            Op::Bucket {
                input: source,
                axis,
                buckets,
                reducer,
            } => {
                let source = input(source)?;
                let (axis, buckets, reducer) = (*axis, buckets.clone(), *reducer);
                self.run(move || operations::bucket_reduce(source.view(), axis, &buckets, reducer))
                    .await?
            }
            Op::Binary { lhs, rhs, op } => {
                let lhs_dims = dim_names(lhs);
                let rhs_dims = dim_names(rhs);
                let dims = dim_names(array);
                let mut shape = array.shape();
                if let Some(block) = block {
                    if let Ok(axis) = array.axis(&block.dim) {
                        shape[axis] = block.range.len();
                    }
                }
                let (lhs, rhs, op) = (input(lhs)?, input(rhs)?, *op);
                self.run(move || {
                    operations::binary(
                        lhs.view(),
                        &lhs_dims,
                        rhs.view(),
                        &rhs_dims,
                        &dims,
                        &shape,
                        op,
                    )
                })
                .await?
            }
            Op::Unary { input: source, op } => {
                let source = input(source)?;
                let op = *op;
                self.run(move || Ok(source.map(|value| op.apply(*value))))
                    .await?
            }
            Op::Rename { input: source } => return input(source),
        };
        Ok(Arc::new(values))
    }

    /// Runs a kernel under a task permit, on the Rayon pool if configured.
    async fn run<F>(&self, kernel: F) -> Result<ArrayD<f64>, ExplorerError>
    where
        F: FnOnce() -> Result<ArrayD<f64>, ExplorerError> + Send + 'static,
    {
        let _task_permit = self.chunk_store.resource_manager().task().await?;
        if self.use_rayon {
            tokio_rayon::spawn(move || std::panic::catch_unwind(AssertUnwindSafe(kernel)))
                .await
                .map_err(|panic| ExplorerError::WorkerPanicked {
                    reason: panic_reason(panic.as_ref()),
                })?
        } else {
            kernel()
        }
    }
}

fn dim_names(array: &LazyArray) -> Vec<String> {
    array.dim_names().into_iter().map(str::to_string).collect()
}

/// Positions along one dimension of the output, evaluated on their own.
#[derive(Clone, Debug, PartialEq)]
struct Block {
    dim: String,
    range: Range<usize>,
}

impl Block {
    /// Narrows the region of a source node to the block.
    fn narrow(
        &self,
        array: &LazyArray,
        region: &[Range<usize>],
        keep: &[bool],
    ) -> Vec<Range<usize>> {
        let mut region = region.to_vec();
        let source_axis = array
            .axis(&self.dim)
            .ok()
            .and_then(|axis| variable_axis(keep, axis));
        if let Some(source_axis) = source_axis {
            let start = region[source_axis].start;
            region[source_axis] = start + self.range.start..start + self.range.end;
        }
        region
    }
}

/// How a graph is split so that the values it holds at once fit the memory limit.
///
/// Every node's output is assumed to be alive at the same time, which bounds the memory held
/// while evaluating one block. When the whole graph does not fit, it is evaluated in blocks along
/// an output dimension that every node passes through untouched, and the blocks are written into
/// a preallocated output.
#[derive(Debug, PartialEq)]
struct BlockPlan {
    /// Dimension split into blocks, or `None` to evaluate the graph in one go
    dim: Option<String>,
    blocks: Vec<Range<usize>>,
    /// Bytes reserved from the memory pool for the whole evaluation
    reservation: usize,
}

impl BlockPlan {
    fn new(array: &LazyArray, memory_limit: Option<usize>) -> Result<Self, ExplorerError> {
        let order = array.post_order();
        let total: usize = order.iter().map(node_bytes).sum();
        let single = |reservation| BlockPlan {
            dim: None,
            blocks: vec![],
            reservation,
        };
        let Some(limit) = memory_limit else {
            return Ok(single(0));
        };
        if total <= limit {
            return Ok(single(total));
        }
        let Some(dim) = block_dimension(array, &order) else {
            return Err(ExplorerError::InsufficientMemory {
                requested: total,
                total: limit,
            });
        };

        // Bytes independent of the block length, and bytes per position along the dimension.
        let mut fixed = node_bytes(array);
        let mut per_position = 0;
        for node in &order {
            let bytes = node_bytes(node);
            match node.axis(&dim) {
                Ok(axis) => per_position += bytes / node.shape()[axis].max(1),
                Err(_) => fixed += bytes,
            }
        }
        let length = array.shape()[array.axis(&dim)?];
        let block_len = limit.saturating_sub(fixed) / per_position.max(1);
        if block_len == 0 {
            return Err(ExplorerError::InsufficientMemory {
                requested: fixed + per_position,
                total: limit,
            });
        }
        let block_len = block_len.min(length);
        let blocks = (0..length)
            .step_by(block_len)
            .map(|start| start..(start + block_len).min(length))
            .collect();
        Ok(BlockPlan {
            dim: Some(dim),
            blocks,
            reservation: fixed + per_position * block_len,
        })
    }
}

/// Returns the bytes of `f64` values a node holds. Renaming shares its input.
fn node_bytes(array: &LazyArray) -> usize {
    match array.node().op {
        Op::Rename { .. } => 0,
        _ => array.len() * std::mem::size_of::<f64>(),
    }
}

/// Returns the longest output dimension that every node of the graph leaves in place, so that
/// each block of it can be evaluated without the others.
fn block_dimension(array: &LazyArray, order: &[LazyArray]) -> Option<String> {
    let mut dims: Vec<(&str, usize)> = array
        .dim_names()
        .into_iter()
        .zip(array.shape())
        .filter(|(_, len)| *len > 1)
        .collect();
    dims.sort_by(|a, b| b.1.cmp(&a.1));
    dims.into_iter()
        .find(|(dim, _)| order.iter().all(|node| passes_through(node, dim)))
        .map(|(dim, _)| dim.to_string())
}

/// Returns whether a node keeps `dim` exactly as its inputs have it.
fn passes_through(array: &LazyArray, dim: &str) -> bool {
    let op = &array.node().op;
    let input_axis = |input: &LazyArray| input.axis(dim).ok();
    let touched = match op {
        Op::Source { .. } => return true,
        Op::Take { input, axis, .. } | Op::Bucket { input, axis, .. } => {
            input_axis(input) == Some(*axis)
        }
        Op::Reduce { input, axes, .. } => {
            input_axis(input).is_some_and(|axis| axes.contains(&axis))
        }
        Op::Binary { .. } | Op::Unary { .. } | Op::Rename { .. } => false,
    };
    let in_inputs = op.inputs().iter().any(|input| input_axis(input).is_some());
    !touched && in_inputs == array.axis(dim).is_ok()
}

/// Extracts the message of a panic payload.
fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Selector;
    use crate::dataset::Dataset;
    use crate::object_store::ObjectStore;
    use crate::operations::Reducer;
    use crate::resample::Frequency;
    use crate::resource_manager::ResourceManager;
    use crate::test_utils::{self, FlakyStore, DAYS, LATS, LONS, MEMBERS};

    use chrono::NaiveDate;

    async fn open(
        store: Arc<dyn ObjectStore>,
        resource_manager: ResourceManager,
    ) -> (Dataset, Arc<ChunkStore>) {
        let chunk_store = Arc::new(ChunkStore::new(store, Arc::new(resource_manager), 64));
        let dataset = Dataset::open(&chunk_store, test_utils::ENSEMBLE_PREFIX)
            .await
            .unwrap();
        (dataset, chunk_store)
    }

    async fn ensemble() -> (Dataset, Executor) {
        let (dataset, chunk_store) =
            open(test_utils::ensemble_store(), ResourceManager::unlimited()).await;
        (dataset, Executor::new(chunk_store))
    }

    /// The single chunk at the origin of `t_mean`, on the first day.
    fn corner(dataset: &Dataset) -> LazyArray {
        dataset
            .variable("t_mean")
            .unwrap()
            .isel("time", 0)
            .unwrap()
            .isel_range("lat", 0, 2)
            .unwrap()
            .isel_range("lon", 0, 3)
            .unwrap()
    }

    fn assert_close(expected: f64, actual: f64) {
        assert!(
            (expected - actual).abs() < 1e-9,
            "expected {} got {}",
            expected,
            actual
        );
    }

    #[tokio::test]
    async fn materialize_source_region() {
        let (dataset, executor) = ensemble().await;
        let t_mean = dataset.variable("t_mean").unwrap();
        let day = t_mean
            .sel(
                "time",
                &Selector::Date(NaiveDate::from_ymd_opt(2001, 3, 1).unwrap()),
            )
            .unwrap();
        let result = executor.materialize(&day).await.unwrap();
        assert_eq!(vec!["lat", "lon", "ensemble"], result.dim_names());
        assert_eq!(&[LATS.len(), LONS.len(), MEMBERS], result.shape());
        assert_eq!(Some("t_mean".to_string()), result.name);
        let t = 366 + 31 + 28;
        for (index, value) in result.values.indexed_iter() {
            let expected = test_utils::t_mean_value(t, index[0], index[1], index[2]);
            if expected.is_nan() {
                assert!(value.is_nan());
            } else {
                assert_close(expected, *value);
            }
        }
    }

    #[tokio::test]
    async fn reductions_keep_remaining_coordinates() {
        let (dataset, executor) = ensemble().await;
        let elevation = dataset.variable("elevation").unwrap();
        let result = executor
            .materialize(&elevation.mean(&["lon"]).unwrap())
            .await
            .unwrap();
        assert_eq!(vec!["lat"], result.dim_names());
        assert_eq!(dataset.coord("lat").unwrap(), result.coord("lat").unwrap());
        // Row 0 misses its first cell.
        assert_close((170.0 + 190.0 + 210.0 + 230.0) / 4.0, result.values[[0]]);
        assert_close(220.0, result.values[[3]]);
    }

    #[tokio::test]
    async fn anomalies_average_to_zero() {
        let (dataset, executor) = ensemble().await;
        let t_mean = dataset.variable("t_mean").unwrap();
        let week = t_mean.isel_range("time", 100, 107).unwrap();
        let anomaly = (&week - &week.mean(&["ensemble"]).unwrap()).unwrap();
        let result = executor
            .materialize(&anomaly.mean(&["ensemble"]).unwrap())
            .await
            .unwrap();
        assert_eq!(vec!["time", "lat", "lon"], result.dim_names());
        for value in result.valid_values() {
            assert!(value.abs() < 1e-9, "{}", value);
        }
        assert_eq!(7 * LATS.len() * LONS.len() - 7, result.valid_values().count());
    }

    #[tokio::test]
    async fn shared_nodes_match_rayon() {
        let (dataset, executor) = ensemble().await;
        let t_mean = dataset.variable("t_mean").unwrap();
        let day = t_mean.isel("time", 10).unwrap();
        let spread =
            (&day.max(&["ensemble"]).unwrap() - &day.min(&["ensemble"]).unwrap()).unwrap();
        let inline = executor.materialize(&spread).await.unwrap();
        let executor = executor.with_rayon(true);
        let pooled = executor.materialize(&spread).await.unwrap();
        assert_eq!(inline.values.len(), pooled.values.len());
        for (a, b) in inline.values.iter().zip(pooled.values.iter()) {
            assert!(a == b || (a.is_nan() && b.is_nan()));
        }
        // Members differ by 0.5 degrees each.
        assert_close(1.0, inline.values[[1, 1]]);
    }

    #[tokio::test]
    async fn annual_maximum() {
        let (dataset, executor) = ensemble().await;
        let pcp = dataset.variable("pcp").unwrap();
        let annual = pcp
            .isel("lat", 1)
            .unwrap()
            .isel("lon", 1)
            .unwrap()
            .resample(Frequency::Annual, Reducer::Max)
            .unwrap();
        let result = executor.materialize(&annual).await.unwrap();
        assert_eq!(vec!["time", "ensemble"], result.dim_names());
        for (year, days) in [(0, 0..366), (1, 366..DAYS)] {
            for member in 0..MEMBERS {
                let expected = days
                    .clone()
                    .map(|t| test_utils::pcp_value(t, 1, 1, member))
                    .fold(f64::NEG_INFINITY, f64::max);
                assert_close(expected, result.values[[year, member]]);
            }
        }
    }

    #[tokio::test]
    async fn masked_sums_only_count_cold_days() {
        let (dataset, executor) = ensemble().await;
        let cell = |name: &str| {
            dataset
                .variable(name)
                .unwrap()
                .isel("lat", 2)
                .unwrap()
                .isel("lon", 3)
                .unwrap()
                .isel("ensemble", 0)
                .unwrap()
        };
        let snow = cell("pcp").where_(&cell("t_mean").lt(0.0)).unwrap();
        let total = executor
            .materialize(&snow.sum(&["time"]).unwrap())
            .await
            .unwrap();
        let expected: f64 = (0..DAYS)
            .filter(|t| test_utils::t_mean_value(*t, 2, 3, 0) < 0.0)
            .map(|t| test_utils::pcp_value(t, 2, 3, 0))
            .sum();
        assert!(expected > 0.0);
        assert_close(expected, total.values[[]]);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let inner = test_utils::ensemble_store();
        let flaky = Arc::new(FlakyStore::new(inner, "t_mean/0.0.0.0", 2));
        let (dataset, chunk_store) = open(flaky.clone(), ResourceManager::unlimited()).await;
        let executor = Executor::new(chunk_store);
        let result = executor.materialize(&corner(&dataset)).await.unwrap();
        assert_eq!(3, flaky.reads());

        let (dataset, executor) = ensemble().await;
        let expected = executor.materialize(&corner(&dataset)).await.unwrap();
        assert_eq!(expected.dims, result.dims);
        for (a, b) in expected.values.iter().zip(result.values.iter()) {
            assert!(a == b || (a.is_nan() && b.is_nan()));
        }
    }

    #[tokio::test]
    async fn persistent_failures_exhaust_retries() {
        let inner = test_utils::ensemble_store();
        let flaky = Arc::new(FlakyStore::new(inner, "t_mean/0.0.0.0", 10));
        let (dataset, chunk_store) = open(flaky.clone(), ResourceManager::unlimited()).await;
        let executor = Executor::new(chunk_store).with_max_retries(1);
        match executor.materialize(&corner(&dataset)).await.unwrap_err() {
            ExplorerError::RetriesExhausted { attempts, source } => {
                assert_eq!(2, attempts);
                assert!(matches!(*source, ExplorerError::StoreRead { .. }));
            }
            err => panic!("unexpected error {}", err),
        }
        assert_eq!(2, flaky.reads());
    }

    #[tokio::test]
    async fn insufficient_memory_is_not_retried() {
        let (dataset, chunk_store) = open(
            test_utils::ensemble_store(),
            ResourceManager::new(None, Some(64 * 1024), None),
        )
        .await;
        let executor = Executor::new(chunk_store);
        let t_mean = dataset.variable("t_mean").unwrap();
        match executor.materialize(&t_mean).await.unwrap_err() {
            ExplorerError::InsufficientMemory { requested, total } => {
                // The whole output plus one day of it.
                assert_eq!((DAYS + 1) * LATS.len() * LONS.len() * MEMBERS * 8, requested);
                assert_eq!(64 * 1024, total);
            }
            err => panic!("unexpected error {}", err),
        }
        // A single day fits.
        let day = t_mean.isel("time", 0).unwrap();
        assert!(executor.materialize(&day).await.is_ok());
    }

    fn assert_same(expected: &DataArray, actual: &DataArray) {
        assert_eq!(expected.dims, actual.dims);
        for (a, b) in expected.values.iter().zip(actual.values.iter()) {
            assert!(a == b || (a.is_nan() && b.is_nan()), "{} != {}", a, b);
        }
    }

    fn snow(dataset: &Dataset) -> LazyArray {
        let pcp = dataset.variable("pcp").unwrap();
        let t_mean = dataset.variable("t_mean").unwrap();
        pcp.where_(&t_mean.lt(0.0)).unwrap()
    }

    const ARRAY_BYTES: usize = DAYS * LATS.len() * LONS.len() * MEMBERS * 8;

    #[tokio::test]
    async fn memory_limit_evaluates_in_blocks() {
        let limit = 2 * ARRAY_BYTES;
        let (dataset, chunk_store) = open(
            test_utils::ensemble_store(),
            ResourceManager::new(None, Some(limit), None),
        )
        .await;
        let masked = snow(&dataset);

        // Two sources, the mask and the result each hold one array.
        let plan = BlockPlan::new(&masked, Some(limit)).unwrap();
        assert_eq!(Some("time".to_string()), plan.dim);
        let per_day = 4 * ARRAY_BYTES / DAYS;
        let block_len = ARRAY_BYTES / per_day;
        assert_eq!(0..block_len, plan.blocks[0]);
        assert_eq!(DAYS.div_ceil(block_len), plan.blocks.len());
        assert_eq!(DAYS, plan.blocks.last().unwrap().end);
        assert_eq!(ARRAY_BYTES + per_day * block_len, plan.reservation);
        assert!(plan.reservation <= limit);

        let blocked = Executor::new(chunk_store).materialize(&masked).await.unwrap();
        let (dataset, executor) = ensemble().await;
        let whole = executor.materialize(&snow(&dataset)).await.unwrap();
        assert_same(&whole, &blocked);
    }

    #[tokio::test]
    async fn memory_limit_below_one_block() {
        let (dataset, chunk_store) = open(
            test_utils::ensemble_store(),
            ResourceManager::new(None, Some(ARRAY_BYTES), None),
        )
        .await;
        let executor = Executor::new(chunk_store);
        match executor.materialize(&snow(&dataset)).await.unwrap_err() {
            ExplorerError::InsufficientMemory { requested, total } => {
                assert_eq!(ARRAY_BYTES + 4 * ARRAY_BYTES / DAYS, requested);
                assert_eq!(ARRAY_BYTES, total);
            }
            err => panic!("unexpected error {}", err),
        }
    }

    #[tokio::test]
    async fn blocks_avoid_resampled_dimensions() {
        let annual = |dataset: &Dataset| {
            dataset
                .variable("pcp")
                .unwrap()
                .isel("lat", 1)
                .unwrap()
                .isel("lon", 1)
                .unwrap()
                .resample(Frequency::Annual, Reducer::Max)
                .unwrap()
        };
        let limit = 10_000;
        let (dataset, chunk_store) = open(
            test_utils::ensemble_store(),
            ResourceManager::new(None, Some(limit), None),
        )
        .await;
        let array = annual(&dataset);
        let plan = BlockPlan::new(&array, Some(limit)).unwrap();
        assert_eq!(Some("ensemble".to_string()), plan.dim);
        assert_eq!(vec![0..1, 1..2, 2..3], plan.blocks);

        let blocked = Executor::new(chunk_store).materialize(&array).await.unwrap();
        let (dataset, executor) = ensemble().await;
        let whole = executor.materialize(&annual(&dataset)).await.unwrap();
        assert_same(&whole, &blocked);
    }

    #[tokio::test]
    async fn unlimited_memory_is_not_split() {
        let (dataset, _) = ensemble().await;
        let plan = BlockPlan::new(&snow(&dataset), None).unwrap();
        assert_eq!(None, plan.dim);
        assert_eq!(0, plan.reservation);
        let plan = BlockPlan::new(&snow(&dataset), Some(4 * ARRAY_BYTES)).unwrap();
        assert_eq!(None, plan.dim);
        assert_eq!(4 * ARRAY_BYTES, plan.reservation);
    }

    #[test]
    fn panic_reasons() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!("boom", panic_reason(payload.as_ref()));
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!("bang", panic_reason(payload.as_ref()));
        let payload: Box<dyn std::any::Any + Send> = Box::new(42);
        assert_eq!("unknown panic", panic_reason(payload.as_ref()));
    }
}
