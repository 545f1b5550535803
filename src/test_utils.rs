//! Synthetic Zarr hierarchies for tests.

use crate::compression::tests::compress_zlib;
use crate::dataset::{join_key, Variable};
use crate::error::ExplorerError;
use crate::filters::shuffle::shuffle;
use crate::metadata::{parse_array_metadata, Attributes};
use crate::object_store::{MemoryStore, ObjectStore};

use async_trait::async_trait;
use bytes::Bytes;
use ndarray::{ArrayD, IxDyn, Slice};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Prefix of the synthetic ensemble hierarchy.
pub(crate) const ENSEMBLE_PREFIX: &str = "ensemble.zarr";
/// Number of daily time steps in the synthetic ensemble, covering 2000 and 2001.
pub(crate) const DAYS: usize = 731;
/// Number of ensemble members in the synthetic ensemble.
pub(crate) const MEMBERS: usize = 3;
pub(crate) const LATS: [f64; 4] = [29.75, 30.0, 30.25, 30.5];
pub(crate) const LONS: [f64; 5] = [-98.25, -98.0, -97.75, -97.5, -97.25];

/// Writes Zarr v2 arrays into a [MemoryStore] the way xarray does: zlib compression after a byte
/// shuffle, `NaN` fill values and `_ARRAY_DIMENSIONS` attributes. Chunks holding only the fill
/// value are not written.
pub(crate) struct ZarrBuilder {
    prefix: String,
    store: Arc<MemoryStore>,
    documents: Map<String, Value>,
}

impl ZarrBuilder {
    pub(crate) fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            store: Arc::new(MemoryStore::new()),
            documents: Map::new(),
        }
    }

    /// Adds a little-endian `f64` array.
    pub(crate) fn array(
        &mut self,
        name: &str,
        dims: &[&str],
        chunks: &[usize],
        values: &ArrayD<f64>,
        attrs: Value,
    ) -> &mut Self {
        self.typed_array(name, dims, chunks, values, "<f8", attrs)
    }

    /// Adds an array stored as `dtype`, one of `<f8`, `<f4` or `<i8`.
    pub(crate) fn typed_array(
        &mut self,
        name: &str,
        dims: &[&str],
        chunks: &[usize],
        values: &ArrayD<f64>,
        dtype: &str,
        attrs: Value,
    ) -> &mut Self {
        let element_size = match dtype {
            "<f8" | "<i8" => 8,
            "<f4" => 4,
            _ => panic!("unsupported test dtype {}", dtype),
        };
        let fill_value = if dtype == "<i8" {
            Value::Null
        } else {
            json!("NaN")
        };
        let metadata = json!({
            "chunks": chunks,
            "compressor": {"id": "zlib", "level": 1},
            "dtype": dtype,
            "fill_value": fill_value,
            "filters": [{"id": "shuffle", "elementsize": element_size}],
            "order": "C",
            "shape": values.shape(),
            "zarr_format": 2
        });
        let mut attrs = match attrs {
            Value::Object(attrs) => attrs,
            _ => Map::new(),
        };
        attrs.insert("_ARRAY_DIMENSIONS".to_string(), json!(dims));

        let grid: Vec<usize> = values
            .shape()
            .iter()
            .zip(chunks)
            .map(|(size, chunk)| size.div_ceil(*chunk))
            .collect();
        for index in grid_indices(&grid) {
            let mut chunk = ArrayD::from_elem(IxDyn(chunks), f64::NAN);
            let region: Vec<(usize, usize)> = index
                .iter()
                .zip(chunks)
                .zip(values.shape())
                .map(|((i, chunk), size)| (i * chunk, ((i + 1) * chunk).min(*size)))
                .collect();
            chunk
                .slice_each_axis_mut(|axis| {
                    let (start, end) = region[axis.axis.index()];
                    Slice::from(0..end - start)
                })
                .assign(&values.slice_each_axis(|axis| {
                    let (start, end) = region[axis.axis.index()];
                    Slice::from(start..end)
                }));
            if chunk.iter().all(|value| value.is_nan()) {
                continue;
            }
            let raw: Vec<u8> = match dtype {
                "<f8" => chunk.iter().flat_map(|v| v.to_le_bytes()).collect(),
                "<f4" => chunk.iter().flat_map(|v| (*v as f32).to_le_bytes()).collect(),
                _ => chunk.iter().flat_map(|v| (*v as i64).to_le_bytes()).collect(),
            };
            let encoded = compress_zlib(&shuffle(&raw, element_size));
            let key = if index.is_empty() {
                "0".to_string()
            } else {
                index
                    .iter()
                    .map(|i| i.to_string())
                    .collect::<Vec<_>>()
                    .join(".")
            };
            self.store
                .insert(join_key(&self.prefix, &format!("{}/{}", name, key)), encoded);
        }

        self.document(&format!("{}/.zarray", name), metadata);
        self.document(&format!("{}/.zattrs", name), Value::Object(attrs));
        self
    }

    fn document(&mut self, key: &str, document: Value) {
        self.store
            .insert(join_key(&self.prefix, key), document.to_string());
        self.documents.insert(key.to_string(), document);
    }

    /// Writes the group documents and returns the store.
    pub(crate) fn finish(&self, consolidated: bool) -> Arc<MemoryStore> {
        let group = json!({"zarr_format": 2});
        self.store
            .insert(join_key(&self.prefix, ".zgroup"), group.to_string());
        if consolidated {
            let mut metadata = self.documents.clone();
            metadata.insert(".zgroup".to_string(), group);
            metadata.insert(".zattrs".to_string(), json!({}));
            let document = json!({"metadata": metadata, "zarr_consolidated_format": 1});
            self.store
                .insert(join_key(&self.prefix, ".zmetadata"), document.to_string());
        }
        self.store.clone()
    }

    fn metadata(&self, name: &str) -> (Value, Value) {
        let metadata = self.documents[&format!("{}/.zarray", name)].clone();
        let attrs = self.documents[&format!("{}/.zattrs", name)].clone();
        (metadata, attrs)
    }
}

/// Returns the variable of a builder's array.
pub(crate) fn variable(builder: &ZarrBuilder, name: &str) -> Variable {
    let (metadata, attrs) = builder.metadata(name);
    let metadata = parse_array_metadata(metadata.to_string().as_bytes()).unwrap();
    let attrs: Attributes = serde_json::from_value(attrs).unwrap();
    Variable::new(&builder.prefix, name, &metadata, attrs).unwrap()
}

fn grid_indices(grid: &[usize]) -> Vec<Vec<usize>> {
    grid.iter().fold(vec![vec![]], |indices, count| {
        indices
            .into_iter()
            .flat_map(|prefix| {
                (0..*count).map(move |i| {
                    let mut index = prefix.clone();
                    index.push(i);
                    index
                })
            })
            .collect()
    })
}

/// Day of year of day `t` of the synthetic time axis, accurate enough for a seasonal cycle.
fn seasonal_cycle(t: usize) -> f64 {
    (2.0 * std::f64::consts::PI * (t % 366) as f64 / 365.25).cos()
}

/// Returns whether a grid cell lies outside the domain.
fn masked(lat: usize, lon: usize) -> bool {
    lat == 0 && lon == 0
}

/// Synthetic daily mean temperature, below freezing in winter.
pub(crate) fn t_mean_value(t: usize, lat: usize, lon: usize, member: usize) -> f64 {
    if masked(lat, lon) {
        return f64::NAN;
    }
    5.0 - 12.0 * seasonal_cycle(t) + 0.5 * member as f64 + 0.1 * lat as f64 - 0.2 * lon as f64
}

/// Synthetic daily precipitation, never negative.
pub(crate) fn pcp_value(t: usize, lat: usize, lon: usize, member: usize) -> f64 {
    if masked(lat, lon) {
        return f64::NAN;
    }
    ((t * 7 + lat * 3 + lon * 5 + member) % 11) as f64 * 0.5
}

/// Returns a consolidated hierarchy shaped like the gridded ensemble: daily `t_mean` and `pcp`
/// over (time, lat, lon, ensemble) and a static `elevation` over (lat, lon).
pub(crate) fn ensemble_store() -> Arc<MemoryStore> {
    let shape = [DAYS, LATS.len(), LONS.len(), MEMBERS];
    let t_mean = ArrayD::from_shape_fn(IxDyn(&shape), |index| {
        t_mean_value(index[0], index[1], index[2], index[3])
    });
    let pcp = ArrayD::from_shape_fn(IxDyn(&shape), |index| {
        pcp_value(index[0], index[1], index[2], index[3])
    });
    let elevation = ArrayD::from_shape_fn(IxDyn(&shape[1..3]), |index| {
        if masked(index[0], index[1]) {
            f64::NAN
        } else {
            150.0 + 10.0 * index[0] as f64 + 20.0 * index[1] as f64
        }
    });
    let time = ArrayD::from_shape_fn(IxDyn(&[DAYS]), |index| index[0] as f64);
    let members = ArrayD::from_shape_fn(IxDyn(&[MEMBERS]), |index| (index[0] + 1) as f64);

    let mut builder = ZarrBuilder::new(ENSEMBLE_PREFIX);
    builder
        .typed_array(
            "time",
            &["time"],
            &[365],
            &time,
            "<i8",
            json!({"units": "days since 2000-01-01", "calendar": "proleptic_gregorian"}),
        )
        .array(
            "lat",
            &["lat"],
            &[LATS.len()],
            &ArrayD::from_shape_vec(IxDyn(&[LATS.len()]), LATS.to_vec()).unwrap(),
            json!({"units": "degrees_north"}),
        )
        .array(
            "lon",
            &["lon"],
            &[LONS.len()],
            &ArrayD::from_shape_vec(IxDyn(&[LONS.len()]), LONS.to_vec()).unwrap(),
            json!({"units": "degrees_east"}),
        )
        .typed_array("ensemble", &["ensemble"], &[MEMBERS], &members, "<i8", json!({}))
        .array(
            "t_mean",
            &["time", "lat", "lon", "ensemble"],
            &[120, 2, 3, MEMBERS],
            &t_mean,
            json!({"units": "degC", "long_name": "daily mean temperature"}),
        )
        .array(
            "pcp",
            &["time", "lat", "lon", "ensemble"],
            &[120, 2, 3, MEMBERS],
            &pcp,
            json!({"units": "mm/day", "long_name": "daily precipitation"}),
        )
        .array(
            "elevation",
            &["lat", "lon"],
            &[4, 5],
            &elevation,
            json!({"units": "m"}),
        );
    builder.finish(true)
}

/// A store that fails the first reads of matching keys with a connection reset.
#[derive(Debug)]
pub(crate) struct FlakyStore {
    inner: Arc<dyn ObjectStore>,
    pattern: String,
    failures: AtomicUsize,
    reads: AtomicUsize,
}

impl FlakyStore {
    /// Returns a store failing the first `failures` reads of keys containing `pattern`.
    pub(crate) fn new(inner: Arc<dyn ObjectStore>, pattern: &str, failures: usize) -> Self {
        Self {
            inner,
            pattern: pattern.to_string(),
            failures: AtomicUsize::new(failures),
            reads: AtomicUsize::new(0),
        }
    }

    /// Returns the number of reads of matching keys, failed or not.
    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, ExplorerError> {
        if key.contains(&self.pattern) {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let failed = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(ExplorerError::StoreRead {
                    key: key.to_string(),
                    source: std::io::Error::from(std::io::ErrorKind::ConnectionReset),
                });
            }
        }
        self.inner.get(key).await
    }

    fn describe(&self) -> String {
        format!("flaky {}", self.inner.describe())
    }
}
