//! The exploratory analyses of the ensemble, composed from lazy array operations.

use crate::coords::Selector;
use crate::dataset::Dataset;
use crate::error::{ErrorReport, ExplorerError};
use crate::executor::Executor;
use crate::lazy::{LazyArray, TIME_DIMENSION};
use crate::operations::Reducer;
use crate::render::colormap::Colormap;
use crate::render::{self, Figure, PlotOptions, Surface};
use crate::resample::Frequency;

use chrono::NaiveDate;
use clap::ValueEnum;
use std::sync::Arc;
use strum_macros::Display;
use tokio::task::JoinSet;

const ENSEMBLE: &str = "ensemble";
const LAT: &str = "lat";
const LON: &str = "lon";
const T_MEAN: &str = "t_mean";
const PCP: &str = "pcp";
const ELEVATION: &str = "elevation";
const SEASON: &str = "season";

/// An analysis producing one figure.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
#[strum(serialize_all = "kebab-case")]
pub enum Analysis {
    /// Map of the elevation
    Elevation,
    /// Map of the cells with data
    DomainMask,
    /// Temperature of the first members on one day
    EnsembleSnapshot,
    /// Ensemble maximum minus minimum temperature on one day
    EnsembleSpread,
    /// Ensemble standard deviation of temperature on one day
    EnsembleStd,
    /// Difference of the first members from the ensemble mean on one day
    EnsembleErrors,
    /// Ensemble standard deviation of the member errors on one day
    ErrorSpread,
    /// Mean seasonal snowfall of the first members
    SeasonalSnowfall,
    /// Annual maximum precipitation around a point
    RegionalAnnualMax,
}

impl Analysis {
    /// Every analysis, in presentation order.
    pub const ALL: [Analysis; 9] = [
        Analysis::Elevation,
        Analysis::DomainMask,
        Analysis::EnsembleSnapshot,
        Analysis::EnsembleSpread,
        Analysis::EnsembleStd,
        Analysis::EnsembleErrors,
        Analysis::ErrorSpread,
        Analysis::SeasonalSnowfall,
        Analysis::RegionalAnnualMax,
    ];
}

/// Parameters of the analyses.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisParams {
    /// Day of the ensemble snapshots
    pub date: NaiveDate,
    /// Number of members shown in faceted figures
    pub members: usize,
    /// Centre of the regional time series as (latitude, longitude)
    pub point: (f64, f64),
    /// Half width in degrees of the box around `point`
    pub buffer: f64,
    /// Temperature below which precipitation counts as snow
    pub snow_threshold: f64,
    /// Periods over which snowfall is summed before averaging by season
    pub snowfall_period: Frequency,
    /// Maximum number of facet columns
    pub col_wrap: usize,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            date: NaiveDate::from_ymd_opt(1980, 1, 1).unwrap_or_default(),
            members: 4,
            point: (30.2672, -97.7431),
            buffer: 0.25,
            snow_threshold: 0.0,
            snowfall_period: Frequency::QuarterStart(12),
            col_wrap: 2,
        }
    }
}

/// How a materialised array is drawn.
#[derive(Clone, Debug, PartialEq)]
pub enum Plot {
    Heatmap,
    Facets {
        col: &'static str,
        row: Option<&'static str>,
    },
    Line {
        hue: Option<&'static str>,
    },
}

/// A composed, not yet materialised, analysis.
#[derive(Clone, Debug)]
pub struct Plan {
    pub analysis: Analysis,
    pub array: LazyArray,
    pub plot: Plot,
    pub options: PlotOptions,
}

impl Plan {
    fn new(analysis: Analysis, array: LazyArray, plot: Plot, options: PlotOptions) -> Self {
        Self {
            analysis,
            array,
            plot,
            options,
        }
    }
}

/// Temperature of every member on the snapshot date.
fn day(dataset: &Dataset, params: &AnalysisParams) -> Result<LazyArray, ExplorerError> {
    dataset
        .variable(T_MEAN)?
        .sel(TIME_DIMENSION, &Selector::Date(params.date))
}

/// Difference of each member from the ensemble mean on the snapshot date.
fn errors(dataset: &Dataset, params: &AnalysisParams) -> Result<LazyArray, ExplorerError> {
    let day = day(dataset, params)?;
    let mean = day.mean(&[ENSEMBLE])?;
    Ok(day.sub(&mean)?.with_name("error"))
}

fn first_members(array: &LazyArray, params: &AnalysisParams) -> Result<LazyArray, ExplorerError> {
    array.isel_range(ENSEMBLE, 0, params.members)
}

impl Analysis {
    /// Composes the lazy computation of the analysis. No data is read.
    pub fn plan(&self, dataset: &Dataset, params: &AnalysisParams) -> Result<Plan, ExplorerError> {
        let date = params.date;
        let facets = Plot::Facets {
            col: ENSEMBLE,
            row: None,
        };
        let plan = match self {
            Analysis::Elevation => Plan::new(
                *self,
                dataset.variable(ELEVATION)?,
                Plot::Heatmap,
                PlotOptions::titled("Elevation"),
            ),
            Analysis::DomainMask => {
                let mask = dataset
                    .variable(T_MEAN)?
                    .isel(TIME_DIMENSION, 0)?
                    .isel(ENSEMBLE, 0)?
                    .notnull()
                    .with_name("mask");
                let options = PlotOptions {
                    colormap: Some(Colormap::Viridis),
                    ..PlotOptions::titled("Domain mask")
                };
                Plan::new(*self, mask, Plot::Heatmap, options)
            }
            Analysis::EnsembleSnapshot => Plan::new(
                *self,
                first_members(&day(dataset, params)?, params)?,
                facets,
                PlotOptions::titled(format!("Mean temperature on {}", date))
                    .col_wrap(params.col_wrap),
            ),
            Analysis::EnsembleSpread => {
                let day = day(dataset, params)?;
                let spread = day
                    .max(&[ENSEMBLE])?
                    .sub(&day.min(&[ENSEMBLE])?)?
                    .with_name("spread");
                Plan::new(
                    *self,
                    spread,
                    Plot::Heatmap,
                    PlotOptions::titled(format!("Ensemble spread (max - min) on {}", date)),
                )
            }
            Analysis::EnsembleStd => Plan::new(
                *self,
                day(dataset, params)?.std(&[ENSEMBLE])?,
                Plot::Heatmap,
                PlotOptions::titled(format!("Ensemble standard deviation on {}", date)).robust(),
            ),
            Analysis::EnsembleErrors => Plan::new(
                *self,
                first_members(&errors(dataset, params)?, params)?,
                facets,
                PlotOptions::titled(format!("Member errors on {}", date)).col_wrap(params.col_wrap),
            ),
            Analysis::ErrorSpread => Plan::new(
                *self,
                errors(dataset, params)?.std(&[ENSEMBLE])?,
                Plot::Heatmap,
                PlotOptions::titled(format!("Standard deviation of member errors on {}", date))
                    .robust(),
            ),
            Analysis::SeasonalSnowfall => {
                let pcp = first_members(&dataset.variable(PCP)?, params)?;
                let t_mean = first_members(&dataset.variable(T_MEAN)?, params)?;
                let snowfall = pcp
                    .where_(&t_mean.lt(params.snow_threshold))?
                    .resample(params.snowfall_period, Reducer::Sum)?
                    .groupby_season(Reducer::Mean)?
                    .with_name("snowfall");
                Plan::new(
                    *self,
                    snowfall,
                    Plot::Facets {
                        col: ENSEMBLE,
                        row: Some(SEASON),
                    },
                    PlotOptions::titled(format!(
                        "Mean {} snowfall (t_mean < {})",
                        params.snowfall_period, params.snow_threshold
                    )),
                )
            }
            Analysis::RegionalAnnualMax => {
                let (lat, lon) = params.point;
                let annual_max = dataset
                    .variable(PCP)?
                    .sel(LAT, &Selector::around(lat, params.buffer))?
                    .sel(LON, &Selector::around(lon, params.buffer))?
                    .resample(Frequency::Annual, Reducer::Max)?
                    .mean(&[LAT, LON])?
                    .mean(&[ENSEMBLE])?
                    .with_name("annual_max");
                Plan::new(
                    *self,
                    annual_max,
                    Plot::Line { hue: None },
                    PlotOptions::titled(format!(
                        "Annual maximum precipitation within {} degrees of ({}, {})",
                        params.buffer, lat, lon
                    )),
                )
            }
        };
        Ok(plan)
    }
}

/// Runs analyses against a shared dataset and shows their figures.
pub struct Runner {
    dataset: Arc<Dataset>,
    executor: Arc<Executor>,
    surface: Arc<dyn Surface>,
    params: AnalysisParams,
}

impl Runner {
    pub fn new(
        dataset: Arc<Dataset>,
        executor: Arc<Executor>,
        surface: Arc<dyn Surface>,
        params: AnalysisParams,
    ) -> Self {
        Self {
            dataset,
            executor,
            surface,
            params,
        }
    }

    /// Composes, materialises and renders one analysis.
    #[tracing::instrument(skip_all, fields(analysis = %analysis))]
    pub async fn run(&self, analysis: Analysis) -> Result<Figure, ExplorerError> {
        let plan = analysis.plan(&self.dataset, &self.params)?;
        tracing::debug!("Planned {}", plan.array);
        let result = self.executor.materialize(&plan.array).await?;
        let figure = match plan.plot {
            Plot::Heatmap => render::heatmap(&result, &plan.options)?,
            Plot::Facets { col, row } => render::facet_grid(&result, col, row, &plan.options)?,
            Plot::Line { hue } => render::line_plot(&result, hue, &plan.options)?,
        };
        self.surface.display(&figure)?;
        Ok(figure)
    }

    /// Runs analyses concurrently, returning their outcomes in the requested order.
    ///
    /// A failed analysis is logged and does not affect the others.
    pub async fn run_all(
        self: &Arc<Self>,
        analyses: &[Analysis],
    ) -> Vec<(Analysis, Result<Figure, ExplorerError>)> {
        let mut tasks = JoinSet::new();
        for (i, analysis) in analyses.iter().copied().enumerate() {
            let runner = self.clone();
            tasks.spawn(async move { (i, runner.run(analysis).await) });
        }
        let mut outcomes: Vec<Option<Result<Figure, ExplorerError>>> =
            analyses.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((i, outcome)) => outcomes[i] = Some(outcome),
                Err(err) => tracing::error!("Analysis task failed: {}", err),
            }
        }
        analyses
            .iter()
            .copied()
            .zip(outcomes)
            .map(|(analysis, outcome)| {
                let outcome = outcome.unwrap_or_else(|| {
                    Err(ExplorerError::WorkerPanicked {
                        reason: format!("{} task did not complete", analysis),
                    })
                });
                match &outcome {
                    Ok(figure) => tracing::info!("{} done: {}", analysis, figure.title),
                    Err(err) => ErrorReport::from(err).log(&analysis.to_string()),
                }
                (analysis, outcome)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_store::ChunkStore;
    use crate::coords::Coordinate;
    use crate::render::DirectorySurface;
    use crate::resource_manager::ResourceManager;
    use crate::test_utils::{self, LATS, LONS, MEMBERS};

    fn params() -> AnalysisParams {
        AnalysisParams {
            date: NaiveDate::from_ymd_opt(2001, 1, 15).unwrap(),
            members: 2,
            ..Default::default()
        }
    }

    async fn ensemble() -> (Arc<Dataset>, Arc<Executor>) {
        let chunk_store = Arc::new(ChunkStore::new(
            test_utils::ensemble_store(),
            Arc::new(ResourceManager::unlimited()),
            64,
        ));
        let dataset = Dataset::open(&chunk_store, test_utils::ENSEMBLE_PREFIX)
            .await
            .unwrap();
        (Arc::new(dataset), Arc::new(Executor::new(chunk_store)))
    }

    #[test]
    fn analysis_names() {
        assert_eq!("ensemble-std", Analysis::EnsembleStd.to_string());
        assert_eq!(
            Analysis::RegionalAnnualMax,
            Analysis::from_str("regional-annual-max", false).unwrap()
        );
        assert_eq!(Analysis::ALL.len(), Analysis::value_variants().len());
    }

    #[tokio::test]
    async fn plans_have_expected_dimensions() {
        let (dataset, _) = ensemble().await;
        let params = params();
        let dims = |analysis: Analysis| -> Vec<String> {
            let plan = analysis.plan(&dataset, &params).unwrap();
            plan.array
                .dim_names()
                .into_iter()
                .map(str::to_string)
                .collect()
        };
        assert_eq!(vec!["lat", "lon"], dims(Analysis::Elevation));
        assert_eq!(vec!["lat", "lon"], dims(Analysis::DomainMask));
        assert_eq!(vec!["lat", "lon", "ensemble"], dims(Analysis::EnsembleSnapshot));
        assert_eq!(vec!["lat", "lon"], dims(Analysis::EnsembleSpread));
        assert_eq!(vec!["lat", "lon"], dims(Analysis::EnsembleStd));
        assert_eq!(vec!["lat", "lon", "ensemble"], dims(Analysis::EnsembleErrors));
        assert_eq!(vec!["lat", "lon"], dims(Analysis::ErrorSpread));
        assert_eq!(
            vec!["season", "lat", "lon", "ensemble"],
            dims(Analysis::SeasonalSnowfall)
        );
        assert_eq!(vec!["time"], dims(Analysis::RegionalAnnualMax));

        let snapshot = Analysis::EnsembleSnapshot.plan(&dataset, &params).unwrap();
        assert_eq!(2, snapshot.array.coord("ensemble").unwrap().len());
        assert_eq!(Some(2), snapshot.options.col_wrap);
    }

    #[tokio::test]
    async fn seasons_in_display_order() {
        let (dataset, executor) = ensemble().await;
        let plan = Analysis::SeasonalSnowfall.plan(&dataset, &params()).unwrap();
        let snowfall = executor.materialize(&plan.array).await.unwrap();
        assert_eq!(
            &Coordinate::Label(
                ["DJF", "MAM", "JJA", "SON"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            ),
            snowfall.coord("season").unwrap()
        );
        assert_eq!(&[4, LATS.len(), LONS.len(), 2], snowfall.shape());
        assert!(snowfall.valid_values().all(|value| *value >= 0.0));
        // Winters are cold enough to snow, summers are not.
        assert!(snowfall.values[[0, 2, 3, 0]] > 0.0);
        assert_eq!(0.0, snowfall.values[[2, 2, 3, 0]]);
    }

    #[tokio::test]
    async fn error_spread_is_non_negative_map() {
        let (dataset, executor) = ensemble().await;
        let plan = Analysis::ErrorSpread.plan(&dataset, &params()).unwrap();
        let spread = executor.materialize(&plan.array).await.unwrap();
        assert_eq!(vec!["lat", "lon"], spread.dim_names());
        assert_eq!(LATS.len() * LONS.len() - 1, spread.valid_values().count());
        assert!(spread.valid_values().all(|value| *value >= 0.0));
        // Members are 0.5 degrees apart.
        let expected = (2.0f64 * 0.25 / MEMBERS as f64).sqrt();
        assert!((spread.values[[1, 1]] - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn regional_annual_max_has_one_value_per_year() {
        let (dataset, executor) = ensemble().await;
        let plan = Analysis::RegionalAnnualMax.plan(&dataset, &params()).unwrap();
        let series = executor.materialize(&plan.array).await.unwrap();
        assert_eq!(vec!["time"], series.dim_names());
        let years: Vec<String> = (0..2)
            .map(|i| series.coord("time").unwrap().label(i))
            .collect();
        assert_eq!(vec!["2000-01-01", "2001-01-01"], years);
        assert_eq!(2, series.valid_values().count());
        // Each year has a day with the largest synthetic precipitation.
        for value in series.values.iter() {
            assert!((value - 5.0).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn empty_selection_is_reported() {
        let (dataset, _) = ensemble().await;
        let params = AnalysisParams {
            date: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
            ..params()
        };
        match Analysis::EnsembleStd.plan(&dataset, &params).unwrap_err() {
            ExplorerError::EmptySelection { dimension, .. } => assert_eq!("time", dimension),
            err => panic!("unexpected error {}", err),
        }
    }

    #[tokio::test]
    async fn run_all_isolates_failures() {
        let (dataset, executor) = ensemble().await;
        let dir = tempfile::tempdir().unwrap();
        let surface = Arc::new(DirectorySurface::new(dir.path()).unwrap());
        let params = AnalysisParams {
            date: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
            ..params()
        };
        let runner = Arc::new(Runner::new(dataset, executor, surface, params));
        let outcomes = runner
            .run_all(&[
                Analysis::Elevation,
                Analysis::EnsembleStd,
                Analysis::RegionalAnnualMax,
            ])
            .await;
        assert_eq!(Analysis::Elevation, outcomes[0].0);
        assert_eq!("Elevation", outcomes[0].1.as_ref().unwrap().title);
        assert!(matches!(
            outcomes[1].1,
            Err(ExplorerError::EmptySelection { .. })
        ));
        assert_eq!("line_plot", outcomes[2].1.as_ref().unwrap().kind);
        assert_eq!(2, std::fs::read_dir(dir.path()).unwrap().count());
    }

    #[tokio::test]
    async fn run_every_analysis() {
        let (dataset, executor) = ensemble().await;
        let dir = tempfile::tempdir().unwrap();
        let surface = Arc::new(DirectorySurface::new(dir.path()).unwrap());
        let runner = Arc::new(Runner::new(dataset, executor, surface, params()));
        for (analysis, outcome) in runner.run_all(&Analysis::ALL).await {
            assert!(outcome.is_ok(), "{} failed", analysis);
        }
        assert_eq!(
            Analysis::ALL.len(),
            std::fs::read_dir(dir.path()).unwrap().count()
        );
    }
}
