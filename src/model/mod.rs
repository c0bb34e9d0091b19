//! Forecasting engine: fits the registered model spec against the fact
//! history and produces interval forecasts for the sweep.
//!
//! MSTL (seasonal period 12) around AutoETS for the monthly series, with a
//! plain AutoETS family for short histories. Intervals come from the model;
//! the standard error is recovered from the interval half-width via the same
//! z-factor table the reconciler applies.

use crate::error::PipelineError;
use crate::models::{ForecastPoint, ModelFamily, ModelSpec, Observation};
use augurs::{
    ets::{AutoETS, trend::AutoETSTrendModel},
    forecaster::{Forecaster, Transformer, transforms::LinearInterpolator},
    mstl::MSTLModel,
};
use chrono::{Months, NaiveDate};

/// Interval z-factors by confidence level, shared with the reporting table's
/// margin-of-error column.
pub const Z_FACTORS: [(f64, f64); 4] = [(0.80, 1.28), (0.85, 1.44), (0.90, 1.64), (0.95, 1.96)];

pub fn z_factor(confidence: f64) -> Option<f64> {
    Z_FACTORS
        .iter()
        .find(|(level, _)| (level - confidence).abs() < 1e-9)
        .map(|(_, z)| *z)
}

/// Minimum history for the non-seasonal family.
const MIN_PLAIN_OBSERVATIONS: usize = 8;

#[derive(Debug)]
enum Engine {
    Seasonal(Forecaster<MSTLModel<AutoETSTrendModel>>),
    Plain(Forecaster<AutoETS>),
}

#[derive(Debug)]
pub struct FittedModel {
    engine: Engine,
    train_end: NaiveDate,
}

fn transformers() -> Vec<Box<dyn Transformer>> {
    vec![Box::new(LinearInterpolator::default())]
}

/// Fit the spec's model family against the full history.
///
/// The seasonal family needs two full periods of observations; fewer is a
/// training failure.
pub fn fit(history: &[Observation], spec: &ModelSpec) -> Result<FittedModel, PipelineError> {
    let minimum = match spec.family {
        ModelFamily::MstlEts => spec.seasonal_period * 2,
        ModelFamily::AutoEts => MIN_PLAIN_OBSERVATIONS,
    };
    if history.len() < minimum {
        return Err(PipelineError::Training(format!(
            "insufficient history for {}: {} observations, need {minimum}",
            spec.name,
            history.len()
        )));
    }

    let Some(last) = history.last() else {
        return Err(PipelineError::Training(format!(
            "empty history for {}",
            spec.name
        )));
    };
    let train_end = last.month;
    let values: Vec<f64> = history.iter().map(|o| o.production as f64).collect();

    let engine = match spec.family {
        ModelFamily::MstlEts => {
            let trend = AutoETS::non_seasonal().into_trend_model();
            let model = MSTLModel::new(vec![spec.seasonal_period], trend);
            let mut forecaster = Forecaster::new(model).with_transformers(transformers());
            forecaster
                .fit(&values)
                .map_err(|e| PipelineError::Training(format!("MSTL fit: {e}")))?;
            Engine::Seasonal(forecaster)
        }
        ModelFamily::AutoEts => {
            let mut forecaster =
                Forecaster::new(AutoETS::non_seasonal()).with_transformers(transformers());
            forecaster
                .fit(&values)
                .map_err(|e| PipelineError::Training(format!("ETS fit: {e}")))?;
            Engine::Plain(forecaster)
        }
    };

    Ok(FittedModel { engine, train_end })
}

impl FittedModel {
    pub fn train_end(&self) -> NaiveDate {
        self.train_end
    }

    /// Forecast `horizon` months ahead with intervals at `confidence`,
    /// ordered by timestamp (successive first-of-month dates after the
    /// training end).
    pub fn predict(
        &self,
        horizon: u32,
        confidence: f64,
    ) -> Result<Vec<ForecastPoint>, PipelineError> {
        let z = z_factor(confidence).ok_or_else(|| {
            PipelineError::Forecast(format!("no z-factor for confidence level {confidence}"))
        })?;

        let forecast = match &self.engine {
            Engine::Seasonal(f) => f.predict(horizon as usize, confidence).map_err(|e| {
                PipelineError::Forecast(format!("predict h={horizon} c={confidence}: {e}"))
            }),
            Engine::Plain(f) => f.predict(horizon as usize, confidence).map_err(|e| {
                PipelineError::Forecast(format!("predict h={horizon} c={confidence}: {e}"))
            }),
        }?;

        let intervals = forecast.intervals.ok_or_else(|| {
            PipelineError::Forecast(format!(
                "model returned no intervals at confidence {confidence}"
            ))
        })?;

        let mut points = Vec::with_capacity(forecast.point.len());
        for (i, &value) in forecast.point.iter().enumerate() {
            let timestamp = self
                .train_end
                .checked_add_months(Months::new(i as u32 + 1))
                .ok_or_else(|| {
                    PipelineError::Forecast(format!("timestamp overflow at step {i}"))
                })?;
            let lower = intervals.lower[i];
            let upper = intervals.upper[i];
            let width = upper - lower;

            points.push(ForecastPoint {
                timestamp,
                value,
                lower,
                upper,
                interval_width: width,
                standard_error: width / (2.0 * z),
            });
        }

        Ok(points)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(family: ModelFamily) -> ModelSpec {
        ModelSpec {
            name: "oil_production_model".into(),
            family,
            time_column: "Month".into(),
            value_column: "Oil_Production".into(),
            seasonal_period: 12,
            holiday_region: Some("US".into()),
        }
    }

    /// Four years of trending, mildly seasonal monthly data.
    fn history(months: usize) -> Vec<Observation> {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        (0..months)
            .map(|i| {
                let month = start.checked_add_months(Months::new(i as u32)).unwrap();
                let seasonal = [30, 10, -5, -20, -25, -10, 5, 15, 25, 20, 10, 0][i % 12];
                Observation {
                    month,
                    production: 4000 + (i as i64) * 8 + seasonal,
                }
            })
            .collect()
    }

    #[test]
    fn z_factors_match_reconciler_lookup() {
        assert_eq!(z_factor(0.80), Some(1.28));
        assert_eq!(z_factor(0.85), Some(1.44));
        assert_eq!(z_factor(0.90), Some(1.64));
        assert_eq!(z_factor(0.95), Some(1.96));
        assert_eq!(z_factor(0.50), None);
    }

    #[test]
    fn short_history_fails_training() {
        let err = fit(&history(20), &spec(ModelFamily::MstlEts)).unwrap_err();
        assert!(matches!(err, PipelineError::Training(_)));
    }

    #[test]
    fn seasonal_fit_predicts_successive_months() {
        let fitted = fit(&history(48), &spec(ModelFamily::MstlEts)).unwrap();
        assert_eq!(
            fitted.train_end(),
            NaiveDate::from_ymd_opt(2023, 12, 1).unwrap()
        );

        let points = fitted.predict(12, 0.95).unwrap();
        assert_eq!(points.len(), 12);
        assert_eq!(
            points[0].timestamp,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
        assert_eq!(
            points[11].timestamp,
            NaiveDate::from_ymd_opt(2024, 12, 1).unwrap()
        );

        for p in &points {
            assert!(p.lower <= p.value && p.value <= p.upper);
            assert!(p.interval_width >= 0.0);
            assert!(p.standard_error >= 0.0);
        }
    }

    #[test]
    fn plain_family_fits_short_history() {
        let fitted = fit(&history(10), &spec(ModelFamily::AutoEts)).unwrap();
        let points = fitted.predict(3, 0.90).unwrap();
        assert_eq!(points.len(), 3);
    }

    #[test]
    fn wider_confidence_never_narrows_intervals() {
        let fitted = fit(&history(48), &spec(ModelFamily::MstlEts)).unwrap();
        let narrow = fitted.predict(6, 0.80).unwrap();
        let wide = fitted.predict(6, 0.95).unwrap();
        for (n, w) in narrow.iter().zip(wide.iter()) {
            assert!(w.interval_width >= n.interval_width);
        }
    }

    #[test]
    fn unsupported_confidence_is_forecast_error() {
        let fitted = fit(&history(48), &spec(ModelFamily::MstlEts)).unwrap();
        assert!(matches!(
            fitted.predict(6, 0.5),
            Err(PipelineError::Forecast(_))
        ));
    }
}
