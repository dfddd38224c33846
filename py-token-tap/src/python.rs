use std::time::Duration;

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use token_tap::BucketConfig;
use token_tap::BucketError;
use token_tap::ConsumptionProbe;
use token_tap::EstimationProbe;
use token_tap::TokenBucket;

fn value_error(err: BucketError) -> PyErr {
    PyValueError::new_err(err.to_string())
}

/// Python ints are signed; negative amounts are rejected before reaching the bucket.
fn non_negative(name: &str, value: i64) -> PyResult<u64> {
    u64::try_from(value)
        .map_err(|_| PyValueError::new_err(format!("{name} must not be negative, got {value}")))
}

#[pyclass(name = "ConsumptionProbe", frozen, get_all)]
struct PyConsumptionProbe {
    succeeded: bool,
    remaining_tokens: i64,
    /// Seconds.
    wait_time: f64,
}

#[pymethods]
impl PyConsumptionProbe {
    fn __repr__(&self) -> String {
        format!(
            "ConsumptionProbe(succeeded={}, remaining_tokens={}, wait_time={})",
            if self.succeeded { "True" } else { "False" },
            self.remaining_tokens,
            self.wait_time
        )
    }
}

impl From<ConsumptionProbe> for PyConsumptionProbe {
    fn from(probe: ConsumptionProbe) -> Self {
        Self {
            succeeded: probe.succeeded,
            remaining_tokens: probe.remaining_tokens,
            wait_time: probe.wait_time.as_secs_f64(),
        }
    }
}

#[pyclass(name = "EstimationProbe", frozen, get_all)]
struct PyEstimationProbe {
    would_succeed: bool,
    remaining_tokens: i64,
    wait_time: f64,
}

#[pymethods]
impl PyEstimationProbe {
    fn __repr__(&self) -> String {
        format!(
            "EstimationProbe(would_succeed={}, remaining_tokens={}, wait_time={})",
            if self.would_succeed { "True" } else { "False" },
            self.remaining_tokens,
            self.wait_time
        )
    }
}

impl From<EstimationProbe> for PyEstimationProbe {
    fn from(probe: EstimationProbe) -> Self {
        Self {
            would_succeed: probe.would_succeed,
            remaining_tokens: probe.remaining_tokens,
            wait_time: probe.wait_time.as_secs_f64(),
        }
    }
}

#[pyclass(name = "TokenBucket", frozen)]
struct PyTokenBucket(TokenBucket);

#[pymethods]
impl PyTokenBucket {
    #[new]
    fn new(capacity: i64, refill_amount: i64, refill_period_secs: f64) -> PyResult<Self> {
        let capacity = non_negative("capacity", capacity)?;
        let refill_amount = non_negative("refill_amount", refill_amount)?;
        let refill_period = Duration::try_from_secs_f64(refill_period_secs).map_err(|_| {
            PyValueError::new_err(format!(
                "refill_period_secs must be a positive number of seconds, got {refill_period_secs}"
            ))
        })?;
        let config =
            BucketConfig::new(capacity, refill_amount, refill_period).map_err(value_error)?;
        Ok(PyTokenBucket(TokenBucket::new(config)))
    }

    fn try_consume(&self, tokens: i64) -> PyResult<bool> {
        self.0
            .try_consume(non_negative("tokens", tokens)?)
            .map_err(value_error)
    }

    /// Returns the penalty in seconds.
    fn consume_ignoring_limits(&self, tokens: i64) -> PyResult<f64> {
        self.0
            .consume_ignoring_limits(non_negative("tokens", tokens)?)
            .map(|penalty| penalty.as_secs_f64())
            .map_err(value_error)
    }

    fn try_consume_with_probe(&self, tokens: i64) -> PyResult<PyConsumptionProbe> {
        self.0
            .try_consume_with_probe(non_negative("tokens", tokens)?)
            .map(PyConsumptionProbe::from)
            .map_err(value_error)
    }

    fn estimate(&self, tokens: i64) -> PyResult<PyEstimationProbe> {
        self.0
            .estimate(non_negative("tokens", tokens)?)
            .map(PyEstimationProbe::from)
            .map_err(value_error)
    }

    fn drain_all(&self) -> u64 {
        self.0.drain_all()
    }

    fn drain_up_to(&self, limit: i64) -> PyResult<u64> {
        self.0
            .drain_up_to(non_negative("limit", limit)?)
            .map_err(value_error)
    }

    fn add_tokens(&self, tokens: i64) -> PyResult<()> {
        self.0
            .add_tokens(non_negative("tokens", tokens)?)
            .map_err(value_error)
    }

    fn force_add_tokens(&self, tokens: i64) -> PyResult<()> {
        self.0
            .force_add_tokens(non_negative("tokens", tokens)?)
            .map_err(value_error)
    }

    fn reset(&self) {
        self.0.reset()
    }

    fn available(&self) -> i64 {
        self.0.available_tokens()
    }

    #[getter]
    fn capacity(&self) -> u64 {
        self.0.config().capacity()
    }
}

pub fn init_python_module(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyTokenBucket>()?;
    m.add_class::<PyConsumptionProbe>()?;
    m.add_class::<PyEstimationProbe>()?;
    Ok(())
}
