//! # py-token-tap
//!
//! `py-token-tap` a Python wrapper for `token-tap`.


mod python;

#[pyo3::prelude::pymodule]
fn py_token_tap(
    m: &pyo3::prelude::Bound<'_, pyo3::prelude::PyModule>,
) -> pyo3::prelude::PyResult<()> {
    python::init_python_module(m)
}
