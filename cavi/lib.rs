#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod data;
pub mod elbo;
pub mod fit;
pub mod groups;
pub mod inclusion;
pub mod mean;
pub mod model;
pub mod optimizer;
pub mod precision;
pub mod quadratic;
pub mod residual;
pub mod scale;

pub use data::{RegressionData, load_regression_data};
pub use elbo::{ElboEstimator, MonteCarloElbo};
pub use fit::{CancellationSignal, CaviDriver, FitError, ProgressSink, fit};
pub use model::{FitConfig, FitOptions, FitResult, FitStatus, Hyperparameters, VariationalState};
