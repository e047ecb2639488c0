mod audit;
mod metrics;
mod patterns;
