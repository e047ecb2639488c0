mod concurrency;
mod gate_layer;
mod scenario;
