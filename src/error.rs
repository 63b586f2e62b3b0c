use std::io;

quick_error! {
    #[derive(Debug)]
    pub enum NetError {
        MissingHyperparameter(layer: &'static str, name: &'static str) {
            description("Missing layer hyperparameter")
            display("{} layer requires {} to be set", layer, name)
        }
        ShapeMismatch(context: String, expected: usize, actual: usize) {
            description("Shape mismatch")
            display("Shape mismatch in {}: expected {}, got {}", context, expected, actual)
        }
        NotDivisible(context: String, size: usize, divisor: usize) {
            description("Size does not divide evenly")
            display("{}: {} is not divisible by {}", context, size, divisor)
        }
        InvalidConfig(msg: String) {
            description("Invalid network configuration")
            display("Invalid network configuration: {}", msg)
        }
        AlreadyInitialized {
            description("Network already initialized")
        }
        NotInitialized {
            description("Network not initialized")
        }
        InputSize(expected: usize, actual: usize) {
            description("Input size mismatch")
            display("Expected input of size {}, got {}", expected, actual)
        }
        TargetSize(expected: usize, actual: usize) {
            description("Target size mismatch")
            display("Expected target of size {}, got {}", expected, actual)
        }
        CacheMismatch(layer: &'static str) {
            description("Backward pass received a cache from a different forward pass")
            display("{} layer received a cache it did not produce", layer)
        }
        ShiftMismatch(msg: String) {
            description("Shifts cannot be combined or applied")
            display("Shift mismatch: {}", msg)
        }
        OptimizerSlot(slot: usize, size: usize) {
            description("Optimizer slot out of range")
            display("Optimizer slot {} out of range for {} slots", slot, size)
        }
        WorkerTimeout(pending: usize) {
            description("Training workers timed out")
            display("{} training samples did not complete before the worker timeout", pending)
        }
        WorkerFailed(msg: String) {
            description("Training worker failed")
            display("Training worker failed: {}", msg)
        }
        EmptyDataSet {
            description("Data set is empty")
        }
        UnknownLayerKind(tag: u32) {
            description("Unknown layer kind tag")
            display("Unknown layer kind tag {}", tag)
        }
        Corrupt(msg: String) {
            description("Corrupt network data")
            display("Corrupt network data: {}", msg)
        }
        Io(err: io::Error) {
            from()
            description("I/O error")
            display("I/O error: {}", err)
            cause(err)
        }
    }
}

pub type NetResult<T> = Result<T, NetError>;
