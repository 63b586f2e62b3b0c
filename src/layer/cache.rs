use crate::buffer::{Matrix, Shape};

/// Snapshot of a forward pass, handed back to the same layer's `backward` exactly once.
#[derive(Clone, Debug)]
pub enum Cache {
    None,
    Input(Matrix),
    Output(Matrix),
    Normed(Matrix),
    Shape(Shape),
    Lstm(Box<LstmCache>),
}

/// Per-step state of an LSTM forward pass.
#[derive(Clone, Debug, Default)]
pub struct LstmCache {
    pub input_shape: Shape,
    /// `[h_{t−1}, x_t]` column for every step.
    pub inputs: Vec<Matrix>,
    pub cell_states: Vec<Matrix>,
    pub forget: Vec<Matrix>,
    pub input: Vec<Matrix>,
    pub candidate: Vec<Matrix>,
    pub output: Vec<Matrix>,
}

impl Cache {

    pub fn variant_name(&self) -> &'static str {
        match self {
            Cache::None => "None",
            Cache::Input(_) => "Input",
            Cache::Output(_) => "Output",
            Cache::Normed(_) => "Normed",
            Cache::Shape(_) => "Shape",
            Cache::Lstm(_) => "Lstm",
        }
    }

}
