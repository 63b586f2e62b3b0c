use std::fmt;
use crate::buffer::{Matrix, Shape, convolve_valid, convolve_padded, rotate_180};
use crate::error::{NetError, NetResult};
use crate::initializer::NetInitializer;
use crate::layer::{Cache, LayerBase, LayerKind, PayloadReader, Shift, ShiftUpdate,
                   cache_mismatch, shift_mismatch, put_matrix, put_u32};

/// 2-D convolution over one or more stacked input maps.
///
/// The flat input is read as `num_inputs / input_shape.len()` maps. Kernels are split evenly
/// between the maps: kernel `j` reads map `j / kernels_per_input`. Each kernel produces one
/// valid-correlation output map, and the maps are stacked vertically into a
/// `(num_kernels · out_rows) × out_cols` output with a learned bias per element.
#[derive(Clone)]
pub struct Conv2DLayer {
    input_shape: Shape,
    kernel_shape: Shape,
    num_kernels: usize,
    first_layer: bool,

    kernels: Vec<Matrix>,
    biases: Matrix,

    inputs: usize,
    input_maps: usize,
    kernels_per_input: usize,
    output_shape: Shape,
}

impl fmt::Debug for Conv2DLayer {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("Conv2DLayer")
            .field("input_shape", &self.input_shape)
            .field("kernel_shape", &self.kernel_shape)
            .field("num_kernels", &self.num_kernels)
            .field("first_layer", &self.first_layer)
            .field("input_maps", &self.input_maps)
            .field("output_shape", &self.output_shape)
            .finish()
    }
}

impl Conv2DLayer {

    pub fn new(input_shape: Shape, kernel_shape: Shape, num_kernels: usize) -> Self {
        Conv2DLayer {
            input_shape,
            kernel_shape,
            num_kernels,
            first_layer: false,
            kernels: Vec::new(),
            biases: Matrix::zeros(0, 0),
            inputs: 0,
            input_maps: 0,
            kernels_per_input: 0,
            output_shape: Shape::default(),
        }
    }

    pub fn set_first_layer(&mut self, first_layer: bool) {
        self.first_layer = first_layer;
    }

    pub fn kernels(&self) -> &[Matrix] {
        &self.kernels
    }

    fn output_shape_for(input_shape: Shape, kernel_shape: Shape) -> Shape {
        Shape::new(input_shape.rows + 1 - kernel_shape.rows, input_shape.cols + 1 - kernel_shape.cols)
    }

    fn bias_shape(&self) -> Shape {
        Shape::new(self.num_kernels * self.output_shape.rows, self.output_shape.cols)
    }

    fn input_map(&self, data: &[f64], map: usize) -> Matrix {
        let len = self.input_shape.len();
        Matrix::new(self.input_shape.rows, self.input_shape.cols, data[map * len..(map + 1) * len].to_vec())
    }

    fn output_map(&self, data: &[f64], kernel: usize) -> Matrix {
        let len = self.output_shape.len();
        Matrix::new(self.output_shape.rows, self.output_shape.cols, data[kernel * len..(kernel + 1) * len].to_vec())
    }

    pub(crate) fn read_payload(reader: &mut PayloadReader) -> NetResult<Self> {
        let input_shape = Shape::new(reader.read_u32("conv input rows")?, reader.read_u32("conv input cols")?);
        let kernel_shape = Shape::new(reader.read_u32("conv kernel rows")?, reader.read_u32("conv kernel cols")?);
        let num_kernels = reader.read_u32("conv kernel count")?;
        let first_layer = reader.read_u32("conv first layer flag")? != 0;
        if kernel_shape.is_empty() || kernel_shape.rows > input_shape.rows || kernel_shape.cols > input_shape.cols {
            return Err(NetError::Corrupt(format!(
                "conv kernel {:?} does not fit input {:?}", kernel_shape, input_shape
            )));
        }
        let mut layer = Conv2DLayer::new(input_shape, kernel_shape, num_kernels);
        layer.first_layer = first_layer;
        layer.kernels = (0..num_kernels)
            .map(|_| reader.read_matrix(kernel_shape.rows, kernel_shape.cols, "conv kernel"))
            .collect::<NetResult<Vec<_>>>()?;
        let output_shape = Conv2DLayer::output_shape_for(input_shape, kernel_shape);
        layer.biases = reader.read_matrix(num_kernels * output_shape.rows, output_shape.cols, "conv biases")?;
        Ok(layer)
    }

}

impl LayerBase for Conv2DLayer {

    fn initialize(&mut self, num_inputs: usize, initializer: &mut dyn NetInitializer) -> NetResult<()> {
        if self.input_shape.is_empty() {
            return Err(NetError::MissingHyperparameter("Conv2D", "input_shape"));
        }
        if self.kernel_shape.is_empty() {
            return Err(NetError::MissingHyperparameter("Conv2D", "kernel_shape"));
        }
        if self.num_kernels == 0 {
            return Err(NetError::MissingHyperparameter("Conv2D", "num_kernels"));
        }
        if self.kernel_shape.rows > self.input_shape.rows || self.kernel_shape.cols > self.input_shape.cols {
            return Err(NetError::InvalidConfig(format!(
                "Conv2D kernel {}x{} is larger than its {}x{} input",
                self.kernel_shape.rows, self.kernel_shape.cols, self.input_shape.rows, self.input_shape.cols
            )));
        }
        let map_len = self.input_shape.len();
        if num_inputs % map_len != 0 {
            return Err(NetError::NotDivisible("Conv2D inputs".to_string(), num_inputs, map_len));
        }
        let input_maps = num_inputs / map_len;
        if input_maps == 0 {
            return Err(NetError::ShapeMismatch("Conv2D inputs".to_string(), map_len, num_inputs));
        }
        if self.num_kernels % input_maps != 0 {
            return Err(NetError::NotDivisible("Conv2D kernels".to_string(), self.num_kernels, input_maps));
        }

        self.inputs = num_inputs;
        self.input_maps = input_maps;
        self.kernels_per_input = self.num_kernels / input_maps;
        self.output_shape = Conv2DLayer::output_shape_for(self.input_shape, self.kernel_shape);
        let bias_shape = self.bias_shape();

        if !self.kernels.is_empty() {
            if self.kernels.len() != self.num_kernels || self.biases.rows() != bias_shape.rows
                || self.biases.cols() != bias_shape.cols {
                return Err(NetError::InvalidConfig("Conv2D parameters do not match its shapes".to_string()));
            }
            return Ok(());
        }
        let kernel_len = self.kernel_shape.len();
        let kernel_shape = self.kernel_shape;
        self.kernels = (0..self.num_kernels)
            .map(|_| Matrix::from_fn(kernel_shape.rows, kernel_shape.cols, |_, _| initializer.xavier(kernel_len, kernel_len)))
            .collect();
        self.biases = Matrix::zeros(bias_shape.rows, bias_shape.cols);
        Ok(())
    }

    fn forward(&self, input: &Matrix) -> NetResult<(Matrix, Cache)> {
        if input.len() != self.inputs {
            return Err(NetError::ShapeMismatch("Conv2D layer input".to_string(), self.inputs, input.len()));
        }
        let data = input.as_slice();
        let mut out = Vec::with_capacity(self.num_outputs());
        for (j, kernel) in self.kernels.iter().enumerate() {
            let map = self.input_map(data, j / self.kernels_per_input);
            out.extend_from_slice(convolve_valid(&map, kernel).as_slice());
        }
        let bias_shape = self.bias_shape();
        let mut output = Matrix::new(bias_shape.rows, bias_shape.cols, out);
        output.add(&self.biases);
        Ok((output, Cache::Input(input.clone())))
    }

    fn backward(&self, cache: Cache, grad_output: &Matrix) -> NetResult<(Shift, Matrix)> {
        let input = match cache {
            Cache::Input(input) => input,
            other => return Err(cache_mismatch("Conv2D", &other)),
        };
        if grad_output.len() != self.num_outputs() {
            return Err(NetError::ShapeMismatch("Conv2D layer gradient".to_string(), self.num_outputs(), grad_output.len()));
        }
        let data = input.as_slice();
        let grads = grad_output.as_slice();

        let kernel_shifts: Vec<Matrix> = (0..self.num_kernels)
            .map(|j| {
                let map = self.input_map(data, j / self.kernels_per_input);
                convolve_valid(&map, &self.output_map(grads, j))
            })
            .collect();
        let bias_shape = self.bias_shape();
        let bias_shift = grad_output.reshape(bias_shape.rows, bias_shape.cols);

        let mut grad_input = vec![0.0; input.len()];
        if !self.first_layer {
            let map_len = self.input_shape.len();
            for (j, kernel) in self.kernels.iter().enumerate() {
                let map = j / self.kernels_per_input;
                let passback = convolve_padded(&self.output_map(grads, j), &rotate_180(kernel));
                for (acc, v) in grad_input[map * map_len..(map + 1) * map_len].iter_mut().zip(passback.as_slice()) {
                    *acc += v;
                }
            }
        }

        Ok((
            Shift::Kernels { kernels: kernel_shifts, biases: bias_shift },
            Matrix::new(input.rows(), input.cols(), grad_input),
        ))
    }

    fn apply_shift(&mut self, shift: Shift, update: &ShiftUpdate) -> NetResult<()> {
        match shift {
            Shift::Nil => Ok(()),
            Shift::Kernels { kernels, biases } => {
                if kernels.len() != self.kernels.len() {
                    return Err(NetError::ShiftMismatch(format!(
                        "Conv2D layer has {} kernels, shift has {}", self.kernels.len(), kernels.len()
                    )));
                }
                for (slot, (kernel, shift)) in self.kernels.iter_mut().zip(kernels.into_iter()).enumerate() {
                    update.step(kernel, shift, slot)?;
                }
                update.step(&mut self.biases, biases, self.num_kernels)
            },
            other => Err(shift_mismatch("Conv2D", &other)),
        }
    }

    fn num_inputs(&self) -> usize {
        self.inputs
    }

    fn num_outputs(&self) -> usize {
        self.num_kernels * self.output_shape.len()
    }

    fn num_parameter_matrices(&self) -> usize {
        self.num_kernels + 1
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Conv2D
    }

    fn write_bytes(&self, out: &mut Vec<u8>) {
        put_u32(out, self.input_shape.rows);
        put_u32(out, self.input_shape.cols);
        put_u32(out, self.kernel_shape.rows);
        put_u32(out, self.kernel_shape.cols);
        put_u32(out, self.num_kernels);
        put_u32(out, self.first_layer as usize);
        for kernel in self.kernels.iter() {
            put_matrix(out, kernel);
        }
        put_matrix(out, &self.biases);
    }

    fn pretty_print(&self) -> String {
        let mut ret = format!(
            "Conv2D Layer\n{} Inputs ({} maps of {}x{}) -> {} Kernels of {}x{} -> {} Outputs\n",
            self.inputs, self.input_maps, self.input_shape.rows, self.input_shape.cols,
            self.num_kernels, self.kernel_shape.rows, self.kernel_shape.cols, self.num_outputs()
        );
        for (j, kernel) in self.kernels.iter().enumerate() {
            ret += &format!("\nkernel {} =\n{}\n", j, kernel);
        }
        ret
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::initializer::RandomNetInitializer;
    use crate::layer::test_util::*;

    fn layer(input: Shape, kernel: Shape, kernels: usize, inputs: usize) -> Conv2DLayer {
        let mut init = RandomNetInitializer::new_with_seed("conv");
        let mut layer = Conv2DLayer::new(input, kernel, kernels);
        layer.initialize(inputs, &mut init).unwrap();
        layer
    }

    #[test]
    fn test_output_layout() {
        let mut conv = layer(Shape::new(3, 3), Shape::new(2, 2), 2, 9);
        conv.kernels = vec![
            Matrix::new(2, 2, vec![1., 0., 0., 0.]),
            Matrix::new(2, 2, vec![0., 0., 0., 1.]),
        ];
        let input = Matrix::column((1..=9).map(f64::from).collect());
        let (output, _) = conv.forward(&input).unwrap();
        assert_eq!(output.rows(), 4);
        assert_eq!(output.cols(), 2);
        assert_eq!(output.as_slice(), &[1., 2., 4., 5., 5., 6., 8., 9.]);
    }

    #[test]
    fn test_kernels_split_between_maps() {
        let mut conv = layer(Shape::new(2, 2), Shape::new(2, 2), 2, 8);
        conv.kernels = vec![Matrix::filled(2, 2, 1.0), Matrix::filled(2, 2, 1.0)];
        let input = Matrix::column(vec![1., 1., 1., 1., 10., 10., 10., 10.]);
        let (output, _) = conv.forward(&input).unwrap();
        assert_eq!(output.as_slice(), &[4., 40.]);
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let mut init = RandomNetInitializer::new_with_seed("conv gradients");
        let mut conv = layer(Shape::new(4, 4), Shape::new(2, 3), 4, 32);
        let input = random_matrix(&mut init, 32, 1);
        let target: Vec<f64> = (0..conv.num_outputs()).map(|i| (i as f64 * 0.37).sin()).collect();
        check_input_gradient(&conv, &input, &target, 1e-4);

        let (_, cache) = conv.forward(&input).unwrap();
        let grad = descent_gradient(&conv, &input, &target);
        let (shift, _) = conv.backward(cache, &grad).unwrap();
        let kernel_shifts = match shift {
            Shift::Kernels { kernels, .. } => kernels,
            other => panic!("unexpected {:?}", other),
        };
        let h = 1e-6;
        for k in 0..conv.kernels.len() {
            for idx in 0..conv.kernels[k].len() {
                let base = conv.kernels[k].as_slice()[idx];
                conv.kernels[k].as_mut_slice()[idx] = base + h;
                let plus = loss(&conv, &input, &target);
                conv.kernels[k].as_mut_slice()[idx] = base - h;
                let minus = loss(&conv, &input, &target);
                conv.kernels[k].as_mut_slice()[idx] = base;
                let numeric = (plus - minus) / (2.0 * h);
                let analytic = -kernel_shifts[k].as_slice()[idx];
                assert!((numeric - analytic).abs() / numeric.abs().max(1.0) < 1e-4,
                        "kernel {} weight {}: numeric {} vs analytic {}", k, idx, numeric, analytic);
            }
        }
    }

    #[test]
    fn test_first_layer_skips_input_gradient() {
        let mut conv = layer(Shape::new(3, 3), Shape::new(2, 2), 1, 9);
        conv.set_first_layer(true);
        let input = Matrix::column(vec![1.0; 9]);
        let (output, cache) = conv.forward(&input).unwrap();
        let (_, grad_input) = conv.backward(cache, &output).unwrap();
        assert_eq!(grad_input.as_slice(), &[0.0; 9]);
    }

    #[test]
    fn test_configuration_errors() {
        let mut init = RandomNetInitializer::new_with_seed("conv errors");
        match Conv2DLayer::new(Shape::new(3, 3), Shape::new(2, 2), 2).initialize(10, &mut init) {
            Err(NetError::NotDivisible(_, 10, 9)) => {},
            other => panic!("unexpected {:?}", other),
        }
        match Conv2DLayer::new(Shape::new(3, 3), Shape::new(2, 2), 3).initialize(18, &mut init) {
            Err(NetError::NotDivisible(_, 3, 2)) => {},
            other => panic!("unexpected {:?}", other),
        }
        assert!(Conv2DLayer::new(Shape::new(2, 2), Shape::new(3, 3), 1).initialize(4, &mut init).is_err());
        match Conv2DLayer::new(Shape::default(), Shape::new(3, 3), 1).initialize(4, &mut init) {
            Err(NetError::MissingHyperparameter("Conv2D", "input_shape")) => {},
            other => panic!("unexpected {:?}", other),
        }
    }

}
