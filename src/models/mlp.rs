//! Feed-forward ReLU network trained with Adam on squared error.

use super::{check_training_data, check_width, FitError, Regressor};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::distributions::{Distribution, Uniform};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const LEARNING_RATE: f64 = 1e-3;
const BETA_1: f64 = 0.9;
const BETA_2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-8;
const L2_PENALTY: f64 = 1e-4;
const MAX_BATCH: usize = 200;
const MAX_EPOCHS: usize = 200;
const TOL: f64 = 1e-4;
const PATIENCE: usize = 10;

#[derive(Debug, Clone)]
struct Layer {
    weights: Array2<f64>,
    bias: Array1<f64>,
}

/// First and second moment estimates for one layer
#[derive(Debug, Clone)]
struct Moments {
    m_w: Array2<f64>,
    v_w: Array2<f64>,
    m_b: Array1<f64>,
    v_b: Array1<f64>,
}

impl Moments {
    fn zeros(layer: &Layer) -> Self {
        Self {
            m_w: Array2::zeros(layer.weights.raw_dim()),
            v_w: Array2::zeros(layer.weights.raw_dim()),
            m_b: Array1::zeros(layer.bias.len()),
            v_b: Array1::zeros(layer.bias.len()),
        }
    }
}

/// Multi-layer perceptron regressor
///
/// Hidden layers use ReLU, the single output is linear. Weights start from a
/// Glorot-uniform draw seeded by `random_state`; training runs mini-batch Adam
/// with an L2 penalty and stops once the epoch loss fails to improve by
/// `1e-4` for ten consecutive epochs.
#[derive(Debug, Clone)]
pub struct MlpRegressor {
    hidden: Vec<usize>,
    random_state: u64,
    layers: Vec<Layer>,
    loss_curve: Vec<f64>,
}

impl MlpRegressor {
    /// Create an unfitted network with the given hidden-layer widths
    #[must_use]
    pub fn new(hidden: Vec<usize>, random_state: u64) -> Self {
        Self {
            hidden,
            random_state,
            layers: Vec::new(),
            loss_curve: Vec::new(),
        }
    }

    /// Mean training loss per completed epoch
    #[must_use]
    pub fn loss_curve(&self) -> &[f64] {
        &self.loss_curve
    }

    fn init_layers(&self, n_features: usize, rng: &mut ChaCha8Rng) -> Vec<Layer> {
        let mut sizes = Vec::with_capacity(self.hidden.len() + 2);
        sizes.push(n_features);
        sizes.extend_from_slice(&self.hidden);
        sizes.push(1);

        sizes
            .windows(2)
            .map(|pair| {
                let (fan_in, fan_out) = (pair[0], pair[1]);
                #[allow(clippy::cast_precision_loss)]
                let bound = (6.0 / (fan_in + fan_out) as f64).sqrt();
                let dist = Uniform::new(-bound, bound);
                Layer {
                    weights: Array2::from_shape_fn((fan_in, fan_out), |_| dist.sample(rng)),
                    bias: Array1::from_shape_fn(fan_out, |_| dist.sample(rng)),
                }
            })
            .collect()
    }
}

/// Activations of every layer, input first
fn forward(layers: &[Layer], x: ArrayView2<'_, f64>) -> Vec<Array2<f64>> {
    let mut activations = Vec::with_capacity(layers.len() + 1);
    activations.push(x.to_owned());
    for (i, layer) in layers.iter().enumerate() {
        let input = &activations[activations.len() - 1];
        let mut z = input.dot(&layer.weights) + &layer.bias;
        if i + 1 < layers.len() {
            z.mapv_inplace(|v| v.max(0.0));
        }
        activations.push(z);
    }
    activations
}

/// One Adam step on a mini-batch; returns the penalized batch loss
#[allow(clippy::cast_precision_loss)]
fn train_batch(
    layers: &mut [Layer],
    moments: &mut [Moments],
    step: i32,
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
) -> f64 {
    let batch = x.nrows() as f64;
    let activations = forward(layers, x);
    let Some(output) = activations.last() else {
        return f64::NAN;
    };
    let mut delta = output - &y.insert_axis(Axis(1));

    let penalty: f64 = layers.iter().map(|l| l.weights.iter().map(|w| w * w).sum::<f64>()).sum();
    let loss = delta.iter().map(|d| d * d).sum::<f64>() / (2.0 * batch) + 0.5 * L2_PENALTY * penalty / batch;

    let mut grads = Vec::with_capacity(layers.len());
    for i in (0..layers.len()).rev() {
        let grad_w = (activations[i].t().dot(&delta) + L2_PENALTY * &layers[i].weights) / batch;
        let grad_b = delta.sum_axis(Axis(0)) / batch;
        if i > 0 {
            let mut next = delta.dot(&layers[i].weights.t());
            next.zip_mut_with(&activations[i], |d, a| {
                if *a <= 0.0 {
                    *d = 0.0;
                }
            });
            delta = next;
        }
        grads.push((grad_w, grad_b));
    }
    grads.reverse();

    let rate = LEARNING_RATE * (1.0 - BETA_2.powi(step)).sqrt() / (1.0 - BETA_1.powi(step));
    for ((layer, m), (grad_w, grad_b)) in layers.iter_mut().zip(moments.iter_mut()).zip(grads) {
        adam(&mut layer.weights, &mut m.m_w, &mut m.v_w, &grad_w, rate);
        adam(&mut layer.bias, &mut m.m_b, &mut m.v_b, &grad_b, rate);
    }
    loss
}

fn adam<D: ndarray::Dimension>(
    param: &mut ndarray::Array<f64, D>,
    m: &mut ndarray::Array<f64, D>,
    v: &mut ndarray::Array<f64, D>,
    grad: &ndarray::Array<f64, D>,
    rate: f64,
) {
    ndarray::Zip::from(param)
        .and(m)
        .and(v)
        .and(grad)
        .for_each(|p, m, v, &g| {
            *m = BETA_1.mul_add(*m, (1.0 - BETA_1) * g);
            *v = BETA_2.mul_add(*v, (1.0 - BETA_2) * g * g);
            *p -= rate * *m / (v.sqrt() + ADAM_EPSILON);
        });
}

impl Regressor for MlpRegressor {
    #[allow(clippy::cast_precision_loss)]
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), FitError> {
        check_training_data(x, y)?;
        if self.hidden.contains(&0) {
            return Err(FitError::InvalidParameter(format!(
                "hidden layer widths {:?}",
                self.hidden
            )));
        }

        let n = x.nrows();
        let mut rng = ChaCha8Rng::seed_from_u64(self.random_state);
        let mut layers = self.init_layers(x.ncols(), &mut rng);
        let mut moments: Vec<Moments> = layers.iter().map(Moments::zeros).collect();
        let batch_size = n.min(MAX_BATCH);
        let mut order: Vec<usize> = (0..n).collect();

        self.loss_curve.clear();
        let mut best_loss = f64::INFINITY;
        let mut stale = 0;
        let mut step = 0;

        for _ in 0..MAX_EPOCHS {
            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0;
            for chunk in order.chunks(batch_size) {
                step += 1;
                let xb = x.select(Axis(0), chunk);
                let yb = y.select(Axis(0), chunk);
                let loss = train_batch(&mut layers, &mut moments, step, xb.view(), yb.view());
                epoch_loss += loss * chunk.len() as f64;
            }
            epoch_loss /= n as f64;
            if !epoch_loss.is_finite() {
                return Err(FitError::NonFinite("MLP training loss".to_string()));
            }
            self.loss_curve.push(epoch_loss);

            if epoch_loss > best_loss - TOL {
                stale += 1;
            } else {
                stale = 0;
            }
            best_loss = best_loss.min(epoch_loss);
            if stale > PATIENCE {
                break;
            }
        }

        self.layers = layers;
        Ok(())
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, FitError> {
        let first = self.layers.first().ok_or(FitError::NotFitted)?;
        check_width(first.weights.nrows(), x)?;
        let activations = forward(&self.layers, x);
        activations
            .last()
            .map(|out| out.column(0).to_owned())
            .ok_or(FitError::NotFitted)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ndarray::array;

    fn line() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((30, 2), |(i, j)| if j == 0 { i as f64 / 15.0 - 1.0 } else { 0.5 });
        let y = x.column(0).mapv(|v| 2.0 * v);
        (x, y)
    }

    #[test]
    fn test_seeded_fit_is_reproducible() {
        let (x, y) = line();
        let mut a = MlpRegressor::new(vec![16], 7);
        let mut b = MlpRegressor::new(vec![16], 7);
        a.fit(x.view(), y.view()).unwrap();
        b.fit(x.view(), y.view()).unwrap();
        assert_eq!(a.predict(x.view()).unwrap(), b.predict(x.view()).unwrap());
        assert_eq!(a.loss_curve(), b.loss_curve());
    }

    #[test]
    fn test_training_reduces_loss() {
        let (x, y) = line();
        let mut model = MlpRegressor::new(vec![32, 16], 42);
        model.fit(x.view(), y.view()).unwrap();
        let curve = model.loss_curve();
        assert!(!curve.is_empty());
        assert!(curve[curve.len() - 1] < curve[0]);
    }

    #[test]
    fn test_zero_width_layer_rejected() {
        let (x, y) = line();
        let mut model = MlpRegressor::new(vec![4, 0], 0);
        assert!(matches!(
            model.fit(x.view(), y.view()),
            Err(FitError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_predict_shape() {
        let (x, y) = line();
        let mut model = MlpRegressor::new(vec![4], 0);
        model.fit(x.view(), y.view()).unwrap();
        assert_eq!(model.predict(array![[0.0, 0.5], [1.0, 0.5]].view()).unwrap().len(), 2);
        assert!(model.predict(array![[0.0]].view()).is_err());
    }
}
