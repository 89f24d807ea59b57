use core::ops::{Add, AddAssign};

use burn::{
    nn::{conv::Conv2d, BatchNorm, Linear},
    tensor::backend::Backend,
};

/// Cost summary for a module: multiply-accumulate operations and parameter
/// count, accumulated over the layers the module runs.
///
/// Convolution and linear layers report one flop per multiply-accumulate,
/// batch normalization two per output element, average pooling one per
/// output element. Activations and max pooling are free. Running statistics
/// are not trainable and do not count as parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Profile {
    pub flops: u64,
    pub params: u64,
}

impl Add for Profile {
    type Output = Profile;

    fn add(self, rhs: Profile) -> Profile {
        Profile {
            flops: self.flops + rhs.flops,
            params: self.params + rhs.params,
        }
    }
}

impl AddAssign for Profile {
    fn add_assign(&mut self, rhs: Profile) {
        *self = *self + rhs;
    }
}

/// Output resolution of a strided convolution with half padding
/// (`2 * padding == kernel_size - 1`), which holds for every convolution
/// and pooling layer in the network.
pub fn stride_output(resolution: [usize; 2], stride: usize) -> [usize; 2] {
    let [height, width] = resolution;
    [(height - 1) / stride + 1, (width - 1) / stride + 1]
}

/// Count a convolution layer at the given output resolution.
pub fn conv2d<B: Backend>(conv: &Conv2d<B>, output: [usize; 2]) -> Profile {
    // Weight layout: [out_channels, in_channels / groups, k_h, k_w]
    let [out_channels, in_per_group, k_h, k_w] = conv.weight.dims();
    let [out_h, out_w] = output;

    let weight_params = out_channels * in_per_group * k_h * k_w;
    let bias_params = conv.bias.as_ref().map_or(0, |b| b.dims()[0]);

    Profile {
        flops: (out_h * out_w * out_channels * in_per_group * k_h * k_w) as u64,
        params: (weight_params + bias_params) as u64,
    }
}

/// Count a batch normalization layer at the given output resolution.
pub fn batch_norm<B: Backend>(bn: &BatchNorm<B, 2>, output: [usize; 2]) -> Profile {
    let num_features = bn.gamma.dims()[0];
    let [out_h, out_w] = output;

    Profile {
        // Scale and shift per output element
        flops: (2 * num_features * out_h * out_w) as u64,
        // Gamma and beta; running statistics are not trainable
        params: (2 * num_features) as u64,
    }
}

/// Count a linear layer on a flattened input.
pub fn linear<B: Backend>(linear: &Linear<B>) -> Profile {
    let [d_input, d_output] = linear.weight.dims();
    let bias_params = linear.bias.as_ref().map_or(0, |b| b.dims()[0]);

    Profile {
        flops: (d_input * d_output) as u64,
        params: (d_input * d_output + bias_params) as u64,
    }
}

/// Count an average pooling layer producing `output_elems` elements.
pub fn avg_pool(output_elems: usize) -> Profile {
    Profile {
        flops: output_elems as u64,
        params: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::NdArray,
        nn::{conv::Conv2dConfig, BatchNormConfig, LinearConfig},
    };

    type B = NdArray<f32>;

    #[test]
    fn stride_output_divides_exactly_with_half_padding() {
        assert_eq!(stride_output([224, 224], 2), [112, 112]);
        assert_eq!(stride_output([112, 112], 1), [112, 112]);
        // Odd input still rounds the way a padded convolution does
        assert_eq!(stride_output([7, 7], 2), [4, 4]);
    }

    #[test]
    fn conv2d_counts_macs_and_weights() {
        let device = Default::default();
        let conv: Conv2d<B> = Conv2dConfig::new([3, 8], [3, 3])
            .with_bias(false)
            .init(&device);

        let profile = conv2d(&conv, [4, 4]);
        assert_eq!(profile.flops, 4 * 4 * 8 * 3 * 3 * 3);
        assert_eq!(profile.params, 8 * 3 * 3 * 3);
    }

    #[test]
    fn conv2d_counts_bias_parameters() {
        let device = Default::default();
        let conv: Conv2d<B> = Conv2dConfig::new([3, 8], [1, 1]).init(&device);

        let profile = conv2d(&conv, [2, 2]);
        assert_eq!(profile.params, 8 * 3 + 8);
    }

    #[test]
    fn batch_norm_counts_affine_parameters_only() {
        let device = Default::default();
        let bn: BatchNorm<B, 2> = BatchNormConfig::new(8).init(&device);

        let profile = batch_norm(&bn, [4, 4]);
        assert_eq!(profile.flops, 2 * 8 * 4 * 4);
        assert_eq!(profile.params, 16);
    }

    #[test]
    fn linear_counts_weights_and_bias() {
        let device = Default::default();
        let fc: Linear<B> = LinearConfig::new(4, 3).init(&device);

        let profile = linear(&fc);
        assert_eq!(profile.flops, 12);
        assert_eq!(profile.params, 15);
    }

    #[test]
    fn profiles_accumulate() {
        let mut total = Profile::default();
        total += Profile { flops: 2, params: 3 };
        total += Profile { flops: 5, params: 7 };
        assert_eq!(
            total,
            Profile {
                flops: 7,
                params: 10
            }
        );
    }
}
