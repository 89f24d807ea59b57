use alloc::vec::Vec;
use core::f64::consts::SQRT_2;

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Device, Tensor},
};

use super::profile::{self, Profile};

/// Bottleneck expansion factor: a block's output is always `planes * EXPANSION`
/// channels wide, whatever its interior widths are.
pub const EXPANSION: usize = 4;

fn conv_initializer() -> Initializer {
    Initializer::KaimingNormal {
        gain: SQRT_2, // recommended value for ReLU
        fan_out_only: true,
    }
}

/// ResNet bottleneck residual block with configurable interior channel widths.
/// Derived from [torchvision.models.resnet.Bottleneck](https://github.com/pytorch/vision/blob/main/torchvision/models/resnet.py),
/// with the two interior widths decoupled from the block's nominal planes so a
/// channel-pruned network can be rebuilt at its slimmed width.
#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    conv3: Conv2d<B>,
    bn3: BatchNorm<B, 2>,
    relu: Relu,
    downsample: Option<Downsample<B>>,
}

impl<B: Backend> Bottleneck<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = input.clone();

        // Conv block
        let out = self.conv1.forward(input);
        let out = self.bn1.forward(out);
        let out = self.relu.forward(out);
        let out = self.conv2.forward(out);
        let out = self.bn2.forward(out);
        let out = self.relu.forward(out);
        let out = self.conv3.forward(out);
        let out = self.bn3.forward(out);

        // Skip connection
        let out = {
            match &self.downsample {
                Some(downsample) => out + downsample.forward(identity),
                None => out + identity,
            }
        };

        // Activation
        self.relu.forward(out)
    }

    /// Count the block's operations at the given input resolution.
    ///
    /// Returns the cost together with the output resolution.
    pub fn profile(&self, resolution: [usize; 2]) -> (Profile, [usize; 2]) {
        let output = profile::stride_output(resolution, self.conv2.stride[0]);

        let mut total = profile::conv2d(&self.conv1, resolution);
        total += profile::batch_norm(&self.bn1, resolution);
        total += profile::conv2d(&self.conv2, output);
        total += profile::batch_norm(&self.bn2, output);
        total += profile::conv2d(&self.conv3, output);
        total += profile::batch_norm(&self.bn3, output);

        if let Some(downsample) = &self.downsample {
            total += downsample.profile(output);
        }

        (total, output)
    }
}

/// [Bottleneck](Bottleneck) configuration.
pub struct BottleneckConfig {
    conv1: Conv2dConfig,
    bn1: BatchNormConfig,
    conv2: Conv2dConfig,
    bn2: BatchNormConfig,
    conv3: Conv2dConfig,
    bn3: BatchNormConfig,
    downsample: Option<DownsampleConfig>,
}

impl BottleneckConfig {
    /// Create a new instance of the bottleneck block [config](BottleneckConfig).
    ///
    /// `channels` lists the conv1 input width, the conv1 output width and the
    /// conv2 output width. conv3 always restores `out_channels` so the residual
    /// addition stays shape-compatible when the interior widths are pruned.
    pub fn new(channels: [usize; 3], out_channels: usize, stride: usize) -> Self {
        let [in_channels, width1, width2] = channels;

        // conv1x1 reduce
        let conv1 = Conv2dConfig::new([in_channels, width1], [1, 1])
            .with_bias(false)
            .with_initializer(conv_initializer());
        let bn1 = BatchNormConfig::new(width1);
        // conv3x3, carries the block stride
        let conv2 = Conv2dConfig::new([width1, width2], [3, 3])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .with_initializer(conv_initializer());
        let bn2 = BatchNormConfig::new(width2);
        // conv1x1 expand
        let conv3 = Conv2dConfig::new([width2, out_channels], [1, 1])
            .with_bias(false)
            .with_initializer(conv_initializer());
        let bn3 = BatchNormConfig::new(out_channels);

        let downsample = {
            if stride != 1 || in_channels != out_channels {
                Some(DownsampleConfig::new(in_channels, out_channels, stride))
            } else {
                None
            }
        };

        Self {
            conv1,
            bn1,
            conv2,
            bn2,
            conv3,
            bn3,
            downsample,
        }
    }

    /// Initialize a new [bottleneck block](Bottleneck) module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Bottleneck<B> {
        Bottleneck {
            conv1: self.conv1.init(device),
            bn1: self.bn1.init(device),
            conv2: self.conv2.init(device),
            bn2: self.bn2.init(device),
            conv3: self.conv3.init(device),
            bn3: self.bn3.init(device),
            relu: Relu::new(),
            downsample: self.downsample.as_ref().map(|d| d.init(device)),
        }
    }
}

/// Downsample layer applies a 1x1 conv to reduce the resolution [H, W] and
/// adjust the number of channels on the identity path.
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> Downsample<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv.forward(input);
        self.bn.forward(out)
    }

    fn profile(&self, output: [usize; 2]) -> Profile {
        profile::conv2d(&self.conv, output) + profile::batch_norm(&self.bn, output)
    }
}

/// [Downsample](Downsample) configuration.
pub struct DownsampleConfig {
    conv: Conv2dConfig,
    bn: BatchNormConfig,
}

impl DownsampleConfig {
    /// Create a new instance of the downsample [config](DownsampleConfig).
    pub fn new(in_channels: usize, out_channels: usize, stride: usize) -> Self {
        // conv1x1 (default padding = valid)
        let conv = Conv2dConfig::new([in_channels, out_channels], [1, 1])
            .with_stride([stride, stride])
            .with_bias(false)
            .with_initializer(conv_initializer());
        let bn = BatchNormConfig::new(out_channels);

        Self { conv, bn }
    }

    /// Initialize a new [downsample](Downsample) module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Downsample<B> {
        Downsample {
            conv: self.conv.init(device),
            bn: self.bn.init(device),
        }
    }
}

/// Collection of sequential bottleneck blocks.
#[derive(Module, Debug)]
pub struct LayerBlock<B: Backend> {
    blocks: Vec<Bottleneck<B>>,
}

impl<B: Backend> LayerBlock<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut out = input;
        for block in &self.blocks {
            out = block.forward(out);
        }
        out
    }

    /// Count the group's operations at the given input resolution.
    pub fn profile(&self, resolution: [usize; 2]) -> (Profile, [usize; 2]) {
        let mut total = Profile::default();
        let mut resolution = resolution;
        for block in &self.blocks {
            let (cost, output) = block.profile(resolution);
            total += cost;
            resolution = output;
        }
        (total, resolution)
    }
}

/// [LayerBlock](LayerBlock) configuration.
pub struct LayerBlockConfig {
    blocks: Vec<BottleneckConfig>,
}

impl LayerBlockConfig {
    /// Create a new instance of the layer block [config](LayerBlockConfig).
    ///
    /// `channels` is the group's slice of the flat channel list, three widths
    /// per block. Each block's first width must match the block's input, which
    /// is `in_channels` for the first block and `planes * 4` after that.
    pub fn new(
        num_blocks: usize,
        in_channels: usize,
        planes: usize,
        stride: usize,
        channels: &[usize],
    ) -> Self {
        assert_eq!(
            channels.len(),
            3 * num_blocks,
            "expected {} channel widths for {num_blocks} blocks, got {}",
            3 * num_blocks,
            channels.len()
        );

        let out_channels = planes * EXPANSION;
        let blocks = (0..num_blocks)
            .map(|b| {
                let widths = [channels[3 * b], channels[3 * b + 1], channels[3 * b + 2]];
                let block_input = if b == 0 { in_channels } else { out_channels };
                assert_eq!(
                    widths[0], block_input,
                    "channel list gives width {} for block {b}, but its input is {block_input} channels wide",
                    widths[0]
                );

                if b == 0 {
                    // First block uses the specified stride
                    BottleneckConfig::new(widths, out_channels, stride)
                } else {
                    // Other blocks use a stride of 1
                    BottleneckConfig::new(widths, out_channels, 1)
                }
            })
            .collect();

        Self { blocks }
    }

    /// Initialize a new [layer block](LayerBlock) module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> LayerBlock<B> {
        LayerBlock {
            blocks: self.blocks.iter().map(|b| b.init(device)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn bottleneck_keeps_output_width_independent_of_interior() {
        let device = Default::default();
        let block = BottleneckConfig::new([8, 2, 3], 16, 2).init::<B>(&device);

        let input = Tensor::ones([2, 8, 8, 8], &device);
        let output = block.forward(input);
        assert_eq!(output.dims(), [2, 16, 4, 4]);
        assert!(block.downsample.is_some());
    }

    #[test]
    fn identity_block_has_no_downsample() {
        let device = Default::default();
        let block = BottleneckConfig::new([16, 4, 4], 16, 1).init::<B>(&device);

        assert!(block.downsample.is_none());

        let input = Tensor::ones([1, 16, 8, 8], &device);
        assert_eq!(block.forward(input).dims(), [1, 16, 8, 8]);
    }

    #[test]
    fn layer_block_slices_three_widths_per_block() {
        let device = Default::default();
        let group = LayerBlockConfig::new(2, 8, 4, 2, &[8, 2, 2, 16, 3, 3]).init::<B>(&device);

        assert_eq!(group.blocks.len(), 2);

        let input = Tensor::ones([1, 8, 8, 8], &device);
        assert_eq!(group.forward(input).dims(), [1, 16, 4, 4]);
    }

    #[test]
    fn layer_block_profile_tracks_resolution() {
        let device = Default::default();
        let group = LayerBlockConfig::new(2, 8, 4, 2, &[8, 2, 2, 16, 3, 3]).init::<B>(&device);

        let (_, resolution) = group.profile([8, 8]);
        assert_eq!(resolution, [4, 4]);
    }

    #[test]
    #[should_panic(expected = "expected 6 channel widths")]
    fn layer_block_rejects_short_channel_list() {
        LayerBlockConfig::new(2, 8, 4, 2, &[8, 2, 2]);
    }

    #[test]
    #[should_panic(expected = "but its input is 16 channels wide")]
    fn layer_block_rejects_mismatched_block_input() {
        LayerBlockConfig::new(2, 8, 4, 2, &[8, 2, 2, 8, 3, 3]);
    }
}
