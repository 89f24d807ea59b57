use core::f64::consts::SQRT_2;

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Initializer, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Device, Tensor},
};

use super::{
    block::{LayerBlock, LayerBlockConfig, EXPANSION},
    profile::{self, Profile},
};

#[cfg(feature = "std")]
use {
    burn::record::{FullPrecisionSettings, Recorder, RecorderError},
    burn_import::pytorch::{config_from_file, LoadArgs, PyTorchFileRecorder},
    std::path::Path,
};

#[cfg(feature = "pretrained")]
use super::weights::{self, WeightsMeta};

// ResNet-50 residual layer block config
const RESNET50_BLOCKS: [usize; 4] = [3, 4, 6, 3];

/// Number of channel widths a ResNet-50 channel list carries: three per
/// bottleneck block, sliced per layer group as 9 + 12 + 18 + 9.
pub const NUM_CHANNELS: usize = 48;

/// Interior channel widths of the unpruned ResNet-50, flattened three per
/// block. A pruned checkpoint stores its own (smaller) version of this list.
pub const RESNET50_CHANNELS: [usize; NUM_CHANNELS] = [
    // layer1: 64, 64 * 4 input after the first block
    64, 64, 64, 256, 64, 64, 256, 64, 64,
    // layer2
    256, 128, 128, 512, 128, 128, 512, 128, 128, 512, 128, 128,
    // layer3
    512, 256, 256, 1024, 256, 256, 1024, 256, 256, 1024, 256, 256, 1024, 256, 256, 1024, 256, 256,
    // layer4
    1024, 512, 512, 2048, 512, 512, 2048, 512, 512,
];

/// ResNet-50 implementation with per-block channel widths.
/// Derived from [torchvision.models.resnet.ResNet](https://github.com/pytorch/vision/blob/main/torchvision/models/resnet.py),
/// extended with a flat channel-width list so a network slimmed by channel
/// pruning can be rebuilt at its pruned width.
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    relu: Relu,
    maxpool: MaxPool2d,
    layer1: LayerBlock<B>,
    layer2: LayerBlock<B>,
    layer3: LayerBlock<B>,
    layer4: LayerBlock<B>,
    avgpool: AdaptiveAvgPool2d,
    fc: Linear<B>,
}

impl<B: Backend> ResNet<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        // First block
        let out = self.conv1.forward(input);
        let out = self.bn1.forward(out);
        let out = self.relu.forward(out);
        let out = self.maxpool.forward(out);

        // Residual blocks
        let out = self.layer1.forward(out);
        let out = self.layer2.forward(out);
        let out = self.layer3.forward(out);
        let out = self.layer4.forward(out);

        let out = self.avgpool.forward(out);
        // Reshape [B, C, 1, 1] -> [B, C]
        let out = out.flatten(1, 3);

        self.fc.forward(out)
    }

    /// ResNet-50 from [`Deep Residual Learning for Image Recognition`](https://arxiv.org/abs/1512.03385)
    /// at its unpruned channel widths.
    ///
    /// # Arguments
    ///
    /// * `num_classes`: Number of output classes of the model.
    /// * `device` - Device to create the module on.
    ///
    /// # Returns
    ///
    /// A ResNet-50 module.
    pub fn resnet50(num_classes: usize, device: &Device<B>) -> Self {
        ResNetConfig::new(&RESNET50_CHANNELS, num_classes).init(device)
    }

    /// ResNet-50 rebuilt at pruned channel widths.
    ///
    /// # Arguments
    ///
    /// * `channels`: Flat list of interior widths, three per bottleneck block
    ///   ([NUM_CHANNELS] entries). See [RESNET50_CHANNELS] for the unpruned
    ///   values and the expected ordering.
    /// * `num_classes`: Number of output classes of the model.
    /// * `device` - Device to create the module on.
    ///
    /// # Returns
    ///
    /// A ResNet-50 module at the given widths.
    ///
    /// # Panics
    ///
    /// If the list does not hold [NUM_CHANNELS] entries, or a block's first
    /// width does not match the width its input actually has.
    pub fn resnet50_slim(channels: &[usize], num_classes: usize, device: &Device<B>) -> Self {
        ResNetConfig::new(channels, num_classes).init(device)
    }

    /// ResNet-50 from [`Deep Residual Learning for Image Recognition`](https://arxiv.org/abs/1512.03385)
    /// with pre-trained weights.
    ///
    /// # Arguments
    ///
    /// * `weights`: Pre-trained weights to load.
    /// * `device` - Device to create the module on.
    ///
    /// # Returns
    ///
    /// A ResNet-50 module with pre-trained weights.
    #[cfg(feature = "pretrained")]
    pub fn resnet50_pretrained(
        weights: weights::ResNet50,
        device: &Device<B>,
    ) -> Result<Self, RecorderError> {
        let weights = weights.weights();
        let record = Self::load_weights_record(&weights, device)?;
        let model = Self::resnet50(weights.num_classes, device).load_record(record);

        Ok(model)
    }

    /// ResNet-50 rebuilt from a channel-pruned checkpoint.
    ///
    /// The checkpoint is expected to hold the pruned channel list under the
    /// top-level `cfg` key and the weights under `state_dict`, which is how
    /// channel-pruning tools export a slimmed network.
    ///
    /// # Arguments
    ///
    /// * `checkpoint`: Path to the pruned PyTorch checkpoint.
    /// * `num_classes`: Number of output classes of the model.
    /// * `device` - Device to create the module on.
    ///
    /// # Returns
    ///
    /// A ResNet-50 module at the checkpoint's pruned widths, with the
    /// checkpoint's weights loaded.
    #[cfg(feature = "std")]
    pub fn from_pruned_checkpoint(
        checkpoint: &Path,
        num_classes: usize,
        device: &Device<B>,
    ) -> Result<Self, RecorderError> {
        let channels = pruned_channels(checkpoint)?;
        let model = Self::resnet50_slim(&channels, num_classes, device);

        // Load weights from torch state_dict
        let load_args = LoadArgs::new(checkpoint.to_path_buf())
            // Checkpoint contains "cfg", "state_dict" and bookkeeping entries
            .with_top_level_key("state_dict")
            // Map *.downsample.0.* -> *.downsample.conv.*
            .with_key_remap("(.+)\\.downsample\\.0\\.(.+)", "$1.downsample.conv.$2")
            // Map *.downsample.1.* -> *.downsample.bn.*
            .with_key_remap("(.+)\\.downsample\\.1\\.(.+)", "$1.downsample.bn.$2")
            // Map layer[i].[j].* -> layer[i].blocks.[j].*
            .with_key_remap("(layer[1-4])\\.([0-9]+)\\.(.+)", "$1.blocks.$2.$3");
        let record = PyTorchFileRecorder::<FullPrecisionSettings>::new().load(load_args, device)?;

        Ok(model.load_record(record))
    }

    /// Re-initialize the last layer with the specified number of output classes.
    pub fn with_classes(mut self, num_classes: usize) -> Self {
        let [d_input, _d_output] = self.fc.weight.dims();
        self.fc = LinearConfig::new(d_input, num_classes).init(&self.fc.weight.device());
        self
    }

    /// Count the model's operations and parameters at the given input
    /// resolution, the way a layer-walking profiler does: one flop per
    /// multiply-accumulate for convolution and linear layers, two per output
    /// element for batch normalization, one per output element for average
    /// pooling, nothing for activations and max pooling.
    pub fn profile(&self, resolution: [usize; 2]) -> Profile {
        let mut total = Profile::default();

        // Stem: 7x7 conv /2, then 3x3 maxpool /2
        let resolution = profile::stride_output(resolution, self.conv1.stride[0]);
        total += profile::conv2d(&self.conv1, resolution);
        total += profile::batch_norm(&self.bn1, resolution);
        let resolution = profile::stride_output(resolution, 2);

        let (cost, resolution) = self.layer1.profile(resolution);
        total += cost;
        let (cost, resolution) = self.layer2.profile(resolution);
        total += cost;
        let (cost, resolution) = self.layer3.profile(resolution);
        total += cost;
        let (cost, _resolution) = self.layer4.profile(resolution);
        total += cost;

        // Pool [B, C, H, W] -> [B, C, 1, 1], then classify
        let [d_input, _d_output] = self.fc.weight.dims();
        total += profile::avg_pool(d_input);
        total += profile::linear(&self.fc);

        total
    }
}

#[cfg(feature = "pretrained")]
impl<B: Backend> ResNet<B> {
    /// Load specified pre-trained PyTorch weights as a record.
    fn load_weights_record(
        weights: &weights::Weights,
        device: &Device<B>,
    ) -> Result<ResNetRecord<B>, RecorderError> {
        // Download torch weights
        let torch_weights = weights.download().map_err(|err| {
            RecorderError::Unknown(format!("Could not download weights.\nError: {err}"))
        })?;

        // Load weights from torch state_dict
        let load_args = LoadArgs::new(torch_weights)
            // Map *.downsample.0.* -> *.downsample.conv.*
            .with_key_remap("(.+)\\.downsample\\.0\\.(.+)", "$1.downsample.conv.$2")
            // Map *.downsample.1.* -> *.downsample.bn.*
            .with_key_remap("(.+)\\.downsample\\.1\\.(.+)", "$1.downsample.bn.$2")
            // Map layer[i].[j].* -> layer[i].blocks.[j].*
            .with_key_remap("(layer[1-4])\\.([0-9]+)\\.(.+)", "$1.blocks.$2.$3");
        let record = PyTorchFileRecorder::<FullPrecisionSettings>::new().load(load_args, device)?;

        Ok(record)
    }
}

/// Read the pruned channel list stored under a checkpoint's `cfg` key.
#[cfg(feature = "std")]
pub fn pruned_channels(checkpoint: &Path) -> Result<Vec<usize>, RecorderError> {
    config_from_file(checkpoint, Some("cfg")).map_err(|err| {
        RecorderError::Unknown(format!(
            "Could not read the channel list from {}.\nError: {err}",
            checkpoint.display()
        ))
    })
}

/// [ResNet](ResNet) configuration.
struct ResNetConfig {
    conv1: Conv2dConfig,
    bn1: BatchNormConfig,
    maxpool: MaxPool2dConfig,
    layer1: LayerBlockConfig,
    layer2: LayerBlockConfig,
    layer3: LayerBlockConfig,
    layer4: LayerBlockConfig,
    avgpool: AdaptiveAvgPool2dConfig,
    fc: LinearConfig,
}

impl ResNetConfig {
    /// Create a new instance of the ResNet [config](ResNetConfig).
    fn new(channels: &[usize], num_classes: usize) -> Self {
        assert_eq!(
            channels.len(),
            NUM_CHANNELS,
            "channel list must hold {NUM_CHANNELS} widths, got {}",
            channels.len()
        );

        // 7x7 conv, 64, /2
        let conv1 = Conv2dConfig::new([3, 64], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false);
        let bn1 = BatchNormConfig::new(64);

        // 3x3 maxpool, /2
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1));

        // Residual blocks, each group consuming three widths per block
        let [b1, b2, b3, b4] = RESNET50_BLOCKS;
        let split2 = 3 * b1;
        let split3 = split2 + 3 * b2;
        let split4 = split3 + 3 * b3;
        let layer1 = LayerBlockConfig::new(b1, 64, 64, 1, &channels[..split2]);
        let layer2 = LayerBlockConfig::new(b2, 64 * EXPANSION, 128, 2, &channels[split2..split3]);
        let layer3 = LayerBlockConfig::new(b3, 128 * EXPANSION, 256, 2, &channels[split3..split4]);
        let layer4 = LayerBlockConfig::new(b4, 256 * EXPANSION, 512, 2, &channels[split4..]);

        // Average pooling [B, 512 * 4, H, W] -> [B, 512 * 4, 1, 1]
        let avgpool = AdaptiveAvgPool2dConfig::new([1, 1]);

        // Output layer
        let fc = LinearConfig::new(512 * EXPANSION, num_classes);

        Self {
            conv1,
            bn1,
            maxpool,
            layer1,
            layer2,
            layer3,
            layer4,
            avgpool,
            fc,
        }
    }

    /// Initialize a new [ResNet](ResNet) module.
    fn init<B: Backend>(self, device: &Device<B>) -> ResNet<B> {
        // Conv initializer
        let initializer = Initializer::KaimingNormal {
            gain: SQRT_2, // recommended value for ReLU
            fan_out_only: true,
        };

        ResNet {
            conv1: self.conv1.with_initializer(initializer).init(device),
            bn1: self.bn1.init(device),
            relu: Relu::new(),
            maxpool: self.maxpool.init(),
            layer1: self.layer1.init(device),
            layer2: self.layer2.init(device),
            layer3: self.layer3.init(device),
            layer4: self.layer4.init(device),
            avgpool: self.avgpool.init(),
            fc: self.fc.init(device),
        }
    }
}
