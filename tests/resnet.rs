use burn::backend::NdArray;
use burn::tensor::Tensor;

use slim_resnet_burn::model::resnet::{ResNet, NUM_CHANNELS, RESNET50_CHANNELS};

type B = NdArray<f32>;

// Unpruned ResNet-50 with interior block widths halved; the first width of
// every block stays pinned to the block's input.
const HALF_CHANNELS: [usize; NUM_CHANNELS] = [
    64, 32, 32, 256, 32, 32, 256, 32, 32, // layer1
    256, 64, 64, 512, 64, 64, 512, 64, 64, 512, 64, 64, // layer2
    512, 128, 128, 1024, 128, 128, 1024, 128, 128, 1024, 128, 128, 1024, 128, 128, 1024, 128,
    128, // layer3
    1024, 256, 256, 2048, 256, 256, 2048, 256, 256, // layer4
];

// Reference costs at 224x224 with 1000 classes, derived from the counting
// rules in `model::profile` (convolution/linear multiply-accumulates, batch
// norm at two ops per element, average pooling at one). The parameter total
// for the unpruned network matches torchvision's ResNet-50.
const RESNET50_FLOPS: u64 = 4_111_414_272;
const RESNET50_PARAMS: u64 = 25_557_032;
const HALF_FLOPS: u64 = 1_840_975_360;
const HALF_PARAMS: u64 = 12_381_864;

#[test]
fn forward_output_shape() {
    let device = Default::default();
    let model: ResNet<B> = ResNet::resnet50(10, &device);

    let input = Tensor::ones([1, 3, 64, 64], &device);
    let output = model.forward(input);

    assert_eq!(output.dims(), [1, 10]);
}

#[test]
fn pruned_forward_output_shape() {
    let device = Default::default();
    let model: ResNet<B> = ResNet::resnet50_slim(&HALF_CHANNELS, 10, &device);

    let input = Tensor::ones([2, 3, 64, 64], &device);
    let output = model.forward(input);

    assert_eq!(output.dims(), [2, 10]);
}

#[test]
fn profile_matches_reference() {
    let device = Default::default();
    let model: ResNet<B> = ResNet::resnet50(1000, &device);

    let profile = model.profile([224, 224]);
    assert_eq!(profile.flops, RESNET50_FLOPS);
    assert_eq!(profile.params, RESNET50_PARAMS);
}

#[test]
fn pruned_profile_shrinks() {
    let device = Default::default();
    let model: ResNet<B> = ResNet::resnet50_slim(&HALF_CHANNELS, 1000, &device);

    let profile = model.profile([224, 224]);
    assert_eq!(profile.flops, HALF_FLOPS);
    assert_eq!(profile.params, HALF_PARAMS);
}

#[test]
fn profile_scales_with_resolution() {
    let device = Default::default();
    let model: ResNet<B> = ResNet::resnet50(1000, &device);

    let profile = model.profile([32, 32]);
    assert_eq!(profile.flops, 85_914_624);
    // Parameters do not depend on the input resolution
    assert_eq!(profile.params, RESNET50_PARAMS);
}

#[test]
fn with_classes_reinitializes_head() {
    let device = Default::default();
    let model: ResNet<B> = ResNet::resnet50(1000, &device).with_classes(10);

    let input = Tensor::ones([1, 3, 64, 64], &device);
    assert_eq!(model.forward(input).dims(), [1, 10]);

    // 2048 * 1000 + 1000 head parameters replaced by 2048 * 10 + 10
    let profile = model.profile([224, 224]);
    assert_eq!(profile.params, RESNET50_PARAMS - 2_049_000 + 20_490);
}

#[test]
fn slim_channels_match_unpruned_when_unchanged() {
    let device = Default::default();
    let official: ResNet<B> = ResNet::resnet50(1000, &device);
    let slim: ResNet<B> = ResNet::resnet50_slim(&RESNET50_CHANNELS, 1000, &device);

    assert_eq!(official.profile([224, 224]), slim.profile([224, 224]));
}

#[test]
#[should_panic(expected = "channel list must hold 48 widths")]
fn rejects_wrong_channel_count() {
    let device = Default::default();
    let _: ResNet<B> = ResNet::resnet50_slim(&[64; 10], 1000, &device);
}

#[test]
#[should_panic(expected = "but its input is 256 channels wide")]
fn rejects_mismatched_block_input_width() {
    let mut channels = RESNET50_CHANNELS;
    // Second block of layer1 must read the 256-wide group output
    channels[3] = 128;

    let device = Default::default();
    let _: ResNet<B> = ResNet::resnet50_slim(&channels, 1000, &device);
}
