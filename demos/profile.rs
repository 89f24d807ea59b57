use std::path::Path;

use slim_resnet_burn::model::resnet::{pruned_channels, ResNet};

use burn::backend::NdArray;

const NUM_CLASSES: usize = 1000;
const HEIGHT: usize = 224;
const WIDTH: usize = 224;

pub fn main() {
    // Parse arguments
    let checkpoint = std::env::args().nth(1).expect("No checkpoint path provided");
    let checkpoint = Path::new(&checkpoint);

    let device = Default::default();

    // The pruned widths the checkpoint was exported with
    let channels = pruned_channels(checkpoint)
        .map_err(|err| format!("Failed to read the channel list.\nError: {err}"))
        .unwrap();
    println!("{channels:?}");

    // Rebuild the model at the pruned widths and load its weights
    let model: ResNet<NdArray> = ResNet::from_pruned_checkpoint(checkpoint, NUM_CLASSES, &device)
        .map_err(|err| format!("Failed to load pruned checkpoint.\nError: {err}"))
        .unwrap();

    let profile = model.profile([HEIGHT, WIDTH]);
    println!(" Total flops = {:.2}B", profile.flops as f64 / 1e9);
    println!(" Total params = {:.2}M", profile.params as f64 / 1e6);
}
