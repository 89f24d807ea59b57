mod block;
pub mod imagenet;
pub mod profile;
pub mod resnet;
#[cfg(feature = "pretrained")]
pub mod weights;
