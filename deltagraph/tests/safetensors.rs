#![cfg(feature = "safetensors")]

mod common;

use common::*;
use deltagraph::{prelude::*, safetensors::Writer};
use tempfile::NamedTempFile;

#[test]
fn test_trained_weights_survive_round_trip() {
    let dev = Cpu::seed_from_u64(11);
    let mut fc = FullyConnectedLayer::new(&dev, &[3], &[2]).unwrap();
    fc.base_mut().set_name("encoder");
    let mut bias = BiasLayer::new(&dev, &[2]).unwrap();
    bias.base_mut().set_name("encoder_bias");

    let x = Node::constant(batch(&dev, &[&[1.0, 2.0, 3.0]]).shared());
    let y = bias.eval(&[fc.eval(&[x]).unwrap()]).unwrap();
    let buffer = DeltaSet::new();
    y.accumulate(&buffer, batch(&dev, &[&[1.0, -1.0]])).unwrap();
    Sgd::new(SgdConfig {
        lr: 0.3,
        ..Default::default()
    })
    .update(&buffer)
    .unwrap();

    let file = NamedTempFile::new().expect("failed to create tempfile");
    let mut writer = Writer::new();
    writer.add_layer(&fc);
    writer.add_layer(&bias);
    writer.save(file.path()).unwrap();

    let other = Cpu::seed_from_u64(12);
    let mut fc2 = FullyConnectedLayer::new(&other, &[3], &[2]).unwrap();
    fc2.base_mut().set_name("encoder");
    let mut bias2 = BiasLayer::new(&other, &[2]).unwrap();
    bias2.base_mut().set_name("encoder_bias");
    fc2.load_safetensors(file.path()).unwrap();
    bias2.load_safetensors(file.path()).unwrap();

    assert_eq!(fc.weight.value().to_vec(), fc2.weight.value().to_vec());
    assert_eq!(bias.bias.value().to_vec(), bias2.bias.value().to_vec());
}

#[test]
fn test_missing_key_is_an_error() {
    let dev: Cpu = Default::default();
    let saved = BiasLayer::new(&dev, &[2]).unwrap();
    let mut renamed = BiasLayer::new(&dev, &[2]).unwrap();
    renamed.base_mut().set_name("other");
    let bytes = saved.to_safetensors_bytes().unwrap();
    assert!(renamed.load_safetensors_from_bytes(&bytes).is_err());
}
