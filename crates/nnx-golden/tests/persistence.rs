//! Test directories on disk

use nnx_golden::{
    Accelerator, DataGenerationMethod, IntegerType, KernelShape, NnxError, Padding,
    RawTestConfiguration, Stride, TensorName, TestCase, TestConfiguration, TestGenerator,
    TestTensors, WeightMemory, CONF_FILE,
};

fn quantized() -> RawTestConfiguration {
    RawTestConfiguration {
        in_height: 5,
        in_width: 7,
        in_channel: 3,
        out_channel: 4,
        padding: Padding::ZERO,
        kernel_shape: KernelShape::K1X1,
        depthwise: false,
        stride: Stride::S1X1,
        in_type: IntegerType::INT8,
        out_type: IntegerType::INT8,
        weight_type: IntegerType::INT8,
        scale_type: Some(IntegerType::new(false, 32).unwrap()),
        bias_type: Some(IntegerType::INT32),
        has_norm_quant: true,
        has_bias: true,
        has_relu: false,
        wmem: WeightMemory::Mram,
    }
}

#[test]
fn save_then_load_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let conf = TestConfiguration::new(Accelerator::NeurekaV2, quantized()).unwrap();
    let case = TestGenerator::new(5, DataGenerationMethod::Random)
        .from_config(conf, TestTensors::default())
        .unwrap();

    case.save(dir.path()).unwrap();
    assert!(TestCase::is_test_dir(dir.path()));
    for name in TensorName::ALL {
        assert!(dir.path().join(name.file_name()).is_file(), "{name} not saved");
    }

    let loaded = TestCase::load(Accelerator::NeurekaV2, dir.path()).unwrap();
    assert_eq!(loaded, case);
}

#[test]
fn tensor_files_are_plain_json() {
    let dir = tempfile::tempdir().unwrap();
    let conf = TestConfiguration::new(Accelerator::NeurekaV2, quantized()).unwrap();
    let case = TestGenerator::new(0, DataGenerationMethod::Ones)
        .from_config(conf, TestTensors::default())
        .unwrap();
    case.save(dir.path()).unwrap();

    let scale = std::fs::read_to_string(dir.path().join("scale.json")).unwrap();
    assert_eq!(scale, r#"{"dtype":"uint32","shape":[1,4,1,1],"data":[1,1,1,1]}"#);

    let conf = std::fs::read_to_string(dir.path().join(CONF_FILE)).unwrap();
    assert!(conf.contains("\"wmem\": \"mram\""));
    assert!(conf.contains("\"in_type\": \"int8\""));
}

#[test]
fn conf_only_directory_regenerates() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(CONF_FILE),
        quantized().to_json_pretty().unwrap(),
    )
    .unwrap();

    let partial = TestCase::load(Accelerator::NeurekaV2, dir.path()).unwrap();
    assert!(partial.tensors().present().is_empty());
    assert!(!partial.is_valid());

    let full = TestGenerator::default().regenerate(partial, &[]).unwrap();
    assert!(full.is_valid());
    full.save(dir.path()).unwrap();
    assert_eq!(TestCase::load(Accelerator::NeurekaV2, dir.path()).unwrap(), full);
}

#[test]
fn stale_tensors_are_removed() {
    let dir = tempfile::tempdir().unwrap();
    let conf = TestConfiguration::new(Accelerator::NeurekaV2, quantized()).unwrap();
    TestGenerator::default()
        .from_config(conf, TestTensors::default())
        .unwrap()
        .save(dir.path())
        .unwrap();

    let plain = RawTestConfiguration {
        out_type: IntegerType::INT32,
        scale_type: None,
        bias_type: None,
        has_norm_quant: false,
        has_bias: false,
        ..quantized()
    };
    let conf = TestConfiguration::new(Accelerator::NeurekaV2, plain).unwrap();
    TestGenerator::default()
        .from_config(conf, TestTensors::default())
        .unwrap()
        .save(dir.path())
        .unwrap();

    assert!(!dir.path().join("scale.json").exists());
    assert!(!dir.path().join("global_shift.json").exists());
    assert!(TestCase::load(Accelerator::NeurekaV2, dir.path()).unwrap().is_valid());
}

#[test]
fn load_validates_against_accelerator() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(CONF_FILE),
        quantized().to_json_pretty().unwrap(),
    )
    .unwrap();

    // NE16 takes neither int8 input nor MRAM
    let err = TestCase::load(Accelerator::Ne16, dir.path()).unwrap_err();
    assert!(matches!(err, NnxError::InvalidConfiguration { .. }));
    assert_eq!(err.violations().len(), 2);
}

#[test]
fn toml_configuration_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("conf.toml");
    std::fs::write(
        &path,
        r#"
in_height = 4
in_width = 4
in_channel = 32
out_channel = 32
depthwise = true
in_type = "uint8"
out_type = "uint8"
weight_type = "int8"
scale_type = "uint8"
has_norm_quant = true
has_bias = false
has_relu = true
wmem = "sram"

[padding]
top = 1
bottom = 1
left = 1
right = 1

[kernel_shape]
height = 3
width = 3

[stride]
height = 1
width = 1
"#,
    )
    .unwrap();

    let conf = TestConfiguration::from_path(Accelerator::Neureka, &path).unwrap();
    assert!(conf.depthwise());
    assert_eq!(conf.wmem(), WeightMemory::Sram);
    assert_eq!(conf.weight_dims(), [32, 1, 3, 3]);
}
