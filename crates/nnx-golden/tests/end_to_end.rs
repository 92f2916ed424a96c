//! Whole-layer scenarios: configuration, generation, functional model and
//! weight packing together

use nnx_golden::{
    accumulate, layout_for, pack_weights, to_signed, Accelerator, IntegerType, KernelShape,
    NnxError, Padding, RawTestConfiguration, Stride, Tensor, TestConfiguration, TestGenerator,
    TestTensors, WeightMemory,
};

fn conv3x3() -> RawTestConfiguration {
    RawTestConfiguration {
        in_height: 8,
        in_width: 8,
        in_channel: 16,
        out_channel: 16,
        padding: Padding::uniform(1),
        kernel_shape: KernelShape::K3X3,
        depthwise: false,
        stride: Stride::S1X1,
        in_type: IntegerType::UINT8,
        out_type: IntegerType::INT32,
        weight_type: IntegerType::INT8,
        scale_type: None,
        bias_type: None,
        has_norm_quant: false,
        has_bias: false,
        has_relu: false,
        wmem: WeightMemory::Tcdm,
    }
}

/// Floating-point convolution truncated to the low 32 bits
fn reference(input: &Tensor, weight: &Tensor, pad: usize) -> Vec<i64> {
    let [_, cin, h, w] = <[usize; 4]>::try_from(input.dims()).unwrap();
    let [cout, _, kh, kw] = <[usize; 4]>::try_from(weight.dims()).unwrap();
    let mut out = Vec::new();
    for co in 0..cout {
        for oy in 0..h {
            for ox in 0..w {
                let mut sum = 0f64;
                for ci in 0..cin {
                    for ky in 0..kh {
                        for kx in 0..kw {
                            let iy = (oy + ky) as isize - pad as isize;
                            let ix = (ox + kx) as isize - pad as isize;
                            if iy < 0 || ix < 0 || iy >= h as isize || ix >= w as isize {
                                continue;
                            }
                            let x = input.at(&[0, ci, iy as usize, ix as usize]) as f64;
                            let k = weight.at(&[co, ci, ky, kx]) as f64;
                            sum += x * k;
                        }
                    }
                }
                out.push(i64::from((sum as i64) as i32));
            }
        }
    }
    out
}

#[test]
fn accumulator_output_matches_reference() {
    for accel in Accelerator::ALL {
        let conf = TestConfiguration::new(accel, conv3x3()).unwrap();
        assert_eq!(conf.out_type(), IntegerType::INT32);

        let case = TestGenerator::default()
            .from_config(conf, TestTensors::default())
            .unwrap();
        let output = case.output().unwrap();
        assert_eq!(output.dims(), &[1, 16, 8, 8]);
        assert_eq!(output.dtype(), IntegerType::INT32);
        assert_eq!(
            output.data(),
            reference(case.input().unwrap(), case.weight().unwrap(), 1).as_slice()
        );
    }
}

#[test]
fn unit_requantization_is_clamped_relu() {
    for accel in Accelerator::ALL {
        let raw = RawTestConfiguration {
            out_type: IntegerType::UINT8,
            scale_type: Some(IntegerType::UINT8),
            bias_type: Some(IntegerType::INT32),
            has_norm_quant: true,
            has_bias: true,
            has_relu: true,
            ..conv3x3()
        };
        let conf = TestConfiguration::new(accel, raw).unwrap();
        let given = TestTensors {
            scale: Some(Tensor::full(IntegerType::UINT8, [1, 16, 1, 1], 1).unwrap()),
            bias: Some(Tensor::full(IntegerType::INT32, [1, 16, 1, 1], 0).unwrap()),
            global_shift: Some(Tensor::scalar(IntegerType::UINT8, 0).unwrap()),
            ..TestTensors::default()
        };
        let case = TestGenerator::new(11, Default::default())
            .from_config(conf, given)
            .unwrap();

        let acc = accumulate(
            case.input().unwrap(),
            case.weight().unwrap(),
            Padding::uniform(1),
            Stride::S1X1,
            false,
        )
        .unwrap();
        let expected: Vec<i64> = acc.data().iter().map(|&a| a.clamp(0, 255)).collect();
        assert_eq!(case.output().unwrap().data(), expected.as_slice());
        assert_eq!(case.output().unwrap().dtype(), IntegerType::UINT8);
        assert_eq!(case.global_shift_value(), 0);
    }
}

#[test]
fn selected_shift_keeps_output_in_range() {
    let raw = RawTestConfiguration {
        out_type: IntegerType::INT8,
        scale_type: Some(IntegerType::UINT8),
        bias_type: Some(IntegerType::INT32),
        has_norm_quant: true,
        has_bias: true,
        has_relu: false,
        ..conv3x3()
    };
    let conf = TestConfiguration::new(Accelerator::Neureka, raw).unwrap();
    let case = TestGenerator::default()
        .from_config(conf, TestTensors::default())
        .unwrap();
    // random 8-bit operands over 144 taps and a random scale spread far past 2^7
    assert!(case.global_shift_value() > 0);
    let output = case.output().unwrap();
    assert!(output.data().iter().all(|&v| (-128..=127).contains(&v)));
}

#[test]
fn depthwise_shapes() {
    let raw = RawTestConfiguration {
        depthwise: true,
        ..conv3x3()
    };
    let conf = TestConfiguration::new(Accelerator::Ne16, raw).unwrap();
    assert_eq!(conf.weight_dims(), [16, 1, 3, 3]);
    let case = TestGenerator::default()
        .from_config(conf, TestTensors::default())
        .unwrap();
    assert_eq!(case.weight().unwrap().dims(), &[16, 1, 3, 3]);
    assert_eq!(case.output().unwrap().dims(), &[1, 16, 8, 8]);
}

#[test]
fn relu_forces_unsigned_output() {
    let raw = RawTestConfiguration {
        out_type: IntegerType::INT8,
        scale_type: Some(IntegerType::UINT8),
        has_norm_quant: true,
        has_relu: true,
        ..conv3x3()
    };
    let err = TestConfiguration::new(Accelerator::Neureka, raw).unwrap_err();
    assert_eq!(err.violations().len(), 1);
}

#[test]
fn packed_weights_unpack_to_generated_weight() {
    for accel in Accelerator::ALL {
        let conf = TestConfiguration::new(accel, conv3x3()).unwrap();
        let case = TestGenerator::default()
            .from_config(conf, TestTensors::default())
            .unwrap();
        let packed = pack_weights(&case).unwrap();
        assert_eq!(packed.wmem, WeightMemory::Tcdm);
        assert_eq!(packed.bits, 8);
        assert_eq!(packed.section(), "PI_L1");

        let unsigned = packed.unpack(accel).unwrap();
        assert_eq!(&to_signed(&unsigned).unwrap(), case.weight().unwrap());
    }
}

#[test]
fn packing_follows_the_case_accelerator() {
    let raw = RawTestConfiguration {
        wmem: WeightMemory::Sram,
        ..conv3x3()
    };
    assert!(TestConfiguration::new(Accelerator::Ne16, raw.clone()).is_err());
    let conf = TestConfiguration::new(Accelerator::Neureka, raw).unwrap();
    let case = TestGenerator::default()
        .from_config(conf, TestTensors::default())
        .unwrap();

    let packed = pack_weights(&case).unwrap();
    assert_eq!(packed.section(), ".weightmem_sram");
    assert_eq!(
        packed.data.len(),
        layout_for(Accelerator::Neureka)
            .encoded_len(packed.dims, packed.bits, false)
            .unwrap()
    );
    let unsigned = packed.unpack(Accelerator::Neureka).unwrap();
    assert_eq!(&to_signed(&unsigned).unwrap(), case.weight().unwrap());

    let err = layout_for(Accelerator::Ne16)
        .check_wmem(WeightMemory::Sram)
        .unwrap_err();
    assert!(matches!(
        err,
        NnxError::UnsupportedWeightMemory {
            requested: WeightMemory::Sram,
            ..
        }
    ));
}
